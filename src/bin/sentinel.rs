/// 数字卫兵 (Digital Sentinel)
///
/// 摄像头在岗监测: 用户身后持续出现第二人时告警
///
/// 系统架构:
/// 1. 采集线程: 读帧 + 抽帧检测 + 在场状态机 (独立工作线程)
/// 2. 主线程:   消费显示帧与告警
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{select, tick};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sentinel_rs::input::ReplaySource;
use sentinel_rs::pipeline::{alert_channel, display_channel};
use sentinel_rs::{CaptureLoop, Detector, FrameSource, PipelineConfig};

/// 数字卫兵参数
#[derive(Parser, Debug)]
#[command(author, version, about = "数字卫兵 - 摄像头在岗监测", long_about = None)]
struct Args {
    /// JSON 配置文件 (命令行参数优先)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// ONNX 检测模型
    #[arg(short, long)]
    model: Option<PathBuf>,

    /// 摄像头序号
    #[arg(long)]
    camera: Option<usize>,

    /// 图片目录回放 (代替摄像头)
    #[arg(long)]
    replay: Option<PathBuf>,

    /// 每 N 帧检测一次
    #[arg(long)]
    every: Option<u64>,

    /// 置信度阈值
    #[arg(long)]
    conf: Option<f32>,

    /// NMS IoU 阈值
    #[arg(long)]
    iou: Option<f32>,

    /// 持续在场秒数
    #[arg(long)]
    seconds: Option<f64>,

    /// 告警人数阈值
    #[arg(long)]
    persons: Option<usize>,

    /// 目标帧率
    #[arg(long)]
    fps: Option<f64>,

    /// 只统计用户身后区域
    #[arg(long)]
    behind_user: bool,

    /// 运行时长 (秒), 不指定则一直运行
    #[arg(long)]
    duration: Option<f64>,
}

impl Args {
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)
                .with_context(|| format!("加载配置失败: {}", path.display()))?,
            None => PipelineConfig::default(),
        };

        if let Some(model) = &self.model {
            config.detector.model_path = model.clone();
        }
        if let Some(camera) = self.camera {
            config.camera.device_index = camera;
        }
        if let Some(every) = self.every {
            config.sample_every_n_frames = every;
        }
        if let Some(conf) = self.conf {
            config.confidence_threshold = conf;
        }
        if let Some(iou) = self.iou {
            config.nms_iou_threshold = iou;
        }
        if let Some(seconds) = self.seconds {
            config.sustained_presence_seconds = seconds;
        }
        if let Some(persons) = self.persons {
            config.person_count_threshold = persons;
        }
        if let Some(fps) = self.fps {
            config.target_fps = fps;
        }
        if self.behind_user {
            config.behind_user_zone = true;
        }

        config.validate()?;
        Ok(config)
    }

    fn frame_source(&self, config: &PipelineConfig) -> Result<Box<dyn FrameSource>> {
        if let Some(dir) = &self.replay {
            return Ok(Box::new(ReplaySource::new(dir)));
        }
        camera_source(config)
    }
}

#[cfg(feature = "camera")]
fn camera_source(config: &PipelineConfig) -> Result<Box<dyn FrameSource>> {
    let devices = sentinel_rs::input::get_camera_devices();
    for (i, name) in &devices {
        info!("📷 摄像头 #{}: {}", i, name);
    }
    Ok(Box::new(sentinel_rs::input::CameraSource::new(
        &config.camera,
        config.target_fps,
    )))
}

#[cfg(not(feature = "camera"))]
fn camera_source(_config: &PipelineConfig) -> Result<Box<dyn FrameSource>> {
    anyhow::bail!("未启用摄像头支持: 使用 --features camera 编译, 或用 --replay <目录> 回放图片")
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("sentinel_rs=info,sentinel=info")),
        )
        .init();

    let args = Args::parse();
    let config = args.pipeline_config()?;

    info!("🚀 数字卫兵系统启动");
    info!("📦 检测模型: {}", config.detector.model_path.display());
    info!(
        "⚙️ 每{}帧检测 | conf>{} | iou>={} | {}人持续{}s告警 | {}fps",
        config.sample_every_n_frames,
        config.confidence_threshold,
        config.nms_iou_threshold,
        config.person_count_threshold,
        config.sustained_presence_seconds,
        config.target_fps
    );

    // ========== 启动阶段: 模型与帧源失败即退出 ==========
    let detector = Detector::load(&config).context("模型加载失败")?;
    let source = args.frame_source(&config)?;

    let (display, frames) = display_channel(config.display_queue_capacity);
    let (alert_sink, alerts) = alert_channel(config.alert_queue_capacity);
    let handle = CaptureLoop::new(
        source,
        detector,
        &config,
        Box::new(display),
        Box::new(alert_sink),
    )
    .spawn()
    .context("帧源打开失败")?;

    // ========== 主线程: 消费显示帧与告警 ==========
    let deadline = args
        .duration
        .map(|secs| Instant::now() + Duration::from_secs_f64(secs.max(0.0)));
    let heartbeat = tick(Duration::from_secs(1));
    let mut shown: u64 = 0;
    let mut last_count = 0;

    loop {
        select! {
            recv(frames) -> msg => {
                let Ok(frame) = msg else { break };
                shown += 1;
                if frame.fresh && frame.person_count != last_count {
                    info!("👥 帧 #{}: {}人", frame.index, frame.person_count);
                    last_count = frame.person_count;
                }
            }
            recv(alerts) -> msg => {
                let Ok(event) = msg else { break };
                warn!(
                    "🚨 [{}] {}: {}人, 持续{:.1}s",
                    event.wall_time.format("%Y-%m-%d %H:%M:%S"),
                    event.kind.as_str(),
                    event.person_count,
                    event.streak.as_secs_f64()
                );
            }
            recv(heartbeat) -> _ => {
                if !handle.is_running() {
                    warn!("⚠️ 采集线程已退出");
                    break;
                }
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    info!("⏱️ 运行时长已到, 停止");
                    break;
                }
            }
        }
    }

    let stats = handle.stop();
    info!("📺 已消费显示帧 {}", shown);
    info!("📊 运行统计: {}", serde_json::to_string(&stats)?);
    Ok(())
}
