//! 摄像头输入模块
//!
//! 处理本地摄像头输入,支持 DirectShow(Windows) / AVFoundation(macOS) / V4L2(Linux)。
//! FFmpeg 在独立解码线程中推送帧, `read_frame` 以有限超时从通道拉取最新帧。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use ez_ffmpeg::core::context::null_output::create_null_output;
use ez_ffmpeg::filter::frame_pipeline_builder::FramePipelineBuilder;
use ez_ffmpeg::{AVMediaType, FfmpegContext, Input};
use tracing::{error, info, warn};

use super::decode_filter::CaptureFilter;
use super::FrameSource;
use crate::config::CameraConfig;
use crate::error::{Result, SentinelError};
use crate::frame::Frame;

/// 打开设备的最长等待
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);
/// 关闭时等待解码线程退出的上限
const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);
/// 解码线程检查停止信号的间隔
const STOP_POLL: Duration = Duration::from_millis(20);

/// 摄像头帧源
pub struct CameraSource {
    device_index: usize,
    width: u32,
    height: u32,
    fps: u32,
    read_timeout: Duration,
    rx: Option<Receiver<Frame>>,
    stop: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl CameraSource {
    pub fn new(config: &CameraConfig, fps: f64) -> Self {
        Self {
            device_index: config.device_index,
            width: config.width,
            height: config.height,
            fps: fps.round().max(1.0) as u32,
            read_timeout: Duration::from_millis(config.read_timeout_ms),
            rx: None,
            stop: Arc::new(AtomicBool::new(false)),
            worker: None,
        }
    }

    /// 格式化摄像头URL - 根据平台选择
    fn format_camera_url(index: usize) -> Result<String> {
        #[cfg(target_os = "windows")]
        {
            // DirectShow 只能按设备名称打开
            let devices = get_camera_devices();
            let (_, name) = devices
                .into_iter()
                .find(|(i, _)| *i == index)
                .ok_or_else(|| {
                    SentinelError::SourceUnavailable(format!("camera #{index} not found"))
                })?;
            Ok(format!("video={}", name))
        }
        #[cfg(target_os = "linux")]
        {
            Ok(format!("/dev/video{}", index))
        }
        #[cfg(not(any(target_os = "windows", target_os = "linux")))]
        {
            Ok(format!("{}", index))
        }
    }

    fn input_format() -> &'static str {
        #[cfg(target_os = "windows")]
        let format = "dshow"; // DirectShow

        #[cfg(target_os = "macos")]
        let format = "avfoundation"; // AVFoundation

        #[cfg(target_os = "linux")]
        let format = "v4l2"; // Video4Linux2

        #[cfg(not(any(target_os = "windows", target_os = "macos", target_os = "linux")))]
        let format = "video4linux2";

        format
    }
}

impl FrameSource for CameraSource {
    fn open(&mut self) -> Result<()> {
        self.close();

        let camera_url = Self::format_camera_url(self.device_index)?;
        let format = Self::input_format();
        info!("📷 打开摄像头: {} (格式: {})", camera_url, format);

        let (tx, rx) = crossbeam_channel::bounded(1);
        let stop = Arc::new(AtomicBool::new(false));
        let filter = CaptureFilter::new(tx, rx.clone(), Arc::clone(&stop));
        let video_size = format!("{}x{}", self.width, self.height);
        let framerate = self.fps.to_string();

        // FFmpeg 上下文在解码线程内构建并运行, 启动结果通过 ready 通道回传
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<Result<()>>(1);
        let worker_stop = Arc::clone(&stop);
        let worker = std::thread::Builder::new()
            .name("sentinel-camera".into())
            .spawn(move || {
                let stop = worker_stop;
                // 构建帧处理管线
                let pipe: FramePipelineBuilder = AVMediaType::AVMEDIA_TYPE_VIDEO.into();
                let pipe = pipe.filter("capture", Box::new(filter));
                let out = create_null_output().add_frame_pipeline(pipe);

                let input = Input::new(camera_url.as_str())
                    .set_format(format)
                    .set_input_opts(
                        [
                            ("framerate", framerate.as_str()),
                            ("video_size", video_size.as_str()),
                        ]
                        .into(),
                    );

                let ctx = match FfmpegContext::builder()
                    .input(input)
                    .filter_descs(["format=yuv420p"].into())
                    .output(out)
                    .build()
                {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = ready_tx.send(Err(SentinelError::SourceUnavailable(format!(
                            "构建失败: {}",
                            e
                        ))));
                        return;
                    }
                };
                // open 已超时放弃: 不再启动设备
                if stop.load(Ordering::Acquire) {
                    return;
                }
                let sch = match ctx.start() {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = ready_tx.send(Err(SentinelError::SourceUnavailable(format!(
                            "启动失败: {}",
                            e
                        ))));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(()));

                // 停止信号到达时中止调度器, 设备无帧时也能释放
                if wait_or_abort(&stop, || sch.is_ended(), || sch.abort()) {
                    info!("🛑 摄像头解码已中止");
                }
                let _ = sch.wait();
                info!("📹 摄像头解码循环结束");
            })?;

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                stop.store(true, Ordering::Release);
                return Err(SentinelError::SourceUnavailable(format!(
                    "camera did not start within {:?}",
                    OPEN_TIMEOUT
                )));
            }
        }

        info!("✅ 摄像头连接成功,开始解码!");
        self.rx = Some(rx);
        self.stop = stop;
        self.worker = Some(worker);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame> {
        let rx = self
            .rx
            .as_ref()
            .ok_or_else(|| SentinelError::SourceUnavailable("camera is closed".into()))?;

        match rx.recv_timeout(self.read_timeout) {
            Ok(frame) => Ok(frame),
            Err(RecvTimeoutError::Timeout) => {
                // 解码线程已退出: 设备丢失
                if self.worker.as_ref().is_some_and(|w| w.is_finished()) {
                    return Err(SentinelError::SourceUnavailable(
                        "camera decoder exited".into(),
                    ));
                }
                Err(SentinelError::FrameRead(format!(
                    "no frame within {:?}",
                    self.read_timeout
                )))
            }
            Err(RecvTimeoutError::Disconnected) => Err(SentinelError::SourceUnavailable(
                "camera decoder disconnected".into(),
            )),
        }
    }

    fn close(&mut self) {
        self.stop.store(true, Ordering::Release);
        self.rx = None;
        if let Some(worker) = self.worker.take() {
            let deadline = Instant::now() + CLOSE_TIMEOUT;
            while !worker.is_finished() && Instant::now() < deadline {
                std::thread::sleep(STOP_POLL);
            }
            if !worker.is_finished() {
                warn!("⚠️ 摄像头解码线程 {:?} 内未退出, 不再等待", CLOSE_TIMEOUT);
                return;
            }
            if worker.join().is_err() {
                error!("❌ 摄像头解码线程异常退出");
            }
        }
    }

    fn name(&self) -> String {
        format!("camera#{}", self.device_index)
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.close();
    }
}

/// 等待解码结束; 期间收到停止信号则调用 `abort`。返回是否中止
fn wait_or_abort(stop: &AtomicBool, is_ended: impl Fn() -> bool, abort: impl FnOnce()) -> bool {
    while !is_ended() {
        if stop.load(Ordering::Acquire) {
            abort();
            return true;
        }
        std::thread::sleep(STOP_POLL);
    }
    false
}

/// 获取可用的摄像头设备列表
pub fn get_camera_devices() -> Vec<(usize, String)> {
    match ez_ffmpeg::device::get_input_video_devices() {
        Ok(devices) => devices.into_iter().enumerate().collect(),
        Err(e) => {
            warn!("⚠️ 获取摄像头列表失败: {}", e);
            vec![]
        }
    }
}
