//! 流水线配置参数 (Pipeline configuration)
//!
//! JSON 文件 → 命令行覆盖 → `validate()`。所有字段都有默认值,
//! 配置文件只需写出需要修改的部分。

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SentinelError};
use crate::models::ModelType;

/// COCO 80 类 (YOLOv3 / YOLOv8 预训练权重共用)
pub const COCO_CLASSES: [&str; 80] = [
    "person", "bicycle", "car", "motorbike", "aeroplane", "bus", "train", "truck", "boat",
    "traffic light", "fire hydrant", "stop sign", "parking meter", "bench", "bird", "cat", "dog",
    "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe", "backpack", "umbrella",
    "handbag", "tie", "suitcase", "frisbee", "skis", "snowboard", "sports ball", "kite",
    "baseball bat", "baseball glove", "skateboard", "surfboard", "tennis racket", "bottle",
    "wine glass", "cup", "fork", "knife", "spoon", "bowl", "banana", "apple", "sandwich", "orange",
    "broccoli", "carrot", "hot dog", "pizza", "donut", "cake", "chair", "sofa", "pottedplant",
    "bed", "diningtable", "toilet", "tvmonitor", "laptop", "mouse", "remote", "keyboard",
    "cell phone", "microwave", "oven", "toaster", "sink", "refrigerator", "book", "clock", "vase",
    "scissors", "teddy bear", "hair drier", "toothbrush",
];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// 每 N 帧运行一次检测
    pub sample_every_n_frames: u64,
    pub confidence_threshold: f32,
    pub nms_iou_threshold: f32,
    /// 持续在场多少秒后告警
    pub sustained_presence_seconds: f64,
    /// 画面中人数达到该值视为 "有第二人"
    pub person_count_threshold: usize,
    pub target_fps: f64,

    /// 仅统计位于用户身后区域 (画面中上部) 的检测, 默认关闭
    pub behind_user_zone: bool,

    pub display_queue_capacity: usize,
    pub alert_queue_capacity: usize,
    pub retry_backoff_initial_ms: u64,
    pub retry_backoff_max_ms: u64,

    pub detector: DetectorConfig,
    pub camera: CameraConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub model_path: PathBuf,
    /// 模型输入尺寸 (正方形)
    pub input_size: u32,
    pub target_class: String,
    pub class_names: Vec<String>,
    /// 为空时根据模型文件名推断
    pub model_type: Option<ModelType>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub device_index: usize,
    pub width: u32,
    pub height: u32,
    /// 单次读帧最长等待
    pub read_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_every_n_frames: 5,
            confidence_threshold: 0.5,
            nms_iou_threshold: 0.4,
            sustained_presence_seconds: 10.0,
            person_count_threshold: 2,
            target_fps: 30.0,
            behind_user_zone: false,
            display_queue_capacity: 2,
            alert_queue_capacity: 16,
            retry_backoff_initial_ms: 100,
            retry_backoff_max_ms: 5000,
            detector: DetectorConfig::default(),
            camera: CameraConfig::default(),
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models/yolov8n.onnx"),
            input_size: 416,
            target_class: "person".to_string(),
            class_names: COCO_CLASSES.iter().map(|s| s.to_string()).collect(),
            model_type: None,
        }
    }
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            width: 1280,
            height: 720,
            read_timeout_ms: 500,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            SentinelError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&text)
            .map_err(|e| SentinelError::Config(format!("{}: {}", path.display(), e)))
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(text).map_err(|e| SentinelError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        fn unit(name: &str, v: f32) -> Result<()> {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(SentinelError::Config(format!("{name} must be in [0, 1], got {v}")))
            }
        }

        if self.sample_every_n_frames == 0 {
            return Err(SentinelError::Config(
                "sample_every_n_frames must be >= 1".into(),
            ));
        }
        unit("confidence_threshold", self.confidence_threshold)?;
        unit("nms_iou_threshold", self.nms_iou_threshold)?;
        Duration::try_from_secs_f64(self.sustained_presence_seconds).map_err(|_| {
            SentinelError::Config(format!(
                "sustained_presence_seconds out of range: {}",
                self.sustained_presence_seconds
            ))
        })?;
        if self.person_count_threshold == 0 {
            return Err(SentinelError::Config(
                "person_count_threshold must be >= 1".into(),
            ));
        }
        if !(self.target_fps.is_finite() && self.target_fps > 0.0) {
            return Err(SentinelError::Config(format!(
                "target_fps must be > 0, got {}",
                self.target_fps
            )));
        }
        Duration::try_from_secs_f64(1.0 / self.target_fps).map_err(|_| {
            SentinelError::Config(format!("target_fps too small: {}", self.target_fps))
        })?;
        if self.display_queue_capacity == 0 || self.alert_queue_capacity == 0 {
            return Err(SentinelError::Config("queue capacities must be >= 1".into()));
        }
        if self.retry_backoff_initial_ms == 0
            || self.retry_backoff_max_ms < self.retry_backoff_initial_ms
        {
            return Err(SentinelError::Config(format!(
                "invalid retry backoff {}..{} ms",
                self.retry_backoff_initial_ms, self.retry_backoff_max_ms
            )));
        }
        if self.detector.input_size == 0 {
            return Err(SentinelError::Config("detector.input_size must be > 0".into()));
        }
        if !self
            .detector
            .class_names
            .iter()
            .any(|n| n == &self.detector.target_class)
        {
            return Err(SentinelError::Config(format!(
                "target class '{}' is not in class_names",
                self.detector.target_class
            )));
        }
        Ok(())
    }

    /// 采集循环节拍 (未校验的取值饱和到 [0, Duration::MAX])
    pub fn frame_period(&self) -> Duration {
        saturating_secs(1.0 / self.target_fps)
    }

    pub fn sustained_presence(&self) -> Duration {
        saturating_secs(self.sustained_presence_seconds)
    }

    pub fn model_type(&self) -> ModelType {
        self.detector
            .model_type
            .unwrap_or_else(|| ModelType::from_path(&self.detector.model_path))
    }
}

fn saturating_secs(secs: f64) -> Duration {
    Duration::try_from_secs_f64(secs).unwrap_or(if secs > 0.0 {
        Duration::MAX
    } else {
        Duration::ZERO
    })
}
