// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license
pub mod config; // 流水线配置参数
pub mod detection; // 检测器 + 采样缓存
pub mod error;
pub mod frame;
pub mod input; // 视频输入系统
pub mod models; // 模型接口
pub mod ort_backend; // ONNX Runtime 推理后端
pub mod pipeline; // 采集循环与输出通道
pub mod presence; // 持续在场告警状态机

pub use crate::config::PipelineConfig;
pub use crate::detection::{Bbox, Detection, Detector, FrameSampler, ObjectDetector};
pub use crate::error::{Result, SentinelError};
pub use crate::frame::Frame;
pub use crate::input::FrameSource;
pub use crate::models::{Model, ModelType};
pub use crate::ort_backend::OrtBackend;
pub use crate::pipeline::{CaptureHandle, CaptureLoop, DisplayFrame, LoopStats, TickOutcome};
pub use crate::presence::{AlertEvent, AlertKind, PresenceState, PresenceTracker};

/// 非极大值抑制: 按置信度降序,丢弃与已保留框 IoU >= 阈值的后续框
pub fn non_max_suppression(xs: &mut Vec<Detection>, iou_threshold: f32) {
    xs.sort_by(|b1, b2| b2.confidence.total_cmp(&b1.confidence));

    let mut current_index = 0;
    for index in 0..xs.len() {
        let mut drop = false;
        for prev_index in 0..current_index {
            let iou = xs[prev_index].bbox.iou(&xs[index].bbox);
            if iou >= iou_threshold {
                drop = true;
                break;
            }
        }
        if !drop {
            xs.swap(current_index, index);
            current_index += 1;
        }
    }
    xs.truncate(current_index);
}
