/// 检测系统 (Detection System)
///
/// 运行在采集线程内, 不跨线程共享
/// - Detector: 预处理 → 推理 → 解码 → NMS
/// - FrameSampler: 每 N 帧推理一次, 其余帧复用缓存结果
pub mod detector;
pub mod sampling;
pub mod types;

pub use detector::{Detector, ObjectDetector};
pub use sampling::{DetectionCache, FrameSampler, Sampled};
pub use types::{Bbox, Detection};
