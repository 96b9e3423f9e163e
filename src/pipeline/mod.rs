/// 采集流水线 (Capture Pipeline)
///
/// 两线程架构, 通过有界通道传递不可变消息:
/// - Capture:  读帧 + 抽帧检测 + 在场告警 (独立线程)
/// - Consumer: 显示帧 / 告警的消费端 (调用方线程)
pub mod annotate;
pub mod capture;
pub mod sink;

use std::sync::Arc;

use crate::detection::Detection;
use crate::frame::Frame;

pub use capture::{CaptureHandle, CaptureLoop, LoopStats, TickOutcome};
pub use sink::{
    alert_channel, display_channel, AlertSink, ChannelAlertSink, DisplaySink, LatestFrameSink,
};

/// 显示帧 (采集线程 → 显示端)
#[derive(Clone, Debug)]
pub struct DisplayFrame {
    pub index: u64, // 帧序号
    /// 已绘制检测框的帧
    pub frame: Frame,
    pub detections: Arc<[Detection]>,
    pub person_count: usize,
    /// 本帧是否刚运行过检测
    pub fresh: bool,
}
