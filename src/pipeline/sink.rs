//! 输出通道 (Display Sink / Alert Sink)
//!
//! 采集线程只做 `try_send`, 从不阻塞在消费者上。

use std::sync::atomic::{AtomicU64, Ordering};

use crossbeam_channel::{Receiver, Sender, TrySendError};
use tracing::{debug, warn};

use super::DisplayFrame;
use crate::presence::AlertEvent;

/// 显示帧消费端
pub trait DisplaySink: Send {
    /// 投递一帧, 不阻塞
    fn publish(&self, frame: DisplayFrame);

    /// 因队列满而被丢弃的帧数
    fn dropped(&self) -> u64 {
        0
    }
}

/// 告警消费端
pub trait AlertSink: Send {
    fn publish(&self, event: AlertEvent);
}

/// 最新帧优先: 队列满时丢弃最旧的一帧
pub struct LatestFrameSink {
    tx: Sender<DisplayFrame>,
    drain: Receiver<DisplayFrame>,
    dropped: AtomicU64,
}

impl DisplaySink for LatestFrameSink {
    fn publish(&self, frame: DisplayFrame) {
        let mut frame = frame;
        loop {
            match self.tx.try_send(frame) {
                Ok(()) => return,
                Err(TrySendError::Full(f)) => {
                    if self.drain.try_recv().is_ok() {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                    frame = f;
                }
                Err(TrySendError::Disconnected(_)) => {
                    debug!("显示端已关闭, 丢弃帧");
                    return;
                }
            }
        }
    }

    fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// 告警队列: 满时丢弃新告警并记录
pub struct ChannelAlertSink {
    tx: Sender<AlertEvent>,
}

impl AlertSink for ChannelAlertSink {
    fn publish(&self, event: AlertEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(e)) => {
                warn!("⚠️ 告警队列已满, 丢弃告警: {} @ {}", e.kind.as_str(), e.wall_time);
            }
            Err(TrySendError::Disconnected(e)) => {
                warn!("⚠️ 告警端已关闭, 丢弃告警: {}", e.kind.as_str());
            }
        }
    }
}

/// 创建显示通道 (容量至少为 1)
pub fn display_channel(capacity: usize) -> (LatestFrameSink, Receiver<DisplayFrame>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    let sink = LatestFrameSink {
        tx,
        drain: rx.clone(),
        dropped: AtomicU64::new(0),
    };
    (sink, rx)
}

/// 创建告警通道 (容量至少为 1)
pub fn alert_channel(capacity: usize) -> (ChannelAlertSink, Receiver<AlertEvent>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    (ChannelAlertSink { tx }, rx)
}
