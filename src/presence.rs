//! 持续在场告警 (Presence Tracker)
//!
//! 只有运行过检测的帧才推进状态机:
//! ```text
//!            c >= 阈值                 持续 >= sustained
//!   Idle ───────────────▶ Accumulating ─────────────────▶ Fired
//!    ▲                        │                            │
//!    └──────── c < 阈值 ──────┴────────────────────────────┘
//! ```
//! 一次连续在场最多告警一次; 告警后必须先中断 (c < 阈值) 才能再次累计。

use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::detection::Detection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceState {
    Idle,
    Accumulating { since: Instant },
    Fired,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AlertKind {
    /// 用户身后持续出现第二人
    SustainedPresence,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::SustainedPresence => "sustained-presence",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlertEvent {
    pub kind: AlertKind,
    /// 触发帧的采集时刻
    pub at: Instant,
    pub wall_time: DateTime<Local>,
    pub person_count: usize,
    /// 本次连续在场时长
    pub streak: Duration,
}

/// 用户身后区域: 水平中间三分之一 + 画面上半部分
#[derive(Debug, Clone, Copy, Default)]
pub struct BehindUserZone;

impl BehindUserZone {
    pub fn contains(&self, det: &Detection, frame_width: f32, frame_height: f32) -> bool {
        let (cx, cy) = det.bbox.cxcy();
        let (left, right) = (frame_width / 3., frame_width * 2. / 3.);
        (left..=right).contains(&cx) && cy < frame_height / 2.
    }
}

pub struct PresenceTracker {
    threshold: usize,
    sustained: Duration,
    zone: Option<BehindUserZone>,
    state: PresenceState,
}

impl PresenceTracker {
    pub fn new(threshold: usize, sustained: Duration) -> Self {
        Self {
            threshold,
            sustained,
            zone: None,
            state: PresenceState::Idle,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        let tracker = Self::new(config.person_count_threshold, config.sustained_presence());
        if config.behind_user_zone {
            tracker.with_zone(BehindUserZone)
        } else {
            tracker
        }
    }

    pub fn with_zone(mut self, zone: BehindUserZone) -> Self {
        self.zone = Some(zone);
        self
    }

    pub fn state(&self) -> PresenceState {
        self.state
    }

    /// 输入一帧检测结果; 开启区域过滤时, 还要求至少一人位于身后区域
    pub fn observe_detections(
        &mut self,
        detections: &[Detection],
        frame_width: u32,
        frame_height: u32,
        now: Instant,
    ) -> Option<AlertEvent> {
        let count = detections.len();
        let in_zone = match self.zone {
            Some(zone) => detections
                .iter()
                .any(|d| zone.contains(d, frame_width as f32, frame_height as f32)),
            None => true,
        };
        // 区域外的人群不计入: 等价于本帧不满足条件
        self.observe(if in_zone { count } else { 0 }, now)
    }

    /// 输入一帧的人数
    pub fn observe(&mut self, count: usize, now: Instant) -> Option<AlertEvent> {
        if count < self.threshold {
            if self.state != PresenceState::Idle {
                debug!("👤 在场中断 (人数{}), 状态复位", count);
            }
            self.state = PresenceState::Idle;
            return None;
        }

        match self.state {
            PresenceState::Idle => {
                debug!("👥 检测到{}人, 开始计时", count);
                self.state = PresenceState::Accumulating { since: now };
                None
            }
            PresenceState::Accumulating { since } => {
                let streak = now.saturating_duration_since(since);
                if streak < self.sustained {
                    return None;
                }
                self.state = PresenceState::Fired;
                info!(
                    "🚨 持续在场告警: {}人, 已持续{:.1}s",
                    count,
                    streak.as_secs_f64()
                );
                Some(AlertEvent {
                    kind: AlertKind::SustainedPresence,
                    at: now,
                    wall_time: Local::now(),
                    person_count: count,
                    streak,
                })
            }
            PresenceState::Fired => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Bbox;

    /// 按固定间隔输入人数序列, 返回告警发生的样本序号
    fn feed(tracker: &mut PresenceTracker, counts: &[usize], step: Duration) -> Vec<usize> {
        let t0 = Instant::now();
        counts
            .iter()
            .enumerate()
            .filter_map(|(i, &c)| {
                tracker
                    .observe(c, t0 + step * i as u32)
                    .map(|event| {
                        assert_eq!(event.kind, AlertKind::SustainedPresence);
                        assert_eq!(event.at, t0 + step * i as u32);
                        i
                    })
            })
            .collect()
    }

    fn tracker() -> PresenceTracker {
        PresenceTracker::new(2, Duration::from_secs(10))
    }

    #[test]
    fn test_sustained_run_fires_once() {
        let mut t = tracker();
        let fired = feed(&mut t, &[2, 2, 2, 2, 2], Duration::from_secs(3));
        assert_eq!(fired, vec![4]);
        assert_eq!(t.state(), PresenceState::Fired);
    }

    #[test]
    fn test_gap_resets_streak() {
        let mut t = tracker();
        let fired = feed(&mut t, &[2, 2, 1, 2, 2, 2, 2], Duration::from_secs(3));
        assert!(fired.is_empty());
        assert!(matches!(t.state(), PresenceState::Accumulating { .. }));
    }

    #[test]
    fn test_no_repeat_while_fired() {
        let mut t = tracker();
        let fired = feed(&mut t, &[3; 20], Duration::from_secs(1));
        assert_eq!(fired, vec![10]);
    }

    #[test]
    fn test_second_alert_needs_break_and_full_window() {
        let mut t = tracker();
        let mut counts = vec![2; 11]; // 0..=10s → 告警
        counts.push(0); // 11s 中断
        counts.extend([2; 10]); // 12..=21s, 仅 9s
        counts.push(2); // 22s → 满 10s
        let fired = feed(&mut t, &counts, Duration::from_secs(1));
        assert_eq!(fired, vec![10, 22]);
    }

    #[test]
    fn test_exact_threshold_duration_fires() {
        let mut t = tracker();
        let fired = feed(&mut t, &[2, 2, 2], Duration::from_secs(5));
        assert_eq!(fired, vec![2]);
    }

    #[test]
    fn test_single_person_never_fires() {
        let mut t = tracker();
        assert!(feed(&mut t, &[1; 30], Duration::from_secs(1)).is_empty());
        assert_eq!(t.state(), PresenceState::Idle);
    }

    #[test]
    fn test_zone_requires_someone_behind_user() {
        let mut t = tracker().with_zone(BehindUserZone);
        let t0 = Instant::now();
        // 画面 300x300: 用户在下方, 第二人在中上方
        let user = Detection::person(Bbox::new(100., 180., 100., 100.), 0.9);
        let behind = Detection::person(Bbox::new(120., 20., 60., 80.), 0.8);
        let side = Detection::person(Bbox::new(0., 20., 60., 80.), 0.8);

        let outside = [user.clone(), side];
        assert!(t.observe_detections(&outside, 300, 300, t0).is_none());
        assert_eq!(t.state(), PresenceState::Idle);

        let inside = [user, behind];
        assert!(t.observe_detections(&inside, 300, 300, t0).is_none());
        let event = t.observe_detections(&inside, 300, 300, t0 + Duration::from_secs(10));
        assert_eq!(event.map(|e| e.person_count), Some(2));
    }
}
