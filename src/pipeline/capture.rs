//! 采集循环 (Capture Loop)
//!
//! 独立线程独占帧源、检测器、缓存与状态机:
//! 读帧 → 抽帧检测/复用缓存 → 在场状态机 → 绘制 → 投递显示帧/告警
//!
//! 单帧错误只记录日志并跳过, 循环只在收到停止信号后退出。

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::annotate::draw_detections;
use super::sink::{AlertSink, DisplaySink};
use super::DisplayFrame;
use crate::config::PipelineConfig;
use crate::detection::{FrameSampler, ObjectDetector, Sampled};
use crate::error::Result;
use crate::frame::Frame;
use crate::input::FrameSource;
use crate::presence::{PresenceState, PresenceTracker};

/// 等待期间检查停止信号的间隔
const STOP_POLL: Duration = Duration::from_millis(20);

/// 运行统计 (停止时返回)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoopStats {
    pub frames_captured: u64,
    pub frames_sampled: u64,
    pub read_failures: u64,
    pub detector_failures: u64,
    pub alerts_emitted: u64,
    pub display_dropped: u64,
    /// 迭代内 panic (检测器以外) 的次数
    pub iteration_faults: u64,
}

/// 单次迭代的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// 帧已投递; `fresh` 表示本帧运行过检测
    Published { index: u64, fresh: bool },
    /// 读帧失败 (瞬时), 本次跳过
    ReadFailed,
    /// 帧源丢失, 需要重连
    SourceLost,
    /// 迭代内 panic, 本次跳过
    Faulted,
}

/// 重连退避: 从初始值开始翻倍, 不超过上限
#[derive(Debug, Clone)]
pub(crate) struct Backoff {
    initial: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    pub(crate) fn new(initial: Duration, max: Duration) -> Self {
        let initial = initial.min(max);
        Self {
            initial,
            max,
            current: initial,
        }
    }

    pub(crate) fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = (self.current * 2).min(self.max);
        delay
    }

    pub(crate) fn reset(&mut self) {
        self.current = self.initial;
    }
}

/// 每秒统计窗口
struct Window {
    start: Instant,
    frames: u64,
    samples: u64,
    infer_ms: f64,
}

impl Window {
    fn new() -> Self {
        Self {
            start: Instant::now(),
            frames: 0,
            samples: 0,
            infer_ms: 0.0,
        }
    }
}

pub struct CaptureLoop<S: FrameSource, D: ObjectDetector> {
    source: S,
    detector: D,
    sampler: FrameSampler,
    tracker: PresenceTracker,
    display: Box<dyn DisplaySink>,
    alerts: Box<dyn AlertSink>,
    frame_period: Duration,
    backoff: Backoff,
    next_index: u64,
    stats: LoopStats,
    window: Window,
}

impl<S: FrameSource, D: ObjectDetector> CaptureLoop<S, D> {
    pub fn new(
        source: S,
        detector: D,
        config: &PipelineConfig,
        display: Box<dyn DisplaySink>,
        alerts: Box<dyn AlertSink>,
    ) -> Self {
        Self {
            source,
            detector,
            sampler: FrameSampler::new(config.sample_every_n_frames),
            tracker: PresenceTracker::from_config(config),
            display,
            alerts,
            frame_period: config.frame_period(),
            backoff: Backoff::new(
                Duration::from_millis(config.retry_backoff_initial_ms),
                Duration::from_millis(config.retry_backoff_max_ms),
            ),
            next_index: 0,
            stats: LoopStats::default(),
            window: Window::new(),
        }
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    pub fn presence_state(&self) -> PresenceState {
        self.tracker.state()
    }

    /// 下一帧的帧号 (= 已成功读取的帧数)
    pub fn next_index(&self) -> u64 {
        self.next_index
    }

    /// 执行一次迭代: 读一帧并完成全部处理; 迭代内的 panic 被捕获并记录
    pub fn tick(&mut self) -> TickOutcome {
        match panic::catch_unwind(AssertUnwindSafe(|| self.process_next())) {
            Ok(outcome) => outcome,
            Err(payload) => {
                self.stats.iteration_faults += 1;
                error!("❌ 采集迭代 panic, 跳过: {}", panic_message(&*payload));
                TickOutcome::Faulted
            }
        }
    }

    fn process_next(&mut self) -> TickOutcome {
        let frame = match self.source.read_frame() {
            Ok(frame) => frame,
            Err(e) if e.is_transient() => {
                self.stats.read_failures += 1;
                warn!("⚠️ 读帧失败, 跳过: {}", e);
                return TickOutcome::ReadFailed;
            }
            // 其余错误 (设备丢失, IO) 都需要重新打开帧源
            Err(e) => {
                self.stats.read_failures += 1;
                warn!("🔌 帧源不可用: {}", e);
                return TickOutcome::SourceLost;
            }
        };

        let index = self.next_index;
        self.next_index += 1;
        self.stats.frames_captured += 1;
        self.window.frames += 1;

        let display = match self.sample(&frame, index) {
            Some(sampled) => {
                if sampled.fresh {
                    self.stats.frames_sampled += 1;
                    let alert = self.tracker.observe_detections(
                        &sampled.detections,
                        frame.width(),
                        frame.height(),
                        frame.timestamp(),
                    );
                    if let Some(event) = alert {
                        self.stats.alerts_emitted += 1;
                        self.alerts.publish(event);
                    }
                }
                DisplayFrame {
                    index,
                    frame: draw_detections(&frame, &sampled.detections),
                    person_count: sampled.detections.len(),
                    detections: sampled.detections,
                    fresh: sampled.fresh,
                }
            }
            // 检测失败: 不绘制, 照常投递原帧
            None => DisplayFrame {
                index,
                frame,
                detections: Arc::from(Vec::new()),
                person_count: 0,
                fresh: false,
            },
        };

        let fresh = display.fresh;
        self.display.publish(display);
        TickOutcome::Published { index, fresh }
    }

    /// 抽帧检测; 检测器出错或 panic 时返回 None, 缓存与状态机保持不变
    fn sample(&mut self, frame: &Frame, index: u64) -> Option<Sampled> {
        let due = self.sampler.should_run_detection(index);
        let start = Instant::now();

        let sampler = &mut self.sampler;
        let detector = &mut self.detector;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            sampler.get_or_update_detections(frame, index, detector)
        }));

        if due {
            self.window.samples += 1;
            self.window.infer_ms += start.elapsed().as_secs_f64() * 1000.0;
        }

        match result {
            Ok(Ok(sampled)) => Some(sampled),
            Ok(Err(e)) => {
                self.stats.detector_failures += 1;
                if e.is_transient() {
                    warn!("⚠️ 帧 #{} 检测失败, 跳过绘制: {}", index, e);
                } else {
                    error!("❌ 帧 #{} 检测器错误: {}", index, e);
                }
                None
            }
            Err(payload) => {
                self.stats.detector_failures += 1;
                error!("❌ 帧 #{} 检测器 panic: {}", index, panic_message(&*payload));
                None
            }
        }
    }

    fn log_window(&mut self) {
        let elapsed = self.window.start.elapsed().as_secs_f64();
        if elapsed < 1.0 {
            return;
        }
        let fps = self.window.frames as f64 / elapsed;
        let infer_ms = if self.window.samples > 0 {
            self.window.infer_ms / self.window.samples as f64
        } else {
            0.0
        };
        info!(
            "📊 采集 {:.1} fps | 检测 {:.1}ms x{} | 在场 {:?} | 显示丢帧 {}",
            fps,
            infer_ms,
            self.window.samples,
            self.tracker.state(),
            self.display.dropped()
        );
        self.window = Window::new();
    }

    /// 关闭帧源并按退避间隔重连, 直到成功或收到停止信号
    fn reconnect(&mut self, stop: &AtomicBool) {
        self.source.close();
        while !stop.load(Ordering::Acquire) {
            let delay = self.backoff.next_delay();
            warn!("🔄 {:?} 后重连 {}", delay, self.source.name());
            if !sleep_unless_stopped(delay, stop) {
                return;
            }
            match self.source.open() {
                Ok(()) => {
                    info!("✅ 帧源重连成功: {}", self.source.name());
                    self.backoff.reset();
                    return;
                }
                Err(e) => warn!("❌ 重连失败: {}", e),
            }
        }
    }

    fn run(mut self, stop: Arc<AtomicBool>) -> LoopStats {
        info!(
            "🎥 采集循环启动: {} | 每{}帧检测 | 目标 {:.1}ms/帧",
            self.source.name(),
            self.sampler.every_n(),
            self.frame_period.as_secs_f64() * 1000.0
        );
        self.window = Window::new();

        while !stop.load(Ordering::Acquire) {
            let started = Instant::now();

            if self.tick() == TickOutcome::SourceLost {
                self.reconnect(&stop);
                continue;
            }
            self.log_window();

            // 推理超时则直接进入下一帧, 不追赶
            if let Some(rest) = self.frame_period.checked_sub(started.elapsed()) {
                sleep_unless_stopped(rest, &stop);
            }
        }

        self.source.close();
        self.stats.display_dropped = self.display.dropped();
        info!("🛑 采集循环退出: {:?}", self.stats);
        self.stats
    }
}

impl<S, D> CaptureLoop<S, D>
where
    S: FrameSource + 'static,
    D: ObjectDetector + 'static,
{
    /// 在调用线程打开帧源 (失败即返回), 然后移交采集线程
    pub fn spawn(mut self) -> Result<CaptureHandle> {
        self.source.open()?;
        debug!("帧源已打开: {}", self.source.name());

        let stop = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("sentinel-capture".into())
            .spawn(move || self.run(flag))?;

        Ok(CaptureHandle {
            stop,
            thread: Some(thread),
        })
    }
}

/// 采集线程句柄; 丢弃时发出停止信号 (不等待)
pub struct CaptureHandle {
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<LoopStats>>,
}

impl CaptureHandle {
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// 发出停止信号并等待当前迭代结束
    pub fn stop(mut self) -> LoopStats {
        self.stop.store(true, Ordering::Release);
        match self.thread.take().map(JoinHandle::join) {
            Some(Ok(stats)) => stats,
            Some(Err(payload)) => {
                error!("❌ 采集线程异常退出: {}", panic_message(&*payload));
                LoopStats::default()
            }
            None => LoopStats::default(),
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
    }
}

/// 分段睡眠; 期间收到停止信号返回 false
fn sleep_unless_stopped(duration: Duration, stop: &AtomicBool) -> bool {
    // 超出时钟范围时一直等到停止信号
    let deadline = Instant::now().checked_add(duration);
    loop {
        if stop.load(Ordering::Acquire) {
            return false;
        }
        let now = Instant::now();
        let rest = match deadline {
            Some(d) if now >= d => return true,
            Some(d) => d - now,
            None => STOP_POLL,
        };
        thread::sleep(rest.min(STOP_POLL));
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{Bbox, Detection};
    use crate::error::SentinelError;
    use crate::pipeline::sink::{alert_channel, display_channel};
    use crossbeam_channel::Receiver;
    use std::collections::VecDeque;

    /// 按脚本返回读帧结果; 帧宽度编码为脚本序号+1, 时间戳按固定间隔递增
    struct ScriptedSource {
        script: VecDeque<Result<()>>,
        t0: Instant,
        step: Duration,
        served: u32,
    }

    impl ScriptedSource {
        fn frames(n: usize, step: Duration) -> Self {
            Self::with_script((0..n).map(|_| Ok(())).collect(), step)
        }

        fn with_script(script: VecDeque<Result<()>>, step: Duration) -> Self {
            Self {
                script,
                t0: Instant::now(),
                step,
                served: 0,
            }
        }
    }

    impl FrameSource for ScriptedSource {
        fn open(&mut self) -> Result<()> {
            Ok(())
        }

        fn read_frame(&mut self) -> Result<Frame> {
            match self.script.pop_front() {
                Some(Ok(())) => {
                    let ts = self.t0 + self.step * self.served;
                    self.served += 1;
                    Ok(Frame::filled(self.served, 4, [0, 0, 0], ts))
                }
                Some(Err(e)) => Err(e),
                None => Err(SentinelError::SourceUnavailable("script exhausted".into())),
            }
        }

        fn close(&mut self) {}

        fn name(&self) -> String {
            "scripted".into()
        }
    }

    /// 记录被检测的帧号; 可在指定帧号失败或 panic
    struct ScriptedDetector {
        seen: Vec<u64>,
        persons: usize,
        fail_at: Option<u64>,
        panic_at: Option<u64>,
    }

    impl ScriptedDetector {
        fn new(persons: usize) -> Self {
            Self {
                seen: Vec::new(),
                persons,
                fail_at: None,
                panic_at: None,
            }
        }
    }

    impl ObjectDetector for ScriptedDetector {
        fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
            let index = frame.width() as u64 - 1;
            self.seen.push(index);
            if self.panic_at == Some(index) {
                panic!("model exploded at {index}");
            }
            if self.fail_at == Some(index) {
                return Err(SentinelError::DetectorInput("bad frame".into()));
            }
            Ok((0..self.persons)
                .map(|_| Detection::person(Bbox::new(0., 0., 1., 1.), 0.9))
                .collect())
        }
    }

    struct Harness {
        capture: CaptureLoop<ScriptedSource, ScriptedDetector>,
        frames: Receiver<DisplayFrame>,
        alerts: Receiver<crate::presence::AlertEvent>,
    }

    fn harness(source: ScriptedSource, detector: ScriptedDetector) -> Harness {
        let config = PipelineConfig {
            display_queue_capacity: 64,
            ..PipelineConfig::default()
        };
        let (display, frames) = display_channel(config.display_queue_capacity);
        let (alert_sink, alerts) = alert_channel(config.alert_queue_capacity);
        let capture = CaptureLoop::new(
            source,
            detector,
            &config,
            Box::new(display),
            Box::new(alert_sink),
        );
        Harness {
            capture,
            frames,
            alerts,
        }
    }

    #[test]
    fn test_detector_input_error_is_skipped() {
        let mut detector = ScriptedDetector::new(1);
        detector.fail_at = Some(10);
        let mut h = harness(ScriptedSource::frames(20, Duration::from_millis(33)), detector);

        for _ in 0..20 {
            assert!(matches!(h.capture.tick(), TickOutcome::Published { .. }));
        }

        assert_eq!(h.capture.detector.seen, vec![0, 5, 10, 15]);
        assert_eq!(h.capture.stats().detector_failures, 1);
        assert_eq!(h.capture.stats().frames_sampled, 3);

        let frames: Vec<DisplayFrame> = h.frames.try_iter().collect();
        assert_eq!(frames.len(), 20);
        // 失败帧原样投递, 之后的跳过帧仍复用帧5的缓存
        assert_eq!(frames[10].person_count, 0);
        assert!(!frames[10].fresh);
        assert_eq!(frames[11].person_count, 1);
        assert!(frames[15].fresh);
    }

    #[test]
    fn test_detector_panic_is_caught() {
        let mut detector = ScriptedDetector::new(0);
        detector.panic_at = Some(5);
        let mut h = harness(ScriptedSource::frames(11, Duration::from_millis(33)), detector);

        for _ in 0..11 {
            h.capture.tick();
        }
        assert_eq!(h.capture.detector.seen, vec![0, 5, 10]);
        assert_eq!(h.capture.stats().detector_failures, 1);
        assert_eq!(h.frames.try_iter().count(), 11);
    }

    #[test]
    fn test_read_failure_does_not_advance_index() {
        let script: VecDeque<Result<()>> = vec![
            Ok(()),
            Err(SentinelError::FrameRead("timeout".into())),
            Ok(()),
        ]
        .into();
        let mut h = harness(
            ScriptedSource::with_script(script, Duration::from_millis(33)),
            ScriptedDetector::new(0),
        );

        assert_eq!(h.capture.tick(), TickOutcome::Published { index: 0, fresh: true });
        assert_eq!(h.capture.tick(), TickOutcome::ReadFailed);
        assert_eq!(h.capture.tick(), TickOutcome::Published { index: 1, fresh: false });
        assert_eq!(h.capture.tick(), TickOutcome::SourceLost);
        assert_eq!(h.capture.stats().read_failures, 2);
        assert_eq!(h.capture.next_index(), 2);
    }

    #[test]
    fn test_sustained_presence_emits_one_alert() {
        // 两人持续出现, 每帧 1s, 每5帧检测: 采样时刻 0,5,10,15s
        let mut h = harness(
            ScriptedSource::frames(16, Duration::from_secs(1)),
            ScriptedDetector::new(2),
        );
        for _ in 0..16 {
            h.capture.tick();
        }

        let alerts: Vec<_> = h.alerts.try_iter().collect();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].person_count, 2);
        assert_eq!(alerts[0].streak, Duration::from_secs(10));
        assert_eq!(h.capture.stats().alerts_emitted, 1);
        assert_eq!(h.capture.presence_state(), PresenceState::Fired);
    }

    #[test]
    fn test_skipped_frames_do_not_advance_tracker() {
        // 只有一次采样满足条件, 跳过帧不推进状态机
        let mut h = harness(
            ScriptedSource::frames(5, Duration::from_secs(5)),
            ScriptedDetector::new(2),
        );
        for _ in 0..5 {
            h.capture.tick();
        }
        assert!(h.alerts.try_recv().is_err());
        assert!(matches!(
            h.capture.presence_state(),
            PresenceState::Accumulating { .. }
        ));
    }

    /// 在指定帧号 panic 的显示端
    struct FragileDisplay {
        panic_at: u64,
        published: Arc<std::sync::Mutex<Vec<u64>>>,
    }

    impl DisplaySink for FragileDisplay {
        fn publish(&self, frame: DisplayFrame) {
            if frame.index == self.panic_at {
                panic!("display exploded at {}", frame.index);
            }
            if let Ok(mut published) = self.published.lock() {
                published.push(frame.index);
            }
        }
    }

    #[test]
    fn test_sink_panic_does_not_end_loop() {
        let published = Arc::new(std::sync::Mutex::new(Vec::new()));
        let (alert_sink, _alerts) = alert_channel(4);
        let mut capture = CaptureLoop::new(
            ScriptedSource::frames(3, Duration::from_millis(33)),
            ScriptedDetector::new(1),
            &PipelineConfig::default(),
            Box::new(FragileDisplay {
                panic_at: 1,
                published: Arc::clone(&published),
            }),
            Box::new(alert_sink),
        );

        assert!(matches!(capture.tick(), TickOutcome::Published { index: 0, .. }));
        assert_eq!(capture.tick(), TickOutcome::Faulted);
        assert_eq!(capture.tick(), TickOutcome::Published { index: 2, fresh: false });
        assert_eq!(capture.stats().iteration_faults, 1);
        assert_eq!(*published.lock().unwrap(), vec![0, 2]);
    }

    #[test]
    fn test_io_error_means_source_lost() {
        let script: VecDeque<Result<()>> = vec![Err(SentinelError::Io(std::io::Error::new(
            std::io::ErrorKind::BrokenPipe,
            "device gone",
        )))]
        .into();
        let mut h = harness(
            ScriptedSource::with_script(script, Duration::from_millis(33)),
            ScriptedDetector::new(0),
        );
        assert_eq!(h.capture.tick(), TickOutcome::SourceLost);
        assert_eq!(h.capture.next_index(), 0);
    }

    #[test]
    fn test_backoff_doubles_to_cap() {
        let mut b = Backoff::new(Duration::from_millis(100), Duration::from_millis(500));
        let delays: Vec<u64> = (0..5).map(|_| b.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![100, 200, 400, 500, 500]);
        b.reset();
        assert_eq!(b.next_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_sleep_unless_stopped_returns_early() {
        let stop = AtomicBool::new(true);
        let start = Instant::now();
        assert!(!sleep_unless_stopped(Duration::from_secs(5), &stop));
        assert!(!sleep_unless_stopped(Duration::MAX, &stop));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
