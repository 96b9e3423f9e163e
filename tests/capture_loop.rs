use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use sentinel_rs::pipeline::{alert_channel, display_channel};
use sentinel_rs::{
    Bbox, CaptureLoop, Detection, Frame, FrameSource, ObjectDetector, PipelineConfig, Result,
    SentinelError,
};

/// 无限产生 8x8 帧; 可在第 `lose_after` 帧后丢失一次设备
struct SyntheticCamera {
    opens: Arc<AtomicUsize>,
    fail_open: bool,
    served: u64,
    lose_after: Option<u64>,
}

impl SyntheticCamera {
    fn new(opens: Arc<AtomicUsize>) -> Self {
        Self {
            opens,
            fail_open: false,
            served: 0,
            lose_after: None,
        }
    }
}

impl FrameSource for SyntheticCamera {
    fn open(&mut self) -> Result<()> {
        if self.fail_open {
            return Err(SentinelError::SourceUnavailable("no device".into()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame> {
        if self.lose_after == Some(self.served) {
            self.lose_after = None;
            return Err(SentinelError::SourceUnavailable("unplugged".into()));
        }
        self.served += 1;
        Ok(Frame::filled(8, 8, [40, 40, 40], Instant::now()))
    }

    fn close(&mut self) {}

    fn name(&self) -> String {
        "synthetic".into()
    }
}

/// 每次返回两个人
struct TwoPeople {
    calls: Arc<AtomicUsize>,
}

impl ObjectDetector for TwoPeople {
    fn detect(&mut self, _frame: &Frame) -> Result<Vec<Detection>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![
            Detection::person(Bbox::new(0., 0., 4., 4.), 0.9),
            Detection::person(Bbox::new(4., 4., 4., 4.), 0.8),
        ])
    }
}

fn fast_config() -> PipelineConfig {
    PipelineConfig {
        target_fps: 200.0,
        sustained_presence_seconds: 0.05,
        retry_backoff_initial_ms: 5,
        retry_backoff_max_ms: 20,
        ..PipelineConfig::default()
    }
}

#[test]
fn test_spawn_publish_and_stop() {
    let config = fast_config();
    let opens = Arc::new(AtomicUsize::new(0));
    let calls = Arc::new(AtomicUsize::new(0));
    let (display, frames) = display_channel(config.display_queue_capacity);
    let (alert_sink, alerts) = alert_channel(config.alert_queue_capacity);

    let handle = CaptureLoop::new(
        SyntheticCamera::new(Arc::clone(&opens)),
        TwoPeople {
            calls: Arc::clone(&calls),
        },
        &config,
        Box::new(display),
        Box::new(alert_sink),
    )
    .spawn()
    .unwrap();
    assert_eq!(opens.load(Ordering::SeqCst), 1);

    let first = frames.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(first.frame.width(), 8);

    let alert = alerts.recv_timeout(Duration::from_secs(2)).unwrap();
    assert_eq!(alert.kind.as_str(), "sustained-presence");
    assert_eq!(alert.person_count, 2);

    assert!(handle.is_running());
    let stats = handle.stop();

    assert!(stats.frames_captured >= 1);
    assert!(stats.frames_sampled >= 2);
    assert_eq!(stats.alerts_emitted, 1);
    assert_eq!(stats.detector_failures, 0);
    // 检测只在每5帧运行一次
    let expected = stats.frames_captured.div_ceil(config.sample_every_n_frames);
    assert_eq!(calls.load(Ordering::SeqCst) as u64, expected);
}

#[test]
fn test_startup_failure_surfaces() {
    let config = fast_config();
    let mut camera = SyntheticCamera::new(Arc::new(AtomicUsize::new(0)));
    camera.fail_open = true;
    let (display, _frames) = display_channel(1);
    let (alert_sink, _alerts) = alert_channel(1);

    let result = CaptureLoop::new(
        camera,
        TwoPeople {
            calls: Arc::new(AtomicUsize::new(0)),
        },
        &config,
        Box::new(display),
        Box::new(alert_sink),
    )
    .spawn();
    assert!(matches!(result, Err(SentinelError::SourceUnavailable(_))));
}

#[test]
fn test_reconnects_after_device_loss() {
    let config = fast_config();
    let opens = Arc::new(AtomicUsize::new(0));
    let mut camera = SyntheticCamera::new(Arc::clone(&opens));
    camera.lose_after = Some(3);
    let (display, frames) = display_channel(config.display_queue_capacity);
    let (alert_sink, _alerts) = alert_channel(config.alert_queue_capacity);

    let handle = CaptureLoop::new(
        camera,
        TwoPeople {
            calls: Arc::new(AtomicUsize::new(0)),
        },
        &config,
        Box::new(display),
        Box::new(alert_sink),
    )
    .spawn()
    .unwrap();

    // 设备丢失后仍持续产出帧
    let deadline = Instant::now() + Duration::from_secs(2);
    while opens.load(Ordering::SeqCst) < 2 && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert_eq!(opens.load(Ordering::SeqCst), 2);
    let mut last = 0;
    while let Ok(frame) = frames.recv_timeout(Duration::from_millis(500)) {
        last = frame.index;
        if last > 5 {
            break;
        }
    }
    assert!(last > 5);

    let stats = handle.stop();
    assert_eq!(stats.read_failures, 1);
}
