//! 抽帧与结果缓存 (Sampling & Cache)
//!
//! 每 N 帧运行一次检测 (帧号 0, N, 2N, ...), 其余帧直接复用最近一次的结果。
//! 缓存只被采集线程持有, 无需加锁。

use std::sync::Arc;

use crate::detection::{Detection, ObjectDetector};
use crate::error::Result;
use crate::frame::Frame;

/// 最近一次检测结果 + 计算时的帧号
#[derive(Debug, Clone)]
pub struct DetectionCache {
    detections: Arc<[Detection]>,
    computed_at: Option<u64>,
}

impl Default for DetectionCache {
    fn default() -> Self {
        Self {
            detections: Arc::from(Vec::new()),
            computed_at: None,
        }
    }
}

impl DetectionCache {
    /// 首次检测完成前为空集合, 而不是"无缓存"
    pub fn detections(&self) -> &Arc<[Detection]> {
        &self.detections
    }

    pub fn computed_at(&self) -> Option<u64> {
        self.computed_at
    }

    fn store(&mut self, detections: Vec<Detection>, frame_index: u64) {
        self.detections = detections.into();
        self.computed_at = Some(frame_index);
    }
}

/// 本帧使用的检测结果
#[derive(Debug, Clone)]
pub struct Sampled {
    pub detections: Arc<[Detection]>,
    /// true: 本帧刚运行过检测; false: 复用缓存
    pub fresh: bool,
}

pub struct FrameSampler {
    every_n: u64,
    cache: DetectionCache,
}

impl FrameSampler {
    pub fn new(every_n: u64) -> Self {
        Self {
            every_n: every_n.max(1),
            cache: DetectionCache::default(),
        }
    }

    pub fn every_n(&self) -> u64 {
        self.every_n
    }

    pub fn cache(&self) -> &DetectionCache {
        &self.cache
    }

    pub fn should_run_detection(&self, frame_index: u64) -> bool {
        frame_index % self.every_n == 0
    }

    /// 到期帧运行检测并刷新缓存; 其余帧返回缓存。
    /// 检测失败时缓存保持不变, 错误交给调用方记录。
    pub fn get_or_update_detections<D>(
        &mut self,
        frame: &Frame,
        frame_index: u64,
        detector: &mut D,
    ) -> Result<Sampled>
    where
        D: ObjectDetector + ?Sized,
    {
        if !self.should_run_detection(frame_index) {
            return Ok(Sampled {
                detections: Arc::clone(self.cache.detections()),
                fresh: false,
            });
        }

        let detections = detector.detect(frame)?;
        self.cache.store(detections, frame_index);
        Ok(Sampled {
            detections: Arc::clone(self.cache.detections()),
            fresh: true,
        })
    }
}
