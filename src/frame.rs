//! 视频帧 (Frame)
//!
//! 不可变像素缓冲,`Arc` 共享: 采集线程与消费线程之间只传递只读视图,
//! 从不共享可变缓冲。

use std::sync::Arc;
use std::time::Instant;

use image::RgbImage;

use crate::error::{Result, SentinelError};

pub const RGB_CHANNELS: u8 = 3;

#[derive(Clone)]
pub struct Frame {
    width: u32,
    height: u32,
    channels: u8,
    data: Arc<[u8]>,
    timestamp: Instant, // 采集时刻 (单调时钟)
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("channels", &self.channels)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl Frame {
    /// 原始缓冲,不做校验 (校验由检测器负责)
    pub fn from_raw(
        width: u32,
        height: u32,
        channels: u8,
        data: impl Into<Arc<[u8]>>,
        timestamp: Instant,
    ) -> Self {
        Self {
            width,
            height,
            channels,
            data: data.into(),
            timestamp,
        }
    }

    pub fn rgb(width: u32, height: u32, data: impl Into<Arc<[u8]>>, timestamp: Instant) -> Self {
        Self::from_raw(width, height, RGB_CHANNELS, data, timestamp)
    }

    pub fn from_image(img: RgbImage, timestamp: Instant) -> Self {
        let (width, height) = img.dimensions();
        Self::rgb(width, height, img.into_raw(), timestamp)
    }

    /// 纯色帧 (测试与占位画面)
    pub fn filled(width: u32, height: u32, rgb: [u8; 3], timestamp: Instant) -> Self {
        let data: Vec<u8> = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self::rgb(width, height, data, timestamp)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// 两帧是否共享同一块像素缓冲
    pub fn shares_buffer(&self, other: &Frame) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }

    /// 检查是否为合法的 RGB8 帧
    pub fn validate_rgb(&self) -> Result<()> {
        if self.channels != RGB_CHANNELS {
            return Err(SentinelError::DetectorInput(format!(
                "expected {} channels, got {}",
                RGB_CHANNELS, self.channels
            )));
        }
        if self.width == 0 || self.height == 0 {
            return Err(SentinelError::DetectorInput(format!(
                "empty frame {}x{}",
                self.width, self.height
            )));
        }
        let expected = self.width as usize * self.height as usize * RGB_CHANNELS as usize;
        if self.data.len() != expected {
            return Err(SentinelError::DetectorInput(format!(
                "buffer size {} does not match {}x{}x{} = {}",
                self.data.len(),
                self.width,
                self.height,
                RGB_CHANNELS,
                expected
            )));
        }
        Ok(())
    }

    /// 拷贝为可绘制的 RgbImage
    pub fn to_rgb_image(&self) -> Option<RgbImage> {
        self.validate_rgb().ok()?;
        RgbImage::from_raw(self.width, self.height, self.data.to_vec())
    }
}
