//! 图片目录回放源
//!
//! 按文件名排序循环播放目录中的图片, 每次 `read_frame` 解码一张。

use std::path::{Path, PathBuf};
use std::time::Instant;

use tracing::info;

use super::FrameSource;
use crate::error::{Result, SentinelError};
use crate::frame::Frame;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp"];

pub struct ReplaySource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    pos: usize,
    looping: bool,
    opened: bool,
}

impl ReplaySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            files: Vec::new(),
            pos: 0,
            looping: true,
            opened: false,
        }
    }

    /// 播放一遍后不再循环, 之后的读取视为设备丢失
    pub fn once(mut self) -> Self {
        self.looping = false;
        self
    }

    fn scan(dir: &Path) -> Result<Vec<PathBuf>> {
        let entries = std::fs::read_dir(dir).map_err(|e| {
            SentinelError::SourceUnavailable(format!("cannot read {}: {}", dir.display(), e))
        })?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .map(|ext| ext.to_string_lossy().to_lowercase())
                    .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.as_str()))
            })
            .collect();
        files.sort();
        Ok(files)
    }
}

impl FrameSource for ReplaySource {
    fn open(&mut self) -> Result<()> {
        let files = Self::scan(&self.dir)?;
        if files.is_empty() {
            return Err(SentinelError::SourceUnavailable(format!(
                "no images in {}",
                self.dir.display()
            )));
        }
        info!("📂 回放源: {} ({}张)", self.dir.display(), files.len());
        self.files = files;
        self.pos = 0;
        self.opened = true;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<Frame> {
        if !self.opened {
            return Err(SentinelError::SourceUnavailable("replay source is closed".into()));
        }
        if self.pos >= self.files.len() {
            if !self.looping {
                return Err(SentinelError::SourceUnavailable("replay finished".into()));
            }
            self.pos = 0;
        }

        let path = &self.files[self.pos];
        self.pos += 1;
        let img = image::open(path)
            .map_err(|e| SentinelError::FrameRead(format!("{}: {}", path.display(), e)))?;
        Ok(Frame::from_image(img.to_rgb8(), Instant::now()))
    }

    fn close(&mut self) {
        self.opened = false;
    }

    fn name(&self) -> String {
        format!("replay:{}", self.dir.display())
    }
}
