/// FFmpeg采集过滤器模块
/// FFmpeg capture filter module
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender, TrySendError};
use ez_ffmpeg::filter::frame_filter::FrameFilter;
use ez_ffmpeg::filter::frame_filter_context::FrameFilterContext;
use ez_ffmpeg::{AVMediaType, Frame as AvFrame};
use tracing::{debug, info, warn};

use crate::frame::Frame;

/// FFmpeg采集过滤器: 摄像头 YUV420P → RGB 帧 → 采集线程
///
/// 通道容量很小且只保留最新帧: 满时先丢弃最旧一帧再放入
#[derive(Clone)]
pub struct CaptureFilter {
    tx: Sender<Frame>,
    drain: Receiver<Frame>,
    stop: Arc<AtomicBool>,
    pub total_frames: usize,
    pub dropped_frames: usize,
}

impl CaptureFilter {
    pub fn new(tx: Sender<Frame>, drain: Receiver<Frame>, stop: Arc<AtomicBool>) -> Self {
        Self {
            tx,
            drain,
            stop,
            total_frames: 0,
            dropped_frames: 0,
        }
    }

    fn push_latest(&mut self, frame: Frame) {
        let mut frame = frame;
        for _ in 0..2 {
            match self.tx.try_send(frame) {
                Ok(()) => return,
                Err(TrySendError::Full(f)) => {
                    let _ = self.drain.try_recv();
                    frame = f;
                }
                Err(TrySendError::Disconnected(_)) => return,
            }
        }
    }
}

impl FrameFilter for CaptureFilter {
    fn media_type(&self) -> AVMediaType {
        AVMediaType::AVMEDIA_TYPE_VIDEO
    }

    fn init(&mut self, _ctx: &FrameFilterContext) -> Result<(), String> {
        info!("✅ 摄像头解码线程启动");
        Ok(())
    }

    fn filter_frame(
        &mut self,
        frame: AvFrame,
        _ctx: &FrameFilterContext,
    ) -> Result<Option<AvFrame>, String> {
        // 采集端关闭: 返回错误让 FFmpeg 结束解码并释放设备
        if self.stop.load(Ordering::Acquire) {
            return Err("capture stopped".to_string());
        }

        unsafe {
            self.total_frames += 1;

            if frame.as_ptr().is_null() || frame.is_empty() || frame.is_corrupt() {
                self.dropped_frames += 1;
                debug!("⚠️ 丢弃帧 #{}: 空帧/损坏帧", self.total_frames);
                return Ok(None);
            }

            let w = (*frame.as_ptr()).width as u32;
            let h = (*frame.as_ptr()).height as u32;
            if w == 0 || h == 0 || w > 4096 || h > 4096 {
                self.dropped_frames += 1;
                debug!("⚠️ 丢弃帧 #{}: 非法分辨率 {}x{}", self.total_frames, w, h);
                return Ok(None);
            }

            // YUV420P数据指针 (输入端已经加了 format=yuv420p 滤镜)
            let y_plane = (*frame.as_ptr()).data[0];
            let u_plane = (*frame.as_ptr()).data[1];
            let v_plane = (*frame.as_ptr()).data[2];
            let y_stride = (*frame.as_ptr()).linesize[0] as usize;
            let uv_stride = (*frame.as_ptr()).linesize[1] as usize;

            if y_plane.is_null() || u_plane.is_null() || v_plane.is_null() {
                self.dropped_frames += 1;
                debug!("⚠️ 丢弃帧 #{}: YUV指针为空", self.total_frames);
                return Ok(None);
            }
            if y_stride < w as usize || uv_stride < (w as usize).div_ceil(2) {
                self.dropped_frames += 1;
                warn!(
                    "⚠️ 丢弃帧 #{}: 步长异常 y_stride={} uv_stride={}",
                    self.total_frames, y_stride, uv_stride
                );
                return Ok(None);
            }

            let mut rgb = vec![0u8; w as usize * h as usize * 3];
            yuv420p_to_rgb(
                y_plane, u_plane, v_plane, y_stride, uv_stride, &mut rgb, w as usize, h as usize,
            );
            self.push_latest(Frame::rgb(w, h, rgb, Instant::now()));
        }

        Ok(Some(frame))
    }

    fn uninit(&mut self, _ctx: &FrameFilterContext) {
        info!(
            "✅ 摄像头解码线程退出 (总帧{} | 丢弃{})",
            self.total_frames, self.dropped_frames
        );
    }
}

/// YUV420P → RGB (BT.601, 定点运算)
///
/// # Safety
/// 三个平面指针必须覆盖 `height` 行, 步长不小于对应平面宽度
#[inline]
unsafe fn yuv420p_to_rgb(
    y_plane: *const u8,
    u_plane: *const u8,
    v_plane: *const u8,
    y_stride: usize,
    uv_stride: usize,
    buffer: &mut [u8],
    width: usize,
    height: usize,
) {
    let mut out_idx = 0;
    for y in 0..height {
        let y_row = y * y_stride;
        let uv_row = (y >> 1) * uv_stride;

        for x in 0..width {
            let y_val = *y_plane.add(y_row + x) as i32;
            let u_val = *u_plane.add(uv_row + (x >> 1)) as i32 - 128;
            let v_val = *v_plane.add(uv_row + (x >> 1)) as i32 - 128;
            let (r, g, b) = yuv_to_rgb(y_val, u_val, v_val);
            buffer[out_idx] = r;
            buffer[out_idx + 1] = g;
            buffer[out_idx + 2] = b;
            out_idx += 3;
        }
    }
}

/// u/v 已减去 128
#[inline]
fn yuv_to_rgb(y: i32, u: i32, v: i32) -> (u8, u8, u8) {
    (
        (y + ((v * 179) >> 7)).clamp(0, 255) as u8,
        (y - ((u * 44) >> 7) - ((v * 91) >> 7)).clamp(0, 255) as u8,
        (y + ((u * 227) >> 7)).clamp(0, 255) as u8,
    )
}
