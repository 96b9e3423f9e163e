//! 检测框绘制

use image::Rgb;
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;

use crate::detection::Detection;
use crate::frame::Frame;

const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BOX_THICKNESS: i32 = 2;

/// 在帧上绘制检测框, 返回新帧 (原帧不变)
///
/// 没有检测结果或帧格式不是 RGB8 时直接返回原帧 (共享像素缓冲)
pub fn draw_detections(frame: &Frame, detections: &[Detection]) -> Frame {
    if detections.is_empty() {
        return frame.clone();
    }
    let mut img = match frame.to_rgb_image() {
        Some(img) => img,
        None => return frame.clone(),
    };

    let (w, h) = (frame.width() as f32, frame.height() as f32);
    for det in detections {
        let bbox = det.bbox.clamp_to(w, h);
        for t in 0..BOX_THICKNESS {
            let x = bbox.xmin().round() as i32 + t;
            let y = bbox.ymin().round() as i32 + t;
            let bw = bbox.width().round() as i32 - 2 * t;
            let bh = bbox.height().round() as i32 - 2 * t;
            if bw < 1 || bh < 1 {
                break;
            }
            draw_hollow_rect_mut(&mut img, Rect::at(x, y).of_size(bw as u32, bh as u32), BOX_COLOR);
        }
    }

    Frame::from_image(img, frame.timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::Bbox;
    use std::time::Instant;

    #[test]
    fn test_no_detections_keeps_frame() {
        let frame = Frame::filled(16, 12, [10, 20, 30], Instant::now());
        let out = draw_detections(&frame, &[]);
        assert!(out.shares_buffer(&frame));
        assert_eq!(out.data(), frame.data());
        assert_eq!(out.timestamp(), frame.timestamp());
    }

    #[test]
    fn test_draws_box_outline() {
        let frame = Frame::filled(20, 20, [0, 0, 0], Instant::now());
        let det = Detection::person(Bbox::new(5., 5., 10., 10.), 0.9);
        let out = draw_detections(&frame, &[det]);

        let img = out.to_rgb_image().unwrap();
        assert_eq!(*img.get_pixel(5, 5), BOX_COLOR);
        assert_eq!(*img.get_pixel(6, 6), BOX_COLOR);
        assert_eq!(*img.get_pixel(10, 10), Rgb([0, 0, 0]));
        // 原帧未被修改
        assert!(frame.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_box_outside_frame_is_clamped() {
        let frame = Frame::filled(10, 10, [0, 0, 0], Instant::now());
        let det = Detection::person(Bbox::new(-5., -5., 100., 100.), 0.9);
        let out = draw_detections(&frame, &[det]);
        assert_eq!((out.width(), out.height()), (10, 10));
        let img = out.to_rgb_image().unwrap();
        assert_eq!(*img.get_pixel(0, 0), BOX_COLOR);
    }

    #[test]
    fn test_degenerate_box_is_skipped() {
        let frame = Frame::filled(10, 10, [0, 0, 0], Instant::now());
        let det = Detection::person(Bbox::new(3., 3., 0., 0.), 0.9);
        let out = draw_detections(&frame, &[det]);
        assert!(out.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn test_non_rgb_frame_passes_through() {
        let frame = Frame::from_raw(4, 4, 1, vec![0u8; 16], Instant::now());
        let det = Detection::person(Bbox::new(0., 0., 2., 2.), 0.9);
        let out = draw_detections(&frame, &[det]);
        assert!(out.shares_buffer(&frame));
    }
}
