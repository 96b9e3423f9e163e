// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct Bbox {
    // a bounding box in source-frame pixels
    xmin: f32,
    ymin: f32,
    width: f32,
    height: f32,
}

impl Bbox {
    pub fn new(xmin: f32, ymin: f32, width: f32, height: f32) -> Self {
        Self {
            xmin,
            ymin,
            width,
            height,
        }
    }

    /// 中心点编码 (cx, cy, w, h) → 左上角编码
    pub fn from_cxcywh(cx: f32, cy: f32, width: f32, height: f32) -> Self {
        Self::new(cx - width / 2., cy - height / 2., width, height)
    }

    pub fn from_xyxy(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self::new(x1, y1, x2 - x1, y2 - y1)
    }

    pub fn width(&self) -> f32 {
        self.width
    }

    pub fn height(&self) -> f32 {
        self.height
    }

    pub fn xmin(&self) -> f32 {
        self.xmin
    }

    pub fn ymin(&self) -> f32 {
        self.ymin
    }

    pub fn xmax(&self) -> f32 {
        self.xmin + self.width
    }

    pub fn ymax(&self) -> f32 {
        self.ymin + self.height
    }

    pub fn cxcy(&self) -> (f32, f32) {
        (self.xmin + self.width / 2., self.ymin + self.height / 2.)
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.) * self.height.max(0.)
    }

    /// 裁剪到画面范围内
    pub fn clamp_to(&self, frame_width: f32, frame_height: f32) -> Self {
        let x1 = self.xmin.clamp(0., frame_width);
        let y1 = self.ymin.clamp(0., frame_height);
        let x2 = self.xmax().clamp(0., frame_width);
        let y2 = self.ymax().clamp(0., frame_height);
        Self::from_xyxy(x1, y1, x2, y2)
    }

    pub fn intersection_area(&self, another: &Bbox) -> f32 {
        let l = self.xmin.max(another.xmin);
        let r = self.xmax().min(another.xmax());
        let t = self.ymin.max(another.ymin);
        let b = self.ymax().min(another.ymax());
        (r - l).max(0.) * (b - t).max(0.)
    }

    pub fn union(&self, another: &Bbox) -> f32 {
        self.area() + another.area() - self.intersection_area(another)
    }

    pub fn iou(&self, another: &Bbox) -> f32 {
        let union = self.union(another);
        if union <= 0. {
            return 0.;
        }
        self.intersection_area(another) / union
    }
}

/// 单个检测结果: 框 + 类别 + 置信度
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Detection {
    pub bbox: Bbox,
    pub class_id: usize,
    pub label: String,
    pub confidence: f32,
}

impl Detection {
    pub fn new(bbox: Bbox, class_id: usize, label: impl Into<String>, confidence: f32) -> Self {
        Self {
            bbox,
            class_id,
            label: label.into(),
            confidence,
        }
    }

    pub fn person(bbox: Bbox, confidence: f32) -> Self {
        Self::new(bbox, 0, "person", confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iou() {
        let a = Bbox::new(0., 0., 10., 10.);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);

        // 一半重叠: 50 / 150
        let b = Bbox::new(5., 0., 10., 10.);
        assert!((a.iou(&b) - 1. / 3.).abs() < 1e-6);

        let far = Bbox::new(100., 100., 10., 10.);
        assert_eq!(a.iou(&far), 0.);

        let degenerate = Bbox::new(3., 3., 0., 0.);
        assert_eq!(degenerate.iou(&degenerate), 0.);
    }

    #[test]
    fn test_cxcywh_and_clamp() {
        let b = Bbox::from_cxcywh(5., 5., 20., 10.);
        assert_eq!(b.xmin(), -5.);
        assert_eq!(b.ymin(), 0.);

        let c = b.clamp_to(12., 8.);
        assert_eq!((c.xmin(), c.ymin(), c.xmax(), c.ymax()), (0., 0., 12., 8.));
        assert_eq!(c.cxcy(), (6., 4.));
    }
}
