//! 检测器 (Detector)
//! 职责: Frame → 缩放/归一化 → 模型推理 → 解码 → NMS → Vec<Detection>

use std::time::Instant;

use fast_image_resize as fr;
use ndarray::Array4;
use tracing::{debug, info};

use crate::config::PipelineConfig;
use crate::detection::Detection;
use crate::error::{Result, SentinelError};
use crate::frame::Frame;
use crate::models::{DecodeParams, Model, ModelType};
use crate::non_max_suppression;
use crate::ort_backend::{OrtBackend, OrtConfig, OrtEP};

/// 采集循环使用的检测接口
pub trait ObjectDetector: Send {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>>;
}

impl<T: ObjectDetector + ?Sized> ObjectDetector for Box<T> {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        (**self).detect(frame)
    }
}

pub struct Detector<M: Model> {
    model: M,
    model_type: ModelType,
    conf_threshold: f32,
    iou_threshold: f32,
    target_class: usize,
    target_label: String,
    num_classes: usize,
    resizer: fr::Resizer,

    // 统计
    count: u64,
}

impl Detector<OrtBackend> {
    /// 启动时加载模型, 失败即 ModelLoad (流水线无法在没有检测器时运行)
    pub fn load(config: &PipelineConfig) -> Result<Self> {
        let size = config.detector.input_size;
        let backend = OrtBackend::build(OrtConfig {
            f: config.detector.model_path.clone(),
            ep: OrtEP::default(),
            image_size: (size, size),
        })
        .map_err(SentinelError::model_load)?;
        backend.summary();
        Self::new(backend, config)
    }
}

impl<M: Model> Detector<M> {
    pub fn new(model: M, config: &PipelineConfig) -> Result<Self> {
        let target_label = config.detector.target_class.clone();
        let target_class = config
            .detector
            .class_names
            .iter()
            .position(|n| *n == target_label)
            .ok_or_else(|| {
                SentinelError::ModelLoad(format!(
                    "target class '{target_label}' not found in class names"
                ))
            })?;
        let model_type = config.model_type();
        info!(
            "🎯 检测目标: {} (class {}) | 模型类型: {:?} | conf>{} | iou>={}",
            target_label,
            target_class,
            model_type,
            config.confidence_threshold,
            config.nms_iou_threshold
        );

        Ok(Self {
            model,
            model_type,
            conf_threshold: config.confidence_threshold,
            iou_threshold: config.nms_iou_threshold,
            target_class,
            target_label,
            num_classes: config.detector.class_names.len(),
            resizer: fr::Resizer::new(),
            count: 0,
        })
    }

    /// 预处理: RGB 帧 → 模型输入尺寸 → NCHW f32 [0, 1]
    pub fn preprocess(&mut self, frame: &Frame) -> Result<Array4<f32>> {
        frame.validate_rgb()?;
        let (inf_w, inf_h) = self.model.input_size();

        let src = fr::images::ImageRef::new(
            frame.width(),
            frame.height(),
            frame.data(),
            fr::PixelType::U8x3,
        )
        .map_err(|e| SentinelError::DetectorInput(e.to_string()))?;
        let mut dst = fr::images::Image::new(inf_w, inf_h, fr::PixelType::U8x3);
        self.resizer
            .resize(
                &src,
                &mut dst,
                &fr::ResizeOptions::new()
                    .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear)),
            )
            .map_err(|e| SentinelError::DetectorInput(e.to_string()))?;

        let raw = dst.buffer();
        let (w, h) = (inf_w as usize, inf_h as usize);
        let mut xs = Array4::<f32>::zeros((1, 3, h, w));
        for (idx, px) in raw.chunks_exact(3).enumerate() {
            let (y, x) = (idx / w, idx % w);
            xs[[0, 0, y, x]] = px[0] as f32 / 255.0; // R
            xs[[0, 1, y, x]] = px[1] as f32 / 255.0; // G
            xs[[0, 2, y, x]] = px[2] as f32 / 255.0; // B
        }
        Ok(xs)
    }

    fn decode_params(&self, frame: &Frame) -> DecodeParams {
        let (inf_w, inf_h) = self.model.input_size();
        DecodeParams {
            conf_threshold: self.conf_threshold,
            target_class: self.target_class,
            target_label: self.target_label.clone(),
            num_classes: self.num_classes,
            frame_width: frame.width() as f32,
            frame_height: frame.height() as f32,
            input_width: inf_w as f32,
            input_height: inf_h as f32,
        }
    }
}

impl<M: Model> ObjectDetector for Detector<M> {
    fn detect(&mut self, frame: &Frame) -> Result<Vec<Detection>> {
        let start = Instant::now();

        let xs = self.preprocess(frame)?;
        let ys = self
            .model
            .run(xs)
            .map_err(|e| SentinelError::Inference(format!("{e:#}")))?;
        let mut detections = self
            .model_type
            .decode(&ys, &self.decode_params(frame))
            .map_err(|e| SentinelError::Inference(format!("{e:#}")))?;
        let candidates = detections.len();
        non_max_suppression(&mut detections, self.iou_threshold);

        self.count += 1;
        debug!(
            "🔍 检测#{}: 候选{}个 → NMS后{}个 | {:.1}ms",
            self.count,
            candidates,
            detections.len(),
            start.elapsed().as_secs_f64() * 1000.0
        );
        Ok(detections)
    }
}
