/// 模型统一接口与输出解码
///
/// # 架构说明
///
/// - **Model trait**: 推理引擎只负责前向传播 (NCHW 张量 → 原始输出张量),
///   预处理与后处理放在 `Detector` 中,便于在没有模型文件时单独测试
/// - **输出解码**: 按模型输出布局解码为检测框
///   - `yolov8.rs`: `[1, 4+nc, anchors]`, 坐标为输入像素 cxcywh
///   - `darknet.rs`: 每个检测尺度一个输出 `[anchors, 5+nc]`, 坐标为相对画面 (0..1) cxcywh
///
/// ## 核心流程
/// ```text
/// Frame → Detector::preprocess → Array4<f32>
///          ↓
///     Model::run
///          ↓
///     Vec<ArrayD<f32>> → ModelType::decode → NMS → Vec<Detection>
/// ```
use std::path::Path;

use anyhow::{bail, Result};
use ndarray::{Array4, ArrayD};
use serde::{Deserialize, Serialize};

use crate::detection::Detection;

pub mod darknet;
pub mod yolov8;

/// 模型类型枚举 (决定输出布局)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelType {
    /// YOLOv8 / YOLOv11 导出的 ONNX (无 objectness)
    YOLOv8,
    /// Darknet YOLOv3 系列 (带 objectness, 相对坐标)
    Darknet,
}

impl ModelType {
    /// 从模型路径推断模型类型
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let name = path
            .as_ref()
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if name.contains("yolov3") || name.contains("yolov4") || name.contains("darknet") {
            ModelType::Darknet
        } else {
            ModelType::YOLOv8
        }
    }

    /// 解码全部输出, 只保留目标类别且最高分 > conf 的候选框 (未做NMS)
    ///
    /// YOLOv8 只有一个输出头; Darknet 每个检测尺度一个输出, 逐个解码后合并
    pub fn decode(&self, outputs: &[ArrayD<f32>], params: &DecodeParams) -> Result<Vec<Detection>> {
        match self {
            ModelType::YOLOv8 => match outputs {
                [preds] => yolov8::decode(preds.view(), params),
                _ => bail!("YOLOv8 expects exactly one output, got {}", outputs.len()),
            },
            ModelType::Darknet => {
                if outputs.is_empty() {
                    bail!("model produced no outputs");
                }
                let mut data = Vec::new();
                for preds in outputs {
                    data.extend(darknet::decode(preds.view(), params)?);
                }
                Ok(data)
            }
        }
    }
}

/// 解码参数
#[derive(Debug, Clone)]
pub struct DecodeParams {
    pub conf_threshold: f32,
    pub target_class: usize,
    pub target_label: String,
    /// 类别数 (决定 YOLOv8 输出的行数 4 + nc)
    pub num_classes: usize,
    /// 原始画面尺寸
    pub frame_width: f32,
    pub frame_height: f32,
    /// 模型输入尺寸
    pub input_width: f32,
    pub input_height: f32,
}

/// 统一的推理引擎接口
///
/// 所有后端 (ONNX Runtime, 测试用的假模型) 都实现此 trait
pub trait Model: Send {
    /// 模型输入尺寸 (width, height)
    fn input_size(&self) -> (u32, u32);

    /// 推理: 执行模型前向传播
    ///
    /// # Arguments
    /// * `xs` - NCHW 格式, 值域 [0, 1] 的输入张量
    ///
    /// # Returns
    /// * 模型全部输出张量, 按输出顺序 (未解码)
    fn run(&mut self, xs: Array4<f32>) -> Result<Vec<ArrayD<f32>>>;

    /// 打印模型信息
    fn summary(&self);
}

/// 每个 anchor 取最高分类别
pub(crate) fn argmax(scores: impl IntoIterator<Item = f32>) -> Option<(usize, f32)> {
    scores
        .into_iter()
        .enumerate()
        .reduce(|max, x| if x.1 > max.1 { x } else { max })
}
