// Ultralytics 🚀 AGPL-3.0 License - https://ultralytics.com/license

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use ndarray::{Array4, ArrayD};
use ort::execution_providers::CPUExecutionProvider;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::Session;
use ort::value::Tensor;
use tracing::info;

use crate::models::Model;

/// 执行设备
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrtEP {
    #[default]
    CPU,
    #[cfg(feature = "cuda")]
    CUDA(i32),
    #[cfg(feature = "tensorrt")]
    Trt(i32),
}

#[derive(Debug, Clone)]
pub struct OrtConfig {
    pub f: PathBuf,
    pub ep: OrtEP,
    /// 模型输入尺寸 (height, width)
    pub image_size: (u32, u32),
}

/// ONNX Runtime 推理后端
pub struct OrtBackend {
    session: Session,
    ep: OrtEP,
    model_path: PathBuf,
    height: u32,
    width: u32,
}

impl OrtBackend {
    pub fn build(args: OrtConfig) -> Result<Self> {
        let path: &Path = args.f.as_ref();
        if !path.is_file() {
            anyhow::bail!("model file not found: {}", path.display());
        }

        let builder = Session::builder()
            .context("failed to create ORT session builder")?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .context("failed to set optimization level")?;

        let builder = match args.ep {
            OrtEP::CPU => builder
                .with_execution_providers([CPUExecutionProvider::default().build()])
                .context("failed to register CPU execution provider")?,
            #[cfg(feature = "cuda")]
            OrtEP::CUDA(device_id) => builder
                .with_execution_providers([
                    ort::execution_providers::CUDAExecutionProvider::default()
                        .with_device_id(device_id)
                        .build(),
                ])
                .context("failed to register CUDA execution provider")?,
            #[cfg(feature = "tensorrt")]
            OrtEP::Trt(device_id) => builder
                .with_execution_providers([
                    ort::execution_providers::TensorRTExecutionProvider::default()
                        .with_device_id(device_id)
                        .build(),
                ])
                .context("failed to register TensorRT execution provider")?,
        };

        let session = builder
            .commit_from_file(path)
            .with_context(|| format!("failed to load ONNX model {}", path.display()))?;

        let (height, width) = args.image_size;
        info!(
            "✅ 检测模型加载成功: {} ({}x{}, {:?})",
            path.display(),
            width,
            height,
            args.ep
        );

        Ok(Self {
            session,
            ep: args.ep,
            model_path: args.f,
            height,
            width,
        })
    }
}

impl Model for OrtBackend {
    fn input_size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn run(&mut self, xs: Array4<f32>) -> Result<Vec<ArrayD<f32>>> {
        let input = Tensor::from_array(xs).context("failed to create input tensor")?;
        let outputs = self
            .session
            .run(ort::inputs![input])
            .context("ONNX inference failed")?;

        // 多尺度模型 (Darknet) 每个检测头一个输出, 全部取出
        let mut ys = Vec::with_capacity(outputs.len());
        for i in 0..outputs.len() {
            let y = outputs[i]
                .try_extract_array::<f32>()
                .with_context(|| format!("failed to extract output tensor #{i}"))?
                .to_owned();
            ys.push(y);
        }
        Ok(ys)
    }

    fn summary(&self) {
        info!(
            "\nSummary:\n\
            > Model: {}\n\
            > EP: {:?}\n\
            > Input: 1x3x{}x{}\n\
            > Outputs: {}",
            self.model_path.display(),
            self.ep,
            self.height,
            self.width,
            self.session.outputs.len()
        );
    }
}
