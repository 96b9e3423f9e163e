//! 错误类型 (Error taxonomy)
//!
//! 启动期错误 (`SourceUnavailable`, `ModelLoad`, `Config`) 直接返回给调用方;
//! 运行期的单帧错误只在采集循环内部记录日志,不会向外传播。

use thiserror::Error;

pub type Result<T, E = SentinelError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum SentinelError {
    /// 摄像头无法打开或运行中丢失
    #[error("frame source unavailable: {0}")]
    SourceUnavailable(String),

    /// 单帧读取失败 (超时/解码错误),跳过即可
    #[error("frame read failure: {0}")]
    FrameRead(String),

    /// 输入帧格式错误 (通道数/尺寸不符)
    #[error("detector input error: {0}")]
    DetectorInput(String),

    /// 检测模型加载失败
    #[error("model load error: {0}")]
    ModelLoad(String),

    /// 推理执行失败
    #[error("inference failed: {0}")]
    Inference(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl SentinelError {
    /// 单帧级别的错误: 记录后继续下一轮循环
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SentinelError::FrameRead(_)
                | SentinelError::DetectorInput(_)
                | SentinelError::Inference(_)
        )
    }

    /// `anyhow` 链 → ModelLoad (保留完整上下文)
    pub fn model_load(err: anyhow::Error) -> Self {
        SentinelError::ModelLoad(format!("{err:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(SentinelError::FrameRead("timeout".into()).is_transient());
        assert!(SentinelError::DetectorInput("4 channels".into()).is_transient());
        assert!(!SentinelError::SourceUnavailable("no device".into()).is_transient());
        assert!(!SentinelError::ModelLoad("missing".into()).is_transient());
    }

    #[test]
    fn test_model_load_keeps_context() {
        let err = anyhow::anyhow!("file not found").context("loading models/yolov8n.onnx");
        let msg = SentinelError::model_load(err).to_string();
        assert!(msg.contains("loading models/yolov8n.onnx"));
        assert!(msg.contains("file not found"));
    }
}
