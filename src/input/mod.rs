/// 视频输入系统 (Video Input System)
///
/// - CameraSource: 本地摄像头 (DirectShow/AVFoundation/V4L2, 需开启 `camera` feature)
/// - ReplaySource: 图片目录回放 (无摄像头环境演示/测试)
#[cfg(feature = "camera")]
pub mod camera;
#[cfg(feature = "camera")]
pub mod decode_filter;
pub mod replay;

#[cfg(feature = "camera")]
pub use camera::{get_camera_devices, CameraSource};
pub use replay::ReplaySource;

use crate::error::Result;
use crate::frame::Frame;

/// 帧源接口: 由采集线程独占
///
/// 未打开或设备丢失时 `read_frame` 返回 `SourceUnavailable`,
/// 单帧超时/损坏返回 `FrameRead`。
pub trait FrameSource: Send {
    fn open(&mut self) -> Result<()>;

    /// 阻塞读取一帧 (有超时上限)
    fn read_frame(&mut self) -> Result<Frame>;

    /// 释放设备句柄; 可重复调用
    fn close(&mut self);

    fn name(&self) -> String;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn open(&mut self) -> Result<()> {
        (**self).open()
    }

    fn read_frame(&mut self) -> Result<Frame> {
        (**self).read_frame()
    }

    fn close(&mut self) {
        (**self).close()
    }

    fn name(&self) -> String {
        (**self).name()
    }
}
