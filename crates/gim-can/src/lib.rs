//! # GIM CAN Adapter Layer
//!
//! CAN 硬件抽象层，提供统一的 CAN 接口抽象。
//!
//! - Linux：`SocketCanAdapter`（内核 SocketCAN）
//! - 测试/仿真：`MockCanAdapter`（`mock` feature）

use std::time::Duration;
use thiserror::Error;

pub use gim_protocol::GimFrame;

#[cfg(target_os = "linux")]
pub mod socketcan;

#[cfg(target_os = "linux")]
pub use socketcan::SocketCanAdapter;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

#[cfg(any(test, feature = "mock"))]
pub use mock::{MockBus, MockCanAdapter};

/// CAN 适配层统一错误类型
#[derive(Error, Debug)]
pub enum CanError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Device Error: {0}")]
    Device(#[from] CanDeviceError),
    #[error("Read timeout")]
    Timeout,
    #[error("Buffer overflow")]
    BufferOverflow,
    #[error("Bus off")]
    BusOff,
    #[error("Device not started")]
    NotStarted,
}

impl CanError {
    /// 设备已不可用，重试没有意义
    pub fn is_fatal(&self) -> bool {
        match self {
            CanError::Device(e) => e.is_fatal(),
            CanError::BusOff | CanError::NotStarted => true,
            _ => false,
        }
    }
}

/// 设备/后端错误的结构化分类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanDeviceErrorKind {
    Unknown,
    NotFound,
    InterfaceDown,
    AccessDenied,
    InvalidFrame,
    Backend,
}

#[derive(Error, Debug, Clone)]
#[error("{kind:?}: {message}")]
pub struct CanDeviceError {
    pub kind: CanDeviceErrorKind,
    pub message: String,
}

impl CanDeviceError {
    pub fn new(kind: CanDeviceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            CanDeviceErrorKind::NotFound
                | CanDeviceErrorKind::InterfaceDown
                | CanDeviceErrorKind::AccessDenied
        )
    }
}

impl From<String> for CanDeviceError {
    fn from(message: String) -> Self {
        Self::new(CanDeviceErrorKind::Unknown, message)
    }
}

impl From<&str> for CanDeviceError {
    fn from(message: &str) -> Self {
        Self::new(CanDeviceErrorKind::Unknown, message)
    }
}

/// CAN 适配器 Trait
///
/// 所有接收都由驱动层的单个 IO 线程执行，因此实现无需内部同步。
pub trait CanAdapter {
    /// 发送一帧（Fire-and-Forget）
    fn send(&mut self, frame: GimFrame) -> Result<(), CanError>;

    /// 接收一帧（阻塞直到收到数据帧或超时）
    ///
    /// 超时返回 `CanError::Timeout`，属于正常情况。
    fn receive(&mut self) -> Result<GimFrame, CanError>;

    /// 设置接收超时
    fn set_receive_timeout(&mut self, _timeout: Duration) {}

    /// 带超时的接收
    fn receive_timeout(&mut self, timeout: Duration) -> Result<GimFrame, CanError> {
        self.set_receive_timeout(timeout);
        self.receive()
    }

    /// 非阻塞接收，无数据时返回 `Ok(None)`
    fn try_receive(&mut self) -> Result<Option<GimFrame>, CanError> {
        match self.receive_timeout(Duration::ZERO) {
            Ok(frame) => Ok(Some(frame)),
            Err(CanError::Timeout) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_error_fatal_kinds() {
        assert!(CanDeviceError::new(CanDeviceErrorKind::NotFound, "x").is_fatal());
        assert!(CanDeviceError::new(CanDeviceErrorKind::InterfaceDown, "x").is_fatal());
        assert!(!CanDeviceError::new(CanDeviceErrorKind::InvalidFrame, "x").is_fatal());
        assert!(!CanDeviceError::from("oops").is_fatal());
    }

    #[test]
    fn test_can_error_fatal() {
        assert!(CanError::BusOff.is_fatal());
        assert!(!CanError::Timeout.is_fatal());
        assert!(CanError::Device(CanDeviceError::new(CanDeviceErrorKind::NotFound, "can9")).is_fatal());
    }

    #[test]
    fn test_can_error_display() {
        assert_eq!(CanError::Timeout.to_string(), "Read timeout");
        let err = CanError::Device(CanDeviceError::new(CanDeviceErrorKind::InterfaceDown, "can0 is down"));
        assert_eq!(err.to_string(), "Device Error: InterfaceDown: can0 is down");
    }
}
