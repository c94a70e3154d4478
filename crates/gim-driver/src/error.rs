//! 驱动层错误类型定义

use gim_can::CanError;
use gim_protocol::ProtocolError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// CAN 驱动错误
    #[error("CAN driver error: {0}")]
    Can(#[from] CanError),

    /// 协议解析错误（含电机上报的结果码故障）
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 命令通道已关闭（IO 线程退出）
    #[error("Command channel closed")]
    ChannelClosed,

    /// 命令通道已满
    #[error("Command channel full (buffer size: {capacity})")]
    ChannelFull { capacity: usize },

    /// IO 线程错误
    #[error("IO thread error: {0}")]
    IoThread(String),

    /// 请求/应答超时
    #[error("Timeout after {timeout_ms}ms waiting for {what}")]
    Timeout { what: &'static str, timeout_ms: u64 },

    /// 无效输入
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl DriverError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, DriverError::Timeout { .. })
    }

    /// IO 线程已不可用
    pub fn is_fatal(&self) -> bool {
        match self {
            DriverError::ChannelClosed | DriverError::IoThread(_) => true,
            DriverError::Can(e) => e.is_fatal(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::DriverError;
    use gim_can::CanError;
    use gim_protocol::{ProtocolError, ResultCode};

    #[test]
    fn test_driver_error_display() {
        let msg = DriverError::Can(CanError::Timeout).to_string();
        assert!(msg.contains("Read timeout"), "Can error message: {}", msg);

        let msg = DriverError::Protocol(ProtocolError::InvalidLength {
            expected: 8,
            actual: 4,
        })
        .to_string();
        assert!(msg.contains("Invalid frame length"), "Protocol error message: {}", msg);

        assert_eq!(DriverError::ChannelClosed.to_string(), "Command channel closed");
        assert_eq!(
            DriverError::ChannelFull { capacity: 32 }.to_string(),
            "Command channel full (buffer size: 32)"
        );
        assert_eq!(
            DriverError::Timeout {
                what: "motor feedback",
                timeout_ms: 500
            }
            .to_string(),
            "Timeout after 500ms waiting for motor feedback"
        );
    }

    #[test]
    fn test_from_conversions() {
        let err: DriverError = CanError::BusOff.into();
        assert!(matches!(err, DriverError::Can(CanError::BusOff)));
        assert!(err.is_fatal());

        let err: DriverError = ProtocolError::DeviceFault {
            code: ResultCode::Fail,
        }
        .into();
        assert!(matches!(err, DriverError::Protocol(ProtocolError::DeviceFault { .. })));
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_is_timeout() {
        assert!(
            DriverError::Timeout {
                what: "x",
                timeout_ms: 1
            }
            .is_timeout()
        );
        assert!(!DriverError::ChannelClosed.is_timeout());
    }
}
