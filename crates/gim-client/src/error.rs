//! 客户端层错误类型
//!
//! 驱动层错误在此映射到面向用户的分类：传输、帧格式、结果码、超时、参数校验、标定、持久化。

use crate::calibration::CalibrationPhase;
use gim_driver::DriverError;
use gim_protocol::{ProtocolError, ResultCode};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// 客户端层错误类型
#[derive(Error, Debug)]
pub enum GimError {
    /// 总线或 IO 线程错误
    #[error("Transport error: {0}")]
    Transport(#[source] DriverError),

    /// 帧格式错误（长度、字段）
    #[error("Frame format error: {0}")]
    Format(#[source] ProtocolError),

    /// 电机返回非成功结果码
    #[error("Motor error: {} (0x{:02X})", .code.description(), .code.code())]
    Result { code: ResultCode },

    #[error("Timeout after {timeout_ms}ms waiting for {what}")]
    Timeout { what: &'static str, timeout_ms: u64 },

    /// 参数校验失败
    #[error("Invalid {param}: {reason}")]
    Validation { param: &'static str, reason: String },

    #[error("Calibration failed: {0}")]
    Calibration(#[from] CalibrationError),

    #[error("Configuration store error: {0}")]
    Store(#[from] StoreError),

    /// 后台任务（监听/监控线程）创建或停止失败
    #[error("Background task error: {0}")]
    Task(String),
}

impl From<DriverError> for GimError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Protocol(ProtocolError::DeviceFault { code }) => GimError::Result { code },
            DriverError::Protocol(e) => GimError::Format(e),
            DriverError::Timeout { what, timeout_ms } => GimError::Timeout { what, timeout_ms },
            DriverError::InvalidInput(reason) => GimError::Validation {
                param: "input",
                reason,
            },
            other => GimError::Transport(other),
        }
    }
}

impl GimError {
    pub(crate) fn validation(param: &'static str, reason: impl Into<String>) -> Self {
        GimError::Validation {
            param,
            reason: reason.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, GimError::Timeout { .. })
    }

    /// 总线已不可用，继续重试没有意义
    pub fn is_fatal(&self) -> bool {
        match self {
            GimError::Transport(e) => e.is_fatal(),
            _ => false,
        }
    }

    /// 瞬时错误，可以直接重试
    pub fn is_retryable(&self) -> bool {
        match self {
            GimError::Timeout { .. } => true,
            GimError::Transport(e) => !e.is_fatal(),
            _ => false,
        }
    }
}

/// 标定错误
#[derive(Error, Debug)]
pub enum CalibrationError {
    /// 某阶段未在超时内等到目标限位事件
    #[error("{phase} timed out after {timeout:?}")]
    PhaseTimeout {
        phase: CalibrationPhase,
        timeout: Duration,
    },

    /// 最小侧位置不小于最大侧位置
    #[error("inconsistent limits: min position {min_abs:.4} rad is not below max position {max_abs:.4} rad")]
    InconsistentLimits { min_abs: f64, max_abs: f64 },

    /// 重试后仍无法读取位置
    #[error("position unavailable during {phase}")]
    PositionUnavailable { phase: CalibrationPhase },

    /// 阶段内命令或读取失败
    #[error("{phase} aborted: {source}")]
    Interrupted {
        phase: CalibrationPhase,
        #[source]
        source: Box<GimError>,
    },
}

/// 配置持久化错误
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use gim_can::CanError;

    #[test]
    fn test_device_fault_maps_to_result_error() {
        let err: GimError = DriverError::Protocol(ProtocolError::DeviceFault {
            code: ResultCode::NotConnected,
        })
        .into();
        assert!(matches!(
            err,
            GimError::Result {
                code: ResultCode::NotConnected
            }
        ));
        assert_eq!(err.to_string(), "Motor error: Not Connected (0x80)");
    }

    #[test]
    fn test_format_and_timeout_mapping() {
        let err: GimError = DriverError::Protocol(ProtocolError::InvalidLength {
            expected: 8,
            actual: 3,
        })
        .into();
        assert!(matches!(err, GimError::Format(_)));

        let err: GimError = DriverError::Timeout {
            what: "motor feedback",
            timeout_ms: 100,
        }
        .into();
        assert!(err.is_timeout());
        assert!(err.is_retryable());
        assert!(!err.is_fatal());
    }

    #[test]
    fn test_transport_fatality() {
        let err: GimError = DriverError::ChannelClosed.into();
        assert!(err.is_fatal());
        assert!(!err.is_retryable());

        let err: GimError = DriverError::Can(CanError::Timeout).into();
        assert!(!err.is_fatal());
        assert!(err.is_retryable());
    }

    #[test]
    fn test_calibration_error_display() {
        let err = CalibrationError::InconsistentLimits {
            min_abs: 1.0,
            max_abs: -1.0,
        };
        assert!(err.to_string().contains("inconsistent limits"));

        let err: GimError = CalibrationError::PositionUnavailable {
            phase: CalibrationPhase::StopMin,
        }
        .into();
        assert!(err.to_string().contains("STOP_MIN"));
    }
}
