//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use gim_sdk::prelude::*;
//! ```

// 客户端层
pub use gim_client::{
    Actuator, ActuatorBuilder, CalibrationConfig, CalibrationOutcome, CalibrationPhase,
    ObserverResult, SafetyListenerConfig, SafetyObserver, StatusMonitorConfig, StatusObserver,
    StatusSample,
};

// 协议类型
pub use gim_protocol::{IndicatorId, LimitSide, MotorCommand, MotorStatus, SafetyEvent, SafetyStatus};

// CAN 层（常用 Trait）
pub use gim_can::CanAdapter;

// 驱动层（高级用户）
pub use gim_driver::Motor;

// 错误类型
pub use gim_can::CanError;
pub use gim_client::{CalibrationError, GimError};
pub use gim_driver::DriverError;
pub use gim_protocol::ProtocolError;
