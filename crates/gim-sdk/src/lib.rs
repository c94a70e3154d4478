//! GIM SDK - GIM8115 减速电机 Rust SDK
//!
//! # 架构设计
//!
//! 分层结构，从底层到高层：
//!
//! - **协议层** (`protocol`): 8 字节命令/反馈帧编解码、限位事件帧
//! - **CAN 层** (`can`): 适配器抽象，SocketCAN 与 Mock 实现
//! - **驱动层** (`driver`): IO 线程独占总线，按 CAN ID 分发入站帧
//! - **客户端层** (`client`): 偏移/限位、自动标定、限位监听、状态监控
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use gim_sdk::prelude::*;
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), GimError> {
//! gim_sdk::init_logger();
//!
//! let actuator = ActuatorBuilder::new().interface("can0").can_id(0x0A).build()?;
//! actuator.start_safety_listener(true, None)?;
//! actuator.start_motor()?;
//! actuator.send_position(0.5, 500)?;
//! println!("{:?}", actuator.current_position(Duration::from_millis(100))?);
//! # Ok(())
//! # }
//! ```

pub mod logging;
pub mod prelude;

pub use gim_can as can;
pub use gim_client as client;
pub use gim_driver as driver;
pub use gim_protocol as protocol;

pub use logging::{DEFAULT_LOG_DIRECTIVE, init_logger, init_logger_with};

// 客户端层（推荐入口）
pub use gim_client::{
    Actuator, ActuatorBuilder, CalibrationConfig, CalibrationError, CalibrationOutcome,
    CalibrationPhase, CalibrationState, GimError, SafetyObserver, StatusObserver, StatusSample,
};

// 驱动层与底层类型
pub use gim_can::{CanAdapter, CanError};
pub use gim_driver::{DriverError, Motor, MotorBuilder};
pub use gim_protocol::{MotorCommand, MotorStatus, ProtocolError, ResultCode, SafetyEvent, SafetyStatus};
