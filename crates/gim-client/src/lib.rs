//! # GIM Client
//!
//! GIM8115 执行器的用户接口：
//!
//! - `actuator`: 执行器门面（运动命令、偏移/限位、后台任务、标定）
//! - `limits`: 偏移与限位模型
//! - `calibration`: 自动限位标定状态机
//! - `safety_listener` / `status_monitor`: 后台线程
//! - `store`: 配置持久化
//!
//! 需要直接操作 CAN 帧时使用 `gim_driver::Motor`。

pub mod actuator;
pub mod builder;
pub mod calibration;
pub mod error;
pub mod limits;
pub mod observer;
pub mod safety_listener;
pub mod status_monitor;
pub mod store;

pub use actuator::Actuator;
pub use builder::{ActuatorBuilder, DEFAULT_CONFIG_FILE};
pub use calibration::{
    CalibrationConfig, CalibrationOutcome, CalibrationPhase, CalibrationPort, LimitFinder,
};
pub use error::{CalibrationError, GimError, StoreError};
pub use limits::{CalibrationState, DEFAULT_LIMIT_RAD, DEFAULT_SEARCH_SPEED_RADS, SAFETY_SHIFT_RAD};
pub use observer::{ObserverResult, SafetyObserver, StatusObserver, StatusSample};
pub use safety_listener::{SafetyListener, SafetyListenerConfig};
pub use status_monitor::{StatusMonitor, StatusMonitorConfig, poll_status};
pub use store::{CalibrationStore, MemoryStore, StoredConfig, TomlFileStore};
