//! # GIM Driver
//!
//! GIM8115 电机驱动层：后台 IO 线程独占 CAN 适配器，按 CAN ID 分发入站帧。
//!
//! ## 模块
//!
//! - `pipeline`: IO 线程循环与帧分发
//! - `motor`: 电机句柄（命令、请求/应答、限位事件订阅）
//! - `link`: 链路存活监控
//! - `metrics`: 总线指标
//! - `builder`: 链式构造

pub mod builder;
pub mod error;
pub mod link;
pub mod metrics;
pub mod motor;
pub mod pipeline;

pub use builder::MotorBuilder;
pub use error::DriverError;
pub use link::LinkMonitor;
pub use metrics::{BusMetrics, MetricsSnapshot};
pub use motor::{DEFAULT_SAFETY_QUEUE_CAPACITY, JoinTimeout, Motor};
pub use pipeline::{BusContext, FrameRoute, PipelineConfig, TxRequest, route_frame};
