//! Builder 模式实现
//!
//! 提供链式构造 `Motor` 实例的便捷方式。

use crate::error::DriverError;
use crate::motor::Motor;
use crate::pipeline::PipelineConfig;
use gim_can::CanAdapter;
use gim_protocol::{DEFAULT_BITRATE, DEFAULT_INTERFACE, DEFAULT_MOTOR_CAN_ID, TorqueScale};
use tracing::info;

/// Motor Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use gim_driver::MotorBuilder;
///
/// let motor = MotorBuilder::new()
///     .interface("can0")
///     .can_id(0x0A)
///     .gear_ratio(36.0)
///     .build()
///     .unwrap();
/// ```
#[derive(Debug, Clone)]
pub struct MotorBuilder {
    /// SocketCAN 接口名称
    interface: String,
    /// 电机 CAN ID
    can_id: u16,
    /// 期望的总线速率（SocketCAN 由系统配置，仅用于校验日志）
    bitrate: u32,
    torque_scale: TorqueScale,
    pipeline_config: Option<PipelineConfig>,
}

impl Default for MotorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MotorBuilder {
    pub fn new() -> Self {
        Self {
            interface: DEFAULT_INTERFACE.to_string(),
            can_id: DEFAULT_MOTOR_CAN_ID,
            bitrate: DEFAULT_BITRATE,
            torque_scale: TorqueScale::default(),
            pipeline_config: None,
        }
    }

    /// 设置 CAN 接口（默认 "can0"）
    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = interface.into();
        self
    }

    /// 设置电机 CAN ID（默认 0x0A）
    pub fn can_id(mut self, can_id: u16) -> Self {
        self.can_id = can_id;
        self
    }

    /// 设置总线速率（默认 500 kbit/s）
    pub fn bitrate(mut self, bitrate: u32) -> Self {
        self.bitrate = bitrate;
        self
    }

    /// 设置力矩常数 KT（默认 1.0）
    pub fn torque_constant(mut self, torque_constant: f64) -> Self {
        self.torque_scale.torque_constant = torque_constant;
        self
    }

    /// 设置减速比（默认 1.0）
    pub fn gear_ratio(mut self, gear_ratio: f64) -> Self {
        self.torque_scale.gear_ratio = gear_ratio;
        self
    }

    /// 设置 Pipeline 配置
    pub fn pipeline_config(mut self, config: PipelineConfig) -> Self {
        self.pipeline_config = Some(config);
        self
    }

    pub fn interface_name(&self) -> &str {
        &self.interface
    }

    pub fn motor_can_id(&self) -> u16 {
        self.can_id
    }

    fn validate(&self) -> Result<(), DriverError> {
        if self.can_id > 0x7FF {
            return Err(DriverError::InvalidInput(format!(
                "CAN ID 0x{:X} exceeds the 11-bit standard range",
                self.can_id
            )));
        }
        if !(self.torque_scale.torque_constant.is_finite() && self.torque_scale.gear_ratio.is_finite())
        {
            return Err(DriverError::InvalidInput(
                "torque constant and gear ratio must be finite".to_string(),
            ));
        }
        Ok(())
    }

    /// 打开 SocketCAN 接口并构建 `Motor`
    ///
    /// # 错误
    /// - `DriverError::InvalidInput`: 参数无效，或当前平台不支持 SocketCAN
    /// - `DriverError::Can`: 接口不存在/未启动/打开失败
    pub fn build(self) -> Result<Motor, DriverError> {
        self.validate()?;

        #[cfg(target_os = "linux")]
        {
            let mut adapter = gim_can::SocketCanAdapter::new(&self.interface)?;
            adapter.configure(self.bitrate)?;
            info!(
                "Connected to motor 0x{:02X} on {} ({} bps)",
                self.can_id, self.interface, self.bitrate
            );
            let interface = self.interface.clone();
            self.build_with_adapter(adapter).map(|m| m.with_interface(interface))
        }

        #[cfg(not(target_os = "linux"))]
        {
            Err(DriverError::InvalidInput(format!(
                "SocketCAN interface '{}' is only available on Linux",
                self.interface
            )))
        }
    }

    /// 使用给定适配器构建 `Motor`（测试/仿真或自定义后端）
    pub fn build_with_adapter(
        self,
        adapter: impl CanAdapter + Send + 'static,
    ) -> Result<Motor, DriverError> {
        self.validate()?;
        let motor = Motor::new(adapter, self.can_id, self.pipeline_config)?
            .with_torque_scale(self.torque_scale)
            .with_interface(self.interface);
        info!("Motor 0x{:02X} ready", motor.can_id());
        Ok(motor)
    }
}
