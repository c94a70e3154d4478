//! Client 层 Actuator Builder
//!
//! 在驱动层 `MotorBuilder` 之上补充配置存储与后台任务参数。

use crate::actuator::Actuator;
use crate::error::GimError;
use crate::safety_listener::SafetyListenerConfig;
use crate::status_monitor::StatusMonitorConfig;
use crate::store::{CalibrationStore, TomlFileStore};
use gim_can::CanAdapter;
use gim_driver::{MotorBuilder, PipelineConfig};
use std::path::PathBuf;
use std::sync::Arc;

/// 默认配置文件
pub const DEFAULT_CONFIG_FILE: &str = "gim8115_config.toml";

/// Actuator Builder
///
/// # 示例
///
/// ```rust,no_run
/// use gim_client::ActuatorBuilder;
///
/// # fn main() -> Result<(), gim_client::GimError> {
/// let actuator = ActuatorBuilder::new()
///     .interface("can0")
///     .can_id(0x0A)
///     .config_path("/var/lib/gim/motor.toml")
///     .build()?;
/// actuator.start_safety_listener(true, None)?;
/// # Ok(())
/// # }
/// ```
pub struct ActuatorBuilder {
    motor: MotorBuilder,
    store: Option<Arc<dyn CalibrationStore>>,
    config_path: PathBuf,
    listener_config: SafetyListenerConfig,
    monitor_config: StatusMonitorConfig,
}

impl Default for ActuatorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ActuatorBuilder {
    pub fn new() -> Self {
        Self {
            motor: MotorBuilder::new(),
            store: None,
            config_path: PathBuf::from(DEFAULT_CONFIG_FILE),
            listener_config: SafetyListenerConfig::default(),
            monitor_config: StatusMonitorConfig::default(),
        }
    }

    /// 设置 CAN 接口（默认 "can0"）
    pub fn interface(mut self, interface: impl Into<String>) -> Self {
        self.motor = self.motor.interface(interface);
        self
    }

    /// 设置电机 CAN ID（默认 0x0A）
    pub fn can_id(mut self, can_id: u16) -> Self {
        self.motor = self.motor.can_id(can_id);
        self
    }

    pub fn bitrate(mut self, bitrate: u32) -> Self {
        self.motor = self.motor.bitrate(bitrate);
        self
    }

    pub fn torque_constant(mut self, torque_constant: f64) -> Self {
        self.motor = self.motor.torque_constant(torque_constant);
        self
    }

    pub fn gear_ratio(mut self, gear_ratio: f64) -> Self {
        self.motor = self.motor.gear_ratio(gear_ratio);
        self
    }

    pub fn pipeline_config(mut self, config: PipelineConfig) -> Self {
        self.motor = self.motor.pipeline_config(config);
        self
    }

    /// 配置文件路径（默认 [`DEFAULT_CONFIG_FILE`]）
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = path.into();
        self
    }

    /// 使用自定义配置存储（优先于 `config_path`）
    pub fn store(mut self, store: Arc<dyn CalibrationStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// 安全节点设备 ID（默认 1）
    pub fn safety_device_id(mut self, device_id: u8) -> Self {
        self.listener_config.device_id = device_id;
        self
    }

    pub fn safety_listener_config(mut self, config: SafetyListenerConfig) -> Self {
        self.listener_config = config;
        self
    }

    pub fn status_monitor_config(mut self, config: StatusMonitorConfig) -> Self {
        self.monitor_config = config;
        self
    }

    /// 打开 SocketCAN 接口并构建 `Actuator`
    pub fn build(self) -> Result<Actuator, GimError> {
        let store = self.resolve_store();
        let motor = self.motor.build()?;
        Ok(Actuator::new(
            motor,
            store,
            self.listener_config,
            self.monitor_config,
        ))
    }

    /// 使用给定适配器构建（测试/仿真）
    pub fn build_with_adapter(
        self,
        adapter: impl CanAdapter + Send + 'static,
    ) -> Result<Actuator, GimError> {
        let store = self.resolve_store();
        let motor = self.motor.build_with_adapter(adapter)?;
        Ok(Actuator::new(
            motor,
            store,
            self.listener_config,
            self.monitor_config,
        ))
    }

    fn resolve_store(&self) -> Arc<dyn CalibrationStore> {
        match &self.store {
            Some(store) => store.clone(),
            None => Arc::new(TomlFileStore::new(self.config_path.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoredConfig};
    use gim_can::MockCanAdapter;
    use tempfile::TempDir;

    #[test]
    fn test_build_with_memory_store() {
        let (adapter, _bus) = MockCanAdapter::new();
        let store = Arc::new(MemoryStore::new());
        let actuator = ActuatorBuilder::new()
            .interface("vcan0")
            .can_id(0x0B)
            .store(store.clone())
            .build_with_adapter(adapter)
            .unwrap();

        assert_eq!(actuator.can_id(), 0x0B);
        actuator.set_position_offset(0.1).unwrap();
        let saved = store.stored().unwrap();
        assert_eq!(saved.can_id, 0x0B);
        assert_eq!(saved.interface, "vcan0");
    }

    #[test]
    fn test_build_reads_config_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("motor.toml");
        let config = StoredConfig {
            position_offset: -0.75,
            ..StoredConfig::default()
        };
        TomlFileStore::new(&path).save(&config).unwrap();

        let (adapter, _bus) = MockCanAdapter::new();
        let actuator = ActuatorBuilder::new()
            .config_path(&path)
            .build_with_adapter(adapter)
            .unwrap();
        assert_eq!(actuator.position_offset(), -0.75);
    }

    #[test]
    fn test_corrupt_config_falls_back_to_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("motor.toml");
        std::fs::write(&path, "this is = = not toml").unwrap();

        let (adapter, _bus) = MockCanAdapter::new();
        let actuator = ActuatorBuilder::new()
            .config_path(&path)
            .build_with_adapter(adapter)
            .unwrap();
        assert_eq!(actuator.position_offset(), 0.0);
        assert!(actuator.limits_enabled());
    }

    #[test]
    fn test_invalid_can_id_is_validation_error() {
        let (adapter, _bus) = MockCanAdapter::new();
        let result = ActuatorBuilder::new()
            .can_id(0x900)
            .store(Arc::new(MemoryStore::new()))
            .build_with_adapter(adapter);
        assert!(matches!(result, Err(GimError::Validation { .. })));
    }
}
