//! 标定配置持久化
//!
//! 配置以 TOML 保存，写入时先写临时文件再原子重命名。
//!
//! ```toml
//! position_offset = 0.0
//! position_min_limit = -1.0471975511965976
//! position_max_limit = 1.0471975511965976
//! position_limits_enabled = true
//! limit_find_speed_rads = 0.5
//! can_id = 10
//! interface = "can0"
//! ```

use crate::error::StoreError;
use crate::limits::{CalibrationState, DEFAULT_LIMIT_RAD, DEFAULT_SEARCH_SPEED_RADS};
use gim_protocol::{DEFAULT_INTERFACE, DEFAULT_MOTOR_CAN_ID};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// 持久化的配置
///
/// 缺失的键使用默认值。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoredConfig {
    pub position_offset: f64,
    pub position_min_limit: f64,
    pub position_max_limit: f64,
    pub position_limits_enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_border_min_limit: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_border_max_limit: Option<f64>,
    pub limit_find_speed_rads: f64,
    pub can_id: u16,
    pub interface: String,
}

impl Default for StoredConfig {
    fn default() -> Self {
        Self {
            position_offset: 0.0,
            position_min_limit: -DEFAULT_LIMIT_RAD,
            position_max_limit: DEFAULT_LIMIT_RAD,
            position_limits_enabled: true,
            position_border_min_limit: None,
            position_border_max_limit: None,
            limit_find_speed_rads: DEFAULT_SEARCH_SPEED_RADS,
            can_id: DEFAULT_MOTOR_CAN_ID,
            interface: DEFAULT_INTERFACE.to_string(),
        }
    }
}

impl StoredConfig {
    pub fn from_state(state: &CalibrationState, can_id: u16, interface: &str) -> Self {
        let (min, max) = state.limits();
        let border = state.border_limits();
        Self {
            position_offset: state.offset,
            position_min_limit: min,
            position_max_limit: max,
            position_limits_enabled: state.limits_enabled,
            position_border_min_limit: border.map(|(lo, _)| lo),
            position_border_max_limit: border.map(|(_, hi)| hi),
            limit_find_speed_rads: state.search_speed(),
            can_id,
            interface: interface.to_string(),
        }
    }

    /// 转换为标定状态（无效字段回退到默认值）
    pub fn to_state(&self) -> CalibrationState {
        let border = self
            .position_border_min_limit
            .zip(self.position_border_max_limit);
        CalibrationState::restore(
            self.position_offset,
            self.position_min_limit,
            self.position_max_limit,
            self.position_limits_enabled,
            border,
            self.limit_find_speed_rads,
        )
    }
}

/// 配置存储
pub trait CalibrationStore: Send + Sync {
    /// 读取配置，不存在时返回 `Ok(None)`
    fn load(&self) -> Result<Option<StoredConfig>, StoreError>;

    fn save(&self, config: &StoredConfig) -> Result<(), StoreError>;
}

/// TOML 文件存储
#[derive(Debug, Clone)]
pub struct TomlFileStore {
    path: PathBuf,
}

impl TomlFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn io_error(&self, path: &Path, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl CalibrationStore for TomlFileStore {
    fn load(&self) -> Result<Option<StoredConfig>, StoreError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(self.io_error(&self.path, e)),
        };
        let config = toml::from_str(&text)?;
        debug!("Loaded configuration from {}", self.path.display());
        Ok(Some(config))
    }

    fn save(&self, config: &StoredConfig) -> Result<(), StoreError> {
        let text = toml::to_string_pretty(config)?;

        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).map_err(|e| self.io_error(parent, e))?;
        }

        let tmp = self.temp_path();
        fs::write(&tmp, text).map_err(|e| self.io_error(&tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| self.io_error(&self.path, e))?;
        debug!("Saved configuration to {}", self.path.display());
        Ok(())
    }
}

/// 内存存储（测试或嵌入式场景）
#[derive(Debug, Default)]
pub struct MemoryStore {
    config: Mutex<Option<StoredConfig>>,
    saves: AtomicUsize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: StoredConfig) -> Self {
        Self {
            config: Mutex::new(Some(config)),
            saves: AtomicUsize::new(0),
        }
    }

    /// 当前保存的配置
    pub fn stored(&self) -> Option<StoredConfig> {
        self.config.lock().clone()
    }

    /// 保存次数
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::Relaxed)
    }
}

impl CalibrationStore for MemoryStore {
    fn load(&self) -> Result<Option<StoredConfig>, StoreError> {
        Ok(self.config.lock().clone())
    }

    fn save(&self, config: &StoredConfig) -> Result<(), StoreError> {
        *self.config.lock() = Some(config.clone());
        self.saves.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_loads_none() {
        let dir = TempDir::new().unwrap();
        let store = TomlFileStore::new(dir.path().join("motor.toml"));
        assert_eq!(store.load().unwrap(), None);
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let store = TomlFileStore::new(dir.path().join("nested").join("motor.toml"));

        let mut state = CalibrationState::default();
        state.set_limits(-0.5, 0.75).unwrap();
        state.set_offset(1.25).unwrap();
        let config = StoredConfig::from_state(&state, 0x0B, "vcan0");

        store.save(&config).unwrap();
        assert!(!store.temp_path().exists());

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.to_state(), state);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("motor.toml");
        fs::write(&path, "position_offset = 0.5\nposition_limits_enabled = false\n").unwrap();

        let loaded = TomlFileStore::new(&path).load().unwrap().unwrap();
        assert_eq!(loaded.position_offset, 0.5);
        assert!(!loaded.position_limits_enabled);
        assert_eq!(loaded.can_id, DEFAULT_MOTOR_CAN_ID);
        assert_eq!(loaded.limit_find_speed_rads, DEFAULT_SEARCH_SPEED_RADS);
        assert_eq!(loaded.position_border_min_limit, None);
    }

    #[test]
    fn test_corrupt_file_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("motor.toml");
        fs::write(&path, "position_offset = [not toml").unwrap();

        let err = TomlFileStore::new(&path).load().unwrap_err();
        assert!(matches!(err, StoreError::Parse(_)));
    }

    #[test]
    fn test_border_limits_round_trip() {
        let config = StoredConfig {
            position_border_min_limit: Some(-1.0),
            position_border_max_limit: Some(1.0),
            ..StoredConfig::default()
        };
        let text = toml::to_string_pretty(&config).unwrap();
        assert!(text.contains("position_border_min_limit"));
        let parsed: StoredConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.to_state().border_limits(), Some((-1.0, 1.0)));
    }

    #[test]
    fn test_memory_store_counts_saves() {
        let store = MemoryStore::new();
        assert_eq!(store.load().unwrap(), None);
        store.save(&StoredConfig::default()).unwrap();
        store.save(&StoredConfig::default()).unwrap();
        assert_eq!(store.save_count(), 2);
        assert_eq!(store.stored(), Some(StoredConfig::default()));
    }
}
