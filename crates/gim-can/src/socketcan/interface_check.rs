//! CAN 接口状态检查
//!
//! 通过 sysfs（`/sys/class/net/<iface>/flags`）读取接口管理态，
//! 只读操作，普通用户即可执行。

use crate::{CanDeviceError, CanDeviceErrorKind, CanError};
use std::path::PathBuf;
use tracing::trace;

/// IFNAMSIZ - 1
const MAX_IFACE_NAME_LEN: usize = 15;

/// 检查 CAN 接口是否存在且已启动（IFF_UP）
///
/// # 返回值
/// - `Ok(true)`: 接口存在且为 UP
/// - `Ok(false)`: 接口存在但为 DOWN
/// - `Err(CanError::Device)`: 接口名无效或接口不存在
/// - `Err(CanError::Io)`: 读取 sysfs 失败
pub fn check_interface_status(interface: &str) -> Result<bool, CanError> {
    if interface.is_empty()
        || interface.len() > MAX_IFACE_NAME_LEN
        || interface.contains(['/', '\0'])
    {
        return Err(CanError::Device(CanDeviceError::new(
            CanDeviceErrorKind::NotFound,
            format!("Invalid interface name '{}'", interface),
        )));
    }

    let flags_path: PathBuf = ["/sys/class/net", interface, "flags"].iter().collect();
    let raw = match std::fs::read_to_string(&flags_path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CanError::Device(CanDeviceError::new(
                CanDeviceErrorKind::NotFound,
                format!(
                    "CAN interface '{}' does not exist. Please create it first:\n  sudo ip link add dev {} type can",
                    interface, interface
                ),
            )));
        },
        Err(e) => return Err(CanError::Io(e)),
    };

    let flags = parse_flags(&raw).ok_or_else(|| {
        CanError::Device(CanDeviceError::new(
            CanDeviceErrorKind::Backend,
            format!("Unexpected flags '{}' for interface '{}'", raw.trim(), interface),
        ))
    })?;

    let is_up = flags & libc::IFF_UP as u32 != 0;
    trace!(
        "Interface '{}' status: {}",
        interface,
        if is_up { "UP" } else { "DOWN" }
    );
    Ok(is_up)
}

fn parse_flags(raw: &str) -> Option<u32> {
    let trimmed = raw.trim();
    let hex = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    u32::from_str_radix(hex, 16).ok()
}
