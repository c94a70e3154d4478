//! SocketCAN CAN 适配器实现
//!
//! Linux 平台下基于内核 SocketCAN 子系统的适配器。
//!
//! ## 限制
//!
//! - **仅限 Linux 平台**
//! - **接口配置**：波特率由系统工具配置（`ip link set can0 type can bitrate 500000`），
//!   不在应用层设置
//! - 错误帧被自动过滤，只返回数据帧

use crate::{CanAdapter, CanDeviceError, CanDeviceErrorKind, CanError, GimFrame};
use socketcan::{
    BlockingCan, CanFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame, Socket, StandardId,
};
use std::os::unix::io::AsRawFd;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::{trace, warn};

mod interface_check;

pub use interface_check::check_interface_status;

/// 默认读超时，与 `PipelineConfig::receive_timeout_ms` 默认值一致
const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(2);

/// SocketCAN 适配器
///
/// # 示例
///
/// ```no_run
/// use gim_can::{CanAdapter, GimFrame, SocketCanAdapter};
///
/// let mut adapter = SocketCanAdapter::new("can0").unwrap();
/// adapter.send(GimFrame::new_standard(0x0A, &[0x91, 0, 0, 0, 0, 0, 0, 0])).unwrap();
/// ```
#[derive(Debug)]
pub struct SocketCanAdapter {
    socket: CanSocket,
    /// 接口名称（如 "can0"）
    interface: String,
    read_timeout: Duration,
}

impl SocketCanAdapter {
    /// 打开 SocketCAN 接口
    ///
    /// # 错误
    /// - `CanError::Device`: 接口不存在、未启动或打开失败
    /// - `CanError::Io`: 设置读超时失败
    pub fn new(interface: impl Into<String>) -> Result<Self, CanError> {
        let interface = interface.into();

        if !check_interface_status(&interface)? {
            return Err(CanError::Device(CanDeviceError::new(
                CanDeviceErrorKind::InterfaceDown,
                format!(
                    "CAN interface '{}' exists but is not UP. Please start it first:\n  sudo ip link set up {}",
                    interface, interface
                ),
            )));
        }

        let socket = CanSocket::open(&interface).map_err(|e| {
            CanError::Device(CanDeviceError::new(
                CanDeviceErrorKind::Backend,
                format!("Failed to open CAN interface '{}': {}", interface, e),
            ))
        })?;

        // 发送帧不回环到本机其他 socket，避免 IO 线程把自己的命令当作应答
        let loopback_enabled: libc::c_int = 0;
        let loopback_result = unsafe {
            libc::setsockopt(
                socket.as_raw_fd(),
                libc::SOL_CAN_RAW,
                libc::CAN_RAW_LOOPBACK,
                &loopback_enabled as *const _ as *const libc::c_void,
                std::mem::size_of::<libc::c_int>() as libc::socklen_t,
            )
        };
        if loopback_result < 0 {
            warn!(
                "Failed to disable CAN_RAW_LOOPBACK on '{}': {}",
                interface,
                std::io::Error::last_os_error()
            );
        }

        socket.set_read_timeout(DEFAULT_READ_TIMEOUT).map_err(CanError::Io)?;

        trace!("SocketCAN interface '{}' opened", interface);

        Ok(Self {
            socket,
            interface,
            read_timeout: DEFAULT_READ_TIMEOUT,
        })
    }

    /// 获取接口名称
    pub fn interface(&self) -> &str {
        &self.interface
    }

    /// 获取读超时时间
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// 设置读超时
    pub fn set_read_timeout(&mut self, timeout: Duration) -> Result<(), CanError> {
        self.socket.set_read_timeout(timeout).map_err(CanError::Io)?;
        self.read_timeout = timeout;
        Ok(())
    }

    /// 配置接口
    ///
    /// SocketCAN 的波特率由 `ip link` 配置，这里只记录期望值。
    pub fn configure(&mut self, bitrate: u32) -> Result<(), CanError> {
        trace!(
            "SocketCAN interface '{}' expects bitrate {} (set externally)",
            self.interface, bitrate
        );
        Ok(())
    }
}

fn to_can_frame(frame: &GimFrame) -> Result<CanFrame, CanError> {
    let payload = frame.data_slice();
    let can_frame = if frame.is_extended {
        ExtendedId::new(frame.id).and_then(|id| CanFrame::new(id, payload))
    } else {
        StandardId::new(frame.id as u16).and_then(|id| CanFrame::new(id, payload))
    };

    can_frame.ok_or_else(|| {
        CanError::Device(CanDeviceError::new(
            CanDeviceErrorKind::InvalidFrame,
            format!("Failed to create frame with ID 0x{:X}", frame.id),
        ))
    })
}

fn now_us() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

impl CanAdapter for SocketCanAdapter {
    fn send(&mut self, frame: GimFrame) -> Result<(), CanError> {
        let can_frame = to_can_frame(&frame)?;

        self.socket.transmit(&can_frame).map_err(|e| {
            CanError::Io(std::io::Error::other(format!(
                "SocketCAN transmit error: {}",
                e
            )))
        })?;

        trace!("Sent CAN frame: ID=0x{:X}, len={}", frame.id, frame.len);
        Ok(())
    }

    fn receive(&mut self) -> Result<GimFrame, CanError> {
        loop {
            let can_frame = match self.socket.read_frame() {
                Ok(frame) => frame,
                Err(e)
                    if matches!(
                        e.kind(),
                        std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut
                    ) =>
                {
                    return Err(CanError::Timeout);
                },
                Err(e) => return Err(CanError::Io(e)),
            };

            if can_frame.is_error_frame() {
                warn!("Dropped CAN error frame: ID=0x{:X}", can_frame.raw_id());
                continue;
            }

            let id = if can_frame.is_extended() {
                can_frame.raw_id() & 0x1FFF_FFFF
            } else {
                can_frame.raw_id() & 0x7FF
            };

            let mut data = [0u8; 8];
            let payload = can_frame.data();
            let len = payload.len().min(8);
            data[..len].copy_from_slice(&payload[..len]);

            let frame = GimFrame {
                id,
                data,
                len: len as u8,
                is_extended: can_frame.is_extended(),
                timestamp_us: now_us(),
            };

            trace!("Received CAN frame: ID=0x{:X}, len={}", frame.id, frame.len);
            return Ok(frame);
        }
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        if let Err(e) = self.set_read_timeout(timeout) {
            warn!("Failed to set receive timeout: {}", e);
        }
    }

    fn receive_timeout(&mut self, timeout: Duration) -> Result<GimFrame, CanError> {
        let old_timeout = self.read_timeout;
        self.set_read_timeout(timeout)?;
        let result = self.receive();
        let _ = self.set_read_timeout(old_timeout);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_can_frame_standard() {
        let frame = GimFrame::new_standard(0x0A, &[0x91, 0, 0, 0, 0, 0, 0, 0]);
        let can_frame = to_can_frame(&frame).unwrap();
        assert_eq!(can_frame.raw_id() & 0x7FF, 0x0A);
        assert_eq!(can_frame.data(), frame.data_slice());
    }

    #[test]
    fn test_to_can_frame_rejects_out_of_range_standard_id() {
        let mut frame = GimFrame::new_standard(0x0A, &[0x91]);
        frame.id = 0x800;
        assert!(matches!(to_can_frame(&frame), Err(CanError::Device(_))));
    }

    #[test]
    fn test_open_missing_interface_fails() {
        let result = SocketCanAdapter::new("gimnotthere0");
        assert!(matches!(result, Err(CanError::Device(_))));
    }
}
