//! # GIM Protocol
//!
//! GIM8115 关节电机 CAN 总线协议定义（无硬件依赖）
//!
//! ## 模块
//!
//! - `ids`: CAN ID、操作码与指标 ID 常量
//! - `control`: 控制帧构建与解析
//! - `feedback`: 反馈帧、指标应答解析
//! - `safety`: 安全节点（限位开关）帧解析
//!
//! ## 字节序
//!
//! 与 Piper 系列不同，GIM8115 协议使用 Intel (LSB) 低位在前（小端字节序）：
//! 浮点负载为小端 `f32`，持续时间为小端 24 位无符号整数。

pub mod control;
pub mod feedback;
pub mod ids;
pub mod safety;

pub use control::*;
pub use feedback::*;
pub use ids::*;
pub use safety::*;

use thiserror::Error;

/// 协议帧固定长度（CAN 2.0 经典帧）
pub const FRAME_LEN: usize = 8;

/// CAN 2.0 标准帧的统一抽象
///
/// 协议层和硬件层之间的中间类型：协议层通过 `TryFrom<GimFrame>` 解析、
/// 通过 `to_frame()` 构建；CAN 层负责与 SocketCAN 帧互相转换。
///
/// ```rust
/// use gim_protocol::GimFrame;
///
/// let frame = GimFrame::new_standard(0x0A, &[0x91]);
/// assert_eq!(frame.id(), 0x0A);
/// assert_eq!(frame.data_slice(), &[0x91]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GimFrame {
    /// CAN ID（标准帧或扩展帧）
    pub id: u32,

    /// 帧数据（固定 8 字节，未使用部分为 0）
    pub data: [u8; 8],

    /// 有效数据长度 (0-8)
    pub len: u8,

    /// 是否为扩展帧（29-bit ID）
    pub is_extended: bool,

    /// 接收时间戳（微秒），0 表示不可用
    pub timestamp_us: u64,
}

impl GimFrame {
    /// 创建标准帧
    pub fn new_standard(id: u16, data: &[u8]) -> Self {
        Self::new(id as u32, data, false)
    }

    /// 创建扩展帧
    pub fn new_extended(id: u32, data: &[u8]) -> Self {
        Self::new(id, data, true)
    }

    fn new(id: u32, data: &[u8], is_extended: bool) -> Self {
        let mut fixed_data = [0u8; 8];
        let len = data.len().min(FRAME_LEN);
        fixed_data[..len].copy_from_slice(&data[..len]);

        Self {
            id,
            data: fixed_data,
            len: len as u8,
            is_extended,
            timestamp_us: 0,
        }
    }

    /// 获取数据切片（只包含有效数据）
    pub fn data_slice(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// 获取 CAN ID
    pub fn id(&self) -> u32 {
        self.id
    }

    /// 获取完整数据（8字节固定数组）
    pub fn data(&self) -> &[u8; 8] {
        &self.data
    }
}

/// 协议解析错误类型
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Invalid CAN ID: 0x{id:X}")]
    InvalidCanId { id: u32 },

    #[error("Unknown opcode: 0x{opcode:02X}")]
    UnknownOpcode { opcode: u8 },

    #[error("Invalid value for field {field}: {value}")]
    InvalidValue { field: String, value: u8 },

    /// 电机返回非成功结果码
    #[error("Motor error: {} (0x{:02X})", .code.description(), .code.code())]
    DeviceFault { code: ResultCode },
}

impl ProtocolError {
    /// 是否为电机上报的故障（而非帧格式问题）
    pub fn is_device_fault(&self) -> bool {
        matches!(self, ProtocolError::DeviceFault { .. })
    }
}

/// 校验数据长度严格为 8 字节
pub(crate) fn expect_full_frame(data: &[u8]) -> Result<&[u8; 8], ProtocolError> {
    data.try_into().map_err(|_| ProtocolError::InvalidLength {
        expected: FRAME_LEN,
        actual: data.len(),
    })
}

/// 小端字节序转 f32
pub fn bytes_to_f32_le(bytes: [u8; 4]) -> f32 {
    f32::from_le_bytes(bytes)
}

/// f32 转小端字节序
pub fn f32_to_bytes_le(value: f32) -> [u8; 4] {
    value.to_le_bytes()
}

/// 24 位无符号整数转小端 3 字节
///
/// 超出 24 位的部分被截断，调用方应先饱和到 [`MAX_DURATION_MS`]。
pub fn u24_to_bytes_le(value: u32) -> [u8; 3] {
    let bytes = value.to_le_bytes();
    [bytes[0], bytes[1], bytes[2]]
}

/// 小端 3 字节转 24 位无符号整数
pub fn bytes_to_u24_le(bytes: [u8; 3]) -> u32 {
    u32::from_le_bytes([bytes[0], bytes[1], bytes[2], 0])
}
