//! 安全节点帧解析
//!
//! 安全节点（限位开关控制器）在固定 CAN ID [`ID_SAFETY`] 上发送：
//!
//! - 2 字节负载 `[device_id, status]`：限位事件
//! - 1 字节负载 `[device_id]`：心跳

use crate::{GimFrame, ID_SAFETY, ProtocolError};

/// 限位状态码
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, num_enum::TryFromPrimitive, num_enum::IntoPrimitive,
)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum SafetyStatus {
    /// 最小侧硬限位（边界），触发自动停机
    HardStopMin = 0x10,
    /// 最小侧接近限位（标定标记）
    ApproachMin = 0x11,
    /// 最大侧接近限位（标定标记）
    ApproachMax = 0x12,
    /// 最大侧硬限位（边界），触发自动停机
    HardStopMax = 0x20,
}

/// 限位所在一侧
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LimitSide {
    Min,
    Max,
}

impl SafetyStatus {
    pub fn is_hard_stop(self) -> bool {
        matches!(self, SafetyStatus::HardStopMin | SafetyStatus::HardStopMax)
    }

    pub fn is_approach(self) -> bool {
        matches!(self, SafetyStatus::ApproachMin | SafetyStatus::ApproachMax)
    }

    pub fn side(self) -> LimitSide {
        match self {
            SafetyStatus::HardStopMin | SafetyStatus::ApproachMin => LimitSide::Min,
            SafetyStatus::HardStopMax | SafetyStatus::ApproachMax => LimitSide::Max,
        }
    }

    /// 对应一侧的接近事件
    pub fn approach(side: LimitSide) -> Self {
        match side {
            LimitSide::Min => SafetyStatus::ApproachMin,
            LimitSide::Max => SafetyStatus::ApproachMax,
        }
    }

    /// 对应一侧的硬限位事件
    pub fn hard_stop(side: LimitSide) -> Self {
        match side {
            LimitSide::Min => SafetyStatus::HardStopMin,
            LimitSide::Max => SafetyStatus::HardStopMax,
        }
    }
}

/// 限位事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SafetyEvent {
    pub device_id: u8,
    pub status: SafetyStatus,
}

impl SafetyEvent {
    pub fn new(device_id: u8, status: SafetyStatus) -> Self {
        Self { device_id, status }
    }

    /// 构建事件帧（用于仿真安全节点）
    pub fn to_frame(&self) -> GimFrame {
        GimFrame::new_standard(ID_SAFETY as u16, &[self.device_id, self.status.into()])
    }
}

/// 安全节点帧
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyFrame {
    /// 限位事件
    Event(SafetyEvent),
    /// 心跳（仅设备 ID）
    Heartbeat { device_id: u8 },
}

impl SafetyFrame {
    /// 来源设备 ID
    pub fn device_id(&self) -> u8 {
        match self {
            SafetyFrame::Event(event) => event.device_id,
            SafetyFrame::Heartbeat { device_id } => *device_id,
        }
    }

    /// 构建心跳帧
    pub fn heartbeat_frame(device_id: u8) -> GimFrame {
        GimFrame::new_standard(ID_SAFETY as u16, &[device_id])
    }
}

impl TryFrom<GimFrame> for SafetyFrame {
    type Error = ProtocolError;

    fn try_from(frame: GimFrame) -> Result<Self, Self::Error> {
        if frame.id != ID_SAFETY {
            return Err(ProtocolError::InvalidCanId { id: frame.id });
        }

        match frame.data_slice() {
            [device_id] => Ok(SafetyFrame::Heartbeat {
                device_id: *device_id,
            }),
            [device_id, status, ..] => {
                let status =
                    SafetyStatus::try_from(*status).map_err(|_| ProtocolError::InvalidValue {
                        field: "safety_status".to_string(),
                        value: *status,
                    })?;
                Ok(SafetyFrame::Event(SafetyEvent::new(*device_id, status)))
            },
            [] => Err(ProtocolError::InvalidLength {
                expected: 2,
                actual: 0,
            }),
        }
    }
}
