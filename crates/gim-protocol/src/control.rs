//! 控制帧构建
//!
//! 所有命令固定编码为 8 字节：
//!
//! | Byte | 内容 |
//! |------|------|
//! | 0 | 操作码 |
//! | 1-4 | 小端 `f32` 负载（力矩 N·m / 速度 rad/s / 绝对位置 rad），或指标 ID（Byte 1） |
//! | 5-7 | 小端 24 位持续时间（ms），0 表示持续执行 |

use crate::{
    FRAME_LEN, GimFrame, IndicatorId, Opcode, ProtocolError, bytes_to_f32_le, bytes_to_u24_le,
    f32_to_bytes_le, u24_to_bytes_le,
};

/// 24 位持续时间字段可表示的最大值（毫秒）
pub const MAX_DURATION_MS: u32 = 0xFF_FFFF;

/// 电机命令
///
/// 每次调用时构造的瞬态值，通过 [`MotorCommand::to_frame`] 序列化。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotorCommand {
    /// 启动电机
    Start,
    /// 停止电机
    Stop,
    /// 停止当前控制
    StopControl,
    /// 刷新配置
    RefreshConfiguration,
    /// 力矩控制（N·m）
    Torque { torque_nm: f32, duration_ms: u32 },
    /// 速度控制（rad/s）
    Velocity { speed_rads: f32, duration_ms: u32 },
    /// 位置控制（绝对位置，rad）
    Position { position_rad: f32, duration_ms: u32 },
    /// 读取指标
    RetrieveIndicator(IndicatorId),
}

impl MotorCommand {
    /// 获取命令操作码
    pub fn opcode(&self) -> Opcode {
        match self {
            MotorCommand::Start => Opcode::StartMotor,
            MotorCommand::Stop => Opcode::StopMotor,
            MotorCommand::StopControl => Opcode::StopControl,
            MotorCommand::RefreshConfiguration => Opcode::RefreshConfiguration,
            MotorCommand::Torque { .. } => Opcode::TorqueControl,
            MotorCommand::Velocity { .. } => Opcode::VelocityControl,
            MotorCommand::Position { .. } => Opcode::PositionControl,
            MotorCommand::RetrieveIndicator(_) => Opcode::RetrieveIndicator,
        }
    }

    /// 编码为 8 字节负载
    ///
    /// 持续时间超过 24 位上限时饱和为 [`MAX_DURATION_MS`]。
    pub fn encode(&self) -> [u8; 8] {
        let mut data = [0u8; 8];
        data[0] = self.opcode().into();

        match *self {
            MotorCommand::Torque {
                torque_nm: value,
                duration_ms,
            }
            | MotorCommand::Velocity {
                speed_rads: value,
                duration_ms,
            }
            | MotorCommand::Position {
                position_rad: value,
                duration_ms,
            } => {
                data[1..5].copy_from_slice(&f32_to_bytes_le(value));
                data[5..8].copy_from_slice(&u24_to_bytes_le(duration_ms.min(MAX_DURATION_MS)));
            },
            MotorCommand::RetrieveIndicator(indicator) => {
                data[1] = indicator.into();
            },
            MotorCommand::Start
            | MotorCommand::Stop
            | MotorCommand::StopControl
            | MotorCommand::RefreshConfiguration => {},
        }

        data
    }

    /// 转换为 CAN 帧（发往指定电机 ID）
    pub fn to_frame(&self, can_id: u16) -> GimFrame {
        GimFrame::new_standard(can_id, &self.encode())
    }

    /// 从 8 字节负载解析命令
    ///
    /// 用于总线抓包与仿真电机；不识别的操作码返回 `UnknownOpcode`。
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() != FRAME_LEN {
            return Err(ProtocolError::InvalidLength {
                expected: FRAME_LEN,
                actual: data.len(),
            });
        }

        let opcode =
            Opcode::try_from(data[0]).map_err(|_| ProtocolError::UnknownOpcode { opcode: data[0] })?;
        let value = bytes_to_f32_le([data[1], data[2], data[3], data[4]]);
        let duration_ms = bytes_to_u24_le([data[5], data[6], data[7]]);

        match opcode {
            Opcode::StartMotor => Ok(MotorCommand::Start),
            Opcode::StopMotor => Ok(MotorCommand::Stop),
            Opcode::StopControl => Ok(MotorCommand::StopControl),
            Opcode::RefreshConfiguration => Ok(MotorCommand::RefreshConfiguration),
            Opcode::TorqueControl => Ok(MotorCommand::Torque {
                torque_nm: value,
                duration_ms,
            }),
            Opcode::VelocityControl => Ok(MotorCommand::Velocity {
                speed_rads: value,
                duration_ms,
            }),
            Opcode::PositionControl => Ok(MotorCommand::Position {
                position_rad: value,
                duration_ms,
            }),
            Opcode::RetrieveIndicator => IndicatorId::try_from(data[1])
                .map(MotorCommand::RetrieveIndicator)
                .map_err(|_| ProtocolError::InvalidValue {
                    field: "indicator_id".to_string(),
                    value: data[1],
                }),
            Opcode::ModifyConfiguration => Err(ProtocolError::UnknownOpcode { opcode: data[0] }),
        }
    }
}

impl TryFrom<GimFrame> for MotorCommand {
    type Error = ProtocolError;

    fn try_from(frame: GimFrame) -> Result<Self, Self::Error> {
        Self::parse(frame.data_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_stop_are_opcode_only() {
        assert_eq!(MotorCommand::Start.encode(), [0x91, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(MotorCommand::Stop.encode(), [0x92, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(MotorCommand::StopControl.encode(), [0x97, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(
            MotorCommand::RefreshConfiguration.encode(),
            [0x82, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_position_layout() {
        let cmd = MotorCommand::Position {
            position_rad: 1.0,
            duration_ms: 500,
        };
        // 1.0f32 = 0x3F800000，500 = 0x0001F4
        assert_eq!(cmd.encode(), [0x95, 0x00, 0x00, 0x80, 0x3F, 0xF4, 0x01, 0x00]);
    }

    #[test]
    fn test_velocity_continuous() {
        let cmd = MotorCommand::Velocity {
            speed_rads: -0.5,
            duration_ms: 0,
        };
        // -0.5f32 = 0xBF000000
        assert_eq!(cmd.encode(), [0x94, 0x00, 0x00, 0x00, 0xBF, 0, 0, 0]);
    }

    #[test]
    fn test_torque_duration_saturates() {
        let cmd = MotorCommand::Torque {
            torque_nm: 0.0,
            duration_ms: 0x0200_0000,
        };
        let data = cmd.encode();
        assert_eq!(data[0], 0x93);
        assert_eq!(&data[5..8], &[0xFF, 0xFF, 0xFF]);
    }

    #[test]
    fn test_retrieve_indicator_layout() {
        let cmd = MotorCommand::RetrieveIndicator(IndicatorId::ShaftAngle);
        assert_eq!(cmd.encode(), [0xB4, 0x13, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_to_frame_uses_motor_id() {
        let frame = MotorCommand::Start.to_frame(0x0A);
        assert_eq!(frame.id, 0x0A);
        assert_eq!(frame.len, 8);
        assert!(!frame.is_extended);
    }

    #[test]
    fn test_parse_position_frame() {
        let frame = MotorCommand::Position {
            position_rad: -0.25,
            duration_ms: 100,
        }
        .to_frame(0x0A);
        let parsed = MotorCommand::try_from(frame).unwrap();
        assert_eq!(
            parsed,
            MotorCommand::Position {
                position_rad: -0.25,
                duration_ms: 100
            }
        );
    }

    #[test]
    fn test_parse_rejects_unknown_opcode_and_short_frames() {
        assert_eq!(
            MotorCommand::parse(&[0x42, 0, 0, 0, 0, 0, 0, 0]).unwrap_err(),
            ProtocolError::UnknownOpcode { opcode: 0x42 }
        );
        assert!(matches!(
            MotorCommand::parse(&[0x91]),
            Err(ProtocolError::InvalidLength { actual: 1, .. })
        ));
        assert!(matches!(
            MotorCommand::parse(&[0xB4, 0x99, 0, 0, 0, 0, 0, 0]),
            Err(ProtocolError::InvalidValue { value: 0x99, .. })
        ));
    }
}
