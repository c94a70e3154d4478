//! CAN ID、操作码与指标 ID 常量定义

/// 电机默认 CAN ID
pub const DEFAULT_MOTOR_CAN_ID: u16 = 0x0A;

/// 安全节点（限位开关控制器）使用的固定 CAN ID
pub const ID_SAFETY: u32 = 0x005;

/// 默认安全节点设备 ID
pub const DEFAULT_SAFETY_DEVICE_ID: u8 = 0x01;

/// 默认 CAN 接口
pub const DEFAULT_INTERFACE: &str = "can0";

/// 默认总线速率（bps）
pub const DEFAULT_BITRATE: u32 = 500_000;

/// 电机命令操作码（Byte 0）
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, num_enum::TryFromPrimitive, num_enum::IntoPrimitive,
)]
#[repr(u8)]
pub enum Opcode {
    /// 刷新配置（使修改后的配置生效）
    RefreshConfiguration = 0x82,
    /// 修改配置寄存器
    ModifyConfiguration = 0x83,
    /// 启动电机（使能）
    StartMotor = 0x91,
    /// 停止电机（失能）
    StopMotor = 0x92,
    /// 力矩控制
    TorqueControl = 0x93,
    /// 速度控制
    VelocityControl = 0x94,
    /// 位置控制
    PositionControl = 0x95,
    /// 停止当前控制（保持使能）
    StopControl = 0x97,
    /// 读取指标
    RetrieveIndicator = 0xB4,
}

/// 可读取的指标 ID
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, num_enum::TryFromPrimitive, num_enum::IntoPrimitive,
)]
#[repr(u8)]
pub enum IndicatorId {
    /// 输出轴机械角度（rad）
    ShaftAngle = 0x13,
    /// 输出轴转速（rad/s）
    ShaftSpeed = 0x14,
}

/// 配置寄存器：零位
pub const CONFIG_ID_ZERO_POSITION: u8 = 0x14;

/// 是否为安全节点帧 ID
pub fn is_safety_id(id: u32) -> bool {
    id == ID_SAFETY
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_conversion() {
        assert_eq!(Opcode::try_from(0x95).unwrap(), Opcode::PositionControl);
        assert_eq!(u8::from(Opcode::RetrieveIndicator), 0xB4);
        assert!(Opcode::try_from(0x00).is_err());
    }

    #[test]
    fn test_indicator_ids() {
        assert_eq!(u8::from(IndicatorId::ShaftAngle), 0x13);
        assert_eq!(IndicatorId::try_from(0x14).unwrap(), IndicatorId::ShaftSpeed);
    }

    #[test]
    fn test_is_safety_id() {
        assert!(is_safety_id(0x005));
        assert!(!is_safety_id(DEFAULT_MOTOR_CAN_ID as u32));
    }
}
