//! 反馈帧解析
//!
//! 电机对控制命令的应答为固定 8 字节反馈帧：
//!
//! | Byte | 内容 |
//! |------|------|
//! | 0 | 命令回显 |
//! | 1 | 结果码 |
//! | 2 | 温度（`i8`，°C） |
//! | 3-4 | 位置，小端 `u16` |
//! | 5 | 速度高 8 位 |
//! | 6 | 高 4 位：速度低 4 位；低 4 位：力矩高 4 位 |
//! | 7 | 力矩低 8 位 |
//!
//! 解码是纯函数，不检查结果码；需要时调用 [`MotorFeedback::check_result`]，
//! 这样即使在故障帧上也能查看原始遥测。

use crate::{FRAME_LEN, GimFrame, Opcode, ProtocolError, bytes_to_f32_le, expect_full_frame};
use bilge::prelude::*;

/// 位置量程（rad）
pub const POSITION_RANGE_RAD: f64 = 25.0;
/// 位置最小值（rad）
pub const POSITION_MIN_RAD: f64 = -12.5;
/// 速度量程（rad/s）
pub const SPEED_RANGE_RADS: f64 = 130.0;
/// 速度最小值（rad/s）
pub const SPEED_MIN_RADS: f64 = -65.0;
/// 力矩电流量程（A）
pub const TORQUE_RANGE_A: f64 = 450.0;
/// 力矩电流最小值（A）
pub const TORQUE_MIN_A: f64 = -225.0;

const RAW16_MAX: f64 = 65535.0;
const RAW12_MAX: f64 = 4095.0;

/// 结果码（Byte 1）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, num_enum::FromPrimitive)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum ResultCode {
    Success = 0x00,
    Fail = 0x01,
    UnknownCommand = 0x02,
    UnknownId = 0x03,
    ReadOnlyRegister = 0x04,
    UnknownRegister = 0x05,
    StringFormatError = 0x06,
    DataFormatError = 0x07,
    WriteOnlyRegister = 0x0B,
    NotConnected = 0x80,
    /// 协议未定义的结果码
    #[num_enum(catch_all)]
    Unknown(u8),
}

impl ResultCode {
    /// 原始结果码
    pub fn code(self) -> u8 {
        match self {
            ResultCode::Success => 0x00,
            ResultCode::Fail => 0x01,
            ResultCode::UnknownCommand => 0x02,
            ResultCode::UnknownId => 0x03,
            ResultCode::ReadOnlyRegister => 0x04,
            ResultCode::UnknownRegister => 0x05,
            ResultCode::StringFormatError => 0x06,
            ResultCode::DataFormatError => 0x07,
            ResultCode::WriteOnlyRegister => 0x0B,
            ResultCode::NotConnected => 0x80,
            ResultCode::Unknown(code) => code,
        }
    }

    /// 人类可读的分类
    pub fn description(self) -> &'static str {
        match self {
            ResultCode::Success => "Success",
            ResultCode::Fail => "Fail",
            ResultCode::UnknownCommand => "Unknown Command",
            ResultCode::UnknownId => "Unknown ID",
            ResultCode::ReadOnlyRegister => "Read-Only Register",
            ResultCode::UnknownRegister => "Unknown Register",
            ResultCode::StringFormatError => "String Format Error",
            ResultCode::DataFormatError => "Data Format Error",
            ResultCode::WriteOnlyRegister => "Write-Only Register",
            ResultCode::NotConnected => "Not Connected",
            ResultCode::Unknown(_) => "Unknown Error",
        }
    }

    pub fn is_success(self) -> bool {
        self == ResultCode::Success
    }

    /// 成功返回 `Ok(())`，否则返回 `DeviceFault`
    pub fn check(self) -> Result<(), ProtocolError> {
        if self.is_success() {
            Ok(())
        } else {
            Err(ProtocolError::DeviceFault { code: self })
        }
    }
}

/// Byte 6 位域（两个 12 位字段共享的字节）
///
/// bilge 使用 LSB first 位序：第一个字段占 Bit 0-3。
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy)]
pub struct SpeedTorqueNibbles {
    /// Bit 0-3: 力矩高 4 位
    pub torque_high: u4,
    /// Bit 4-7: 速度低 4 位
    pub speed_low: u4,
}

/// 力矩换算参数
///
/// `torque_nm = torque_current_a * torque_constant * gear_ratio`
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TorqueScale {
    /// 力矩常数 KT（N·m/A）
    pub torque_constant: f64,
    /// 减速比
    pub gear_ratio: f64,
}

impl Default for TorqueScale {
    fn default() -> Self {
        Self {
            torque_constant: 1.0,
            gear_ratio: 1.0,
        }
    }
}

impl TorqueScale {
    pub fn torque_nm(&self, current_a: f64) -> f64 {
        current_a * self.torque_constant * self.gear_ratio
    }
}

/// 电机反馈帧（原始量化值）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotorFeedback {
    /// 命令回显（Byte 0）
    pub command_echo: u8,
    /// 结果码（Byte 1）
    pub result: ResultCode,
    /// 温度（Byte 2）
    pub temperature_c: i8,
    /// 位置原始值（Byte 3-4）
    pub position_raw: u16,
    /// 速度原始值（12 位）
    pub speed_raw: u16,
    /// 力矩电流原始值（12 位）
    pub torque_raw: u16,
}

impl MotorFeedback {
    /// 从 8 字节负载解码（长度必须严格为 8）
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        let data = expect_full_frame(data)?;

        let nibbles = SpeedTorqueNibbles::from(u8::new(data[6]));
        let speed_raw = ((data[5] as u16) << 4) | nibbles.speed_low().value() as u16;
        let torque_raw = ((nibbles.torque_high().value() as u16) << 8) | data[7] as u16;

        Ok(Self {
            command_echo: data[0],
            result: ResultCode::from(data[1]),
            temperature_c: data[2] as i8,
            position_raw: u16::from_le_bytes([data[3], data[4]]),
            speed_raw,
            torque_raw,
        })
    }

    /// 由物理量量化构造（超出量程的值饱和到端点）
    ///
    /// 主要用于仿真电机和回环测试。
    pub fn from_physical(
        command_echo: u8,
        result: ResultCode,
        temperature_c: i8,
        position_rad: f64,
        speed_rads: f64,
        torque_current_a: f64,
    ) -> Self {
        Self {
            command_echo,
            result,
            temperature_c,
            position_raw: quantize(position_rad, POSITION_MIN_RAD, POSITION_RANGE_RAD, RAW16_MAX),
            speed_raw: quantize(speed_rads, SPEED_MIN_RADS, SPEED_RANGE_RADS, RAW12_MAX),
            torque_raw: quantize(torque_current_a, TORQUE_MIN_A, TORQUE_RANGE_A, RAW12_MAX),
        }
    }

    /// 编码为 8 字节负载
    pub fn encode(&self) -> [u8; 8] {
        let speed = self.speed_raw & 0x0FFF;
        let torque = self.torque_raw & 0x0FFF;
        let nibbles = SpeedTorqueNibbles::new(
            u4::new((torque >> 8) as u8),
            u4::new((speed & 0x0F) as u8),
        );
        let position = self.position_raw.to_le_bytes();

        [
            self.command_echo,
            self.result.code(),
            self.temperature_c as u8,
            position[0],
            position[1],
            (speed >> 4) as u8,
            u8::from(nibbles),
            (torque & 0xFF) as u8,
        ]
    }

    pub fn position_rad(&self) -> f64 {
        self.position_raw as f64 * POSITION_RANGE_RAD / RAW16_MAX + POSITION_MIN_RAD
    }

    pub fn speed_rads(&self) -> f64 {
        self.speed_raw as f64 * SPEED_RANGE_RADS / RAW12_MAX + SPEED_MIN_RADS
    }

    pub fn torque_current_a(&self) -> f64 {
        self.torque_raw as f64 * TORQUE_RANGE_A / RAW12_MAX + TORQUE_MIN_A
    }

    /// 检查结果码，非成功时返回 `DeviceFault`
    pub fn check_result(self) -> Result<Self, ProtocolError> {
        self.result.check().map(|_| self)
    }

    /// 转换为物理量状态
    pub fn to_status(&self, scale: TorqueScale) -> MotorStatus {
        let torque_current_a = self.torque_current_a();
        MotorStatus {
            command_echo: self.command_echo,
            result: self.result,
            temperature_c: self.temperature_c,
            position_rad: self.position_rad(),
            speed_rads: self.speed_rads(),
            torque_nm: scale.torque_nm(torque_current_a),
            torque_current_a,
        }
    }
}

impl TryFrom<GimFrame> for MotorFeedback {
    type Error = ProtocolError;

    fn try_from(frame: GimFrame) -> Result<Self, Self::Error> {
        Self::parse(frame.data_slice())
    }
}

fn quantize(value: f64, min: f64, range: f64, max_raw: f64) -> u16 {
    ((value - min) * max_raw / range).round().clamp(0.0, max_raw) as u16
}

/// 电机状态（物理量）
///
/// 每个反馈帧或每次指标轮询生成一个，构造后不可变。
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MotorStatus {
    pub command_echo: u8,
    pub result: ResultCode,
    /// 温度（°C）
    pub temperature_c: i8,
    /// 位置（rad，绝对值）
    pub position_rad: f64,
    /// 速度（rad/s）
    pub speed_rads: f64,
    /// 输出轴力矩（N·m）
    pub torque_nm: f64,
    /// 力矩电流（A）
    pub torque_current_a: f64,
}

impl MotorStatus {
    /// 由指标轮询结果构造
    ///
    /// 指标通道不提供温度和力矩，按 0 填充。
    pub fn from_indicators(position_rad: f64, speed_rads: f64) -> Self {
        Self {
            command_echo: Opcode::RetrieveIndicator.into(),
            result: ResultCode::Success,
            temperature_c: 0,
            position_rad,
            speed_rads,
            torque_nm: 0.0,
            torque_current_a: 0.0,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.result.is_success()
    }
}

/// 指标读取应答
///
/// | Byte | 内容 |
/// |------|------|
/// | 0 | 0xB4 回显 |
/// | 1 | 指标 ID |
/// | 2 | 结果码 |
/// | 3 | 保留 |
/// | 4-7 | 小端 `f32` 指标值 |
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorReply {
    pub indicator: u8,
    pub result: ResultCode,
    pub value: f32,
}

impl IndicatorReply {
    /// 解析指标应答；回显不是 0xB4 的帧不是指标应答
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        if data.len() != FRAME_LEN {
            return Err(ProtocolError::InvalidLength {
                expected: FRAME_LEN,
                actual: data.len(),
            });
        }
        if data[0] != u8::from(Opcode::RetrieveIndicator) {
            return Err(ProtocolError::InvalidValue {
                field: "command_echo".to_string(),
                value: data[0],
            });
        }

        Ok(Self {
            indicator: data[1],
            result: ResultCode::from(data[2]),
            value: bytes_to_f32_le([data[4], data[5], data[6], data[7]]),
        })
    }

    /// 编码为 8 字节负载（仿真电机使用）
    pub fn encode(&self) -> [u8; 8] {
        let value = self.value.to_le_bytes();
        [
            Opcode::RetrieveIndicator.into(),
            self.indicator,
            self.result.code(),
            0,
            value[0],
            value[1],
            value[2],
            value[3],
        ]
    }

    pub fn is_for(&self, indicator: crate::IndicatorId) -> bool {
        self.indicator == u8::from(indicator)
    }
}

impl TryFrom<GimFrame> for IndicatorReply {
    type Error = ProtocolError;

    fn try_from(frame: GimFrame) -> Result<Self, Self::Error> {
        Self::parse(frame.data_slice())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::IndicatorId;

    #[test]
    fn test_known_vector_decodes_to_negative_extremes() {
        let fb = MotorFeedback::parse(&[0x95, 0x00, 0x32, 0x00, 0x00, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(fb.command_echo, 0x95);
        assert_eq!(fb.result, ResultCode::Success);
        assert_eq!(fb.temperature_c, 50);
        assert_eq!(fb.position_rad(), -12.5);
        assert_eq!(fb.speed_rads(), -65.0);
        assert_eq!(fb.torque_current_a(), -225.0);
    }

    #[test]
    fn test_packed_nibbles() {
        // speed12 = 0xABC, torque12 = 0xDEF
        let fb = MotorFeedback::parse(&[0x94, 0, 0, 0, 0, 0xAB, 0xCD, 0xEF]).unwrap();
        assert_eq!(fb.speed_raw, 0xABC);
        assert_eq!(fb.torque_raw, 0xDEF);
        assert_eq!(fb.encode(), [0x94, 0, 0, 0, 0, 0xAB, 0xCD, 0xEF]);
    }

    #[test]
    fn test_all_ones_map_to_positive_extremes() {
        let fb = MotorFeedback::parse(&[0x95, 0, 0, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF]).unwrap();
        assert!((fb.position_rad() - 12.5).abs() < 1e-12);
        assert!((fb.speed_rads() - 65.0).abs() < 1e-12);
        assert!((fb.torque_current_a() - 225.0).abs() < 1e-12);
    }

    #[test]
    fn test_negative_temperature() {
        let fb = MotorFeedback::parse(&[0x95, 0, 0xF6, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(fb.temperature_c, -10);
    }

    #[test]
    fn test_rejects_wrong_length() {
        assert_eq!(
            MotorFeedback::parse(&[0x95, 0, 0, 0, 0, 0, 0]).unwrap_err(),
            ProtocolError::InvalidLength {
                expected: 8,
                actual: 7
            }
        );
        assert!(MotorFeedback::parse(&[0u8; 9]).is_err());
    }

    #[test]
    fn test_decode_does_not_check_result() {
        let fb = MotorFeedback::parse(&[0x95, 0x03, 0, 0, 0x80, 0x80, 0, 0]).unwrap();
        assert_eq!(fb.result, ResultCode::UnknownId);
        assert!(fb.position_rad() > 0.0);
        assert_eq!(
            fb.check_result().unwrap_err(),
            ProtocolError::DeviceFault {
                code: ResultCode::UnknownId
            }
        );
    }

    #[test]
    fn test_torque_scale() {
        let fb = MotorFeedback::from_physical(0x93, ResultCode::Success, 25, 0.0, 0.0, 10.0);
        let status = fb.to_status(TorqueScale {
            torque_constant: 0.5,
            gear_ratio: 36.0,
        });
        let expected = status.torque_current_a * 0.5 * 36.0;
        assert!((status.torque_nm - expected).abs() < 1e-9);
        assert!((status.torque_current_a - 10.0).abs() < 450.0 / 4095.0);
    }

    #[test]
    fn test_from_physical_saturates() {
        let fb = MotorFeedback::from_physical(0x95, ResultCode::Success, 0, 100.0, -100.0, 0.0);
        assert_eq!(fb.position_raw, u16::MAX);
        assert_eq!(fb.speed_raw, 0);
    }

    #[test]
    fn test_result_codes() {
        assert_eq!(ResultCode::from(0x0B), ResultCode::WriteOnlyRegister);
        assert_eq!(ResultCode::from(0x42), ResultCode::Unknown(0x42));
        assert_eq!(ResultCode::Unknown(0x42).code(), 0x42);
        assert_eq!(ResultCode::from(0x06).description(), "String Format Error");
        assert_eq!(ResultCode::from(0x42).description(), "Unknown Error");
        assert!(ResultCode::Success.check().is_ok());
    }

    #[test]
    fn test_indicator_reply() {
        let reply = IndicatorReply {
            indicator: 0x13,
            result: ResultCode::Success,
            value: -1.5,
        };
        let parsed = IndicatorReply::parse(&reply.encode()).unwrap();
        assert_eq!(parsed, reply);
        assert!(parsed.is_for(IndicatorId::ShaftAngle));
        assert!(!parsed.is_for(IndicatorId::ShaftSpeed));
    }

    #[test]
    fn test_indicator_reply_rejects_other_echo() {
        assert!(matches!(
            IndicatorReply::parse(&[0x95, 0x13, 0, 0, 0, 0, 0, 0]),
            Err(ProtocolError::InvalidValue { value: 0x95, .. })
        ));
    }

    #[test]
    fn test_status_from_indicators() {
        let status = MotorStatus::from_indicators(0.25, -1.0);
        assert_eq!(status.command_echo, 0xB4);
        assert_eq!(status.temperature_c, 0);
        assert_eq!(status.torque_nm, 0.0);
        assert!(status.is_ok());
    }
}
