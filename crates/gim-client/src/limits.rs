//! 位置偏移与限位模型
//!
//! 用户坐标（相对位置）与电机坐标（绝对位置）之间只差一个偏移量：
//!
//! ```text
//! absolute = clamp(relative) + offset
//! relative = absolute - offset
//! ```
//!
//! 限位在相对坐标下定义，始终满足 `min < max`。

use crate::calibration::CalibrationOutcome;
use crate::error::GimError;
use std::f64::consts::PI;
use tracing::warn;

/// 默认限位（±60°）
pub const DEFAULT_LIMIT_RAD: f64 = 60.0 * PI / 180.0;

/// 标定时限位相对于接近开关向内收缩的量（5°）
pub const SAFETY_SHIFT_RAD: f64 = 5.0 * PI / 180.0;

/// 默认限位搜索速度（rad/s）
pub const DEFAULT_SEARCH_SPEED_RADS: f64 = 0.5;

/// 标定状态
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationState {
    /// 映射到逻辑零点的绝对位置（rad）
    pub offset: f64,
    min_limit: f64,
    max_limit: f64,
    pub limits_enabled: bool,
    /// 标定得到的接近开关位置（相对，rad）
    border: Option<(f64, f64)>,
    search_speed: f64,
}

impl Default for CalibrationState {
    fn default() -> Self {
        Self {
            offset: 0.0,
            min_limit: -DEFAULT_LIMIT_RAD,
            max_limit: DEFAULT_LIMIT_RAD,
            limits_enabled: true,
            border: None,
            search_speed: DEFAULT_SEARCH_SPEED_RADS,
        }
    }
}

impl CalibrationState {
    /// 限位开启时把目标裁剪到 `[min, max]`
    pub fn clamp(&self, target: f64) -> f64 {
        if self.limits_enabled {
            target.clamp(self.min_limit, self.max_limit)
        } else {
            target
        }
    }

    pub fn to_absolute(&self, relative: f64) -> f64 {
        self.clamp(relative) + self.offset
    }

    pub fn to_relative(&self, absolute: f64) -> f64 {
        absolute - self.offset
    }

    pub fn limits(&self) -> (f64, f64) {
        (self.min_limit, self.max_limit)
    }

    pub fn min_limit(&self) -> f64 {
        self.min_limit
    }

    pub fn max_limit(&self) -> f64 {
        self.max_limit
    }

    /// 标定得到的接近开关位置（相对），未标定时为 `None`
    pub fn border_limits(&self) -> Option<(f64, f64)> {
        self.border
    }

    pub fn search_speed(&self) -> f64 {
        self.search_speed
    }

    /// 设置限位（rad）
    ///
    /// 校验失败时原限位保持不变。手动设置后清除标定得到的接近开关位置。
    pub fn set_limits(&mut self, min: f64, max: f64) -> Result<(), GimError> {
        if !(min.is_finite() && max.is_finite()) {
            return Err(GimError::validation("limits", "limits must be finite"));
        }
        if min >= max {
            return Err(GimError::validation(
                "limits",
                format!("min ({min:.4} rad) must be less than max ({max:.4} rad)"),
            ));
        }
        self.min_limit = min;
        self.max_limit = max;
        self.border = None;
        Ok(())
    }

    pub fn set_limits_degrees(&mut self, min_deg: f64, max_deg: f64) -> Result<(), GimError> {
        self.set_limits(min_deg.to_radians(), max_deg.to_radians())
    }

    pub fn set_offset(&mut self, offset: f64) -> Result<(), GimError> {
        if !offset.is_finite() {
            return Err(GimError::validation("offset", "offset must be finite"));
        }
        self.offset = offset;
        Ok(())
    }

    pub fn set_search_speed(&mut self, speed_rads: f64) -> Result<(), GimError> {
        if !(speed_rads.is_finite() && speed_rads > 0.0) {
            return Err(GimError::validation(
                "search speed",
                format!("{speed_rads} rad/s is not positive"),
            ));
        }
        self.search_speed = speed_rads;
        Ok(())
    }

    /// 相对位置越限时返回最近的边界
    ///
    /// 限位关闭时总是 `None`。
    pub fn limit_violation(&self, relative: f64) -> Option<f64> {
        if !self.limits_enabled {
            return None;
        }
        if relative < self.min_limit {
            Some(self.min_limit)
        } else if relative > self.max_limit {
            Some(self.max_limit)
        } else {
            None
        }
    }

    /// 应用标定结果（偏移、限位、接近开关位置）
    pub fn apply_calibration(&mut self, outcome: &CalibrationOutcome) {
        self.offset = outcome.offset;
        self.min_limit = outcome.min_limit;
        self.max_limit = outcome.max_limit;
        self.border = Some((outcome.border_min, outcome.border_max));
    }

    /// 由持久化字段恢复
    ///
    /// 无效字段逐个回退到默认值，并记录告警。
    pub fn restore(
        offset: f64,
        min_limit: f64,
        max_limit: f64,
        limits_enabled: bool,
        border: Option<(f64, f64)>,
        search_speed: f64,
    ) -> Self {
        let mut state = Self {
            limits_enabled,
            ..Self::default()
        };
        if state.set_offset(offset).is_err() {
            warn!("Stored offset {} is invalid, using 0", offset);
        }
        if let Err(e) = state.set_limits(min_limit, max_limit) {
            warn!("Stored limits rejected ({}), using ±60°", e);
        }
        if let Err(e) = state.set_search_speed(search_speed) {
            warn!("Stored search speed rejected ({}), using default", e);
        }
        state.border = border.filter(|(lo, hi)| lo.is_finite() && hi.is_finite() && lo < hi);
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_defaults() {
        let state = CalibrationState::default();
        assert_eq!(state.offset, 0.0);
        assert!((state.max_limit() - 60f64.to_radians()).abs() < 1e-12);
        assert!((state.min_limit() + 60f64.to_radians()).abs() < 1e-12);
        assert!(state.limits_enabled);
        assert_eq!(state.border_limits(), None);
        assert_eq!(state.search_speed(), 0.5);
    }

    #[test]
    fn test_clamp_and_offset() {
        let mut state = CalibrationState::default();
        state.set_limits(-1.0, 1.0).unwrap();
        state.set_offset(0.25).unwrap();

        assert_eq!(state.clamp(2.0), 1.0);
        assert_eq!(state.to_absolute(2.0), 1.25);
        assert_eq!(state.to_absolute(-0.5), -0.25);
        assert_eq!(state.to_relative(1.25), 1.0);

        state.limits_enabled = false;
        assert_eq!(state.clamp(2.0), 2.0);
        assert_eq!(state.to_absolute(2.0), 2.25);
    }

    #[test]
    fn test_set_limits_rejects_inverted_range() {
        let mut state = CalibrationState::default();
        let before = state.limits();

        let err = state.set_limits(1.0, 1.0).unwrap_err();
        assert!(matches!(err, GimError::Validation { .. }));
        assert!(state.set_limits(2.0, -2.0).is_err());
        assert!(state.set_limits(f64::NAN, 1.0).is_err());
        assert_eq!(state.limits(), before);
    }

    #[test]
    fn test_manual_limits_clear_border() {
        let mut state = CalibrationState::default();
        let outcome =
            CalibrationOutcome::from_approach_positions(-1.0, 1.0, SAFETY_SHIFT_RAD).unwrap();
        state.apply_calibration(&outcome);
        assert_eq!(state.border_limits(), Some((-1.0, 1.0)));

        // 校验失败不影响接近开关位置
        assert!(state.set_limits(0.5, -0.5).is_err());
        assert_eq!(state.border_limits(), Some((-1.0, 1.0)));

        state.set_limits(-0.5, 0.5).unwrap();
        assert_eq!(state.border_limits(), None);
    }

    #[test]
    fn test_set_limits_degrees() {
        let mut state = CalibrationState::default();
        state.set_limits_degrees(-90.0, 45.0).unwrap();
        assert!((state.min_limit() + PI / 2.0).abs() < 1e-12);
        assert!((state.max_limit() - PI / 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_search_speed_must_be_positive() {
        let mut state = CalibrationState::default();
        assert!(state.set_search_speed(0.0).is_err());
        assert!(state.set_search_speed(-1.0).is_err());
        state.set_search_speed(1.5).unwrap();
        assert_eq!(state.search_speed(), 1.5);
    }

    #[test]
    fn test_limit_violation() {
        let mut state = CalibrationState::default();
        state.set_limits(-1.0, 1.0).unwrap();
        assert_eq!(state.limit_violation(0.0), None);
        assert_eq!(state.limit_violation(1.0), None);
        assert_eq!(state.limit_violation(1.5), Some(1.0));
        assert_eq!(state.limit_violation(-3.0), Some(-1.0));

        state.limits_enabled = false;
        assert_eq!(state.limit_violation(1.5), None);
    }

    #[test]
    fn test_restore_replaces_invalid_fields() {
        let state = CalibrationState::restore(0.3, 1.0, -1.0, false, Some((2.0, 1.0)), -0.5);
        assert_eq!(state.offset, 0.3);
        assert_eq!(state.limits(), CalibrationState::default().limits());
        assert!(!state.limits_enabled);
        assert_eq!(state.border_limits(), None);
        assert_eq!(state.search_speed(), DEFAULT_SEARCH_SPEED_RADS);
    }

    proptest! {
        #[test]
        fn prop_clamp_is_idempotent(
            min in -10.0f64..0.0,
            span in 0.001f64..10.0,
            target in -100.0f64..100.0,
            enabled in any::<bool>(),
        ) {
            let mut state = CalibrationState::default();
            state.set_limits(min, min + span).unwrap();
            state.limits_enabled = enabled;
            let once = state.clamp(target);
            prop_assert_eq!(state.clamp(once), once);
        }

        #[test]
        fn prop_offset_round_trip(
            offset in -10.0f64..10.0,
            target in -1.0f64..1.0,
        ) {
            let mut state = CalibrationState::default();
            state.set_offset(offset).unwrap();
            // 限位内的目标经过往返后不变
            let back = state.to_relative(state.to_absolute(target));
            prop_assert!((back - target).abs() < 1e-9);
        }
    }
}
