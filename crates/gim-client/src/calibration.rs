//! 自动限位标定
//!
//! 状态机：
//!
//! ```text
//! SEEK_MIN -> STOP_MIN -> SEEK_MAX -> STOP_MAX -> RECENTER -> DONE
//!     \__________\___________\__________\___________\-----> FAILED
//! ```
//!
//! 负方向匀速转动直到最小侧接近开关触发，停机读位置；再正方向找最大侧。
//! 两个位置各向内收缩 [`SAFETY_SHIFT_RAD`] 后取中点作为新零点，半宽作为对称限位。
//!
//! 搜索过程中的硬限位事件只记录告警，不推进也不结束阶段。
//!
//! 总线交互通过 [`CalibrationPort`] 完成，状态机本身不持有电机。

use crate::error::{CalibrationError, GimError};
use crate::limits::SAFETY_SHIFT_RAD;
use gim_protocol::{LimitSide, SafetyEvent, SafetyStatus};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// 标定阶段
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CalibrationPhase {
    SeekMin,
    StopMin,
    SeekMax,
    StopMax,
    Recenter,
    Done,
    Failed,
}

impl CalibrationPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, CalibrationPhase::Done | CalibrationPhase::Failed)
    }
}

impl fmt::Display for CalibrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CalibrationPhase::SeekMin => "SEEK_MIN",
            CalibrationPhase::StopMin => "STOP_MIN",
            CalibrationPhase::SeekMax => "SEEK_MAX",
            CalibrationPhase::StopMax => "STOP_MAX",
            CalibrationPhase::Recenter => "RECENTER",
            CalibrationPhase::Done => "DONE",
            CalibrationPhase::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// 标定参数
#[derive(Debug, Clone)]
pub struct CalibrationConfig {
    /// 搜索速度（rad/s），`None` 使用标定状态中保存的速度
    pub search_speed: Option<f64>,
    /// 每个搜索阶段的超时（默认 60s）
    pub phase_timeout: Duration,
    /// 等待限位事件的轮询间隔（默认 50ms）
    pub event_poll: Duration,
    /// 启动或下发速度后的等待
    pub start_settle: Duration,
    /// 停机后读位置前的等待
    pub stop_settle: Duration,
    pub position_timeout: Duration,
    /// 首次读位置无应答时，重试前的等待
    pub retry_delay: Duration,
    pub retry_position_timeout: Duration,
    /// 找到最小侧后、反向前的等待
    pub reverse_delay: Duration,
    pub center_start_settle: Duration,
    /// 回中位置命令的执行时间（ms）
    pub center_move_duration_ms: u32,
    /// 回中后等待运动完成
    pub center_settle: Duration,
    /// 搜索进度日志间隔
    pub progress_interval: Duration,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            search_speed: None,
            phase_timeout: Duration::from_secs(60),
            event_poll: Duration::from_millis(50),
            start_settle: Duration::from_millis(100),
            stop_settle: Duration::from_millis(200),
            position_timeout: Duration::from_secs(1),
            retry_delay: Duration::from_millis(500),
            retry_position_timeout: Duration::from_secs(2),
            reverse_delay: Duration::from_millis(500),
            center_start_settle: Duration::from_millis(50),
            center_move_duration_ms: 100,
            center_settle: Duration::from_millis(2500),
            progress_interval: Duration::from_secs(5),
        }
    }
}

impl CalibrationConfig {
    /// 去掉所有机械等待（仿真总线使用）
    pub fn simulated() -> Self {
        Self {
            event_poll: Duration::from_millis(5),
            start_settle: Duration::ZERO,
            stop_settle: Duration::ZERO,
            position_timeout: Duration::from_millis(200),
            retry_delay: Duration::ZERO,
            retry_position_timeout: Duration::from_millis(200),
            reverse_delay: Duration::ZERO,
            center_start_settle: Duration::ZERO,
            center_settle: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// 标定结果
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationOutcome {
    /// 最小侧接近开关的绝对位置
    pub min_abs: f64,
    /// 最大侧接近开关的绝对位置
    pub max_abs: f64,
    /// 新偏移（收缩后区间的中点）
    pub offset: f64,
    pub min_limit: f64,
    pub max_limit: f64,
    /// 接近开关相对新零点的位置
    pub border_min: f64,
    pub border_max: f64,
}

impl CalibrationOutcome {
    /// 由两个接近开关位置计算偏移与限位
    ///
    /// 要求收缩后区间非空，否则返回 `InconsistentLimits`。
    pub fn from_approach_positions(
        min_abs: f64,
        max_abs: f64,
        shift: f64,
    ) -> Result<Self, CalibrationError> {
        let inconsistent = CalibrationError::InconsistentLimits { min_abs, max_abs };
        if !(min_abs.is_finite() && max_abs.is_finite()) || min_abs >= max_abs {
            return Err(inconsistent);
        }

        let lo = min_abs + shift;
        let hi = max_abs - shift;
        if lo >= hi {
            return Err(inconsistent);
        }

        let offset = (lo + hi) / 2.0;
        let half_range = (hi - lo) / 2.0;
        Ok(Self {
            min_abs,
            max_abs,
            offset,
            min_limit: -half_range,
            max_limit: half_range,
            border_min: min_abs - offset,
            border_max: max_abs - offset,
        })
    }
}

/// 标定所需的总线操作
pub trait CalibrationPort {
    fn start_motor(&mut self) -> Result<(), GimError>;

    fn stop_motor(&mut self) -> Result<(), GimError>;

    /// 持续速度命令
    fn send_velocity(&mut self, speed_rads: f64) -> Result<(), GimError>;

    /// 绝对位置命令（不经限位裁剪）
    fn move_to_absolute(&mut self, position_rad: f64, duration_ms: u32) -> Result<(), GimError>;

    /// 读取绝对位置，无应答返回 `Ok(None)`
    fn read_position(&mut self, timeout: Duration) -> Result<Option<f64>, GimError>;

    /// 等待下一个本设备的限位事件
    fn next_safety_event(&mut self, timeout: Duration) -> Option<SafetyEvent>;

    fn pause(&mut self, duration: Duration);

    /// 应用并持久化结果
    fn commit(&mut self, outcome: &CalibrationOutcome) -> Result<(), GimError>;
}

/// 限位标定状态机
#[derive(Debug)]
pub struct LimitFinder {
    config: CalibrationConfig,
    search_speed: f64,
    phase: CalibrationPhase,
    history: Vec<CalibrationPhase>,
}

impl LimitFinder {
    /// `default_speed` 在配置未指定速度时使用
    pub fn new(config: CalibrationConfig, default_speed: f64) -> Self {
        let search_speed = config.search_speed.unwrap_or(default_speed).abs();
        Self {
            config,
            search_speed,
            phase: CalibrationPhase::SeekMin,
            history: Vec::new(),
        }
    }

    pub fn phase(&self) -> CalibrationPhase {
        self.phase
    }

    /// 已进入过的阶段（按顺序）
    pub fn history(&self) -> &[CalibrationPhase] {
        &self.history
    }

    pub fn search_speed(&self) -> f64 {
        self.search_speed
    }

    /// 执行完整标定
    ///
    /// 失败时进入 `FAILED` 并尽力停机，然后返回错误。
    pub fn run<P: CalibrationPort>(
        &mut self,
        port: &mut P,
    ) -> Result<CalibrationOutcome, CalibrationError> {
        match self.run_phases(port) {
            Ok(outcome) => {
                self.enter(CalibrationPhase::Done);
                info!(
                    "Calibration done: offset {:.4} rad, limits {:.2}°..{:.2}°",
                    outcome.offset,
                    outcome.min_limit.to_degrees(),
                    outcome.max_limit.to_degrees()
                );
                Ok(outcome)
            },
            Err(e) => {
                error!("Calibration failed in {}: {}", self.phase, e);
                self.enter(CalibrationPhase::Failed);
                if let Err(stop_err) = port.stop_motor() {
                    error!("Stop after failed calibration also failed: {}", stop_err);
                }
                Err(e)
            },
        }
    }

    fn run_phases<P: CalibrationPort>(
        &mut self,
        port: &mut P,
    ) -> Result<CalibrationOutcome, CalibrationError> {
        let speed = self.search_speed;

        self.enter(CalibrationPhase::SeekMin);
        self.step(port, |p| p.start_motor())?;
        self.step(port, |p| p.send_velocity(-speed))?;
        port.pause(self.config.start_settle);
        self.wait_for_approach(port, LimitSide::Min)?;

        self.enter(CalibrationPhase::StopMin);
        let min_abs = self.stop_and_read(port)?;
        info!("Min approach switch at {:.4} rad", min_abs);
        port.pause(self.config.reverse_delay);

        self.enter(CalibrationPhase::SeekMax);
        self.step(port, |p| p.start_motor())?;
        port.pause(self.config.start_settle);
        self.step(port, |p| p.send_velocity(speed))?;
        self.wait_for_approach(port, LimitSide::Max)?;

        self.enter(CalibrationPhase::StopMax);
        let max_abs = self.stop_and_read(port)?;
        info!("Max approach switch at {:.4} rad", max_abs);

        self.enter(CalibrationPhase::Recenter);
        let outcome = CalibrationOutcome::from_approach_positions(min_abs, max_abs, SAFETY_SHIFT_RAD)?;
        self.step(port, |p| p.commit(&outcome))?;
        if let Err(e) = move_to_center(port, &outcome, &self.config) {
            warn!("Could not move to center after calibration: {}", e);
        }
        Ok(outcome)
    }

    fn enter(&mut self, phase: CalibrationPhase) {
        debug!("Calibration phase {}", phase);
        self.phase = phase;
        self.history.push(phase);
    }

    fn step<P, F>(&self, port: &mut P, action: F) -> Result<(), CalibrationError>
    where
        F: FnOnce(&mut P) -> Result<(), GimError>,
    {
        action(port).map_err(|e| self.interrupted(e))
    }

    fn interrupted(&self, source: GimError) -> CalibrationError {
        CalibrationError::Interrupted {
            phase: self.phase,
            source: Box::new(source),
        }
    }

    fn wait_for_approach<P: CalibrationPort>(
        &self,
        port: &mut P,
        side: LimitSide,
    ) -> Result<(), CalibrationError> {
        let target = SafetyStatus::approach(side);
        let timeout = self.config.phase_timeout;
        let started = Instant::now();
        let mut last_progress = started;

        loop {
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(CalibrationError::PhaseTimeout {
                    phase: self.phase,
                    timeout,
                });
            }

            if let Some(event) = port.next_safety_event(self.config.event_poll.min(timeout - elapsed)) {
                if event.status == target {
                    info!(
                        "{:?} detected after {:.1}s",
                        target,
                        started.elapsed().as_secs_f64()
                    );
                    return Ok(());
                }
                if event.status.is_hard_stop() {
                    warn!("Border limit {:?} reached while seeking, continuing", event.status);
                } else {
                    debug!("Ignored {:?} while waiting for {:?}", event.status, target);
                }
            }

            if last_progress.elapsed() >= self.config.progress_interval {
                info!(
                    "Still searching for {:?} ({:.1}s elapsed)",
                    target,
                    started.elapsed().as_secs_f64()
                );
                last_progress = Instant::now();
            }
        }
    }

    /// 停机、等待，然后读位置（无应答时重试一次）
    fn stop_and_read<P: CalibrationPort>(&self, port: &mut P) -> Result<f64, CalibrationError> {
        self.step(port, |p| p.stop_motor())?;
        port.pause(self.config.stop_settle);

        let first = port
            .read_position(self.config.position_timeout)
            .map_err(|e| self.interrupted(e))?;
        if let Some(position) = first {
            return Ok(position);
        }

        warn!("No position reply after stopping, retrying");
        port.pause(self.config.retry_delay);
        port.read_position(self.config.retry_position_timeout)
            .map_err(|e| self.interrupted(e))?
            .ok_or(CalibrationError::PositionUnavailable { phase: self.phase })
    }
}

fn move_to_center<P: CalibrationPort>(
    port: &mut P,
    outcome: &CalibrationOutcome,
    config: &CalibrationConfig,
) -> Result<(), GimError> {
    port.start_motor()?;
    port.pause(config.center_start_settle);
    if let Err(e) = port.move_to_absolute(outcome.offset, config.center_move_duration_ms) {
        if let Err(stop) = port.stop_motor() {
            warn!("Stop after failed center move: {}", stop);
        }
        return Err(e);
    }
    port.pause(config.center_settle);
    port.stop_motor()
}
