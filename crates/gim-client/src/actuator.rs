//! 执行器门面
//!
//! `Actuator` 在 `Motor` 之上叠加位置偏移/限位模型、配置持久化、
//! 限位监听、状态监控和自动标定。所有方法都是 `&self`，可以放进 `Arc` 跨线程共享。

use crate::calibration::{CalibrationConfig, CalibrationOutcome, CalibrationPort, LimitFinder};
use crate::error::GimError;
use crate::limits::CalibrationState;
use crate::observer::{SafetyObserver, StatusObserver, StatusSample};
use crate::safety_listener::{SafetyListener, SafetyListenerConfig};
use crate::status_monitor::{StatusMonitor, StatusMonitorConfig, poll_status};
use crate::store::{CalibrationStore, StoredConfig};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use gim_driver::Motor;
use gim_protocol::{IndicatorId, MotorCommand, MotorStatus, SafetyEvent};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// 越限检查读位置的超时
const ENFORCE_READ_TIMEOUT: Duration = Duration::from_millis(500);

/// 设零点读位置的超时
const ZERO_READ_TIMEOUT: Duration = Duration::from_secs(1);

/// GIM8115 执行器
pub struct Actuator {
    motor: Arc<Motor>,
    state: Arc<RwLock<CalibrationState>>,
    store: Arc<dyn CalibrationStore>,
    listener: Mutex<Option<SafetyListener>>,
    monitor: Mutex<Option<StatusMonitor>>,
    listener_config: SafetyListenerConfig,
    monitor_config: StatusMonitorConfig,
}

impl Actuator {
    /// 由电机句柄构造，并从存储加载标定状态
    ///
    /// 存储缺失或损坏时使用默认值。
    pub fn new(
        motor: Motor,
        store: Arc<dyn CalibrationStore>,
        listener_config: SafetyListenerConfig,
        monitor_config: StatusMonitorConfig,
    ) -> Self {
        let state = load_state(store.as_ref(), motor.can_id(), motor.interface());
        Self {
            motor: Arc::new(motor),
            state: Arc::new(RwLock::new(state)),
            store,
            listener: Mutex::new(None),
            monitor: Mutex::new(None),
            listener_config,
            monitor_config,
        }
    }

    pub fn motor(&self) -> &Arc<Motor> {
        &self.motor
    }

    pub fn can_id(&self) -> u16 {
        self.motor.can_id()
    }

    // ---------------------------------------------------------------
    // 运动命令
    // ---------------------------------------------------------------

    pub fn start_motor(&self) -> Result<(), GimError> {
        Ok(self.motor.start_motor()?)
    }

    pub fn stop_motor(&self) -> Result<(), GimError> {
        Ok(self.motor.stop_motor()?)
    }

    /// 停止当前控制
    pub fn stop_control(&self) -> Result<(), GimError> {
        Ok(self.motor.stop_control()?)
    }

    pub fn refresh_configuration(&self) -> Result<(), GimError> {
        Ok(self.motor.refresh_configuration()?)
    }

    /// 速度控制（rad/s），`duration_ms = 0` 表示持续执行
    pub fn send_velocity(&self, speed_rads: f64, duration_ms: u32) -> Result<(), GimError> {
        Ok(self.motor.send_velocity(speed_rads, duration_ms)?)
    }

    /// 力矩控制（N·m）
    pub fn send_torque(&self, torque_nm: f64, duration_ms: u32) -> Result<(), GimError> {
        Ok(self.motor.send_torque(torque_nm, duration_ms)?)
    }

    /// 位置控制（相对位置，rad）
    ///
    /// 限位开启时目标先被裁剪，再加上偏移。
    pub fn send_position(&self, position_rad: f64, duration_ms: u32) -> Result<(), GimError> {
        if !position_rad.is_finite() {
            return Err(GimError::validation("position", "target must be finite"));
        }
        let (clamped, absolute) = {
            let state = self.state.read();
            (state.clamp(position_rad), state.to_absolute(position_rad))
        };
        if clamped != position_rad {
            debug!(
                "Position target {:.4} rad clamped to {:.4} rad",
                position_rad, clamped
            );
        }
        Ok(self.motor.send_position_absolute(absolute, duration_ms)?)
    }

    /// 发送命令并等待反馈帧
    pub fn send_and_receive(
        &self,
        command: &MotorCommand,
        timeout: Duration,
        check_result: bool,
    ) -> Result<MotorStatus, GimError> {
        Ok(self.motor.send_and_receive(command, timeout, check_result)?)
    }

    // ---------------------------------------------------------------
    // 状态读取
    // ---------------------------------------------------------------

    /// 读取绝对位置（rad），无应答返回 `Ok(None)`
    pub fn current_position(&self, timeout: Duration) -> Result<Option<f64>, GimError> {
        let value = self
            .motor
            .retrieve_indicator(IndicatorId::ShaftAngle, timeout)?;
        Ok(value.map(f64::from))
    }

    /// 读取相对位置（rad）
    pub fn current_relative_position(&self, timeout: Duration) -> Result<Option<f64>, GimError> {
        let absolute = self.current_position(timeout)?;
        Ok(absolute.map(|p| self.state.read().to_relative(p)))
    }

    /// 读取速度（rad/s）
    pub fn current_speed(&self, timeout: Duration) -> Result<Option<f64>, GimError> {
        let value = self
            .motor
            .retrieve_indicator(IndicatorId::ShaftSpeed, timeout)?;
        Ok(value.map(f64::from))
    }

    /// 轮询位置与速度组装状态
    pub fn motor_status(&self, timeout: Duration) -> Result<Option<MotorStatus>, GimError> {
        poll_status(&self.motor, timeout, self.monitor_config.request_gap)
    }

    // ---------------------------------------------------------------
    // 偏移与限位
    // ---------------------------------------------------------------

    /// 标定状态快照
    pub fn calibration(&self) -> CalibrationState {
        *self.state.read()
    }

    pub fn position_offset(&self) -> f64 {
        self.state.read().offset
    }

    pub fn position_limits(&self) -> (f64, f64) {
        self.state.read().limits()
    }

    pub fn limits_enabled(&self) -> bool {
        self.state.read().limits_enabled
    }

    /// 标定得到的接近开关位置（相对）
    pub fn border_limits(&self) -> Option<(f64, f64)> {
        self.state.read().border_limits()
    }

    pub fn limit_search_speed(&self) -> f64 {
        self.state.read().search_speed()
    }

    pub fn set_position_offset(&self, offset: f64) -> Result<(), GimError> {
        self.update_state(|state| state.set_offset(offset))
    }

    /// 设置限位（rad），`min >= max` 时返回 `Validation` 且原限位不变
    pub fn set_position_limits(&self, min: f64, max: f64) -> Result<(), GimError> {
        self.update_state(|state| state.set_limits(min, max))?;
        info!("Position limits set to {:.4}..{:.4} rad", min, max);
        Ok(())
    }

    pub fn set_position_limits_degrees(&self, min_deg: f64, max_deg: f64) -> Result<(), GimError> {
        self.set_position_limits(min_deg.to_radians(), max_deg.to_radians())
    }

    pub fn set_limits_enabled(&self, enabled: bool) -> Result<(), GimError> {
        self.update_state(|state| {
            state.limits_enabled = enabled;
            Ok(())
        })
    }

    pub fn set_limit_search_speed(&self, speed_rads: f64) -> Result<(), GimError> {
        self.update_state(|state| state.set_search_speed(speed_rads))
    }

    /// 把当前绝对位置设为零点
    ///
    /// # 错误
    /// - `GimError::Timeout`: 读不到位置
    pub fn set_zero(&self) -> Result<f64, GimError> {
        let position = self
            .current_position(ZERO_READ_TIMEOUT)?
            .ok_or(GimError::Timeout {
                what: "shaft angle",
                timeout_ms: ZERO_READ_TIMEOUT.as_millis() as u64,
            })?;
        self.set_position_offset(position)?;
        info!("Zero position set at {:.4} rad", position);
        Ok(position)
    }

    /// 单次越限检查
    ///
    /// 相对位置越出限位时下发到最近边界的位置命令并返回 `true`。
    /// 限位关闭或读不到位置时返回 `false`。
    pub fn enforce_limits(&self, duration_ms: u32) -> Result<bool, GimError> {
        if !self.limits_enabled() {
            return Ok(false);
        }
        let Some(relative) = self.current_relative_position(ENFORCE_READ_TIMEOUT)? else {
            return Ok(false);
        };
        let Some(bound) = self.state.read().limit_violation(relative) else {
            return Ok(false);
        };
        warn!(
            "Position {:.4} rad outside limits, moving to {:.4} rad",
            relative, bound
        );
        self.send_position(bound, duration_ms)?;
        Ok(true)
    }

    /// 立即保存当前配置
    pub fn save_config(&self) -> Result<(), GimError> {
        let state = *self.state.read();
        self.persist(&state)
    }

    /// 在副本上修改并保存，保存成功后才替换内存状态
    fn update_state<F>(&self, mutate: F) -> Result<(), GimError>
    where
        F: FnOnce(&mut CalibrationState) -> Result<(), GimError>,
    {
        let mut state = self.state.write();
        let mut next = *state;
        mutate(&mut next)?;
        self.persist(&next)?;
        *state = next;
        Ok(())
    }

    fn persist(&self, state: &CalibrationState) -> Result<(), GimError> {
        let config = StoredConfig::from_state(state, self.motor.can_id(), self.motor.interface());
        self.store.save(&config)?;
        debug!("Configuration saved");
        Ok(())
    }

    // ---------------------------------------------------------------
    // 后台任务
    // ---------------------------------------------------------------

    /// 启动限位监听
    ///
    /// 已在运行时只更新自动停机开关与观察者。
    pub fn start_safety_listener(
        &self,
        auto_stop: bool,
        observer: Option<Arc<dyn SafetyObserver>>,
    ) -> Result<(), GimError> {
        let mut slot = self.listener.lock();
        if let Some(listener) = slot.as_ref()
            && listener.is_running()
        {
            listener.update(auto_stop, observer);
            return Ok(());
        }
        if let Some(stale) = slot.take()
            && let Err(e) = stale.stop()
        {
            warn!("Previous safety listener: {}", e);
        }
        *slot = Some(SafetyListener::start(
            self.motor.clone(),
            self.listener_config.clone(),
            auto_stop,
            observer,
        )?);
        Ok(())
    }

    pub fn stop_safety_listener(&self) -> Result<(), GimError> {
        match self.listener.lock().take() {
            Some(listener) => listener.stop(),
            None => Ok(()),
        }
    }

    pub fn is_safety_listener_running(&self) -> bool {
        self.listener
            .lock()
            .as_ref()
            .is_some_and(|listener| listener.is_running())
    }

    /// 限位监听是否开启了自动停机
    pub fn safety_auto_stop(&self) -> Option<bool> {
        self.listener.lock().as_ref().map(|listener| listener.auto_stop())
    }

    /// 启动状态监控
    ///
    /// 已在运行时只更新频率与观察者。
    pub fn start_status_monitor(
        &self,
        rate_hz: f64,
        observer: Option<Arc<dyn StatusObserver>>,
    ) -> Result<(), GimError> {
        let mut slot = self.monitor.lock();
        if let Some(monitor) = slot.as_ref()
            && monitor.is_running()
        {
            return monitor.update(rate_hz, observer);
        }
        if let Some(stale) = slot.take()
            && let Err(e) = stale.stop()
        {
            warn!("Previous status monitor: {}", e);
        }
        let config = StatusMonitorConfig {
            rate_hz,
            ..self.monitor_config.clone()
        };
        *slot = Some(StatusMonitor::start(
            self.motor.clone(),
            self.state.clone(),
            config,
            observer,
        )?);
        Ok(())
    }

    pub fn stop_status_monitor(&self) -> Result<(), GimError> {
        match self.monitor.lock().take() {
            Some(monitor) => monitor.stop(),
            None => Ok(()),
        }
    }

    pub fn is_status_monitor_running(&self) -> bool {
        self.monitor
            .lock()
            .as_ref()
            .is_some_and(|monitor| monitor.is_running())
    }

    /// 状态监控最近一次采样
    pub fn latest_status(&self) -> Option<StatusSample> {
        self.monitor.lock().as_ref().and_then(|monitor| monitor.latest())
    }

    // ---------------------------------------------------------------
    // 标定
    // ---------------------------------------------------------------

    /// 自动查找限位
    ///
    /// 期间暂停限位监听并关闭限位裁剪，结束后（无论成败）恢复两者。
    /// 成功时更新偏移与限位并保存配置。
    pub fn find_position_limits(
        &self,
        config: CalibrationConfig,
    ) -> Result<CalibrationOutcome, GimError> {
        let mut finder = LimitFinder::new(config, self.limit_search_speed());
        info!(
            "Starting limit calibration at {:.1}°/s",
            finder.search_speed().to_degrees()
        );

        let guard = CalibrationGuard::engage(self);
        let mut port = MotorPort {
            actuator: self,
            events: self.motor.subscribe_safety(self.listener_config.queue_capacity),
            device_id: self.listener_config.device_id,
            limits_enabled: guard.limits_were_enabled,
        };

        let result = finder.run(&mut port);
        drop(port);
        drop(guard);
        Ok(result?)
    }
}

impl Drop for Actuator {
    fn drop(&mut self) {
        if let Err(e) = self.stop_safety_listener() {
            error!("{}", e);
        }
        if let Err(e) = self.stop_status_monitor() {
            error!("{}", e);
        }
    }
}

fn load_state(store: &dyn CalibrationStore, can_id: u16, interface: &str) -> CalibrationState {
    match store.load() {
        Ok(Some(config)) => {
            if config.can_id != can_id || config.interface != interface {
                info!(
                    "Stored configuration was written for motor 0x{:02X} on {}",
                    config.can_id, config.interface
                );
            }
            config.to_state()
        },
        Ok(None) => {
            info!("No stored configuration, using defaults");
            CalibrationState::default()
        },
        Err(e) => {
            warn!("Failed to load configuration ({}), using defaults", e);
            CalibrationState::default()
        },
    }
}

/// 标定期间的状态隔离
///
/// 构造时暂停限位监听、关闭限位裁剪；Drop 时恢复。
struct CalibrationGuard<'a> {
    actuator: &'a Actuator,
    limits_were_enabled: bool,
    listener: Option<(bool, Option<Arc<dyn SafetyObserver>>)>,
}

impl<'a> CalibrationGuard<'a> {
    fn engage(actuator: &'a Actuator) -> Self {
        let limits_were_enabled = {
            let mut state = actuator.state.write();
            std::mem::replace(&mut state.limits_enabled, false)
        };

        let listener = actuator.listener.lock().take().map(|listener| {
            let settings = (listener.auto_stop(), listener.observer());
            info!("Suspending safety listener during calibration");
            if let Err(e) = listener.stop() {
                warn!("{}", e);
            }
            settings
        });

        Self {
            actuator,
            limits_were_enabled,
            listener,
        }
    }
}

impl Drop for CalibrationGuard<'_> {
    fn drop(&mut self) {
        self.actuator.state.write().limits_enabled = self.limits_were_enabled;

        if let Some((auto_stop, observer)) = self.listener.take() {
            info!("Restarting safety listener");
            if let Err(e) = self.actuator.start_safety_listener(auto_stop, observer) {
                error!("Could not restart safety listener: {}", e);
            }
        }
    }
}

/// 基于 `Motor` 的标定端口
struct MotorPort<'a> {
    actuator: &'a Actuator,
    events: Receiver<SafetyEvent>,
    device_id: u8,
    /// 提交结果时恢复的限位开关
    limits_enabled: bool,
}

impl CalibrationPort for MotorPort<'_> {
    fn start_motor(&mut self) -> Result<(), GimError> {
        self.actuator.start_motor()
    }

    fn stop_motor(&mut self) -> Result<(), GimError> {
        self.actuator.stop_motor()
    }

    fn send_velocity(&mut self, speed_rads: f64) -> Result<(), GimError> {
        self.actuator.send_velocity(speed_rads, 0)
    }

    fn move_to_absolute(&mut self, position_rad: f64, duration_ms: u32) -> Result<(), GimError> {
        Ok(self
            .actuator
            .motor
            .send_position_absolute(position_rad, duration_ms)?)
    }

    fn read_position(&mut self, timeout: Duration) -> Result<Option<f64>, GimError> {
        self.actuator.current_position(timeout)
    }

    fn next_safety_event(&mut self, timeout: Duration) -> Option<SafetyEvent> {
        let deadline = Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.events.recv_timeout(remaining) {
                Ok(event) if event.device_id == self.device_id => return Some(event),
                Ok(_) => continue,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return None;
                },
            }
        }
    }

    fn pause(&mut self, duration: Duration) {
        if !duration.is_zero() {
            spin_sleep::sleep(duration);
        }
    }

    fn commit(&mut self, outcome: &CalibrationOutcome) -> Result<(), GimError> {
        let limits_enabled = self.limits_enabled;
        self.actuator.update_state(|state| {
            state.apply_calibration(outcome);
            state.limits_enabled = limits_enabled;
            Ok(())
        })
    }
}
