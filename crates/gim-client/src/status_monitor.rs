//! 状态监控线程
//!
//! 按固定频率轮询位置和速度指标，组装 `MotorStatus` 并交给观察者。
//! 最新一次采样保存在 `ArcSwapOption` 中，读取无锁。
//! 频率和观察者可以在运行中通过 [`StatusMonitor::update`] 替换。

use crate::error::GimError;
use crate::limits::CalibrationState;
use crate::observer::{StatusObserver, StatusSample, notify};
use arc_swap::ArcSwapOption;
use gim_driver::{JoinTimeout, Motor};
use gim_protocol::{IndicatorId, MotorStatus};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// 状态监控配置
#[derive(Debug, Clone)]
pub struct StatusMonitorConfig {
    /// 轮询频率（Hz，默认 10）
    pub rate_hz: f64,
    /// 单次轮询的总超时，两次指标读取各占一半
    pub request_timeout: Duration,
    /// 位置与速度请求之间的间隔
    pub request_gap: Duration,
    /// 连续失败告警阈值（默认 10）
    pub failure_threshold: u32,
    pub join_timeout: Duration,
}

impl Default for StatusMonitorConfig {
    fn default() -> Self {
        Self {
            rate_hz: 10.0,
            request_timeout: Duration::from_millis(100),
            request_gap: Duration::from_millis(10),
            failure_threshold: 10,
            join_timeout: Duration::from_secs(1),
        }
    }
}

/// 轮询一次电机状态
///
/// 位置读取无应答时返回 `Ok(None)`；速度读取无应答或失败时按 0 处理。
/// 温度和力矩无法通过指标读取，填 0。
pub fn poll_status(
    motor: &Motor,
    timeout: Duration,
    gap: Duration,
) -> Result<Option<MotorStatus>, GimError> {
    let per_request = timeout / 2;

    let Some(position) = motor.retrieve_indicator(IndicatorId::ShaftAngle, per_request)? else {
        return Ok(None);
    };

    if !gap.is_zero() {
        spin_sleep::sleep(gap);
    }

    let speed = match motor.retrieve_indicator(IndicatorId::ShaftSpeed, per_request) {
        Ok(Some(speed)) => speed,
        Ok(None) => {
            trace!("No speed reply, reporting 0");
            0.0
        },
        Err(e) => {
            debug!("Speed read failed ({}), reporting 0", e);
            0.0
        },
    };

    Ok(Some(MotorStatus::from_indicators(position as f64, speed as f64)))
}

/// 频率换算为轮询周期
fn rate_to_period(rate_hz: f64) -> Result<Duration, GimError> {
    let invalid = || GimError::validation("rate", format!("{rate_hz} Hz is not a usable rate"));
    if !(rate_hz.is_finite() && rate_hz > 0.0) {
        return Err(invalid());
    }
    Duration::try_from_secs_f64(1.0 / rate_hz).map_err(|_| invalid())
}

/// 监控线程与句柄共享的状态
struct MonitorShared {
    period: Mutex<Duration>,
    observer: RwLock<Option<Arc<dyn StatusObserver>>>,
    latest: ArcSwapOption<StatusSample>,
    samples: AtomicU64,
    dropped: AtomicU64,
}

/// 状态监控器
pub struct StatusMonitor {
    shared: Arc<MonitorShared>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    config: StatusMonitorConfig,
}

impl StatusMonitor {
    /// 启动监控线程
    ///
    /// # 错误
    /// - `GimError::Validation`: 频率不是正数，或周期无法表示
    /// - `GimError::Task`: 线程创建失败
    pub fn start(
        motor: Arc<Motor>,
        calibration: Arc<RwLock<CalibrationState>>,
        config: StatusMonitorConfig,
        observer: Option<Arc<dyn StatusObserver>>,
    ) -> Result<Self, GimError> {
        let period = rate_to_period(config.rate_hz)?;

        let shared = Arc::new(MonitorShared {
            period: Mutex::new(period),
            observer: RwLock::new(observer),
            latest: ArcSwapOption::empty(),
            samples: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        });
        let running = Arc::new(AtomicBool::new(true));

        let handle = {
            let shared = shared.clone();
            let running = running.clone();
            let config = config.clone();
            std::thread::Builder::new()
                .name("gim-status".to_string())
                .spawn(move || monitor_loop(motor, calibration, config, shared, running))
                .map_err(|e| GimError::Task(format!("failed to spawn status monitor: {e}")))?
        };

        info!("Status monitor started at {} Hz", config.rate_hz);

        Ok(Self {
            shared,
            running,
            handle: Some(handle),
            config,
        })
    }

    /// 运行中更新频率与观察者
    ///
    /// 频率无效时返回 `Validation`，原设置保持不变。
    pub fn update(
        &self,
        rate_hz: f64,
        observer: Option<Arc<dyn StatusObserver>>,
    ) -> Result<(), GimError> {
        let period = rate_to_period(rate_hz)?;
        *self.shared.period.lock() = period;
        *self.shared.observer.write() = observer;
        info!("Status monitor updated ({} Hz)", rate_hz);
        Ok(())
    }

    /// 当前轮询周期
    pub fn period(&self) -> Duration {
        *self.shared.period.lock()
    }

    /// 最近一次成功采样
    pub fn latest(&self) -> Option<StatusSample> {
        self.shared.latest.load_full().map(|sample| *sample)
    }

    pub fn samples(&self) -> u64 {
        self.shared.samples.load(Ordering::Relaxed)
    }

    /// 未拿到位置的轮询次数
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// 停止监控线程
    ///
    /// # 错误
    /// - `GimError::Task`: 线程未在 `join_timeout` 内退出或已 panic
    pub fn stop(mut self) -> Result<(), GimError> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), GimError> {
        self.running.store(false, Ordering::Release);
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };
        handle.join_timeout(self.config.join_timeout).map_err(|_| {
            GimError::Task(format!(
                "status monitor did not stop within {:?}",
                self.config.join_timeout
            ))
        })?;
        info!("Status monitor stopped");
        Ok(())
    }
}

impl Drop for StatusMonitor {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("{}", e);
        }
    }
}

fn monitor_loop(
    motor: Arc<Motor>,
    calibration: Arc<RwLock<CalibrationState>>,
    config: StatusMonitorConfig,
    shared: Arc<MonitorShared>,
    running: Arc<AtomicBool>,
) {
    let mut failures: u32 = 0;

    while running.load(Ordering::Acquire) {
        let started = Instant::now();
        let observer = shared.observer.read().clone();

        match poll_status(&motor, config.request_timeout, config.request_gap) {
            Ok(Some(status)) => {
                failures = 0;
                let sample = StatusSample {
                    can_id: motor.can_id(),
                    status,
                    relative_position_rad: calibration.read().to_relative(status.position_rad),
                };
                shared.latest.store(Some(Arc::new(sample)));
                shared.samples.fetch_add(1, Ordering::Relaxed);
                if let Some(observer) = &observer {
                    notify("status", || observer.on_status(&sample));
                }
            },
            Ok(None) => {
                failures += 1;
                shared.dropped.fetch_add(1, Ordering::Relaxed);
                trace!("Dropped status sample: no position reply");
            },
            Err(e) => {
                failures += 1;
                shared.dropped.fetch_add(1, Ordering::Relaxed);
                debug!("Status poll failed: {}", e);
            },
        }

        if failures >= config.failure_threshold.max(1) {
            warn!(
                "Status monitor: {} consecutive polls without a position reading",
                failures
            );
            if let Some(observer) = &observer {
                notify("status", || observer.on_degraded(failures));
            }
            failures = 0;
        }

        let period = *shared.period.lock();
        sleep_while_running(period.saturating_sub(started.elapsed()), &running);
    }
}

/// 分段睡眠，停止请求最多延迟一个分段
fn sleep_while_running(duration: Duration, running: &AtomicBool) {
    const SLICE: Duration = Duration::from_millis(20);
    let deadline = Instant::now() + duration;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() || !running.load(Ordering::Acquire) {
            return;
        }
        spin_sleep::sleep(remaining.min(SLICE));
    }
}
