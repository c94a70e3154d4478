//! 限位监听线程
//!
//! 订阅分发器的限位事件流，只处理指定安全节点的事件：
//!
//! - 硬限位：开启自动停机时立即发送停机命令，然后通知观察者
//! - 接近限位：仅通知观察者

use crate::error::GimError;
use crate::observer::{SafetyObserver, notify};
use crossbeam_channel::{Receiver, RecvTimeoutError};
use gim_driver::{JoinTimeout, Motor};
use gim_protocol::{DEFAULT_SAFETY_DEVICE_ID, SafetyEvent};
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{error, info, trace, warn};

/// 限位监听配置
#[derive(Debug, Clone)]
pub struct SafetyListenerConfig {
    /// 等待事件的轮询周期（默认 5ms）
    pub poll_period: Duration,
    /// 安全节点设备 ID（默认 1）
    pub device_id: u8,
    /// 事件订阅队列容量
    pub queue_capacity: usize,
    /// 停止时等待线程退出的上限
    pub join_timeout: Duration,
}

impl Default for SafetyListenerConfig {
    fn default() -> Self {
        Self {
            poll_period: Duration::from_millis(5),
            device_id: DEFAULT_SAFETY_DEVICE_ID,
            queue_capacity: gim_driver::DEFAULT_SAFETY_QUEUE_CAPACITY,
            join_timeout: Duration::from_secs(1),
        }
    }
}

/// 监听线程与句柄共享的状态
struct ListenerShared {
    auto_stop: AtomicBool,
    observer: RwLock<Option<Arc<dyn SafetyObserver>>>,
    events_handled: AtomicU64,
    stops_issued: AtomicU64,
}

/// 限位监听器
pub struct SafetyListener {
    shared: Arc<ListenerShared>,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
    config: SafetyListenerConfig,
}

impl SafetyListener {
    /// 启动监听线程
    ///
    /// # 错误
    /// - `GimError::Task`: 线程创建失败
    pub fn start(
        motor: Arc<Motor>,
        config: SafetyListenerConfig,
        auto_stop: bool,
        observer: Option<Arc<dyn SafetyObserver>>,
    ) -> Result<Self, GimError> {
        let shared = Arc::new(ListenerShared {
            auto_stop: AtomicBool::new(auto_stop),
            observer: RwLock::new(observer),
            events_handled: AtomicU64::new(0),
            stops_issued: AtomicU64::new(0),
        });
        let running = Arc::new(AtomicBool::new(true));
        let events = motor.subscribe_safety(config.queue_capacity);

        let handle = {
            let shared = shared.clone();
            let running = running.clone();
            let config = config.clone();
            std::thread::Builder::new()
                .name("gim-safety".to_string())
                .spawn(move || listener_loop(events, motor, shared, running, config))
                .map_err(|e| GimError::Task(format!("failed to spawn safety listener: {e}")))?
        };

        info!(
            "Safety listener started (device 0x{:02X}, auto-stop {})",
            config.device_id, auto_stop
        );

        Ok(Self {
            shared,
            running,
            handle: Some(handle),
            config,
        })
    }

    /// 运行中更新自动停机开关与观察者
    pub fn update(&self, auto_stop: bool, observer: Option<Arc<dyn SafetyObserver>>) {
        self.shared.auto_stop.store(auto_stop, Ordering::Release);
        *self.shared.observer.write() = observer;
        info!("Safety listener updated (auto-stop {})", auto_stop);
    }

    pub fn auto_stop(&self) -> bool {
        self.shared.auto_stop.load(Ordering::Acquire)
    }

    pub fn observer(&self) -> Option<Arc<dyn SafetyObserver>> {
        self.shared.observer.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
            && self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// 已处理的本设备事件数
    pub fn events_handled(&self) -> u64 {
        self.shared.events_handled.load(Ordering::Relaxed)
    }

    /// 成功发送的停机命令数
    pub fn stops_issued(&self) -> u64 {
        self.shared.stops_issued.load(Ordering::Relaxed)
    }

    /// 停止监听线程
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
                "safety listener did not stop within {:?}",
                self.config.join_timeout
            ))
        })?;
        info!("Safety listener stopped");
        Ok(())
    }
}

impl Drop for SafetyListener {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("{}", e);
        }
    }
}

fn listener_loop(
    events: Receiver<SafetyEvent>,
    motor: Arc<Motor>,
    shared: Arc<ListenerShared>,
    running: Arc<AtomicBool>,
    config: SafetyListenerConfig,
) {
    while running.load(Ordering::Acquire) {
        match events.recv_timeout(config.poll_period) {
            Ok(event) => handle_event(event, &motor, &shared, config.device_id),
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                warn!("Safety event stream closed, listener exiting");
                break;
            },
        }
    }
}

fn handle_event(event: SafetyEvent, motor: &Motor, shared: &ListenerShared, device_id: u8) {
    if event.device_id != device_id {
        trace!("Ignored safety event from device 0x{:02X}", event.device_id);
        return;
    }
    shared.events_handled.fetch_add(1, Ordering::Relaxed);
    let observer = shared.observer.read().clone();

    if event.status.is_hard_stop() {
        let motor_stopped = if shared.auto_stop.load(Ordering::Acquire) {
            match motor.stop_motor() {
                Ok(()) => {
                    shared.stops_issued.fetch_add(1, Ordering::Relaxed);
                    warn!("Border limit {:?} reached, motor stopped", event.status);
                    true
                },
                Err(e) => {
                    error!(
                        "Border limit {:?} reached but stop command failed: {}",
                        event.status, e
                    );
                    false
                },
            }
        } else {
            warn!("Border limit {:?} reached (auto-stop disabled)", event.status);
            false
        };
        if let Some(observer) = observer {
            notify("safety", || observer.on_hard_stop(event, motor_stopped));
        }
    } else {
        info!("Approaching limit {:?}", event.status);
        if let Some(observer) = observer {
            notify("safety", || observer.on_approach(event));
        }
    }
}
