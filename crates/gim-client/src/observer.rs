//! 后台任务观察者
//!
//! 限位监听和状态监控通过观察者把事件交给用户代码。
//! 观察者返回的错误和 panic 都会被捕获并记录，不会终止后台线程。

use gim_protocol::{MotorStatus, SafetyEvent};
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::{error, warn};

/// 观察者回调结果
pub type ObserverResult = Result<(), Box<dyn std::error::Error + Send + Sync>>;

/// 限位事件观察者
pub trait SafetyObserver: Send + Sync {
    /// 接近限位（仅通知）
    fn on_approach(&self, _event: SafetyEvent) -> ObserverResult {
        Ok(())
    }

    /// 硬限位触发
    ///
    /// `motor_stopped` 表示监听器是否已成功发送停机命令。
    fn on_hard_stop(&self, _event: SafetyEvent, _motor_stopped: bool) -> ObserverResult {
        Ok(())
    }
}

/// 状态采样
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StatusSample {
    /// 电机 CAN ID
    pub can_id: u16,
    /// 电机状态（绝对位置）
    pub status: MotorStatus,
    /// 相对位置（rad，已减去偏移）
    pub relative_position_rad: f64,
}

/// 状态监控观察者
pub trait StatusObserver: Send + Sync {
    fn on_status(&self, _sample: &StatusSample) -> ObserverResult {
        Ok(())
    }

    /// 连续读取失败达到阈值
    fn on_degraded(&self, _consecutive_failures: u32) -> ObserverResult {
        Ok(())
    }
}

/// 调用观察者，吞掉错误与 panic
pub(crate) fn notify(task: &str, callback: impl FnOnce() -> ObserverResult) {
    match catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(())) => {},
        Ok(Err(e)) => warn!("{} observer returned an error: {}", task, e),
        Err(_) => error!("{} observer panicked", task),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_notify_swallows_errors() {
        let calls = AtomicUsize::new(0);
        notify("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            Err("boom".into())
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_notify_swallows_panics() {
        notify("test", || panic!("observer bug"));
    }

    #[test]
    fn test_default_methods_are_noops() {
        struct Silent;
        impl SafetyObserver for Silent {}
        impl StatusObserver for Silent {}

        let event = SafetyEvent::new(1, gim_protocol::SafetyStatus::HardStopMin);
        assert!(Silent.on_approach(event).is_ok());
        assert!(Silent.on_hard_stop(event, true).is_ok());
        assert!(Silent.on_degraded(10).is_ok());
    }
}
