//! 总线指标
//!
//! 原子计数器，IO 线程更新，任意线程无锁读取。

use std::sync::atomic::{AtomicU64, Ordering};

/// 总线实时指标
///
/// ```rust
/// use gim_driver::BusMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = BusMetrics::new();
/// metrics.rx_frames_total.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(metrics.snapshot().rx_frames_total, 1);
/// ```
#[derive(Debug, Default)]
pub struct BusMetrics {
    /// RX 接收的总帧数
    pub rx_frames_total: AtomicU64,
    /// 分发给应答通道的帧数
    pub rx_response_frames: AtomicU64,
    /// 安全节点限位事件帧数
    pub rx_safety_events: AtomicU64,
    /// 安全节点心跳帧数
    pub rx_heartbeats: AtomicU64,
    /// 无法解析而丢弃的帧数
    pub rx_malformed: AtomicU64,
    /// RX 超时次数（正常现象，无数据时会超时）
    pub rx_timeouts: AtomicU64,
    /// 应答通道满时被挤出的旧帧数
    pub response_evictions: AtomicU64,
    /// 订阅者队列满而丢弃的安全事件数
    pub safety_events_dropped: AtomicU64,
    /// TX 发送成功帧数
    pub tx_frames_total: AtomicU64,
    /// TX 发送失败次数
    pub tx_errors: AtomicU64,
    /// CAN 设备错误次数
    pub device_errors: AtomicU64,
}

impl BusMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// 获取指标快照
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            rx_frames_total: self.rx_frames_total.load(Ordering::Relaxed),
            rx_response_frames: self.rx_response_frames.load(Ordering::Relaxed),
            rx_safety_events: self.rx_safety_events.load(Ordering::Relaxed),
            rx_heartbeats: self.rx_heartbeats.load(Ordering::Relaxed),
            rx_malformed: self.rx_malformed.load(Ordering::Relaxed),
            rx_timeouts: self.rx_timeouts.load(Ordering::Relaxed),
            response_evictions: self.response_evictions.load(Ordering::Relaxed),
            safety_events_dropped: self.safety_events_dropped.load(Ordering::Relaxed),
            tx_frames_total: self.tx_frames_total.load(Ordering::Relaxed),
            tx_errors: self.tx_errors.load(Ordering::Relaxed),
            device_errors: self.device_errors.load(Ordering::Relaxed),
        }
    }
}

/// 指标快照（可复制）
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub rx_frames_total: u64,
    pub rx_response_frames: u64,
    pub rx_safety_events: u64,
    pub rx_heartbeats: u64,
    pub rx_malformed: u64,
    pub rx_timeouts: u64,
    pub response_evictions: u64,
    pub safety_events_dropped: u64,
    pub tx_frames_total: u64,
    pub tx_errors: u64,
    pub device_errors: u64,
}

impl MetricsSnapshot {
    /// 是否有过丢帧（应答被挤出或安全事件被丢弃）
    pub fn has_losses(&self) -> bool {
        self.response_evictions > 0 || self.safety_events_dropped > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = BusMetrics::new();
        BusMetrics::incr(&metrics.rx_frames_total);
        BusMetrics::incr(&metrics.rx_frames_total);
        BusMetrics::incr(&metrics.tx_errors);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.rx_frames_total, 2);
        assert_eq!(snapshot.tx_errors, 1);
        assert!(!snapshot.has_losses());
    }

    #[test]
    fn test_has_losses() {
        let metrics = BusMetrics::new();
        BusMetrics::incr(&metrics.safety_events_dropped);
        assert!(metrics.snapshot().has_losses());
    }
}
