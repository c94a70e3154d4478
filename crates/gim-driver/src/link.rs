//! 链路存活监控
//!
//! 记录某一来源（电机或安全节点）最近一次发来帧的单调时间，
//! 用于判断对端是否仍在线。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 进程级单调时间锚点
fn monotonic_micros() -> u64 {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    ANCHOR.get_or_init(Instant::now).elapsed().as_micros() as u64
}

/// 尚未收到过帧
const NEVER: u64 = u64::MAX;

/// 链路存活监控
#[derive(Debug)]
pub struct LinkMonitor {
    last_seen_us: AtomicU64,
    frames: AtomicU64,
}

impl Default for LinkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl LinkMonitor {
    pub fn new() -> Self {
        Self {
            last_seen_us: AtomicU64::new(NEVER),
            frames: AtomicU64::new(0),
        }
    }

    /// 记录收到一帧
    pub fn register(&self) {
        self.last_seen_us.store(monotonic_micros(), Ordering::Relaxed);
        self.frames.fetch_add(1, Ordering::Relaxed);
    }

    /// 距最近一帧的时间，从未收到过时为 `None`
    pub fn since_last(&self) -> Option<Duration> {
        let last = self.last_seen_us.load(Ordering::Relaxed);
        if last == NEVER {
            return None;
        }
        Some(Duration::from_micros(monotonic_micros().saturating_sub(last)))
    }

    /// 在 `timeout` 内收到过帧
    pub fn is_alive(&self, timeout: Duration) -> bool {
        self.since_last().is_some_and(|elapsed| elapsed <= timeout)
    }

    /// 累计帧数
    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }
}
