//! 日志初始化
//!
//! 库内部只使用 `tracing` 宏；应用启动时调用一次 [`init_logger`] 安装订阅者。
//! 过滤规则读取 `RUST_LOG`，未设置时使用 [`DEFAULT_LOG_DIRECTIVE`]。
//! `log` crate 的记录通过 `tracing-log` 转发。

use std::sync::Once;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;

/// 默认过滤规则
pub const DEFAULT_LOG_DIRECTIVE: &str = "gim=info";

static INIT: Once = Once::new();

/// 安装全局日志订阅者（重复调用无副作用）
///
/// ```rust
/// gim_sdk::init_logger();
/// gim_sdk::init_logger();
/// ```
pub fn init_logger() {
    init_logger_with(DEFAULT_LOG_DIRECTIVE);
}

/// 使用指定的默认过滤规则安装订阅者，`RUST_LOG` 仍然优先
///
/// 只有第一次调用生效。其他订阅者已经安装时保持原样。
pub fn init_logger_with(default_directive: &str) {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(default_directive))
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_DIRECTIVE));

        let subscriber = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_thread_names(true));

        if tracing::subscriber::set_global_default(subscriber).is_ok() {
            // log -> tracing 桥接
            let _ = tracing_log::LogTracer::init();
        }
    });
}
