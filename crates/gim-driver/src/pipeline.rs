//! Pipeline IO 循环模块
//!
//! 后台 IO 线程独占 CAN 适配器，是总线上唯一的接收者：
//!
//! - 发送：从命令队列取出帧并发送，可选地回执发送结果
//! - 接收：按 CAN ID 分发
//!   - 安全节点 ID：限位事件广播给所有订阅者；心跳只更新链路存活
//!   - 其他 ID：进入应答通道，由请求/应答交换按需消费
//!
//! 安全监听、状态监控和标定都是这些通道的消费者，彼此不会争抢同一次接收。

use crate::link::LinkMonitor;
use crate::metrics::BusMetrics;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use gim_can::{CanAdapter, CanError, GimFrame};
use gim_protocol::{ProtocolError, SafetyEvent, SafetyFrame, is_safety_id};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, trace, warn};

/// Pipeline 配置
///
/// ```
/// use gim_driver::PipelineConfig;
///
/// let config = PipelineConfig {
///     receive_timeout_ms: 5,
///     ..PipelineConfig::default()
/// };
/// assert_eq!(config.command_queue_capacity, 32);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// CAN 接收超时（毫秒），决定 IO 线程响应退出与发送的最大延迟
    pub receive_timeout_ms: u64,
    /// 命令队列容量
    pub command_queue_capacity: usize,
    /// 应答通道容量（满时挤出最旧的帧）
    pub response_queue_capacity: usize,
    /// 命令入队并等待发送回执的超时（毫秒）
    pub command_timeout_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            receive_timeout_ms: 2,
            command_queue_capacity: 32,
            response_queue_capacity: 32,
            command_timeout_ms: 100,
        }
    }
}

/// 发送请求
pub struct TxRequest {
    pub frame: GimFrame,
    /// 发送结果回执（`None` 表示 Fire-and-Forget）
    pub ack: Option<Sender<Result<(), CanError>>>,
}

/// IO 线程与句柄之间共享的上下文
#[derive(Debug, Default)]
pub struct BusContext {
    pub metrics: BusMetrics,
    /// 安全节点之外的任意来源（电机应答）
    pub motor_link: LinkMonitor,
    /// 安全节点（事件与心跳）
    pub safety_link: LinkMonitor,
    safety_subscribers: Mutex<Vec<Sender<SafetyEvent>>>,
}

impl BusContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// 订阅限位事件
    ///
    /// 每个订阅者拥有独立的有界队列；队列满时新事件被丢弃并计数，
    /// 接收端被丢弃后订阅自动移除。
    pub fn subscribe_safety(&self, capacity: usize) -> Receiver<SafetyEvent> {
        let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
        self.safety_subscribers.lock().push(tx);
        rx
    }

    /// 当前订阅者数量
    pub fn safety_subscriber_count(&self) -> usize {
        self.safety_subscribers.lock().len()
    }

    fn publish_safety(&self, event: SafetyEvent) {
        let mut subscribers = self.safety_subscribers.lock();
        subscribers.retain(|tx| match tx.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                BusMetrics::incr(&self.metrics.safety_events_dropped);
                warn!("Safety subscriber queue full, dropped {:?}", event);
                true
            },
            Err(TrySendError::Disconnected(_)) => false,
        });
    }
}

/// 帧路由结果
#[derive(Debug, Clone, PartialEq)]
pub enum FrameRoute {
    /// 安全节点帧
    Safety(SafetyFrame),
    /// 电机应答（由消费者解码）
    Response,
    /// 安全节点 ID 上的无效帧
    Malformed(ProtocolError),
}

/// 按 CAN ID 对入站帧分类（纯函数）
pub fn route_frame(frame: &GimFrame) -> FrameRoute {
    if is_safety_id(frame.id) {
        match SafetyFrame::try_from(*frame) {
            Ok(safety) => FrameRoute::Safety(safety),
            Err(e) => FrameRoute::Malformed(e),
        }
    } else {
        FrameRoute::Response
    }
}

/// IO 线程循环
///
/// # 参数
/// - `can`: CAN 适配器（在循环中独占）
/// - `cmd_rx`: 发送请求队列
/// - `response_tx`: 应答通道发送端
/// - `response_evict`: 应答通道接收端的克隆，通道满时用于挤出最旧帧
/// - `ctx`: 共享上下文
/// - `config`: Pipeline 配置
/// - `is_running`: 运行标志
pub fn io_loop(
    mut can: impl CanAdapter,
    cmd_rx: Receiver<TxRequest>,
    response_tx: Sender<GimFrame>,
    response_evict: Receiver<GimFrame>,
    ctx: Arc<BusContext>,
    config: PipelineConfig,
    is_running: Arc<AtomicBool>,
) {
    #[cfg(feature = "realtime")]
    {
        use thread_priority::*;

        match set_current_thread_priority(ThreadPriority::Max) {
            Ok(_) => tracing::info!("IO thread priority set to MAX (realtime)"),
            Err(e) => warn!(
                "Failed to set IO thread priority: {}. \
                On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                e
            ),
        }
    }

    let receive_timeout = Duration::from_millis(config.receive_timeout_ms);
    can.set_receive_timeout(receive_timeout);

    loop {
        if !is_running.load(Ordering::Acquire) {
            trace!("IO loop: running flag cleared, exiting");
            break;
        }

        if drain_tx_queue(&mut can, &cmd_rx, &ctx) {
            trace!("IO loop: command channel closed, exiting");
            break;
        }

        let frame = match can.receive() {
            Ok(frame) => frame,
            Err(CanError::Timeout) => {
                BusMetrics::incr(&ctx.metrics.rx_timeouts);
                continue;
            },
            Err(e) => {
                BusMetrics::incr(&ctx.metrics.device_errors);
                error!("CAN receive error: {}", e);
                if e.is_fatal() {
                    // 避免设备失效时空转
                    std::thread::sleep(receive_timeout);
                }
                continue;
            },
        };

        BusMetrics::incr(&ctx.metrics.rx_frames_total);
        dispatch_frame(frame, &ctx, &response_tx, &response_evict);

        if drain_tx_queue(&mut can, &cmd_rx, &ctx) {
            trace!("IO loop: command channel closed, exiting");
            break;
        }
    }
}

fn dispatch_frame(
    frame: GimFrame,
    ctx: &BusContext,
    response_tx: &Sender<GimFrame>,
    response_evict: &Receiver<GimFrame>,
) {
    match route_frame(&frame) {
        FrameRoute::Safety(SafetyFrame::Event(event)) => {
            ctx.safety_link.register();
            BusMetrics::incr(&ctx.metrics.rx_safety_events);
            trace!("Safety event: {:?}", event);
            ctx.publish_safety(event);
        },
        FrameRoute::Safety(SafetyFrame::Heartbeat { device_id }) => {
            ctx.safety_link.register();
            BusMetrics::incr(&ctx.metrics.rx_heartbeats);
            trace!("Safety heartbeat from device {}", device_id);
        },
        FrameRoute::Malformed(e) => {
            BusMetrics::incr(&ctx.metrics.rx_malformed);
            warn!("Dropped malformed safety frame: {}", e);
        },
        FrameRoute::Response => {
            ctx.motor_link.register();
            BusMetrics::incr(&ctx.metrics.rx_response_frames);
            forward_response(frame, ctx, response_tx, response_evict);
        },
    }
}

fn forward_response(
    frame: GimFrame,
    ctx: &BusContext,
    response_tx: &Sender<GimFrame>,
    response_evict: &Receiver<GimFrame>,
) {
    match response_tx.try_send(frame) {
        Ok(()) => {},
        Err(TrySendError::Full(frame)) => {
            // 无人消费的应答不能阻塞新应答
            let _ = response_evict.try_recv();
            BusMetrics::incr(&ctx.metrics.response_evictions);
            let _ = response_tx.try_send(frame);
        },
        Err(TrySendError::Disconnected(_)) => {},
    }
}

/// 发送队列中积压的帧
///
/// 返回 `true` 表示命令通道已断开。
fn drain_tx_queue(
    can: &mut impl CanAdapter,
    cmd_rx: &Receiver<TxRequest>,
    ctx: &BusContext,
) -> bool {
    const MAX_DRAIN_PER_CYCLE: usize = 32;
    const TIME_BUDGET: Duration = Duration::from_micros(500);

    let start = Instant::now();

    for _ in 0..MAX_DRAIN_PER_CYCLE {
        if start.elapsed() > TIME_BUDGET {
            trace!("Drain time budget exhausted, deferred {} frames", cmd_rx.len());
            break;
        }

        match cmd_rx.try_recv() {
            Ok(request) => {
                let result = can.send(request.frame);
                match &result {
                    Ok(()) => BusMetrics::incr(&ctx.metrics.tx_frames_total),
                    Err(e) => {
                        BusMetrics::incr(&ctx.metrics.tx_errors);
                        error!("Failed to send frame 0x{:X}: {}", request.frame.id, e);
                    },
                }
                if let Some(ack) = request.ack {
                    let _ = ack.send(result);
                }
            },
            Err(crossbeam_channel::TryRecvError::Empty) => break,
            Err(crossbeam_channel::TryRecvError::Disconnected) => return true,
        }
    }

    false
}
