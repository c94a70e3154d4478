//! 电机驱动句柄（对外 API）
//!
//! `Motor` 持有 IO 线程和所有通道：
//!
//! - 命令发送：入队后等待 IO 线程的发送回执，传输错误返回给调用方
//! - 请求/应答：由交换锁串行化，同一时刻只有一个交换在消费应答通道
//! - 限位事件：通过 [`Motor::subscribe_safety`] 订阅

use crate::error::DriverError;
use crate::metrics::MetricsSnapshot;
use crate::pipeline::{BusContext, PipelineConfig, TxRequest, io_loop};
use crossbeam_channel::{Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use gim_can::{CanAdapter, GimFrame};
use gim_protocol::{
    FRAME_LEN, IndicatorId, IndicatorReply, MotorCommand, MotorFeedback, MotorStatus, Opcode,
    SafetyEvent, TorqueScale,
};
use parking_lot::Mutex;
use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, spawn};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

/// 带超时的 join
pub trait JoinTimeout {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()>;
}

impl<T: Send + 'static> JoinTimeout for JoinHandle<T> {
    fn join_timeout(self, timeout: Duration) -> std::thread::Result<()> {
        let (tx, rx) = std::sync::mpsc::channel();

        // 看门狗线程负责真正的 join；超时后它会继续等待，由进程退出回收
        spawn(move || {
            let _ = tx.send(self.join());
        });

        match rx.recv_timeout(timeout) {
            Ok(join_result) => join_result.map(|_| ()),
            Err(std::sync::mpsc::RecvTimeoutError::Timeout) => Err(Box::new(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "Thread join timeout",
            ))),
            Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                Err(Box::new(std::io::Error::new(
                    std::io::ErrorKind::ConnectionReset,
                    "Thread panicked during join",
                )))
            },
        }
    }
}

/// 默认限位事件订阅队列容量
pub const DEFAULT_SAFETY_QUEUE_CAPACITY: usize = 64;

/// IO 线程退出等待上限
const IO_JOIN_TIMEOUT: Duration = Duration::from_secs(2);

/// GIM8115 电机驱动句柄
pub struct Motor {
    /// 发送请求通道
    ///
    /// Drop 时必须在 join IO 线程之前关闭，否则 `io_loop` 收不到 `Disconnected`。
    cmd_tx: ManuallyDrop<Sender<TxRequest>>,
    /// 应答通道接收端
    response_rx: Receiver<GimFrame>,
    /// 请求/应答交换锁
    exchange_lock: Mutex<()>,
    ctx: Arc<BusContext>,
    io_thread: Option<JoinHandle<()>>,
    is_running: Arc<AtomicBool>,
    can_id: u16,
    torque_scale: TorqueScale,
    config: PipelineConfig,
    interface: String,
}

impl Motor {
    /// 创建电机句柄并启动 IO 线程
    ///
    /// # 参数
    /// - `can`: CAN 适配器（移动到 IO 线程）
    /// - `can_id`: 电机 CAN ID
    /// - `config`: Pipeline 配置（可选）
    ///
    /// # 错误
    /// - `DriverError::IoThread`: 线程创建失败
    pub fn new(
        can: impl CanAdapter + Send + 'static,
        can_id: u16,
        config: Option<PipelineConfig>,
    ) -> Result<Self, DriverError> {
        let config = config.unwrap_or_default();

        let (cmd_tx, cmd_rx) = crossbeam_channel::bounded(config.command_queue_capacity.max(1));
        let (response_tx, response_rx) =
            crossbeam_channel::bounded(config.response_queue_capacity.max(1));

        let ctx = Arc::new(BusContext::new());
        let is_running = Arc::new(AtomicBool::new(true));

        let io_thread = {
            let ctx = ctx.clone();
            let is_running = is_running.clone();
            let response_evict = response_rx.clone();
            let config = config.clone();
            std::thread::Builder::new()
                .name("gim-io".to_string())
                .spawn(move || {
                    io_loop(can, cmd_rx, response_tx, response_evict, ctx, config, is_running)
                })
                .map_err(|e| DriverError::IoThread(e.to_string()))?
        };

        debug!("Motor 0x{:02X}: IO thread started", can_id);

        Ok(Self {
            cmd_tx: ManuallyDrop::new(cmd_tx),
            response_rx,
            exchange_lock: Mutex::new(()),
            ctx,
            io_thread: Some(io_thread),
            is_running,
            can_id,
            torque_scale: TorqueScale::default(),
            config,
            interface: "unknown".to_string(),
        })
    }

    /// 设置力矩换算参数
    pub fn with_torque_scale(mut self, torque_scale: TorqueScale) -> Self {
        self.torque_scale = torque_scale;
        self
    }

    /// 设置接口名称（由 Builder 调用）
    pub(crate) fn with_interface(mut self, interface: String) -> Self {
        self.interface = interface;
        self
    }

    pub fn can_id(&self) -> u16 {
        self.can_id
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn torque_scale(&self) -> TorqueScale {
        self.torque_scale
    }

    /// 总线指标快照
    pub fn metrics(&self) -> MetricsSnapshot {
        self.ctx.metrics.snapshot()
    }

    /// 共享上下文（链路监控、订阅）
    pub fn context(&self) -> &Arc<BusContext> {
        &self.ctx
    }

    /// IO 线程是否仍在运行
    pub fn is_io_running(&self) -> bool {
        self.io_thread.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// 安全节点在 `timeout` 内发来过帧（事件或心跳）
    pub fn is_safety_peer_alive(&self, timeout: Duration) -> bool {
        self.ctx.safety_link.is_alive(timeout)
    }

    /// 电机在 `timeout` 内发来过帧
    pub fn is_motor_alive(&self, timeout: Duration) -> bool {
        self.ctx.motor_link.is_alive(timeout)
    }

    /// 订阅限位事件
    pub fn subscribe_safety(&self, capacity: usize) -> Receiver<SafetyEvent> {
        self.ctx.subscribe_safety(capacity)
    }

    /// 发送命令并等待发送回执
    ///
    /// # 错误
    /// - `DriverError::ChannelFull`: 命令队列持续满
    /// - `DriverError::ChannelClosed`: IO 线程已退出
    /// - `DriverError::Can`: 总线发送失败
    /// - `DriverError::Timeout`: 未在超时内收到回执
    pub fn send_command(&self, command: &MotorCommand) -> Result<(), DriverError> {
        self.send_frame(command.to_frame(self.can_id))
    }

    /// 发送原始帧并等待发送回执
    pub fn send_frame(&self, frame: GimFrame) -> Result<(), DriverError> {
        let timeout = Duration::from_millis(self.config.command_timeout_ms);
        let (ack_tx, ack_rx) = crossbeam_channel::bounded(1);

        self.cmd_tx
            .send_timeout(
                TxRequest {
                    frame,
                    ack: Some(ack_tx),
                },
                timeout,
            )
            .map_err(|e| match e {
                SendTimeoutError::Timeout(_) => DriverError::ChannelFull {
                    capacity: self.config.command_queue_capacity,
                },
                SendTimeoutError::Disconnected(_) => DriverError::ChannelClosed,
            })?;

        match ack_rx.recv_timeout(timeout) {
            Ok(result) => {
                result?;
                trace!("Sent frame 0x{:X}: {:02X?}", frame.id, frame.data_slice());
                Ok(())
            },
            Err(RecvTimeoutError::Timeout) => Err(DriverError::Timeout {
                what: "transmit acknowledgement",
                timeout_ms: self.config.command_timeout_ms,
            }),
            Err(RecvTimeoutError::Disconnected) => Err(DriverError::ChannelClosed),
        }
    }

    /// 启动电机
    pub fn start_motor(&self) -> Result<(), DriverError> {
        self.send_command(&MotorCommand::Start)
    }

    /// 停止电机
    pub fn stop_motor(&self) -> Result<(), DriverError> {
        self.send_command(&MotorCommand::Stop)
    }

    /// 停止当前控制（保持使能）
    pub fn stop_control(&self) -> Result<(), DriverError> {
        self.send_command(&MotorCommand::StopControl)
    }

    /// 刷新配置
    pub fn refresh_configuration(&self) -> Result<(), DriverError> {
        self.send_command(&MotorCommand::RefreshConfiguration)
    }

    /// 速度控制（rad/s），`duration_ms = 0` 表示持续执行
    pub fn send_velocity(&self, speed_rads: f64, duration_ms: u32) -> Result<(), DriverError> {
        self.send_command(&MotorCommand::Velocity {
            speed_rads: speed_rads as f32,
            duration_ms,
        })
    }

    /// 力矩控制（N·m）
    pub fn send_torque(&self, torque_nm: f64, duration_ms: u32) -> Result<(), DriverError> {
        self.send_command(&MotorCommand::Torque {
            torque_nm: torque_nm as f32,
            duration_ms,
        })
    }

    /// 位置控制（绝对位置，rad，不做限位）
    pub fn send_position_absolute(
        &self,
        position_rad: f64,
        duration_ms: u32,
    ) -> Result<(), DriverError> {
        self.send_command(&MotorCommand::Position {
            position_rad: position_rad as f32,
            duration_ms,
        })
    }

    /// 请求/应答交换
    ///
    /// 持有交换锁期间：丢弃应答通道中的陈旧帧，发送命令，
    /// 然后把到达的帧逐个交给 `accept`，直到它返回 `Some` 或超时。
    /// `accept` 返回 `Ok(None)` 表示该帧不是本次应答。
    ///
    /// 超时返回 `Ok(None)`。
    pub fn exchange<T, F>(
        &self,
        command: &MotorCommand,
        timeout: Duration,
        mut accept: F,
    ) -> Result<Option<T>, DriverError>
    where
        F: FnMut(&GimFrame) -> Result<Option<T>, DriverError>,
    {
        let _guard = self.exchange_lock.lock();
        let deadline = Instant::now() + timeout;

        let stale = self.response_rx.try_iter().count();
        if stale > 0 {
            trace!("Discarded {} stale response frames", stale);
        }

        self.send_command(command)?;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            match self.response_rx.recv_timeout(remaining) {
                Ok(frame) => {
                    if let Some(value) = accept(&frame)? {
                        return Ok(Some(value));
                    }
                    trace!(
                        "Ignored unrelated frame 0x{:X}: {:02X?}",
                        frame.id,
                        frame.data_slice()
                    );
                },
                Err(RecvTimeoutError::Timeout) => return Ok(None),
                Err(RecvTimeoutError::Disconnected) => return Err(DriverError::ChannelClosed),
            }
        }
    }

    /// 读取指标
    ///
    /// 任意 CAN ID 上回显为 0xB4 且指标 ID 匹配的帧都视为应答。
    ///
    /// # 返回
    /// - `Ok(Some(value))`: 读取成功
    /// - `Ok(None)`: 超时内无应答（正常的"暂无数据"）
    /// - `Err(DriverError::Protocol(DeviceFault))`: 电机返回非成功结果码
    pub fn retrieve_indicator(
        &self,
        indicator: IndicatorId,
        timeout: Duration,
    ) -> Result<Option<f32>, DriverError> {
        let echo = u8::from(Opcode::RetrieveIndicator);

        self.exchange(&MotorCommand::RetrieveIndicator(indicator), timeout, |frame| {
            if frame.len as usize != FRAME_LEN || frame.data[0] != echo {
                return Ok(None);
            }
            let reply = IndicatorReply::try_from(*frame)?;
            if !reply.is_for(indicator) {
                return Ok(None);
            }
            reply.result.check()?;
            Ok(Some(reply.value))
        })
    }

    /// 发送命令并等待电机反馈帧
    ///
    /// 只接受来自本电机 CAN ID、回显与命令操作码一致的帧。
    ///
    /// # 错误
    /// - `DriverError::Timeout`: 超时内无反馈
    /// - `DriverError::Protocol(InvalidLength)`: 反馈帧长度不是 8
    /// - `DriverError::Protocol(DeviceFault)`: `check_result` 为真且结果码非成功
    pub fn send_and_receive(
        &self,
        command: &MotorCommand,
        timeout: Duration,
        check_result: bool,
    ) -> Result<MotorStatus, DriverError> {
        let can_id = self.can_id as u32;
        let echo = u8::from(command.opcode());

        let feedback = self
            .exchange(command, timeout, |frame| {
                if frame.id != can_id {
                    return Ok(None);
                }
                let feedback = MotorFeedback::try_from(*frame)?;
                if feedback.command_echo != echo {
                    return Ok(None);
                }
                Ok(Some(feedback))
            })?
            .ok_or(DriverError::Timeout {
                what: "motor feedback",
                timeout_ms: timeout.as_millis() as u64,
            })?;

        let feedback = if check_result {
            feedback.check_result()?
        } else {
            feedback
        };
        Ok(feedback.to_status(self.torque_scale))
    }
}

impl Drop for Motor {
    fn drop(&mut self) {
        self.is_running.store(false, Ordering::Release);

        // 必须先真正 drop 掉 Sender，IO 线程才会看到 Disconnected
        unsafe {
            ManuallyDrop::drop(&mut self.cmd_tx);
        }

        if let Some(handle) = self.io_thread.take()
            && let Err(_e) = handle.join_timeout(IO_JOIN_TIMEOUT)
        {
            error!(
                "IO thread panicked or failed to shut down within {:?}",
                IO_JOIN_TIMEOUT
            );
        }
    }
}
