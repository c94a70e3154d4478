//! Mock CAN 适配器
//!
//! 无硬件依赖的脚本化总线，供驱动层/客户端测试和仿真使用：
//!
//! - `MockBus::inject()` 注入入站帧（模拟电机应答、安全节点事件）
//! - `MockBus::sent_frames()` 查看已发送的帧
//! - `MockBus::set_responder()` 安装应答器，对每个发送帧同步产生应答帧

use crate::{CanAdapter, CanError, GimFrame};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

type Responder = Box<dyn FnMut(&GimFrame) -> Vec<GimFrame> + Send>;

/// Mock 总线句柄（可克隆，测试侧持有）
#[derive(Clone)]
pub struct MockBus {
    inbound: Sender<GimFrame>,
    sent: Arc<Mutex<Vec<GimFrame>>>,
    responder: Arc<Mutex<Option<Responder>>>,
    fail_sends: Arc<AtomicBool>,
}

impl MockBus {
    /// 注入一帧，下次 `receive()` 时返回
    pub fn inject(&self, frame: GimFrame) {
        let _ = self.inbound.send(frame);
    }

    /// 已发送帧的快照
    pub fn sent_frames(&self) -> Vec<GimFrame> {
        self.sent.lock().clone()
    }

    /// 清空发送记录
    pub fn clear_sent(&self) {
        self.sent.lock().clear();
    }

    /// 安装应答器：每个发送帧调用一次，返回的帧被注入入站队列
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&GimFrame) -> Vec<GimFrame> + Send + 'static,
    {
        *self.responder.lock() = Some(Box::new(responder));
    }

    /// 移除应答器
    pub fn clear_responder(&self) {
        *self.responder.lock() = None;
    }

    /// 使后续发送失败（模拟总线故障）
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Release);
    }
}

/// Mock CAN 适配器（由 IO 线程独占）
pub struct MockCanAdapter {
    inbound_rx: Receiver<GimFrame>,
    bus: MockBus,
    receive_timeout: Duration,
}

impl MockCanAdapter {
    /// 创建适配器与对应的总线句柄
    pub fn new() -> (Self, MockBus) {
        let (inbound_tx, inbound_rx) = crossbeam_channel::unbounded();
        let bus = MockBus {
            inbound: inbound_tx,
            sent: Arc::new(Mutex::new(Vec::new())),
            responder: Arc::new(Mutex::new(None)),
            fail_sends: Arc::new(AtomicBool::new(false)),
        };

        (
            Self {
                inbound_rx,
                bus: bus.clone(),
                receive_timeout: Duration::from_millis(2),
            },
            bus,
        )
    }
}

impl CanAdapter for MockCanAdapter {
    fn send(&mut self, frame: GimFrame) -> Result<(), CanError> {
        if self.bus.fail_sends.load(Ordering::Acquire) {
            return Err(CanError::Io(std::io::Error::other("mock bus send failure")));
        }

        self.bus.sent.lock().push(frame);

        let replies = match self.bus.responder.lock().as_mut() {
            Some(responder) => responder(&frame),
            None => Vec::new(),
        };
        for reply in replies {
            self.bus.inject(reply);
        }
        Ok(())
    }

    fn receive(&mut self) -> Result<GimFrame, CanError> {
        match self.inbound_rx.recv_timeout(self.receive_timeout) {
            Ok(frame) => Ok(frame),
            Err(RecvTimeoutError::Timeout) => Err(CanError::Timeout),
            Err(RecvTimeoutError::Disconnected) => Err(CanError::NotStarted),
        }
    }

    fn set_receive_timeout(&mut self, timeout: Duration) {
        self.receive_timeout = timeout;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inject_and_receive() {
        let (mut adapter, bus) = MockCanAdapter::new();
        bus.inject(GimFrame::new_standard(0x005, &[0x01]));
        let frame = adapter.receive().unwrap();
        assert_eq!(frame.id, 0x005);
        assert!(matches!(adapter.receive(), Err(CanError::Timeout)));
    }

    #[test]
    fn test_responder_replies_are_received() {
        let (mut adapter, bus) = MockCanAdapter::new();
        bus.set_responder(|frame| vec![GimFrame::new_standard(frame.id as u16, &[frame.data[0]; 8])]);

        adapter.send(GimFrame::new_standard(0x0A, &[0x91])).unwrap();
        assert_eq!(bus.sent_frames().len(), 1);
        let reply = adapter.receive().unwrap();
        assert_eq!(reply.data, [0x91; 8]);
    }

    #[test]
    fn test_fail_sends() {
        let (mut adapter, bus) = MockCanAdapter::new();
        bus.set_fail_sends(true);
        assert!(matches!(
            adapter.send(GimFrame::new_standard(0x0A, &[0x92])),
            Err(CanError::Io(_))
        ));
        assert!(bus.sent_frames().is_empty());
    }

    #[test]
    fn test_try_receive_empty() {
        let (mut adapter, _bus) = MockCanAdapter::new();
        assert!(adapter.try_receive().unwrap().is_none());
    }
}
