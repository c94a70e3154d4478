//! 分发器并发测试
//!
//! 多个线程同时进行请求/应答交换并订阅限位事件时，
//! 每个消费者都只拿到属于自己的帧。

use gim_can::{GimFrame, MockCanAdapter};
use gim_driver::Motor;
use gim_protocol::{IndicatorId, IndicatorReply, ResultCode, SafetyEvent, SafetyStatus};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn indicator_responder(frame: &GimFrame) -> Vec<GimFrame> {
    if frame.data[0] != 0xB4 {
        return Vec::new();
    }
    let value = match frame.data[1] {
        0x13 => 0.75,
        0x14 => -2.0,
        _ => return Vec::new(),
    };
    let reply = IndicatorReply {
        indicator: frame.data[1],
        result: ResultCode::Success,
        value,
    };
    vec![GimFrame::new_standard(0x0A, &reply.encode())]
}

#[test]
fn concurrent_exchanges_receive_their_own_replies() {
    let (adapter, bus) = MockCanAdapter::new();
    bus.set_responder(indicator_responder);
    let motor = Arc::new(Motor::new(adapter, 0x0A, None).unwrap());

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let motor = motor.clone();
            thread::spawn(move || {
                let (indicator, expected) = if i % 2 == 0 {
                    (IndicatorId::ShaftAngle, 0.75)
                } else {
                    (IndicatorId::ShaftSpeed, -2.0)
                };
                for _ in 0..10 {
                    let value = motor
                        .retrieve_indicator(indicator, Duration::from_millis(500))
                        .unwrap();
                    assert_eq!(value, Some(expected));
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(motor.metrics().tx_frames_total, 40);
}

#[test]
fn safety_events_fan_out_to_every_subscriber() {
    let (adapter, bus) = MockCanAdapter::new();
    bus.set_responder(indicator_responder);
    let motor = Motor::new(adapter, 0x0A, None).unwrap();

    let first = motor.subscribe_safety(8);
    let second = motor.subscribe_safety(8);

    bus.inject(SafetyEvent::new(1, SafetyStatus::HardStopMax).to_frame());

    // 交换在事件到达期间进行，事件不会被应答通道吞掉
    let value = motor
        .retrieve_indicator(IndicatorId::ShaftAngle, Duration::from_millis(500))
        .unwrap();
    assert_eq!(value, Some(0.75));

    for rx in [&first, &second] {
        let event = rx.recv_timeout(Duration::from_millis(500)).unwrap();
        assert_eq!(event, SafetyEvent::new(1, SafetyStatus::HardStopMax));
    }
}
