//! SDK 端到端测试（Mock 总线）

use gim_can::{GimFrame, MockBus, MockCanAdapter};
use gim_client::MemoryStore;
use gim_protocol::{IndicatorReply, MotorFeedback, ResultCode};
use gim_sdk::prelude::*;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn setup() -> (Actuator, MockBus) {
    gim_sdk::init_logger();
    let (adapter, bus) = MockCanAdapter::new();
    let actuator = ActuatorBuilder::new()
        .store(Arc::new(MemoryStore::new()))
        .status_monitor_config(StatusMonitorConfig {
            rate_hz: 100.0,
            request_timeout: Duration::from_millis(40),
            request_gap: Duration::ZERO,
            failure_threshold: 3,
            join_timeout: Duration::from_secs(1),
        })
        .build_with_adapter(adapter)
        .unwrap();
    (actuator, bus)
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(3);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

fn stop_count(bus: &MockBus) -> usize {
    bus.sent_frames().iter().filter(|f| f.data[0] == 0x92).count()
}

#[derive(Default)]
struct Events {
    hard_stops: Mutex<Vec<(SafetyEvent, bool)>>,
    samples: Mutex<Vec<StatusSample>>,
    degraded: Mutex<u32>,
}

impl SafetyObserver for Events {
    fn on_hard_stop(&self, event: SafetyEvent, motor_stopped: bool) -> ObserverResult {
        self.hard_stops.lock().push((event, motor_stopped));
        Ok(())
    }
}

impl StatusObserver for Events {
    fn on_status(&self, sample: &StatusSample) -> ObserverResult {
        self.samples.lock().push(*sample);
        Ok(())
    }

    fn on_degraded(&self, _consecutive_failures: u32) -> ObserverResult {
        *self.degraded.lock() += 1;
        Ok(())
    }
}

#[test]
fn hard_stop_with_auto_stop_sends_exactly_one_stop() {
    let (actuator, bus) = setup();
    let events = Arc::new(Events::default());
    actuator
        .start_safety_listener(true, Some(events.clone()))
        .unwrap();

    bus.inject(SafetyEvent::new(1, SafetyStatus::HardStopMax).to_frame());
    assert!(wait_until(|| events.hard_stops.lock().len() == 1));

    assert_eq!(stop_count(&bus), 1);
    assert_eq!(
        events.hard_stops.lock()[0],
        (SafetyEvent::new(1, SafetyStatus::HardStopMax), true)
    );
}

#[test]
fn hard_stop_without_auto_stop_only_notifies() {
    let (actuator, bus) = setup();
    let events = Arc::new(Events::default());
    actuator
        .start_safety_listener(false, Some(events.clone()))
        .unwrap();

    bus.inject(SafetyEvent::new(1, SafetyStatus::HardStopMin).to_frame());
    assert!(wait_until(|| events.hard_stops.lock().len() == 1));
    std::thread::sleep(Duration::from_millis(20));

    assert_eq!(stop_count(&bus), 0);
    assert_eq!(events.hard_stops.lock().len(), 1);
    assert!(!events.hard_stops.lock()[0].1);
}

#[test]
fn status_monitor_reports_samples_and_latest() {
    let (actuator, bus) = setup();
    bus.set_responder(|frame: &GimFrame| {
        if frame.data[0] != 0xB4 {
            return Vec::new();
        }
        let value = if frame.data[1] == 0x13 { 0.5 } else { 2.0 };
        let reply = IndicatorReply {
            indicator: frame.data[1],
            result: ResultCode::Success,
            value,
        };
        vec![GimFrame::new_standard(0x0A, &reply.encode())]
    });
    actuator.set_position_offset(0.25).unwrap();

    let events = Arc::new(Events::default());
    actuator.start_status_monitor(100.0, Some(events.clone())).unwrap();
    assert!(wait_until(|| !events.samples.lock().is_empty()));

    let latest = actuator.latest_status().unwrap();
    assert_eq!(latest.status.position_rad, 0.5);
    assert_eq!(latest.status.speed_rads, 2.0);
    assert_eq!(latest.relative_position_rad, 0.25);
    actuator.stop_status_monitor().unwrap();
    assert!(!actuator.is_status_monitor_running());
}

#[test]
fn silent_motor_degrades_status_monitor() {
    let (actuator, _bus) = setup();
    let events = Arc::new(Events::default());
    actuator.start_status_monitor(100.0, Some(events.clone())).unwrap();

    assert!(wait_until(|| *events.degraded.lock() >= 1));
    assert!(events.samples.lock().is_empty());
    assert!(actuator.latest_status().is_none());
}

#[test]
fn send_and_receive_decodes_motor_feedback() {
    let (actuator, bus) = setup();
    bus.set_responder(|frame: &GimFrame| {
        if frame.data[0] != 0x91 {
            return Vec::new();
        }
        let feedback = MotorFeedback::from_physical(0x91, ResultCode::Success, 30, 1.0, -2.0, 3.0);
        vec![GimFrame::new_standard(0x0A, &feedback.encode())]
    });

    let status = actuator
        .send_and_receive(&MotorCommand::Start, Duration::from_millis(200), true)
        .unwrap();
    assert_eq!(status.temperature_c, 30);
    assert!((status.position_rad - 1.0).abs() < 25.0 / 65535.0);
    assert!((status.speed_rads + 2.0).abs() < 130.0 / 4095.0);
}

#[test]
fn send_and_receive_reports_result_code() {
    let (actuator, bus) = setup();
    bus.set_responder(|frame: &GimFrame| {
        let feedback =
            MotorFeedback::from_physical(frame.data[0], ResultCode::UnknownCommand, 0, 0.0, 0.0, 0.0);
        vec![GimFrame::new_standard(0x0A, &feedback.encode())]
    });

    let err = actuator
        .send_and_receive(&MotorCommand::Stop, Duration::from_millis(200), true)
        .unwrap_err();
    assert!(matches!(
        err,
        GimError::Result {
            code: ResultCode::UnknownCommand
        }
    ));

    let status = actuator
        .send_and_receive(&MotorCommand::Stop, Duration::from_millis(200), false)
        .unwrap();
    assert_eq!(status.result, ResultCode::UnknownCommand);
}

#[test]
fn send_and_receive_times_out_without_feedback() {
    let (actuator, _bus) = setup();
    let err = actuator
        .send_and_receive(&MotorCommand::Start, Duration::from_millis(30), true)
        .unwrap_err();
    assert!(err.is_timeout());
}
