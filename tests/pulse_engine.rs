// Integration tests for the dual-stepper pulse engine

use polargraph_rs::hardware::{MotorBank, SimMotorProbe, SimStepDriver};
use polargraph_rs::motion::{MotionError, PulseEngine};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

fn sim_bank() -> (MotorBank, Arc<SimMotorProbe>, Arc<SimMotorProbe>) {
    let (left, left_probe) = SimStepDriver::new("left", false);
    let (right, right_probe) = SimStepDriver::new("right", false);
    (
        MotorBank::new(Box::new(left), Box::new(right)),
        left_probe,
        right_probe,
    )
}

#[test]
fn test_conservation_across_ratios() {
    // Exactly |dl| and |dr| pulses must come out regardless of sign or
    // ratio between the two axes.
    let cases: &[(i64, i64)] = &[
        (100, 100),
        (100, 0),
        (0, 73),
        (1000, 1),
        (1, 1000),
        (-250, 125),
        (617, -613),
        (-40, -41),
    ];
    let engine = PulseEngine::new(2);
    for &(dl, dr) in cases {
        let (mut motors, left, right) = sim_bank();
        let cancel = AtomicBool::new(false);
        engine
            .run(&mut motors, dl, dr, 200_000, &cancel)
            .unwrap_or_else(|e| panic!("move ({dl}, {dr}) failed: {e}"));
        assert_eq!(left.pulses(), dl.abs(), "left pulses for ({dl}, {dr})");
        assert_eq!(right.pulses(), dr.abs(), "right pulses for ({dl}, {dr})");
        assert_eq!(left.position(), dl, "left position for ({dl}, {dr})");
        assert_eq!(right.position(), dr, "right position for ({dl}, {dr})");
    }
}

#[test]
fn test_zero_move_succeeds_without_pulses() {
    let engine = PulseEngine::new(2);
    let (mut motors, left, right) = sim_bank();
    let cancel = AtomicBool::new(false);
    engine.run(&mut motors, 0, 0, 1000, &cancel).unwrap();
    assert_eq!(left.pulses(), 0);
    assert_eq!(right.pulses(), 0);
}

#[test]
fn test_delta_past_i32_rejected() {
    let engine = PulseEngine::new(2);
    let (mut motors, _, _) = sim_bank();
    let cancel = AtomicBool::new(false);
    let huge = i64::from(i32::MAX) + 1;
    assert!(matches!(
        engine.run(&mut motors, 0, -huge, 1000, &cancel),
        Err(MotionError::DeltaOverflow { .. })
    ));
    assert!(matches!(
        engine.run(&mut motors, huge, 0, 1000, &cancel),
        Err(MotionError::DeltaOverflow { .. })
    ));
}

#[test]
fn test_cancel_latency_is_bounded() {
    // A cancel raised mid-move must halt the engine within roughly one
    // step period, not run the move to completion.
    let engine = PulseEngine::new(2);
    let (mut motors, left, _) = sim_bank();
    let cancel = Arc::new(AtomicBool::new(false));

    let flag = cancel.clone();
    let setter = std::thread::spawn(move || {
        std::thread::sleep(Duration::from_millis(50));
        flag.store(true, Ordering::SeqCst);
    });

    // 1000 steps/s: the full move would take 20 seconds.
    let started = Instant::now();
    let result = engine.run(&mut motors, 20_000, 20_000, 1000, &cancel);
    let elapsed = started.elapsed();
    setter.join().unwrap();

    assert!(matches!(result, Err(MotionError::Cancelled)));
    assert!(
        elapsed < Duration::from_millis(500),
        "cancel took {elapsed:?}"
    );
    assert!(left.pulses() < 1000);
    assert!(!left.enabled());
}

#[test]
fn test_single_motor_jog_counts() {
    let engine = PulseEngine::new(2);
    let (mut motors, left, right) = sim_bank();
    let cancel = AtomicBool::new(false);
    engine
        .run_single(motors.driver_mut(polargraph_rs::hardware::MotorId::Left), -170, 100_000, &cancel)
        .unwrap();
    assert_eq!(left.pulses(), 170);
    assert_eq!(left.position(), -170);
    assert_eq!(right.pulses(), 0);
}
