use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use rhai::Engine;

use merlin_runtime::{CallBridge, HostHandles, RuntimeConfig, ScriptRuntime};

fn stop_config() -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.watchdog.timeout_secs = 30.0;
    config.watchdog.poll_secs = 0.05;
    config.stop.grace_window_ms = 100;
    config.stop.poll_step_ms = 5;
    config.stop.detach_join_ms = 200;
    config
}

#[test]
fn spinning_script_stops_within_bounds() {
    let bridge = Arc::new(CallBridge::new());
    let runtime = ScriptRuntime::new(Arc::clone(&bridge), stop_config());
    runtime.run_script("let x = 0; while true { x += 1; }").expect("run starts");
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    runtime.stop_current_run();
    let elapsed = started.elapsed();
    assert!(elapsed < Duration::from_secs(2), "stop must return quickly, took {elapsed:?}");
    assert!(runtime.is_finished());
    assert!(!runtime.is_running());
    assert!(runtime.cleanup_if_finished());
}

#[test]
fn interruptible_binding_observes_stop() {
    let bridge = Arc::new(CallBridge::new());
    let mut runtime = ScriptRuntime::new(Arc::clone(&bridge), stop_config());
    runtime.set_bindings(Arc::new(|engine: &mut Engine, handles: &HostHandles| {
        let interrupt = Arc::clone(&handles.interrupt);
        engine.register_fn("pause", move || {
            interrupt.wait_interruptible(Duration::from_secs(30), Duration::from_millis(5));
        });
    }));
    runtime.run_script("pause();").expect("run starts");
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    runtime.stop_current_run();
    let elapsed = started.elapsed();
    assert!(elapsed < Duration::from_secs(2), "interruptible wait should end in the grace window");
    assert!(runtime.is_finished());
    assert!(runtime.cleanup_if_finished());
}

#[test]
fn stubborn_binding_is_abandoned_not_waited_for() {
    let bridge = Arc::new(CallBridge::new());
    let mut runtime = ScriptRuntime::new(Arc::clone(&bridge), stop_config());
    runtime.set_bindings(Arc::new(|engine: &mut Engine, _handles: &HostHandles| {
        // deliberately ignores the interrupt flag
        engine.register_fn("stall", || thread::sleep(Duration::from_secs(3)));
    }));
    runtime.run_script("stall();").expect("run starts");
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    runtime.stop_current_run();
    let elapsed = started.elapsed();
    assert!(elapsed < Duration::from_millis(1500), "stop must not wait out a stuck worker, took {elapsed:?}");
    assert!(runtime.is_finished(), "forced teardown marks the run finished");
    assert!(!runtime.is_running());
    let error = runtime.last_error().expect("forced stop records an error");
    assert!(error.contains("terminated"), "unexpected error: {error}");
    assert!(runtime.cleanup_if_finished(), "a detached worker must not block cleanup");
}

#[test]
fn emergency_shutdown_cancels_run() {
    let bridge = Arc::new(CallBridge::new());
    let runtime = ScriptRuntime::new(Arc::clone(&bridge), stop_config());
    let emergency = Arc::new(AtomicBool::new(false));
    runtime.interrupt().bind_emergency_shutdown(Arc::clone(&emergency));
    runtime.run_script("let x = 0; while true { x += 1; }").expect("run starts");
    thread::sleep(Duration::from_millis(50));

    emergency.store(true, Ordering::SeqCst);
    assert!(runtime.wait_for_completion(Duration::from_secs(5)), "emergency flag should end the run");
    assert!(runtime.is_finished());
    assert!(runtime.cleanup_if_finished());
}
