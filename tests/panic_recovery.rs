use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use rhai::Engine;

use merlin_runtime::{CallBridge, HostHandles, RuntimeConfig, ScriptRuntime};

fn quick_config() -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.watchdog.timeout_secs = 30.0;
    config.watchdog.poll_secs = 0.05;
    config.stop.grace_window_ms = 100;
    config.stop.poll_step_ms = 5;
    config.stop.detach_join_ms = 200;
    config
}

fn drain_until_finished(bridge: &CallBridge, runtime: &ScriptRuntime, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        bridge.drain_all();
        if runtime.is_finished() {
            bridge.drain_all();
            return true;
        }
        thread::sleep(Duration::from_millis(2));
    }
    false
}

#[test]
fn panicking_binding_does_not_kill_the_host() {
    let bridge = Arc::new(CallBridge::new());
    let mut runtime = ScriptRuntime::new(Arc::clone(&bridge), quick_config());
    let reported: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let report_sink = Arc::clone(&reported);
    runtime.set_error_report(Arc::new(move |message| {
        *report_sink.lock().unwrap() = Some(message);
    }));
    runtime.set_bindings(Arc::new(|engine: &mut Engine, _handles: &HostHandles| {
        engine.register_fn("boom", || -> () { panic!("binding exploded") });
    }));

    runtime.run_script("boom();").expect("run starts");
    assert!(drain_until_finished(&bridge, &runtime, Duration::from_secs(5)));
    let error = runtime.last_error().expect("fault must be captured");
    assert!(error.contains("binding exploded"), "unexpected error: {error}");
    assert_eq!(reported.lock().unwrap().as_deref(), Some("binding exploded"));
    assert!(runtime.cleanup_if_finished());

    // the faulted interpreter was discarded; a clean run works afterwards
    runtime.run_script("40 + 2").expect("second run starts");
    assert!(drain_until_finished(&bridge, &runtime, Duration::from_secs(5)));
    assert_eq!(runtime.last_error(), None);
    assert!(runtime.cleanup_if_finished());
}

#[test]
fn faulty_installer_is_survivable() {
    let bridge = Arc::new(CallBridge::new());
    let mut runtime = ScriptRuntime::new(Arc::clone(&bridge), quick_config());
    runtime.set_bindings(Arc::new(|_engine: &mut Engine, _handles: &HostHandles| {
        panic!("installer wired wrong");
    }));
    runtime.run_script("1 + 1").expect("run starts");
    assert!(drain_until_finished(&bridge, &runtime, Duration::from_secs(5)));
    let error = runtime.last_error().expect("installer fault must be captured");
    assert!(error.contains("installer wired wrong"), "unexpected error: {error}");
    assert!(runtime.cleanup_if_finished());
}
