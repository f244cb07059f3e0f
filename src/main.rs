use std::fs;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use rhai::Engine;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use merlin_runtime::cli::CliOptions;
use merlin_runtime::interpreter::HostHandles;
use merlin_runtime::{CallBridge, RuntimeConfig, ScriptRuntime};

fn main() {
    let options = match CliOptions::parse_from_env() {
        Ok(parsed) => parsed,
        Err(err) => {
            eprintln!("[cli] {err}");
            process::exit(2);
        }
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_env("MERLIN_LOG").unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let Some(script_path) = options.script() else {
        eprintln!("usage: merlin_runtime <script.rhai> [--config <path>] [--timeout <secs>] [--grace <ms>]");
        process::exit(2);
    };
    let mut config = match options.config_path() {
        Some(path) => RuntimeConfig::load_or_default(path),
        None => RuntimeConfig::default(),
    };
    config.apply_overrides(&options.config_overrides());

    let source = match fs::read_to_string(script_path) {
        Ok(source) => source,
        Err(err) => {
            error!("failed to read {}: {err}", script_path.display());
            process::exit(1);
        }
    };

    // The bridge is created here so the main thread is the owner thread.
    let bridge = Arc::new(CallBridge::new());
    let mut runtime = ScriptRuntime::new(Arc::clone(&bridge), config.clone());
    runtime.set_bindings(Arc::new(install_host_bindings));
    runtime.set_error_report(Arc::new(|message| {
        eprintln!("--- script fault ---");
        eprintln!("{message}");
    }));

    if let Err(err) = runtime.run_script(&source) {
        error!("failed to start {}: {err}", script_path.display());
        bridge.shutdown();
        process::exit(1);
    }

    let frame = Duration::from_millis(config.owner_loop.frame_sleep_ms.max(1));
    loop {
        if bridge.wait_pending(frame) {
            if config.owner_loop.drain_budget == 0 {
                bridge.drain_all();
            } else {
                for _ in 0..config.owner_loop.drain_budget {
                    if !bridge.drain_one() {
                        break;
                    }
                }
            }
        }
        if runtime.is_finished() {
            // pick up anything the worker queued on its way out
            bridge.drain_all();
            break;
        }
    }
    runtime.cleanup_if_finished();

    let failed = runtime.last_error();
    bridge.shutdown();
    match failed {
        Some(err) => {
            error!("script ended with error: {err}");
            process::exit(1);
        }
        None => info!("script completed"),
    }
}

fn install_host_bindings(engine: &mut Engine, handles: &HostHandles) {
    let bridge = Arc::clone(&handles.bridge);
    engine.register_fn("log", move |message: &str| {
        let line = message.to_string();
        bridge.submit_async(move || info!(target: "script", "{line}"));
    });

    let interrupt = Arc::clone(&handles.interrupt);
    engine.register_fn("sleep_ms", move |millis: rhai::INT| {
        let wait = Duration::from_millis(millis.max(0) as u64);
        interrupt.wait_interruptible(wait, Duration::from_millis(10));
    });

    // Blocks the script until the owner thread has drained past this point;
    // the cheapest possible frame-sync primitive.
    let bridge = Arc::clone(&handles.bridge);
    engine.register_fn("await_frame", move || {
        let _ = bridge.submit_blocking(|| ());
    });

    let control = Arc::clone(&handles.control);
    engine.register_fn("interrupted", move || -> bool { control.abort_requested() });
}
