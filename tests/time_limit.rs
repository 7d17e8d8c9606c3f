mod common;

use common::{run_code_with_config, test_config};
use php_core::vm::engine::VmError;
use php_core::vm::executor::ExecutionConfig;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

fn limited(ms: u64) -> ExecutionConfig {
    ExecutionConfig {
        timeout_ms: ms,
        ..test_config()
    }
}

#[test]
fn runaway_loops_hit_the_time_limit() {
    let start = Instant::now();
    match run_code_with_config("<?php $i = 0; while (true) { $i++; }", limited(100)) {
        Err(VmError::Fatal(message)) => assert!(
            message.starts_with("Maximum execution time of 1 second exceeded"),
            "{}",
            message
        ),
        other => panic!("expected a fatal error, got {:?}", other.map(|r| r.stdout)),
    }
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[test]
fn time_limit_cannot_be_caught() {
    let code = "<?php
        try { while (true) {} }
        catch (Throwable $e) { echo 'caught'; }
        finally { echo 'finally'; }";
    match run_code_with_config(code, limited(100)) {
        Err(VmError::Fatal(message)) => assert!(message.contains("Maximum execution time")),
        other => panic!("expected a fatal error, got {:?}", other.map(|r| r.stdout)),
    }
}

#[test]
fn interrupt_flag_stops_execution_from_another_thread() {
    let flag = Arc::new(AtomicBool::new(false));
    let trigger = flag.clone();
    let setter = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        trigger.store(true, Ordering::SeqCst);
    });
    let config = ExecutionConfig {
        timeout_ms: 0,
        interrupt: Some(flag),
        ..test_config()
    };
    let outcome = run_code_with_config("<?php echo 'started'; while (true) {}", config);
    setter.join().unwrap();
    match outcome {
        Err(VmError::Fatal(message)) => assert!(message.contains("Execution interrupted"), "{}", message),
        other => panic!("expected interruption, got {:?}", other.map(|r| r.stdout)),
    }
}

#[test]
fn set_time_limit_replaces_the_budget() {
    let code = "<?php set_time_limit(0); $t = 0; for ($i = 0; $i < 200000; $i++) { $t += $i; } echo $t;";
    let result = run_code_with_config(code, limited(10_000)).unwrap();
    assert_eq!(result.stdout, "19999900000");
}

#[test]
fn fast_scripts_are_unaffected() {
    let result = run_code_with_config("<?php echo array_sum(range(1, 100));", limited(1_000)).unwrap();
    assert_eq!(result.stdout, "5050");
    assert_eq!(result.exit_status, 0);
}
