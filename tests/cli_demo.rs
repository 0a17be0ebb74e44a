//! CLI integration tests for the demo and benchmark modes.

use std::process::Command;

fn run(args: &[&str]) -> String {
    let bin = env!("CARGO_BIN_EXE_edge_scheduler");
    let output = Command::new(bin)
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .expect("failed to run binary");
    assert!(
        output.status.success(),
        "binary exited with non-zero status: {:?}\nstderr: {}",
        output.status,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn field<'a>(stdout: &'a str, key: &str) -> &'a str {
    stdout
        .lines()
        .find_map(|line| line.strip_prefix(key)?.strip_prefix('='))
        .unwrap_or_else(|| panic!("{key} line missing"))
        .trim()
}

#[test]
fn demo_dispatches_realtime_first_and_rejects_invalid() {
    let stdout = run(&[]);
    assert!(stdout.contains("DEMO SUMMARY"), "demo summary missing from output");

    assert_eq!(field(&stdout, "scheduler_tasks_run"), "5");
    assert_eq!(field(&stdout, "scheduler_failures"), "0");
    assert_eq!(field(&stdout, "tasks_rejected"), "1");
    assert_eq!(
        field(&stdout, "scheduler_order"),
        "emergency_stop,ai_inference,camera_capture,tracking,logger"
    );
    assert_eq!(field(&stdout, "pool_jobs_run"), "4");

    // Accepted tasks are echoed as JSON before dispatch.
    assert!(stdout.contains(r#""name":"ai_inference","type":"GPU","priority":7,"realtime":true"#));
}

#[test]
fn bench_prints_one_row_per_mode() {
    let stdout = run(&["bench", "--tasks", "20", "--workers", "2", "--work-ms", "0"]);
    let rows: Vec<&str> = stdout.lines().collect();
    assert_eq!(rows.len(), 3);
    assert!(rows[0].starts_with("mode,tasks,workers"));
    assert!(rows[1].starts_with("scheduler,20,1,"));
    assert!(rows[2].starts_with("pool,20,2,"));
}
