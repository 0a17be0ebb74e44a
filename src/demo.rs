//! Demo and benchmark runners for the command-line binary.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use tracing::{info, warn};

use edge_scheduler::{
    MetricsCollector, PoolConfig, ResourceClass, Scheduler, SchedulerConfig, SystemHints, Task,
    TaskLimits, WorkerPool, cpu_count,
};

// How long the demo waits for the background loop before giving up.
const DRAIN_TIMEOUT_MS: u64 = 5000;
const DRAIN_POLL_MS: u64 = 5;

/// Best-effort CPU user/system time snapshot (seconds) on Unix platforms.
#[cfg(unix)]
fn cpu_times_seconds() -> Option<(f64, f64)> {
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::getrusage(libc::RUSAGE_SELF, &mut usage) };
    if rc != 0 {
        return None;
    }
    let user = usage.ru_utime.tv_sec as f64 + (usage.ru_utime.tv_usec as f64 / 1_000_000.0);
    let sys = usage.ru_stime.tv_sec as f64 + (usage.ru_stime.tv_usec as f64 / 1_000_000.0);
    Some((user, sys))
}

/// Stub on non-Unix platforms.
#[cfg(not(unix))]
fn cpu_times_seconds() -> Option<(f64, f64)> {
    None
}

fn sleep_ms(ms: u64) {
    if ms > 0 {
        thread::sleep(Duration::from_millis(ms));
    }
}

/// Poll until `done` holds or the drain timeout passes.
fn wait_until(mut done: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_millis(DRAIN_TIMEOUT_MS);
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        thread::sleep(Duration::from_millis(DRAIN_POLL_MS));
    }
    done()
}

fn demo_tasks() -> Vec<(Task, u64)> {
    vec![
        (
            Task::new("camera_capture", ResourceClass::Gpu, 8).with_cores([0, 1]),
            20,
        ),
        (
            Task::new("ai_inference", ResourceClass::Gpu, 7)
                .with_realtime(true)
                .with_cores([2, 3]),
            30,
        ),
        (Task::new("tracking", ResourceClass::Cpu, 6).with_cores([4]), 15),
        (Task::new("logger", ResourceClass::Io, 2), 5),
        (
            Task::new("emergency_stop", ResourceClass::Cpu, 10).with_realtime(true),
            1,
        ),
        // Rejected by the producer-side validity check.
        (Task::new("overdriven", ResourceClass::Cpu, 11), 1),
    ]
}

/// Run the scheduler and pool side by side and print a summary.
pub fn run_demo() -> anyhow::Result<()> {
    info!(cpus = cpu_count(), "demo start");
    let metrics = Arc::new(MetricsCollector::new());
    let scheduler = Scheduler::with_config(SchedulerConfig {
        limits: TaskLimits::default(),
        ..SchedulerConfig::default()
    })
    .with_observer(metrics.clone())
    .with_hints(Arc::new(SystemHints));
    let limits = scheduler.config().limits;

    let mut accepted = 0usize;
    let mut rejected = 0usize;
    for (task, work_ms) in demo_tasks() {
        if let Err(err) = task.validate(&limits) {
            warn!(task = %task.name, error = %err, "task rejected");
            rejected += 1;
            continue;
        }
        println!("{}", task.to_json());
        scheduler.add_task(task.with_work(move || sleep_ms(work_ms)));
        accepted += 1;
    }

    scheduler.start().context("starting scheduler")?;
    let drained = wait_until(|| metrics.summary().completed == accepted);
    scheduler.stop();
    if !drained {
        bail!("scheduler did not drain {accepted} tasks in time");
    }
    let order: Vec<String> = metrics.all().into_iter().map(|m| m.task_name).collect();
    let sched_summary = metrics.summary();

    let pool_metrics = Arc::new(MetricsCollector::new());
    let pool =
        WorkerPool::with_config(PoolConfig::with_workers(4)).context("starting worker pool")?;
    let jobs = [("camera", 100), ("ai", 150), ("tracking", 80), ("logger", 30)];
    for (id, (name, ms)) in jobs.iter().copied().enumerate() {
        let pool_metrics = Arc::clone(&pool_metrics);
        let id = id as u64 + 1;
        pool.submit(move || {
            pool_metrics.record_start(id, name);
            sleep_ms(ms);
            pool_metrics.record_end(id, true);
        })?;
    }
    pool.shutdown();
    let pool_summary = pool_metrics.summary();

    println!("DEMO SUMMARY");
    println!("cpu_count={}", cpu_count());
    println!("scheduler_tasks_run={}", sched_summary.completed);
    println!("scheduler_failures={}", sched_summary.failed);
    println!("scheduler_order={}", order.join(","));
    println!("tasks_rejected={rejected}");
    println!("pool_jobs_run={}", pool_summary.completed);
    for (name, ms) in &pool_summary.per_task_ms {
        println!("pool_job {name}: {ms:.1}ms");
    }
    println!("pool_total_ms={:.1}", pool_summary.total_ms);
    Ok(())
}

/// Aggregated numbers from one benchmark mode.
struct BenchResult {
    mode: &'static str,
    tasks: usize,
    workers: usize,
    elapsed_ms: f64,
    cpu_user_s: Option<f64>,
    cpu_sys_s: Option<f64>,
}

impl BenchResult {
    fn csv_line(&self) -> String {
        let throughput = if self.elapsed_ms > 0.0 {
            self.tasks as f64 / (self.elapsed_ms / 1000.0)
        } else {
            0.0
        };
        let fmt_opt = |value: Option<f64>| {
            value
                .map(|v| format!("{v:.4}"))
                .unwrap_or_else(|| "NA".to_string())
        };
        format!(
            "{},{},{},{:.2},{:.2},{},{}",
            self.mode,
            self.tasks,
            self.workers,
            self.elapsed_ms,
            throughput,
            fmt_opt(self.cpu_user_s),
            fmt_opt(self.cpu_sys_s)
        )
    }
}

fn timed(
    mode: &'static str,
    tasks: usize,
    workers: usize,
    run: impl FnOnce() -> anyhow::Result<()>,
) -> anyhow::Result<BenchResult> {
    let cpu_start = cpu_times_seconds();
    let start = Instant::now();
    run()?;
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    let (cpu_user_s, cpu_sys_s) = match (cpu_start, cpu_times_seconds()) {
        (Some((user_start, sys_start)), Some((user_end, sys_end))) => {
            (Some(user_end - user_start), Some(sys_end - sys_start))
        }
        _ => (None, None),
    };
    Ok(BenchResult {
        mode,
        tasks,
        workers,
        elapsed_ms,
        cpu_user_s,
        cpu_sys_s,
    })
}

/// Drain `tasks` units of `work_ms` through the scheduler and through a pool.
pub fn run_benchmark(tasks: usize, workers: usize, work_ms: u64) -> anyhow::Result<()> {
    if tasks == 0 {
        bail!("tasks must be > 0");
    }
    let workers = if workers == 0 { cpu_count() } else { workers };

    let scheduler_result = timed("scheduler", tasks, 1, || {
        let done = Arc::new(AtomicUsize::new(0));
        let scheduler = Scheduler::with_config(SchedulerConfig {
            idle_backoff_ms: 1,
            ..SchedulerConfig::default()
        });
        for i in 0..tasks {
            let done = Arc::clone(&done);
            scheduler.add_task(
                Task::new(format!("bench-{i}"), ResourceClass::Cpu, (i % 11) as i32).with_work(
                    move || {
                        sleep_ms(work_ms);
                        done.fetch_add(1, Ordering::SeqCst);
                    },
                ),
            );
        }
        scheduler.start()?;
        let drained = wait_until(|| done.load(Ordering::SeqCst) == tasks);
        scheduler.stop();
        if !drained {
            bail!("scheduler benchmark timed out");
        }
        Ok(())
    })?;

    let pool_result = timed("pool", tasks, workers, || {
        let done = Arc::new(AtomicUsize::new(0));
        let pool = WorkerPool::new(workers)?;
        for _ in 0..tasks {
            let done = Arc::clone(&done);
            pool.submit(move || {
                sleep_ms(work_ms);
                done.fetch_add(1, Ordering::SeqCst);
            })?;
        }
        pool.shutdown();
        if done.load(Ordering::SeqCst) != tasks {
            bail!("pool benchmark lost jobs");
        }
        Ok(())
    })?;

    println!("mode,tasks,workers,elapsed_ms,throughput_tasks_per_s,cpu_user_s,cpu_sys_s");
    println!("{}", scheduler_result.csv_line());
    println!("{}", pool_result.csv_line());
    Ok(())
}
