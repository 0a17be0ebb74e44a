mod demo;

use clap::{Parser, Subcommand};

use edge_scheduler::logging;

#[derive(Parser, Debug)]
#[command(
    name = "edge_scheduler",
    version,
    about = "Priority task scheduler for edge compute nodes"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler and worker pool demo (default).
    Demo,
    /// Measure scheduler and pool throughput, printed as CSV.
    Bench {
        /// Units of work pushed through each mode.
        #[arg(long, default_value_t = 200)]
        tasks: usize,
        /// Pool workers; 0 uses every online processing unit.
        #[arg(long, default_value_t = 4)]
        workers: usize,
        /// Simulated work per unit in milliseconds.
        #[arg(long, default_value_t = 1)]
        work_ms: u64,
    },
}

fn main() -> anyhow::Result<()> {
    logging::init("info");
    let cli = Cli::parse();
    match cli.command.unwrap_or(Command::Demo) {
        Command::Demo => demo::run_demo(),
        Command::Bench {
            tasks,
            workers,
            work_ms,
        } => demo::run_benchmark(tasks, workers, work_ms),
    }
}
