use clap::Parser;

#[derive(Parser, Debug, Clone)]
#[command(name = "order-cache-coordinator", about)]
pub struct Cli {
    /// Tokio worker threads
    #[arg(long, default_value_t = default_workers())]
    pub workers: usize,
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2)
}
