use std::error::Error;
use std::time::Instant;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use shmq::reader::{QueueReader, ReaderConfig};

/// Value marking the end of the producer's sequence.
const END_OF_STREAM: i32 = -1;

#[derive(Parser)]
#[clap(about = "Demo consumer: pops integers from a shared queue until end-of-stream")]
struct Opts {
    #[clap(short = 'c', long = "config", default_value = "shmq-reader.toml")]
    config: String,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let opts: Opts = Opts::parse();
    let cfg: ReaderConfig = confy::load_path(&opts.config)?;
    info!(config = %opts.config, queue = %cfg.shmem.queue_name, "starting demo reader");

    let reader = QueueReader::<i32>::new(&cfg)?;
    run(&reader)?;
    reader.close();
    Ok(())
}

fn run(reader: &QueueReader<i32>) -> Result<(), Box<dyn Error>> {
    let start = Instant::now();
    let mut count = 0u64;
    loop {
        let value = reader.pop()?;
        if value == END_OF_STREAM {
            break;
        }
        count += 1;
        if value % 1_000_000 == 0 {
            info!(value, "progress");
        }
    }
    let duration = start.elapsed();
    let iops = (count as f64 / duration.as_millis().max(1) as f64) * 1_000f64;
    info!(
        received = count,
        kops_per_sec = (iops / 1000f64) as u64,
        elapsed = ?duration,
        "stream complete"
    );
    Ok(())
}
