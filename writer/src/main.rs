use std::error::Error;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use shmq::writer::{QueueWriter, WriterConfig};

/// Pushed after the counted sequence so the reader knows the stream is
/// over.
const END_OF_STREAM: i32 = -1;

#[derive(Parser)]
#[clap(about = "Demo producer: pushes a sequence of integers into a shared queue")]
struct Opts {
    #[clap(short = 'c', long = "config", default_value = "shmq-writer.toml")]
    config: String,
    #[clap(short = 'n', long = "count", default_value_t = 1_000_000)]
    count: i32,
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let opts: Opts = Opts::parse();
    let cfg: WriterConfig = confy::load_path(&opts.config)?;
    info!(config = %opts.config, queue = %cfg.shmem.queue_name, "starting demo writer");

    let writer = QueueWriter::<i32>::new(&cfg)?;
    run(&writer, opts.count)?;
    writer.close();
    Ok(())
}

fn run(writer: &QueueWriter<i32>, count: i32) -> Result<(), Box<dyn Error>> {
    for x in 0..count {
        writer.push(x)?;
        if x % 1_000_000 == 0 {
            info!(pushed = x, "progress");
        }
    }
    writer.push(END_OF_STREAM)?;
    info!(count, "sequence pushed; end-of-stream sent");
    Ok(())
}
