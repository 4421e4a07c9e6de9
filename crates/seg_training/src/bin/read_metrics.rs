use clap::Parser;
use seg_training::{run_read_metrics, ReadMetricsArgs};

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = ReadMetricsArgs::parse();
    print!("{}", run_read_metrics(&args)?);
    Ok(())
}
