use clap::Parser;
use seg_training::{run_config_summary, ConfigSummaryArgs};

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = ConfigSummaryArgs::parse();
    print!("{}", run_config_summary(&args)?);
    Ok(())
}
