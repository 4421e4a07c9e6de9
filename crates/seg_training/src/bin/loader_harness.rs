use clap::Parser;
use seg_training::{run_all, HarnessArgs};

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = HarnessArgs::parse();
    for report in run_all(&args)? {
        println!(
            "preload={} batches={} loads={}/{} fetch={:.3}s",
            report.preload,
            report.batches_checked,
            report.load_count,
            report.expected_load_count,
            report.fetch_time.as_secs_f64()
        );
    }
    Ok(())
}
