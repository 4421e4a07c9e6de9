use clap::Parser;
use seg_metrics::MetricsHistory;
use std::path::PathBuf;
use train_config::{NetworkSummary, TrainConfig};

#[derive(Parser, Debug)]
#[command(
    name = "read_metrics",
    about = "Print train/val metrics at the best epoch of a metrics archive"
)]
pub struct ReadMetricsArgs {
    /// Metrics archive written during training.
    #[arg(default_value = "errors.zip")]
    pub path: PathBuf,
    /// Emit the report as JSON instead of text.
    #[arg(long)]
    pub json: bool,
}

pub fn run_read_metrics(args: &ReadMetricsArgs) -> anyhow::Result<String> {
    let history = MetricsHistory::load(&args.path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", args.path.display()))?;
    let report = history.best_epoch_report()?;
    if args.json {
        Ok(format!("{}\n", serde_json::to_string_pretty(&report)?))
    } else {
        Ok(report.to_string())
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "config_summary",
    about = "Load a training config and summarise the network it describes"
)]
pub struct ConfigSummaryArgs {
    /// Training config; falls back to $DENSESEG_CONFIG, then ./denseseg.toml.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

pub fn run_config_summary(args: &ConfigSummaryArgs) -> anyhow::Result<String> {
    let cfg = match &args.config {
        Some(path) => TrainConfig::from_path(path)?,
        None => TrainConfig::load()?,
    };
    let summary = match cfg.network.summary(cfg.train_crop_size) {
        Ok(s) => s,
        Err(e) if cfg.train_crop_size.is_some() => {
            log::warn!("{e}; summarising feature maps only");
            cfg.network.summary(None)?
        }
        Err(e) => return Err(e.into()),
    };
    Ok(format_summary(&cfg, &summary))
}

fn format_summary(cfg: &TrainConfig, summary: &NetworkSummary) -> String {
    let crop = cfg
        .train_crop_size
        .map(|(h, w)| format!("{h}x{w}"))
        .unwrap_or_else(|| "full".to_string());
    let mut out = format!(
        "dataset: {}\ncrop: {crop}\nseed: {}\nloss: {}\noptimizer: {} lr {} (decay {} / epoch), weight decay {}\n\
         epochs: {} (patience {}), batch size {}\n",
        cfg.dataset,
        cfg.seed,
        cfg.loss_function,
        cfg.optimizer,
        cfg.learning_rate,
        cfg.lr_sched_decay,
        cfg.weight_decay,
        cfg.num_epochs,
        cfg.max_patience,
        cfg.batch_size,
    );
    if let Some(p) = &cfg.model_path {
        out.push_str(&format!("network file: {}\n", p.display()));
    }
    out.push_str(&format!(
        "network: {} in={} classes={} growth={} pools={}\n",
        cfg.network.architecture,
        cfg.network.input_channels,
        cfg.network.n_classes,
        cfg.network.growth_rate,
        cfg.network.n_pool
    ));
    for stage in &summary.stages {
        let spatial = stage
            .spatial
            .map(|(h, w)| format!(" @ {h}x{w}"))
            .unwrap_or_default();
        out.push_str(&format!("  {:<20} {:>5}{spatial}\n", stage.name, stage.n_filters));
    }
    out.push_str(&format!(
        "final feature maps: {} -> {} classes\n",
        summary.final_feature_maps, summary.n_classes
    ));
    out
}
