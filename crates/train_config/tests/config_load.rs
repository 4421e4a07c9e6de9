use std::fs;

use train_config::{ConfigError, LossKind, NetworkSpec, OptimizerKind, TrainConfig};

#[test]
fn vaihingen_config_with_network_file_loads() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let config_dir = tmp.path().join("config");
    fs::create_dir_all(&config_dir)?;
    fs::write(
        tmp.path().join("FC-DenseNet.toml"),
        r#"
[network]
architecture = "fc-densenet"
input_channels = 4
n_classes = 6
n_pool = 5
growth_rate = 16
n_layers_per_block = [4, 5, 7, 10, 12, 15, 12, 10, 7, 5, 4]
"#,
    )?;
    let path = config_dir.join("FC-DenseNet103.toml");
    fs::write(
        &path,
        r#"
dataset = "Vaihingen"
train_crop_size = [320, 320]
seed = 7

[training]
learning_rate = 0.0005
lr_sched_decay = 0.99
num_epochs = 20
max_patience = 5
loss_function = "jaccard"
optimizer = "adam"
batch_size = 4

[architecture]
model_path = "FC-DenseNet.toml"

[network]
dropout_p = 0.2
"#,
    )?;

    let cfg = TrainConfig::from_path(&path)?;
    assert_eq!(cfg.dataset, "Vaihingen");
    assert_eq!(cfg.train_crop_size, Some((320, 320)));
    assert_eq!(cfg.seed, 7);
    assert_eq!(cfg.loss_function, LossKind::Jaccard);
    assert_eq!(cfg.optimizer, OptimizerKind::Adam);
    assert_eq!(cfg.batch_size, 4);
    assert_eq!(cfg.max_patience, 5);
    assert_eq!(
        cfg.model_path.as_deref(),
        Some(tmp.path().join("FC-DenseNet.toml").as_path())
    );
    // Unset training keys keep their defaults.
    assert!((cfg.weight_decay - 1e-3).abs() < 1e-12);
    assert!((cfg.network.dropout_p - 0.2).abs() < 1e-6);
    assert_eq!(cfg.network.n_layers_per_block.len(), 11);

    let summary = cfg.network.summary(cfg.train_crop_size)?;
    assert_eq!(summary.final_feature_maps, 256);
    Ok(())
}

#[test]
fn full_size_training_and_inline_network() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("small.toml");
    fs::write(
        &path,
        r#"
dataset = "polyps912"
train_crop_size = "full"

[network]
input_channels = 3
n_classes = 3
n_pool = 2
n_layers_per_block = 2
"#,
    )?;
    let cfg = TrainConfig::from_path(&path)?;
    assert_eq!(cfg.train_crop_size, None);
    assert_eq!(cfg.model_path, None);
    assert_eq!(cfg.network.n_layers_per_block, vec![2; 5]);
    assert_eq!(cfg.optimizer, OptimizerKind::Rmsprop);
    Ok(())
}

#[test]
fn bad_values_are_rejected() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;

    let path = tmp.path().join("zero_batch.toml");
    fs::write(&path, "[training]\nbatch_size = 0\n")?;
    assert!(matches!(
        TrainConfig::from_path(&path),
        Err(ConfigError::Invalid(_))
    ));

    let path = tmp.path().join("bad_net.toml");
    fs::write(&path, "[network]\nn_layers_per_block = [4, 4, 4]\n")?;
    assert!(matches!(
        TrainConfig::from_path(&path),
        Err(ConfigError::Network(_))
    ));

    let path = tmp.path().join("deep_pool.toml");
    fs::write(
        &path,
        "[network]\nn_pool = 1000000000000\nn_layers_per_block = 4\n",
    )?;
    assert!(matches!(
        TrainConfig::from_path(&path),
        Err(ConfigError::Network(_))
    ));

    let path = tmp.path().join("bad_loss.toml");
    fs::write(&path, "[training]\nloss_function = \"dice\"\n")?;
    assert!(matches!(
        TrainConfig::from_path(&path),
        Err(ConfigError::Parse { .. })
    ));

    let path = tmp.path().join("missing_model.toml");
    fs::write(&path, "[architecture]\nmodel_path = \"nowhere.toml\"\n")?;
    assert!(matches!(
        TrainConfig::from_path(&path),
        Err(ConfigError::Io { .. })
    ));
    Ok(())
}

#[test]
fn network_definition_loads_alone() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("FC-DenseNet56.toml");
    fs::write(
        &path,
        "[network]\nn_filters_first_conv = 48\ngrowth_rate = 12\nn_layers_per_block = 4\n",
    )?;
    let spec = NetworkSpec::load(&path)?;
    assert_eq!(spec.growth_rate, 12);
    assert_eq!(spec.n_layers_per_block, vec![4; 11]);
    Ok(())
}

#[test]
fn env_var_selects_config_file() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("env.toml");
    fs::write(&path, "seed = 99\n")?;
    std::env::set_var(train_config::CONFIG_ENV, &path);
    let cfg = TrainConfig::load()?;
    std::env::remove_var(train_config::CONFIG_ENV);
    assert_eq!(cfg.seed, 99);
    Ok(())
}
