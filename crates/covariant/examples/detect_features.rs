use anyhow::Context;
use covariant::app::{load_config, run_detection, DetectionConfig};
use std::path::PathBuf;

fn main() -> anyhow::Result<()> {
    let mut args = std::env::args().skip(1);
    let first: PathBuf = args
        .next()
        .context("usage: detect_features <config.json | image> [--log LEVEL]")?
        .into();

    let mut log_level = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--log" => {
                log_level = Some(args.next().context("expected a level after --log")?);
            }
            other => anyhow::bail!("unknown argument: {other}"),
        }
    }

    let mut cfg = if first.extension().and_then(|e| e.to_str()) == Some("json") {
        load_config(&first)?
    } else {
        DetectionConfig {
            image: first,
            ..DetectionConfig::default()
        }
    };
    if log_level.is_some() {
        cfg.log_level = log_level;
    }

    run_detection(cfg)
}
