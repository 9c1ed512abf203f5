//! Breathscope - motion magnification for breathing footage
//!
//! Usage:
//!   breathscope <input_dir> <output_dir> [--config file.json] [--gain g]
//!               [--no-blur] [--levels n] [--cpu]

mod frames_io;

use anyhow::{bail, Context, Result};
use breathscope_core::MagnifyConfig;
use breathscope_magnify::{magnify_with, BatchProgress, CpuProvider, GpuProvider};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

struct Args {
    input: PathBuf,
    output: PathBuf,
    config: MagnifyConfig,
    cpu: bool,
}

fn parse_args(mut args: impl Iterator<Item = String>) -> Result<Args> {
    let mut positional = Vec::new();
    let mut config_path = None;
    let mut gain = None;
    let mut levels = None;
    let mut no_blur = false;
    let mut cpu = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config_path = Some(args.next().context("--config needs a path")?),
            "--gain" => {
                let v = args.next().context("--gain needs a value")?;
                gain = Some(v.parse::<f32>().with_context(|| format!("bad gain `{v}`"))?);
            }
            "--levels" => {
                let v = args.next().context("--levels needs a value")?;
                levels = Some(v.parse::<u32>().with_context(|| format!("bad level count `{v}`"))?);
            }
            "--no-blur" => no_blur = true,
            "--cpu" => cpu = true,
            flag if flag.starts_with("--") => bail!("unknown option {flag}"),
            _ => positional.push(PathBuf::from(arg)),
        }
    }

    let [input, output]: [PathBuf; 2] = positional.try_into().map_err(|_| {
        anyhow::anyhow!(
            "usage: breathscope <input_dir> <output_dir> [--config file.json] \
             [--gain g] [--no-blur] [--levels n] [--cpu]"
        )
    })?;

    let mut config = match config_path {
        Some(path) => {
            let text = std::fs::read_to_string(&path).with_context(|| format!("reading {path}"))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {path}"))?
        }
        None => MagnifyConfig::default(),
    };
    if let Some(g) = gain {
        config.params.gain = g;
    }
    if let Some(n) = levels {
        config.params.pyramid_levels = n;
    }
    if no_blur {
        config.params.blur = false;
    }
    config.validate()?;

    Ok(Args {
        input,
        output,
        config,
        cpu,
    })
}

fn log_progress(p: BatchProgress) {
    info!(
        phase = ?p.phase,
        percent = (p.overall_progress * 100.0).round() as u32,
        frames = p.frames_done,
        total = p.total_frames,
        "Progress"
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_env("BREATHSCOPE_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let args = parse_args(std::env::args().skip(1))?;
    let (names, frames) = frames_io::load_dir(&args.input)?;
    let (width, height) = frames[0].dimensions();
    let params = &args.config.params;

    let result = if args.cpu {
        magnify_with(&CpuProvider, &frames, width, height, params, log_progress).await
    } else {
        let provider = GpuProvider::from_config(&args.config);
        magnify_with(&provider, &frames, width, height, params, log_progress).await
    };

    let output = match result {
        Ok(output) => output,
        Err(e) => {
            warn!(error = %e, "Magnification failed");
            bail!("{}", e.user_message());
        }
    };

    frames_io::save_dir(&args.output, &names, &output)?;
    info!("Done");
    Ok(())
}
