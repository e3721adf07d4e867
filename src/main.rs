//! Filterkit: apply GPU compute filters to an image from the command line.

use anyhow::{anyhow, Result};
use clap::{ArgAction, Parser, ValueEnum};
use filterkit::{Config, Effect, FilterManager, FilterSession, FilteredResult, WgpuBackend};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Built-in effect selectable from the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum EffectArg {
    Sepia,
    Gold,
    Vignette,
    Grayscale,
    Invert,
}

impl From<EffectArg> for Effect {
    fn from(arg: EffectArg) -> Self {
        match arg {
            EffectArg::Sepia => Effect::Sepia,
            EffectArg::Gold => Effect::Gold,
            EffectArg::Vignette => Effect::Vignette,
            EffectArg::Grayscale => Effect::Grayscale,
            EffectArg::Invert => Effect::Invert,
        }
    }
}

/// GPU compute image filters.
#[derive(Parser, Debug)]
#[command(name = "filterkit")]
#[command(about = "Apply a set of GPU compute filters to an image")]
struct Args {
    /// Image to filter
    #[arg(required_unless_present = "list_effects")]
    input: Option<PathBuf>,

    /// YAML config with the effect list and an optional extra WGSL library
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Built-in effect to apply, repeatable; overrides the config
    #[arg(short, long, value_enum, action = ArgAction::Append)]
    effect: Vec<EffectArg>,

    /// Write every filtered image here as PNG
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Re-run the filters over the result at this index
    #[arg(long)]
    select: Option<usize>,

    /// List configured effects and available kernels, then exit
    #[arg(long)]
    list_effects: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let library = config.load_library()?;
    let effects = if args.effect.is_empty() {
        config.descriptors()
    } else {
        args.effect.iter().map(|&arg| Effect::from(arg).descriptor()).collect()
    };

    if args.list_effects {
        println!("Configured effects:");
        for (index, effect) in effects.iter().enumerate() {
            println!("  [{}] {} ({})", index, effect.display_name(), effect.kernel_id());
        }
        println!("Available kernels:");
        for kernel_id in library.kernel_ids() {
            println!("  {}", kernel_id);
        }
        return Ok(());
    }

    let input = args.input.as_ref().ok_or_else(|| anyhow!("no input image given"))?;

    info!("Starting filterkit...");
    let start = Instant::now();
    let backend = WgpuBackend::new()?;
    let adapter = backend.context().adapter_info();
    println!("Device: {} ({:?})", adapter.name, adapter.backend);
    let manager = FilterManager::configure(Arc::new(backend), &library, effects)?;
    debug!("[Perf] Setup: {:?}", start.elapsed());

    info!("Loading image from {:?}", input);
    let image = image::open(input)?;
    let mut session = FilterSession::new(manager);
    session.set_original(image);

    session.apply_filters();
    let results = session.wait();
    report(results, args.output_dir.as_deref(), "")?;

    if let Some(index) = args.select {
        if !session.select(index) {
            return Err(anyhow!(
                "cannot select result {}: only {} produced",
                index,
                session.filtered().len()
            ));
        }
        info!("Re-running filters over result {}", index);
        session.apply_filters();
        let results = session.wait();
        report(results, args.output_dir.as_deref(), "selected_")?;
    }

    if let Some(message) = session.error_message() {
        return Err(anyhow!("{}", message));
    }
    Ok(())
}

/// Print a summary line per result and save them if an output directory is set.
fn report(results: &[FilteredResult], output_dir: Option<&Path>, prefix: &str) -> Result<()> {
    println!("{} filtered images:", results.len());
    for (index, result) in results.iter().enumerate() {
        println!(
            "  [{}] {} {}x{}",
            index,
            result.filter_name,
            result.image.width(),
            result.image.height()
        );
    }

    let Some(dir) = output_dir else {
        return Ok(());
    };
    fs::create_dir_all(dir)?;
    for (index, result) in results.iter().enumerate() {
        let file_name = format!("{}{:02}_{}.png", prefix, index, file_stem(&result.filter_name));
        let path = dir.join(file_name);
        result.image.save(&path)?;
        info!("Saved {:?}", path);
    }
    Ok(())
}

fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '_' })
        .collect()
}
