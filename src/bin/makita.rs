// Makita CLI
// Runs the script engine over the line protocol on stdin/stdout

use std::io::{self, BufReader};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use log::{info, warn};

use makita_core::{LineHost, Runtime, Settings};

/// Cooperative script engine for input remapping
#[derive(Parser, Debug)]
#[command(name = "makita")]
#[command(version)]
#[command(about = "Cooperative script engine for input remapping", long_about = None)]
struct Args {
    /// TOML settings file (default: $MAKITA_CONFIG or ~/.config/makita/settings.toml)
    #[arg(short, long, value_name = "CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding <name>.lua scripts
    #[arg(short, long, value_name = "DIR")]
    scripts_dir: Option<PathBuf>,

    /// Load a script before reading input (can be used multiple times)
    #[arg(short, long, value_name = "NAME=PATH")]
    load: Vec<String>,

    /// Answer state queries from the event stream instead of asking the host
    #[arg(long)]
    local_queries: bool,

    /// Validate settings and scripts, then exit
    #[arg(long)]
    check_config: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

/// Split a `--load` argument into name and path
fn parse_load_arg(arg: &str) -> anyhow::Result<(String, PathBuf)> {
    match arg.split_once('=') {
        Some((name, path)) if !name.is_empty() && !path.is_empty() => {
            Ok((name.to_string(), PathBuf::from(path)))
        }
        _ => bail!("expected NAME=PATH, got '{}'", arg),
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        log::LevelFilter::Debug
    } else {
        log::LevelFilter::Info
    };
    // logs go to stderr; stdout carries the protocol
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .target(env_logger::Target::Stderr)
        .init();
}

fn load_settings(args: &Args) -> anyhow::Result<Settings> {
    let mut settings = match &args.config {
        Some(path) => Settings::from_file(path)
            .with_context(|| format!("failed to load settings from {}", path.display()))?,
        None => Settings::load_default().context("failed to load default settings")?,
    };
    if let Some(dir) = &args.scripts_dir {
        settings.set_scripts_dir(dir);
    }
    if args.local_queries {
        settings.set_answer_locally(true);
    }
    Ok(settings)
}

/// Scripts to load before READY: settings preloads first, then `--load`
fn startup_scripts(args: &Args, settings: &Settings) -> anyhow::Result<Vec<(String, PathBuf)>> {
    let mut scripts = settings.preload_paths()?;
    for arg in &args.load {
        scripts.push(parse_load_arg(arg)?);
    }
    Ok(scripts)
}

fn install_signal_handler(running: Arc<AtomicBool>) -> anyhow::Result<()> {
    use signal_hook::consts::{SIGINT, SIGTERM};
    use signal_hook::iterator::Signals;

    let mut signals = Signals::new([SIGINT, SIGTERM]).context("failed to install signal handler")?;
    std::thread::Builder::new()
        .name("makita-signals".to_string())
        .spawn(move || {
            if let Some(signal) = signals.forever().next() {
                info!("received signal {}, shutting down", signal);
                running.store(false, Ordering::SeqCst);
            }
        })?;
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let settings = load_settings(&args)?;
    let scripts = startup_scripts(&args, &settings)?;

    let mut runtime = Runtime::new(settings.runtime_config())?;
    let mut failed = 0;
    for (name, path) in &scripts {
        if runtime.load_script(name, path).is_err() {
            failed += 1;
        }
    }

    if args.check_config {
        if failed > 0 {
            bail!("{} of {} script(s) failed to load", failed, scripts.len());
        }
        eprintln!("Configuration is valid ({} script(s))", scripts.len());
        return Ok(());
    }
    if failed > 0 {
        warn!("{} script(s) failed to load", failed);
    }

    let running = Arc::new(AtomicBool::new(true));
    install_signal_handler(Arc::clone(&running))?;

    let mut host = LineHost::spawn(BufReader::new(io::stdin()), io::stdout())
        .context("failed to start input reader")?;
    if settings.answer_locally() {
        host = host.with_local_answers();
    }

    runtime.run(&mut host, &running)?;
    Ok(())
}
