//! monkey - X11 global hotkeys with per-window bindings

mod capture;
mod chord;
mod config;
mod dispatch;
mod display;
mod error;
mod events;
mod grab;
mod hotkey;
mod interface;
mod keymap;
mod keysyms;
mod modmask;
mod window_info;

#[cfg(test)]
mod testing;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use crossbeam::channel::{RecvTimeoutError, unbounded};
use tracing_subscriber::EnvFilter;

use capture::Capabilities;
use chord::ChordListener;
use config::Config;
use display::{X11Session, XDisplay};
use interface::XInterface;
use modmask::KeyboardLayout;
use window_info::{WindowInfo, get_window_info};

/// monkey - X11 global hotkeys with per-window bindings
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (default: $XDG_CONFIG_HOME/monkey/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Grab the configured hotkeys until Ctrl+C (default)
    Run,
    /// Show the focused window's title and class
    Info {
        #[arg(long)]
        json: bool,
    },
    /// Report which key capture backends work here
    Probe,
    /// Validate the config and resolve every binding's keycode
    Check,
}

static RUNNING: AtomicBool = AtomicBool::new(true);

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = Config::load(args.config.as_deref()).context("Failed to load config")?;

    match args.command.unwrap_or(Commands::Run) {
        Commands::Run => run_daemon(&config),
        Commands::Info { json } => show_info(&config, json),
        Commands::Probe => probe(&config),
        Commands::Check => check(&config),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run_daemon(config: &Config) -> anyhow::Result<()> {
    let bindings = config.bindings().context("Invalid binding in config")?;
    if bindings.is_empty() {
        println!("No bindings configured. Add [[binding]] tables to {}", config::config_path().display());
    }

    ctrlc::set_handler(|| {
        println!("\nShutting down...");
        RUNNING.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;

    let (tx, rx) = unbounded();
    let mut interface = XInterface::start(config, bindings.clone(), Box::new(ChordListener::new(tx)))
        .context("Failed to start hotkey interface")?;
    let queries = interface.queries();

    println!("🐒 monkey started");
    for binding in &bindings {
        match &binding.filter {
            Some(filter) => println!("  {} - {} (in /{}/)", binding.hotkey, binding.target, filter.as_str()),
            None => println!("  {} - {}", binding.hotkey, binding.target),
        }
    }

    while RUNNING.load(Ordering::SeqCst) {
        let hotkey = match rx.recv_timeout(Duration::from_millis(100)) {
            Ok(hotkey) => hotkey,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let info = if chord::needs_window_info(&bindings, &hotkey) {
            queries.get_window_info(None, true)
        } else {
            WindowInfo::default()
        };
        if let Some(binding) = chord::pick_binding(&bindings, &hotkey, &info) {
            tracing::info!(hotkey = %hotkey, target = %binding.target, "Hotkey fired");
            println!("✓ {} → {}", hotkey, binding.target);
        }
    }

    interface.shutdown();
    Ok(())
}

fn show_info(config: &Config, json: bool) -> anyhow::Result<()> {
    let mut session = X11Session::open(config.display.as_deref()).context("Cannot connect to X server")?;
    let info = get_window_info(&session, None, true);
    session.close();

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
    } else if info.is_empty() {
        println!("No information about the focused window.");
    } else {
        println!("Title: {}", info.title);
        println!("Class: {}", info.class);
    }
    Ok(())
}

fn probe(config: &Config) -> anyhow::Result<()> {
    let caps = Capabilities::probe(config.display.as_deref());
    let mark = |ok: bool| if ok { "✓" } else { "✗" };
    println!("{} record", mark(caps.record));
    println!("{} atspi", mark(caps.atspi));

    match caps.choose(config.backend) {
        Ok(kind) => println!("Configured backend '{}' resolves to '{}'", config.backend, kind),
        Err(e) => bail!("Configured backend '{}' unusable: {}", config.backend, e),
    }
    Ok(())
}

fn check(config: &Config) -> anyhow::Result<()> {
    let bindings = config.bindings().context("Invalid binding in config")?;
    let mut session = X11Session::open(config.display.as_deref()).context("Cannot connect to X server")?;
    let layout = KeyboardLayout::load(&session);
    session.close();
    let layout = layout.context("Cannot read keyboard mapping")?;

    let mut failures = 0;
    for binding in &bindings {
        let keycode = layout.keymap.lookup_keycode(&binding.hotkey.key);
        let mask = layout.masks.combined(&binding.hotkey.modifiers);
        match (keycode, mask) {
            (Ok(keycode), Ok(mask)) => {
                println!("✓ {} → keycode {} mask {:#x} ({})", binding.hotkey, keycode, mask, binding.target)
            }
            (Err(e), _) | (_, Err(e)) => {
                failures += 1;
                println!("✗ {}: {}", binding.hotkey, e);
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} bindings cannot be grabbed", failures, bindings.len());
    }
    println!(
        "Config OK ({} bindings, keysym table v{})",
        bindings.len(),
        keysyms::KEYSYM_TABLE_VERSION
    );
    Ok(())
}
