//! termview loopback demo
//!
//! Opens a terminal session on the console and echoes everything typed back
//! into it, standing in for the transport a real embedder would wire to
//! `send` and `on_data`.
//!
//! ```text
//! termview                     # defaults plus ~/.termview/config.toml
//! termview --config demo.toml  # explicit configuration file
//! ```
//!
//! Ctrl+Q quits. Logs go to `~/.termview/termview.log`.

use std::env;
use std::path::PathBuf;
use std::sync::mpsc;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use termview::{Config, CrosstermSurface, TerminalSession};

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Ctrl+Q as delivered through `on_data`
const QUIT: &str = "\x11";

struct Args {
    config_path: Option<PathBuf>,
}

fn print_version() {
    eprintln!("termview {}", VERSION);
}

fn print_help() {
    eprintln!("termview {} - terminal display session demo", VERSION);
    eprintln!();
    eprintln!("Usage: termview [OPTIONS]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  -c, --config <PATH>   Read configuration from PATH");
    eprintln!("  -v, --version         Show version");
    eprintln!("  -h, --help            Show this help");
    eprintln!();
    eprintln!("Keys:");
    eprintln!("  (anything)            Echoed back into the terminal");
    eprintln!("  Ctrl+Q                Quit");
    eprintln!();
    eprintln!("Configuration: ~/.termview/config.toml");
    eprintln!("Log file:      ~/.termview/termview.log (RUST_LOG overrides the level)");
}

fn parse_args() -> Result<Args, String> {
    let args: Vec<String> = env::args().collect();
    let mut parsed = Args { config_path: None };
    let mut i = 1;

    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => {
                print_help();
                std::process::exit(0);
            }
            "-v" | "--version" => {
                print_version();
                std::process::exit(0);
            }
            "-c" | "--config" => {
                i += 1;
                if i >= args.len() {
                    return Err("Missing configuration path".to_string());
                }
                parsed.config_path = Some(PathBuf::from(&args[i]));
            }
            arg => {
                return Err(format!("Unknown argument: {}. Use -h for help.", arg));
            }
        }
        i += 1;
    }

    Ok(parsed)
}

fn init_logging(config: &Config) {
    let log_path = Config::config_dir()
        .map(|dir| dir.join("termview.log"))
        .unwrap_or_else(|| PathBuf::from("termview.log"));

    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .ok();

    if let Some(file) = log_file {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::sync::Mutex::new(file))
            .with_ansi(false)
            .try_init();
    }
}

/// What the demo writes back for a piece of typed input
fn echo(data: &str) -> String {
    data.replace('\r', "\r\n").replace('\x7f', "\x08 \x08")
}

fn run(config: &Config) -> anyhow::Result<()> {
    let mut session = TerminalSession::new(config);

    let (tx, rx) = mpsc::channel::<String>();
    let _data = session.on_data(move |data| {
        let _ = tx.send(data.to_string());
    })?;
    let _resize = session.on_resize(|dimensions| info!(%dimensions, "Terminal resized"))?;
    let _title = session.on_title_change(|title| info!(title, "Title changed"))?;

    session
        .open(CrosstermSurface::default())
        .context("Failed to open the console")?;
    session.focus()?;

    let banner = format!(
        "\x1b]0;termview {VERSION}\x07\x1b[1mtermview {VERSION}\x1b[0m ({}x{}), Ctrl+Q quits\r\n\r\n",
        session.cols()?,
        session.rows()?
    );
    let _ = session.send(banner)?;

    loop {
        let summary = session.process_input()?;
        if summary.geometry_changed {
            session.fit()?;
        }

        for data in rx.try_iter() {
            if data == QUIT {
                session.dispose()?;
                return Ok(());
            }
            let _ = session.send(echo(&data))?;
        }
        while session.tick()? {}
    }
}

fn main() -> anyhow::Result<()> {
    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("Use --help for usage information");
            std::process::exit(1);
        }
    };

    let config = match &args.config_path {
        Some(path) => Config::load_from(path)?,
        None => Config::load(),
    };
    init_logging(&config);
    info!("termview {} starting...", VERSION);

    let result = run(&config);
    info!("termview exiting");
    result
}
