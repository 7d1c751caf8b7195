//! `waymark` – desktop shell for the Waymark AR wayfinding engine.
//!
//! The binary replaces the phone's camera and sensors with a simulated GPS
//! and hand-entered marker scans so the whole engine can be exercised from a
//! terminal.  It:
//!
//! 1. Checks for `~/.waymark/config.toml`; runs a **First-Run Wizard** when
//!    the file is absent.
//! 2. Connects the configured content store (the built-in campus catalogue
//!    or Firestore).
//! 3. Starts the simulated location services.
//! 4. Drops the user into an **interactive REPL** (`/help` lists commands).
//! 5. Intercepts **Ctrl-C** so the engine releases overlays and sensors
//!    before exiting.

mod config;
mod demo;
mod repl;

use colored::Colorize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

use waymark_content::{DocumentStore, FirestoreStore};
use waymark_runtime::Engine;
use waymark_sensors::SimulatedProvider;
use waymark_tracking::HeadlessOverlayFactory;

use crate::config::{Config, StoreBackend};

fn main() {
    // ── Structured logging ────────────────────────────────────────────────
    // RUST_LOG filters (default "info"), WAYMARK_LOG_FORMAT=json switches to
    // JSON lines and OTEL_EXPORTER_OTLP_ENDPOINT enables span export.  The
    // guard flushes pending spans on exit.
    let _telemetry = waymark_runtime::init_tracing("waymark");

    print_banner();

    // ── Shared shutdown flag ──────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_clone = shutdown.clone();

    // ── Ctrl-C handler ────────────────────────────────────────────────────
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
        shutdown_clone.store(true, Ordering::SeqCst);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(None) => run_first_run_wizard(),
        Ok(Some(cfg)) => {
            println!(
                "  Config loaded from {}",
                config::config_path().display().to_string().bold()
            );
            cfg
        }
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            Config::default()
        }
    };
    if let Err(e) = cfg.validate() {
        println!("{}: {}", "Invalid configuration".red(), e);
        std::process::exit(2);
    }

    // ── Async runtime ─────────────────────────────────────────────────────
    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("waymark-worker")
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            println!("{}: {}", "Failed to start the async runtime".red(), e);
            std::process::exit(1);
        }
    };

    // ── Engine ────────────────────────────────────────────────────────────
    let provider = Arc::new(
        SimulatedProvider::new(cfg.sim_latitude, cfg.sim_longitude)
            .with_heading(cfg.sim_heading_deg),
    );
    let store = build_store(&cfg);
    let engine = Engine::new(
        cfg.engine_config(),
        provider.clone(),
        store,
        Box::new(HeadlessOverlayFactory::new()),
        runtime.handle().clone(),
    );

    print!("\n  Starting location services … ");
    match runtime.block_on(engine.start_location()) {
        Ok(()) => println!("{}", "ready".green()),
        Err(e) => {
            println!("{}", "unavailable".yellow());
            println!(
                "  {}  Marker tracking still works; navigation will report: {}",
                "Location services failed.".dimmed(),
                e
            );
        }
    }

    println!();
    println!(
        "  Type {} for a list of commands.\n",
        "/help".bold().cyan()
    );

    // ── Interactive REPL ──────────────────────────────────────────────────
    let mut session = repl::Session::new(engine, provider, runtime.handle().clone());
    repl::run(&mut session, shutdown);
    session.shutdown();
}

fn build_store(cfg: &Config) -> Arc<dyn DocumentStore> {
    match cfg.store {
        StoreBackend::Memory => {
            println!(
                "  Content store: {} ({})",
                "built-in campus catalogue".bold(),
                cfg.collection
            );
            Arc::new(demo::campus_store(&cfg.collection))
        }
        StoreBackend::Firestore => {
            println!(
                "  Content store: {} {}/{}",
                "Firestore".bold(),
                cfg.firestore_project,
                cfg.collection
            );
            let key = Some(cfg.firestore_api_key.clone()).filter(|k| !k.is_empty());
            Arc::new(FirestoreStore::new(cfg.firestore_project.clone(), key))
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// First-Run Wizard
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_wizard() -> Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║       Waymark First-Run Wizard       ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Let's set up Waymark.\n");

    let mut cfg = Config::default();

    println!("  Where should marker content come from?");
    println!("    1) Built-in campus catalogue  (default, offline)");
    println!("    2) Firestore");
    let choice = prompt_line("  Enter choice [1]: ", "1");
    if choice.trim() == "2" {
        cfg.store = StoreBackend::Firestore;
        cfg.firestore_project = prompt_line("  Firestore project id: ", "");
        cfg.firestore_api_key = prompt_line("  Web API key (Enter to skip): ", "");
    }

    cfg.collection = prompt_line(
        &format!("  Collection [{}]: ", cfg.collection),
        &cfg.collection,
    );

    let lat = prompt_line(
        &format!("  Simulated latitude [{}]: ", cfg.sim_latitude),
        &cfg.sim_latitude.to_string(),
    );
    if let Ok(v) = lat.trim().parse::<f64>() {
        cfg.sim_latitude = v;
    }
    let lon = prompt_line(
        &format!("  Simulated longitude [{}]: ", cfg.sim_longitude),
        &cfg.sim_longitude.to_string(),
    );
    if let Ok(v) = lon.trim().parse::<f64>() {
        cfg.sim_longitude = v;
    }

    match config::save(&cfg) {
        Ok(()) => println!(
            "\n  {} Config saved to {}\n",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("{}: {}", "Error saving config".red(), e),
    }

    config::apply_env_overrides(&mut cfg);
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#" _      __                          __  "#.bold().cyan());
    println!("{}", r#"| | /| / /__ ___ ____ _  ___ _____/ /__"#.bold().cyan());
    println!("{}", r#"| |/ |/ / _ `/ // /  ' \/ _ `/ __/  '_/"#.bold().cyan());
    println!("{}", r#"|__/|__/\_,_/\_, /_/_/_/\_,_/_/ /_/\_\ "#.bold().cyan());
    println!("{}", r#"            /___/                        "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "Waymark".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  AR campus wayfinding engine");
    println!();
}

// ─────────────────────────────────────────────────────────────────────────────
// Helpers
// ─────────────────────────────────────────────────────────────────────────────

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::{BufRead, Write};
    print!("{}", msg);
    std::io::stdout().flush().ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
