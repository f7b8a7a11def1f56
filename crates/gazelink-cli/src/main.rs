//! `gazelink` – operator console for the headset perception bridge.
//!
//! 1. Loads `~/.gazelink/config.toml`, running a short first-run setup when
//!    the file is absent.
//! 2. Connects a [`SpatialPerceptionListener`] to the rosbridge endpoint.
//! 3. Drops the operator into a REPL for inspecting gaze, poses and the
//!    assembled spatial context.
//! 4. On Ctrl-C, unsubscribes and closes the bridge connection before
//!    exiting.

mod config;
mod repl;

use colored::Colorize;
use std::io::Write;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::warn;

use gazelink_middleware::{PoseQueue, SpatialPerceptionListener};
use gazelink_runtime::ContextFeed;

fn main() {
    let _telemetry = gazelink_runtime::init_tracing("gazelink");

    print_banner();

    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}", config::config_path().display().to_string().bold());
            cfg
        }
        Ok(None) => run_first_run_setup(),
        Err(e) => {
            println!("{}: {}", "Config error".red(), e);
            println!("  Using default configuration.");
            let mut cfg = config::Config::default();
            config::apply_env_overrides(&mut cfg);
            cfg
        }
    };

    // ── Listener ──────────────────────────────────────────────────────────
    print_inline(&mut std::io::stdout(), &format!("\n  Connecting to {} … ", cfg.listener.url().dimmed())).ok();
    let queue = Arc::new(PoseQueue::new());
    let listener = Arc::new(SpatialPerceptionListener::new(cfg.listener.clone(), Arc::clone(&queue)));
    let status = listener.connection_status();
    if status.is_connected {
        println!("{}", "connected".green());
        println!("    gaze  : {}", cfg.listener.gaze_topic.bold());
        println!("    poses : {}", cfg.listener.pose_topic.bold());
    } else {
        println!("{}", "offline".yellow());
        if let Some(e) = &status.last_error {
            println!("  {}", e.dimmed());
        }
        println!(
            "  {}  Start `{}` on the headset host, then run {}.",
            "No bridge detected.".dimmed(),
            "rosbridge_server".bold(),
            "/reconnect".bold()
        );
    }

    // ── Ctrl-C ────────────────────────────────────────────────────────────
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let listener = Arc::clone(&listener);
        let shutdown = Arc::clone(&shutdown);
        if let Err(e) = ctrlc::set_handler(move || {
            println!();
            println!("{}", "⚠  Ctrl-C received – shutting down …".yellow().bold());
            listener.cleanup();
            println!("{}", "  ✓ Subscriptions closed.".green());
            shutdown.store(true, Ordering::SeqCst);
            // The REPL is blocked on stdin; nothing else will wake it.
            std::process::exit(0);
        }) {
            warn!(error = %e, "failed to install Ctrl-C handler; bridge will not be closed on Ctrl-C");
        }
    }

    println!();
    println!("  Type {} for a list of commands.\n", "/help".bold().cyan());

    let feed = ContextFeed::new(Arc::clone(&listener), queue);
    repl::run(&feed, Duration::from_millis(cfg.watch_interval_ms), shutdown);

    listener.cleanup();
}

// ─────────────────────────────────────────────────────────────────────────────
// First-run setup
// ─────────────────────────────────────────────────────────────────────────────

fn run_first_run_setup() -> config::Config {
    println!();
    println!("{}", "  ╔══════════════════════════════════════╗".bold().cyan());
    println!("{}", "  ║        gazelink First-Run Setup      ║".bold().cyan());
    println!("{}", "  ╚══════════════════════════════════════╝".bold().cyan());
    println!();
    println!("  No configuration found.  Where is the headset's rosbridge?\n");

    let mut cfg = config::Config::default();

    cfg.listener.host = prompt_line(
        &format!("  rosbridge host [{}]: ", cfg.listener.host),
        &cfg.listener.host,
    );

    let port = prompt_line(
        &format!("  rosbridge WebSocket port [{}]: ", cfg.listener.port),
        &cfg.listener.port.to_string(),
    );
    if let Ok(p) = port.parse::<u16>() {
        cfg.listener.port = p;
    }

    cfg.listener.gaze_topic = prompt_line(
        &format!("  Gaze topic [{}]: ", cfg.listener.gaze_topic),
        &cfg.listener.gaze_topic,
    );
    cfg.listener.pose_topic = prompt_line(
        &format!("  Pose topic [{}]: ", cfg.listener.pose_topic),
        &cfg.listener.pose_topic,
    );

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
    println!("{}", r#"   ____               _ _       _    "#.bold().cyan());
    println!("{}", r#"  / ___| __ _ _______| (_)_ __ | | __"#.bold().cyan());
    println!("{}", r#" | |  _ / _` |_  / _ \ | | '_ \| |/ /"#.bold().cyan());
    println!("{}", r#" | |_| | (_| |/ /  __/ | | | | |   < "#.bold().cyan());
    println!("{}", r#"  \____|\__,_/___\___|_|_|_| |_|_|\_\"#.bold().cyan());
    println!();
    println!("  {} {}", "gazelink".bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Headset gaze & pose bridge for design agents");
    println!();
}

/// Write `text` without a newline and flush, so it shows before a blocking
/// call.
fn print_inline(out: &mut impl Write, text: &str) -> std::io::Result<()> {
    out.write_all(text.as_bytes())?;
    out.flush()
}

fn prompt_line(msg: &str, default: &str) -> String {
    use std::io::BufRead;
    print_inline(&mut std::io::stdout(), msg).ok();
    let mut line = String::new();
    match std::io::stdin().lock().read_line(&mut line) {
        Ok(_) => {
            let t = line.trim().to_string();
            if t.is_empty() { default.to_string() } else { t }
        }
        Err(_) => default.to_string(),
    }
}
