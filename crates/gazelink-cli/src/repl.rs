//! REPL – operator shell over a running listener.
//!
//! Supported slash-commands:
//!   /status            – connection diagnostics
//!   /gaze [secs]       – element gazed at within the window (default 3 s)
//!   /summary [secs]    – gaze statistics over the window (default 10 s)
//!   /poses             – latest pose of every tracked element
//!   /drain             – pop every queued pose snapshot
//!   /context [json]    – assemble one spatial context
//!   /watch [n]         – stream n contexts at the configured interval
//!   /reconnect         – retry the bridge connection
//!   /reset             – forget gaze history and poses
//!   /help              – show this list
//!   /quit | /exit      – clean up and exit

use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use gazelink_runtime::ContextFeed;
use gazelink_types::{ConnectionStatus, Pose};

const DEFAULT_WATCH_COUNT: usize = 5;

/// A parsed REPL line.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Status,
    Gaze(Option<Duration>),
    Summary(Option<Duration>),
    Poses,
    Drain,
    Context { json: bool },
    Watch(usize),
    Reconnect,
    Reset,
    Help,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut words = line.split_whitespace();
        let name = words.next().unwrap_or_default();
        let arg = words.next();
        if words.next().is_some() {
            return Err(format!("too many arguments for {name}"));
        }

        let no_arg = |cmd: Command| match arg {
            None => Ok(cmd),
            Some(a) => Err(format!("{name} takes no argument (got '{a}')")),
        };

        match name {
            "/status" => no_arg(Command::Status),
            "/gaze" => Ok(Command::Gaze(parse_window(arg)?)),
            "/summary" => Ok(Command::Summary(parse_window(arg)?)),
            "/poses" => no_arg(Command::Poses),
            "/drain" => no_arg(Command::Drain),
            "/context" => match arg {
                None => Ok(Command::Context { json: false }),
                Some("json") => Ok(Command::Context { json: true }),
                Some(a) => Err(format!("unknown /context format '{a}'")),
            },
            "/watch" => match arg {
                None => Ok(Command::Watch(DEFAULT_WATCH_COUNT)),
                Some(a) => match a.parse::<usize>() {
                    Ok(n) if n > 0 => Ok(Command::Watch(n)),
                    _ => Err(format!("/watch expects a positive count, got '{a}'")),
                },
            },
            "/reconnect" => no_arg(Command::Reconnect),
            "/reset" => no_arg(Command::Reset),
            "/help" => no_arg(Command::Help),
            "/quit" | "/exit" => no_arg(Command::Quit),
            other => Err(format!("unknown command '{other}'")),
        }
    }
}

fn parse_window(arg: Option<&str>) -> Result<Option<Duration>, String> {
    let Some(raw) = arg else {
        return Ok(None);
    };
    raw.parse::<f64>()
        .ok()
        .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
        .map(Some)
        .ok_or_else(|| format!("window must be a non-negative number of seconds, got '{raw}'"))
}

/// Run the shell until `/quit`, EOF, or `shutdown` is set.
pub fn run(feed: &ContextFeed, watch_interval: Duration, shutdown: Arc<AtomicBool>) {
    let stdin = io::stdin();
    let mut stdout = io::stdout();

    loop {
        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        print!("{} ", "gazelink>".bold().cyan());
        stdout.flush().ok();

        let mut line = String::new();
        match stdin.lock().read_line(&mut line) {
            Ok(0) => break,
            Ok(_) => {}
            Err(e) => {
                eprintln!("{}: {}", "Read error".red(), e);
                break;
            }
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match Command::parse(line) {
            Ok(Command::Quit) => {
                println!("{}", "Goodbye.".green());
                shutdown.store(true, Ordering::SeqCst);
                break;
            }
            Ok(cmd) => execute(feed, cmd, watch_interval),
            Err(e) => println!("{} {}. Type {} for available commands.", "Error:".red(), e, "/help".bold()),
        }
    }
}

fn execute(feed: &ContextFeed, cmd: Command, watch_interval: Duration) {
    let listener = feed.listener();
    match cmd {
        Command::Status => print_status(&listener.connection_status()),
        Command::Gaze(window) => {
            let window = window.unwrap_or_else(|| listener.config().gaze_window());
            match listener.most_recent_gaze(window) {
                Some(element) => println!("  Gazing at {} (within {:.1} s)", element.bold().green(), window.as_secs_f64()),
                None => println!("  {} (within {:.1} s)", "Nothing gazed".dimmed(), window.as_secs_f64()),
            }
        }
        Command::Summary(window) => {
            let window = window.unwrap_or_else(|| listener.config().summary_window());
            let s = listener.gaze_history_summary(window);
            println!("{}", format!("Gaze over last {:.1} s", window.as_secs_f64()).bold().underline());
            println!("  events          : {}", s.total_count);
            println!("  unique elements : {}", s.unique_element_count);
            match s.most_frequent_element {
                Some(e) => println!("  most frequent   : {} ({}x)", e.bold(), s.most_frequent_count),
                None => println!("  most frequent   : {}", "-".dimmed()),
            }
            if !s.recent_sequence.is_empty() {
                println!("  sequence        : {}", s.recent_sequence.join(" → "));
            }
        }
        Command::Poses => {
            let mut poses: Vec<(String, Pose)> = listener.latest_poses().into_iter().collect();
            poses.sort_by(|a, b| a.0.cmp(&b.0));
            if poses.is_empty() {
                println!("  {}", "No poses received.".dimmed());
            }
            for (name, pose) in poses {
                println!("  {}", format_pose(&name, &pose));
            }
        }
        Command::Drain => {
            let drained = listener.output_queue().drain();
            match drained.last() {
                Some(newest) => {
                    let mut names: Vec<&str> = newest.keys().map(String::as_str).collect();
                    names.sort_unstable();
                    println!("  Drained {} snapshot(s); newest tracks: {}", drained.len(), names.join(", "));
                }
                None => println!("  {}", "Queue empty.".dimmed()),
            }
        }
        Command::Context { json } => {
            let context = feed.poll();
            if json {
                match serde_json::to_string_pretty(&context) {
                    Ok(text) => println!("{text}"),
                    Err(e) => println!("{}: {}", "Serialisation error".red(), e),
                }
            } else {
                print!("{context}");
            }
        }
        Command::Watch(count) => watch(feed, count, watch_interval),
        Command::Reconnect => {
            if listener.reconnect() {
                println!("  {} {}", "✓ connected to".green(), listener.url().bold());
            } else {
                print_status(&listener.connection_status());
            }
        }
        Command::Reset => {
            listener.reset();
            println!("  {}", "✓ Gaze history and poses cleared.".green());
        }
        Command::Help => print_help(),
        Command::Quit => {}
    }
}

fn watch(feed: &ContextFeed, count: usize, interval: Duration) {
    let runtime = match tokio::runtime::Builder::new_current_thread().enable_time().build() {
        Ok(rt) => rt,
        Err(e) => {
            println!("{}: {}", "Cannot start watch runtime".red(), e);
            return;
        }
    };

    let done = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&done);
    let mut seen = 0;
    runtime.block_on(feed.run(interval, done, |context| {
        seen += 1;
        println!("{}", format!("── context {seen}/{count} ──").dimmed());
        print!("{context}");
        if seen >= count {
            flag.store(true, Ordering::SeqCst);
        }
    }));
}

fn format_pose(name: &str, pose: &Pose) -> String {
    let [x, y, z] = pose.position;
    let [qw, qx, qy, qz] = pose.quaternion;
    format!(
        "{:<16} pos [{x:>8.3}, {y:>8.3}, {z:>8.3}]  quat [{qw:.3}, {qx:.3}, {qy:.3}, {qz:.3}]",
        name
    )
}

fn yes_no(flag: bool) -> colored::ColoredString {
    if flag { "yes".green() } else { "no".red() }
}

fn print_status(status: &ConnectionStatus) {
    println!("{}", "Connection Status".bold().underline());
    println!("  bridge            : {}", status.url.bold());
    println!("  state             : {}", status.state);
    println!("  transport ready   : {}", yes_no(status.transport_available));
    println!("  connect attempted : {}", yes_no(status.connect_attempted));
    println!("  client exists     : {}", yes_no(status.client_exists));
    println!("  connected         : {}", yes_no(status.is_connected));
    println!("  gaze subscription : {}", yes_no(status.gaze_subscription_active));
    println!("  pose subscription : {}", yes_no(status.pose_subscription_active));
    if let Some(e) = &status.last_error {
        println!("  last error        : {}", e.yellow());
    }
}

fn print_help() {
    println!();
    println!("{}", "gazelink Commands".bold().underline());
    println!("  {}          – connection diagnostics", "/status".bold().cyan());
    println!("  {}    – element gazed at within the window", "/gaze [secs]".bold().cyan());
    println!("  {} – gaze statistics over the window", "/summary [secs]".bold().cyan());
    println!("  {}           – latest pose per element", "/poses".bold().cyan());
    println!("  {}           – pop queued pose snapshots", "/drain".bold().cyan());
    println!("  {} – one spatial context (text or JSON)", "/context [json]".bold().cyan());
    println!("  {}       – stream n contexts", "/watch [n]".bold().cyan());
    println!("  {}       – retry the bridge connection", "/reconnect".bold().cyan());
    println!("  {}           – forget gaze history and poses", "/reset".bold().cyan());
    println!("  {}    – exit", "/quit  /exit".bold().cyan());
    println!();
}
