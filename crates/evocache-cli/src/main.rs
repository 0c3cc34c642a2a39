//! evocache - a terminal client for EVO goals and courses.
//!
//! Reads the dashboard and courses from the EVO backend and keeps them in
//! an offline cache, so they stay readable without a connection.

mod app;

use std::io;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use evocache_core::Config;

use app::App;

// ============================================================================
// Constants
// ============================================================================

/// File name prefix for the daily rolling log
const LOG_FILE_PREFIX: &str = "evocache.log";

const USAGE: &str = "\
Usage: evocache [--log-file] [--json] <command>

Commands:
  status              Connectivity, session and cache overview
  dashboard           Goals, progress and enrolled courses
  course <id>         Show a course (cached for offline reading)
  offline-courses     List courses available offline
  remove <id>         Remove a course from the offline cache
  sweep               Prune expired cache entries
  offline <on|off>    Switch offline mode
  probe               Check the server and reconnect if reachable
  login <email>       Sign in (prompts for the password)
  logout              Sign out

Options:
  --log-file          Log to a daily file in the cache directory instead of stderr
  --json              Print dashboard/course data as JSON";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Status,
    Dashboard,
    Course(i64),
    OfflineCourses,
    Remove(i64),
    Sweep,
    Offline(bool),
    Probe,
    Login(String),
    Logout,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Options {
    log_file: bool,
    json: bool,
}

fn parse_id(value: Option<&String>, command: &str) -> Result<i64> {
    let value = value.with_context(|| format!("`{}` needs a course id", command))?;
    value
        .parse()
        .with_context(|| format!("Invalid course id: {}", value))
}

fn parse_args(args: &[String]) -> Result<(Options, Command)> {
    let mut options = Options::default();
    let mut positional = Vec::new();
    for arg in args {
        match arg.as_str() {
            "--log-file" => options.log_file = true,
            "--json" => options.json = true,
            flag if flag.starts_with("--") => bail!("Unknown option: {}", flag),
            _ => positional.push(arg),
        }
    }

    let Some(name) = positional.first() else {
        bail!("Missing command");
    };
    let arg = positional.get(1).copied();

    let command = match name.as_str() {
        "status" => Command::Status,
        "dashboard" => Command::Dashboard,
        "course" => Command::Course(parse_id(arg, "course")?),
        "offline-courses" => Command::OfflineCourses,
        "remove" => Command::Remove(parse_id(arg, "remove")?),
        "sweep" => Command::Sweep,
        "offline" => match arg.map(String::as_str) {
            Some("on") => Command::Offline(true),
            Some("off") => Command::Offline(false),
            _ => bail!("`offline` takes `on` or `off`"),
        },
        "probe" => Command::Probe,
        "login" => Command::Login(arg.context("`login` needs an email")?.clone()),
        "logout" => Command::Logout,
        other => bail!("Unknown command: {}", other),
    };
    Ok((options, command))
}

/// Initialize the tracing subscriber for logging.
/// Returns the appender guard when logging to a file; keep it alive until exit.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    // Use RUST_LOG env var to control log level (e.g., RUST_LOG=debug)
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(writer).with_ansi(false))
                .with(filter)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_writer(io::stderr))
                .with(filter)
                .init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (silently ignore if not found)
    let _ = dotenvy::dotenv();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.iter().any(|a| a == "-h" || a == "--help") {
        println!("{}", USAGE);
        return Ok(());
    }
    let (options, command) = match parse_args(&args) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("{}\n\n{}", e, USAGE);
            std::process::exit(2);
        }
    };

    let config = Config::load().context("Failed to load config")?;
    let log_dir = config.cache_dir()?.join("logs");
    let _log_guard = init_tracing(options.log_file.then_some(log_dir.as_path()));
    info!(?command, "evocache starting");

    let mut app = App::open(config, options.json)?;
    app.run(command).await
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_commands() {
        let (_, cmd) = parse_args(&args(&["course", "42"])).unwrap();
        assert_eq!(cmd, Command::Course(42));

        let (_, cmd) = parse_args(&args(&["offline", "off"])).unwrap();
        assert_eq!(cmd, Command::Offline(false));

        let (_, cmd) = parse_args(&args(&["login", "ana@example.com"])).unwrap();
        assert_eq!(cmd, Command::Login("ana@example.com".to_string()));
    }

    #[test]
    fn test_parse_options_anywhere() {
        let (options, cmd) = parse_args(&args(&["dashboard", "--json", "--log-file"])).unwrap();
        assert_eq!(cmd, Command::Dashboard);
        assert_eq!(options, Options { log_file: true, json: true });
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_args(&args(&[])).is_err());
        assert!(parse_args(&args(&["course"])).is_err());
        assert!(parse_args(&args(&["course", "abc"])).is_err());
        assert!(parse_args(&args(&["offline", "maybe"])).is_err());
        assert!(parse_args(&args(&["status", "--verbose"])).is_err());
        assert!(parse_args(&args(&["frobnicate"])).is_err());
    }
}
