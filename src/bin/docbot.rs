//! CLI binary for docbot.
//!
//! A thin shim over the library crate: maps CLI flags to `BotConfig`, wires
//! the script engine and the console channel into an orchestrator, and feeds
//! it stdin lines until EOF or Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use docbot::channel::console::parse_console_line;
use docbot::{
    ArtifactManager, BackgroundTasks, BotConfig, ConsoleChannel, Dispatcher, OperationId,
    OperationObserver, Orchestrator, ScriptEngine, SharedObserver, SweepKind, UserId,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── CLI observer using indicatif ─────────────────────────────────────────────

/// Terminal observer: a spinner while engine calls are in flight and one log
/// line per finished operation. Operations of different users may overlap.
struct CliObserver {
    bar: ProgressBar,
    running: Mutex<HashMap<(UserId, OperationId), Instant>>,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Idle");

        Arc::new(Self {
            bar,
            running: Mutex::new(HashMap::new()),
        })
    }

    fn finish(&self, user: &UserId, operation: OperationId) -> f64 {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        let elapsed = running
            .remove(&(user.clone(), operation))
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0);
        if running.is_empty() {
            self.bar.set_prefix("Idle");
            self.bar.set_message("");
            self.bar.disable_steady_tick();
        } else {
            self.bar.set_message(format!("{} running", running.len()));
        }
        elapsed
    }
}

impl OperationObserver for CliObserver {
    fn on_operation_start(&self, user: &UserId, operation: OperationId, inputs: usize) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        running.insert((user.clone(), operation), Instant::now());
        self.bar.set_prefix("Working");
        self.bar.set_message(format!("{operation} for {user} ({inputs} file(s))"));
        self.bar.enable_steady_tick(Duration::from_millis(80));
    }

    fn on_operation_complete(&self, user: &UserId, operation: OperationId, outputs: usize) {
        let elapsed = self.finish(user, operation);
        self.bar.println(format!(
            "  {} {:<18} {:<12} {}  {}",
            green("✓"),
            operation.as_str(),
            user.as_str(),
            dim(&format!("{outputs} output(s)")),
            dim(&format!("{elapsed:.1}s")),
        ));
    }

    fn on_operation_error(&self, user: &UserId, operation: OperationId, error: &str) {
        let elapsed = self.finish(user, operation);
        let msg: String = if error.chars().count() > 80 {
            format!("{}\u{2026}", error.chars().take(79).collect::<String>())
        } else {
            error.to_string()
        };
        self.bar.println(format!(
            "  {} {:<18} {:<12} {}  {}",
            red("✗"),
            operation.as_str(),
            user.as_str(),
            red(&msg),
            dim(&format!("{elapsed:.1}s")),
        ));
    }

    fn on_sweep(&self, kind: SweepKind, removed: usize) {
        if removed == 0 {
            return;
        }
        let what = match kind {
            SweepKind::Sessions => "idle session(s)",
            SweepKind::Artifacts => "stale artifact(s)",
        };
        self.bar
            .println(format!("  {} swept {removed} {what}", cyan("◆")));
    }
}

const AFTER_HELP: &str = r#"INPUT LINES:
  menu                        show the operation menu
  7                           select operation 7 (PDF to Word)
  /file ~/report.pdf          upload a local file
  /file https://host/a.pdf    upload from a URL
  done                        finish a multi-file upload (merge, images to PDF)
  cancel | clear              abort the workflow / delete uploaded files
  @alice 3                    act as user "alice" (default user: --user)

EXAMPLES:
  # Run with engine scripts executed through sh
  docbot --scripts-dir ./scripts --interpreter sh

  # Keep sessions for 10 minutes, store delivered files in ./out
  docbot --session-timeout 600 --outbox ./out

ENGINE SCRIPTS:
  <scripts-dir>/<operation>   one program per operation (merge, split, ocr, ...)
                              args: input paths; stdin: JSON job;
                              write $DOCBOT_OUTPUT or print {"outputs": [...]}
  <scripts-dir>/page_count    prints the page count of its argument

ENVIRONMENT VARIABLES:
  RUST_LOG                    Override log filter (e.g. docbot=debug)
  DOCBOT_*                    Every flag has a DOCBOT_ variable (see --help)
"#;

/// Drive document workflows from the terminal.
#[derive(Parser, Debug)]
#[command(
    name = "docbot",
    version,
    about = "Conversational document-operation bot (console transport)",
    long_about = "Runs the docbot orchestrator with stdin/stdout as the chat channel and \
external scripts as the conversion engine. Several users can be simulated with @name prefixes.",
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Directory with one engine program per operation.
    #[arg(long, env = "DOCBOT_SCRIPTS_DIR", default_value = "./scripts")]
    scripts_dir: PathBuf,

    /// Run engine programs through this interpreter (e.g. sh, python3).
    #[arg(long, env = "DOCBOT_INTERPRETER")]
    interpreter: Option<PathBuf>,

    /// Directory where delivered files are copied.
    #[arg(long, env = "DOCBOT_OUTBOX", default_value = "./docbot-outbox")]
    outbox: PathBuf,

    /// Staging directory for artifacts. Default: $TMPDIR/docbot-staging.
    #[arg(long, env = "DOCBOT_STAGING_DIR")]
    staging_dir: Option<PathBuf>,

    /// User id for lines without an @name prefix.
    #[arg(short, long, env = "DOCBOT_USER", default_value = "me")]
    user: String,

    /// Per-operation engine timeout in seconds.
    #[arg(long, env = "DOCBOT_ENGINE_TIMEOUT", default_value_t = 600)]
    engine_timeout: u64,

    /// Session idle timeout in seconds.
    #[arg(long, env = "DOCBOT_SESSION_TIMEOUT", default_value_t = 1800)]
    session_timeout: u64,

    /// Session sweep interval in seconds.
    #[arg(long, env = "DOCBOT_SESSION_SWEEP", default_value_t = 300)]
    session_sweep: u64,

    /// Artifact retention in seconds.
    #[arg(long, env = "DOCBOT_ARTIFACT_RETENTION", default_value_t = 3600)]
    artifact_retention: u64,

    /// Artifact sweep interval in seconds.
    #[arg(long, env = "DOCBOT_ARTIFACT_SWEEP", default_value_t = 1800)]
    artifact_sweep: u64,

    /// Largest accepted upload in MiB.
    #[arg(long, env = "DOCBOT_MAX_UPLOAD_MB", default_value_t = 20)]
    max_upload_mb: u64,

    /// Disable the activity spinner.
    #[arg(long, env = "DOCBOT_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "DOCBOT_VERBOSE")]
    verbose: bool,

    /// Suppress all logs except errors.
    #[arg(short, long, env = "DOCBOT_QUIET")]
    quiet: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let show_progress = !cli.quiet && !cli.no_progress;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "warn,docbot=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    // ── Build config ─────────────────────────────────────────────────────
    let observer: Option<SharedObserver> = if show_progress {
        Some(CliObserver::new() as Arc<dyn OperationObserver>)
    } else {
        None
    };
    let config = build_config(&cli, observer)?;

    // ── Wire components ──────────────────────────────────────────────────
    let artifacts = Arc::new(
        ArtifactManager::new(&config.staging_dir, config.artifact_retention)
            .context("Failed to prepare staging directory")?,
    );
    let mut engine = ScriptEngine::new(&cli.scripts_dir, Arc::clone(&artifacts))
        .with_timeout(Duration::from_secs(cli.engine_timeout));
    if let Some(ref interpreter) = cli.interpreter {
        engine = engine.with_interpreter(interpreter);
    }
    let channel = ConsoleChannel::stdout(&cli.outbox)
        .with_context(|| format!("Failed to create outbox {:?}", cli.outbox))?;

    if !cli.quiet {
        eprintln!(
            "{} {}  {}",
            cyan("◆"),
            bold("docbot ready"),
            dim(&format!(
                "scripts: {}  outbox: {}  staging: {}",
                cli.scripts_dir.display(),
                cli.outbox.display(),
                config.staging_dir.display()
            ))
        );
        eprintln!("  {}", dim("Type menu to start, Ctrl-D to quit."));
    }

    let bot = Orchestrator::new(config, artifacts, Arc::new(engine), Arc::new(channel));
    let mut tasks = BackgroundTasks::new();
    bot.spawn_maintenance(&mut tasks);
    let dispatcher = Dispatcher::new(bot);

    // ── Event loop ───────────────────────────────────────────────────────
    let default_user = UserId::from(cli.user.as_str());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line.context("Failed to read stdin")? {
                    Some(line) => {
                        if let Some(event) = parse_console_line(&line, &default_user) {
                            dispatcher.submit(event);
                        }
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted; shutting down");
                break;
            }
        }
    }

    // ── Shutdown ─────────────────────────────────────────────────────────
    dispatcher.shutdown().await;
    tasks.shutdown().await;
    if !cli.quiet {
        eprintln!("{} bye", green("✔"));
    }
    Ok(())
}

/// Map CLI args to `BotConfig`.
fn build_config(cli: &Cli, observer: Option<SharedObserver>) -> Result<BotConfig> {
    // Inputs of a running operation must outlive the engine call.
    let horizon = cli.session_timeout.min(cli.artifact_retention);
    anyhow::ensure!(
        cli.engine_timeout < horizon,
        "Engine timeout ({}s) must be shorter than both the session timeout and artifact retention ({}s)",
        cli.engine_timeout,
        horizon
    );

    let mut builder = BotConfig::builder()
        .session_idle_timeout(Duration::from_secs(cli.session_timeout))
        .session_sweep_interval(Duration::from_secs(cli.session_sweep))
        .artifact_retention(Duration::from_secs(cli.artifact_retention))
        .artifact_sweep_interval(Duration::from_secs(cli.artifact_sweep))
        .max_upload_bytes(cli.max_upload_mb.saturating_mul(1024 * 1024));

    if let Some(ref dir) = cli.staging_dir {
        builder = builder.staging_dir(dir);
    }
    if let Some(observer) = observer {
        builder = builder.observer(observer);
    }

    builder.build().context("Invalid configuration")
}
