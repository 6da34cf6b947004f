use std::io;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;

use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    execute,
    event::{EnableMouseCapture, DisableMouseCapture},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{Terminal, backend::CrosstermBackend};

use lastz_core::clock::SystemClock;
use lastz_core::config::Config;
use lastz_core::platform::create_platform;
use lastz_core::tracker::{DailyTracker, JsonFileStore};
use lastz_core::types::{Command, OrchestratorState};
use lastz_core::{logger, orchestrator, orchestrator::Runtime, settings::Settings};

/// Last Z automation: drive emulator instances through their daily routines.
#[derive(Debug, Parser)]
#[command(name = "lastz", version)]
struct Cli {
    /// Path to the YAML configuration.
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Run every enabled instance once, print the outcomes and exit.
    #[arg(long)]
    headless: bool,

    /// Only run this task id (headless).
    #[arg(long)]
    task: Option<String>,

    /// Only run this instance, even if it is disabled (headless).
    #[arg(long)]
    instance: Option<String>,

    /// Directory for app.log.
    #[arg(long, default_value = "logs")]
    logs: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    logger::init(&cli.logs).with_context(|| format!("opening log directory {}", cli.logs.display()))?;

    let config = Config::load(&cli.config).with_context(|| format!("loading {}", cli.config.display()))?;
    orchestrator::register_prefixes(&config);

    let tracking = &config.daily_tracking;
    let tracker = Arc::new(
        DailyTracker::open(
            Box::new(JsonFileStore::new(&tracking.storage_path)),
            tracking.reset_hour_local,
            tracking.limits.clone(),
        )
        .with_context(|| format!("opening daily tracker {}", tracking.storage_path.display()))?,
    );

    let names: Vec<String> = config.instances.iter().map(|i| i.name.clone()).collect();
    let rt = Runtime {
        platform: Arc::from(create_platform(&names)),
        ledger: tracker.clone(),
        clock: Arc::new(SystemClock::default()),
        config: Arc::new(config),
    };

    let result = if cli.headless {
        headless(&rt, &cli)
    } else {
        interactive(rt)
    };

    if let Err(e) = tracker.flush() {
        logger::error_p("tracker", &format!("final flush failed: {}", e));
    }
    result
}

fn headless(rt: &Runtime, cli: &Cli) -> Result<()> {
    logger::set_echo_stderr(true);
    logger::info("lastz started (headless)");

    let outcomes = orchestrator::run_once(rt, cli.instance.as_deref(), cli.task.as_deref())?;
    for outcome in &outcomes {
        println!("{}", outcome);
        if let Some(path) = &outcome.debug_capture {
            println!("  debug capture: {}", path.display());
        }
    }
    let aborted = outcomes.iter().filter(|o| o.terminal.is_aborted()).count();
    if aborted > 0 {
        anyhow::bail!("{} of {} run(s) aborted", aborted, outcomes.len());
    }
    Ok(())
}

fn interactive(rt: Runtime) -> Result<()> {
    let settings_path = std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")).join("settings.json");
    let settings = Settings::load(&settings_path);
    let entries = orchestrator::load_instances(&rt.config, &settings);
    logger::info(&format!("loaded {} instance(s)", entries.len()));

    let state = Arc::new(Mutex::new(entries));
    let orch_state = Arc::new(Mutex::new(OrchestratorState::Stopped));

    let (log_tx, log_rx) = mpsc::channel::<String>();
    let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();

    logger::set_tui_sender(log_tx);
    logger::info("lastz started");

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = lastz_tui::App::new(
        Arc::clone(&state),
        Arc::clone(&orch_state),
        log_rx,
        cmd_tx,
        settings_path,
    );

    let orch_instances = Arc::clone(&state);
    let orch_run_state = Arc::clone(&orch_state);
    let orchestrator = thread::spawn(move || {
        orchestrator::orchestrate(rt, orch_instances, orch_run_state, cmd_rx);
    });

    let result = lastz_tui::event::run(&mut terminal, &mut app);

    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, DisableMouseCapture)?;
    terminal.show_cursor()?;

    if !app.should_quit {
        app.quit();
    }
    orchestrator.join().ok();
    result
}
