use std::collections::HashMap;
use std::sync::{mpsc, Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::clock::{sleep_until_cancelled, Clock};
use crate::config::{Config, InstanceConfig};
use crate::detector::StateDetector;
use crate::driver::ActionDriver;
use crate::engine::{CancelToken, Engine, RunOutcome, RunSettings};
use crate::error::ConfigError;
use crate::logger;
use crate::matcher::TemplateMatcher;
use crate::overlay::OverlayGuard;
use crate::platform::{Device, Platform};
use crate::settings::Settings;
use crate::tasks;
use crate::tracker::ProgressLedger;
use crate::types::*;

/// Shared services every instance worker draws from.
#[derive(Clone)]
pub struct Runtime {
    pub config: Arc<Config>,
    pub platform: Arc<dyn Platform>,
    pub ledger: Arc<dyn ProgressLedger>,
    pub clock: Arc<dyn Clock>,
}

/// Build the per-instance status rows, applying saved operator choices.
pub fn load_instances(config: &Config, settings: &Settings) -> Vec<InstanceEntry> {
    config
        .instances
        .iter()
        .map(|inst| InstanceEntry {
            name: inst.name.clone(),
            layout: config.layout_for(inst).map(|l| l.id.clone()).unwrap_or_default(),
            routine: config.routine_for(inst).map(<[String]>::to_vec).unwrap_or_default(),
            enabled: settings.is_enabled(&inst.name, inst.enabled),
            status: InstanceStatus::default(),
            error: None,
        })
        .collect()
}

/// Register a log colour per instance so interleaved lines stay readable.
pub fn register_prefixes(config: &Config) {
    for (i, inst) in config.instances.iter().enumerate() {
        logger::register_prefix(&inst.name, logger::INSTANCE_PALETTE[i % logger::INSTANCE_PALETTE.len()]);
    }
    logger::register_prefix("tracker", logger::COLOR_GRAY);
}

/// Wire one connected emulator into an engine.
pub fn build_engine(
    config: &Config,
    inst: &InstanceConfig,
    device: Device,
    clock: Arc<dyn Clock>,
    ledger: Arc<dyn ProgressLedger>,
    cancel: CancelToken,
) -> Result<Engine, ConfigError> {
    let layout = Arc::clone(config.layout_for(inst)?);
    let e = &config.engine;
    let detector = StateDetector::new(
        layout,
        device.screen,
        TemplateMatcher::new(device.similarity),
        Arc::clone(&clock),
        e.min_confidence,
        e.poll_interval(),
    );
    let driver = ActionDriver::new(device.input, &inst.name);
    let guard = OverlayGuard::new(config.overlays.clone(), e.max_overlay_dismissals, e.confirm_timeout());
    Ok(Engine::new(
        &inst.name,
        detector,
        driver,
        clock,
        ledger,
        guard,
        RunSettings::from_config(e),
        cancel,
    ))
}

/// Run each task of a routine in order, stopping early once cancelled.
/// `only` restricts the pass to a single task id.
pub fn run_routine(engine: &mut Engine, config: &Config, routine: &[String], only: Option<&str>) -> Vec<RunOutcome> {
    let mut outcomes = Vec::new();
    for task in routine {
        if only.is_some_and(|t| t != task.as_str()) {
            continue;
        }
        if engine.cancel_token().is_cancelled() {
            break;
        }
        match tasks::run_task(engine, task, &config.tasks) {
            Some(outcome) => outcomes.push(outcome),
            None => logger::warn_p(engine.instance(), &format!("unknown task {}", task)),
        }
    }
    outcomes
}

/// Single headless pass over every enabled instance (or just `instance`).
pub fn run_once(rt: &Runtime, instance: Option<&str>, task: Option<&str>) -> anyhow::Result<Vec<RunOutcome>> {
    let config = &rt.config;
    if let Some(name) = instance {
        if config.instance(name).is_none() {
            anyhow::bail!("no instance named '{}' in config", name);
        }
    }
    let mut outcomes = Vec::new();
    for inst in &config.instances {
        match instance {
            Some(name) if name != inst.name => continue,
            None if !inst.enabled => continue,
            _ => {}
        }
        let device = rt.platform.connect(&inst.name)?;
        let mut engine = build_engine(config, inst, device, Arc::clone(&rt.clock), Arc::clone(&rt.ledger), CancelToken::new())?;
        let routine = config.routine_for(inst)?;
        outcomes.extend(run_routine(&mut engine, config, routine, task));
    }
    Ok(outcomes)
}

fn update_entry(state: &Mutex<Vec<InstanceEntry>>, name: &str, f: impl FnOnce(&mut InstanceEntry)) {
    let mut entries = state.lock().unwrap();
    if let Some(entry) = entries.iter_mut().find(|e| e.name == name) {
        f(entry);
    }
}

/// Worker loop for one instance: routine, pause, repeat until cancelled.
fn instance_worker(rt: Runtime, inst: InstanceConfig, state: Arc<Mutex<Vec<InstanceEntry>>>, cancel: CancelToken) {
    let name = inst.name.clone();
    let setup = rt
        .platform
        .connect(&name)
        .and_then(|device| {
            build_engine(&rt.config, &inst, device, Arc::clone(&rt.clock), Arc::clone(&rt.ledger), cancel.clone())
                .map_err(anyhow::Error::from)
        });
    let mut engine = match setup {
        Ok(engine) => engine,
        Err(e) => {
            logger::error_p(&name, &format!("cannot start: {:#}", e));
            update_entry(&state, &name, |entry| entry.error = Some(format!("{:#}", e)));
            return;
        }
    };
    let observer_state = Arc::clone(&state);
    let observer_name = name.clone();
    engine = engine.with_observer(Box::new(move |task, st| {
        update_entry(&observer_state, &observer_name, |entry| {
            entry.status.task = Some(task.to_string());
            entry.status.state = Some(st.to_string());
        });
    }));
    update_entry(&state, &name, |entry| entry.error = None);

    let routine = match rt.config.routine_for(&inst) {
        Ok(r) => r.to_vec(),
        Err(e) => {
            update_entry(&state, &name, |entry| entry.error = Some(e.to_string()));
            return;
        }
    };
    let interval = Duration::from_secs(rt.config.engine.routine_interval_secs);

    logger::info_p(&name, &format!("worker started, routine: {}", routine.join(", ")));
    while !cancel.is_cancelled() {
        for task in &routine {
            if cancel.is_cancelled() {
                break;
            }
            if let Some(outcome) = tasks::run_task(&mut engine, task, &rt.config.tasks) {
                update_entry(&state, &name, |entry| {
                    entry.status.last_outcome = Some(outcome.to_string());
                });
            }
        }
        if sleep_until_cancelled(rt.clock.as_ref(), interval, || cancel.is_cancelled()) {
            break;
        }
    }
    update_entry(&state, &name, |entry| {
        entry.status.task = None;
        entry.status.state = None;
    });
    logger::info_p(&name, "worker stopped");
}

struct Worker {
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

impl Worker {
    fn stop(self) {
        self.cancel.cancel();
        self.handle.join().ok();
    }
}

fn spawn_worker(rt: &Runtime, name: &str, state: &Arc<Mutex<Vec<InstanceEntry>>>, workers: &mut HashMap<String, Worker>) {
    if workers.contains_key(name) {
        return;
    }
    let Some(inst) = rt.config.instance(name).cloned() else {
        logger::error(&format!("instance {} vanished from config", name));
        return;
    };
    let cancel = CancelToken::new();
    let rt = rt.clone();
    let state = Arc::clone(state);
    let token = cancel.clone();
    let handle = thread::spawn(move || instance_worker(rt, inst, state, token));
    workers.insert(name.to_string(), Worker { cancel, handle });
}

fn stop_worker(name: &str, workers: &mut HashMap<String, Worker>) {
    if let Some(w) = workers.remove(name) {
        w.stop();
    }
}

fn stop_all(workers: &mut HashMap<String, Worker>) {
    // Signal every worker first so they wind down in parallel.
    for w in workers.values() {
        w.cancel.cancel();
    }
    for (_, w) in workers.drain() {
        w.handle.join().ok();
    }
}

/// Drain pending commands. Returns false on Quit.
fn process_commands(
    cmd_rx: &mpsc::Receiver<Command>,
    rt: &Runtime,
    state: &Arc<Mutex<Vec<InstanceEntry>>>,
    orch_state: &Mutex<OrchestratorState>,
    workers: &mut HashMap<String, Worker>,
) -> bool {
    while let Ok(cmd) = cmd_rx.try_recv() {
        match cmd {
            Command::Quit => {
                logger::info("shutting down");
                stop_all(workers);
                *orch_state.lock().unwrap() = OrchestratorState::Stopped;
                return false;
            }
            Command::Toggle(idx) => {
                let (name, enabled) = {
                    let entries = state.lock().unwrap();
                    let Some(entry) = entries.get(idx) else { continue };
                    (entry.name.clone(), entry.enabled)
                };
                logger::info(&format!("enable {}: {}", name, enabled));
                let is_running = *orch_state.lock().unwrap() == OrchestratorState::Running;
                if enabled && is_running {
                    spawn_worker(rt, &name, state, workers);
                } else if !enabled {
                    stop_worker(&name, workers);
                }
            }
            Command::StartStop => {
                let current = *orch_state.lock().unwrap();
                match current {
                    OrchestratorState::Stopping => logger::info("orchestrator stopping..."),
                    OrchestratorState::Running => {
                        logger::info("orchestrator started");
                        let names: Vec<String> = state
                            .lock()
                            .unwrap()
                            .iter()
                            .filter(|e| e.enabled)
                            .map(|e| e.name.clone())
                            .collect();
                        for name in names {
                            spawn_worker(rt, &name, state, workers);
                        }
                    }
                    OrchestratorState::Stopped => {}
                }
            }
            Command::Restart(idx) => {
                if *orch_state.lock().unwrap() != OrchestratorState::Running {
                    continue;
                }
                let name = {
                    let entries = state.lock().unwrap();
                    let Some(entry) = entries.get(idx) else { continue };
                    if !entry.enabled {
                        continue;
                    }
                    entry.name.clone()
                };
                logger::info(&format!("restarting {}", name));
                stop_worker(&name, workers);
                spawn_worker(rt, &name, state, workers);
            }
        }
    }
    true
}

/// Main orchestration loop. Runs on a background thread.
pub fn orchestrate(
    rt: Runtime,
    state: Arc<Mutex<Vec<InstanceEntry>>>,
    orch_state: Arc<Mutex<OrchestratorState>>,
    cmd_rx: mpsc::Receiver<Command>,
) {
    let mut workers: HashMap<String, Worker> = HashMap::new();

    loop {
        if !process_commands(&cmd_rx, &rt, &state, &orch_state, &mut workers) {
            return;
        }

        if *orch_state.lock().unwrap() == OrchestratorState::Stopping {
            // Workers honour the cancel token at the top of their next polling cycle.
            stop_all(&mut workers);
            *orch_state.lock().unwrap() = OrchestratorState::Stopped;
            logger::info("orchestrator stopped");
            continue;
        }

        thread::sleep(Duration::from_millis(100));
    }
}
