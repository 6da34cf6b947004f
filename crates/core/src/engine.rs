//! Generic task runner.
//!
//! A task is a table of states: for each state it names the keys to watch
//! and maps what was seen to a [`Transition`]. The engine owns the polling
//! loop, overlay preemption, action confirmation, per-step retry budgets,
//! cancellation and the single tracker report at the end of a run.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::config::{EngineConfig, TaskCommon};
use crate::debug;
use crate::detector::StateDetector;
use crate::driver::{Action, ActionDriver};
use crate::error::{AbortReason, StepFailure};
use crate::layout::Layout;
use crate::logger;
use crate::matcher;
use crate::overlay::OverlayGuard;
use crate::tracker::{Progress, ProgressLedger};
use crate::types::{Detection, MatchResult, ScreenSnapshot};

/// Go transitions allowed back to back before the table is declared looping.
const MAX_CHAINED_GOES: u32 = 16;

/// A template key a task relies on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyDecl {
    pub key: &'static str,
    pub required: bool,
}

pub const fn required(key: &'static str) -> KeyDecl {
    KeyDecl { key, required: true }
}

pub const fn optional(key: &'static str) -> KeyDecl {
    KeyDecl { key, required: false }
}

/// What the engine needs to know about one state before polling it.
#[derive(Debug, Clone)]
pub struct StepSpec {
    /// Keys observed on every snapshot while in this state.
    pub watch: &'static [&'static str],
    /// Longest time the state may keep answering `Wait`. Defaults to the engine's step timeout.
    pub timeout: Option<Duration>,
}

impl StepSpec {
    pub fn watch(keys: &'static [&'static str]) -> Self {
        Self { watch: keys, timeout: None }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Next<S> {
    State(S),
    Complete,
    Skip { reason: String, cooldown: Option<Duration> },
}

/// How an action's effect is confirmed before the state advances.
#[derive(Debug, Clone, PartialEq)]
pub enum Expect {
    /// One of these keys shows up.
    Appears(Vec<&'static str>),
    /// This key goes away.
    Vanishes(&'static str),
    /// No observable signal: wait, and let the next state verify.
    Settles(Duration),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transition<S> {
    /// Nothing decisive on screen yet; poll again.
    Wait,
    Go { to: Next<S>, credit: u32 },
    Act { action: Action, expect: Expect, then: Next<S>, credit: u32 },
    Abort(String),
}

impl<S> Transition<S> {
    pub fn to(state: S) -> Self {
        Transition::Go { to: Next::State(state), credit: 0 }
    }

    pub fn complete() -> Self {
        Transition::Go { to: Next::Complete, credit: 0 }
    }

    pub fn skip(reason: &str) -> Self {
        Transition::Go { to: Next::Skip { reason: reason.to_string(), cooldown: None }, credit: 0 }
    }

    pub fn skip_for(reason: &str, cooldown: Duration) -> Self {
        Transition::Go {
            to: Next::Skip { reason: reason.to_string(), cooldown: Some(cooldown) },
            credit: 0,
        }
    }

    pub fn act(action: Action, expect: Expect, then: S) -> Self {
        Transition::Act { action, expect, then: Next::State(then), credit: 0 }
    }

    pub fn act_then(action: Action, expect: Expect, then: Next<S>) -> Self {
        Transition::Act { action, expect, then, credit: 0 }
    }

    /// Progress counted once the transition is confirmed.
    pub fn with_credit(self, n: u32) -> Self {
        match self {
            Transition::Go { to, .. } => Transition::Go { to, credit: n },
            Transition::Act { action, expect, then, .. } => Transition::Act { action, expect, then, credit: n },
            other => other,
        }
    }
}

/// Registration of one task type with the engine.
pub trait Task {
    type State: Copy + Eq + Hash + fmt::Debug;
    type Memo: Default;

    fn id(&self) -> &'static str;
    fn templates(&self) -> &'static [KeyDecl];
    fn buttons(&self) -> &'static [&'static str] {
        &[]
    }
    fn initial(&self) -> Self::State;
    fn step(&self, state: Self::State) -> StepSpec;
    /// Must be total: every observation maps to a transition.
    fn transition(&self, state: Self::State, scene: &Scene<'_>, memo: &mut Self::Memo) -> Transition<Self::State>;
}

static UNWATCHED: Detection = Detection::Unknown;

/// What one polling cycle saw, as presented to a task.
pub struct Scene<'a> {
    snapshot: &'a ScreenSnapshot,
    layout: &'a Layout,
    detections: &'a BTreeMap<String, Detection>,
    misses: &'a HashMap<&'static str, u32>,
    /// Time spent in the current state (reset by retries).
    pub elapsed: Duration,
    /// Polls taken in the current state, this one included.
    pub polls: u32,
    pub absence_polls: u32,
}

impl<'a> Scene<'a> {
    pub fn new(
        snapshot: &'a ScreenSnapshot,
        layout: &'a Layout,
        detections: &'a BTreeMap<String, Detection>,
        misses: &'a HashMap<&'static str, u32>,
        elapsed: Duration,
        polls: u32,
        absence_polls: u32,
    ) -> Self {
        Self { snapshot, layout, detections, misses, elapsed, polls, absence_polls }
    }

    pub fn snapshot(&self) -> &ScreenSnapshot {
        self.snapshot
    }

    /// Detection for a watched key. Keys outside the step's watch list read `Unknown`.
    pub fn get(&self, key: &str) -> &Detection {
        self.detections.get(key).unwrap_or(&UNWATCHED)
    }

    pub fn found(&self, key: &str) -> bool {
        self.get(key).is_found()
    }

    pub fn best(&self, key: &str) -> Option<&MatchResult> {
        self.get(key).best()
    }

    pub fn bottom_most(&self, key: &str) -> Option<&MatchResult> {
        matcher::bottom_most(self.get(key).matches())
    }

    pub fn is_enabled(&self, key: &str) -> bool {
        self.layout.is_enabled(key)
    }

    /// Consecutive polls in this state where `key` was checked and not seen.
    pub fn misses(&self, key: &str) -> u32 {
        self.misses.get(key).copied().unwrap_or(0)
    }

    /// Absence trusted: missed for at least `absence_polls` polls in a row.
    pub fn gone(&self, key: &str) -> bool {
        self.misses(key) >= self.absence_polls
    }
}

/// Per-step retry allowance with exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryBudget {
    pub max_retries: u32,
    pub backoff: Duration,
    pub factor: f64,
}

impl RetryBudget {
    /// Pause before retry number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16) as i32;
        self.backoff.mul_f64(self.factor.max(1.0).powi(exp))
    }
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub poll_interval: Duration,
    pub step_timeout: Duration,
    pub confirm_timeout: Duration,
    pub max_run: Duration,
    pub absence_polls: u32,
    pub retry: RetryBudget,
    pub debug_dir: Option<PathBuf>,
}

impl RunSettings {
    pub fn from_config(engine: &EngineConfig) -> Self {
        Self {
            poll_interval: engine.poll_interval(),
            step_timeout: engine.step_timeout(),
            confirm_timeout: engine.confirm_timeout(),
            max_run: engine.max_run(),
            absence_polls: engine.absence_polls,
            retry: RetryBudget {
                max_retries: engine.retry.max_retries,
                backoff: Duration::from_millis(engine.retry.backoff_ms),
                factor: engine.retry.backoff_factor,
            },
            debug_dir: engine.debug_dir.clone(),
        }
    }

    pub fn with_overrides(&self, common: &TaskCommon) -> Self {
        let mut s = self.clone();
        if let Some(r) = common.retries {
            s.retry.max_retries = r;
        }
        if let Some(t) = common.step_timeout_secs {
            s.step_timeout = Duration::from_secs(t);
        }
        if let Some(n) = common.absence_polls {
            s.absence_polls = n.max(1);
        }
        s
    }
}

/// Cooperative stop flag shared between the operator and a runner.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    Completed,
    Skipped(String),
    Aborted(AbortReason),
}

impl Terminal {
    pub fn label(&self) -> &'static str {
        match self {
            Terminal::Completed => "Completed",
            Terminal::Skipped(_) => "Skipped",
            Terminal::Aborted(_) => "Aborted",
        }
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, Terminal::Aborted(_))
    }
}

impl fmt::Display for Terminal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminal::Completed => write!(f, "Completed"),
            Terminal::Skipped(reason) => write!(f, "Skipped ({})", reason),
            Terminal::Aborted(reason) => write!(f, "Aborted ({})", reason),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub instance: String,
    pub task: String,
    pub terminal: Terminal,
    /// Net progress reported to the tracker.
    pub delta: u32,
    pub cycles: u32,
    pub actions: u32,
    pub elapsed: Duration,
    pub last_state: String,
    pub tracker_error: Option<String>,
    pub debug_capture: Option<PathBuf>,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}: {} +{} in {} cycles ({:.1}s, last state {})",
            self.instance,
            self.task,
            self.terminal,
            self.delta,
            self.cycles,
            self.elapsed.as_secs_f64(),
            self.last_state
        )?;
        if let Some(e) = &self.tracker_error {
            write!(f, " [tracker: {}]", e)?;
        }
        Ok(())
    }
}

/// Callback receiving `(task, state)` whenever a run changes state.
pub type StateObserver = Box<dyn Fn(&str, &str) + Send>;

#[derive(Default)]
struct RunStats {
    cycles: u32,
    actions: u32,
    delta: u32,
    cooldown: Option<Duration>,
    last_state: String,
}

/// Runs tasks against one emulator instance, one at a time.
pub struct Engine {
    instance: String,
    detector: StateDetector,
    driver: ActionDriver,
    clock: Arc<dyn Clock>,
    ledger: Arc<dyn ProgressLedger>,
    guard: OverlayGuard,
    settings: RunSettings,
    cancel: CancelToken,
    observer: Option<StateObserver>,
}

impl Engine {
    pub fn new(
        instance: &str,
        detector: StateDetector,
        driver: ActionDriver,
        clock: Arc<dyn Clock>,
        ledger: Arc<dyn ProgressLedger>,
        guard: OverlayGuard,
        settings: RunSettings,
        cancel: CancelToken,
    ) -> Self {
        Self {
            instance: instance.to_string(),
            detector,
            driver,
            clock,
            ledger,
            guard,
            settings,
            cancel,
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: StateObserver) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn instance(&self) -> &str {
        &self.instance
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn detector(&self) -> &StateDetector {
        &self.detector
    }

    fn publish(&self, task: &str, state: &str) {
        if let Some(observer) = &self.observer {
            observer(task, state);
        }
    }

    /// Drive `task` to a terminal state and report it to the tracker exactly once.
    pub fn run<T: Task>(&mut self, task: &T, overrides: &TaskCommon) -> RunOutcome {
        let settings = self.settings.with_overrides(overrides);
        let started = self.clock.now();
        let mut stats = RunStats::default();
        logger::info_p(&self.instance, &format!("{}: start", task.id()));

        let terminal = if self.cancel.is_cancelled() {
            Terminal::Aborted(AbortReason::Cancelled)
        } else {
            match self.ledger.should_run(&self.instance, task.id()) {
                Ok(true) => self.drive(task, &settings, &mut stats),
                Ok(false) => Terminal::Skipped("daily limit reached or cooling down".into()),
                Err(e) => Terminal::Aborted(AbortReason::TrackerUnavailable(e.to_string())),
            }
        };

        let progress = Progress {
            delta: stats.delta,
            cooldown: stats.cooldown,
            outcome: terminal.to_string(),
        };
        let tracker_error = self
            .ledger
            .record_progress(&self.instance, task.id(), &progress)
            .err()
            .map(|e| e.to_string());

        let debug_capture = match (&terminal, &settings.debug_dir, self.detector.last_snapshot()) {
            (Terminal::Aborted(_), Some(dir), Some(snap)) => {
                match debug::save_snapshot(dir, &self.instance, task.id(), snap) {
                    Ok(path) => {
                        logger::info_p(&self.instance, &format!("debug capture saved to {}", path.display()));
                        Some(path)
                    }
                    Err(e) => {
                        logger::warn_p(&self.instance, &format!("debug capture skipped: {:#}", e));
                        None
                    }
                }
            }
            _ => None,
        };

        let outcome = RunOutcome {
            instance: self.instance.clone(),
            task: task.id().to_string(),
            terminal,
            delta: stats.delta,
            cycles: stats.cycles,
            actions: stats.actions,
            elapsed: self.clock.now() - started,
            last_state: stats.last_state,
            tracker_error,
            debug_capture,
        };
        if outcome.terminal.is_aborted() || outcome.tracker_error.is_some() {
            logger::error_p(&self.instance, &outcome.to_string());
        } else {
            logger::info_p(&self.instance, &outcome.to_string());
        }
        self.publish(task.id(), outcome.terminal.label());
        outcome
    }

    fn drive<T: Task>(&mut self, task: &T, s: &RunSettings, stats: &mut RunStats) -> Terminal {
        let clock = Arc::clone(&self.clock);
        let deadline = clock.now() + s.max_run;
        let mut memo = T::Memo::default();
        let mut state = task.initial();
        let mut entered = clock.now();
        let mut polls = 0u32;
        let mut chained_goes = 0u32;
        let mut misses: HashMap<&'static str, u32> = HashMap::new();
        let mut failures: HashMap<T::State, u32> = HashMap::new();
        stats.last_state = format!("{:?}", state);
        self.publish(task.id(), &stats.last_state);

        loop {
            if self.cancel.is_cancelled() {
                return Terminal::Aborted(AbortReason::Cancelled);
            }
            if clock.now() >= deadline {
                return Terminal::Aborted(AbortReason::RunDeadline(s.max_run));
            }
            stats.cycles += 1;
            polls += 1;
            let step = task.step(state);
            let timeout = step.timeout.unwrap_or(s.step_timeout);

            let outcome = match self.observe(&step, &mut misses) {
                Err(failure) => Err(failure),
                Ok((snapshot, detections)) => {
                    let scene = Scene::new(
                        &snapshot,
                        self.detector.layout(),
                        &detections,
                        &misses,
                        clock.now() - entered,
                        polls,
                        s.absence_polls,
                    );
                    let transition = task.transition(state, &scene, &mut memo);
                    match transition {
                        Transition::Wait => {
                            chained_goes = 0;
                            if clock.now() - entered >= timeout {
                                Err(StepFailure::DetectionTimeout {
                                    keys: step.watch.iter().map(|k| k.to_string()).collect(),
                                    timeout,
                                })
                            } else {
                                clock.sleep(s.poll_interval);
                                Ok(None)
                            }
                        }
                        Transition::Go { to, credit } => {
                            chained_goes += 1;
                            if chained_goes > MAX_CHAINED_GOES {
                                return Terminal::Aborted(AbortReason::Task {
                                    step: format!("{:?}", state),
                                    detail: "transition table loops without waiting or acting".into(),
                                });
                            }
                            Ok(Some((to, credit)))
                        }
                        Transition::Act { action, expect, then, credit } => {
                            chained_goes = 0;
                            stats.actions += 1;
                            self.act(&action, &expect, &snapshot, s).map(|_| Some((then, credit)))
                        }
                        Transition::Abort(detail) => {
                            return Terminal::Aborted(AbortReason::Task {
                                step: format!("{:?}", state),
                                detail,
                            });
                        }
                    }
                }
            };

            match outcome {
                Ok(None) => {}
                Ok(Some((next, credit))) => {
                    stats.delta += credit;
                    match next {
                        Next::Complete => return Terminal::Completed,
                        Next::Skip { reason, cooldown } => {
                            stats.cooldown = cooldown;
                            return Terminal::Skipped(reason);
                        }
                        Next::State(next) => {
                            if next != state {
                                logger::info_p(
                                    &self.instance,
                                    &format!("{}: {:?} -> {:?}", task.id(), state, next),
                                );
                                state = next;
                                polls = 0;
                                stats.last_state = format!("{:?}", state);
                                self.publish(task.id(), &stats.last_state);
                            }
                            entered = clock.now();
                            misses.clear();
                        }
                    }
                }
                Err(failure) => {
                    chained_goes = 0;
                    let n = failures.entry(state).or_insert(0);
                    *n += 1;
                    logger::warn_p(
                        &self.instance,
                        &format!(
                            "{}: {:?} failed ({}/{}): {}",
                            task.id(),
                            state,
                            n,
                            s.retry.max_retries,
                            failure
                        ),
                    );
                    if *n > s.retry.max_retries {
                        return Terminal::Aborted(AbortReason::RetriesExhausted {
                            step: format!("{:?}", state),
                            failure,
                        });
                    }
                    clock.sleep(s.retry.backoff_for(*n));
                    entered = clock.now();
                    polls = 0;
                    misses.clear();
                }
            }
        }
    }

    /// One snapshot, cleared of overlays, with every watched key evaluated on it.
    fn observe(
        &mut self,
        step: &StepSpec,
        misses: &mut HashMap<&'static str, u32>,
    ) -> Result<(ScreenSnapshot, BTreeMap<String, Detection>), StepFailure> {
        let snapshot = self.detector.snapshot()?;
        let snapshot = if self.guard.is_empty() {
            snapshot
        } else {
            self.guard
                .apply(&mut self.detector, &self.driver, snapshot, &self.instance)?
                .snapshot
        };
        let detections = self.detector.observe_all(&snapshot, step.watch.iter().copied())?;
        for &key in step.watch {
            match detections.get(key) {
                Some(Detection::NotFound) => *misses.entry(key).or_insert(0) += 1,
                Some(Detection::Found(_)) => {
                    misses.insert(key, 0);
                }
                _ => {}
            }
        }
        Ok((snapshot, detections))
    }

    /// Issue `action`, then confirm its effect before reporting success.
    fn act(&mut self, action: &Action, expect: &Expect, snapshot: &ScreenSnapshot, s: &RunSettings) -> Result<(), StepFailure> {
        self.driver.perform(action, self.detector.layout(), snapshot)?;
        let unconfirmed = |expected: String| StepFailure::ActionUnconfirmed {
            action: action.to_string(),
            expected,
            timeout: s.confirm_timeout,
        };
        match expect {
            Expect::Appears(keys) => match self.detector.wait_for_any(keys, s.confirm_timeout) {
                Ok(_) => Ok(()),
                Err(StepFailure::DetectionTimeout { .. }) => Err(unconfirmed(format!("{} to appear", keys.join("|")))),
                Err(e) => Err(e),
            },
            Expect::Vanishes(key) => match self.detector.wait_until_gone(key, s.confirm_timeout) {
                Ok(()) => Ok(()),
                Err(StepFailure::DetectionTimeout { .. }) => Err(unconfirmed(format!("{} to vanish", key))),
                Err(e) => Err(e),
            },
            Expect::Settles(d) => {
                self.clock.sleep(*d);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{Dismiss, OverlayConfig};
    use crate::layout::RawLayout;
    use crate::matcher::TemplateMatcher;
    use crate::platform::sim::{SimGame, SimScreen};
    use crate::error::TrackerError;
    use std::path::Path;
    use std::sync::Mutex;

    /// Ledger spy counting every call.
    #[derive(Default)]
    struct Spy {
        gate: Mutex<Option<bool>>,
        records: Mutex<Vec<(String, Progress)>>,
    }

    impl ProgressLedger for Spy {
        fn should_run(&self, _instance: &str, _task: &str) -> Result<bool, TrackerError> {
            match *self.gate.lock().unwrap() {
                Some(v) => Ok(v),
                None => Err(TrackerError::Unavailable("spy offline".into())),
            }
        }

        fn record_progress(&self, _instance: &str, task: &str, progress: &Progress) -> Result<(), TrackerError> {
            self.records.lock().unwrap().push((task.to_string(), progress.clone()));
            Ok(())
        }
    }

    fn spy(gate: Option<bool>) -> Arc<Spy> {
        Arc::new(Spy { gate: Mutex::new(gate), records: Mutex::default() })
    }

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    enum Door {
        Closed,
        Open,
    }

    /// Tap the door, expect the room; then leave.
    struct DoorTask;

    impl Task for DoorTask {
        type State = Door;
        type Memo = ();

        fn id(&self) -> &'static str {
            "door"
        }

        fn templates(&self) -> &'static [KeyDecl] {
            const KEYS: &[KeyDecl] = &[required("door"), required("room"), optional("bell")];
            KEYS
        }

        fn initial(&self) -> Door {
            Door::Closed
        }

        fn step(&self, state: Door) -> StepSpec {
            match state {
                Door::Closed => StepSpec::watch(&["door", "room", "bell"]),
                Door::Open => StepSpec::watch(&["room"]).with_timeout(Duration::from_secs(4)),
            }
        }

        fn transition(&self, state: Door, scene: &Scene<'_>, _memo: &mut ()) -> Transition<Door> {
            match state {
                Door::Closed => {
                    if scene.found("room") {
                        Transition::to(Door::Open)
                    } else if let Some(door) = scene.best("door") {
                        Transition::act(Action::TapMatch(door.clone()), Expect::Appears(vec!["room"]), Door::Open)
                    } else if scene.gone("door") {
                        Transition::skip("no door")
                    } else {
                        Transition::Wait
                    }
                }
                Door::Open => {
                    if scene.found("room") {
                        Transition::complete().with_credit(1)
                    } else {
                        Transition::Wait
                    }
                }
            }
        }
    }

    struct Rig {
        game: SimGame,
        clock: ManualClock,
        engine: Engine,
    }

    fn rig(game: SimGame, ledger: Arc<dyn ProgressLedger>, overlays: Vec<OverlayConfig>) -> Rig {
        let raw: RawLayout = serde_yaml::from_str(
            "templates:\n  door: door.png\n  room: room.png\n  bell: \"\"\n  popup: popup.png\n",
        )
        .unwrap();
        let layout = Arc::new(Layout::build("540p", &raw, Path::new("")).unwrap());
        let clock = ManualClock::new();
        let clock_arc: Arc<dyn Clock> = Arc::new(clock.clone());
        let detector = StateDetector::new(
            layout,
            Box::new(game.clone()),
            TemplateMatcher::new(Arc::new(game.clone())),
            Arc::clone(&clock_arc),
            0.85,
            Duration::from_millis(500),
        );
        let mut config = EngineConfig::default();
        config.retry.max_retries = 1;
        config.retry.backoff_ms = 200;
        let engine = Engine::new(
            "emu",
            detector,
            ActionDriver::new(Box::new(game.clone()), "emu"),
            clock_arc,
            ledger,
            OverlayGuard::new(overlays, 3, Duration::from_secs(3)),
            RunSettings::from_config(&config),
            CancelToken::new(),
        );
        Rig { game, clock, engine }
    }

    fn door_game() -> SimGame {
        SimGame::new("emu", 540, 960, "hall").with_screens([
            SimScreen::new("hall").element("door.png", 270, 700).on_tap("room"),
            SimScreen::new("room").element("room.png", 270, 100),
        ])
    }

    #[test]
    fn completes_and_reports_once() {
        let ledger = spy(Some(true));
        let mut r = rig(door_game(), ledger.clone(), vec![]);
        let out = r.engine.run(&DoorTask, &TaskCommon::default());
        assert_eq!(out.terminal, Terminal::Completed);
        assert_eq!(out.delta, 1);
        assert_eq!(out.actions, 1);
        let records = ledger.records.lock().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].1.delta, 1);
    }

    #[test]
    fn absence_threshold_skips() {
        let ledger = spy(Some(true));
        let mut r = rig(SimGame::blank("emu"), ledger.clone(), vec![]);
        let out = r.engine.run(&DoorTask, &TaskCommon::default());
        assert_eq!(out.terminal, Terminal::Skipped("no door".into()));
        assert_eq!(out.cycles, 3);
        assert_eq!(ledger.records.lock().unwrap().len(), 1);
    }

    #[test]
    fn per_task_override_changes_absence_threshold() {
        let ledger = spy(Some(true));
        let mut r = rig(SimGame::blank("emu"), ledger, vec![]);
        let common = TaskCommon { absence_polls: Some(5), ..TaskCommon::default() };
        assert_eq!(r.engine.run(&DoorTask, &common).cycles, 5);
    }

    #[test]
    fn unconfirmed_action_exhausts_budget_and_stops() {
        let game = SimGame::new("emu", 540, 960, "hall")
            .with_screens([SimScreen::new("hall").element("door.png", 270, 700)]);
        let ledger = spy(Some(true));
        let mut r = rig(game, ledger.clone(), vec![]);
        let out = r.engine.run(&DoorTask, &TaskCommon::default());
        match &out.terminal {
            Terminal::Aborted(AbortReason::RetriesExhausted { step, failure }) => {
                assert_eq!(step, "Closed");
                assert!(matches!(failure, StepFailure::ActionUnconfirmed { .. }));
            }
            other => panic!("unexpected terminal {other}"),
        }
        assert_eq!(r.game.taps().len(), 2);
        assert_eq!(ledger.records.lock().unwrap().len(), 1);
    }

    #[test]
    fn wait_past_step_timeout_is_detection_timeout() {
        // Room shows briefly then disappears: Open waits for it and times out.
        let game = SimGame::new("emu", 540, 960, "hall").with_screens([
            SimScreen::new("hall").element("door.png", 270, 700).on_tap("room"),
            SimScreen::new("room").element("room.png", 270, 100).after_captures(1, "dark"),
            SimScreen::new("dark"),
        ]);
        let ledger = spy(Some(true));
        let mut r = rig(game, ledger, vec![]);
        let out = r.engine.run(&DoorTask, &TaskCommon::default());
        match out.terminal {
            Terminal::Aborted(AbortReason::RetriesExhausted { step, failure }) => {
                assert_eq!(step, "Open");
                assert!(matches!(failure, StepFailure::DetectionTimeout { .. }));
            }
            other => panic!("unexpected terminal {other}"),
        }
        assert!(r.clock.elapsed() >= Duration::from_secs(8));
    }

    #[test]
    fn cancel_before_start_issues_nothing() {
        let ledger = spy(Some(true));
        let mut r = rig(door_game(), ledger.clone(), vec![]);
        r.engine.cancel_token().cancel();
        let out = r.engine.run(&DoorTask, &TaskCommon::default());
        assert_eq!(out.terminal, Terminal::Aborted(AbortReason::Cancelled));
        assert!(r.game.inputs().is_empty());
        assert_eq!(r.game.captures(), 0);
        assert_eq!(ledger.records.lock().unwrap().len(), 1);
    }

    #[test]
    fn gated_run_is_skipped_and_still_reported() {
        let ledger = spy(Some(false));
        let mut r = rig(door_game(), ledger.clone(), vec![]);
        let out = r.engine.run(&DoorTask, &TaskCommon::default());
        assert!(matches!(out.terminal, Terminal::Skipped(_)));
        assert_eq!(out.delta, 0);
        assert_eq!(r.game.captures(), 0);
        assert_eq!(ledger.records.lock().unwrap().len(), 1);
    }

    #[test]
    fn tracker_outage_pauses_task() {
        let ledger = spy(None);
        let mut r = rig(door_game(), ledger, vec![]);
        let out = r.engine.run(&DoorTask, &TaskCommon::default());
        assert_eq!(out.terminal.label(), "Aborted");
        assert!(r.game.inputs().is_empty());
    }

    #[test]
    fn overlay_is_cleared_before_task_predicates() {
        let game = SimGame::new("emu", 540, 960, "popup").with_screens([
            SimScreen::new("popup").element("popup.png", 500, 50).element("door.png", 270, 700).on_back("hall"),
            SimScreen::new("hall").element("door.png", 270, 700).on_tap("room"),
            SimScreen::new("room").element("room.png", 270, 100),
        ]);
        let overlays = vec![OverlayConfig { key: "popup".into(), dismiss: Dismiss::Back }];
        let mut r = rig(game, spy(Some(true)), overlays);
        let out = r.engine.run(&DoorTask, &TaskCommon::default());
        assert_eq!(out.terminal, Terminal::Completed);
        assert_eq!(r.game.visited(), vec!["popup", "hall", "room"]);
    }

    #[test]
    fn backoff_grows_geometrically() {
        let b = RetryBudget { max_retries: 3, backoff: Duration::from_millis(100), factor: 2.0 };
        assert_eq!(b.backoff_for(1), Duration::from_millis(100));
        assert_eq!(b.backoff_for(3), Duration::from_millis(400));
    }

    #[test]
    fn credit_attaches_to_go_and_act() {
        let t: Transition<Door> = Transition::to(Door::Open).with_credit(2);
        assert_eq!(t, Transition::Go { to: Next::State(Door::Open), credit: 2 });
        assert_eq!(Transition::<Door>::Wait.with_credit(1), Transition::Wait);
    }
}
