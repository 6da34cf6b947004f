//! Shared pieces for the scenario suite: a config builder that declares every
//! task key, scripted games for each task, and a rig wiring them to an engine
//! on virtual time.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use lastz_core::clock::ManualClock;
use lastz_core::config::Config;
use lastz_core::engine::{CancelToken, Engine, RunOutcome};
use lastz_core::error::ConfigError;
use lastz_core::orchestrator::build_engine;
use lastz_core::platform::sim::{SimGame, SimScreen};
use lastz_core::tasks;
use lastz_core::tracker::{DailyTracker, MemoryStore, TaskRecord};

pub const INSTANCE: &str = "emu";
pub const LAYOUT: &str = "540p";

/// Centre of the `construction_hq` button on a 540x960 screen.
pub const HQ_CENTRE: (i32, i32) = (270, 528);

/// File name the layout and the sim screens agree on for `key`.
pub fn png(key: &str) -> String {
    format!("{}.png", key)
}

/// YAML config with one instance whose layout declares every task key.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
    routine: Vec<String>,
    disabled: Vec<String>,
    omitted: Vec<String>,
    extra_templates: Vec<String>,
    overlays: Vec<(String, String)>,
    engine: Vec<String>,
    tasks: BTreeMap<String, Vec<String>>,
}

impl ConfigBuilder {
    pub fn new(routine: &[&str]) -> Self {
        Self {
            routine: routine.iter().map(|t| t.to_string()).collect(),
            disabled: Vec::new(),
            omitted: Vec::new(),
            extra_templates: Vec::new(),
            overlays: Vec::new(),
            engine: Vec::new(),
            tasks: BTreeMap::new(),
        }
    }

    /// Every registered task in one routine.
    pub fn all_tasks() -> Self {
        Self::new(tasks::TASK_IDS)
    }

    /// Configure `key` with an empty path.
    pub fn disable(mut self, key: &str) -> Self {
        self.disabled.push(key.to_string());
        self
    }

    /// Leave `key` out of the layout entirely.
    pub fn omit(mut self, key: &str) -> Self {
        self.omitted.push(key.to_string());
        self
    }

    pub fn overlay(mut self, key: &str, dismiss: &str) -> Self {
        self.extra_templates.push(key.to_string());
        self.overlays.push((key.to_string(), dismiss.to_string()));
        self
    }

    /// Raw `key: value` line under `engine:`.
    pub fn engine(mut self, line: &str) -> Self {
        self.engine.push(line.to_string());
        self
    }

    /// Raw `key: value` line under `tasks.<task>:`.
    pub fn task(mut self, task: &str, line: &str) -> Self {
        self.tasks.entry(task.to_string()).or_default().push(line.to_string());
        self
    }

    pub fn yaml(&self) -> String {
        let mut keys: Vec<&str> = tasks::TASK_IDS
            .iter()
            .filter_map(|id| tasks::declared_templates(id))
            .flatten()
            .map(|decl| decl.key)
            .collect();
        keys.extend(self.extra_templates.iter().map(String::as_str));

        let mut y = format!("default_layout: \"{LAYOUT}\"\nlayouts:\n  \"{LAYOUT}\":\n    templates:\n");
        for key in keys {
            if self.omitted.iter().any(|k| k == key) {
                continue;
            }
            if self.disabled.iter().any(|k| k == key) {
                y.push_str(&format!("      {}: \"\"\n", key));
            } else {
                y.push_str(&format!("      {}: {}\n", key, png(key)));
            }
        }
        y.push_str("    buttons:\n      construction_hq: [[0.5, 0.6], [0.4, 0.6]]\n");
        y.push_str(&format!("instances:\n  - name: {INSTANCE}\n    routine: daily\n"));
        y.push_str(&format!("routines:\n  daily: [{}]\n", self.routine.join(", ")));
        if !self.overlays.is_empty() {
            y.push_str("overlays:\n");
            for (key, dismiss) in &self.overlays {
                y.push_str(&format!("  - key: {}\n    dismiss: {}\n", key, dismiss));
            }
        }
        if !self.engine.is_empty() {
            y.push_str("engine:\n");
            for line in &self.engine {
                y.push_str(&format!("  {}\n", line));
            }
        }
        if !self.tasks.is_empty() {
            y.push_str("tasks:\n");
            for (task, lines) in &self.tasks {
                y.push_str(&format!("  {}:\n", task));
                for line in lines {
                    y.push_str(&format!("    {}\n", line));
                }
            }
        }
        y
    }

    pub fn build(&self) -> Result<Config, ConfigError> {
        Config::from_yaml(&self.yaml(), Path::new(""))
    }
}

fn game(start: &str, screens: impl IntoIterator<Item = SimScreen>) -> SimGame {
    SimGame::new(INSTANCE, 540, 960, start).with_screens(screens)
}

/// Radar with one finished quest, a reward overlay and Laura waiting.
pub fn radar_game() -> SimGame {
    game(
        "city",
        [
            SimScreen::new("city").element(&png("radar_icon"), 480, 820).on_tap("radar"),
            SimScreen::new("radar")
                .element(&png("radar_menu_header"), 270, 60)
                .element(&png("radar_claim_button"), 400, 500)
                .on_tap("reward"),
            SimScreen::new("reward")
                .element(&png("radar_menu_header"), 270, 60)
                .element(&png("radar_reward_overlay"), 270, 480)
                .on_back("radar_done"),
            SimScreen::new("radar_done")
                .element(&png("radar_menu_header"), 270, 60)
                .element(&png("radar_laura_button"), 100, 300)
                .on_back("city_done"),
            SimScreen::new("city_done").element(&png("radar_icon"), 480, 820),
        ],
    )
}

/// Bounty board that opens fine but offers no mission.
pub fn empty_bounty_game() -> SimGame {
    game(
        "city",
        [
            SimScreen::new("city").element(&png("bounty_icon"), 80, 600).on_tap("board"),
            SimScreen::new("board").element(&png("bounty_menu_header"), 270, 60).on_back("city"),
        ],
    )
}

/// Bounty board offering `missions` Go buttons, one fewer after each send.
/// With `closes` the game drops back to the city after every dispatch.
pub fn bounty_game(missions: u32, closes: bool) -> SimGame {
    let mut screens = vec![SimScreen::new("city").element(&png("bounty_icon"), 80, 600).on_tap(&format!("board{missions}"))];
    for n in (0..=missions).rev() {
        let mut board = SimScreen::new(&format!("board{n}")).element(&png("bounty_menu_header"), 270, 60);
        for i in 0..n {
            board = board.element(&png("bounty_go_button"), 450, 200 + 120 * i as i32).on_tap(&format!("deploy{n}"));
        }
        screens.push(board.on_back("city_done"));
        if n == 0 {
            continue;
        }
        let after_send = if closes { format!("city{}", n - 1) } else { format!("board{}", n - 1) };
        screens.push(SimScreen::new(&format!("deploy{n}")).element(&png("bounty_quick_deploy"), 270, 700).on_tap(&format!("send{n}")));
        screens.push(SimScreen::new(&format!("send{n}")).element(&png("bounty_send_button"), 400, 880).on_tap(&after_send));
        if closes {
            screens.push(
                SimScreen::new(&format!("city{}", n - 1))
                    .element(&png("bounty_icon"), 80, 600)
                    .on_tap(&format!("board{}", n - 1)),
            );
        }
    }
    screens.push(SimScreen::new("city_done").element(&png("bounty_icon"), 80, 600));
    game("city", screens)
}

/// Two missions; the bottom one wants a hero that is already out marching.
pub fn busy_hero_bounty_game() -> SimGame {
    game(
        "city",
        [
            SimScreen::new("city").element(&png("bounty_icon"), 80, 600).on_tap("board"),
            SimScreen::new("board")
                .element(&png("bounty_menu_header"), 270, 60)
                .element(&png("bounty_go_button"), 450, 300)
                .on_tap("deploy_free")
                .element(&png("bounty_go_button"), 450, 700)
                .on_tap("deploy_busy"),
            SimScreen::new("deploy_busy")
                .element(&png("bounty_quick_deploy"), 270, 700)
                .element(&png("bounty_hero_busy"), 270, 480)
                .on_back("board"),
            SimScreen::new("deploy_free").element(&png("bounty_quick_deploy"), 270, 700).on_tap("send_free"),
            SimScreen::new("send_free").element(&png("bounty_send_button"), 400, 880).on_tap("board_left"),
            SimScreen::new("board_left")
                .element(&png("bounty_menu_header"), 270, 60)
                .element(&png("bounty_go_button"), 450, 700)
                .on_tap("deploy_busy")
                .on_back("city_done"),
            SimScreen::new("city_done").element(&png("bounty_icon"), 80, 600),
        ],
    )
}

/// Free builder whose panel swallows the first upgrade tap without any change.
pub fn construction_lost_tap_game() -> SimGame {
    let (hx, hy) = HQ_CENTRE;
    game(
        "city",
        [
            SimScreen::new("city").element(&png("construction_icon"), 60, 700).hotspot(hx, hy, "panel"),
            SimScreen::new("panel").element(&png("construction_upgrade_button"), 270, 800).on_tap("panel_again"),
            SimScreen::new("panel_again").element(&png("construction_upgrade_button"), 270, 800).on_tap("started"),
            SimScreen::new("started").element(&png("construction_help_button"), 270, 850).on_tap("city_busy"),
            SimScreen::new("city_busy"),
        ],
    )
}

/// Free builder whose upgrade hits a resource shortage. With `refill` the
/// autofill button tops resources up; without it the popup never closes.
pub fn construction_game(refill: bool) -> SimGame {
    let mut shortage = SimScreen::new("shortage")
        .element(&png("construction_resource_shortage"), 270, 400)
        .element(&png("construction_autofill"), 270, 600);
    if refill {
        shortage = shortage.on_tap("refilled");
    }
    let (hx, hy) = HQ_CENTRE;
    game(
        "city",
        [
            SimScreen::new("city").element(&png("construction_icon"), 60, 700).hotspot(hx, hy, "panel"),
            SimScreen::new("panel").element(&png("construction_upgrade_button"), 270, 800).on_tap("shortage"),
            shortage,
            SimScreen::new("refilled").element(&png("construction_upgrade_button"), 270, 800).on_tap("started"),
            SimScreen::new("started").element(&png("construction_help_button"), 270, 850).on_tap("city_busy"),
            SimScreen::new("city_busy"),
        ],
    )
}

/// One arena battle. Combat never shows a skip button or a result overlay;
/// the result screen is tapped through at its centre.
pub fn arena_game() -> SimGame {
    game(
        "city",
        [
            SimScreen::new("city").element(&png("arena_icon"), 100, 700).on_tap("lobby"),
            SimScreen::new("lobby").element(&png("arena_challenge_button"), 270, 800).on_tap("opponents"),
            SimScreen::new("opponents")
                .element(&png("arena_attack_button"), 450, 300)
                .element(&png("arena_attack_button"), 450, 700)
                .on_tap("prebattle"),
            SimScreen::new("prebattle").element(&png("arena_combat_button"), 270, 850).on_tap("combat"),
            SimScreen::new("combat").hotspot(270, 480, "lobby_again"),
            SimScreen::new("lobby_again").element(&png("arena_challenge_button"), 270, 800).on_back("city_done"),
            SimScreen::new("city_done").element(&png("arena_icon"), 100, 700),
        ],
    )
}

/// City screen where nothing any task looks for is visible.
pub fn empty_city() -> SimGame {
    game("city", [SimScreen::new("city")])
}

/// One instance on a simulated game, a virtual clock and an in-memory tracker.
pub struct Rig {
    pub config: Arc<Config>,
    pub game: SimGame,
    pub clock: ManualClock,
    pub store: MemoryStore,
    pub tracker: Arc<DailyTracker>,
    pub engine: Engine,
}

impl Rig {
    pub fn new(config: Config, game: SimGame) -> Result<Self, String> {
        let store = MemoryStore::new();
        let tracker = DailyTracker::open(
            Box::new(store.clone()),
            config.daily_tracking.reset_hour_local,
            config.daily_tracking.limits.clone(),
        )
        .map_err(|e| e.to_string())?;
        let clock = ManualClock::new();
        let tracker = Arc::new(tracker);
        let inst = config.instance(INSTANCE).ok_or("fixture config has no instance")?;
        let engine = build_engine(
            &config,
            inst,
            game.device(),
            Arc::new(clock.clone()),
            tracker.clone(),
            CancelToken::new(),
        )
        .map_err(|e| e.to_string())?;
        Ok(Self {
            config: Arc::new(config),
            game,
            clock,
            store,
            tracker,
            engine,
        })
    }

    pub fn run(&mut self, task: &str) -> Result<RunOutcome, String> {
        tasks::run_task(&mut self.engine, task, &self.config.tasks).ok_or_else(|| format!("unknown task {}", task))
    }

    pub fn record(&self, task: &str) -> TaskRecord {
        self.tracker.record(INSTANCE, task)
    }
}
