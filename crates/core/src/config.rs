//! YAML configuration: layouts, instances, routines, task and engine settings.
//!
//! Everything is checked once in [`Config::load`]; any problem is a
//! [`ConfigError`] and the process refuses to start.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::layout::{Layout, RawLayout};
use crate::tasks;

#[derive(Debug, Clone, Deserialize)]
pub struct InstanceConfig {
    pub name: String,
    /// Falls back to `default_layout`.
    #[serde(default)]
    pub layout: Option<String>,
    pub routine: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Failed attempts tolerated per step before the run aborts.
    pub max_retries: u32,
    pub backoff_ms: u64,
    pub backoff_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_retries: 2, backoff_ms: 1000, backoff_factor: 2.0 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub poll_interval_ms: u64,
    pub min_confidence: f32,
    /// Consecutive polls without a button before absence is trusted.
    pub absence_polls: u32,
    pub step_timeout_secs: u64,
    pub confirm_timeout_secs: u64,
    pub max_run_secs: u64,
    pub max_overlay_dismissals: u32,
    pub retry: RetryConfig,
    pub routine_interval_secs: u64,
    pub debug_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 500,
            min_confidence: 0.85,
            absence_polls: 3,
            step_timeout_secs: 20,
            confirm_timeout_secs: 5,
            max_run_secs: 600,
            max_overlay_dismissals: 3,
            retry: RetryConfig::default(),
            routine_interval_secs: 300,
            debug_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    pub fn confirm_timeout(&self) -> Duration {
        Duration::from_secs(self.confirm_timeout_secs)
    }

    pub fn max_run(&self) -> Duration {
        Duration::from_secs(self.max_run_secs)
    }
}

/// How the overlay guard gets rid of a known popup.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dismiss {
    /// Android back key.
    Back,
    /// Tap the matched overlay template itself (e.g. a close cross).
    TapMatch,
    /// Tap a layout button region.
    Button(String),
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OverlayConfig {
    pub key: String,
    #[serde(default = "default_dismiss")]
    pub dismiss: Dismiss,
}

fn default_dismiss() -> Dismiss {
    Dismiss::Back
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    pub storage_path: PathBuf,
    pub reset_hour_local: u32,
    /// Daily cap per task id. Tasks not listed are never gated by count.
    pub limits: BTreeMap<String, u32>,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("state/daily_tasks.json"),
            reset_hour_local: 23,
            limits: BTreeMap::new(),
        }
    }
}

/// Overrides shared by every task.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TaskCommon {
    pub retries: Option<u32>,
    pub step_timeout_secs: Option<u64>,
    pub absence_polls: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RadarSettings {
    #[serde(flatten)]
    pub common: TaskCommon,
    /// Used when the reward overlay template is disabled.
    pub settle_ms: u64,
    pub max_claims: u32,
}

impl Default for RadarSettings {
    fn default() -> Self {
        Self { common: TaskCommon::default(), settle_ms: 1500, max_claims: 20 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BountySettings {
    #[serde(flatten)]
    pub common: TaskCommon,
    pub max_missions: u32,
    /// Go buttons this close to a rejected one are ignored for the run.
    pub failed_radius_px: f64,
    /// Deploy panel still open this long after send means the hero is busy.
    pub hero_busy_after_ms: u64,
    pub settle_ms: u64,
}

impl Default for BountySettings {
    fn default() -> Self {
        Self {
            common: TaskCommon::default(),
            max_missions: 4,
            failed_radius_px: 60.0,
            hero_busy_after_ms: 3000,
            settle_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArenaSettings {
    #[serde(flatten)]
    pub common: TaskCommon,
    pub battles_per_run: u32,
    /// Combat length assumed when the skip button is disabled or never shows.
    pub combat_fallback_secs: u64,
    pub scroll_attempts: u32,
}

impl Default for ArenaSettings {
    fn default() -> Self {
        Self {
            common: TaskCommon::default(),
            battles_per_run: 1,
            combat_fallback_secs: 45,
            scroll_attempts: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConstructionSettings {
    #[serde(flatten)]
    pub common: TaskCommon,
    /// Cooldown set on the tracker when no builder is free.
    pub recheck_minutes: u64,
    pub max_hops: u32,
    pub settle_ms: u64,
}

impl Default for ConstructionSettings {
    fn default() -> Self {
        Self {
            common: TaskCommon::default(),
            recheck_minutes: 30,
            max_hops: 2,
            settle_ms: 1500,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TaskSettings {
    pub radar_quests: RadarSettings,
    pub bounty_missions: BountySettings,
    pub daily_arena: ArenaSettings,
    pub construction: ConstructionSettings,
}

impl TaskSettings {
    pub fn common(&self, task: &str) -> Option<&TaskCommon> {
        match task {
            tasks::radar::ID => Some(&self.radar_quests.common),
            tasks::bounty::ID => Some(&self.bounty_missions.common),
            tasks::arena::ID => Some(&self.daily_arena.common),
            tasks::construction::ID => Some(&self.construction.common),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    #[serde(default)]
    default_layout: Option<String>,
    #[serde(default)]
    asset_root: Option<PathBuf>,
    layouts: BTreeMap<String, RawLayout>,
    #[serde(default)]
    instances: Vec<InstanceConfig>,
    #[serde(default)]
    routines: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    tasks: TaskSettings,
    #[serde(default)]
    engine: EngineConfig,
    #[serde(default)]
    overlays: Vec<OverlayConfig>,
    #[serde(default)]
    daily_tracking: TrackingConfig,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub default_layout: Option<String>,
    pub layouts: BTreeMap<String, Arc<Layout>>,
    pub instances: Vec<InstanceConfig>,
    pub routines: BTreeMap<String, Vec<String>>,
    pub tasks: TaskSettings,
    pub engine: EngineConfig,
    pub overlays: Vec<OverlayConfig>,
    pub daily_tracking: TrackingConfig,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let base = path.parent().unwrap_or_else(|| Path::new(""));
        Self::from_yaml(&text, base)
    }

    /// Parse and validate. Relative asset and tracker paths are taken from `base`.
    pub fn from_yaml(text: &str, base: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_yaml::from_str(text)?;
        let asset_root = base.join(raw.asset_root.unwrap_or_default());

        let mut layouts = BTreeMap::new();
        for (id, raw_layout) in &raw.layouts {
            layouts.insert(id.clone(), Arc::new(Layout::build(id, raw_layout, &asset_root)?));
        }

        let mut daily_tracking = raw.daily_tracking;
        if daily_tracking.storage_path.is_relative() {
            daily_tracking.storage_path = base.join(&daily_tracking.storage_path);
        }

        let config = Config {
            default_layout: raw.default_layout,
            layouts,
            instances: raw.instances,
            routines: raw.routines,
            tasks: raw.tasks,
            engine: raw.engine,
            overlays: raw.overlays,
            daily_tracking,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some(id) = &self.default_layout {
            if !self.layouts.contains_key(id) {
                return Err(ConfigError::UnknownLayout(id.clone()));
            }
        }
        let e = &self.engine;
        if !(0.0..=1.0).contains(&e.min_confidence) {
            return Err(ConfigError::InvalidSetting(format!(
                "engine.min_confidence {} outside 0..1",
                e.min_confidence
            )));
        }
        if e.poll_interval_ms == 0 || e.absence_polls == 0 || e.max_run_secs == 0 {
            return Err(ConfigError::InvalidSetting(
                "engine.poll_interval_ms, absence_polls and max_run_secs must be positive".into(),
            ));
        }
        if self.daily_tracking.reset_hour_local > 23 {
            return Err(ConfigError::InvalidSetting(format!(
                "daily_tracking.reset_hour_local {} outside 0..23",
                self.daily_tracking.reset_hour_local
            )));
        }
        for (task, limit) in &self.daily_tracking.limits {
            if !tasks::TASK_IDS.contains(&task.as_str()) {
                return Err(ConfigError::UnknownTask(task.clone()));
            }
            if *limit == 0 {
                return Err(ConfigError::InvalidSetting(format!("daily limit for '{}' must be at least 1", task)));
            }
        }

        for routine in self.routines.values() {
            for task in routine {
                if !tasks::TASK_IDS.contains(&task.as_str()) {
                    return Err(ConfigError::UnknownTask(task.clone()));
                }
            }
        }

        let mut seen = HashSet::new();
        for inst in &self.instances {
            if !seen.insert(inst.name.as_str()) {
                return Err(ConfigError::DuplicateInstance(inst.name.clone()));
            }
            let layout = self.layout_for(inst)?;
            let routine = self.routine_for(inst)?;
            for task in routine {
                check_task_keys(layout, task)?;
            }
            for overlay in &self.overlays {
                if !layout.has_template(&overlay.key) {
                    return Err(ConfigError::UnknownTemplate {
                        layout: layout.id.clone(),
                        key: overlay.key.clone(),
                    });
                }
                if let Dismiss::Button(button) = &overlay.dismiss {
                    if !layout.has_button(button) {
                        return Err(ConfigError::UnknownButton {
                            layout: layout.id.clone(),
                            key: button.clone(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    pub fn layout_for(&self, inst: &InstanceConfig) -> Result<&Arc<Layout>, ConfigError> {
        let id = inst
            .layout
            .as_ref()
            .or(self.default_layout.as_ref())
            .ok_or_else(|| ConfigError::InvalidSetting(format!("instance '{}' has no layout and no default_layout is set", inst.name)))?;
        self.layouts.get(id).ok_or_else(|| ConfigError::UnknownLayout(id.clone()))
    }

    pub fn routine_for(&self, inst: &InstanceConfig) -> Result<&[String], ConfigError> {
        self.routines
            .get(&inst.routine)
            .map(Vec::as_slice)
            .ok_or_else(|| ConfigError::UnknownRoutine(inst.routine.clone()))
    }

    pub fn instance(&self, name: &str) -> Option<&InstanceConfig> {
        self.instances.iter().find(|i| i.name == name)
    }

    pub fn daily_limit(&self, task: &str) -> Option<u32> {
        self.daily_tracking.limits.get(task).copied()
    }
}

/// Every key a task declares must exist in the layout; required keys must be enabled.
pub fn check_task_keys(layout: &Layout, task: &str) -> Result<(), ConfigError> {
    let decls = tasks::declared_templates(task).ok_or_else(|| ConfigError::UnknownTask(task.to_string()))?;
    for decl in decls {
        if !layout.has_template(decl.key) {
            return Err(ConfigError::MissingTaskTemplate {
                layout: layout.id.clone(),
                task: task.to_string(),
                key: decl.key.to_string(),
            });
        }
        if decl.required && !layout.is_enabled(decl.key) {
            return Err(ConfigError::RequiredTemplateDisabled {
                layout: layout.id.clone(),
                task: task.to_string(),
                key: decl.key.to_string(),
            });
        }
    }
    for button in tasks::declared_buttons(task) {
        if !layout.has_button(button) {
            return Err(ConfigError::UnknownButton { layout: layout.id.clone(), key: button.to_string() });
        }
    }
    Ok(())
}
