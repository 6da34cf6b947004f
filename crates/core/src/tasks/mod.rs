//! The registered task catalogue.
//!
//! Each module defines one [`Task`](crate::engine::Task) state table plus its identifier. The
//! registry here is what configuration validation and the orchestrator use
//! to look tasks up by name.

pub mod arena;
pub mod bounty;
pub mod construction;
pub mod radar;

use crate::config::{TaskCommon, TaskSettings};
use crate::engine::{Engine, KeyDecl, RunOutcome};

pub use arena::DailyArena;
pub use bounty::BountyMissions;
pub use construction::Construction;
pub use radar::RadarQuests;

/// Task ids a routine may name, in catalogue order.
pub const TASK_IDS: &[&str] = &[radar::ID, bounty::ID, arena::ID, construction::ID];

/// Template keys `task` relies on, or None for an unregistered id.
pub fn declared_templates(task: &str) -> Option<&'static [KeyDecl]> {
    match task {
        radar::ID => Some(radar::KEYS),
        bounty::ID => Some(bounty::KEYS),
        arena::ID => Some(arena::KEYS),
        construction::ID => Some(construction::KEYS),
        _ => None,
    }
}

/// Layout buttons `task` taps by name.
pub fn declared_buttons(task: &str) -> &'static [&'static str] {
    match task {
        construction::ID => construction::BUTTONS,
        _ => &[],
    }
}

/// Build `task` from its settings and drive it to completion on `engine`.
pub fn run_task(engine: &mut Engine, task: &str, settings: &TaskSettings) -> Option<RunOutcome> {
    let outcome = match task {
        radar::ID => {
            let s = &settings.radar_quests;
            engine.run(&RadarQuests::from_settings(s), &s.common)
        }
        bounty::ID => {
            let s = &settings.bounty_missions;
            engine.run(&BountyMissions::from_settings(s), &s.common)
        }
        arena::ID => {
            let s = &settings.daily_arena;
            engine.run(&DailyArena::from_settings(s), &s.common)
        }
        construction::ID => {
            let s = &settings.construction;
            let common = TaskCommon {
                retries: s.common.retries.or(Some(construction::DEFAULT_RETRIES)),
                ..s.common.clone()
            };
            engine.run(&Construction::from_settings(s), &common)
        }
        _ => return None,
    };
    Some(outcome)
}
