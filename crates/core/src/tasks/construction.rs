//! Construction: when a builder is free, open the headquarters panel and
//! start the next upgrade, following "go to requirement" links and topping
//! up resources on the way, then ask the alliance for help.

use std::time::Duration;

use crate::config::ConstructionSettings;
use crate::driver::Action;
use crate::engine::{optional, required, Expect, KeyDecl, Next, Scene, StepSpec, Task, Transition};

pub const ID: &str = "construction";

const ICON: &str = "construction_icon";
const UPGRADE: &str = "construction_upgrade_button";
const LOCKED: &str = "construction_upgrade_locked";
const GO: &str = "construction_go_button";
const SHORTAGE: &str = "construction_resource_shortage";
const AUTOFILL: &str = "construction_autofill";
const HELP: &str = "construction_help_button";
const HQ: &str = "construction_hq";

pub const KEYS: &[KeyDecl] = &[
    required(ICON),
    required(UPGRADE),
    optional(LOCKED),
    optional(GO),
    optional(SHORTAGE),
    optional(AUTOFILL),
    optional(HELP),
];

pub const BUTTONS: &[&str] = &[HQ];

/// Per-step retries when `tasks.construction.retries` is unset.
pub const DEFAULT_RETRIES: u32 = 1;

/// Upgrade taps per run, counting repeats of a tap the game swallowed.
const MAX_UPGRADE_TAPS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConstructionState {
    Idle,
    PanelOpen,
    UpgradeConfirmPending,
    ResourceShortagePopup,
    HelpRequest,
}

pub const STATES: &[ConstructionState] = &[
    ConstructionState::Idle,
    ConstructionState::PanelOpen,
    ConstructionState::UpgradeConfirmPending,
    ConstructionState::ResourceShortagePopup,
    ConstructionState::HelpRequest,
];

#[derive(Debug, Default)]
pub struct ConstructionMemo {
    /// Requirement links followed so far.
    pub hops: u32,
    /// Resources were topped up; the upgrade button needs another tap.
    pub refilled: bool,
    pub upgrade_taps: u32,
}

pub struct Construction {
    recheck: Duration,
    max_hops: u32,
    settle: Duration,
}

impl Construction {
    pub fn from_settings(s: &ConstructionSettings) -> Self {
        Self {
            recheck: Duration::from_secs(s.recheck_minutes * 60),
            max_hops: s.max_hops,
            settle: Duration::from_millis(s.settle_ms),
        }
    }

    fn panel_keys(scene: &Scene<'_>) -> Vec<&'static str> {
        [UPGRADE, LOCKED, GO].into_iter().filter(|k| scene.is_enabled(k)).collect()
    }
}

impl Task for Construction {
    type State = ConstructionState;
    type Memo = ConstructionMemo;

    fn id(&self) -> &'static str {
        ID
    }

    fn templates(&self) -> &'static [KeyDecl] {
        KEYS
    }

    fn buttons(&self) -> &'static [&'static str] {
        BUTTONS
    }

    fn initial(&self) -> ConstructionState {
        ConstructionState::Idle
    }

    fn step(&self, state: ConstructionState) -> StepSpec {
        match state {
            ConstructionState::Idle => StepSpec::watch(&[UPGRADE, ICON]),
            ConstructionState::PanelOpen => StepSpec::watch(&[UPGRADE, GO, LOCKED]),
            ConstructionState::UpgradeConfirmPending => StepSpec::watch(&[SHORTAGE, HELP, UPGRADE]),
            ConstructionState::ResourceShortagePopup => StepSpec::watch(&[SHORTAGE, AUTOFILL]),
            ConstructionState::HelpRequest => StepSpec::watch(&[HELP]),
        }
    }

    fn transition(
        &self,
        state: ConstructionState,
        scene: &Scene<'_>,
        memo: &mut ConstructionMemo,
    ) -> Transition<ConstructionState> {
        use ConstructionState::*;

        match state {
            Idle => {
                if scene.found(UPGRADE) {
                    Transition::to(PanelOpen)
                } else if scene.found(ICON) {
                    Transition::act(
                        Action::TapButton(HQ.to_string()),
                        Expect::Appears(Self::panel_keys(scene)),
                        PanelOpen,
                    )
                } else if scene.gone(ICON) {
                    Transition::skip_for("no free builder", self.recheck)
                } else {
                    Transition::Wait
                }
            }
            PanelOpen => {
                if let Some(upgrade) = scene.best(UPGRADE) {
                    memo.upgrade_taps += 1;
                    return Transition::act(Action::TapMatch(upgrade.clone()), Expect::Settles(self.settle), UpgradeConfirmPending);
                }
                if let Some(go) = scene.best(GO) {
                    if memo.hops >= self.max_hops {
                        return Transition::skip_for("requirement chain too deep", self.recheck);
                    }
                    memo.hops += 1;
                    return Transition::act(Action::TapMatch(go.clone()), Expect::Appears(vec![UPGRADE]), PanelOpen);
                }
                if scene.found(LOCKED) {
                    return Transition::skip_for("upgrade locked by requirements", self.recheck);
                }
                Transition::Wait
            }
            UpgradeConfirmPending => {
                if scene.found(SHORTAGE) {
                    return Transition::to(ResourceShortagePopup);
                }
                if let Some(upgrade) = scene.best(UPGRADE) {
                    // After a refill, or when the panel ignored the last tap for a full settle.
                    let lost = scene.elapsed >= self.settle && memo.upgrade_taps < MAX_UPGRADE_TAPS;
                    if memo.refilled || lost {
                        memo.refilled = false;
                        memo.upgrade_taps += 1;
                        return Transition::act(
                            Action::TapMatch(upgrade.clone()),
                            Expect::Settles(self.settle),
                            UpgradeConfirmPending,
                        );
                    }
                }
                // The panel closing is the only sign the upgrade started.
                if scene.found(HELP) || scene.gone(UPGRADE) {
                    return Transition::to(HelpRequest).with_credit(1);
                }
                Transition::Wait
            }
            ResourceShortagePopup => {
                if let Some(autofill) = scene.best(AUTOFILL) {
                    memo.refilled = true;
                    return Transition::act(Action::TapMatch(autofill.clone()), Expect::Vanishes(SHORTAGE), UpgradeConfirmPending);
                }
                if scene.gone(SHORTAGE) {
                    return Transition::to(UpgradeConfirmPending);
                }
                if !scene.is_enabled(AUTOFILL) || scene.gone(AUTOFILL) {
                    return Transition::act_then(
                        Action::Back,
                        Expect::Vanishes(SHORTAGE),
                        Next::Skip {
                            reason: "not enough resources".into(),
                            cooldown: Some(self.recheck),
                        },
                    );
                }
                Transition::Wait
            }
            HelpRequest => match scene.best(HELP) {
                Some(help) => {
                    Transition::act_then(Action::TapMatch(help.clone()), Expect::Settles(self.settle), Next::Complete)
                }
                None => Transition::complete(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::testing::SceneKit;

    fn task() -> Construction {
        Construction::from_settings(&ConstructionSettings::default())
    }

    #[test]
    fn no_free_builder_sets_cooldown() {
        let mut kit = SceneKit::new(KEYS, &[]);
        kit.missed(ICON, 3);
        assert_eq!(
            task().transition(ConstructionState::Idle, &kit.scene(), &mut ConstructionMemo::default()),
            Transition::skip_for("no free builder", Duration::from_secs(30 * 60))
        );
    }

    #[test]
    fn icon_opens_headquarters_by_button() {
        let mut kit = SceneKit::new(KEYS, &[GO]);
        kit.show(ICON, 60, 700);
        match task().transition(ConstructionState::Idle, &kit.scene(), &mut ConstructionMemo::default()) {
            Transition::Act { action, expect, then, .. } => {
                assert_eq!(action, Action::TapButton(HQ.into()));
                assert_eq!(expect, Expect::Appears(vec![UPGRADE, LOCKED]));
                assert_eq!(then, Next::State(ConstructionState::PanelOpen));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn requirement_hops_are_bounded() {
        let mut kit = SceneKit::new(KEYS, &[]);
        kit.show(GO, 400, 500);
        let mut memo = ConstructionMemo::default();
        for _ in 0..2 {
            assert!(matches!(
                task().transition(ConstructionState::PanelOpen, &kit.scene(), &mut memo),
                Transition::Act { action: Action::TapMatch(_), .. }
            ));
        }
        assert!(matches!(
            task().transition(ConstructionState::PanelOpen, &kit.scene(), &mut memo),
            Transition::Go { to: Next::Skip { cooldown: Some(_), .. }, .. }
        ));
    }

    #[test]
    fn shortage_autofill_confirms_popup_closed() {
        let mut kit = SceneKit::new(KEYS, &[]);
        kit.show(SHORTAGE, 270, 480).show(AUTOFILL, 270, 620);
        let mut memo = ConstructionMemo::default();
        assert_eq!(
            task().transition(ConstructionState::UpgradeConfirmPending, &kit.scene(), &mut memo),
            Transition::to(ConstructionState::ResourceShortagePopup)
        );
        match task().transition(ConstructionState::ResourceShortagePopup, &kit.scene(), &mut memo) {
            Transition::Act { expect, then, .. } => {
                assert_eq!(expect, Expect::Vanishes(SHORTAGE));
                assert_eq!(then, Next::State(ConstructionState::UpgradeConfirmPending));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(memo.refilled);
    }

    #[test]
    fn refilled_upgrade_is_tapped_again_then_credited() {
        let mut kit = SceneKit::new(KEYS, &[]);
        kit.show(UPGRADE, 400, 850);
        let mut memo = ConstructionMemo { refilled: true, ..Default::default() };
        assert!(matches!(
            task().transition(ConstructionState::UpgradeConfirmPending, &kit.scene(), &mut memo),
            Transition::Act { action: Action::TapMatch(_), .. }
        ));
        kit.missed(UPGRADE, 3);
        assert_eq!(
            task().transition(ConstructionState::UpgradeConfirmPending, &kit.scene(), &mut memo),
            Transition::Go { to: Next::State(ConstructionState::HelpRequest), credit: 1 }
        );
    }

    #[test]
    fn ignored_upgrade_tap_is_repeated_after_settle() {
        let mut kit = SceneKit::new(KEYS, &[]);
        kit.show(UPGRADE, 400, 850);
        let mut memo = ConstructionMemo { upgrade_taps: 1, ..Default::default() };
        assert_eq!(
            task().transition(ConstructionState::UpgradeConfirmPending, &kit.scene(), &mut memo),
            Transition::Wait
        );
        kit.after(Duration::from_millis(1500));
        assert!(matches!(
            task().transition(ConstructionState::UpgradeConfirmPending, &kit.scene(), &mut memo),
            Transition::Act { action: Action::TapMatch(_), .. }
        ));
        assert_eq!(memo.upgrade_taps, 2);
        memo.upgrade_taps = MAX_UPGRADE_TAPS;
        assert_eq!(
            task().transition(ConstructionState::UpgradeConfirmPending, &kit.scene(), &mut memo),
            Transition::Wait
        );
    }

    #[test]
    fn shortage_without_autofill_backs_out_with_cooldown() {
        let mut kit = SceneKit::new(KEYS, &[AUTOFILL]);
        kit.show(SHORTAGE, 270, 480);
        assert!(matches!(
            task().transition(ConstructionState::ResourceShortagePopup, &kit.scene(), &mut ConstructionMemo::default()),
            Transition::Act { action: Action::Back, then: Next::Skip { cooldown: Some(_), .. }, .. }
        ));
    }
}
