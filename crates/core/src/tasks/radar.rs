//! Radar quests: open the radar, claim every finished quest, tap Laura's
//! bonus once if she is around, close the menu.

use std::time::Duration;

use crate::config::RadarSettings;
use crate::driver::Action;
use crate::engine::{optional, required, Expect, KeyDecl, Next, Scene, StepSpec, Task, Transition};

pub const ID: &str = "radar_quests";

const ICON: &str = "radar_icon";
const HEADER: &str = "radar_menu_header";
const CLAIM: &str = "radar_claim_button";
const LAURA: &str = "radar_laura_button";
const REWARD: &str = "radar_reward_overlay";

pub const KEYS: &[KeyDecl] = &[
    required(ICON),
    required(HEADER),
    required(CLAIM),
    optional(LAURA),
    optional(REWARD),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RadarState {
    Idle,
    Claiming,
    Closing,
}

pub const STATES: &[RadarState] = &[RadarState::Idle, RadarState::Claiming, RadarState::Closing];

#[derive(Debug, Default)]
pub struct RadarMemo {
    pub claims: u32,
    pub laura_tapped: bool,
}

pub struct RadarQuests {
    /// Pause after a claim when the reward overlay cannot be observed.
    settle: Duration,
    max_claims: u32,
}

impl RadarQuests {
    pub fn from_settings(s: &RadarSettings) -> Self {
        Self {
            settle: Duration::from_millis(s.settle_ms),
            max_claims: s.max_claims,
        }
    }

    fn claim_expectation(&self, scene: &Scene<'_>) -> Expect {
        if scene.is_enabled(REWARD) {
            Expect::Appears(vec![REWARD])
        } else {
            Expect::Settles(self.settle)
        }
    }
}

impl Task for RadarQuests {
    type State = RadarState;
    type Memo = RadarMemo;

    fn id(&self) -> &'static str {
        ID
    }

    fn templates(&self) -> &'static [KeyDecl] {
        KEYS
    }

    fn initial(&self) -> RadarState {
        RadarState::Idle
    }

    fn step(&self, state: RadarState) -> StepSpec {
        match state {
            RadarState::Idle => StepSpec::watch(&[HEADER, ICON]),
            RadarState::Claiming => StepSpec::watch(&[REWARD, CLAIM, LAURA, HEADER]),
            RadarState::Closing => StepSpec::watch(&[HEADER]),
        }
    }

    fn transition(&self, state: RadarState, scene: &Scene<'_>, memo: &mut RadarMemo) -> Transition<RadarState> {
        match state {
            RadarState::Idle => {
                if scene.found(HEADER) {
                    Transition::to(RadarState::Claiming)
                } else if let Some(icon) = scene.best(ICON) {
                    Transition::act(Action::TapMatch(icon.clone()), Expect::Appears(vec![HEADER]), RadarState::Claiming)
                } else if scene.gone(ICON) {
                    Transition::skip("radar icon not on screen")
                } else {
                    Transition::Wait
                }
            }
            RadarState::Claiming => {
                // A reward overlay not handled by the global guard is closed here.
                if scene.found(REWARD) {
                    return Transition::act(Action::Back, Expect::Vanishes(REWARD), RadarState::Claiming);
                }
                if memo.claims >= self.max_claims {
                    return Transition::to(RadarState::Closing);
                }
                if let Some(claim) = scene.best(CLAIM) {
                    memo.claims += 1;
                    return Transition::act(
                        Action::TapMatch(claim.clone()),
                        self.claim_expectation(scene),
                        RadarState::Claiming,
                    );
                }
                if !memo.laura_tapped {
                    if let Some(laura) = scene.best(LAURA) {
                        memo.laura_tapped = true;
                        return Transition::act(
                            Action::TapMatch(laura.clone()),
                            Expect::Settles(self.settle),
                            RadarState::Claiming,
                        );
                    }
                }
                if scene.gone(CLAIM) {
                    Transition::to(RadarState::Closing)
                } else {
                    Transition::Wait
                }
            }
            RadarState::Closing => {
                let done = if memo.claims > 0 || memo.laura_tapped { 1 } else { 0 };
                if scene.found(HEADER) {
                    Transition::act_then(Action::Back, Expect::Vanishes(HEADER), Next::Complete).with_credit(done)
                } else {
                    Transition::complete().with_credit(done)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::testing::SceneKit;

    fn task() -> RadarQuests {
        RadarQuests::from_settings(&RadarSettings::default())
    }

    #[test]
    fn icon_tap_expects_menu_header() {
        let mut kit = SceneKit::new(KEYS, &[]);
        kit.show(ICON, 480, 820);
        let t = task().transition(RadarState::Idle, &kit.scene(), &mut RadarMemo::default());
        match t {
            Transition::Act { action: Action::TapMatch(m), expect, then, .. } => {
                assert_eq!(m.key, ICON);
                assert_eq!(expect, Expect::Appears(vec![HEADER]));
                assert_eq!(then, Next::State(RadarState::Claiming));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn missing_icon_skips_only_after_threshold() {
        let mut kit = SceneKit::new(KEYS, &[]);
        kit.missed(ICON, 2);
        assert_eq!(task().transition(RadarState::Idle, &kit.scene(), &mut RadarMemo::default()), Transition::Wait);
        kit.missed(ICON, 3);
        assert!(matches!(
            task().transition(RadarState::Idle, &kit.scene(), &mut RadarMemo::default()),
            Transition::Go { to: Next::Skip { .. }, credit: 0 }
        ));
    }

    #[test]
    fn claim_falls_back_to_settle_when_overlay_disabled() {
        let mut kit = SceneKit::new(KEYS, &[REWARD]);
        kit.show(CLAIM, 270, 400);
        let mut memo = RadarMemo::default();
        match task().transition(RadarState::Claiming, &kit.scene(), &mut memo) {
            Transition::Act { expect, .. } => assert_eq!(expect, Expect::Settles(Duration::from_millis(1500))),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(memo.claims, 1);
    }

    #[test]
    fn laura_is_tapped_once() {
        let mut kit = SceneKit::new(KEYS, &[]);
        kit.show(LAURA, 100, 300);
        let mut memo = RadarMemo::default();
        assert!(matches!(
            task().transition(RadarState::Claiming, &kit.scene(), &mut memo),
            Transition::Act { action: Action::TapMatch(_), .. }
        ));
        assert!(memo.laura_tapped);
        assert_eq!(task().transition(RadarState::Claiming, &kit.scene(), &mut memo), Transition::Wait);
    }

    #[test]
    fn closing_credits_only_productive_runs() {
        let mut kit = SceneKit::new(KEYS, &[]);
        kit.show(HEADER, 270, 80);
        let t = task().transition(RadarState::Closing, &kit.scene(), &mut RadarMemo::default());
        assert!(matches!(t, Transition::Act { action: Action::Back, credit: 0, .. }));

        let mut memo = RadarMemo { claims: 2, laura_tapped: false };
        kit.hide(HEADER);
        assert_eq!(
            task().transition(RadarState::Closing, &kit.scene(), &mut memo),
            Transition::Go { to: Next::Complete, credit: 1 }
        );
    }

    #[test]
    fn claim_cap_moves_to_closing() {
        let mut kit = SceneKit::new(KEYS, &[]);
        kit.show(CLAIM, 270, 400);
        let mut memo = RadarMemo { claims: 20, laura_tapped: true };
        assert_eq!(
            task().transition(RadarState::Claiming, &kit.scene(), &mut memo),
            Transition::to(RadarState::Closing)
        );
    }
}
