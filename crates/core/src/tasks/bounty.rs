//! Bounty missions: open the bounty board, send heroes to every mission a
//! Go button offers, and remember the missions whose heroes were busy so
//! they are not retried within the same run.

use std::time::Duration;

use crate::config::BountySettings;
use crate::driver::Action;
use crate::engine::{optional, required, Expect, KeyDecl, Next, Scene, StepSpec, Task, Transition};
use crate::types::{MatchResult, Point};

pub const ID: &str = "bounty_missions";

const ICON: &str = "bounty_icon";
const HEADER: &str = "bounty_menu_header";
const GO: &str = "bounty_go_button";
const QUICK_DEPLOY: &str = "bounty_quick_deploy";
const SEND: &str = "bounty_send_button";
const NO_MISSIONS: &str = "bounty_no_missions";
const HERO_BUSY: &str = "bounty_hero_busy";
const CLAIM: &str = "bounty_claim_button";

pub const KEYS: &[KeyDecl] = &[
    required(ICON),
    required(HEADER),
    required(GO),
    required(QUICK_DEPLOY),
    required(SEND),
    optional(NO_MISSIONS),
    optional(HERO_BUSY),
    optional(CLAIM),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BountyState {
    Idle,
    MissionList,
    Deploying,
    Dispatching,
    Closing,
}

pub const STATES: &[BountyState] = &[
    BountyState::Idle,
    BountyState::MissionList,
    BountyState::Deploying,
    BountyState::Dispatching,
    BountyState::Closing,
];

#[derive(Debug, Default)]
pub struct BountyMemo {
    pub sent: u32,
    /// Go buttons whose mission was rejected this run.
    pub failed: Vec<Point>,
    pub target: Option<Point>,
    pub send_tapped: bool,
}

impl BountyMemo {
    fn fail_target(&mut self) {
        if let Some(at) = self.target.take() {
            self.failed.push(at);
        }
        self.send_tapped = false;
    }
}

pub struct BountyMissions {
    max_missions: u32,
    failed_radius: f64,
    hero_busy_after: Duration,
    settle: Duration,
}

impl BountyMissions {
    pub fn from_settings(s: &BountySettings) -> Self {
        Self {
            max_missions: s.max_missions,
            failed_radius: s.failed_radius_px,
            hero_busy_after: Duration::from_millis(s.hero_busy_after_ms),
            settle: Duration::from_millis(s.settle_ms),
        }
    }

    fn is_failed(&self, at: Point, failed: &[Point]) -> bool {
        failed.iter().any(|f| f.distance(at) <= self.failed_radius)
    }

    /// Best-ranked Go button not near a rejected mission.
    fn next_target<'a>(&self, scene: &'a Scene<'_>, memo: &BountyMemo) -> Option<&'a MatchResult> {
        scene.get(GO).matches().iter().find(|m| !self.is_failed(m.at, &memo.failed))
    }

    fn reject(&self, memo: &mut BountyMemo) -> Transition<BountyState> {
        memo.fail_target();
        Transition::act(Action::Back, Expect::Settles(self.settle), BountyState::MissionList)
    }

    fn finish(memo: &BountyMemo) -> Next<BountyState> {
        if memo.sent == 0 && !memo.failed.is_empty() {
            Next::Skip { reason: "every hero is busy".into(), cooldown: None }
        } else {
            Next::Complete
        }
    }
}

impl Task for BountyMissions {
    type State = BountyState;
    type Memo = BountyMemo;

    fn id(&self) -> &'static str {
        ID
    }

    fn templates(&self) -> &'static [KeyDecl] {
        KEYS
    }

    fn initial(&self) -> BountyState {
        BountyState::Idle
    }

    fn step(&self, state: BountyState) -> StepSpec {
        match state {
            BountyState::Idle => StepSpec::watch(&[HEADER, ICON]),
            BountyState::MissionList => StepSpec::watch(&[HEADER, CLAIM, NO_MISSIONS, GO]),
            BountyState::Deploying => StepSpec::watch(&[HERO_BUSY, QUICK_DEPLOY]),
            BountyState::Dispatching => StepSpec::watch(&[HERO_BUSY, SEND]),
            BountyState::Closing => StepSpec::watch(&[HEADER]),
        }
    }

    fn transition(&self, state: BountyState, scene: &Scene<'_>, memo: &mut BountyMemo) -> Transition<BountyState> {
        match state {
            BountyState::Idle => {
                if scene.found(HEADER) {
                    Transition::to(BountyState::MissionList)
                } else if memo.sent >= self.max_missions {
                    Transition::complete()
                } else if let Some(icon) = scene.best(ICON) {
                    Transition::act(Action::TapMatch(icon.clone()), Expect::Appears(vec![HEADER]), BountyState::MissionList)
                } else if scene.gone(ICON) {
                    if memo.sent > 0 {
                        Transition::complete()
                    } else {
                        Transition::skip("bounty icon not on screen")
                    }
                } else {
                    Transition::Wait
                }
            }
            BountyState::MissionList => {
                if memo.sent >= self.max_missions || scene.found(NO_MISSIONS) {
                    return Transition::to(BountyState::Closing);
                }
                if let Some(claim) = scene.best(CLAIM) {
                    return Transition::act(
                        Action::TapMatch(claim.clone()),
                        Expect::Settles(self.settle),
                        BountyState::MissionList,
                    );
                }
                if let Some(go) = self.next_target(scene, memo) {
                    memo.target = Some(go.at);
                    memo.send_tapped = false;
                    return Transition::act(
                        Action::TapMatch(go.clone()),
                        Expect::Appears(vec![QUICK_DEPLOY]),
                        BountyState::Deploying,
                    );
                }
                if scene.found(GO) {
                    // Only rejected missions left.
                    return Transition::to(BountyState::Closing);
                }
                if scene.gone(HEADER) {
                    // The game closed the board, typically after a dispatch.
                    return Transition::to(BountyState::Idle);
                }
                if scene.found(HEADER) && scene.gone(GO) {
                    // Without the optional label, Go buttons running out means the board is empty.
                    return Transition::to(BountyState::Closing);
                }
                Transition::Wait
            }
            BountyState::Deploying => {
                if scene.found(HERO_BUSY) {
                    return self.reject(memo);
                }
                match scene.best(QUICK_DEPLOY) {
                    Some(deploy) => Transition::act(
                        Action::TapMatch(deploy.clone()),
                        Expect::Appears(vec![SEND]),
                        BountyState::Dispatching,
                    ),
                    None => Transition::Wait,
                }
            }
            BountyState::Dispatching => {
                if scene.found(HERO_BUSY) {
                    return self.reject(memo);
                }
                match (scene.best(SEND), memo.send_tapped) {
                    (Some(send), false) => {
                        memo.send_tapped = true;
                        Transition::act(Action::TapMatch(send.clone()), Expect::Settles(self.settle), BountyState::Dispatching)
                    }
                    // Send panel still up long after the tap: the hero cannot march.
                    (Some(_), true) if scene.elapsed >= self.hero_busy_after => self.reject(memo),
                    // Only a panel missing for the full absence threshold counts as a dispatch.
                    (None, true) if scene.gone(SEND) => {
                        memo.sent += 1;
                        memo.target = None;
                        memo.send_tapped = false;
                        Transition::to(BountyState::MissionList).with_credit(1)
                    }
                    _ => Transition::Wait,
                }
            }
            BountyState::Closing => {
                let end = Self::finish(memo);
                if scene.found(HEADER) {
                    Transition::act_then(Action::Back, Expect::Vanishes(HEADER), end)
                } else {
                    Transition::Go { to: end, credit: 0 }
                }
            }
        }
    }
}
