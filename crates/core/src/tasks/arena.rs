//! Daily arena: enter the arena, pick the bottom-most opponent, fight,
//! skip or sit out the combat animation, dismiss the results and leave.

use std::time::Duration;

use crate::config::ArenaSettings;
use crate::driver::Action;
use crate::engine::{optional, required, Expect, KeyDecl, Next, Scene, StepSpec, Task, Transition};
use crate::types::Point;

pub const ID: &str = "daily_arena";

const ICON: &str = "arena_icon";
const CHALLENGE: &str = "arena_challenge_button";
const ATTACK: &str = "arena_attack_button";
const COMBAT: &str = "arena_combat_button";
const MODE: &str = "arena_mode_button";
const SKIP: &str = "arena_skip_button";
const RESULT: &str = "arena_result_overlay";

pub const KEYS: &[KeyDecl] = &[
    required(ICON),
    required(CHALLENGE),
    required(ATTACK),
    required(COMBAT),
    optional(MODE),
    optional(SKIP),
    optional(RESULT),
];

const SCROLL_DURATION: Duration = Duration::from_millis(400);
const SCROLL_SETTLE: Duration = Duration::from_millis(800);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArenaState {
    Idle,
    Lobby,
    OpponentList,
    Prebattle,
    Combat,
    Results,
    Leaving,
}

pub const STATES: &[ArenaState] = &[
    ArenaState::Idle,
    ArenaState::Lobby,
    ArenaState::OpponentList,
    ArenaState::Prebattle,
    ArenaState::Combat,
    ArenaState::Results,
    ArenaState::Leaving,
];

#[derive(Debug, Default)]
pub struct ArenaMemo {
    pub battles: u32,
    pub scrolls: u32,
    pub mode_tapped: bool,
    pub skip_tapped: bool,
    pub no_opponent: bool,
}

pub struct DailyArena {
    battles_per_run: u32,
    /// Combat length assumed when no skip button can be seen.
    combat_fallback: Duration,
    scroll_attempts: u32,
}

/// Keys from `keys` the active layout can actually observe.
fn observable(scene: &Scene<'_>, keys: &[&'static str]) -> Vec<&'static str> {
    keys.iter().copied().filter(|k| scene.is_enabled(k)).collect()
}

/// Absent for long enough, or never observable on this layout.
fn absent(scene: &Scene<'_>, key: &str) -> bool {
    if scene.is_enabled(key) {
        scene.gone(key)
    } else {
        scene.polls >= scene.absence_polls
    }
}

impl DailyArena {
    pub fn from_settings(s: &ArenaSettings) -> Self {
        Self {
            battles_per_run: s.battles_per_run.max(1),
            combat_fallback: Duration::from_secs(s.combat_fallback_secs),
            scroll_attempts: s.scroll_attempts,
        }
    }

    fn scroll(scene: &Scene<'_>) -> Action {
        let snap = scene.snapshot();
        let x = (snap.width / 2) as i32;
        Action::Swipe {
            from: Point::new(x, (snap.height as f64 * 0.7) as i32),
            to: Point::new(x, (snap.height as f64 * 0.3) as i32),
            duration: SCROLL_DURATION,
        }
    }

    fn finish(memo: &ArenaMemo) -> Next<ArenaState> {
        if memo.battles == 0 && memo.no_opponent {
            Next::Skip { reason: "no opponent available".into(), cooldown: None }
        } else {
            Next::Complete
        }
    }
}

impl Task for DailyArena {
    type State = ArenaState;
    type Memo = ArenaMemo;

    fn id(&self) -> &'static str {
        ID
    }

    fn templates(&self) -> &'static [KeyDecl] {
        KEYS
    }

    fn initial(&self) -> ArenaState {
        ArenaState::Idle
    }

    fn step(&self, state: ArenaState) -> StepSpec {
        match state {
            ArenaState::Idle => StepSpec::watch(&[CHALLENGE, MODE, ICON]),
            ArenaState::Lobby => StepSpec::watch(&[ATTACK, MODE, CHALLENGE]),
            ArenaState::OpponentList => StepSpec::watch(&[ATTACK]),
            ArenaState::Prebattle => StepSpec::watch(&[COMBAT]),
            // The fallback wait has to fit inside the step.
            ArenaState::Combat => StepSpec::watch(&[RESULT, SKIP, CHALLENGE]).with_timeout(self.combat_fallback * 2),
            ArenaState::Results => StepSpec::watch(&[CHALLENGE, RESULT]),
            ArenaState::Leaving => StepSpec::watch(&[CHALLENGE]),
        }
    }

    fn transition(&self, state: ArenaState, scene: &Scene<'_>, memo: &mut ArenaMemo) -> Transition<ArenaState> {
        match state {
            ArenaState::Idle => {
                if scene.found(CHALLENGE) || scene.found(MODE) {
                    Transition::to(ArenaState::Lobby)
                } else if let Some(icon) = scene.best(ICON) {
                    Transition::act(
                        Action::TapMatch(icon.clone()),
                        Expect::Appears(observable(scene, &[MODE, CHALLENGE])),
                        ArenaState::Lobby,
                    )
                } else if scene.gone(ICON) {
                    Transition::skip("arena icon not on screen")
                } else {
                    Transition::Wait
                }
            }
            ArenaState::Lobby => {
                if memo.battles >= self.battles_per_run {
                    return Transition::to(ArenaState::Leaving);
                }
                if scene.found(ATTACK) {
                    return Transition::to(ArenaState::OpponentList);
                }
                if !memo.mode_tapped {
                    if let Some(mode) = scene.best(MODE) {
                        memo.mode_tapped = true;
                        return Transition::act(
                            Action::TapMatch(mode.clone()),
                            Expect::Appears(vec![CHALLENGE]),
                            ArenaState::Lobby,
                        );
                    }
                }
                match scene.best(CHALLENGE) {
                    Some(challenge) => Transition::act(
                        Action::TapMatch(challenge.clone()),
                        Expect::Appears(vec![ATTACK]),
                        ArenaState::OpponentList,
                    ),
                    None => Transition::Wait,
                }
            }
            ArenaState::OpponentList => {
                if let Some(attack) = scene.bottom_most(ATTACK) {
                    return Transition::act(
                        Action::TapMatch(attack.clone()),
                        Expect::Appears(vec![COMBAT]),
                        ArenaState::Prebattle,
                    );
                }
                if !scene.gone(ATTACK) {
                    return Transition::Wait;
                }
                if memo.scrolls < self.scroll_attempts {
                    memo.scrolls += 1;
                    return Transition::act(Self::scroll(scene), Expect::Settles(SCROLL_SETTLE), ArenaState::OpponentList);
                }
                memo.no_opponent = true;
                Transition::to(ArenaState::Leaving)
            }
            ArenaState::Prebattle => match scene.best(COMBAT) {
                Some(combat) => {
                    memo.skip_tapped = false;
                    Transition::act(Action::TapMatch(combat.clone()), Expect::Vanishes(COMBAT), ArenaState::Combat)
                }
                None => Transition::Wait,
            },
            ArenaState::Combat => {
                if scene.found(RESULT) || scene.found(CHALLENGE) {
                    return Transition::to(ArenaState::Results);
                }
                if !memo.skip_tapped {
                    if let Some(skip) = scene.best(SKIP) {
                        memo.skip_tapped = true;
                        return Transition::act(Action::TapMatch(skip.clone()), Expect::Vanishes(SKIP), ArenaState::Combat);
                    }
                }
                if (!scene.is_enabled(SKIP) || memo.skip_tapped || scene.gone(SKIP)) && scene.elapsed >= self.combat_fallback {
                    return Transition::to(ArenaState::Results);
                }
                Transition::Wait
            }
            ArenaState::Results => {
                if scene.found(CHALLENGE) {
                    memo.battles += 1;
                    return Transition::to(ArenaState::Lobby).with_credit(1);
                }
                if let Some(result) = scene.best(RESULT) {
                    return Transition::act(
                        Action::TapMatch(result.clone()),
                        Expect::Appears(vec![CHALLENGE]),
                        ArenaState::Results,
                    );
                }
                if absent(scene, RESULT) {
                    // Result screen without a usable template: tap through it.
                    let snap = scene.snapshot();
                    let centre = Point::new((snap.width / 2) as i32, (snap.height / 2) as i32);
                    return Transition::act(Action::TapPoint(centre), Expect::Appears(vec![CHALLENGE]), ArenaState::Results);
                }
                Transition::Wait
            }
            ArenaState::Leaving => {
                let end = Self::finish(memo);
                if scene.found(CHALLENGE) {
                    Transition::act_then(Action::Back, Expect::Vanishes(CHALLENGE), end)
                } else {
                    Transition::Go { to: end, credit: 0 }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::testing::SceneKit;

    fn task() -> DailyArena {
        DailyArena::from_settings(&ArenaSettings::default())
    }

    #[test]
    fn attacks_bottom_most_opponent() {
        let mut kit = SceneKit::new(KEYS, &[]);
        kit.show(ATTACK, 450, 300).show(ATTACK, 450, 700).show(ATTACK, 450, 500);
        match task().transition(ArenaState::OpponentList, &kit.scene(), &mut ArenaMemo::default()) {
            Transition::Act { action: Action::TapMatch(m), .. } => assert_eq!(m.at, Point::new(450, 700)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_list_scrolls_once_then_leaves() {
        let mut kit = SceneKit::new(KEYS, &[]);
        kit.missed(ATTACK, 3);
        let mut memo = ArenaMemo::default();
        assert!(matches!(
            task().transition(ArenaState::OpponentList, &kit.scene(), &mut memo),
            Transition::Act { action: Action::Swipe { .. }, .. }
        ));
        assert_eq!(
            task().transition(ArenaState::OpponentList, &kit.scene(), &mut memo),
            Transition::to(ArenaState::Leaving)
        );
        assert!(matches!(
            task().transition(ArenaState::Leaving, &kit.scene(), &mut memo),
            Transition::Go { to: Next::Skip { .. }, .. }
        ));
    }

    #[test]
    fn disabled_skip_waits_out_combat() {
        let mut kit = SceneKit::new(KEYS, &[SKIP, RESULT]);
        let mut memo = ArenaMemo::default();
        kit.after(Duration::from_secs(30));
        assert_eq!(task().transition(ArenaState::Combat, &kit.scene(), &mut memo), Transition::Wait);
        kit.after(Duration::from_secs(45));
        assert_eq!(
            task().transition(ArenaState::Combat, &kit.scene(), &mut memo),
            Transition::to(ArenaState::Results)
        );
        assert_eq!(task().step(ArenaState::Combat).timeout, Some(Duration::from_secs(90)));
    }

    #[test]
    fn skip_is_tapped_when_visible() {
        let mut kit = SceneKit::new(KEYS, &[]);
        kit.show(SKIP, 500, 60);
        let mut memo = ArenaMemo::default();
        assert!(matches!(
            task().transition(ArenaState::Combat, &kit.scene(), &mut memo),
            Transition::Act { expect: Expect::Vanishes(SKIP), .. }
        ));
        assert!(memo.skip_tapped);
    }

    #[test]
    fn return_to_lobby_credits_battle() {
        let mut kit = SceneKit::new(KEYS, &[]);
        kit.show(CHALLENGE, 270, 800);
        let mut memo = ArenaMemo::default();
        assert_eq!(
            task().transition(ArenaState::Results, &kit.scene(), &mut memo),
            Transition::Go { to: Next::State(ArenaState::Lobby), credit: 1 }
        );
        assert_eq!(
            task().transition(ArenaState::Lobby, &kit.scene(), &mut memo),
            Transition::to(ArenaState::Leaving)
        );
    }

    #[test]
    fn mode_button_comes_before_challenge() {
        let mut kit = SceneKit::new(KEYS, &[]);
        kit.show(MODE, 270, 600).show(CHALLENGE, 270, 800);
        let mut memo = ArenaMemo::default();
        match task().transition(ArenaState::Lobby, &kit.scene(), &mut memo) {
            Transition::Act { action: Action::TapMatch(m), .. } => assert_eq!(m.key, MODE),
            other => panic!("unexpected {other:?}"),
        }
        match task().transition(ArenaState::Lobby, &kit.scene(), &mut memo) {
            Transition::Act { action: Action::TapMatch(m), .. } => assert_eq!(m.key, CHALLENGE),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn icon_tap_only_expects_observable_keys() {
        let mut kit = SceneKit::new(KEYS, &[MODE]);
        kit.show(ICON, 60, 400);
        match task().transition(ArenaState::Idle, &kit.scene(), &mut ArenaMemo::default()) {
            Transition::Act { expect, .. } => assert_eq!(expect, Expect::Appears(vec![CHALLENGE])),
            other => panic!("unexpected {other:?}"),
        }
    }
}
