use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::StepFailure;
use crate::layout::Layout;
use crate::logger;
use crate::platform::InputDevice;
use crate::types::{MatchResult, Point, ScreenSnapshot};

/// A side effect a task asks the engine to perform.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    TapMatch(MatchResult),
    TapPoint(Point),
    /// Centre of a layout button region, scaled to the current screen.
    TapButton(String),
    Swipe { from: Point, to: Point, duration: Duration },
    Back,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::TapMatch(m) => write!(f, "tap {} @({},{})", m.key, m.at.x, m.at.y),
            Action::TapPoint(p) => write!(f, "tap ({},{})", p.x, p.y),
            Action::TapButton(key) => write!(f, "tap button {}", key),
            Action::Swipe { from, to, .. } => {
                write!(f, "swipe ({},{})->({},{})", from.x, from.y, to.x, to.y)
            }
            Action::Back => write!(f, "back"),
        }
    }
}

/// Input side of one emulator. Every call holds the device lock, so two
/// callers can never interleave gestures on the same screen.
#[derive(Clone)]
pub struct ActionDriver {
    input: Arc<Mutex<Box<dyn InputDevice>>>,
    prefix: String,
}

impl ActionDriver {
    pub fn new(input: Box<dyn InputDevice>, prefix: &str) -> Self {
        Self {
            input: Arc::new(Mutex::new(input)),
            prefix: prefix.to_string(),
        }
    }

    pub fn tap(&self, at: Point) -> Result<(), StepFailure> {
        logger::info_p(&self.prefix, &format!("tap ({},{})", at.x, at.y));
        self.input.lock().unwrap().tap(at).map_err(input_failed)
    }

    pub fn tap_match(&self, m: &MatchResult) -> Result<(), StepFailure> {
        logger::info_p(
            &self.prefix,
            &format!("tap {} @({},{}) conf {:.2}", m.key, m.at.x, m.at.y, m.confidence),
        );
        self.input.lock().unwrap().tap(m.at).map_err(input_failed)
    }

    pub fn swipe(&self, from: Point, to: Point, duration: Duration) -> Result<(), StepFailure> {
        logger::info_p(
            &self.prefix,
            &format!("swipe ({},{}) -> ({},{})", from.x, from.y, to.x, to.y),
        );
        self.input.lock().unwrap().swipe(from, to, duration).map_err(input_failed)
    }

    pub fn back(&self) -> Result<(), StepFailure> {
        logger::info_p(&self.prefix, "back");
        self.input.lock().unwrap().key_back().map_err(input_failed)
    }

    /// Carry out `action`. Button regions are mapped onto `snapshot`'s size.
    pub fn perform(&self, action: &Action, layout: &Layout, snapshot: &ScreenSnapshot) -> Result<(), StepFailure> {
        match action {
            Action::TapMatch(m) => self.tap_match(m),
            Action::TapPoint(p) => self.tap(*p),
            Action::TapButton(key) => {
                let region = layout
                    .button(key)
                    .map_err(|e| StepFailure::Layout(e.to_string()))?
                    .ok_or_else(|| StepFailure::Layout(format!("button '{}' is disabled in layout '{}'", key, layout.id)))?;
                self.tap(region.center_on(snapshot.width, snapshot.height))
            }
            Action::Swipe { from, to, duration } => self.swipe(*from, *to, *duration),
            Action::Back => self.back(),
        }
    }
}

fn input_failed(e: anyhow::Error) -> StepFailure {
    StepFailure::Input(format!("{:#}", e))
}
