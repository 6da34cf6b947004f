use std::time::Duration;

use crate::config::{Dismiss, OverlayConfig};
use crate::detector::StateDetector;
use crate::driver::{Action, ActionDriver};
use crate::error::StepFailure;
use crate::logger;
use crate::types::{MatchResult, ScreenSnapshot};

/// Snapshot the task should evaluate after the guard ran.
#[derive(Debug, Clone)]
pub struct Cleared {
    pub snapshot: ScreenSnapshot,
    pub dismissed: u32,
}

/// Dismisses known popups at the top of every polling cycle, before any
/// task predicate looks at the screen.
#[derive(Debug, Clone, Default)]
pub struct OverlayGuard {
    overlays: Vec<OverlayConfig>,
    max_dismissals: u32,
    confirm_timeout: Duration,
}

impl OverlayGuard {
    pub fn new(overlays: Vec<OverlayConfig>, max_dismissals: u32, confirm_timeout: Duration) -> Self {
        Self { overlays, max_dismissals, confirm_timeout }
    }

    pub fn is_empty(&self) -> bool {
        self.overlays.is_empty()
    }

    fn present(&self, detector: &StateDetector, snapshot: &ScreenSnapshot) -> Result<Option<(&OverlayConfig, MatchResult)>, StepFailure> {
        for overlay in &self.overlays {
            if let Some(hit) = detector.observe(snapshot, &overlay.key)?.best() {
                return Ok(Some((overlay, hit.clone())));
            }
        }
        Ok(None)
    }

    /// With no overlay on screen this returns `snapshot` untouched. Otherwise
    /// each overlay is dismissed, confirmed gone, and a fresh snapshot taken.
    pub fn apply(
        &self,
        detector: &mut StateDetector,
        driver: &ActionDriver,
        snapshot: ScreenSnapshot,
        prefix: &str,
    ) -> Result<Cleared, StepFailure> {
        let mut snapshot = snapshot;
        let mut dismissed = 0;
        loop {
            let Some((overlay, hit)) = self.present(detector, &snapshot)? else {
                return Ok(Cleared { snapshot, dismissed });
            };
            if dismissed >= self.max_dismissals {
                return Err(StepFailure::ActionUnconfirmed {
                    action: format!("dismiss {} overlays", dismissed),
                    expected: format!("{} to stay closed", overlay.key),
                    timeout: self.confirm_timeout,
                });
            }
            let action = match &overlay.dismiss {
                Dismiss::Back => Action::Back,
                Dismiss::TapMatch => Action::TapMatch(hit),
                Dismiss::Button(key) => Action::TapButton(key.clone()),
            };
            logger::info_p(prefix, &format!("overlay {}: {}", overlay.key, action));
            driver.perform(&action, detector.layout(), &snapshot)?;
            detector
                .wait_until_gone(&overlay.key, self.confirm_timeout)
                .map_err(|e| match e {
                    StepFailure::DetectionTimeout { timeout, .. } => StepFailure::ActionUnconfirmed {
                        action: action.to_string(),
                        expected: format!("{} to close", overlay.key),
                        timeout,
                    },
                    other => other,
                })?;
            dismissed += 1;
            snapshot = detector.snapshot()?;
        }
    }
}
