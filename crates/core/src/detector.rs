//! Named presence predicates and bounded waits over the live screen.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::error::StepFailure;
use crate::layout::{Layout, Resolution};
use crate::matcher::TemplateMatcher;
use crate::platform::ScreenSource;
use crate::types::{Detection, MatchResult, Presence, ScreenSnapshot};

pub struct StateDetector {
    layout: Arc<Layout>,
    screen: Box<dyn ScreenSource>,
    matcher: TemplateMatcher,
    clock: Arc<dyn Clock>,
    min_confidence: f32,
    poll_interval: Duration,
    last: Option<ScreenSnapshot>,
}

impl StateDetector {
    pub fn new(
        layout: Arc<Layout>,
        screen: Box<dyn ScreenSource>,
        matcher: TemplateMatcher,
        clock: Arc<dyn Clock>,
        min_confidence: f32,
        poll_interval: Duration,
    ) -> Self {
        Self {
            layout,
            screen,
            matcher,
            clock,
            min_confidence,
            poll_interval,
            last: None,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Most recent capture, kept for debug dumps.
    pub fn last_snapshot(&self) -> Option<&ScreenSnapshot> {
        self.last.as_ref()
    }

    pub fn snapshot(&mut self) -> Result<ScreenSnapshot, StepFailure> {
        let snap = self
            .screen
            .capture()
            .map_err(|e| StepFailure::Capture(format!("{:#}", e)))?;
        self.last = Some(snap.clone());
        Ok(snap)
    }

    /// Three-valued lookup of one key on an existing snapshot.
    pub fn observe(&self, snapshot: &ScreenSnapshot, key: &str) -> Result<Detection, StepFailure> {
        let entry = match self.layout.resolve(key) {
            Ok(Resolution::Template(entry)) => entry,
            Ok(Resolution::Disabled) => return Ok(Detection::Unknown),
            Err(e) => return Err(StepFailure::Layout(e.to_string())),
        };
        let hits = self
            .matcher
            .find(snapshot, &[entry], self.min_confidence)
            .map_err(|e| StepFailure::Capture(format!("matching '{}': {:#}", key, e)))?;
        if hits.is_empty() {
            Ok(Detection::NotFound)
        } else {
            Ok(Detection::Found(hits))
        }
    }

    pub fn observe_all<'k>(
        &self,
        snapshot: &ScreenSnapshot,
        keys: impl IntoIterator<Item = &'k str>,
    ) -> Result<BTreeMap<String, Detection>, StepFailure> {
        let mut out = BTreeMap::new();
        for key in keys {
            if !out.contains_key(key) {
                out.insert(key.to_string(), self.observe(snapshot, key)?);
            }
        }
        Ok(out)
    }

    /// Instantaneous predicate on a fresh snapshot. Disabled keys answer `Unknown`.
    pub fn is_present(&mut self, key: &str) -> Result<Presence, StepFailure> {
        if !self.layout.is_enabled(key) {
            self.layout.resolve(key).map_err(|e| StepFailure::Layout(e.to_string()))?;
            return Ok(Presence::Unknown);
        }
        let snap = self.snapshot()?;
        Ok(self.observe(&snap, key)?.presence())
    }

    /// Poll until one of `keys` matches or `timeout` passes.
    ///
    /// Disabled keys are ignored; if every key is disabled the wait can never
    /// succeed and fails at once instead of burning the timeout.
    pub fn wait_for_any(&mut self, keys: &[&str], timeout: Duration) -> Result<MatchResult, StepFailure> {
        let timed_out = || StepFailure::DetectionTimeout {
            keys: keys.iter().map(|k| k.to_string()).collect(),
            timeout,
        };
        let mut live = Vec::new();
        for key in keys {
            match self.layout.resolve(key) {
                Ok(Resolution::Template(_)) => live.push(*key),
                Ok(Resolution::Disabled) => {}
                Err(e) => return Err(StepFailure::Layout(e.to_string())),
            }
        }
        if live.is_empty() {
            return Err(timed_out());
        }

        let deadline = self.clock.now() + timeout;
        loop {
            let snap = self.snapshot()?;
            let mut best: Option<MatchResult> = None;
            for key in &live {
                if let Some(hit) = self.observe(&snap, key)?.best() {
                    if best.as_ref().map_or(true, |b| hit.confidence > b.confidence) {
                        best = Some(hit.clone());
                    }
                }
            }
            if let Some(hit) = best {
                return Ok(hit);
            }
            let now = self.clock.now();
            if now >= deadline {
                return Err(timed_out());
            }
            self.clock.sleep(self.poll_interval.min(deadline - now));
        }
    }

    /// Poll until `key` is no longer on screen. A disabled key can never be
    /// confirmed gone, so that fails immediately.
    pub fn wait_until_gone(&mut self, key: &str, timeout: Duration) -> Result<(), StepFailure> {
        let timed_out = || StepFailure::DetectionTimeout { keys: vec![key.to_string()], timeout };
        match self.layout.resolve(key) {
            Ok(Resolution::Template(_)) => {}
            Ok(Resolution::Disabled) => return Err(timed_out()),
            Err(e) => return Err(StepFailure::Layout(e.to_string())),
        }
        let deadline = self.clock.now() + timeout;
        loop {
            let snap = self.snapshot()?;
            if self.observe(&snap, key)?.is_not_found() {
                return Ok(());
            }
            let now = self.clock.now();
            if now >= deadline {
                return Err(timed_out());
            }
            self.clock.sleep(self.poll_interval.min(deadline - now));
        }
    }
}
