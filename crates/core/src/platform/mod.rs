pub mod sim;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::logger;
use crate::types::*;

/// A raw hit from the similarity primitive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub at: Point,
    pub confidence: f32,
}

/// Screen capture transport for one emulator.
pub trait ScreenSource: Send {
    fn capture(&mut self) -> anyhow::Result<ScreenSnapshot>;
}

/// Input injection for one emulator.
pub trait InputDevice: Send {
    fn tap(&mut self, at: Point) -> anyhow::Result<()>;
    fn swipe(&mut self, from: Point, to: Point, duration: Duration) -> anyhow::Result<()>;
    fn key_back(&mut self) -> anyhow::Result<()>;
}

/// Image similarity primitive. Returns every location scoring at least `min_confidence`.
pub trait Similarity: Send + Sync {
    fn locate(&self, snapshot: &ScreenSnapshot, template: &Path, min_confidence: f32) -> anyhow::Result<Vec<Hit>>;
}

/// Everything needed to automate one emulator instance.
pub struct Device {
    pub screen: Box<dyn ScreenSource>,
    pub input: Box<dyn InputDevice>,
    pub similarity: Arc<dyn Similarity>,
}

/// Platform-level operations (instance enumeration, factory).
pub trait Platform: Send + Sync {
    fn instances(&self) -> Vec<String>;
    fn connect(&self, name: &str) -> anyhow::Result<Device>;
}

/// Platform used by the operator binary. No capture transport is linked
/// into this build, so every instance gets a blank simulated screen.
pub fn create_platform(names: &[String]) -> Box<dyn Platform> {
    logger::register_prefix("sim", logger::COLOR_GRAY);
    logger::warn_p("sim", "no capture transport linked, instances run against a blank simulated screen");
    Box::new(sim::SimPlatform::blank(names))
}
