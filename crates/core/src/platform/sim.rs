//! Scripted emulator used when no real transport is linked, and by tests.
//!
//! A game is a set of named screens. Each screen shows template elements at
//! fixed points; tapping an element (or a bare hotspot) may switch screens,
//! as may the back key, a swipe, or simply being captured enough times.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, bail};

use super::{Device, Hit, InputDevice, Platform, ScreenSource, Similarity};
use crate::logger;
use crate::types::{Point, ScreenSnapshot};

/// Taps this close to an element or hotspot hit it.
pub const TAP_RADIUS: f64 = 24.0;
const FRAME_HISTORY: usize = 64;

#[derive(Debug, Clone)]
pub struct SimElement {
    /// Matched against the tail of the requested template path.
    pub template: String,
    pub at: Point,
    pub confidence: f32,
    pub on_tap: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SimScreen {
    pub name: String,
    pub elements: Vec<SimElement>,
    pub hotspots: Vec<(Point, String)>,
    pub on_back: Option<String>,
    pub on_swipe: Option<String>,
    /// Switch to the second screen once this one has been captured n times.
    pub after_captures: Option<(u32, String)>,
}

impl SimScreen {
    pub fn new(name: &str) -> Self {
        Self { name: name.to_string(), ..Default::default() }
    }

    pub fn element(self, template: &str, x: i32, y: i32) -> Self {
        self.element_conf(template, x, y, 0.95)
    }

    pub fn element_conf(mut self, template: &str, x: i32, y: i32, confidence: f32) -> Self {
        self.elements.push(SimElement {
            template: template.to_string(),
            at: Point::new(x, y),
            confidence,
            on_tap: None,
        });
        self
    }

    /// Tapping the most recently added element switches to `next`.
    pub fn on_tap(mut self, next: &str) -> Self {
        if let Some(last) = self.elements.last_mut() {
            last.on_tap = Some(next.to_string());
        }
        self
    }

    pub fn hotspot(mut self, x: i32, y: i32, next: &str) -> Self {
        self.hotspots.push((Point::new(x, y), next.to_string()));
        self
    }

    pub fn on_back(mut self, next: &str) -> Self {
        self.on_back = Some(next.to_string());
        self
    }

    pub fn on_swipe(mut self, next: &str) -> Self {
        self.on_swipe = Some(next.to_string());
        self
    }

    pub fn after_captures(mut self, n: u32, next: &str) -> Self {
        self.after_captures = Some((n, next.to_string()));
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SimInput {
    Tap(Point),
    Swipe(Point, Point),
    Back,
}

struct SimState {
    name: String,
    width: u32,
    height: u32,
    screens: HashMap<String, SimScreen>,
    current: String,
    captures_on_current: u32,
    seq: u64,
    frames: VecDeque<(u64, String)>,
    inputs: Vec<SimInput>,
    visited: Vec<String>,
    pixels: bool,
    fail_capture: bool,
    fail_input: bool,
}

impl SimState {
    fn switch(&mut self, next: &str) {
        logger::info_p("sim", &format!("{}: {} -> {}", self.name, self.current, next));
        self.current = next.to_string();
        self.captures_on_current = 0;
        self.visited.push(next.to_string());
    }

    fn screen(&self) -> Option<&SimScreen> {
        self.screens.get(&self.current)
    }

    fn frame_screen(&self, seq: u64) -> Option<&SimScreen> {
        let name = self.frames.iter().find(|(s, _)| *s == seq).map(|(_, n)| n)?;
        self.screens.get(name)
    }
}

/// Shared handle to one simulated emulator. Clones see the same game.
#[derive(Clone)]
pub struct SimGame {
    inner: Arc<Mutex<SimState>>,
}

impl SimGame {
    pub fn new(name: &str, width: u32, height: u32, start: &str) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SimState {
                name: name.to_string(),
                width,
                height,
                screens: HashMap::new(),
                current: start.to_string(),
                captures_on_current: 0,
                seq: 0,
                frames: VecDeque::new(),
                inputs: Vec::new(),
                visited: vec![start.to_string()],
                pixels: false,
                fail_capture: false,
                fail_input: false,
            })),
        }
    }

    /// A game with one empty screen: every template reads as absent.
    pub fn blank(name: &str) -> Self {
        let game = Self::new(name, 540, 960, "blank");
        game.add_screen(SimScreen::new("blank"));
        game
    }

    pub fn add_screen(&self, screen: SimScreen) {
        let mut s = self.inner.lock().unwrap();
        s.screens.insert(screen.name.clone(), screen);
    }

    pub fn with_screens(self, screens: impl IntoIterator<Item = SimScreen>) -> Self {
        for screen in screens {
            self.add_screen(screen);
        }
        self
    }

    /// Captures carry a BGRA pixel payload (one flat colour per screen).
    pub fn with_pixels(self) -> Self {
        self.inner.lock().unwrap().pixels = true;
        self
    }

    pub fn set_fail_capture(&self, on: bool) {
        self.inner.lock().unwrap().fail_capture = on;
    }

    pub fn set_fail_input(&self, on: bool) {
        self.inner.lock().unwrap().fail_input = on;
    }

    pub fn goto(&self, screen: &str) {
        self.inner.lock().unwrap().switch(screen);
    }

    pub fn current(&self) -> String {
        self.inner.lock().unwrap().current.clone()
    }

    /// Every screen shown so far, in order.
    pub fn visited(&self) -> Vec<String> {
        self.inner.lock().unwrap().visited.clone()
    }

    pub fn inputs(&self) -> Vec<SimInput> {
        self.inner.lock().unwrap().inputs.clone()
    }

    pub fn taps(&self) -> Vec<Point> {
        self.inputs()
            .into_iter()
            .filter_map(|i| match i {
                SimInput::Tap(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn captures(&self) -> u64 {
        self.inner.lock().unwrap().seq
    }

    pub fn device(&self) -> Device {
        Device {
            screen: Box::new(self.clone()),
            input: Box::new(self.clone()),
            similarity: Arc::new(self.clone()),
        }
    }
}

fn shade(name: &str) -> [u8; 4] {
    let h = name.bytes().fold(17u8, |acc, b| acc.wrapping_mul(31).wrapping_add(b));
    [h, h.wrapping_add(85), h.wrapping_add(170), 255]
}

impl ScreenSource for SimGame {
    fn capture(&mut self) -> anyhow::Result<ScreenSnapshot> {
        let mut s = self.inner.lock().unwrap();
        if s.fail_capture {
            bail!("{}: capture transport down", s.name);
        }
        if let Some((n, next)) = s.screen().and_then(|sc| sc.after_captures.clone()) {
            if s.captures_on_current >= n {
                s.switch(&next);
            }
        }
        s.captures_on_current += 1;
        s.seq += 1;
        let seq = s.seq;
        let current = s.current.clone();
        s.frames.push_back((seq, current.clone()));
        if s.frames.len() > FRAME_HISTORY {
            s.frames.pop_front();
        }

        if !s.pixels {
            return Ok(ScreenSnapshot::blank(seq, s.width, s.height));
        }
        let px = shade(&current);
        let data: Vec<u8> = px.iter().copied().cycle().take((s.width * s.height * 4) as usize).collect();
        Ok(ScreenSnapshot {
            seq,
            width: s.width,
            height: s.height,
            bytes_per_row: s.width * 4,
            data: Arc::from(data),
        })
    }
}

impl InputDevice for SimGame {
    fn tap(&mut self, at: Point) -> anyhow::Result<()> {
        let mut s = self.inner.lock().unwrap();
        if s.fail_input {
            bail!("{}: input transport down", s.name);
        }
        s.inputs.push(SimInput::Tap(at));
        let screen = s.screen().ok_or_else(|| anyhow!("{}: no screen '{}'", s.name, s.current))?;
        let next = screen
            .elements
            .iter()
            .filter(|e| e.at.distance(at) <= TAP_RADIUS)
            .find_map(|e| e.on_tap.clone())
            .or_else(|| {
                screen
                    .hotspots
                    .iter()
                    .find(|(p, _)| p.distance(at) <= TAP_RADIUS)
                    .map(|(_, n)| n.clone())
            });
        if let Some(next) = next {
            s.switch(&next);
        }
        Ok(())
    }

    fn swipe(&mut self, from: Point, to: Point, _duration: Duration) -> anyhow::Result<()> {
        let mut s = self.inner.lock().unwrap();
        if s.fail_input {
            bail!("{}: input transport down", s.name);
        }
        s.inputs.push(SimInput::Swipe(from, to));
        if let Some(next) = s.screen().and_then(|sc| sc.on_swipe.clone()) {
            s.switch(&next);
        }
        Ok(())
    }

    fn key_back(&mut self) -> anyhow::Result<()> {
        let mut s = self.inner.lock().unwrap();
        if s.fail_input {
            bail!("{}: input transport down", s.name);
        }
        s.inputs.push(SimInput::Back);
        if let Some(next) = s.screen().and_then(|sc| sc.on_back.clone()) {
            s.switch(&next);
        }
        Ok(())
    }
}

impl Similarity for SimGame {
    fn locate(&self, snapshot: &ScreenSnapshot, template: &Path, min_confidence: f32) -> anyhow::Result<Vec<Hit>> {
        let s = self.inner.lock().unwrap();
        let Some(screen) = s.frame_screen(snapshot.seq) else {
            return Ok(Vec::new());
        };
        Ok(screen
            .elements
            .iter()
            .filter(|e| template.ends_with(&e.template) && e.confidence >= min_confidence)
            .map(|e| Hit { at: e.at, confidence: e.confidence })
            .collect())
    }
}

/// Platform backed by simulated games, one per instance name.
pub struct SimPlatform {
    games: BTreeMap<String, SimGame>,
}

impl SimPlatform {
    pub fn new() -> Self {
        Self { games: BTreeMap::new() }
    }

    pub fn blank(names: &[String]) -> Self {
        let mut platform = Self::new();
        for name in names {
            platform.insert(name, SimGame::blank(name));
        }
        platform
    }

    pub fn insert(&mut self, name: &str, game: SimGame) {
        self.games.insert(name.to_string(), game);
    }

    pub fn game(&self, name: &str) -> Option<&SimGame> {
        self.games.get(name)
    }
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl Platform for SimPlatform {
    fn instances(&self) -> Vec<String> {
        self.games.keys().cloned().collect()
    }

    fn connect(&self, name: &str) -> anyhow::Result<Device> {
        logger::info_p("sim", &format!("connect(\"{}\")", name));
        self.games
            .get(name)
            .map(SimGame::device)
            .ok_or_else(|| anyhow!("no simulated instance '{}'", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn game() -> SimGame {
        SimGame::new("emu", 540, 960, "home").with_screens([
            SimScreen::new("home")
                .element("radar.png", 100, 800)
                .on_tap("radar")
                .hotspot(10, 10, "profile"),
            SimScreen::new("radar").element("header.png", 270, 60).on_back("home"),
            SimScreen::new("profile").after_captures(2, "home"),
        ])
    }

    #[test]
    fn locate_uses_screen_of_captured_frame() {
        let mut g = game();
        let first = g.capture().unwrap();
        g.tap(Point::new(105, 795)).unwrap();
        let second = g.capture().unwrap();
        let radar = PathBuf::from("assets/540p/radar.png");
        assert_eq!(g.locate(&first, &radar, 0.8).unwrap().len(), 1);
        assert!(g.locate(&second, &radar, 0.8).unwrap().is_empty());
        assert_eq!(g.current(), "radar");
    }

    #[test]
    fn back_and_hotspot_and_auto_transition() {
        let mut g = game();
        g.tap(Point::new(500, 500)).unwrap();
        assert_eq!(g.current(), "home");
        g.tap(Point::new(12, 12)).unwrap();
        assert_eq!(g.current(), "profile");
        g.capture().unwrap();
        g.capture().unwrap();
        g.capture().unwrap();
        assert_eq!(g.current(), "home");
        g.goto("radar");
        g.key_back().unwrap();
        assert_eq!(g.current(), "home");
        assert_eq!(g.taps().len(), 2);
    }

    #[test]
    fn threshold_filters_low_confidence() {
        let mut g = SimGame::new("emu", 540, 960, "s")
            .with_screens([SimScreen::new("s").element_conf("go.png", 1, 1, 0.7)]);
        let snap = g.capture().unwrap();
        assert!(g.locate(&snap, Path::new("go.png"), 0.85).unwrap().is_empty());
        assert_eq!(g.locate(&snap, Path::new("go.png"), 0.6).unwrap().len(), 1);
    }

    #[test]
    fn failing_transport_reports_errors() {
        let mut g = game();
        g.set_fail_capture(true);
        assert!(g.capture().is_err());
        g.set_fail_input(true);
        assert!(g.tap(Point::new(1, 1)).is_err());
        assert!(g.inputs().is_empty());
    }

    #[test]
    fn pixels_fill_whole_frame() {
        let mut g = game().with_pixels();
        let snap = g.capture().unwrap();
        assert!(snap.has_pixels());
        assert_eq!(snap.data.len(), 540 * 960 * 4);
    }

    #[test]
    fn platform_connects_known_instances() {
        let platform = SimPlatform::blank(&["a".to_string(), "b".to_string()]);
        assert_eq!(platform.instances(), vec!["a", "b"]);
        assert!(platform.connect("a").is_ok());
        assert!(platform.connect("c").is_err());
    }
}
