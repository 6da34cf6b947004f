use std::path::PathBuf;
use std::sync::Arc;

/// Absolute screen position in device pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: Point) -> f64 {
        let dx = (self.x - other.x) as f64;
        let dy = (self.y - other.y) as f64;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Normalized screen region, `y = (top, bottom)` and `x = (left, right)`, all in 0..=1.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    pub y: (f64, f64),
    pub x: (f64, f64),
}

impl Region {
    pub fn is_normalized(&self) -> bool {
        let ok = |(a, b): (f64, f64)| (0.0..=1.0).contains(&a) && (0.0..=1.0).contains(&b) && a < b;
        ok(self.y) && ok(self.x)
    }

    /// Center of the region on a screen of the given size.
    pub fn center_on(&self, width: u32, height: u32) -> Point {
        let cx = (self.x.0 + self.x.1) / 2.0 * width as f64;
        let cy = (self.y.0 + self.y.1) / 2.0 * height as f64;
        Point::new(cx.round() as i32, cy.round() as i32)
    }
}

/// One immutable capture of an emulator screen (BGRA rows).
#[derive(Debug, Clone)]
pub struct ScreenSnapshot {
    pub seq: u64,
    pub width: u32,
    pub height: u32,
    pub bytes_per_row: u32,
    pub data: Arc<[u8]>,
}

impl ScreenSnapshot {
    /// A snapshot with no pixel payload, used by emulators that do not stream pixels.
    pub fn blank(seq: u64, width: u32, height: u32) -> Self {
        Self {
            seq,
            width,
            height,
            bytes_per_row: width * 4,
            data: Arc::from(Vec::new()),
        }
    }

    pub fn has_pixels(&self) -> bool {
        self.data.len() as u64 >= self.bytes_per_row as u64 * self.height as u64 && !self.data.is_empty()
    }
}

/// A template hit on one snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub key: String,
    pub template: PathBuf,
    pub at: Point,
    pub confidence: f32,
}

/// Three-valued outcome of looking for a template key on a snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum Detection {
    /// At least one hit, best confidence first.
    Found(Vec<MatchResult>),
    NotFound,
    /// The key is disabled in the active layout; nothing can be said.
    Unknown,
}

impl Detection {
    pub fn is_found(&self) -> bool {
        matches!(self, Detection::Found(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Detection::NotFound)
    }

    pub fn is_unknown(&self) -> bool {
        matches!(self, Detection::Unknown)
    }

    pub fn best(&self) -> Option<&MatchResult> {
        match self {
            Detection::Found(hits) => hits.first(),
            _ => None,
        }
    }

    pub fn matches(&self) -> &[MatchResult] {
        match self {
            Detection::Found(hits) => hits,
            _ => &[],
        }
    }

    pub fn presence(&self) -> Presence {
        match self {
            Detection::Found(_) => Presence::Present,
            Detection::NotFound => Presence::Absent,
            Detection::Unknown => Presence::Unknown,
        }
    }
}

/// Answer of an instantaneous presence predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Present,
    Absent,
    Unknown,
}

/// Live status of one emulator instance, shown by the TUI
#[derive(Debug, Clone, Default)]
pub struct InstanceStatus {
    pub task: Option<String>,
    pub state: Option<String>,
    pub last_outcome: Option<String>,
}

/// One configured emulator instance and its runtime state
#[derive(Debug, Clone)]
pub struct InstanceEntry {
    pub name: String,
    pub layout: String,
    pub routine: Vec<String>,
    pub enabled: bool,
    pub status: InstanceStatus,
    pub error: Option<String>,
}

/// Command from TUI to orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Toggle(usize),
    StartStop,
    Restart(usize),
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    Running,
    Stopping,
    Stopped,
}
