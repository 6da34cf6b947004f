use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::sync::{mpsc, Mutex, OnceLock};

use chrono::Local;

static LOGGER: OnceLock<Mutex<Logger>> = OnceLock::new();

struct Logger {
    file: File,
    tui_tx: Option<mpsc::Sender<String>>,
    echo_stderr: bool,
    prefixes: HashMap<String, u8>, // prefix -> color index
}

// Color indices for TUI rendering (mapped in ui.rs)
pub const COLOR_GRAY: u8 = 1;
pub const COLOR_BLUE: u8 = 2;
pub const COLOR_GREEN: u8 = 3;
pub const COLOR_MAGENTA: u8 = 4;
pub const COLOR_CYAN: u8 = 5;
pub const COLOR_YELLOW: u8 = 6;

/// Colours handed out to emulator instances in registration order.
pub const INSTANCE_PALETTE: [u8; 5] = [COLOR_BLUE, COLOR_GREEN, COLOR_MAGENTA, COLOR_CYAN, COLOR_YELLOW];

/// Initialize the global logger. Truncates `<log_dir>/app.log`.
pub fn init(log_dir: &Path) -> io::Result<()> {
    fs::create_dir_all(log_dir)?;
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(log_dir.join("app.log"))?;

    LOGGER
        .set(Mutex::new(Logger {
            file,
            tui_tx: None,
            echo_stderr: false,
            prefixes: HashMap::new(),
        }))
        .ok();
    Ok(())
}

/// Wire the TUI log channel.
pub fn set_tui_sender(tx: mpsc::Sender<String>) {
    if let Some(logger) = LOGGER.get() {
        let mut l = logger.lock().unwrap();
        l.tui_tx = Some(tx);
    }
}

/// Mirror every line to stderr (headless runs have no log pane).
pub fn set_echo_stderr(on: bool) {
    if let Some(logger) = LOGGER.get() {
        logger.lock().unwrap().echo_stderr = on;
    }
}

/// Register a prefix with a color. Later `*_p` calls with this prefix use it.
pub fn register_prefix(prefix: &str, color: u8) {
    if let Some(logger) = LOGGER.get() {
        let mut l = logger.lock().unwrap();
        l.prefixes.insert(prefix.to_string(), color);
    }
}

/// TUI line format, `\x1f` separated:
/// level\x1fprefix\x1fcolor\x1ftimestamp\x1fmessage
fn write_log(level: &str, prefix: &str, msg: &str) {
    let Some(logger) = LOGGER.get() else {
        return;
    };
    let ts = Local::now().format("%H:%M:%S").to_string();

    let file_line = if prefix.is_empty() {
        format!("[{}] [{}] {}", ts, level, msg)
    } else {
        format!("[{}] [{}] [{}] {}", ts, level, prefix, msg)
    };

    let mut l = logger.lock().unwrap();
    let color = l.prefixes.get(prefix).copied().unwrap_or(0);
    writeln!(l.file, "{}", file_line).ok();
    if l.echo_stderr {
        eprintln!("{}", file_line);
    }
    if let Some(tx) = &l.tui_tx {
        tx.send(format!("{}\x1f{}\x1f{}\x1f{}\x1f{}", level, prefix, color, ts, msg)).ok();
    }
}

pub fn info(msg: &str) {
    write_log("INFO", "", msg);
}

pub fn warn(msg: &str) {
    write_log("WARN", "", msg);
}

pub fn error(msg: &str) {
    write_log("ERROR", "", msg);
}

pub fn info_p(prefix: &str, msg: &str) {
    write_log("INFO", prefix, msg);
}

pub fn warn_p(prefix: &str, msg: &str) {
    write_log("WARN", prefix, msg);
}

pub fn error_p(prefix: &str, msg: &str) {
    write_log("ERROR", prefix, msg);
}

/// Split a TUI channel line back into its fields.
pub fn parse_line(line: &str) -> Option<LogLine> {
    let mut parts = line.splitn(5, '\x1f');
    Some(LogLine {
        level: parts.next()?.to_string(),
        prefix: parts.next()?.to_string(),
        color: parts.next()?.parse().ok()?,
        timestamp: parts.next()?.to_string(),
        message: parts.next()?.to_string(),
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogLine {
    pub level: String,
    pub prefix: String,
    pub color: u8,
    pub timestamp: String,
    pub message: String,
}
