use std::path::PathBuf;
use std::sync::{Arc, Mutex, mpsc};

use lastz_core::settings::Settings;
use lastz_core::types::{Command, InstanceEntry, OrchestratorState};

use crate::confirm::ConfirmDialog;

/// Lines kept in the log pane.
const LOG_CAPACITY: usize = 2000;

pub struct App {
    pub state: Arc<Mutex<Vec<InstanceEntry>>>,
    pub orch_state: Arc<Mutex<OrchestratorState>>,
    pub selected: usize,
    pub log_visible: bool,
    pub log_messages: Vec<String>,
    pub log_scroll: usize, // scroll offset from bottom (0 = latest)
    pub log_rx: mpsc::Receiver<String>,
    pub cmd_tx: mpsc::Sender<Command>,
    pub settings_path: PathBuf,
    pub confirm: Option<ConfirmDialog>,
    pub should_quit: bool,
}

impl App {
    pub fn new(
        state: Arc<Mutex<Vec<InstanceEntry>>>,
        orch_state: Arc<Mutex<OrchestratorState>>,
        log_rx: mpsc::Receiver<String>,
        cmd_tx: mpsc::Sender<Command>,
        settings_path: PathBuf,
    ) -> Self {
        Self {
            state,
            orch_state,
            selected: 0,
            log_visible: true,
            log_messages: Vec::new(),
            log_scroll: 0,
            log_rx,
            cmd_tx,
            settings_path,
            confirm: None,
            should_quit: false,
        }
    }

    pub fn drain_logs(&mut self) {
        while let Ok(msg) = self.log_rx.try_recv() {
            self.log_messages.push(msg);
        }
        if self.log_messages.len() > LOG_CAPACITY {
            let excess = self.log_messages.len() - LOG_CAPACITY;
            self.log_messages.drain(..excess);
        }
    }

    pub fn scroll_log_up(&mut self, n: usize) {
        self.log_scroll = self.log_scroll.saturating_add(n);
    }

    pub fn scroll_log_down(&mut self, n: usize) {
        self.log_scroll = self.log_scroll.saturating_sub(n);
    }

    pub fn move_up(&mut self) {
        if self.selected > 0 {
            self.selected -= 1;
        }
    }

    pub fn move_down(&mut self) {
        let len = self.state.lock().unwrap().len();
        if self.selected + 1 < len {
            self.selected += 1;
        }
    }

    /// Flip the selected instance, remember the choice, and tell the orchestrator.
    pub fn toggle_selected(&mut self) {
        let enabled: Vec<String> = {
            let mut entries = self.state.lock().unwrap();
            let Some(entry) = entries.get_mut(self.selected) else { return };
            entry.enabled = !entry.enabled;
            entries.iter().filter(|e| e.enabled).map(|e| e.name.clone()).collect()
        };
        Settings { enabled_instances: Some(enabled) }.save(&self.settings_path);
        self.cmd_tx.send(Command::Toggle(self.selected)).ok();
    }

    pub fn start_stop(&mut self) {
        {
            let mut orch = self.orch_state.lock().unwrap();
            *orch = match *orch {
                OrchestratorState::Running => OrchestratorState::Stopping,
                OrchestratorState::Stopped => OrchestratorState::Running,
                // Still winding down; ignore.
                OrchestratorState::Stopping => return,
            };
        }
        self.cmd_tx.send(Command::StartStop).ok();
    }

    pub fn restart_selected(&mut self) {
        self.cmd_tx.send(Command::Restart(self.selected)).ok();
    }

    pub fn toggle_log(&mut self) {
        self.log_visible = !self.log_visible;
    }

    /// Ask before quitting while instances are running.
    pub fn request_quit(&mut self) {
        if *self.orch_state.lock().unwrap() == OrchestratorState::Stopped {
            self.quit();
        } else {
            self.confirm = Some(ConfirmDialog::new("Stop all instances and quit?"));
        }
    }

    pub fn confirm_toggle(&mut self) {
        if let Some(dialog) = &mut self.confirm {
            dialog.toggle();
        }
    }

    /// Close the dialog, quitting if `accept` (or the dialog's Yes) was chosen.
    pub fn confirm_close(&mut self, accept: Option<bool>) {
        let Some(dialog) = self.confirm.take() else { return };
        if accept.unwrap_or(dialog.selected) {
            self.quit();
        }
    }

    pub fn quit(&mut self) {
        self.cmd_tx.send(Command::Quit).ok();
        self.should_quit = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lastz_core::types::InstanceStatus;

    fn entry(name: &str, enabled: bool) -> InstanceEntry {
        InstanceEntry {
            name: name.into(),
            layout: "540p".into(),
            routine: vec!["radar_quests".into()],
            enabled,
            status: InstanceStatus::default(),
            error: None,
        }
    }

    fn app(dir: &std::path::Path) -> (App, mpsc::Receiver<Command>) {
        let (_log_tx, log_rx) = mpsc::channel();
        let (cmd_tx, cmd_rx) = mpsc::channel();
        let app = App::new(
            Arc::new(Mutex::new(vec![entry("farm1", true), entry("farm2", false)])),
            Arc::new(Mutex::new(OrchestratorState::Stopped)),
            log_rx,
            cmd_tx,
            dir.join("settings.json"),
        );
        (app, cmd_rx)
    }

    #[test]
    fn toggle_persists_enabled_instances() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, cmds) = app(dir.path());
        app.move_down();
        app.toggle_selected();
        assert_eq!(cmds.try_recv().unwrap(), Command::Toggle(1));
        let saved = Settings::load(&dir.path().join("settings.json"));
        assert_eq!(saved.enabled_instances, Some(vec!["farm1".to_string(), "farm2".to_string()]));
    }

    #[test]
    fn start_stop_cycles_orchestrator_state() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, cmds) = app(dir.path());
        app.start_stop();
        assert_eq!(*app.orch_state.lock().unwrap(), OrchestratorState::Running);
        app.start_stop();
        assert_eq!(*app.orch_state.lock().unwrap(), OrchestratorState::Stopping);
        app.start_stop();
        assert_eq!(cmds.try_iter().count(), 2);
    }

    #[test]
    fn quitting_while_running_needs_confirmation() {
        let dir = tempfile::tempdir().unwrap();
        let (mut app, cmds) = app(dir.path());
        *app.orch_state.lock().unwrap() = OrchestratorState::Running;
        app.request_quit();
        assert!(app.confirm.is_some());
        app.confirm_close(None);
        assert!(!app.should_quit);
        app.request_quit();
        app.confirm_toggle();
        app.confirm_close(None);
        assert!(app.should_quit);
        assert_eq!(cmds.try_recv().unwrap(), Command::Quit);
    }
}
