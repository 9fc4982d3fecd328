use std::collections::VecDeque;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Receiver;
use std::time::{Duration, Instant};

use tracing::{error, info, trace, warn};

use crate::config::Config;
use crate::copy_request::CopyRequest;
use crate::error::RunBlocked;
use crate::events::LogLevel;
use crate::manager::{ManagerNotice, ProcessManager, ProgressUpdate};
use crate::options::SyncOptions;
use crate::probe::ToolProbe;
use crate::progress::ProgressInfo;
use crate::state::{AppState, AppStatus, StateChanged};

const LOG_CAPACITY: usize = 1000;
/// How long a quit waits for an interrupted batch to drain.
pub const QUIT_GRACE: Duration = Duration::from_millis(500);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogEntry {
    pub level: LogLevel,
    pub message: String,
}

/// Owns the application state and turns user actions and batch
/// notices into state transitions.
pub struct Coordinator {
    state: AppState,
    manager: ProcessManager,
    probe: ToolProbe,
    logs: VecDeque<LogEntry>,
    quit_deadline: Option<Instant>,
}

impl Coordinator {
    pub fn new(config: &Config) -> Self {
        let mut state = AppState::new(config.options);
        state.set_debug_mode(config.debug);
        state.set_destination(config.destination.clone());
        Self {
            state,
            manager: ProcessManager::new(config.tool.clone()),
            probe: ToolProbe::new(config.tool.clone()),
            logs: VecDeque::with_capacity(LOG_CAPACITY),
            quit_deadline: None,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn subscribe(&mut self) -> Receiver<StateChanged> {
        self.state.subscribe()
    }

    pub fn logs(&self) -> &VecDeque<LogEntry> {
        &self.logs
    }

    pub fn is_polling(&self) -> bool {
        self.manager.is_polling()
    }

    /// Startup availability check: Idle -> CheckingTool -> Ready or ToolNotFound.
    pub fn check_tool(&mut self) {
        self.state.set_status(AppStatus::CheckingTool);
        if self.probe_tool() {
            self.state.set_status(AppStatus::Ready);
        }
    }

    fn probe_tool(&mut self) -> bool {
        self.log(LogLevel::Info, "Checking sync tool availability...");
        match self.probe.check() {
            Ok(tool) => {
                self.log(LogLevel::Success, format!("Sync tool found: {}", tool.version));
                self.manager.set_program(tool.program);
                self.state.set_tool_available(true);
                true
            }
            Err(err) => {
                self.state.set_tool_available(false);
                self.state.set_status(AppStatus::ToolNotFound);
                self.state.set_last_error(None);
                self.log(LogLevel::Error, format!("Cannot run: {err}"));
                false
            }
        }
    }

    pub fn run_or_resume(&mut self) -> Result<(), RunBlocked> {
        if self.manager.has_session() {
            self.log(LogLevel::Warning, "A batch is already running.");
            return Err(RunBlocked::Busy);
        }
        if !self.probe_tool() {
            return Err(RunBlocked::ToolUnavailable);
        }
        if matches!(
            self.state.status(),
            AppStatus::Idle | AppStatus::CheckingTool | AppStatus::ToolNotFound
        ) {
            self.state.set_status(AppStatus::Ready);
        }

        if let Err(blocked) = self.state.check_runnable() {
            self.log(LogLevel::Error, format!("Cannot run: {blocked}."));
            return Err(blocked);
        }
        let Some(destination) = self.state.destination().cloned() else {
            return Err(RunBlocked::NoDestination);
        };
        let request = CopyRequest {
            sources: self.state.sources().to_vec(),
            destination,
            options: *self.state.options(),
        };

        self.state.set_status(AppStatus::Running);
        let total_items = request.sources.len();
        self.state.update_progress(|progress| {
            *progress = ProgressInfo {
                total_items,
                ..ProgressInfo::default()
            }
        });
        let started = self.manager.start_run(&mut self.state, request);
        self.apply_notices();
        if let Err(blocked) = started {
            self.state.set_status(AppStatus::FinishedError);
            return Err(blocked);
        }
        Ok(())
    }

    pub fn interrupt(&mut self) {
        let delivered = self.manager.request_interrupt();
        self.apply_notices();
        if delivered && self.state.status() == AppStatus::Running {
            self.state.set_status(AppStatus::Interrupting);
        }
    }

    pub fn add_sources<I>(&mut self, paths: I)
    where
        I: IntoIterator<Item = PathBuf>,
    {
        if self.inputs_locked() {
            return;
        }
        let mut sources = self.state.sources().to_vec();
        sources.extend(paths.into_iter().map(|p| absolute(&p)));
        self.state.set_sources(sources);
    }

    pub fn remove_sources(&mut self, paths: &[PathBuf]) {
        if self.inputs_locked() {
            return;
        }
        let sources: Vec<PathBuf> = self
            .state
            .sources()
            .iter()
            .filter(|source| !paths.contains(source))
            .cloned()
            .collect();
        self.state.set_sources(sources);
    }

    pub fn set_destination(&mut self, destination: Option<PathBuf>) {
        if self.inputs_locked() {
            return;
        }
        self.state.set_destination(destination.map(|p| absolute(&p)));
    }

    pub fn set_options(&mut self, options: SyncOptions) {
        if self.inputs_locked() {
            return;
        }
        self.state.set_options(options);
    }

    pub fn set_debug_mode(&mut self, enabled: bool) {
        self.state.set_debug_mode(enabled);
    }

    /// One poll cycle: drain the runner and apply what it reported.
    pub fn poll(&mut self) {
        self.manager.poll(&mut self.state);
        self.apply_notices();
    }

    /// Interrupts a running batch first; see [`Coordinator::ready_to_quit`].
    pub fn request_quit(&mut self, now: Instant) {
        if self.quit_deadline.is_some() {
            return;
        }
        if self.manager.is_running() {
            self.log(
                LogLevel::Warning,
                "Exit requested: attempting to interrupt the running batch first...",
            );
            self.interrupt();
            self.quit_deadline = Some(now + QUIT_GRACE);
        } else {
            self.quit_deadline = Some(now);
        }
    }

    pub fn quit_requested(&self) -> bool {
        self.quit_deadline.is_some()
    }

    pub fn ready_to_quit(&self, now: Instant) -> bool {
        self.quit_deadline
            .is_some_and(|deadline| now >= deadline || !self.manager.has_session())
    }

    fn inputs_locked(&mut self) -> bool {
        let locked = self.manager.has_session();
        if locked {
            self.log(
                LogLevel::Warning,
                "Sources, destination and options are locked while a batch runs.",
            );
        }
        locked
    }

    fn apply_notices(&mut self) {
        for notice in self.manager.take_notices() {
            match notice {
                ManagerNotice::Log { level, message } => self.log(level, message),
                ManagerNotice::Progress(ProgressUpdate::Item { index, total, name }) => {
                    self.state.update_progress(|progress| {
                        progress.current_item_index = Some(index);
                        progress.total_items = total;
                        progress.current_item_name = name;
                        progress.transfer = None;
                    });
                }
                ManagerNotice::Progress(ProgressUpdate::Transfer(stats)) => {
                    self.state
                        .update_progress(|progress| progress.transfer = Some(stats));
                }
                ManagerNotice::Finished {
                    success,
                    interrupted,
                } => self.finish(success, interrupted),
            }
        }
    }

    fn finish(&mut self, success: bool, interrupted: bool) {
        if success {
            self.state.set_status(AppStatus::FinishedSuccess);
        } else if interrupted {
            self.state.set_status(AppStatus::Interrupted);
        } else {
            self.state.set_status(AppStatus::FinishedError);
            let summary = match self.state.last_error() {
                Some(cause) => format!("Sync finished with error: {cause}"),
                None => "Sync finished with an unspecified error.".to_string(),
            };
            self.record(LogLevel::Error, summary);
        }
        info!(status = %self.state.status(), "batch outcome applied");
    }

    /// Error logs also become the last error, unless this run already
    /// recorded one; the first error is usually the cause.
    fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        let message = message.into();
        if level == LogLevel::Error && self.state.last_error().is_none() {
            self.state.set_last_error(Some(message.clone()));
        }
        self.record(level, message);
    }

    fn record(&mut self, level: LogLevel, message: String) {
        match level {
            LogLevel::Error => error!(target: "copier::batch", "{message}"),
            LogLevel::Warning => warn!(target: "copier::batch", "{message}"),
            LogLevel::Progress => trace!(target: "copier::batch", "{message}"),
            LogLevel::Info | LogLevel::Success => info!(target: "copier::batch", kind = %level, "{message}"),
        }
        if self.logs.len() == LOG_CAPACITY {
            self.logs.pop_front();
        }
        self.logs.push_back(LogEntry { level, message });
    }
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    env::current_dir()
        .map(|cwd| cwd.join(path))
        .unwrap_or_else(|_| path.to_path_buf())
}
