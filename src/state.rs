use std::fmt;
use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, Sender};

use tracing::debug;

use crate::error::RunBlocked;
use crate::options::SyncOptions;
use crate::progress::ProgressInfo;
use crate::resume::ResumeState;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AppStatus {
    Idle,
    CheckingTool,
    ToolNotFound,
    Ready,
    Running,
    Interrupting,
    Interrupted,
    FinishedSuccess,
    FinishedError,
}

impl AppStatus {
    fn is_error(self) -> bool {
        matches!(self, AppStatus::FinishedError | AppStatus::ToolNotFound)
    }

    fn accepts_run(self) -> bool {
        matches!(
            self,
            AppStatus::Ready
                | AppStatus::FinishedSuccess
                | AppStatus::FinishedError
                | AppStatus::Interrupted
        )
    }
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AppStatus::Idle => "idle",
            AppStatus::CheckingTool => "checking for the sync tool",
            AppStatus::ToolNotFound => "sync tool not found",
            AppStatus::Ready => "ready",
            AppStatus::Running => "running",
            AppStatus::Interrupting => "interrupting",
            AppStatus::Interrupted => "interrupted",
            AppStatus::FinishedSuccess => "finished successfully",
            AppStatus::FinishedError => "finished with errors",
        })
    }
}

/// Payload-free "something changed, re-read the state" signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateChanged;

/// The single source of truth for the application.
///
/// Every mutation goes through a setter here, and each setter that changes
/// something sends exactly one [`StateChanged`] to the subscriber.
pub struct AppState {
    status: AppStatus,
    tool_available: bool,
    sources: Vec<PathBuf>,
    destination: Option<PathBuf>,
    options: SyncOptions,
    resume: ResumeState,
    last_error: Option<String>,
    progress: ProgressInfo,
    debug_mode: bool,
    observer: Option<Sender<StateChanged>>,
}

impl AppState {
    pub fn new(options: SyncOptions) -> Self {
        Self {
            status: AppStatus::Idle,
            tool_available: false,
            sources: Vec::new(),
            destination: None,
            options,
            resume: ResumeState::default(),
            last_error: None,
            progress: ProgressInfo::default(),
            debug_mode: false,
            observer: None,
        }
    }

    /// Replaces any previous subscription.
    pub fn subscribe(&mut self) -> Receiver<StateChanged> {
        let (tx, rx) = mpsc::channel();
        self.observer = Some(tx);
        rx
    }

    pub fn status(&self) -> AppStatus {
        self.status
    }

    pub fn tool_available(&self) -> bool {
        self.tool_available
    }

    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub fn destination(&self) -> Option<&PathBuf> {
        self.destination.as_ref()
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn resume(&self) -> &ResumeState {
        &self.resume
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub fn progress(&self) -> &ProgressInfo {
        &self.progress
    }

    pub fn debug_mode(&self) -> bool {
        self.debug_mode
    }

    pub fn set_status(&mut self, status: AppStatus) {
        if self.status == status {
            return;
        }
        self.log_change("status", &self.status, &status);
        self.status = status;
        if !status.is_error() && self.last_error.is_some() {
            self.log_change("last_error", &self.last_error, &None::<String>);
            self.last_error = None;
        }
        self.notify();
    }

    pub fn set_tool_available(&mut self, available: bool) {
        if self.tool_available == available {
            return;
        }
        self.log_change("tool_available", &self.tool_available, &available);
        self.tool_available = available;
        self.notify();
    }

    /// Stores the sources deduplicated and sorted. A different source list
    /// invalidates any resume point.
    pub fn set_sources<I>(&mut self, sources: I)
    where
        I: IntoIterator<Item = PathBuf>,
    {
        let mut sources: Vec<PathBuf> = sources.into_iter().collect();
        sources.sort();
        sources.dedup();
        if self.sources == sources {
            return;
        }
        self.log_change("sources", &self.sources, &sources);
        self.sources = sources;
        self.reset_resume_silently();
        self.notify();
    }

    pub fn set_destination(&mut self, destination: Option<PathBuf>) {
        if self.destination == destination {
            return;
        }
        self.log_change("destination", &self.destination, &destination);
        self.destination = destination;
        self.reset_resume_silently();
        self.notify();
    }

    pub fn set_options(&mut self, options: SyncOptions) {
        if self.options == options {
            return;
        }
        self.log_change("options", &self.options, &options);
        self.options = options;
        self.reset_resume_silently();
        self.notify();
    }

    pub fn set_last_error(&mut self, error: Option<String>) {
        if self.last_error == error {
            return;
        }
        self.log_change("last_error", &self.last_error, &error);
        self.last_error = error;
        self.notify();
    }

    pub fn update_progress(&mut self, update: impl FnOnce(&mut ProgressInfo)) {
        let mut progress = self.progress.clone();
        update(&mut progress);
        if progress == self.progress {
            return;
        }
        self.log_change("progress", &self.progress, &progress);
        self.progress = progress;
        self.notify();
    }

    pub fn reset_resume_state(&mut self) {
        if self.reset_resume_silently() {
            self.notify();
        }
    }

    pub fn mark_interrupted(&mut self) {
        let old = self.resume;
        if self.resume.mark_interrupted() {
            self.log_change("resume", &old, &self.resume);
            self.notify();
        }
    }

    pub fn update_completion_index(&mut self, index: usize) {
        let old = self.resume;
        if self.resume.update_completion_index(index) {
            self.log_change("resume", &old, &self.resume);
            self.notify();
        }
    }

    pub fn set_debug_mode(&mut self, enabled: bool) {
        if self.debug_mode == enabled {
            return;
        }
        self.debug_mode = enabled;
        self.log_change("debug_mode", &!enabled, &enabled);
        self.notify();
    }

    pub fn can_resume(&self) -> bool {
        self.resume.can_resume(self.sources.len())
    }

    pub fn resume_start_index(&self) -> usize {
        self.resume.resume_start_index(self.sources.len())
    }

    pub fn can_run_or_resume(&self) -> bool {
        self.check_runnable().is_ok()
    }

    pub fn check_runnable(&self) -> Result<(), RunBlocked> {
        if !self.tool_available {
            return Err(RunBlocked::ToolUnavailable);
        }
        if !self.status.accepts_run() {
            return Err(RunBlocked::Status(self.status));
        }
        if self.destination.is_none() {
            return Err(RunBlocked::NoDestination);
        }
        if self.sources.is_empty() && !self.can_resume() {
            return Err(RunBlocked::NoSources);
        }
        Ok(())
    }

    fn reset_resume_silently(&mut self) -> bool {
        let old = self.resume;
        let changed = self.resume.reset_for_new_run();
        if changed {
            self.log_change("resume", &old, &self.resume);
        }
        changed
    }

    fn log_change(&self, field: &str, old: &dyn fmt::Debug, new: &dyn fmt::Debug) {
        if self.debug_mode {
            debug!(target: "copier::state", "{field}: {old:?} -> {new:?}");
        }
    }

    fn notify(&self) {
        if let Some(observer) = &self.observer {
            let _ = observer.send(StateChanged);
        }
    }
}
