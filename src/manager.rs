use std::path::PathBuf;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::time::Duration;

use tracing::{error, info};

use crate::command::CommandBuilder;
use crate::copy_request::CopyRequest;
use crate::error::RunBlocked;
use crate::events::{LogLevel, RunnerEvent};
use crate::progress::TransferStats;
use crate::runner::ProcessRunner;
use crate::state::AppState;

/// How often the control side drains the runner's event channel.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Debug, PartialEq)]
pub enum ManagerNotice {
    Log { level: LogLevel, message: String },
    Progress(ProgressUpdate),
    /// `success` is false whenever the batch was interrupted.
    Finished { success: bool, interrupted: bool },
}

#[derive(Clone, Debug, PartialEq)]
pub enum ProgressUpdate {
    Item {
        index: usize,
        total: usize,
        name: Option<PathBuf>,
    },
    Transfer(TransferStats),
}

/// One batch run: the runner plus the receiving end of its channel.
struct RunnerSession {
    runner: ProcessRunner,
    events: Receiver<RunnerEvent>,
    sources: Vec<PathBuf>,
}

enum Outcome {
    Finished(bool),
    Vanished,
}

pub struct ProcessManager {
    program: PathBuf,
    builder: CommandBuilder,
    session: Option<RunnerSession>,
    polling: bool,
    notices: Vec<ManagerNotice>,
}

impl ProcessManager {
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            builder: CommandBuilder,
            session: None,
            polling: false,
            notices: Vec::new(),
        }
    }

    pub fn set_program(&mut self, program: PathBuf) {
        self.program = program;
    }

    pub fn is_running(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|session| session.runner.is_running())
    }

    /// True from `start_run` until the batch's finish has been drained.
    pub fn has_session(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_polling(&self) -> bool {
        self.polling
    }

    pub fn take_notices(&mut self) -> Vec<ManagerNotice> {
        std::mem::take(&mut self.notices)
    }

    /// Starts a fresh batch, or resumes the halted one when the resume
    /// record in `state` allows it.
    pub fn start_run(&mut self, state: &mut AppState, request: CopyRequest) -> Result<(), RunBlocked> {
        if self.session.is_some() {
            self.log(LogLevel::Warning, "A batch is already running.");
            return Err(RunBlocked::Busy);
        }

        let total = request.sources.len();
        let is_resuming = state.resume().can_resume(total);
        let start_index = state.resume().resume_start_index(total);

        self.log(LogLevel::Info, "-".repeat(20));
        if is_resuming {
            self.log(
                LogLevel::Info,
                format!("Resuming sync from source {}/{}...", start_index + 1, total),
            );
        } else {
            state.reset_resume_state();
            self.log(LogLevel::Info, format!("Starting sync for {total} source(s)..."));
        }

        let args = self.builder.build(&request.options);
        self.log(LogLevel::Info, format!("Using effective options: {}", args.join(" ")));
        info!(total, start_index, resuming = is_resuming, "starting batch");

        let (tx, rx) = mpsc::channel();
        let mut runner = ProcessRunner::new(self.program.clone(), tx);
        runner.run_all(request.sources.clone(), request.destination, start_index, args);

        self.session = Some(RunnerSession {
            runner,
            events: rx,
            sources: request.sources,
        });
        self.polling = true;
        Ok(())
    }

    /// Returns whether a live worker received the request.
    pub fn request_interrupt(&mut self) -> bool {
        if !self.is_running() {
            self.log(
                LogLevel::Warning,
                "No sync process is currently running to interrupt.",
            );
            return false;
        }
        self.log(LogLevel::Warning, "Sending interrupt request...");
        if let Some(session) = &self.session {
            session.runner.interrupt();
        }
        true
    }

    /// Drains everything queued by the runner. A `Finished` event ends the
    /// session; anything queued behind it is dropped with the session.
    pub fn poll(&mut self, state: &mut AppState) {
        if !self.polling {
            return;
        }
        let Some(session) = &self.session else {
            self.polling = false;
            return;
        };

        // Checked before draining: a worker that had already exited has
        // queued everything it will ever send.
        let worker_gone = !session.runner.is_running();
        let outcome = loop {
            match session.events.try_recv() {
                Ok(RunnerEvent::Finished { success }) => break Some(Outcome::Finished(success)),
                Ok(event) => route(&mut self.notices, state, &session.sources, event),
                Err(TryRecvError::Empty) if worker_gone => break Some(Outcome::Vanished),
                Err(TryRecvError::Empty) => break None,
                Err(TryRecvError::Disconnected) => break Some(Outcome::Vanished),
            }
        };
        let interrupted = session.runner.was_interrupted();

        match outcome {
            None => {}
            Some(Outcome::Finished(success)) => self.finish(state, success, interrupted),
            Some(Outcome::Vanished) => {
                error!("runner channel closed without a finish event");
                self.log(
                    LogLevel::Error,
                    "Internal error: the sync worker stopped without reporting completion.",
                );
                self.finish(state, false, interrupted);
            }
        }
    }

    fn finish(&mut self, state: &mut AppState, success: bool, interrupted: bool) {
        self.polling = false;
        self.session = None;

        if interrupted {
            self.log(LogLevel::Warning, "Sync batch interrupted.");
        } else if success {
            self.log(LogLevel::Success, "Sync batch finished successfully.");
        } else {
            self.log(LogLevel::Error, "Sync batch finished with errors.");
        }

        let success = success && !interrupted;
        if success {
            state.reset_resume_state();
        } else {
            state.mark_interrupted();
        }
        info!(success, interrupted, resume = ?state.resume(), "batch session closed");
        self.notices.push(ManagerNotice::Finished {
            success,
            interrupted,
        });
    }

    fn log(&mut self, level: LogLevel, message: impl Into<String>) {
        self.notices.push(ManagerNotice::Log {
            level,
            message: message.into(),
        });
    }
}

fn route(notices: &mut Vec<ManagerNotice>, state: &mut AppState, sources: &[PathBuf], event: RunnerEvent) {
    match event {
        RunnerEvent::Log {
            level: LogLevel::Progress,
            text,
        } => {
            if let Some(stats) = TransferStats::parse(&text) {
                notices.push(ManagerNotice::Progress(ProgressUpdate::Transfer(stats)));
            }
        }
        RunnerEvent::Log { level, text } => notices.push(ManagerNotice::Log {
            level,
            message: text,
        }),
        RunnerEvent::Progress { index, total } => {
            // Reaching item `index` means every item before it is done.
            if let Some(done) = index.checked_sub(1) {
                state.update_completion_index(done);
            }
            notices.push(ManagerNotice::Progress(ProgressUpdate::Item {
                index,
                total,
                name: sources.get(index).cloned(),
            }));
        }
        RunnerEvent::Error(message) => notices.push(ManagerNotice::Log {
            level: LogLevel::Error,
            message,
        }),
        RunnerEvent::Finished { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::SyncOptions;
    use crate::resume::ResumeState;
    use std::thread;

    #[test]
    fn interrupt_without_a_run_only_warns() {
        let mut state = AppState::new(SyncOptions::default());
        let changes = state.subscribe();
        let mut manager = ProcessManager::new(PathBuf::from("rsync"));

        assert!(!manager.request_interrupt());

        let notices = manager.take_notices();
        assert_eq!(notices.len(), 1);
        assert!(matches!(notices[0], ManagerNotice::Log { level: LogLevel::Warning, .. }));
        assert_eq!(changes.try_iter().count(), 0);
        assert!(!manager.is_running());
    }

    #[test]
    fn dead_worker_closes_the_session() {
        let mut state = AppState::new(SyncOptions::default());
        let mut manager = ProcessManager::new(PathBuf::from("rsync"));
        let (tx, rx) = mpsc::channel();
        // The runner holds a sender on the drained channel, so the channel
        // never disconnects; its worker died after reporting item 0.
        let mut runner = ProcessRunner::new(PathBuf::from("rsync"), tx.clone());
        runner.attach_worker(thread::spawn(move || {
            tx.send(RunnerEvent::Progress { index: 0, total: 2 }).unwrap();
            panic!("worker died");
        }));
        while runner.is_running() {
            thread::sleep(Duration::from_millis(5));
        }
        manager.session = Some(RunnerSession {
            runner,
            events: rx,
            sources: vec![PathBuf::from("/a"), PathBuf::from("/b")],
        });
        manager.polling = true;

        manager.poll(&mut state);

        let notices = manager.take_notices();
        assert!(matches!(
            notices.first(),
            Some(ManagerNotice::Progress(ProgressUpdate::Item { index: 0, .. }))
        ));
        assert_eq!(
            notices.last(),
            Some(&ManagerNotice::Finished {
                success: false,
                interrupted: false
            })
        );
        assert!(!manager.has_session());
        assert!(!manager.is_polling());
        assert!(state.resume().was_interrupted());
    }

    #[test]
    fn live_worker_keeps_the_session_open_while_quiet() {
        let mut state = AppState::new(SyncOptions::default());
        let mut manager = ProcessManager::new(PathBuf::from("rsync"));
        let (tx, rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let mut runner = ProcessRunner::new(PathBuf::from("rsync"), tx);
        runner.attach_worker(thread::spawn(move || {
            let _ = release_rx.recv();
        }));
        manager.session = Some(RunnerSession {
            runner,
            events: rx,
            sources: Vec::new(),
        });
        manager.polling = true;

        manager.poll(&mut state);
        assert!(manager.has_session());
        assert!(manager.take_notices().is_empty());

        assert!(manager.request_interrupt());
        drop(release_tx);
    }

    #[test]
    fn events_after_finish_are_not_processed() {
        let mut state = AppState::new(SyncOptions::default());
        let mut manager = ProcessManager::new(PathBuf::from("rsync"));
        let (runner_tx, _runner_rx) = mpsc::channel();
        let (tx, rx) = mpsc::channel();
        tx.send(RunnerEvent::Finished { success: true }).unwrap();
        tx.send(RunnerEvent::Progress { index: 3, total: 5 }).unwrap();
        manager.session = Some(RunnerSession {
            runner: ProcessRunner::new(PathBuf::from("rsync"), runner_tx),
            events: rx,
            sources: Vec::new(),
        });
        manager.polling = true;

        manager.poll(&mut state);

        let notices = manager.take_notices();
        assert!(!notices.iter().any(|n| matches!(n, ManagerNotice::Progress(_))));
        assert_eq!(*state.resume(), ResumeState::default());
    }

    #[cfg(unix)]
    mod process {
        use super::*;
        use crate::test_support::{Fixture, fake_tool};
        use std::thread;
        use std::time::Instant;

        fn state_for(fixture: &Fixture, sources: &[PathBuf]) -> AppState {
            let mut state = AppState::new(SyncOptions::recommended());
            state.set_sources(sources.to_vec());
            state.set_destination(Some(fixture.dest.clone()));
            state
        }

        fn request(state: &AppState) -> CopyRequest {
            CopyRequest {
                sources: state.sources().to_vec(),
                destination: state.destination().cloned().unwrap(),
                options: *state.options(),
            }
        }

        fn start(manager: &mut ProcessManager, state: &mut AppState) -> Result<(), RunBlocked> {
            let request = request(state);
            manager.start_run(state, request)
        }

        fn poll_until<F>(manager: &mut ProcessManager, state: &mut AppState, mut done: F) -> Vec<ManagerNotice>
        where
            F: FnMut(&ManagerNotice) -> bool,
        {
            let deadline = Instant::now() + Duration::from_secs(15);
            let mut seen = Vec::new();
            loop {
                manager.poll(state);
                let batch = manager.take_notices();
                let hit = batch.iter().any(&mut done);
                seen.extend(batch);
                if hit {
                    return seen;
                }
                assert!(Instant::now() < deadline, "timed out, saw {seen:?}");
                thread::sleep(Duration::from_millis(20));
            }
        }

        fn run_to_end(manager: &mut ProcessManager, state: &mut AppState) -> Vec<ManagerNotice> {
            poll_until(manager, state, |n| matches!(n, ManagerNotice::Finished { .. }))
        }

        fn item_indexes(notices: &[ManagerNotice]) -> Vec<usize> {
            notices
                .iter()
                .filter_map(|n| match n {
                    ManagerNotice::Progress(ProgressUpdate::Item { index, .. }) => Some(*index),
                    _ => None,
                })
                .collect()
        }

        #[test]
        fn interrupted_batch_resumes_after_last_finished_item() {
            let fixture = Fixture::new();
            fixture.hold();
            let sources = [fixture.source("a"), fixture.source("b"), fixture.source("c__slow__")];
            let mut state = state_for(&fixture, &sources);
            let mut manager = ProcessManager::new(fake_tool().to_path_buf());

            start(&mut manager, &mut state).unwrap();
            assert!(manager.is_polling());
            poll_until(&mut manager, &mut state, |n| {
                matches!(n, ManagerNotice::Progress(ProgressUpdate::Item { index: 2, .. }))
            });
            manager.request_interrupt();
            let notices = run_to_end(&mut manager, &mut state);

            assert_eq!(
                notices.last(),
                Some(&ManagerNotice::Finished {
                    success: false,
                    interrupted: true
                })
            );
            assert!(state.can_resume());
            assert_eq!(state.resume_start_index(), 2);

            fixture.release();
            start(&mut manager, &mut state).unwrap();
            let notices = run_to_end(&mut manager, &mut state);

            assert_eq!(item_indexes(&notices), vec![2]);
            assert!(notices.iter().any(|n| matches!(
                n,
                ManagerNotice::Log { message, .. } if message.contains("Resuming sync from source 3/3")
            )));
            assert_eq!(
                notices.last(),
                Some(&ManagerNotice::Finished {
                    success: true,
                    interrupted: false
                })
            );
            assert_eq!(fixture.ledger(), vec!["a", "b", "c__slow__"]);
            assert_eq!(*state.resume(), ResumeState::default());
        }

        #[test]
        fn failed_item_keeps_resume_point_and_stops() {
            let fixture = Fixture::new();
            let sources = [fixture.source("a"), fixture.source("b__fail__"), fixture.source("c")];
            let mut state = state_for(&fixture, &sources);
            let mut manager = ProcessManager::new(fake_tool().to_path_buf());

            start(&mut manager, &mut state).unwrap();
            let notices = run_to_end(&mut manager, &mut state);

            assert_eq!(
                notices.last(),
                Some(&ManagerNotice::Finished {
                    success: false,
                    interrupted: false
                })
            );
            assert_eq!(item_indexes(&notices), vec![0, 1]);
            assert_eq!(state.resume_start_index(), 1);
            assert_eq!(fixture.ledger(), vec!["a"]);
            assert!(notices.iter().any(|n| matches!(n, ManagerNotice::Log { level: LogLevel::Error, .. })));
        }

        #[test]
        fn missing_source_does_not_fail_the_batch() {
            let fixture = Fixture::new();
            let sources = [fixture.source("a"), fixture.missing("b"), fixture.source("c")];
            let mut state = state_for(&fixture, &sources);
            let mut manager = ProcessManager::new(fake_tool().to_path_buf());

            start(&mut manager, &mut state).unwrap();
            let notices = run_to_end(&mut manager, &mut state);

            assert_eq!(
                notices.last(),
                Some(&ManagerNotice::Finished {
                    success: true,
                    interrupted: false
                })
            );
            assert!(notices.iter().any(|n| matches!(
                n,
                ManagerNotice::Progress(ProgressUpdate::Transfer(stats)) if stats.percent == 100
            )));
            assert!(!notices.iter().any(|n| matches!(n, ManagerNotice::Log { level: LogLevel::Progress, .. })));
            assert_eq!(fixture.ledger(), vec!["a", "c"]);
            assert_eq!(*state.resume(), ResumeState::default());
        }

        #[test]
        fn second_start_is_rejected_while_a_session_is_open() {
            let fixture = Fixture::new();
            fixture.hold();
            let sources = [fixture.source("x__slow__")];
            let mut state = state_for(&fixture, &sources);
            let mut manager = ProcessManager::new(fake_tool().to_path_buf());

            start(&mut manager, &mut state).unwrap();
            assert!(manager.is_running());
            assert_eq!(
                start(&mut manager, &mut state),
                Err(RunBlocked::Busy)
            );

            manager.request_interrupt();
            let notices = run_to_end(&mut manager, &mut state);
            assert!(notices.iter().any(|n| matches!(
                n,
                ManagerNotice::Log { message, .. } if message.contains("already running")
            )));
            assert!(!manager.has_session());
        }

        #[test]
        fn fresh_run_discards_a_stale_resume_record() {
            let fixture = Fixture::new();
            let sources = [fixture.source("a"), fixture.source("b")];
            let mut state = state_for(&fixture, &sources);
            // last item already done: nothing to resume, so start over
            state.update_completion_index(1);
            state.mark_interrupted();
            let mut manager = ProcessManager::new(fake_tool().to_path_buf());

            start(&mut manager, &mut state).unwrap();
            assert_eq!(*state.resume(), ResumeState::default());
            let notices = run_to_end(&mut manager, &mut state);
            assert_eq!(item_indexes(&notices), vec![0, 1]);
            assert_eq!(fixture.ledger(), vec!["a", "b"]);
        }
    }
}
