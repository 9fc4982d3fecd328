use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::events::{LogLevel, RunnerEvent};

/// How long a stopped tool gets to exit on its own before it is killed.
pub const TERMINATE_GRACE: Duration = Duration::from_secs(2);
const LINE_WAIT: Duration = Duration::from_millis(100);
const EXIT_POLL: Duration = Duration::from_millis(20);

/// Runs one sync-tool invocation per source on a background thread and
/// reports everything through the event channel it was built with.
pub struct ProcessRunner {
    worker: Worker,
    handle: Option<JoinHandle<()>>,
}

#[derive(Clone)]
struct Worker {
    program: PathBuf,
    events: Sender<RunnerEvent>,
    interrupted: Arc<AtomicBool>,
    child: Arc<Mutex<Option<Child>>>,
}

impl ProcessRunner {
    pub fn new(program: PathBuf, events: Sender<RunnerEvent>) -> Self {
        Self {
            worker: Worker {
                program,
                events,
                interrupted: Arc::new(AtomicBool::new(false)),
                child: Arc::new(Mutex::new(None)),
            },
            handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    pub fn was_interrupted(&self) -> bool {
        self.worker.is_interrupted()
    }

    #[cfg(test)]
    pub(crate) fn attach_worker(&mut self, handle: JoinHandle<()>) {
        self.handle = Some(handle);
    }

    /// Starts copying `sources[start_index..]` into `destination` and
    /// returns immediately. Exactly one `Finished` event closes the batch.
    pub fn run_all(
        &mut self,
        sources: Vec<PathBuf>,
        destination: PathBuf,
        start_index: usize,
        base_args: Vec<String>,
    ) {
        if self.is_running() {
            warn!("rejected run request, a batch is already running");
            self.worker
                .send(RunnerEvent::log(LogLevel::Warning, "A batch is already running."));
            return;
        }
        self.worker.interrupted.store(false, Ordering::SeqCst);
        self.worker.send(RunnerEvent::log(
            LogLevel::Info,
            "Sync process started in background thread.",
        ));

        let worker = self.worker.clone();
        let spawned = thread::Builder::new()
            .name("copier-runner".into())
            .spawn(move || {
                let success = worker.run_batch(&sources, &destination, start_index, &base_args);
                worker.lock_child().take();
                info!(success, "batch finished");
                worker.send(RunnerEvent::Finished { success });
            });

        match spawned {
            Ok(handle) => self.handle = Some(handle),
            Err(err) => {
                self.worker
                    .send(RunnerEvent::Error(format!("Could not start the background worker: {err}")));
                self.worker.send(RunnerEvent::Finished { success: false });
            }
        }
    }

    /// Asks the running batch to stop. The tool gets a graceful signal
    /// here; the worker escalates to a kill if it does not exit in time.
    pub fn interrupt(&self) {
        if !self.is_running() {
            info!("interrupt ignored, nothing is running");
            self.worker.send(RunnerEvent::log(
                LogLevel::Info,
                "No active sync process to interrupt or already finished.",
            ));
            return;
        }

        self.worker.send(RunnerEvent::log(
            LogLevel::Warning,
            "Interrupt signal received. Attempting to stop the sync tool...",
        ));
        self.worker.interrupted.store(true, Ordering::SeqCst);

        let mut guard = self.worker.lock_child();
        let signalled = match guard.as_mut() {
            Some(child) => match child.try_wait() {
                Ok(None) => Some(request_termination(child)),
                _ => None,
            },
            None => None,
        };
        drop(guard);

        match signalled {
            Some(Ok(())) => self.worker.send(RunnerEvent::log(
                LogLevel::Info,
                "Sent termination signal to the sync tool.",
            )),
            Some(Err(err)) => self
                .worker
                .send(RunnerEvent::Error(format!("Error interrupting process: {err}"))),
            None => self.worker.send(RunnerEvent::log(
                LogLevel::Info,
                "No sync tool is running right now; the batch stops before the next item.",
            )),
        }
    }
}

impl Worker {
    fn send(&self, event: RunnerEvent) {
        debug!(?event, "runner event");
        let _ = self.events.send(event);
    }

    fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    fn lock_child(&self) -> MutexGuard<'_, Option<Child>> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn run_batch(
        &self,
        sources: &[PathBuf],
        destination: &Path,
        start_index: usize,
        base_args: &[String],
    ) -> bool {
        let total = sources.len();
        info!(start_index, total, destination = %destination.display(), "batch started");

        for (index, source) in sources.iter().enumerate().skip(start_index) {
            // Progress goes out first so a stop between items still records
            // that everything before `index` is done.
            self.send(RunnerEvent::Progress { index, total });

            if self.is_interrupted() {
                self.send(RunnerEvent::log(
                    LogLevel::Warning,
                    "Sync run cancelled due to interrupt.",
                ));
                return false;
            }

            if !source.exists() {
                self.send(RunnerEvent::log(
                    LogLevel::Warning,
                    format!("Source path does not exist: {}. Skipping.", source.display()),
                ));
                continue;
            }

            if !self.run_item(source, destination, base_args, index, total) {
                if self.is_interrupted() {
                    self.send(RunnerEvent::log(
                        LogLevel::Warning,
                        "Stopping further execution due to interrupt.",
                    ));
                } else {
                    self.send(RunnerEvent::Error(format!(
                        "Execution failed for {}. Stopping.",
                        source.display()
                    )));
                }
                return false;
            }
        }
        true
    }

    fn run_item(
        &self,
        source: &Path,
        destination: &Path,
        base_args: &[String],
        index: usize,
        total: usize,
    ) -> bool {
        let position = format!("({}/{})", index + 1, total);
        self.send(RunnerEvent::log(
            LogLevel::Info,
            format!(
                "Running command {position}: {}",
                render_command(&self.program, base_args, source, destination)
            ),
        ));

        let mut command = Command::new(&self.program);
        command
            .args(base_args)
            .arg(source)
            .arg(destination)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let mut child = match command.spawn() {
            Ok(child) => child,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                self.send(RunnerEvent::Error(format!(
                    "'{}' command not found. Is it installed and in your PATH?",
                    self.program.display()
                )));
                return false;
            }
            Err(err) => {
                self.send(RunnerEvent::Error(format!(
                    "Could not start command {position}: {err}"
                )));
                return false;
            }
        };
        info!(pid = child.id(), source = %source.display(), "sync tool launched");

        let lines = stream_lines(child.stdout.take(), child.stderr.take());
        *self.lock_child() = Some(child);

        loop {
            let next = lines.recv_timeout(LINE_WAIT);
            if self.is_interrupted() {
                self.send(RunnerEvent::log(
                    LogLevel::Warning,
                    format!("Sync process {position} interrupted by user."),
                ));
                let _ = self.terminate_child();
                return false;
            }
            match next {
                Ok(line) => self.send(classify_line(line)),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let exit = self.wait_for_exit();

        if self.is_interrupted() {
            self.send(RunnerEvent::log(
                LogLevel::Warning,
                format!("Sync process {position} finished after interrupt signal."),
            ));
            return false;
        }

        match exit {
            Ok(status) if status.success() => {
                self.send(RunnerEvent::log(
                    LogLevel::Success,
                    format!("Command {position} completed successfully."),
                ));
                true
            }
            Ok(status) => {
                warn!(?status, source = %source.display(), "sync tool failed");
                let reason = match status.code() {
                    Some(code) => format!("return code {code}"),
                    None => "no return code (killed by a signal)".to_string(),
                };
                self.send(RunnerEvent::Error(format!(
                    "Command {position} failed with {reason}."
                )));
                false
            }
            Err(err) => {
                self.send(RunnerEvent::Error(format!(
                    "Lost track of command {position}: {err}"
                )));
                false
            }
        }
    }

    /// Polls the child without holding the lock across waits, so an
    /// interrupt from the control thread never blocks on it.
    fn wait_for_exit(&self) -> io::Result<ExitStatus> {
        loop {
            {
                let mut guard = self.lock_child();
                let child = guard
                    .as_mut()
                    .ok_or_else(|| io::Error::other("process handle missing"))?;
                if let Some(status) = child.try_wait()? {
                    guard.take();
                    return Ok(status);
                }
            }
            if self.is_interrupted() {
                return self.terminate_child();
            }
            thread::sleep(EXIT_POLL);
        }
    }

    fn terminate_child(&self) -> io::Result<ExitStatus> {
        let mut child = self
            .lock_child()
            .take()
            .ok_or_else(|| io::Error::other("no process to stop"))?;
        if let Some(status) = child.try_wait()? {
            return Ok(status);
        }

        let _ = request_termination(&mut child);
        let deadline = Instant::now() + TERMINATE_GRACE;
        while Instant::now() < deadline {
            if let Some(status) = child.try_wait()? {
                return Ok(status);
            }
            thread::sleep(EXIT_POLL);
        }

        warn!(pid = child.id(), "sync tool ignored termination, killing it");
        self.send(RunnerEvent::log(
            LogLevel::Warning,
            "Sync tool did not terminate gracefully, forcing it to stop.",
        ));
        let _ = child.kill();
        child.wait()
    }
}

#[cfg(unix)]
fn request_termination(child: &mut Child) -> io::Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    let pid = i32::try_from(child.id()).map_err(|_| io::Error::other("pid out of range"))?;
    kill(Pid::from_raw(pid), Signal::SIGTERM).map_err(io::Error::from)
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) -> io::Result<()> {
    child.kill()
}

/// Progress redraws contain a percentage; the file-count summary lines
/// of older tool versions are excluded.
pub fn is_progress_line(line: &str) -> bool {
    line.contains('%') && !line.contains("to-check=")
}

fn classify_line(line: String) -> RunnerEvent {
    let level = if is_progress_line(&line) {
        LogLevel::Progress
    } else {
        LogLevel::Info
    };
    RunnerEvent::Log { level, text: line }
}

/// Merges stdout and stderr into one line stream.
fn stream_lines<O, E>(stdout: Option<O>, stderr: Option<E>) -> Receiver<String>
where
    O: Read + Send + 'static,
    E: Read + Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    if let Some(out) = stdout {
        spawn_reader("copier-stdout", out, tx.clone());
    }
    if let Some(err) = stderr {
        spawn_reader("copier-stderr", err, tx);
    }
    rx
}

fn spawn_reader<R>(name: &str, reader: R, tx: Sender<String>)
where
    R: Read + Send + 'static,
{
    let spawned = thread::Builder::new()
        .name(name.to_string())
        .spawn(move || for_each_line(reader, |line| tx.send(line).is_ok()));
    if let Err(err) = spawned {
        warn!(%err, "could not start output reader");
    }
}

/// Feeds trimmed, non-empty lines to `emit`, treating both `\n` and `\r`
/// as terminators. Stops early once `emit` returns false.
pub fn for_each_line<R, F>(mut reader: R, mut emit: F)
where
    R: Read,
    F: FnMut(String) -> bool,
{
    let mut buf = [0u8; 8192];
    let mut pending = Vec::new();
    loop {
        let read = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        };
        for &byte in &buf[..read] {
            if byte == b'\n' || byte == b'\r' {
                if !flush_line(&mut pending, &mut emit) {
                    return;
                }
            } else {
                pending.push(byte);
            }
        }
    }
    flush_line(&mut pending, &mut emit);
}

fn flush_line<F>(pending: &mut Vec<u8>, emit: &mut F) -> bool
where
    F: FnMut(String) -> bool,
{
    let line = String::from_utf8_lossy(pending).trim().to_string();
    pending.clear();
    line.is_empty() || emit(line)
}

fn render_command(program: &Path, base_args: &[String], source: &Path, destination: &Path) -> String {
    let mut parts = vec![shell_quote(&program.to_string_lossy())];
    parts.extend(base_args.iter().map(|arg| shell_quote(arg)));
    parts.push(shell_quote(&source.to_string_lossy()));
    parts.push(shell_quote(&destination.to_string_lossy()));
    parts.join(" ")
}

fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_@%+=:,./-".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r#"'"'"'"#))
    }
}
