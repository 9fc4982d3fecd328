use std::env;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::ProbeError;

pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const PROBE_POLL: Duration = Duration::from_millis(25);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ToolInfo {
    /// What to launch for copies; may be a resolved full path.
    pub program: PathBuf,
    pub version: String,
}

/// Checks that the sync tool can be launched by asking it for its version.
#[derive(Clone, Debug)]
pub struct ToolProbe {
    program: PathBuf,
    timeout: Duration,
}

impl ToolProbe {
    pub fn new(program: PathBuf) -> Self {
        Self {
            program,
            timeout: PROBE_TIMEOUT,
        }
    }

    #[cfg(test)]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn check(&self) -> Result<ToolInfo, ProbeError> {
        match self.query_version(&self.program) {
            Err(ProbeError::NotFound(_)) => {
                for candidate in fallback_locations(&self.program) {
                    if candidate.is_file() {
                        info!(candidate = %candidate.display(), "trying bundled sync tool");
                        return self.query_version(&candidate);
                    }
                }
                Err(ProbeError::NotFound(self.program.clone()))
            }
            result => result,
        }
    }

    fn query_version(&self, program: &Path) -> Result<ToolInfo, ProbeError> {
        debug!(program = %program.display(), "probing sync tool");
        let mut child = Command::new(program)
            .arg("--version")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|source| match source.kind() {
                io::ErrorKind::NotFound => ProbeError::NotFound(program.to_path_buf()),
                _ => ProbeError::Io {
                    program: program.to_path_buf(),
                    source,
                },
            })?;

        // Drained while waiting so a long answer cannot fill the pipe.
        let reader = child.stdout.take().map(|mut stdout| {
            thread::spawn(move || {
                let mut output = Vec::new();
                let _ = stdout.read_to_end(&mut output);
                output
            })
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            let polled = child.try_wait().map_err(|source| ProbeError::Io {
                program: program.to_path_buf(),
                source,
            })?;
            if let Some(status) = polled {
                break status;
            }
            if Instant::now() >= deadline {
                warn!(program = %program.display(), "version probe timed out");
                let _ = child.kill();
                let _ = child.wait();
                return Err(ProbeError::TimedOut {
                    program: program.to_path_buf(),
                    timeout: self.timeout,
                });
            }
            thread::sleep(PROBE_POLL);
        };

        if !status.success() {
            return Err(ProbeError::Failed {
                program: program.to_path_buf(),
                code: status.code(),
            });
        }

        let output = reader
            .and_then(|reader| reader.join().ok())
            .unwrap_or_default();
        let output = String::from_utf8_lossy(&output);
        let version = output
            .lines()
            .map(str::trim)
            .find(|line| !line.is_empty())
            .unwrap_or("unknown version")
            .to_string();

        Ok(ToolInfo {
            program: program.to_path_buf(),
            version,
        })
    }
}

/// Git for Windows ships the sync tool under `usr\bin`; only bare program
/// names are looked up there.
fn fallback_locations(program: &Path) -> Vec<PathBuf> {
    if !cfg!(windows) || program.components().count() != 1 {
        return Vec::new();
    }
    let file_name = if program.extension().is_some() {
        program.to_path_buf()
    } else {
        program.with_extension("exe")
    };
    let var_or = |name: &str, fallback: &str| {
        env::var_os(name)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(fallback))
    };

    let mut roots = vec![
        var_or("ProgramFiles", r"C:\Program Files"),
        var_or("ProgramFiles(x86)", r"C:\Program Files (x86)"),
    ];
    if let Some(local) = env::var_os("LOCALAPPDATA") {
        roots.push(PathBuf::from(local).join("Programs"));
    }
    roots
        .into_iter()
        .map(|root| root.join("Git").join("usr").join("bin").join(&file_name))
        .collect()
}
