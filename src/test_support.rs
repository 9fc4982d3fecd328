//! Fake sync tool and temp-dir fixtures shared by the process-level tests.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::sync::mpsc::Receiver;
use std::time::Duration;

use tempfile::TempDir;

use crate::events::RunnerEvent;

/// Copies by appending the source to `<dest>/ledger.txt`. Sources named
/// `*__fail__*` exit 23; `*__slow__*` block while `<dest>/.hold` exists.
const FAKE_TOOL: &str = r#"#!/bin/sh
if [ "$1" = "--version" ]; then
  echo "fake-sync version 3.2.7 protocol version 31"
  exit 0
fi
while [ $# -gt 2 ]; do shift; done
src="$1"
dest="$2"
case "$src" in
  *__fail__*) echo "cannot copy $src" >&2; exit 23 ;;
  *__slow__*) if [ -e "$dest/.hold" ]; then exec sleep 30; fi ;;
esac
printf 'sending incremental file list\r      1,024 100%%    1.00MB/s    0:00:00 (xfr#1, to-chk=0/1)\n'
echo "$src" >> "$dest/ledger.txt"
exit 0
"#;

const HANGING_TOOL: &str = "#!/bin/sh\nexec sleep 30\n";

/// Answers `--version` with far more than a pipe buffer holds.
const CHATTY_TOOL: &str = r#"#!/bin/sh
echo "chatty-sync version 1.0"
i=0
while [ $i -lt 4000 ]; do
  echo "build option $i: xxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxxx"
  i=$((i + 1))
done
"#;

struct Tools {
    _dir: TempDir,
    fake: PathBuf,
    hanging: PathBuf,
    chatty: PathBuf,
}

// Written once per test binary: executing a script that another thread
// still has open for writing fails with ETXTBSY.
fn tools() -> &'static Tools {
    static TOOLS: OnceLock<Tools> = OnceLock::new();
    TOOLS.get_or_init(|| {
        let dir = TempDir::new().unwrap();
        let fake = write_script(dir.path(), "fake-sync", FAKE_TOOL);
        let hanging = write_script(dir.path(), "hanging-sync", HANGING_TOOL);
        let chatty = write_script(dir.path(), "chatty-sync", CHATTY_TOOL);
        Tools {
            _dir: dir,
            fake,
            hanging,
            chatty,
        }
    })
}

fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, body).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn fake_tool() -> &'static Path {
    &tools().fake
}

pub fn hanging_tool() -> &'static Path {
    &tools().hanging
}

pub fn chatty_tool() -> &'static Path {
    &tools().chatty
}

pub struct Fixture {
    pub dir: TempDir,
    pub dest: PathBuf,
}

impl Fixture {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("dest");
        fs::create_dir(&dest).unwrap();
        Self { dir, dest }
    }

    pub fn source(&self, name: &str) -> PathBuf {
        let path = self.dir.path().join("sources").join(name);
        fs::create_dir_all(&path).unwrap();
        fs::write(path.join("file.txt"), name).unwrap();
        path
    }

    pub fn missing(&self, name: &str) -> PathBuf {
        self.dir.path().join("missing").join(name)
    }

    pub fn hold(&self) {
        fs::write(self.dest.join(".hold"), "").unwrap();
    }

    pub fn release(&self) {
        fs::remove_file(self.dest.join(".hold")).unwrap();
    }

    /// Names of the sources the fake tool copied, in order.
    pub fn ledger(&self) -> Vec<String> {
        fs::read_to_string(self.dest.join("ledger.txt"))
            .unwrap_or_default()
            .lines()
            .filter_map(|line| Path::new(line).file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect()
    }
}

pub fn collect_until_finished(rx: &Receiver<RunnerEvent>) -> Vec<RunnerEvent> {
    let mut events = Vec::new();
    loop {
        let event = rx
            .recv_timeout(Duration::from_secs(15))
            .expect("runner never finished");
        let done = matches!(event, RunnerEvent::Finished { .. });
        events.push(event);
        if done {
            return events;
        }
    }
}
