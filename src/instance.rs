//! Running-instance record and daemon control
//!
//! The detached overlay's pid is kept in `running_procs` in the working
//! directory. `-k` reads it back to stop that overlay.

use anyhow::{bail, Context, Result};
use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::{setsid, Pid};
use std::env;
use std::ffi::OsString;
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

use crate::constants::paths;

/// Hidden flag marking the re-spawned, detached overlay process
pub const DETACHED_FLAG: &str = "--detached";

pub struct InstanceRecord {
    path: PathBuf,
}

impl Default for InstanceRecord {
    fn default() -> Self {
        Self::at(paths::INSTANCE_RECORD)
    }
}

impl InstanceRecord {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read(&self) -> Result<Pid> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => bail!("There is no process running."),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {:?}", self.path));
            }
        };
        let pid: i32 = contents
            .trim()
            .parse()
            .with_context(|| format!("Malformed pid {:?} in {:?}", contents.trim(), self.path))?;
        if pid <= 0 {
            bail!("Malformed pid {} in {:?}", pid, self.path);
        }
        Ok(Pid::from_raw(pid))
    }

    /// Fail if the record names a live process
    pub fn check_vacant(&self) -> Result<()> {
        match self.read() {
            Ok(pid) if is_alive(pid) => bail!(
                "An overlay is already running (pid {}). Stop it with -k first.",
                pid
            ),
            _ => Ok(()),
        }
    }

    /// Record `pid`, replacing a stale record but never a live one
    pub fn claim(&self, pid: Pid) -> Result<()> {
        for _ in 0..2 {
            match OpenOptions::new().write(true).create_new(true).open(&self.path) {
                Ok(mut file) => {
                    write!(file, "{}", pid)
                        .with_context(|| format!("Failed to write pid to {:?}", self.path))?;
                    debug!(pid = %pid, path = %self.path.display(), "Recorded running instance");
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    self.check_vacant()?;
                    warn!(path = %self.path.display(), "Replacing stale instance record");
                    self.remove()?;
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Could not create {:?}", self.path));
                }
            }
        }
        bail!("Instance record {:?} keeps reappearing; another instance is starting", self.path)
    }

    pub fn remove(&self) -> Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {:?}", self.path)),
        }
    }

    /// Remove the record if it still names `pid`
    pub fn release(&self, pid: Pid) -> Result<()> {
        if matches!(self.read(), Ok(recorded) if recorded == pid) {
            self.remove()?;
            debug!(pid = %pid, "Released instance record");
        }
        Ok(())
    }
}

fn is_alive(pid: Pid) -> bool {
    // EPERM still means the process exists
    matches!(kill(pid, None), Ok(()) | Err(Errno::EPERM))
}

/// Whether `pid` runs the same executable as this process
fn is_overlay_process(pid: Pid) -> bool {
    let link = paths::PROC_EXE_FORMAT.replace("{}", &pid.to_string());
    let running = match fs::read_link(&link) {
        Ok(path) => path,
        Err(e) => {
            warn!(pid = %pid, error = ?e, "Cannot read {}, assuming it is an overlay", link);
            return true;
        }
    };
    let Ok(current) = env::current_exe() else {
        return true;
    };
    // The kernel appends " (deleted)" when the binary was replaced on disk
    let running = running.to_string_lossy();
    let running = running.strip_suffix(" (deleted)").unwrap_or(&running);
    Path::new(running).file_name() == current.file_name()
}

/// Stop the recorded overlay and delete its record
pub fn terminate(record: &InstanceRecord) -> Result<()> {
    let pid = record.read()?;

    if !is_alive(pid) {
        warn!(pid = %pid, "Recorded overlay is no longer running, removing stale record");
        return record.remove();
    }
    if !is_overlay_process(pid) {
        record.remove()?;
        bail!("Recorded pid {} is not an overlay process; removed the stale record", pid);
    }

    kill(pid, Signal::SIGTERM).context(format!("Failed to send SIGTERM to pid {}", pid))?;
    info!(pid = %pid, "Sent SIGTERM to running overlay");
    record.remove()
}

/// Re-spawn this executable detached from the terminal and record its pid.
///
/// The child gets [`DETACHED_FLAG`] followed by `args`, which may end in a
/// `--` separated image path.
/// Returns the child's pid; the caller is expected to exit.
pub fn daemonize(record: &InstanceRecord, args: impl IntoIterator<Item = OsString>) -> Result<Pid> {
    record.check_vacant()?;

    let exe = env::current_exe().context("Failed to locate own executable")?;
    let child = Command::new(&exe)
        .arg(DETACHED_FLAG)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .with_context(|| format!("Failed to spawn detached overlay from {}", exe.display()))?;

    let pid = Pid::from_raw(child.id() as i32);
    if let Err(e) = record.claim(pid) {
        if let Err(kill_err) = kill(pid, Signal::SIGTERM) {
            warn!(pid = %pid, error = %kill_err, "Failed to stop unrecorded overlay");
        }
        return Err(e);
    }
    info!(pid = %pid, "Overlay detached");
    Ok(pid)
}

/// First step of the detached child: leave the terminal's session
pub fn detach_session() -> Result<()> {
    let sid = setsid().context("Failed to create a new session")?;
    debug!(sid = %sid, "Started new session");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dead_pid() -> Pid {
        let mut child = Command::new("true").spawn().unwrap();
        let pid = Pid::from_raw(child.id() as i32);
        child.wait().unwrap();
        pid
    }

    #[test]
    fn test_read_missing_record() {
        let dir = tempfile::tempdir().unwrap();
        let record = InstanceRecord::at(dir.path().join("running_procs"));
        let err = record.read().unwrap_err();
        assert_eq!(err.to_string(), "There is no process running.");
    }

    #[test]
    fn test_terminate_without_record_fails() {
        let dir = tempfile::tempdir().unwrap();
        let record = InstanceRecord::at(dir.path().join("running_procs"));
        assert!(terminate(&record).is_err());
    }

    #[test]
    fn test_claim_writes_bare_decimal() {
        let dir = tempfile::tempdir().unwrap();
        let record = InstanceRecord::at(dir.path().join("running_procs"));

        record.claim(Pid::from_raw(4242)).unwrap();
        assert_eq!(fs::read_to_string(record.path()).unwrap(), "4242");
        assert_eq!(record.read().unwrap(), Pid::from_raw(4242));
    }

    #[test]
    fn test_claim_refuses_live_instance() {
        let dir = tempfile::tempdir().unwrap();
        let record = InstanceRecord::at(dir.path().join("running_procs"));

        record.claim(Pid::this()).unwrap();
        assert!(record.check_vacant().is_err());
        assert!(record.claim(Pid::from_raw(4242)).is_err());
        assert_eq!(record.read().unwrap(), Pid::this());
    }

    #[test]
    fn test_claim_replaces_stale_record() {
        let dir = tempfile::tempdir().unwrap();
        let record = InstanceRecord::at(dir.path().join("running_procs"));

        fs::write(record.path(), dead_pid().to_string()).unwrap();
        record.check_vacant().unwrap();
        record.claim(Pid::this()).unwrap();
        assert_eq!(record.read().unwrap(), Pid::this());
    }

    #[test]
    fn test_read_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let record = InstanceRecord::at(dir.path().join("running_procs"));

        fs::write(record.path(), "not a pid").unwrap();
        assert!(record.read().is_err());
        fs::write(record.path(), "-5").unwrap();
        assert!(record.read().is_err());
    }

    #[test]
    fn test_terminate_stale_record_only_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let record = InstanceRecord::at(dir.path().join("running_procs"));

        fs::write(record.path(), dead_pid().to_string()).unwrap();
        terminate(&record).unwrap();
        assert!(!record.path().exists());
    }

    #[test]
    fn test_release_only_own_record() {
        let dir = tempfile::tempdir().unwrap();
        let record = InstanceRecord::at(dir.path().join("running_procs"));

        record.claim(Pid::from_raw(4242)).unwrap();
        record.release(Pid::this()).unwrap();
        assert!(record.path().exists());

        record.release(Pid::from_raw(4242)).unwrap();
        assert!(!record.path().exists());
    }

    #[test]
    fn test_own_process_is_recognised() {
        assert!(is_overlay_process(Pid::this()));
        assert!(is_alive(Pid::this()));
        assert!(!is_alive(dead_pid()));
    }
}
