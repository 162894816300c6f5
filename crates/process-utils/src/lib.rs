//! Small process-related helpers shared across the workspace.

use std::ffi::OsStr;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

impl NoWindowExt for std::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `std::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
pub fn std_command(program: impl AsRef<OsStr>) -> std::process::Command {
    let mut cmd = std::process::Command::new(program);
    cmd.no_window();
    cmd
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a `tokio::process::Command` with `CREATE_NO_WINDOW` applied on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd
}

/// Puts a child in its own session/process group before exec, on Unix.
///
/// Supervisors that manage several long-lived children per logical unit
/// should call this so a single signal to the group reaches every
/// descendant the child may itself have spawned (e.g. a shell wrapper).
#[cfg(all(unix, feature = "tokio"))]
pub trait ProcessGroupExt {
    fn new_process_group(&mut self) -> &mut Self;
}

#[cfg(all(unix, feature = "tokio"))]
impl ProcessGroupExt for tokio::process::Command {
    fn new_process_group(&mut self) -> &mut Self {
        unsafe {
            self.pre_exec(|| {
                if libc::setsid() == -1 {
                    return Err(std::io::Error::last_os_error());
                }
                Ok(())
            });
        }
        self
    }
}

#[cfg(all(unix, feature = "tokio"))]
use std::os::unix::process::CommandExt;

/// Sends `signal` to the process group led by `pid`. `pid` must be the
/// leader's pid (the child itself, given it was started with
/// [`ProcessGroupExt::new_process_group`]).
#[cfg(unix)]
pub fn signal_group(pid: u32, signal: i32) -> std::io::Result<()> {
    let rc = unsafe { libc::kill(-(pid as i32), signal) };
    if rc == -1 {
        let err = std::io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::ESRCH) {
            return Ok(());
        }
        return Err(err);
    }
    Ok(())
}

#[cfg(unix)]
pub const SIGTERM: i32 = libc::SIGTERM;
#[cfg(unix)]
pub const SIGKILL: i32 = libc::SIGKILL;
