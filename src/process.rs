//! Process liveness checks for the advisory service lock.

/// Check if a process with the given PID is alive.
///
/// Uses `kill(pid, None)` (the null signal) so that `EPERM` (exists, not
/// ours) is distinguished from `ESRCH` (no such process).
#[cfg(unix)]
pub fn is_process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let pid_i32 = match i32::try_from(pid) {
        Ok(v) => v,
        // Larger than any real PID
        Err(_) => return false,
    };

    match kill(Pid::from_raw(pid_i32), None) {
        Ok(()) => true,
        Err(Errno::EPERM) => true,
        Err(Errno::ESRCH) => false,
        Err(_) => false,
    }
}

/// Without a process-existence query any non-zero PID is assumed alive.
#[cfg(not(unix))]
pub fn is_process_alive(pid: u32) -> bool {
    pid != 0
}
