//! Stage process liveness and group signalling.

/// Whether `pid` still names a process (running or zombie).
///
/// Signal 0 probes without delivering anything. A child that has been waited
/// on is gone; one that exited but was never reaped still answers.
pub fn is_process_alive(pid: u32) -> bool {
    unsafe { libc::kill(pid as i32, 0) == 0 }
}

/// SIGKILL every process in group `pgid`.
///
/// Children spawned with `process_group(0)` lead a group whose id is their
/// pid, so this reaches anything they forked that did not leave the group.
///
/// # Returns
/// * `true` - Signal delivered, or the group is already empty
/// * `false` - Delivery failed for another reason
pub fn kill_process_group(pgid: u32) -> bool {
    // pgid 0 would mean "our own group"
    if pgid == 0 {
        return false;
    }
    unsafe {
        libc::killpg(pgid as i32, libc::SIGKILL) == 0
            || std::io::Error::last_os_error().raw_os_error() == Some(libc::ESRCH)
    }
}
