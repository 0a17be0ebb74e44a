//! Best-effort OS scheduling hints: core count, affinity, realtime class, nice.
//!
//! Every call is advisory. Failures are logged and reported as `false`; the
//! caller keeps running under default OS scheduling.

use std::thread::JoinHandle;

use tracing::{debug, warn};

use crate::types::CoreId;

/// SCHED_FIFO priority used when none is configured (valid range 1-99).
pub const DEFAULT_REALTIME_PRIORITY: i32 = 50;

/// Number of online processing units.
pub fn cpu_count() -> usize {
    #[cfg(unix)]
    {
        let online = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
        if online > 0 {
            return online as usize;
        }
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// OS-level identity of a thread, used as an affinity target.
#[derive(Clone, Copy, Debug)]
pub struct ThreadHandle {
    #[cfg(unix)]
    raw: libc::pthread_t,
}

impl ThreadHandle {
    /// The calling thread.
    pub fn current() -> Self {
        #[cfg(unix)]
        {
            Self {
                raw: unsafe { libc::pthread_self() },
            }
        }
        #[cfg(not(unix))]
        {
            Self {}
        }
    }

    /// The thread behind a join handle.
    pub fn of<T>(handle: &JoinHandle<T>) -> Self {
        #[cfg(unix)]
        {
            use std::os::unix::thread::JoinHandleExt;
            Self {
                raw: handle.as_pthread_t() as libc::pthread_t,
            }
        }
        #[cfg(not(unix))]
        {
            let _ = handle;
            Self {}
        }
    }
}

/// Scheduling hints a thread owner can request from the OS.
pub trait SchedulingHints: Send + Sync {
    fn cpu_count(&self) -> usize;

    /// Restrict `thread` to `cores`. An empty slice means "no restriction" and
    /// succeeds without touching the OS.
    fn set_affinity(&self, thread: ThreadHandle, cores: &[CoreId]) -> bool;

    fn set_current_affinity(&self, cores: &[CoreId]) -> bool {
        self.set_affinity(ThreadHandle::current(), cores)
    }

    /// Cores the calling thread may currently run on, when the platform can tell.
    fn current_affinity(&self) -> Option<Vec<CoreId>> {
        None
    }

    /// Move the calling thread into the realtime (FIFO) class.
    fn set_realtime_scheduling(&self, priority: i32) -> bool;

    /// Move the calling thread back to the default time-sharing class.
    fn set_normal_scheduling(&self) -> bool;

    /// Set the absolute nice value (-20 highest weight, 19 lowest).
    fn set_niceness(&self, value: i32) -> bool;
}

/// Hints backed by the host OS through libc.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemHints;

impl SchedulingHints for SystemHints {
    fn cpu_count(&self) -> usize {
        cpu_count()
    }

    fn set_affinity(&self, thread: ThreadHandle, cores: &[CoreId]) -> bool {
        if cores.is_empty() {
            return true;
        }
        let cpus = self.cpu_count();
        if let Some(&core) = cores.iter().find(|&&core| core >= cpus) {
            warn!(core, cpus, "affinity hint ignored: core out of range");
            return false;
        }
        match platform::set_affinity(thread, cores) {
            Ok(()) => {
                debug!(?cores, "affinity set");
                true
            }
            Err(err) => {
                warn!(?cores, error = %err, "affinity hint ignored");
                false
            }
        }
    }

    fn current_affinity(&self) -> Option<Vec<CoreId>> {
        platform::current_affinity()
    }

    fn set_realtime_scheduling(&self, priority: i32) -> bool {
        match platform::set_fifo(priority) {
            Ok(()) => {
                debug!(priority, "realtime scheduling set");
                true
            }
            Err(err) => {
                warn!(priority, error = %err, "realtime hint ignored (privilege may be required)");
                false
            }
        }
    }

    fn set_normal_scheduling(&self) -> bool {
        match platform::set_other() {
            Ok(()) => true,
            Err(err) => {
                warn!(error = %err, "normal scheduling hint ignored");
                false
            }
        }
    }

    fn set_niceness(&self, value: i32) -> bool {
        match platform::set_nice(value) {
            Ok(()) => {
                debug!(value, "nice value set");
                true
            }
            Err(err) => {
                warn!(value, error = %err, "nice hint ignored");
                false
            }
        }
    }
}

#[cfg(target_os = "linux")]
mod platform {
    use std::io;
    use std::mem;

    use super::ThreadHandle;
    use crate::types::CoreId;

    const SET_CAPACITY: usize = libc::CPU_SETSIZE as usize;

    pub(super) fn set_affinity(thread: ThreadHandle, cores: &[CoreId]) -> io::Result<()> {
        if cores.iter().any(|&core| core >= SET_CAPACITY) {
            return Err(io::Error::from_raw_os_error(libc::EINVAL));
        }
        let mut set: libc::cpu_set_t = unsafe { mem::zeroed() };
        unsafe { libc::CPU_ZERO(&mut set) };
        for &core in cores {
            unsafe { libc::CPU_SET(core, &mut set) };
        }
        let rc = unsafe {
            libc::pthread_setaffinity_np(thread.raw, mem::size_of::<libc::cpu_set_t>(), &set)
        };
        // pthread functions return the error code instead of setting errno.
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        Ok(())
    }

    pub(super) fn current_affinity() -> Option<Vec<CoreId>> {
        let mut set: libc::cpu_set_t = unsafe { mem::zeroed() };
        let rc = unsafe { libc::sched_getaffinity(0, mem::size_of::<libc::cpu_set_t>(), &mut set) };
        if rc != 0 {
            return None;
        }
        Some(
            (0..SET_CAPACITY)
                .filter(|&core| unsafe { libc::CPU_ISSET(core, &set) })
                .collect(),
        )
    }

    fn set_policy(policy: libc::c_int, priority: i32) -> io::Result<()> {
        let mut param: libc::sched_param = unsafe { mem::zeroed() };
        param.sched_priority = priority;
        let rc = unsafe { libc::sched_setscheduler(0, policy, &param) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub(super) fn set_fifo(priority: i32) -> io::Result<()> {
        set_policy(libc::SCHED_FIFO, priority)
    }

    pub(super) fn set_other() -> io::Result<()> {
        set_policy(libc::SCHED_OTHER, 0)
    }

    pub(super) fn set_nice(value: i32) -> io::Result<()> {
        // On Linux PRIO_PROCESS with who=0 targets the calling thread.
        let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, value) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }
}

#[cfg(not(target_os = "linux"))]
mod platform {
    use std::io;

    use super::ThreadHandle;
    use crate::types::CoreId;

    fn unsupported(what: &str) -> io::Error {
        io::Error::new(io::ErrorKind::Unsupported, format!("{what} not supported on this platform"))
    }

    pub(super) fn set_affinity(_thread: ThreadHandle, _cores: &[CoreId]) -> io::Result<()> {
        Err(unsupported("thread affinity"))
    }

    pub(super) fn current_affinity() -> Option<Vec<CoreId>> {
        None
    }

    pub(super) fn set_fifo(_priority: i32) -> io::Result<()> {
        Err(unsupported("realtime scheduling"))
    }

    pub(super) fn set_other() -> io::Result<()> {
        Err(unsupported("scheduling policy changes"))
    }

    #[cfg(unix)]
    pub(super) fn set_nice(value: i32) -> io::Result<()> {
        let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, 0, value) };
        if rc != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    #[cfg(not(unix))]
    pub(super) fn set_nice(_value: i32) -> io::Result<()> {
        Err(unsupported("nice values"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn reports_at_least_one_cpu() {
        assert!(cpu_count() >= 1);
        assert_eq!(SystemHints.cpu_count(), cpu_count());
    }

    #[test]
    fn empty_core_set_is_a_successful_no_op() {
        let hints = SystemHints;
        let before = hints.current_affinity();
        assert!(hints.set_current_affinity(&[]));
        assert_eq!(hints.current_affinity(), before);
    }

    #[test]
    fn out_of_range_core_is_rejected() {
        let hints = SystemHints;
        assert!(!hints.set_current_affinity(&[999_999]));
        assert!(!hints.set_current_affinity(&[0, cpu_count()]));
    }

    #[test]
    fn invalid_realtime_priority_is_not_fatal() {
        // SCHED_FIFO rejects priority 0 whatever the caller's privilege.
        let accepted = thread::spawn(|| SystemHints.set_realtime_scheduling(0))
            .join()
            .expect("hint thread panicked");
        assert!(!accepted);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn pinning_a_spawned_thread_to_its_own_cores() {
        let hints = SystemHints;
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let handle = thread::spawn(move || {
            let _ = release_rx.recv();
        });
        let allowed = hints.current_affinity().expect("affinity readable on linux");
        assert!(hints.set_affinity(ThreadHandle::of(&handle), &allowed[..1]));
        release_tx.send(()).expect("release pinned thread");
        handle.join().expect("pinned thread panicked");
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn lowering_priority_needs_no_privilege() {
        let ok = thread::spawn(|| {
            SystemHints.set_niceness(19)
        })
        .join()
        .expect("hint thread panicked");
        assert!(ok);
    }
}
