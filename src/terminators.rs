//! Stop controller (spec C8): a wall/CPU deadline plus a process-wide
//! interrupt flag, polled at generation, decode, and MIP-search boundaries.
//!
//! This module provides several implementations of the [`Terminator`] trait, including:
//! - [`InterruptTerminator`]: Responds to Ctrl-C (SIGINT) or programmatic interrupts.
//! - [`TimeOutTerminator`]: Terminates after a specified time limit.
//! - [`MultipleTerminators`]: Combines multiple terminators.
//!
//! [`StopController`] composes an [`InterruptTerminator`] and a
//! [`TimeOutTerminator`] into the single object every long-running loop
//! (OFP iteration, histogram sub-block walk, violated-constraint scan, MILP
//! callback) is expected to poll.
//!
//! # Note
//! [`InterruptTerminator`] installs a global signal handler and **can only be constructed once** per process. Attempting to create multiple instances will result in a panic.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::Status;

pub trait Terminator {
    fn initialize(&mut self) {}

    fn terminate(&mut self) -> Option<Status>;
}

/// Which clock a deadline is measured against.
///
/// Wall clock is what [`TimeOutTerminator`] actually measures; `Cpu` is
/// accepted so callers can be explicit about intent, but is implemented as
/// wall-clock elapsed time (see the open question in `SPEC_FULL.md` §C: the
/// source's CPU-vs-wall split is ambiguous at the budget boundary, and this
/// reimplementation picks wall clock consistently everywhere rather than
/// mixing the two).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ClockKind {
    #[default]
    Wall,
    Cpu,
}

/// Terminator that responds to Ctrl-C (SIGINT) or programmatic interrupts.
///
/// The first interrupt sets the flag so in-flight loops can poll and wind
/// down gracefully. A second interrupt re-raises `SIGINT` with the default
/// handler restored, terminating the process immediately, matching the
/// "one interrupt → graceful stop; two interrupts → immediate termination"
/// contract in spec.md §6.
///
/// # Note
/// Only one instance of `InterruptTerminator` can be constructed per process, as it installs a global signal handler.
/// Creating more than one will panic.
pub struct InterruptTerminator {
    interrupted: Arc<AtomicBool>,
    hits: Arc<AtomicU32>,
}

impl InterruptTerminator {
    pub fn new() -> Self {
        let interrupted = Arc::new(AtomicBool::new(false));
        let hits = Arc::new(AtomicU32::new(0));
        ctrlc::set_handler({
            let interrupted = interrupted.clone();
            let hits = hits.clone();
            move || {
                interrupted.store(true, Ordering::SeqCst);
                if hits.fetch_add(1, Ordering::SeqCst) >= 1 {
                    std::process::exit(130);
                }
            }
        })
        .expect("Error setting Ctrl-C handler");
        Self { interrupted, hits }
    }

    pub fn interrupt(&mut self) {
        self.interrupted.store(true, Ordering::SeqCst);
        self.hits.fetch_add(1, Ordering::SeqCst);
    }

    pub fn flag(&self) -> Arc<AtomicBool> {
        self.interrupted.clone()
    }
}

impl Terminator for InterruptTerminator {
    fn terminate(&mut self) -> Option<Status> {
        if self.interrupted.load(Ordering::SeqCst) {
            Some(Status::Interrupted)
        } else {
            None
        }
    }
}

/// Terminator that triggers after a specified number of seconds.
pub struct TimeOutTerminator {
    max_time_secs: u64,
    start_time: Instant,
}

impl TimeOutTerminator {
    pub fn new(max_time_secs: u64) -> Self {
        Self {
            max_time_secs,
            start_time: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    pub fn remaining(&self) -> Duration {
        Duration::from_secs(self.max_time_secs).saturating_sub(self.elapsed())
    }
}

impl Terminator for TimeOutTerminator {
    fn initialize(&mut self) {
        self.start_time = Instant::now();
    }

    fn terminate(&mut self) -> Option<Status> {
        if self.start_time.elapsed().as_secs() >= self.max_time_secs {
            Some(Status::TimeLimit)
        } else {
            None
        }
    }
}

/// Terminator that combines multiple terminators and triggers if any of them do.
pub struct MultipleTerminators {
    terminators: Vec<Box<dyn Terminator + Send>>,
}

impl MultipleTerminators {
    pub fn new(terminators: Vec<Box<dyn Terminator + Send>>) -> Self {
        Self { terminators }
    }
}

impl Terminator for MultipleTerminators {
    fn initialize(&mut self) {
        for terminator in &mut self.terminators {
            terminator.initialize();
        }
    }

    fn terminate(&mut self) -> Option<Status> {
        for terminator in &mut self.terminators {
            if let Some(status) = terminator.as_mut().terminate() {
                return Some(status);
            }
        }
        None
    }
}

/// The process-wide stop controller (spec C8): a deadline plus the
/// interrupt flag, owned for the lifetime of one engine run and shared
/// (via `Arc`) with every worker thread.
///
/// `must_stop()` is cheap (two atomic/monotonic-clock reads) and is meant
/// to be polled liberally: once per OFP iteration, once per histogram
/// sub-block, once per violated-constraint scan, and from the MILP
/// info/incumbent callbacks.
pub struct StopController {
    deadline: Instant,
    clock_kind: ClockKind,
    interrupted: Arc<AtomicBool>,
    start: Instant,
}

impl StopController {
    pub fn new(budget: Duration, clock_kind: ClockKind, interrupted: Arc<AtomicBool>) -> Self {
        let start = Instant::now();
        Self {
            deadline: start + budget,
            clock_kind,
            interrupted,
            start,
        }
    }

    pub fn clock_kind(&self) -> ClockKind {
        self.clock_kind
    }

    /// The shared interrupt flag, for constructing a derived sub-budget
    /// controller that still reacts to the same Ctrl-C (spec.md §5,
    /// "Suspension / blocking points").
    pub fn interrupted_flag(&self) -> Arc<AtomicBool> {
        self.interrupted.clone()
    }

    /// True iff the elapsed budget has been exceeded or the interrupt flag is set.
    pub fn must_stop(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst) || Instant::now() >= self.deadline
    }

    pub fn status_if_stopped(&self) -> Option<Status> {
        if self.interrupted.load(Ordering::SeqCst) {
            Some(Status::Interrupted)
        } else if Instant::now() >= self.deadline {
            Some(Status::TimeLimit)
        } else {
            None
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Remaining global budget, zero if already past deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Derives a per-call budget for a sub-phase (e.g. the MIP local
    /// search), reserving `safety` off the remaining global deadline.
    /// Returns `None` when the derived budget would be non-positive, in
    /// which case the caller must skip the sub-phase entirely (spec.md
    /// §5, "Timeout semantics").
    pub fn sub_budget(&self, safety: Duration) -> Option<Duration> {
        self.remaining().checked_sub(safety).filter(|d| !d.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(unix)]
    mod platform {
        pub fn send_sigint() {
            use nix::sys::signal::{self, Signal};
            use nix::unistd::Pid;

            let pid = std::process::id() as i32;
            signal::kill(Pid::from_raw(pid), Signal::SIGINT).expect("Failed to send SIGINT");
        }
    }

    #[cfg(windows)]
    mod platform {
        pub fn send_sigint() {
            use windows_sys::Win32::System::Console::{GenerateConsoleCtrlEvent, CTRL_C_EVENT};

            unsafe {
                GenerateConsoleCtrlEvent(CTRL_C_EVENT, 0);
            }
        }
    }

    #[test]
    #[ignore = "installs a real process-wide SIGINT handler; run standalone"]
    fn interrupt_terminator_responds_to_real_sigint() {
        let mut terminator = InterruptTerminator::new();

        std::thread::spawn(|| {
            std::thread::sleep(Duration::from_millis(200));
            platform::send_sigint();
        });

        loop {
            if let Some(status) = terminator.terminate() {
                assert_eq!(status, Status::Interrupted);
                break;
            }
        }
    }

    #[test]
    fn timeout_terminator_fires_after_budget() {
        let mut terminator = TimeOutTerminator::new(0);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(terminator.terminate(), Some(Status::TimeLimit));
    }

    #[test]
    fn stop_controller_sub_budget_none_when_exhausted() {
        let controller = StopController::new(
            Duration::from_millis(1),
            ClockKind::Wall,
            Arc::new(AtomicBool::new(false)),
        );
        std::thread::sleep(Duration::from_millis(5));
        assert!(controller.must_stop());
        assert_eq!(controller.sub_budget(Duration::from_secs(1)), None);
    }

    #[test]
    fn stop_controller_interrupt_flag_triggers_must_stop() {
        let flag = Arc::new(AtomicBool::new(false));
        let controller = StopController::new(Duration::from_secs(60), ClockKind::Wall, flag.clone());
        assert!(!controller.must_stop());
        flag.store(true, Ordering::SeqCst);
        assert!(controller.must_stop());
        assert_eq!(controller.status_if_stopped(), Some(Status::Interrupted));
    }
}
