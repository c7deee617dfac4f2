//! # Thread States
//!
//! Thread state machine definition.
//!
//! ```text
//! INIT ──initialize──▶ WAITING ◀──release── RUNNING
//!                        │  ▲                  ▲
//!                        │  └──── BLOCKED ─────┤
//!                        └─────acquire─────────┘
//! any live state ──exit──▶ TERMINATED ──release──▶ DEAD
//! ```
//!
//! Events are polled, so no kernel path parks a thread in `BLOCKED` yet. The
//! scheduler already skips it and `release_thread` leaves it alone.

/// Thread state (unit-only for atomic storage)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u32)]
pub enum ThreadState {
    /// Constructed, not yet visible to the scheduler
    #[default]
    Init = 0,
    /// On a core
    Running = 1,
    /// Runnable, waiting for a core
    Waiting = 2,
    /// Parked until something makes it runnable again
    Blocked = 3,
    /// Exited, still referenced by a core or the registry
    Terminated = 4,
    /// Released for the last time; reclaimed once unreferenced
    Dead = 5,
}

impl ThreadState {
    /// Convert from u32
    pub fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Init),
            1 => Some(Self::Running),
            2 => Some(Self::Waiting),
            3 => Some(Self::Blocked),
            4 => Some(Self::Terminated),
            5 => Some(Self::Dead),
            _ => None,
        }
    }

    /// Convert to u32
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Can the scheduler pick this thread?
    pub fn is_runnable(&self) -> bool {
        matches!(self, ThreadState::Waiting)
    }

    /// Has the thread exited?
    pub fn is_terminated(&self) -> bool {
        matches!(self, ThreadState::Terminated | ThreadState::Dead)
    }

    /// Valid transitions from this state
    pub fn valid_transitions(&self) -> &'static [ThreadState] {
        match self {
            ThreadState::Init => &[ThreadState::Waiting, ThreadState::Terminated],
            ThreadState::Waiting => &[
                ThreadState::Running,
                ThreadState::Blocked,
                ThreadState::Terminated,
            ],
            ThreadState::Running => &[
                ThreadState::Waiting,
                ThreadState::Blocked,
                ThreadState::Terminated,
            ],
            ThreadState::Blocked => &[
                ThreadState::Waiting,
                ThreadState::Running,
                ThreadState::Terminated,
            ],
            ThreadState::Terminated => &[ThreadState::Dead],
            ThreadState::Dead => &[],
        }
    }

    /// Is `self → next` allowed?
    pub fn can_transition_to(&self, next: ThreadState) -> bool {
        self.valid_transitions().contains(&next)
    }
}

impl core::fmt::Display for ThreadState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            ThreadState::Init => "INIT",
            ThreadState::Running => "RUNNING",
            ThreadState::Waiting => "WAITING",
            ThreadState::Blocked => "BLOCKED",
            ThreadState::Terminated => "TERMINATED",
            ThreadState::Dead => "DEAD",
        };
        f.write_str(name)
    }
}
