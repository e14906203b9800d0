//! Lock-free health snapshot. Health endpoints answer at high frequency and
//! must never enter the scrape critical section, so the state lives in three
//! atomics written by the background probe loop (and, as a side effect, by
//! the scrape path) and read by handlers without any lock.

use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Unknown,
    Down,
    Starting,
    Primary,
    Replica,
}

impl HealthStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Down => "down",
            Self::Starting => "starting",
            Self::Primary => "primary",
            Self::Replica => "replica",
        }
    }

    const fn code(self) -> i32 {
        match self {
            Self::Unknown => 0,
            Self::Down => 1,
            Self::Starting => 2,
            Self::Primary => 3,
            Self::Replica => 4,
        }
    }

    const fn from_code(code: i32) -> Self {
        match code {
            1 => Self::Down,
            2 => Self::Starting,
            3 => Self::Primary,
            4 => Self::Replica,
            _ => Self::Unknown,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default)]
pub struct HealthSnapshot {
    up: AtomicBool,
    recovery: AtomicBool,
    status: AtomicI32,
}

impl HealthSnapshot {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn up(&self) -> bool {
        self.up.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn recovery(&self) -> bool {
        self.recovery.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn status(&self) -> HealthStatus {
        HealthStatus::from_code(self.status.load(Ordering::Relaxed))
    }

    pub fn update(&self, up: bool, recovery: bool) {
        self.update_with_startup(up, recovery, false);
    }

    /// Derive the state from `(up, recovery, starting)`: starting wins and
    /// forces recovery off, then down, then replica / primary.
    pub fn update_with_startup(&self, up: bool, recovery: bool, starting: bool) {
        self.up.store(up, Ordering::Relaxed);
        if starting {
            self.recovery.store(false, Ordering::Relaxed);
            self.status.store(HealthStatus::Starting.code(), Ordering::Relaxed);
            return;
        }
        self.recovery.store(up && recovery, Ordering::Relaxed);
        let status = if !up {
            HealthStatus::Down
        } else if recovery {
            HealthStatus::Replica
        } else {
            HealthStatus::Primary
        };
        self.status.store(status.code(), Ordering::Relaxed);
    }
}
