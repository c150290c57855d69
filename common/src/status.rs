//! Consensus tracking status

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConsensusStatus {
    Initializing,
    /// Downloaded up to the network but not yet producing or tracking rounds
    WaitRunning,
    Running,
}

impl ConsensusStatus {
    fn to_u8(self) -> u8 {
        match self {
            Self::Initializing => 0,
            Self::WaitRunning => 1,
            Self::Running => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => Self::WaitRunning,
            2 => Self::Running,
            _ => Self::Initializing,
        }
    }
}

impl fmt::Display for ConsensusStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Initializing => write!(f, "initializing"),
            Self::WaitRunning => write!(f, "wait-running"),
            Self::Running => write!(f, "running"),
        }
    }
}

/// Atomically readable consensus status shared between components
#[derive(Debug)]
pub struct SharedConsensusStatus(AtomicU8);

impl SharedConsensusStatus {
    pub fn new(status: ConsensusStatus) -> Self {
        Self(AtomicU8::new(status.to_u8()))
    }

    pub fn get(&self) -> ConsensusStatus {
        ConsensusStatus::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, status: ConsensusStatus) {
        self.0.store(status.to_u8(), Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.get() == ConsensusStatus::Running
    }
}

impl Default for SharedConsensusStatus {
    fn default() -> Self {
        Self::new(ConsensusStatus::Initializing)
    }
}
