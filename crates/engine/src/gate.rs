use config::Mode;

use crate::error::{Error, Result, SECONDARY_WRITE_MESSAGE};

/// Whether mutations are permitted on an instance.
///
/// Fixed at open time: primaries get [`WriteGate::Open`], secondaries
/// [`WriteGate::Closed`]. Every mutation entry point calls [`check`](Self::check)
/// before doing anything else, batches and flush/compaction requests included.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteGate {
    Open,
    Closed,
}

impl WriteGate {
    #[must_use]
    pub fn for_mode(mode: &Mode) -> Self {
        if mode.is_secondary() {
            WriteGate::Closed
        } else {
            WriteGate::Open
        }
    }

    /// Fails with `NotImplemented` when closed. Performs no I/O.
    pub fn check(&self) -> Result<()> {
        match self {
            WriteGate::Open => Ok(()),
            WriteGate::Closed => Err(Error::NotImplemented(SECONDARY_WRITE_MESSAGE.to_string())),
        }
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, WriteGate::Open)
    }
}
