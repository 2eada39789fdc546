//! Per-connection inbound sequence window (spec §4.3): a monotonically
//! increasing expected sequence number with a tolerance band; anything
//! outside the window is a `ProtocolViolation`.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::CoreError;

pub struct SequenceWindow {
    expected: AtomicU64,
    tolerance: u64,
}

impl SequenceWindow {
    pub fn new(tolerance: u64) -> Self {
        Self {
            expected: AtomicU64::new(0),
            tolerance,
        }
    }

    /// Accepts `sequence_id` if it falls within `[expected, expected +
    /// tolerance]`, advancing `expected` past it. Out-of-window sequences
    /// (stale duplicates or far-future gaps) are rejected without
    /// advancing state.
    pub fn accept(&self, sequence_id: u64) -> Result<(), CoreError> {
        let expected = self.expected.load(Ordering::Acquire);
        if sequence_id < expected {
            return Err(CoreError::ProtocolViolation(format!(
                "sequence_id {sequence_id} below expected {expected}"
            )));
        }
        if sequence_id > expected + self.tolerance {
            return Err(CoreError::ProtocolViolation(format!(
                "sequence_id {sequence_id} exceeds window [{expected}, {}]",
                expected + self.tolerance
            )));
        }
        self.expected
            .store(sequence_id + 1, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_monotonic_sequence() {
        let window = SequenceWindow::new(4);
        assert!(window.accept(0).is_ok());
        assert!(window.accept(1).is_ok());
        assert!(window.accept(5).is_ok());
    }

    #[test]
    fn rejects_out_of_window() {
        let window = SequenceWindow::new(4);
        window.accept(10).unwrap();
        assert!(window.accept(3).is_err());
        assert!(window.accept(20).is_err());
    }
}
