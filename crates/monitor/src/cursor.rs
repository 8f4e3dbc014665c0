//! Scan cursor: the last height whose deposits are durably stored.

/// Monotonic cursor. Only the scan loop mutates it, and only after a height
/// has been persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    last_processed_height: u64,
}

impl Cursor {
    pub fn new(last_processed_height: u64) -> Self {
        Self {
            last_processed_height,
        }
    }

    pub fn height(&self) -> u64 {
        self.last_processed_height
    }

    /// First height that still needs scanning.
    pub fn next_height(&self) -> u64 {
        self.last_processed_height.saturating_add(1)
    }

    /// Moves the cursor forward to `height`; never moves it back.
    pub fn advance(&mut self, height: u64) -> bool {
        if height > self.last_processed_height {
            self.last_processed_height = height;
            true
        } else {
            false
        }
    }
}
