//! Duplicate suppression for inbound sequence numbers.
//!
//! A lost ACK makes the sender retransmit a packet the receiver already
//! delivered. The retransmission must be ACKed again but not delivered twice.

const WORDS: usize = 16;

/// Sliding window of seen sequence numbers.
///
/// Bit `i` records `highest - i`. Numbers older than the window are treated
/// as already seen.
#[derive(Debug, Clone, Default)]
pub struct SequenceWindow {
    highest: Option<u32>,
    bits: [u64; WORDS],
}

impl SequenceWindow {
    /// Window size in sequence numbers.
    pub const WINDOW_SIZE: u32 = (WORDS * 64) as u32;

    /// Create an empty window.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `seq`. Returns `false` if it was already seen or is too old.
    pub fn check_and_mark(&mut self, seq: u32) -> bool {
        let Some(highest) = self.highest else {
            self.highest = Some(seq);
            self.bits = [0; WORDS];
            self.set(0);
            return true;
        };

        if seq > highest {
            self.shift(seq - highest);
            self.highest = Some(seq);
            self.set(0);
            return true;
        }

        let offset = highest - seq;
        if offset >= Self::WINDOW_SIZE || self.is_set(offset) {
            return false;
        }
        self.set(offset);
        true
    }

    fn set(&mut self, offset: u32) {
        self.bits[(offset / 64) as usize] |= 1u64 << (offset % 64);
    }

    fn is_set(&self, offset: u32) -> bool {
        self.bits[(offset / 64) as usize] & (1u64 << (offset % 64)) != 0
    }

    /// Move every recorded bit `by` places toward older offsets.
    fn shift(&mut self, by: u32) {
        if by >= Self::WINDOW_SIZE {
            self.bits = [0; WORDS];
            return;
        }
        let words = (by / 64) as usize;
        let bits = by % 64;

        for i in (0..WORDS).rev() {
            let high = i
                .checked_sub(words)
                .map_or(0, |src| self.bits[src] << bits);
            let carry = if bits == 0 {
                0
            } else {
                i.checked_sub(words + 1)
                    .map_or(0, |src| self.bits[src] >> (64 - bits))
            };
            self.bits[i] = high | carry;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_starts_at_zero() {
        let mut window = SequenceWindow::new();
        assert!(window.check_and_mark(0));
        assert!(!window.check_and_mark(0));
        assert!(window.check_and_mark(1));
        assert!(!window.check_and_mark(0));
    }

    #[test]
    fn test_window_gap() {
        let mut window = SequenceWindow::new();
        assert!(window.check_and_mark(1));
        assert!(window.check_and_mark(100));

        assert!(window.check_and_mark(50));
        assert!(window.check_and_mark(75));

        assert!(!window.check_and_mark(50));
        assert!(!window.check_and_mark(100));
        assert!(!window.check_and_mark(1));
    }

    #[test]
    fn test_window_shift_across_words() {
        let mut window = SequenceWindow::new();
        assert!(window.check_and_mark(10));
        assert!(window.check_and_mark(10 + 130));

        // 10 is now at offset 130, across two word boundaries.
        assert!(!window.check_and_mark(10));
        assert!(window.check_and_mark(11));
        assert!(!window.check_and_mark(11));
    }

    #[test]
    fn test_window_too_old() {
        let mut window = SequenceWindow::new();
        assert!(window.check_and_mark(3000));

        assert!(!window.check_and_mark(1));
        assert!(!window.check_and_mark(3000 - SequenceWindow::WINDOW_SIZE));
        assert!(window.check_and_mark(3000 - SequenceWindow::WINDOW_SIZE + 1));
    }

    #[test]
    fn test_window_large_jump_clears() {
        let mut window = SequenceWindow::new();
        assert!(window.check_and_mark(5));
        assert!(window.check_and_mark(5 + 5000));
        assert!(window.check_and_mark(5 + 4999));
    }
}
