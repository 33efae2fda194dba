/// Sliding-window replay filter over monotonically-labelled sequence
/// numbers, the decode-side half of SPProto's anti-replay contract.
///
/// Tracks the highest sequence number seen plus a bitmap of the preceding
/// `WINDOW_SIZE` sequence numbers. A sequence number is accepted iff it is
/// new: either higher than anything seen so far, or within the window and
/// not yet marked.
pub struct ReplayWindow {
    highest: Option<u64>,
    bitmap: u128,
}

const WINDOW_SIZE: u64 = 128;

impl ReplayWindow {
    pub fn new() -> Self {
        Self {
            highest: None,
            bitmap: 0,
        }
    }

    /// Checks and records `seq`. Returns `true` if it is new and should be
    /// accepted, `false` if it is a replay (or too old to tell) and must
    /// be dropped.
    pub fn check_and_update(&mut self, seq: u64) -> bool {
        match self.highest {
            None => {
                self.highest = Some(seq);
                self.bitmap = 1;
                true
            }
            Some(highest) if seq > highest => {
                let shift = seq - highest;
                self.bitmap = if shift >= 128 { 0 } else { self.bitmap << shift };
                self.bitmap |= 1;
                self.highest = Some(seq);
                true
            }
            Some(highest) => {
                let back = highest - seq;
                if back >= WINDOW_SIZE {
                    return false;
                }
                let bit = 1u128 << back;
                if self.bitmap & bit != 0 {
                    false
                } else {
                    self.bitmap |= bit;
                    true
                }
            }
        }
    }
}

impl Default for ReplayWindow {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_strictly_increasing() {
        let mut w = ReplayWindow::new();
        for seq in 0..10 {
            assert!(w.check_and_update(seq));
        }
    }

    #[test]
    fn rejects_exact_duplicate() {
        let mut w = ReplayWindow::new();
        assert!(w.check_and_update(5));
        assert!(!w.check_and_update(5));
    }

    #[test]
    fn accepts_in_window_reorder_once() {
        let mut w = ReplayWindow::new();
        assert!(w.check_and_update(10));
        assert!(w.check_and_update(9));
        assert!(!w.check_and_update(9));
        assert!(w.check_and_update(8));
    }

    #[test]
    fn rejects_too_old() {
        let mut w = ReplayWindow::new();
        assert!(w.check_and_update(1000));
        assert!(!w.check_and_update(1000 - WINDOW_SIZE));
    }

    #[test]
    fn large_forward_jump_resets_bitmap() {
        let mut w = ReplayWindow::new();
        assert!(w.check_and_update(0));
        assert!(w.check_and_update(10_000));
        // Everything below the new window floor is now unrepresentable
        // and therefore rejected rather than silently accepted twice.
        assert!(!w.check_and_update(0));
    }
}
