//! Body length enforcement.
//!
//! The same accounting runs on both sides of an exchange: the request writer
//! counts bytes pulled from the caller's body, the response reader counts bytes
//! delivered by the peer. Checks run on every chunk so an over-length body is
//! caught the moment it crosses the declared size.

/// Returns true iff both lengths are meaningful (nonzero) and differ.
///
/// Zero is the "nothing declared" sentinel here; callers that need to tell
/// "declared zero" apart from "undeclared" use [`LengthCounter`].
pub fn mismatch(declared: u64, actual: u64) -> bool {
    declared != 0 && actual != 0 && declared != actual
}

/// Running byte counter checked against an optional declared length.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LengthCounter {
    declared: Option<u64>,
    seen: u64,
}

impl LengthCounter {
    pub fn new(declared: Option<u64>) -> Self {
        Self { declared, seen: 0 }
    }

    /// Record `n` more bytes. Returns false once the total exceeds the
    /// declared length.
    pub fn add(&mut self, n: usize) -> bool {
        self.seen = self.seen.saturating_add(n as u64);
        !self.exceeded()
    }

    /// Bytes counted so far.
    pub fn seen(&self) -> u64 {
        self.seen
    }

    pub fn declared(&self) -> Option<u64> {
        self.declared
    }

    /// True as soon as more bytes were seen than declared. A declared length
    /// of zero counts: any byte exceeds it.
    pub fn exceeded(&self) -> bool {
        matches!(self.declared, Some(declared) if self.seen > declared)
    }

    /// End-of-stream check: with a declared length, the totals must be equal.
    pub fn finish(&self) -> bool {
        match self.declared {
            Some(declared) => declared == self.seen,
            None => true,
        }
    }

    /// Bytes still owed before the declared length is reached.
    pub fn remaining(&self) -> Option<u64> {
        self.declared.map(|declared| declared.saturating_sub(self.seen))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_zero_sentinel() {
        let cases = [
            ("no body size no content-length", (0, 0), false),
            ("body size but no content-length", (0, 7), false),
            ("content-length but no body size", (7, 0), false),
            ("equal sizes", (100, 100), false),
            ("different sizes", (100, 99), true),
        ];
        for (name, (declared, actual), expected) in cases {
            assert_eq!(mismatch(declared, actual), expected, "{name}");
            assert_eq!(mismatch(actual, declared), expected, "{name} (swapped)");
        }
    }

    #[test]
    fn chunking_does_not_change_the_verdict() {
        for declared in [1u64, 5, 10, 64] {
            for actual in [1u64, 5, 10, 64] {
                for chunk in [1usize, 3, 64] {
                    let mut counter = LengthCounter::new(Some(declared));
                    let mut left = actual as usize;
                    while left > 0 {
                        let n = chunk.min(left);
                        counter.add(n);
                        left -= n;
                    }
                    let ok = !counter.exceeded() && counter.finish();
                    assert_eq!(ok, declared == actual, "declared={declared} actual={actual} chunk={chunk}");
                }
            }
        }
    }

    #[test]
    fn excess_detected_before_end() {
        let mut counter = LengthCounter::new(Some(10));
        assert!(counter.add(6));
        assert!(counter.add(4));
        assert!(!counter.add(1));
        assert!(counter.exceeded());
        assert_eq!(counter.seen(), 11);
    }

    #[test]
    fn declared_zero_rejects_first_byte() {
        let mut counter = LengthCounter::new(Some(0));
        assert!(counter.finish());
        assert!(!counter.add(1));
    }

    #[test]
    fn undeclared_accepts_anything() {
        let mut counter = LengthCounter::new(None);
        assert!(counter.add(1 << 20));
        assert!(counter.finish());
        assert_eq!(counter.remaining(), None);
    }

    #[test]
    fn shortfall_only_visible_at_end() {
        let mut counter = LengthCounter::new(Some(10));
        assert!(counter.add(3));
        assert_eq!(counter.remaining(), Some(7));
        assert!(!counter.finish());
    }
}
