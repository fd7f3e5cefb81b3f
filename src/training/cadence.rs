//! Step-counter cadences for periodic work

use serde::{Deserialize, Serialize};

/// Fires when `step % every == offset`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cadence {
    pub every: u64,
    pub offset: u64,
}

impl Cadence {
    pub const fn new(every: u64, offset: u64) -> Self {
        Self { every, offset }
    }

    /// A cadence that never fires
    pub const fn never() -> Self {
        Self { every: 0, offset: 0 }
    }

    pub fn fires(&self, step: u64) -> bool {
        self.every > 0 && step % self.every == self.offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sampling_cadence() {
        let cadence = Cadence::new(100, 1);
        let fired: Vec<u64> = (0..=300).filter(|&s| cadence.fires(s)).collect();
        assert_eq!(fired, vec![1, 101, 201]);

        assert!(!cadence.fires(100));
        assert!(cadence.fires(101));
        assert!(!cadence.fires(102));
    }

    #[test]
    fn test_checkpoint_cadence() {
        let cadence = Cadence::new(500, 2);
        assert!(!cadence.fires(500));
        assert!(!cadence.fires(501));
        assert!(cadence.fires(502));
        assert!(!cadence.fires(503));
        assert!(cadence.fires(1002));
    }

    #[test]
    fn test_never() {
        let cadence = Cadence::never();
        assert!((0..1000).all(|s| !cadence.fires(s)));
    }
}
