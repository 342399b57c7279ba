//! Identity source for pooled entities.

use std::sync::atomic::{AtomicU32, Ordering};

/// Hands out 0, 1, 2, … and wraps back to 0 after `u32::MAX`.
///
/// Uniqueness only holds within one non-wrapped cycle.
#[derive(Debug, Default)]
pub struct IdGenerator {
    next: AtomicU32,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the sequence at `first` instead of 0.
    pub fn starting_at(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
        }
    }

    pub fn next_id(&self) -> u32 {
        // fetch_add wraps on overflow, so MAX is followed by 0.
        self.next.fetch_add(1, Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn yields_successive_values_from_zero() {
        let ids = IdGenerator::new();
        let produced: Vec<u32> = (0..5).map(|_| ids.next_id()).collect();
        assert_eq!(produced, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn wraps_to_zero_after_max() {
        let ids = IdGenerator::starting_at(u32::MAX - 1);
        assert_eq!(ids.next_id(), u32::MAX - 1);
        assert_eq!(ids.next_id(), u32::MAX);
        assert_eq!(ids.next_id(), 0);
        assert_eq!(ids.next_id(), 1);
    }

    #[test]
    fn concurrent_callers_never_share_an_id() {
        let ids = Arc::new(IdGenerator::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let ids = Arc::clone(&ids);
                std::thread::spawn(move || (0..1000).map(|_| ids.next_id()).collect::<Vec<_>>())
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(seen.insert(id), "id {} handed out twice", id);
            }
        }
        assert_eq!(seen.len(), 8000);
    }
}
