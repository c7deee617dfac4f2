//! Monotonic ID counters

use crate::sync::SpinMutex;

/// Hands out increasing IDs starting at 1; 0 is never returned.
#[derive(Debug)]
pub struct IdAllocator {
    next: SpinMutex<u64>,
}

impl IdAllocator {
    /// First ID handed out
    pub const FIRST: u64 = 1;

    /// Create a counter
    pub const fn new(name: &'static str) -> Self {
        Self {
            next: SpinMutex::new(name, Self::FIRST),
        }
    }

    /// Take the next ID
    pub fn acquire(&self) -> u64 {
        let mut next = self.next.lock();
        let id = *next;
        *next += 1;
        id
    }

    /// The ID the next call to [`IdAllocator::acquire`] returns
    pub fn peek(&self) -> u64 {
        *self.next.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;
    use alloc::vec::Vec;
    use pantheon_hal::hosted;

    #[test]
    fn ids_are_unique_across_cores() {
        hosted::install();
        let ids = Arc::new(IdAllocator::new("test ids"));
        let workers: Vec<_> = (0..4)
            .map(|_| {
                let ids = ids.clone();
                std::thread::spawn(move || (0..250).map(|_| ids.acquire()).collect::<Vec<_>>())
            })
            .collect();
        let mut all: Vec<u64> = workers
            .into_iter()
            .flat_map(|worker| worker.join().expect("worker"))
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 1000);
        assert_eq!(all[0], IdAllocator::FIRST);
    }
}
