use std::sync::atomic::{AtomicU64, Ordering};

/// Bytes still available in one quota node.
///
/// Shared by every thread allocating from the node; the balance never drops
/// below zero.
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new(available: u64) -> Counter {
        Counter(AtomicU64::new(available))
    }

    /// Takes `amount` bytes if at least that many are available.
    ///
    /// On `false` the balance is unchanged.
    pub fn withdraw(&self, amount: u64) -> bool {
        self.0
            .fetch_update(Ordering::AcqRel, Ordering::Relaxed, |available| {
                available.checked_sub(amount)
            })
            .is_ok()
    }

    /// Returns `amount` bytes taken by an earlier [`withdraw`](Self::withdraw).
    pub fn deposit(&self, amount: u64) {
        self.0.fetch_add(amount, Ordering::Release);
    }

    /// Current balance. Other threads may change it right after it is read.
    pub fn read(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_withdraw_and_deposit() {
        let counter = Counter::new(10);
        assert!(counter.withdraw(4));
        assert!(!counter.withdraw(7));
        assert_eq!(counter.read(), 6);
        counter.deposit(4);
        assert_eq!(counter.read(), 10);
    }

    #[test]
    fn test_withdraw_exact_balance() {
        let counter = Counter::new(5);
        assert!(counter.withdraw(0));
        assert!(counter.withdraw(5));
        assert!(!counter.withdraw(1));
        assert_eq!(counter.read(), 0);
    }

    #[test]
    fn test_concurrent_withdrawals_never_overdraw() {
        let counter = Arc::new(Counter::new(1000));
        let successes: u64 = std::thread::scope(|s| {
            let workers: Vec<_> = (0..8)
                .map(|_| {
                    let counter = counter.clone();
                    s.spawn(move || (0..200).filter(|_| counter.withdraw(1)).count() as u64)
                })
                .collect();
            workers.into_iter().map(|w| w.join().unwrap()).sum()
        });
        assert_eq!(successes, 1000);
        assert_eq!(counter.read(), 0);
    }
}
