//! Allocation quotas for allocator contexts.
//!
//! A [`Quota`] bounds the number of bytes an allocator context may hold at once.
//! Quotas form a tree: a child quota has its own limit, and every lease taken
//! from it is also charged against each ancestor. A [`Lease`] returns its
//! amount to the whole chain when dropped.

use std::sync::Arc;

use counter::Counter;

pub mod counter;

#[derive(Clone)]
pub struct Quota(Arc<QuotaNode>);

impl Quota {
    /// Creates a new root quota with the given limit.
    pub fn new(limit: u64) -> Quota {
        Quota(Arc::new(QuotaNode {
            parent: None,
            limit,
            remaining: Counter::new(limit),
        }))
    }

    /// Creates a child quota limited to `limit` bytes.
    ///
    /// Nothing is charged against this quota until the child leases memory.
    pub fn child(&self, limit: u64) -> Quota {
        Quota(Arc::new(QuotaNode {
            parent: Some(self.0.clone()),
            limit,
            remaining: Counter::new(limit),
        }))
    }

    pub fn limit(&self) -> u64 {
        self.0.limit
    }

    /// Remaining amount in this quota.
    ///
    /// **Note**: intended for diagnostics; the value may be outdated in a
    /// concurrent environment.
    pub fn remaining(&self) -> u64 {
        self.0.remaining.read()
    }

    /// Amount currently leased from this quota.
    pub fn in_use(&self) -> u64 {
        self.0.limit.saturating_sub(self.remaining())
    }

    /// Leases `amount` from this quota and every ancestor.
    ///
    /// Either the whole chain is charged or nothing is.
    pub fn lease(&self, amount: u64) -> Result<Lease, QuotaExceeded> {
        if self.0.withdraw(amount) {
            Ok(Lease {
                node: self.0.clone(),
                amount,
            })
        } else {
            Err(QuotaExceeded { requested: amount })
        }
    }
}

impl std::fmt::Debug for Quota {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Quota")
            .field("limit", &self.limit())
            .field("remaining", &self.remaining())
            .finish_non_exhaustive()
    }
}

/// Amount leased from a [`Quota`], returned when dropped.
pub struct Lease {
    node: Arc<QuotaNode>,
    amount: u64,
}

impl Lease {
    pub fn amount(&self) -> u64 {
        self.amount
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if self.amount != 0 {
            self.node.deposit(self.amount);
        }
    }
}

impl std::fmt::Debug for Lease {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lease")
            .field("amount", &self.amount)
            .finish_non_exhaustive()
    }
}

/// A lease could not be satisfied by the quota or one of its ancestors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QuotaExceeded {
    pub requested: u64,
}

impl std::fmt::Display for QuotaExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "quota exceeded: {} bytes requested", self.requested)
    }
}

impl std::error::Error for QuotaExceeded {}

struct QuotaNode {
    parent: Option<Arc<QuotaNode>>,
    limit: u64,
    remaining: Counter,
}

impl QuotaNode {
    fn withdraw(&self, amount: u64) -> bool {
        if amount == 0 {
            return true;
        }
        if !self.remaining.withdraw(amount) {
            return false;
        }
        if let Some(parent) = self.parent.as_deref() {
            if !parent.withdraw(amount) {
                self.remaining.deposit(amount);
                return false;
            }
        }
        true
    }

    fn deposit(&self, amount: u64) {
        if let Some(parent) = self.parent.as_deref() {
            parent.deposit(amount);
        }
        self.remaining.deposit(amount);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_and_return() {
        let quota = Quota::new(100);
        {
            let lease = quota.lease(60).unwrap();
            assert_eq!(lease.amount(), 60);
            assert_eq!(quota.remaining(), 40);
            assert_eq!(quota.in_use(), 60);
        }
        assert_eq!(quota.remaining(), 100);
    }

    #[test]
    fn test_lease_failure_leaves_quota_unchanged() {
        let quota = Quota::new(100);
        let err = quota.lease(150).unwrap_err();
        assert_eq!(err, QuotaExceeded { requested: 150 });
        assert_eq!(quota.remaining(), 100);
    }

    #[test]
    fn test_zero_lease() {
        let quota = Quota::new(0);
        let lease = quota.lease(0).unwrap();
        assert_eq!(lease.amount(), 0);
    }

    #[test]
    fn test_child_is_charged_against_parent() {
        let root = Quota::new(100);
        let a = root.child(80);
        let b = root.child(80);

        let lease_a = a.lease(70).unwrap();
        assert_eq!(root.remaining(), 30);
        assert_eq!(a.remaining(), 10);

        // b has room of its own but the root does not.
        assert!(b.lease(40).is_err());
        assert_eq!(b.remaining(), 80);
        assert_eq!(root.remaining(), 30);

        let lease_b = b.lease(30).unwrap();
        assert_eq!(root.remaining(), 0);

        drop(lease_a);
        assert_eq!(root.remaining(), 70);
        assert_eq!(a.remaining(), 80);
        drop(lease_b);
        assert_eq!(root.remaining(), 100);
    }

    #[test]
    fn test_child_limit_applies() {
        let root = Quota::new(1000);
        let child = root.child(10);
        assert!(child.lease(11).is_err());
        assert_eq!(root.remaining(), 1000);
    }
}
