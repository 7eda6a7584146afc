//! Weighted multi-signature authorities and the vote counter that builds
//! them from raw stake tallies.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::AccountId;

/// A weighted set of signer accounts plus the weight threshold that must
/// be met to act for the owning account.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
pub struct Authority {
    pub weight_threshold: u32,
    pub account_auths: BTreeMap<AccountId, u16>,
}

impl Authority {
    /// Sole-control authority for a single account.
    pub fn single(account: AccountId) -> Self {
        Self {
            weight_threshold: 1,
            account_auths: BTreeMap::from([(account, 1)]),
        }
    }

    pub fn total_weight(&self) -> u64 {
        self.account_auths.values().map(|w| u64::from(*w)).sum()
    }
}

/// Accumulates `(account, raw weight)` pairs and compresses them into a
/// 16-bit-weighted [`Authority`].
///
/// Raw weights are scaled down together so that the most significant bit
/// of their sum lands within 16 bits, then each signer keeps at least a
/// weight of one. The threshold is a strict majority of the scaled
/// weights.
#[derive(Debug, Default)]
pub struct VoteCounter {
    total_weight: u128,
    weights: BTreeMap<AccountId, u64>,
}

impl VoteCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, account: AccountId, raw_weight: u64) {
        self.total_weight += u128::from(raw_weight);
        *self.weights.entry(account).or_insert(0) += raw_weight;
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Overwrite `auth` with the accumulated weight set. Does nothing
    /// when no weights were added.
    pub fn finish(self, auth: &mut Authority) {
        if self.weights.is_empty() {
            return;
        }
        let msb = 127 - self.total_weight.max(1).leading_zeros();
        let bits_to_drop = msb.saturating_sub(15);
        let mut threshold: u32 = 0;
        let mut account_auths = BTreeMap::new();
        for (account, raw) in self.weights {
            let weight = ((raw >> bits_to_drop) as u16).max(1);
            account_auths.insert(account, weight);
            threshold += u32::from(weight);
        }
        auth.weight_threshold = threshold / 2 + 1;
        auth.account_auths = account_auths;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn finished(pairs: &[(u64, u64)]) -> Authority {
        let mut vc = VoteCounter::new();
        for (account, weight) in pairs {
            vc.add(AccountId(*account), *weight);
        }
        let mut auth = Authority::default();
        vc.finish(&mut auth);
        auth
    }

    #[test]
    fn test_small_weights_pass_through() {
        let auth = finished(&[(1, 100), (2, 200), (3, 300)]);
        assert_eq!(auth.account_auths[&AccountId(1)], 100);
        assert_eq!(auth.account_auths[&AccountId(2)], 200);
        assert_eq!(auth.account_auths[&AccountId(3)], 300);
        assert_eq!(auth.weight_threshold, 301);
    }

    #[test]
    fn test_large_weights_are_scaled() {
        let auth = finished(&[(1, 1 << 40), (2, 1 << 41), (3, 1 << 42)]);
        let total = auth.total_weight();
        // The sum fits in 16 bits after scaling.
        assert!(total < 1 << 16);
        // Relative proportions survive.
        let w1 = u64::from(auth.account_auths[&AccountId(1)]);
        let w3 = u64::from(auth.account_auths[&AccountId(3)]);
        assert_eq!(w3, w1 * 4);
    }

    #[test]
    fn test_minimum_weight_of_one() {
        // A dust weight next to a huge one must not scale to zero.
        let auth = finished(&[(1, 1), (2, u64::MAX / 2)]);
        assert_eq!(auth.account_auths[&AccountId(1)], 1);
        assert!(auth.account_auths[&AccountId(2)] >= 0x4000);
    }

    #[test]
    fn test_threshold_is_strict_majority() {
        for pairs in [
            vec![(1u64, 5u64)],
            vec![(1, 5), (2, 6)],
            vec![(1, 1 << 50), (2, 1 << 51), (3, 7)],
        ] {
            let auth = finished(&pairs);
            let total = auth.total_weight();
            let threshold = u64::from(auth.weight_threshold);
            assert!(threshold > total / 2);
            assert!(threshold <= total);
        }
    }

    #[test]
    fn test_duplicate_accounts_merge() {
        let auth = finished(&[(1, 100), (1, 50)]);
        assert_eq!(auth.account_auths[&AccountId(1)], 150);
    }

    #[test]
    fn test_empty_counter_leaves_authority_untouched() {
        let mut auth = Authority::single(AccountId(9));
        VoteCounter::new().finish(&mut auth);
        assert_eq!(auth, Authority::single(AccountId(9)));
    }
}
