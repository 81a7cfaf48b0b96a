use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use crate::types::OrderId;

/// Hash whatever `f` feeds into a fresh, unkeyed hasher.
pub fn stable_hash_with(f: impl FnOnce(&mut DefaultHasher)) -> u64 {
    let mut hasher = DefaultHasher::new();
    f(&mut hasher);
    hasher.finish()
}

/// Seeded hash of an order id; ranks rows for the holdout split.
pub fn stable_hash_order(seed: u64, order_id: OrderId) -> u64 {
    stable_hash_with(|hasher| {
        seed.hash(hasher);
        order_id.hash(hasher);
    })
}
