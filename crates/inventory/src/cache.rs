//! When a stock change should invalidate the owning variant's cache entry.

use serde::{Deserialize, Serialize};

/// Whether a count means the item is in stock at all.
pub fn in_stock(count_on_hand: i64) -> bool {
    count_on_hand > 0
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InventoryCacheStrategy {
    /// Touch the variant after every committed count change.
    #[default]
    EveryChange,
    /// Touch only when the item flips between in stock and out of stock.
    BoundaryCrossing,
}

impl InventoryCacheStrategy {
    /// Maps the `binary_inventory_cache` setting onto a strategy.
    pub fn from_binary_flag(binary: bool) -> Self {
        if binary {
            Self::BoundaryCrossing
        } else {
            Self::EveryChange
        }
    }

    pub fn should_touch(self, previous_count: i64, new_count: i64) -> bool {
        match self {
            Self::EveryChange => true,
            Self::BoundaryCrossing => in_stock(previous_count) != in_stock(new_count),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn boundary_crossing_only_touches_on_flips() {
        let s = InventoryCacheStrategy::from_binary_flag(true);
        assert!(s.should_touch(0, 1));
        assert!(s.should_touch(3, 0));
        assert!(s.should_touch(-2, 5));
        assert!(!s.should_touch(3, 9));
        assert!(!s.should_touch(0, -4));
    }

    #[test]
    fn default_touches_on_every_change() {
        let s = InventoryCacheStrategy::default();
        assert_eq!(s, InventoryCacheStrategy::from_binary_flag(false));
        assert!(s.should_touch(3, 9));
        assert!(s.should_touch(-1, -2));
    }

    proptest! {
        #[test]
        fn boundary_touch_matches_sign_flip(a in -50i64..50, b in -50i64..50) {
            let touched = InventoryCacheStrategy::BoundaryCrossing.should_touch(a, b);
            prop_assert_eq!(touched, (a > 0) != (b > 0));
        }
    }
}
