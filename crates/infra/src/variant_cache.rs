//! Variant cache invalidation port.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use storefront_core::VariantId;

/// Whatever caches variant pages; a touch marks the cached entry stale.
pub trait VariantCache: Send + Sync {
    fn touch(&self, variant_id: VariantId, at: DateTime<Utc>);
}

impl<C> VariantCache for Arc<C>
where
    C: VariantCache + ?Sized,
{
    fn touch(&self, variant_id: VariantId, at: DateTime<Utc>) {
        (**self).touch(variant_id, at)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryVariantCache {
    touched: RwLock<HashMap<VariantId, (DateTime<Utc>, u64)>>,
}

impl InMemoryVariantCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn touched_at(&self, variant_id: VariantId) -> Option<DateTime<Utc>> {
        let map = self.touched.read().ok()?;
        map.get(&variant_id).map(|(at, _)| *at)
    }

    /// How many times the variant was touched.
    pub fn touches(&self, variant_id: VariantId) -> u64 {
        self.touched
            .read()
            .ok()
            .and_then(|map| map.get(&variant_id).map(|(_, n)| *n))
            .unwrap_or(0)
    }
}

impl VariantCache for InMemoryVariantCache {
    fn touch(&self, variant_id: VariantId, at: DateTime<Utc>) {
        if let Ok(mut map) = self.touched.write() {
            let entry = map.entry(variant_id).or_insert((at, 0));
            entry.0 = at;
            entry.1 += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn touches_are_counted_per_variant() {
        let cache = InMemoryVariantCache::new();
        let a = VariantId::new();
        let at = Utc::now();
        cache.touch(a, at);
        cache.touch(a, at);

        assert_eq!(cache.touches(a), 2);
        assert_eq!(cache.touched_at(a), Some(at));
        assert_eq!(cache.touches(VariantId::new()), 0);
    }
}
