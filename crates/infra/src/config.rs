//! Runtime settings read from the environment.

use anyhow::Context;
use sqlx::PgPool;

use storefront_inventory::InventoryCacheStrategy;
use storefront_orders::LifecycleConfig;

pub const ALWAYS_INCLUDE_CONFIRM_STEP: &str = "STOREFRONT_ALWAYS_INCLUDE_CONFIRM_STEP";
pub const BINARY_INVENTORY_CACHE: &str = "STOREFRONT_BINARY_INVENTORY_CACHE";
pub const TAX_USING_SHIP_ADDRESS: &str = "STOREFRONT_TAX_USING_SHIP_ADDRESS";
pub const AUTO_CAPTURE: &str = "STOREFRONT_AUTO_CAPTURE";
pub const DATABASE_URL: &str = "DATABASE_URL";

/// Store-wide toggles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorefrontConfig {
    pub always_include_confirm_step: bool,
    /// Touch variant caches only when an item flips in or out of stock.
    pub binary_inventory_cache: bool,
    pub tax_using_ship_address: bool,
    pub auto_capture: bool,
    /// Postgres stores are used when set; in-memory otherwise.
    pub database_url: Option<String>,
}

impl Default for StorefrontConfig {
    fn default() -> Self {
        Self {
            always_include_confirm_step: false,
            binary_inventory_cache: false,
            tax_using_ship_address: true,
            auto_capture: false,
            database_url: None,
        }
    }
}

impl StorefrontConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Unset keys keep their default; values that
    /// don't parse keep it too and log a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let flag = |key: &str, default: bool| match lookup(key) {
            None => default,
            Some(raw) => parse_flag(&raw).unwrap_or_else(|| {
                tracing::warn!(key, value = %raw, default, "unparsable flag; using default");
                default
            }),
        };

        Self {
            always_include_confirm_step: flag(ALWAYS_INCLUDE_CONFIRM_STEP, defaults.always_include_confirm_step),
            binary_inventory_cache: flag(BINARY_INVENTORY_CACHE, defaults.binary_inventory_cache),
            tax_using_ship_address: flag(TAX_USING_SHIP_ADDRESS, defaults.tax_using_ship_address),
            auto_capture: flag(AUTO_CAPTURE, defaults.auto_capture),
            database_url: lookup(DATABASE_URL).filter(|url| !url.trim().is_empty()),
        }
    }

    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            always_include_confirm_step: self.always_include_confirm_step,
            tax_using_ship_address: self.tax_using_ship_address,
            auto_capture: self.auto_capture,
        }
    }

    pub fn cache_strategy(&self) -> InventoryCacheStrategy {
        InventoryCacheStrategy::from_binary_flag(self.binary_inventory_cache)
    }

    /// Connect to `database_url`; `None` when no database is configured.
    pub async fn connect_pool(&self) -> anyhow::Result<Option<PgPool>> {
        let Some(url) = self.database_url.as_deref() else {
            return Ok(None);
        };
        let pool = PgPool::connect(url)
            .await
            .with_context(|| format!("failed to connect to postgres via {DATABASE_URL}"))?;
        tracing::info!("connected to postgres");
        Ok(Some(pool))
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    fn from_pairs(pairs: &[(&str, &str)]) -> StorefrontConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        StorefrontConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn unset_keys_keep_defaults() {
        assert_eq!(from_pairs(&[]), StorefrontConfig::default());
    }

    #[test]
    fn flags_accept_common_spellings() {
        let config = from_pairs(&[
            (ALWAYS_INCLUDE_CONFIRM_STEP, "yes"),
            (BINARY_INVENTORY_CACHE, "1"),
            (TAX_USING_SHIP_ADDRESS, "Off"),
            (AUTO_CAPTURE, " TRUE "),
            (DATABASE_URL, "postgres://localhost/storefront"),
        ]);
        assert!(config.always_include_confirm_step);
        assert!(config.binary_inventory_cache);
        assert!(!config.tax_using_ship_address);
        assert!(config.auto_capture);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/storefront"));
        assert_eq!(config.cache_strategy(), InventoryCacheStrategy::BoundaryCrossing);
        assert!(config.lifecycle_config().auto_capture);
    }

    #[test]
    fn garbage_falls_back_to_the_default() {
        let config = from_pairs(&[(TAX_USING_SHIP_ADDRESS, "sometimes"), (DATABASE_URL, "  ")]);
        assert!(config.tax_using_ship_address);
        assert_eq!(config.database_url, None);
    }

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn unparsable_cache_flag_warns_and_keeps_every_change() {
        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();

        let config = tracing::subscriber::with_default(subscriber, || {
            from_pairs(&[(BINARY_INVENTORY_CACHE, "sometimes")])
        });
        assert!(!config.binary_inventory_cache);
        assert_eq!(config.cache_strategy(), InventoryCacheStrategy::EveryChange);

        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("WARN"), "{logs}");
        assert!(logs.contains("unparsable flag; using default"), "{logs}");
        assert!(logs.contains(BINARY_INVENTORY_CACHE), "{logs}");
    }
}
