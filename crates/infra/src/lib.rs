//! Infrastructure layer: stores, locking, config and the services that wire
//! the order and stock domains to them.

pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod notifications;
pub mod order_service;
pub mod projections;
pub mod read_model;
pub mod row_lock;
pub mod stock_ledger;
pub mod stock_store;
pub mod variant_cache;
pub mod workers;

#[cfg(test)]
mod integration_tests;
