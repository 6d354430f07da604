//! Optimistic mutations and a query cache for project-tracking collections.
//!
//! Writes show their predicted result in the [`cache::QueryCache`] at once,
//! roll back if the record store refuses them, and always leave the affected
//! lists stale so the next read comes from the store.

pub mod cache;
pub mod config;
pub mod feedback;
pub mod logging;
pub mod model;
pub mod mutation;
pub mod query;
pub mod services;
pub mod store;
