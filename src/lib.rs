//! Tagged revalidating cache with stale-while-revalidate reads, single-flight
//! recomputation and tag- or fingerprint-based purges.

pub mod application;
pub mod cache;
pub mod config;
pub mod domain;
pub mod infra;
