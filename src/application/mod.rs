//! Application services layered over the revalidating cache.

pub mod dashboard;
pub mod error;
pub mod posts;
pub mod repos;
