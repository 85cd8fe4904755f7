pub mod common;
pub mod grpalloc;
pub mod resources;
pub mod scheduler;
pub mod scorer;

#[cfg(test)]
mod tests;

/// Node fitness produced by a predicate evaluation. Bigger number -> more headroom left.
pub type Score = f64;

pub type Error = crate::common::error::SchedError;
pub type Result<T> = std::result::Result<T, Error>;

pub use common::{Map, Set};
