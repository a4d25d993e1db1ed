//! Shared helpers for the snow crates.
//!
//! - [`Bag`]: a weighted multiset used for voter samples and vote tallies
//! - [`Set`]: a thin `HashSet` wrapper
//! - [`logging`]: `tracing` subscriber setup

pub mod bag;
pub mod logging;
pub mod set;

pub use bag::Bag;
pub use set::Set;
