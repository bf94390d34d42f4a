//! In-memory chain store for the Caskade engine
//!
//! This crate provides an in-memory implementation of the [`ChainStore`]
//! repository defined in caskade-core. It is primarily useful for
//! development, testing, and sessions where chains need not outlive the
//! process.
//!
//! [`ChainStore`]: caskade_core::ChainStore

pub mod chain_store;
pub use chain_store::InMemoryChainStore;
