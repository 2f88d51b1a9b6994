//! Dovetail Types
//!
//! This crate defines the value types shared by the Dovetail fact base crates.
//! It holds `FactValue`, the content of a single slot, and the `FactId` index
//! type, so that crates consuming facts do not have to depend on the store.

#![deny(missing_docs)]

mod types;
pub use types::{FactId, FactValue, ValueType};
