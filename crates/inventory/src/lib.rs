//! Inventory merge engine.
//!
//! Per-location counters are PN-Counters: every region owns one increment and
//! one decrement accumulator, stored as flat integer attributes and merged on
//! read into a single quantity.

pub mod counter;
pub mod service;

pub use counter::{delta_attrs, merge_inventory, Accumulators, PnCounter, DEC_PREFIX, INC_PREFIX};
pub use service::{DeltaApplied, InventoryService, LocationQty, LocationView, ProductInventory};
