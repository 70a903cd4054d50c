//! `globalcat-core`: catalog foundation building blocks.
//!
//! Pure types only: identifiers, key layout, the error taxonomy, configuration,
//! the read-consistency selector and last-writer-wins ordering. No IO.

pub mod config;
pub mod consistency;
pub mod error;
pub mod id;
pub mod key;
pub mod lww;

pub use config::{CatalogConfig, ConfigError, PersistenceSettings, StoreSettings};
pub use consistency::{
    elapsed_ms, resolve_read_mode, ConsistencyPolicy, PolicyExplanation, ReadMode, ReadOutcome,
};
pub use error::{CatalogError, CatalogResult};
pub use id::{ProductId, RegionCode, WarehouseId};
pub use key::{ItemKey, RecordKind};
pub use lww::{LwwRegister, LwwStamp};
