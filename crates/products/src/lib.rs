//! Product metadata register.
//!
//! Product rows are last-writer-wins registers keyed by
//! `(product, region slot)`: each write replaces the whole row and stamps the
//! writing region and time.

pub mod record;
pub mod service;

pub use record::{product_row, sanitize, stamp_of, LAST_WRITER_REGION, UPDATED_AT};
pub use service::{
    ConflictOutcome, ConflictRequest, MergeExplanation, ProductService, WriteOutcome,
    CONFLICT_NOTE, MERGE_EXPLANATION,
};
