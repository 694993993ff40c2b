//! # Product Records
//!
//! The typed product entity, the normalization that turns loosely shaped server payloads
//! into it, and the field-level merge used by reconciliation.

mod merge;
mod model;
mod normalize;

pub use merge::{MergeOutcome, merge_record};
pub use model::{
    Creator, DEFAULT_CREATOR_NAME, DEFAULT_TITLE, FileDescriptor, PLACEHOLDER_IMAGE, Price,
    ProductRecord, Rating, Review,
};
pub use normalize::normalize_record;
