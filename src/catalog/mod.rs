pub mod classify;
pub mod mapping;
pub mod models;
pub mod normalize;
pub mod scanner;
pub mod transform;

pub use mapping::{FieldMapping, TargetField};
pub use models::{CatalogKey, CatalogRecord, ExistingRecord, PhotoCandidate};
pub use transform::{TransformOptions, transform};
