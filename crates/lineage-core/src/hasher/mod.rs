//! Content Hasher
//!
//! Turns raw tabular bytes into a canonical encoding and a stable digest.
//! Two inputs with the same logical content always produce the same digest,
//! whatever their line endings, quoting or in-memory representation.

pub mod digest;
pub mod table;

pub use digest::{
    CanonicalContent, ColumnOrder, ContentDigest, ContentHasher, HashingOptions, RowOrder,
};
pub use table::Table;
