//! Content digests over canonicalized tables.
//!
//! ## Determinism Guarantees
//!
//! - Same logical table → same digest, independent of line endings, quoting
//!   style or the iteration order of the maps a table was built from
//! - The digest covers a length-prefixed framing of every cell, so no two
//!   distinct tables share a framed byte stream
//! - Row and column order are part of the content unless `HashingOptions`
//!   says otherwise

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::errors::Result;
use crate::hasher::table::Table;

const DIGEST_PREFIX: &str = "sha256:";
const FRAMING_TAG: &[u8] = b"lineage-table-v1\n";

/// Row-order policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowOrder {
    /// Row order is significant
    #[default]
    Preserve,
    /// Rows are sorted before hashing; reordered tables hash equal
    Sorted,
}

/// Column-order policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnOrder {
    #[default]
    AsGiven,
    Lexicographic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct HashingOptions {
    pub row_order: RowOrder,
    pub column_order: ColumnOrder,
}

/// `sha256:` followed by 64 lowercase hex characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    fn from_hash(hash: &[u8]) -> Self {
        Self(format!("{}{}", DIGEST_PREFIX, hex::encode(hash)))
    }

    /// Accept a digest string if it is well formed
    pub fn parse(s: &str) -> Option<Self> {
        let hex_part = s.strip_prefix(DIGEST_PREFIX)?;
        let well_formed = hex_part.len() == 64
            && hex_part
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        well_formed.then(|| Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The hex part without the algorithm prefix
    pub fn hex(&self) -> &str {
        &self.0[DIGEST_PREFIX.len()..]
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical bytes of a table together with their digest
///
/// `bytes` is what gets persisted, so retrieval returns exactly what was
/// hashed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalContent {
    pub bytes: Vec<u8>,
    pub digest: ContentDigest,
    pub row_count: u64,
    pub column_count: u64,
}

/// Stateless hasher configured with ordering policies
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentHasher {
    options: HashingOptions,
}

impl ContentHasher {
    pub fn new(options: HashingOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &HashingOptions {
        &self.options
    }

    /// Parse raw delimited bytes and produce their canonical form
    ///
    /// # Errors
    ///
    /// Any parse error from [`Table::parse_csv`].
    ///
    /// # Example
    ///
    /// ```
    /// use lineage_core::hasher::ContentHasher;
    ///
    /// let hasher = ContentHasher::default();
    /// let a = hasher.canonicalize(b"x,y\r\n1,2\r\n").unwrap();
    /// let b = hasher.canonicalize(b"x,y\n1,2").unwrap();
    /// assert_eq!(a.digest, b.digest);
    /// assert_eq!(a.bytes, b"x,y\n1,2\n");
    /// ```
    pub fn canonicalize(&self, raw: &[u8]) -> Result<CanonicalContent> {
        let table = Table::parse_csv(raw)?;
        Ok(self.canonicalize_table(&table))
    }

    pub fn canonicalize_table(&self, table: &Table) -> CanonicalContent {
        let canonical = table.canonicalize(&self.options);
        CanonicalContent {
            bytes: canonical.to_csv(),
            digest: frame_digest(&canonical),
            row_count: canonical.row_count() as u64,
            column_count: canonical.column_count() as u64,
        }
    }

    pub fn digest_table(&self, table: &Table) -> ContentDigest {
        frame_digest(&table.canonicalize(&self.options))
    }
}

/// SHA-256 over tag, dimensions, then every cell as `u64 BE length ++ bytes`
fn frame_digest(table: &Table) -> ContentDigest {
    let mut hasher = Sha256::new();
    hasher.update(FRAMING_TAG);
    hasher.update((table.columns.len() as u64).to_be_bytes());
    hasher.update((table.rows.len() as u64).to_be_bytes());
    for cell in table.columns.iter().chain(table.rows.iter().flatten()) {
        hasher.update((cell.len() as u64).to_be_bytes());
        hasher.update(cell.as_bytes());
    }
    ContentDigest::from_hash(&hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_format() {
        let content = ContentHasher::default().canonicalize(b"a\n1\n").unwrap();
        let digest = content.digest.as_str();
        assert!(digest.starts_with("sha256:"));
        assert_eq!(content.digest.hex().len(), 64);
        assert_eq!(ContentDigest::parse(digest), Some(content.digest.clone()));
    }

    #[test]
    fn test_parse_rejects_malformed_digests() {
        assert!(ContentDigest::parse("md5:abc").is_none());
        assert!(ContentDigest::parse("sha256:abc").is_none());
        assert!(ContentDigest::parse(&format!("sha256:{}", "G".repeat(64))).is_none());
        assert!(ContentDigest::parse(&format!("sha256:{}", "A".repeat(64))).is_none());
    }

    #[test]
    fn test_single_cell_change_changes_digest() {
        let hasher = ContentHasher::default();
        let a = hasher.canonicalize(b"a,b\n1,2\n").unwrap();
        let b = hasher.canonicalize(b"a,b\n1,3\n").unwrap();
        assert_ne!(a.digest, b.digest);
    }

    #[test]
    fn test_framing_distinguishes_cell_boundaries() {
        let hasher = ContentHasher::default();
        let a = hasher.canonicalize(b"a,b\nxy,z\n").unwrap();
        let b = hasher.canonicalize(b"a,b\nx,yz\n").unwrap();
        assert_ne!(a.digest, b.digest);
    }

    #[test]
    fn test_row_order_policy() {
        let raw_a = b"k,v\n1,a\n2,b\n";
        let raw_b = b"k,v\n2,b\n1,a\n";

        let preserve = ContentHasher::default();
        assert_ne!(
            preserve.canonicalize(raw_a).unwrap().digest,
            preserve.canonicalize(raw_b).unwrap().digest
        );

        let sorted = ContentHasher::new(HashingOptions {
            row_order: RowOrder::Sorted,
            column_order: ColumnOrder::AsGiven,
        });
        let a = sorted.canonicalize(raw_a).unwrap();
        let b = sorted.canonicalize(raw_b).unwrap();
        assert_eq!(a.digest, b.digest);
        assert_eq!(a.bytes, b.bytes);
    }

    #[test]
    fn test_column_order_policy() {
        let lex = ContentHasher::new(HashingOptions {
            row_order: RowOrder::Preserve,
            column_order: ColumnOrder::Lexicographic,
        });
        let a = lex.canonicalize(b"x,y\n1,2\n").unwrap();
        let b = lex.canonicalize(b"y,x\n2,1\n").unwrap();
        assert_eq!(a.digest, b.digest);
    }

    #[test]
    fn test_counts() {
        let content = ContentHasher::default()
            .canonicalize(b"a,b,c\n1,2,3\n4,5,6\n")
            .unwrap();
        assert_eq!(content.row_count, 2);
        assert_eq!(content.column_count, 3);
    }

    #[test]
    fn test_options_deserialize_snake_case() {
        let opts: HashingOptions =
            serde_json::from_str(r#"{"row_order": "sorted", "column_order": "lexicographic"}"#)
                .unwrap();
        assert_eq!(opts.row_order, RowOrder::Sorted);
        assert_eq!(opts.column_order, ColumnOrder::Lexicographic);

        let partial: HashingOptions = serde_json::from_str(r#"{"row_order": "sorted"}"#).unwrap();
        assert_eq!(partial.column_order, ColumnOrder::AsGiven);
    }
}
