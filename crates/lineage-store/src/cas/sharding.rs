//! Shard layout: `<root>/<first two hex chars>/<address>`

use std::path::{Path, PathBuf};

pub fn shard_path(root: &Path, address: &str) -> PathBuf {
    let shard = &address[..2.min(address.len())];
    root.join(shard).join(address)
}

/// A location is a full lowercase SHA-256 hex string
pub fn is_content_address(location: &str) -> bool {
    location.len() == 64
        && location
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
