//! Block documents as stored in and served by the block store.

use serde::{Deserialize, Serialize};

/// One block on a chain. `data` is the pre-serialized JSON document for the block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BlockDocument {
    pub height: u64,
    pub data: String,
}

impl BlockDocument {
    pub fn new(height: u64, data: impl Into<String>) -> Self {
        Self {
            height,
            data: data.into(),
        }
    }
}
