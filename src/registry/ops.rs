//! Registry mutation verbs (spec §4.4 `UpdateCapabilities`).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityOp {
    Add,
    Remove,
    Replace,
}
