use serde::{Deserialize, Serialize};

/// Who authored a message. The wire-level `system` and `tool` roles are
/// synthesized at the provider boundary and never appear in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}
