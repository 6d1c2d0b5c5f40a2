//! Model configuration, loadable from JSON.
//!
//! ```json
//! { "workspace_id": "main", "group_single_events": false, "strict_extensions": true }
//! ```

use crate::error::BlockLoadError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Id stamped on events of tracked blocks. Defaults to a fresh uuid.
    pub workspace_id: String,
    /// Stamp a group id even on a flush of a single event.
    pub group_single_events: bool,
    /// Treat unknown extension names as load errors instead of warnings.
    pub strict_extensions: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            workspace_id: uuid::Uuid::new_v4().to_string(),
            group_single_events: false,
            strict_extensions: false,
        }
    }
}

impl ModelConfig {
    pub fn from_json(json: &str) -> Result<Self, BlockLoadError> {
        Ok(serde_json::from_str(json)?)
    }
}
