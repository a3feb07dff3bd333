//! Wire messages pushed to browser clients.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What the browser should do with an update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    FullReload,
    CssUpdate,
    ComponentUpdate,
}

/// `{type, target?, content?, timestamp}` with an RFC 3339 timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateMessage {
    #[serde(rename = "type")]
    pub kind: UpdateKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl UpdateMessage {
    pub fn new(kind: UpdateKind) -> Self {
        Self {
            kind,
            target: None,
            content: None,
            timestamp: Utc::now(),
        }
    }

    pub fn full_reload() -> Self {
        Self::new(UpdateKind::FullReload)
    }

    /// Stylesheet at `target` changed.
    pub fn css_update(target: impl Into<String>) -> Self {
        Self::new(UpdateKind::CssUpdate).with_target(target)
    }

    /// Component `target` was rebuilt; `content` is the compiled output.
    pub fn component_update(target: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(UpdateKind::ComponentUpdate)
            .with_target(target)
            .with_content(content)
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
