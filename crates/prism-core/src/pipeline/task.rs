//! Build tasks and results.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::component::ComponentInfo;

/// Dequeue class of a build task. Elevated tasks always leave the queue first.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildPriority {
    #[default]
    Normal,
    Elevated,
}

#[derive(Debug, Clone)]
pub struct BuildTask {
    pub component: Arc<ComponentInfo>,
    pub priority: BuildPriority,
    pub enqueued_at: Instant,
}

impl BuildTask {
    pub fn new(component: Arc<ComponentInfo>, priority: BuildPriority) -> Self {
        Self {
            component,
            priority,
            enqueued_at: Instant::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildStatus {
    Success,
    Failed,
}

/// Outcome of one build task, delivered to every registered callback.
#[derive(Debug, Clone)]
pub struct BuildResult {
    pub component: Arc<ComponentInfo>,
    pub output: Arc<[u8]>,
    /// Compiler error text. `None` on success.
    pub error: Option<String>,
    pub duration: Duration,
    pub cache_hit: bool,
    pub content_hash: String,
    pub priority: BuildPriority,
}

impl BuildResult {
    pub(crate) fn success(
        task: &BuildTask,
        content_hash: String,
        output: Arc<[u8]>,
        cache_hit: bool,
        started: Instant,
    ) -> Self {
        Self {
            component: Arc::clone(&task.component),
            output,
            error: None,
            duration: started.elapsed(),
            cache_hit,
            content_hash,
            priority: task.priority,
        }
    }

    pub(crate) fn failure(
        task: &BuildTask,
        content_hash: String,
        error: impl Into<String>,
        started: Instant,
    ) -> Self {
        Self {
            component: Arc::clone(&task.component),
            output: Arc::from(Vec::new()),
            error: Some(error.into()),
            duration: started.elapsed(),
            cache_hit: false,
            content_hash,
            priority: task.priority,
        }
    }

    pub fn status(&self) -> BuildStatus {
        if self.error.is_some() {
            BuildStatus::Failed
        } else {
            BuildStatus::Success
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Hash identifying a component's build input.
///
/// Covers the name and the source file contents. When the source cannot be
/// read, falls back to the metadata the scanner recorded (path, content hash
/// and parameters) so unreadable components still get a stable key.
pub fn content_hash(component: &ComponentInfo) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(component.name.as_bytes());
    hasher.update(&[0]);

    match std::fs::read(&component.file_path) {
        Ok(source) => {
            hasher.update(&source);
        }
        Err(_) => {
            hasher.update(component.file_path.to_string_lossy().as_bytes());
            hasher.update(&[0]);
            hasher.update(component.content_hash.as_bytes());
            for param in &component.parameters {
                hasher.update(&[0]);
                hasher.update(param.name.as_bytes());
                hasher.update(b":");
                hasher.update(param.ty.as_bytes());
            }
        }
    }

    hasher.finalize().to_hex().to_string()
}
