//! Glue between the registry, the build pipeline and the live-update hub.
//!
//! Registry events schedule builds (`Added` at normal priority, `Updated`
//! elevated) or a full reload (`Removed`). File changes from an external
//! watcher rescan component files and turn stylesheet edits into
//! `css_update` messages. Successful builds reach browsers as
//! `component_update` messages; failed builds are only logged.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use prism_core::{
    BuildPipeline, BuildResult, ComponentEvent, ComponentEventKind, ComponentRegistry,
    ComponentScanner, ComponentWatcher, FileChange, ScanError,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::hub::LiveUpdateHub;
use crate::message::UpdateMessage;

const STYLESHEET_EXTENSIONS: &[&str] = &["css", "scss", "sass", "less"];

pub struct DevCoordinator {
    registry: Arc<ComponentRegistry>,
    pipeline: Arc<BuildPipeline>,
    hub: Arc<LiveUpdateHub>,
    scanner: Arc<ComponentScanner>,
}

impl DevCoordinator {
    pub fn new(
        registry: Arc<ComponentRegistry>,
        pipeline: Arc<BuildPipeline>,
        hub: Arc<LiveUpdateHub>,
        scanner: Arc<ComponentScanner>,
    ) -> Self {
        Self {
            registry,
            pipeline,
            hub,
            scanner,
        }
    }

    /// Scan the project root and register every component found.
    pub fn initial_scan(&self) -> Result<usize, ScanError> {
        self.scanner.scan_into(&self.registry)
    }

    /// Install the build-result callback and spawn the event loop.
    ///
    /// The registry subscription is taken before this returns, so components
    /// registered afterwards are always seen.
    pub fn start(
        self: Arc<Self>,
        changes: mpsc::Receiver<FileChange>,
        token: CancellationToken,
    ) -> JoinHandle<()> {
        let hub = Arc::clone(&self.hub);
        self.pipeline
            .add_callback(move |result| forward_build_result(&hub, result));

        let watcher = self.registry.watch();
        tokio::spawn(async move { self.run(watcher, changes, token).await })
    }

    async fn run(
        &self,
        mut watcher: ComponentWatcher,
        mut changes: mpsc::Receiver<FileChange>,
        token: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => break,
                Some(event) = watcher.recv() => self.handle_event(&event).await,
                Some(change) = changes.recv() => self.handle_file_change(change).await,
                else => break,
            }
        }
        self.registry.unwatch(watcher.id());
        tracing::debug!("dev coordinator stopped");
    }

    pub async fn handle_event(&self, event: &ComponentEvent) {
        let component = Arc::clone(&event.component);
        let name = component.name.clone();

        let scheduled = match event.kind {
            ComponentEventKind::Added => self.pipeline.build(component).await,
            ComponentEventKind::Updated => self.pipeline.build_with_priority(component).await,
            ComponentEventKind::Removed => {
                tracing::info!(component = %name, "component removed, reloading clients");
                self.notify(&UpdateMessage::full_reload()).await;
                return;
            }
        };

        if let Err(err) = scheduled {
            tracing::warn!(component = %name, error = %err, "could not schedule build");
        }
    }

    pub async fn handle_file_change(&self, change: FileChange) {
        let path = change.path().to_path_buf();

        if is_stylesheet(&path) {
            let message = if change.is_removal() {
                UpdateMessage::full_reload()
            } else {
                UpdateMessage::css_update(self.relative_target(&path))
            };
            self.notify(&message).await;
        } else if ComponentScanner::is_component_file(&path) {
            if change.is_removal() {
                let removed = self.registry.remove_by_path(&path);
                tracing::debug!(path = %path.display(), removed = removed.len(), "component file removed");
            } else {
                self.rescan(path).await;
            }
        } else {
            tracing::trace!(path = %path.display(), "ignoring file change");
        }
    }

    async fn rescan(&self, path: PathBuf) {
        let scanner = Arc::clone(&self.scanner);
        let registry = Arc::clone(&self.registry);
        let display = path.display().to_string();

        let rescanned = tokio::task::spawn_blocking(move || {
            scanner
                .scan_file(&path)
                .map(|component| component.map(|component| registry.register(component)))
        })
        .await;

        match rescanned {
            Ok(Ok(Some(component))) => {
                tracing::debug!(component = %component.name, path = %display, "component rescanned");
            }
            Ok(Ok(None)) => {}
            Ok(Err(err)) => tracing::warn!(path = %display, error = %err, "failed to rescan component"),
            Err(err) => tracing::warn!(path = %display, error = %err, "rescan task failed"),
        }
    }

    async fn notify(&self, message: &UpdateMessage) {
        if let Err(err) = self.hub.broadcast(message).await {
            tracing::warn!(kind = ?message.kind, error = %err, "live update not delivered");
        }
    }

    /// `path` relative to the project root with `/` separators, or the full
    /// path when it lies outside the root.
    fn relative_target(&self, path: &Path) -> String {
        match path.strip_prefix(self.scanner.root()) {
            Ok(relative) => relative
                .components()
                .map(|part| part.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/"),
            Err(_) => path.display().to_string(),
        }
    }
}

impl std::fmt::Debug for DevCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DevCoordinator")
            .field("root", &self.scanner.root())
            .finish_non_exhaustive()
    }
}

fn forward_build_result(hub: &LiveUpdateHub, result: &BuildResult) {
    if let Some(error) = &result.error {
        tracing::warn!(component = %result.component.name, %error, "build failed, clients not notified");
        return;
    }

    let content = String::from_utf8_lossy(&result.output);
    let message = UpdateMessage::component_update(result.component.name.as_str(), content);
    if let Err(err) = hub.try_broadcast(&message) {
        tracing::warn!(component = %result.component.name, error = %err, "component update not delivered");
    }
}

fn is_stylesheet(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| STYLESHEET_EXTENSIONS.contains(&ext))
}
