//! Thread-safe component registry with change notification.
//!
//! The table sits behind one `parking_lot::RwLock`. Dependency analysis runs
//! between two short write sections, so a freshly registered component is
//! briefly visible with its declared (not yet analyzed) dependencies.
//!
//! `Added` vs `Updated` is decided in the first write section but sent after
//! analysis. Two concurrent registrations of the same new name can therefore
//! reach subscribers as `Updated` before `Added`.
//!
//! Subscribers get bounded channels. Broadcasting never blocks: an event for
//! a subscriber whose channel is full is dropped and counted.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use prism_config::RegistryConfig;
use rustc_hash::FxHashMap;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::analyzer::{DependencyAnalyzer, DependencyGraph};
use crate::component::{ComponentEvent, ComponentEventKind, ComponentInfo};
use crate::error::AnalyzerError;
use crate::sanitize::{sanitize_component, sanitize_path};

/// Identifies one `watch()` subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WatcherId(u64);

impl std::fmt::Display for WatcherId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "watcher-{}", self.0)
    }
}

/// Receiving end of a registry subscription.
#[derive(Debug)]
pub struct ComponentWatcher {
    id: WatcherId,
    receiver: mpsc::Receiver<Arc<ComponentEvent>>,
}

impl ComponentWatcher {
    pub fn id(&self) -> WatcherId {
        self.id
    }

    /// Wait for the next event. Returns `None` once the subscription is closed
    /// and every buffered event has been received.
    pub async fn recv(&mut self) -> Option<Arc<ComponentEvent>> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<ComponentEvent>> {
        self.receiver.try_recv().ok()
    }

    /// Number of events waiting in the channel.
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }
}

struct Subscriber {
    id: WatcherId,
    sender: mpsc::Sender<Arc<ComponentEvent>>,
    dropped: AtomicU64,
}

/// Per-subscriber delivery statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatcherStats {
    pub id: WatcherId,
    pub pending: usize,
    pub dropped: u64,
}

pub struct ComponentRegistry {
    components: RwLock<FxHashMap<String, Arc<ComponentInfo>>>,
    subscribers: RwLock<Vec<Subscriber>>,
    analyzer: DependencyAnalyzer,
    config: RegistryConfig,
    next_watcher_id: AtomicU64,
    dropped_events: AtomicU64,
    sanitized_values: AtomicU64,
}

impl ComponentRegistry {
    /// Create a registry with its own Oxc-backed analyzer.
    pub fn new(config: RegistryConfig) -> Self {
        Self::with_analyzer(config, DependencyAnalyzer::default())
    }

    pub fn with_analyzer(config: RegistryConfig, analyzer: DependencyAnalyzer) -> Self {
        Self {
            components: RwLock::new(FxHashMap::default()),
            subscribers: RwLock::new(Vec::new()),
            analyzer,
            config,
            next_watcher_id: AtomicU64::new(0),
            dropped_events: AtomicU64::new(0),
            sanitized_values: AtomicU64::new(0),
        }
    }

    /// Insert or update a component and notify subscribers.
    ///
    /// The component is sanitized first. If its source can be analyzed, the
    /// analyzed dependencies replace the declared ones; otherwise the
    /// declared list is kept. Returns the stored value.
    pub fn register(&self, component: ComponentInfo) -> Arc<ComponentInfo> {
        let (component, changed) = sanitize_component(component);
        if changed > 0 {
            self.sanitized_values
                .fetch_add(changed as u64, Ordering::Relaxed);
        }

        let name = component.name.clone();
        let stored = Arc::new(component);
        let is_new = self
            .components
            .write()
            .insert(name.clone(), Arc::clone(&stored))
            .is_none();

        let current = match self
            .analyzer
            .analyze_component(&stored, |dep| self.contains(dep))
        {
            Ok(dependencies) => self.store_dependencies(&name, stored, dependencies),
            Err(err) => {
                tracing::debug!(
                    component = %name,
                    error = %err,
                    "dependency analysis skipped, keeping declared dependencies"
                );
                stored
            }
        };

        let kind = if is_new {
            ComponentEventKind::Added
        } else {
            ComponentEventKind::Updated
        };
        tracing::debug!(component = %name, ?kind, "component registered");
        self.broadcast(ComponentEvent::new(kind, Arc::clone(&current)));

        current
    }

    fn store_dependencies(
        &self,
        name: &str,
        stored: Arc<ComponentInfo>,
        dependencies: Vec<String>,
    ) -> Arc<ComponentInfo> {
        let mut table = self.components.write();
        match table.get_mut(name) {
            Some(entry) if Arc::ptr_eq(entry, &stored) => {
                let mut updated = (*stored).clone();
                updated.dependencies = dependencies;
                let updated = Arc::new(updated);
                *entry = Arc::clone(&updated);
                updated
            }
            // A newer registration or a removal got in first; leave the table alone.
            _ => stored,
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<ComponentInfo>> {
        self.components.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.components.read().contains_key(name)
    }

    /// All components, ordered by name.
    pub fn all(&self) -> Vec<Arc<ComponentInfo>> {
        let mut components: Vec<_> = self.components.read().values().cloned().collect();
        components.sort_by(|a, b| a.name.cmp(&b.name));
        components
    }

    pub fn count(&self) -> usize {
        self.components.read().len()
    }

    /// Remove a component and broadcast `Removed`. Absent names are a no-op.
    pub fn remove(&self, name: &str) -> Option<Arc<ComponentInfo>> {
        let removed = self.components.write().remove(name)?;
        tracing::debug!(component = %name, "component removed");
        self.broadcast(ComponentEvent::new(
            ComponentEventKind::Removed,
            Arc::clone(&removed),
        ));
        Some(removed)
    }

    /// Remove every component defined in the file at `path`.
    pub fn remove_by_path(&self, path: &Path) -> Vec<Arc<ComponentInfo>> {
        let path = sanitize_path(path);
        let names: Vec<String> = self
            .components
            .read()
            .values()
            .filter(|component| component.file_path == path)
            .map(|component| component.name.clone())
            .collect();

        names
            .iter()
            .filter_map(|name| self.remove(name))
            .collect()
    }

    /// Subscribe to registry events.
    pub fn watch(&self) -> ComponentWatcher {
        let id = WatcherId(self.next_watcher_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(self.config.watcher_capacity);

        self.subscribers.write().push(Subscriber {
            id,
            sender,
            dropped: AtomicU64::new(0),
        });

        ComponentWatcher { id, receiver }
    }

    /// Close and deregister a subscription. Returns `false` if it was unknown.
    pub fn unwatch(&self, id: WatcherId) -> bool {
        let mut subscribers = self.subscribers.write();
        let before = subscribers.len();
        subscribers.retain(|subscriber| subscriber.id != id);
        before != subscribers.len()
    }

    pub fn watcher_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn watcher_stats(&self) -> Vec<WatcherStats> {
        self.subscribers
            .read()
            .iter()
            .map(|subscriber| WatcherStats {
                id: subscriber.id,
                pending: subscriber.sender.max_capacity() - subscriber.sender.capacity(),
                dropped: subscriber.dropped.load(Ordering::Relaxed),
            })
            .collect()
    }

    /// Events dropped because a subscriber's channel was full.
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Component fields rewritten by sanitization since creation.
    pub fn sanitized_values(&self) -> u64 {
        self.sanitized_values.load(Ordering::Relaxed)
    }

    fn broadcast(&self, event: ComponentEvent) {
        let event = Arc::new(event);
        let mut closed = Vec::new();

        {
            let subscribers = self.subscribers.read();
            for subscriber in subscribers.iter() {
                match subscriber.sender.try_send(Arc::clone(&event)) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        subscriber.dropped.fetch_add(1, Ordering::Relaxed);
                        self.dropped_events.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(
                            watcher = %subscriber.id,
                            component = %event.component.name,
                            "subscriber channel full, dropping event"
                        );
                    }
                    Err(TrySendError::Closed(_)) => closed.push(subscriber.id),
                }
            }
        }

        if !closed.is_empty() {
            self.subscribers
                .write()
                .retain(|subscriber| !closed.contains(&subscriber.id));
        }
    }

    pub fn analyzer(&self) -> &DependencyAnalyzer {
        &self.analyzer
    }

    /// Analyze a component against the current table without storing anything.
    pub fn analyze_component(&self, component: &ComponentInfo) -> Result<Vec<String>, AnalyzerError> {
        self.analyzer
            .analyze_component(component, |dep| self.contains(dep))
    }

    /// Re-run analysis for every stored component and update changed
    /// dependency lists in place. No events are emitted.
    ///
    /// Needed after bulk registration, where a component may have been
    /// analyzed before the components it references were registered.
    /// Returns the number of components whose dependencies changed.
    pub fn refresh_dependencies(&self) -> usize {
        let mut updated = 0;
        for component in self.all() {
            let Ok(dependencies) = self.analyze_component(&component) else {
                continue;
            };
            if dependencies != component.dependencies {
                self.store_dependencies(&component.name, component, dependencies);
                updated += 1;
            }
        }
        updated
    }

    /// Snapshot of the stored dependency lists.
    pub fn dependency_graph(&self) -> DependencyGraph {
        let table = self.components.read();
        self.analyzer
            .dependency_graph(table.values().map(|component| component.as_ref()))
    }

    pub fn detect_circular_dependencies(&self) -> Vec<Vec<String>> {
        let graph = self.dependency_graph();
        self.analyzer.detect_circular_dependencies(&graph)
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("components", &self.count())
            .field("watchers", &self.watcher_count())
            .finish()
    }
}
