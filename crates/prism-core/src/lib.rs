//! Prism core engine.
//!
//! The pieces a component development server is built from:
//!
//! - [`ComponentRegistry`] - sanitized component table with change events
//! - [`DependencyAnalyzer`] - component-to-component edges and cycle detection
//! - [`BuildCache`] - LRU + TTL cache of compiled artifacts keyed by content hash
//! - [`BuildPipeline`] - worker pool with priority queue, backpressure and result callbacks
//! - [`ComponentScanner`] - discovers component files on disk
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use prism_config::EngineConfig;
//! use prism_core::{BuildCache, BuildPipeline, ComponentInfo, ComponentRegistry, ComponentScanner};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::default();
//! let registry = ComponentRegistry::new(config.registry.clone());
//! ComponentScanner::new("./src").scan_into(&registry)?;
//!
//! let compiler = |component: &ComponentInfo| -> Result<Vec<u8>, String> {
//!     Ok(format!("/* {} */", component.name).into_bytes())
//! };
//! let pipeline = BuildPipeline::new(
//!     config.build.clone(),
//!     Arc::new(BuildCache::new(&config.cache)),
//!     Arc::new(compiler),
//! );
//! pipeline.start(&CancellationToken::new())?;
//! for component in registry.all() {
//!     pipeline.build(component).await?;
//! }
//! pipeline.stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod analyzer;
pub mod cache;
pub mod component;
pub mod error;
pub mod pipeline;
pub mod registry;
pub mod sanitize;
pub mod scanner;

pub use analyzer::{
    DependencyAnalyzer, DependencyGraph, OxcSyntaxProvider, ParsedSource, SyntaxTreeProvider,
    find_cycles,
};
pub use cache::{BuildCache, CacheStats};
pub use component::{ComponentEvent, ComponentEventKind, ComponentInfo, FileChange, ParameterInfo};
pub use error::{AnalyzerError, PipelineError, Result, ScanError};
pub use pipeline::{
    BuildCallback, BuildMetrics, BuildPipeline, BuildPriority, BuildResult, BuildStatus,
    BuildTask, Compiler,
};
pub use registry::{ComponentRegistry, ComponentWatcher, WatcherId, WatcherStats};
pub use scanner::ComponentScanner;
