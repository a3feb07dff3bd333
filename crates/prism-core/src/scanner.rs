//! Directory scanner that discovers component files.
//!
//! A component file is a `.jsx` or `.tsx` file whose stem starts with an
//! uppercase letter; the stem is the component name. Hidden entries,
//! `node_modules` and common build output directories are skipped.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rayon::prelude::*;
use walkdir::{DirEntry, WalkDir};

use crate::analyzer::{OxcSyntaxProvider, SyntaxTreeProvider};
use crate::component::ComponentInfo;
use crate::error::ScanError;
use crate::registry::ComponentRegistry;

const COMPONENT_EXTENSIONS: &[&str] = &["jsx", "tsx"];
const SKIPPED_DIRS: &[&str] = &["node_modules", "dist", "build", "target", "coverage"];

pub struct ComponentScanner {
    root: PathBuf,
    provider: Arc<dyn SyntaxTreeProvider>,
}

impl ComponentScanner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_provider(root, Arc::new(OxcSyntaxProvider::new()))
    }

    pub fn with_provider(root: impl Into<PathBuf>, provider: Arc<dyn SyntaxTreeProvider>) -> Self {
        Self {
            root: root.into(),
            provider,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Whether `path` names a component file.
    pub fn is_component_file(path: &Path) -> bool {
        let has_extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| COMPONENT_EXTENSIONS.contains(&ext));
        has_extension && component_name(path).is_some()
    }

    /// Paths of every component file under the root, sorted.
    pub fn discover(&self) -> Result<Vec<PathBuf>, ScanError> {
        if !self.root.is_dir() {
            return Err(ScanError::RootNotFound(self.root.clone()));
        }

        let mut paths = Vec::new();
        let walker = WalkDir::new(&self.root)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || !is_skipped(entry));

        for entry in walker {
            let entry = entry?;
            if entry.file_type().is_file() && Self::is_component_file(entry.path()) {
                paths.push(entry.into_path());
            }
        }

        paths.sort();
        Ok(paths)
    }

    /// Discover and inspect every component under the root, in parallel.
    pub fn scan(&self) -> Result<Vec<ComponentInfo>, ScanError> {
        let paths = self.discover()?;
        let results: Vec<Result<Option<ComponentInfo>, ScanError>> =
            paths.par_iter().map(|path| self.scan_file(path)).collect();

        let mut components = Vec::with_capacity(results.len());
        for result in results {
            if let Some(component) = result? {
                components.push(component);
            }
        }
        tracing::debug!(root = %self.root.display(), count = components.len(), "component scan finished");
        Ok(components)
    }

    /// Inspect one file. Returns `Ok(None)` when it is not a component file.
    ///
    /// An unparsable source still yields a component, with no imports.
    pub fn scan_file(&self, path: &Path) -> Result<Option<ComponentInfo>, ScanError> {
        if !Self::is_component_file(path) {
            return Ok(None);
        }
        let Some(name) = component_name(path) else {
            return Ok(None);
        };

        let source = std::fs::read_to_string(path)?;
        let metadata = std::fs::metadata(path)?;
        let last_modified = metadata.modified().ok().map(DateTime::<Utc>::from);

        let imports = match self.provider.parse_source(path, &source) {
            Ok(parsed) => parsed.imports,
            Err(err) => {
                tracing::debug!(path = %path.display(), error = %err, "could not parse component source");
                Vec::new()
            }
        };

        let mut component = ComponentInfo::new(name, path)
            .with_package(self.package_of(path))
            .with_content_hash(blake3::hash(source.as_bytes()).to_hex().to_string());
        component.imports = imports;
        component.last_modified = last_modified;

        Ok(Some(component))
    }

    /// Scan and register everything found. Registration runs in parallel, so
    /// dependency lists are refreshed once all components are present.
    pub fn scan_into(&self, registry: &ComponentRegistry) -> Result<usize, ScanError> {
        let components = self.scan()?;
        let count = components.len();

        components.into_par_iter().for_each(|component| {
            registry.register(component);
        });
        let refreshed = registry.refresh_dependencies();

        tracing::info!(root = %self.root.display(), components = count, refreshed, "registered scanned components");
        Ok(count)
    }

    /// Directory of `path` relative to the root, `/`-separated. Empty for
    /// files directly under the root or outside it.
    fn package_of(&self, path: &Path) -> String {
        path.parent()
            .and_then(|parent| parent.strip_prefix(&self.root).ok())
            .map(|relative| {
                relative
                    .components()
                    .map(|part| part.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/")
            })
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for ComponentScanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentScanner")
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

fn component_name(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    stem.chars()
        .next()
        .is_some_and(|first| first.is_ascii_uppercase())
        .then(|| stem.to_string())
}

fn is_skipped(entry: &DirEntry) -> bool {
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || (entry.file_type().is_dir() && SKIPPED_DIRS.contains(&name.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write(dir: &TempDir, relative: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_is_component_file() {
        assert!(ComponentScanner::is_component_file(Path::new("src/Button.tsx")));
        assert!(ComponentScanner::is_component_file(Path::new("Card.jsx")));
        assert!(!ComponentScanner::is_component_file(Path::new("src/button.tsx")));
        assert!(!ComponentScanner::is_component_file(Path::new("src/Button.ts")));
        assert!(!ComponentScanner::is_component_file(Path::new("styles.css")));
    }

    #[test]
    fn test_discover_skips_hidden_and_vendor_dirs() {
        let dir = TempDir::new().unwrap();
        write(&dir, "src/Button.tsx", "export const Button = () => <button/>;");
        write(&dir, "src/ui/Card.jsx", "export const Card = () => <div/>;");
        write(&dir, "src/utils.ts", "export const x = 1;");
        write(&dir, "node_modules/lib/Thing.tsx", "export const Thing = 1;");
        write(&dir, ".cache/Hidden.tsx", "export const Hidden = 1;");
        write(&dir, "dist/Bundle.jsx", "export const Bundle = 1;");

        let scanner = ComponentScanner::new(dir.path());
        let names: Vec<_> = scanner
            .discover()
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();

        assert_eq!(names, vec!["Button.tsx", "Card.jsx"]);
    }

    #[test]
    fn test_scan_file_fills_metadata() {
        let dir = TempDir::new().unwrap();
        let source = "import React from 'react';\nimport { Icon } from './Icon';\nexport function Card() { return <Icon/>; }\n";
        let path = write(&dir, "src/ui/Card.tsx", source);

        let scanner = ComponentScanner::new(dir.path());
        let component = scanner.scan_file(&path).unwrap().unwrap();

        assert_eq!(component.name, "Card");
        assert_eq!(component.package, "src/ui");
        assert_eq!(component.file_path, path);
        assert_eq!(component.imports, vec!["react", "./Icon"]);
        assert_eq!(component.content_hash, blake3::hash(source.as_bytes()).to_hex().to_string());
        assert!(component.last_modified.is_some());
    }

    #[test]
    fn test_unparsable_source_still_scanned() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "Broken.tsx", "export function Broken( {");

        let component = ComponentScanner::new(dir.path()).scan_file(&path).unwrap().unwrap();
        assert_eq!(component.name, "Broken");
        assert!(component.imports.is_empty());
    }

    #[test]
    fn test_missing_root() {
        let scanner = ComponentScanner::new("/definitely/not/here");
        assert!(matches!(scanner.scan(), Err(ScanError::RootNotFound(_))));
    }

    #[test]
    fn test_scan_into_resolves_forward_references() {
        let dir = TempDir::new().unwrap();
        write(&dir, "App.tsx", "export function App() { return <Layout><Card/></Layout>; }");
        write(&dir, "Layout.tsx", "export function Layout({ children }) { return <main>{children}</main>; }");
        write(&dir, "Card.tsx", "export function Card() { return <Button/>; }");
        write(&dir, "Button.tsx", "export function Button() { return <button/>; }");

        let registry = ComponentRegistry::default();
        let count = ComponentScanner::new(dir.path()).scan_into(&registry).unwrap();

        assert_eq!(count, 4);
        assert_eq!(registry.count(), 4);
        let graph = registry.dependency_graph();
        assert_eq!(graph["App"], vec!["Layout", "Card"]);
        assert_eq!(graph["Card"], vec!["Button"]);
        assert!(graph["Button"].is_empty());
        assert!(registry.detect_circular_dependencies().is_empty());
    }
}
