//! Sanitization of untrusted component metadata.
//!
//! Scanner output is treated as hostile: names, packages, parameter names and
//! types, dependency names and file paths are filtered to a safe character
//! set, and any value that still looks like a traversal or system-path probe
//! is replaced with [`SAFE_PLACEHOLDER`]. This runs once, when a component
//! enters the registry.
//!
//! # Security
//!
//! - Control characters never reach the registry table
//! - `..` and system-directory paths are neutralized, not stored verbatim
//! - Nothing here fails: malformed input degrades to the placeholder

use std::path::{Component, Path, PathBuf};

use crate::component::ComponentInfo;

/// Replacement for values that cannot be made safe by filtering.
pub const SAFE_PLACEHOLDER: &str = "sanitized";

/// Path segments that are never legitimate parts of a component identity.
const DANGEROUS_SEGMENTS: &[&str] = &["etc", "system32", "passwd", "shadow"];

/// Absolute prefixes of system directories (compared case-insensitively).
const SYSTEM_PREFIXES: &[&str] = &[
    "/etc", "/bin", "/sbin", "/boot", "/dev", "/proc", "/sys", "/usr/bin", "/usr/sbin",
    "c:\\windows", "c:/windows",
];

/// Sanitize every untrusted field of a component.
///
/// Returns the cleaned component and the number of fields that had to be
/// changed. Each change is logged with the field name so that sanitization
/// leaves an audit trail.
pub fn sanitize_component(mut component: ComponentInfo) -> (ComponentInfo, usize) {
    let mut changed = 0;

    component.name = audited("name", component.name, sanitize_name, &mut changed);
    component.package = audited("package", component.package, sanitize_package, &mut changed);

    for parameter in &mut component.parameters {
        let name = std::mem::take(&mut parameter.name);
        parameter.name = audited("parameter.name", name, sanitize_name, &mut changed);
        let ty = std::mem::take(&mut parameter.ty);
        parameter.ty = audited("parameter.type", ty, sanitize_type, &mut changed);
        if let Some(default) = parameter.default.take() {
            parameter.default = Some(audited(
                "parameter.default",
                default,
                strip_control,
                &mut changed,
            ));
        }
    }

    let dependencies = std::mem::take(&mut component.dependencies);
    component.dependencies = dependencies
        .into_iter()
        .map(|dep| audited("dependency", dep, sanitize_name, &mut changed))
        .collect();

    let imports = std::mem::take(&mut component.imports);
    component.imports = imports
        .into_iter()
        .map(|import| audited("import", import, strip_control, &mut changed))
        .collect();

    let path = sanitize_path(&component.file_path);
    if path != component.file_path {
        tracing::warn!(
            field = "file_path",
            original = %component.file_path.display(),
            replacement = %path.display(),
            "sanitized component metadata"
        );
        component.file_path = path;
        changed += 1;
    }

    (component, changed)
}

fn audited(
    field: &'static str,
    original: String,
    clean: fn(&str) -> String,
    changed: &mut usize,
) -> String {
    let cleaned = clean(&original);
    if cleaned != original {
        tracing::warn!(
            field,
            original = ?original,
            replacement = %cleaned,
            "sanitized component metadata"
        );
        *changed += 1;
    }
    cleaned
}

/// Sanitize a component, parameter or dependency name.
///
/// Keeps ASCII alphanumerics plus `_`, `-`, `.` and `$`. Empty or dangerous
/// results become [`SAFE_PLACEHOLDER`].
pub fn sanitize_name(value: &str) -> String {
    let filtered: String = value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '$'))
        .collect();

    if filtered.is_empty() || is_dangerous(&filtered) {
        SAFE_PLACEHOLDER.to_string()
    } else {
        filtered
    }
}

/// Sanitize a package name. Unlike names, an empty package is kept empty.
pub fn sanitize_package(value: &str) -> String {
    if value.is_empty() {
        return String::new();
    }
    let filtered: String = value
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '/' | '@'))
        .collect();

    if filtered.is_empty() || is_dangerous(&filtered) || filtered.starts_with('/') {
        SAFE_PLACEHOLDER.to_string()
    } else {
        filtered
    }
}

/// Sanitize a parameter type expression such as `Array<string> | undefined`.
pub fn sanitize_type(value: &str) -> String {
    let filtered: String = value
        .chars()
        .filter(|c| {
            c.is_ascii_alphanumeric()
                || matches!(
                    c,
                    '_' | '.' | '$' | '[' | ']' | '<' | '>' | '(' | ')' | '{' | '}' | ','
                        | '|' | '&' | '?' | ':' | '=' | '*' | ' ' | '\'' | '"'
                )
        })
        .collect();

    if is_dangerous(&filtered) {
        SAFE_PLACEHOLDER.to_string()
    } else {
        filtered
    }
}

/// Sanitize a component file path.
///
/// Relative paths and absolute project paths pass through (minus control
/// characters). Traversal components, system-directory prefixes and
/// dangerous segments turn the whole path into [`SAFE_PLACEHOLDER`].
pub fn sanitize_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    let filtered = strip_control(&raw);
    if filtered.is_empty() {
        return PathBuf::new();
    }

    let lowered = filtered.to_ascii_lowercase();
    let system_path = SYSTEM_PREFIXES.iter().any(|prefix| {
        lowered == *prefix
            || lowered
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('/') || rest.starts_with('\\'))
    });

    let candidate = PathBuf::from(&filtered);
    let traversal = filtered.contains("..")
        || candidate
            .components()
            .any(|component| matches!(component, Component::ParentDir));
    let dangerous_segment = filtered
        .split(['/', '\\'])
        .any(is_dangerous_segment);

    if system_path || traversal || dangerous_segment {
        PathBuf::from(SAFE_PLACEHOLDER)
    } else {
        candidate
    }
}

fn strip_control(value: &str) -> String {
    value.chars().filter(|c| !c.is_control()).collect()
}

fn is_dangerous(value: &str) -> bool {
    value.contains("..")
        || value
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(is_dangerous_segment)
}

fn is_dangerous_segment(segment: &str) -> bool {
    DANGEROUS_SEGMENTS
        .iter()
        .any(|dangerous| segment.eq_ignore_ascii_case(dangerous))
}
