//! Path helpers for SFTP operations
//!
//! Remote SFTP paths always use `/` as separator, regardless of the local or
//! remote OS. Local paths go through `Path`/`PathBuf`.

use std::path::{Component, Path};

/// Check if a remote SFTP path is absolute.
pub fn is_absolute_remote_path(path: &str) -> bool {
    path.starts_with('/')
}

/// Join remote SFTP path components using `/` separator.
pub fn join_remote_path(base: &str, component: &str) -> String {
    if base.is_empty() {
        component.to_string()
    } else if base.ends_with('/') {
        format!("{}{}", base, component)
    } else {
        format!("{}/{}", base, component)
    }
}

/// Render a relative local path as a `/`-separated remote suffix.
pub fn relative_to_remote(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Every ancestor of `path` (including itself), shortest first.
///
/// `/srv/app/data` yields `/srv`, `/srv/app`, `/srv/app/data`; used to create a
/// remote directory chain one level at a time.
pub fn remote_ancestors(path: &str) -> Vec<String> {
    let absolute = is_absolute_remote_path(path);
    let mut current = String::new();
    let mut out = Vec::new();
    for part in path.split('/').filter(|p| !p.is_empty() && *p != ".") {
        current = if current.is_empty() {
            if absolute {
                format!("/{}", part)
            } else {
                part.to_string()
            }
        } else {
            join_remote_path(&current, part)
        };
        out.push(current.clone());
    }
    out
}
