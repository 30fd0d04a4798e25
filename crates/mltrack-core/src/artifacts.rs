//! Artifact locations: local directories and artifacts proxied by a tracking server.

use std::fs;
use std::path::{Component, Path, PathBuf};

use crate::error::{Result, TrackingError};

/// Where an artifact URI points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactLocation {
    /// `file:` URI or bare filesystem path.
    Local(PathBuf),
    /// `mlflow-artifacts:` URI served by a tracking server's artifact proxy.
    Proxied { host: Option<String>, path: String },
}

impl ArtifactLocation {
    pub fn parse(uri: &str) -> Result<Self> {
        if let Some(rest) = uri.strip_prefix("mlflow-artifacts:") {
            let (host, path) = match rest.strip_prefix("//") {
                Some(authority_and_path) => match authority_and_path.split_once('/') {
                    Some((host, path)) => (Some(host.to_string()), path.to_string()),
                    None => (Some(authority_and_path.to_string()), String::new()),
                },
                None => (None, rest.trim_start_matches('/').to_string()),
            };
            let host = host.filter(|h| !h.is_empty());
            return Ok(ArtifactLocation::Proxied { host, path });
        }
        match local_path_from_uri(uri) {
            Some(path) => Ok(ArtifactLocation::Local(path)),
            None => Err(TrackingError::UnsupportedUri(uri.to_string())),
        }
    }

    /// Location of `relative` below this one.
    pub fn join(&self, relative: &str) -> Self {
        let relative = relative.trim_matches('/');
        match self {
            ArtifactLocation::Local(path) if relative.is_empty() => {
                ArtifactLocation::Local(path.clone())
            }
            ArtifactLocation::Local(path) => ArtifactLocation::Local(path.join(relative)),
            ArtifactLocation::Proxied { host, path } => ArtifactLocation::Proxied {
                host: host.clone(),
                path: join_slash(path, relative),
            },
        }
    }

    pub fn to_uri(&self) -> String {
        match self {
            ArtifactLocation::Local(path) => path_to_uri(path),
            ArtifactLocation::Proxied { host: Some(host), path } => {
                format!("mlflow-artifacts://{host}/{path}")
            }
            ArtifactLocation::Proxied { host: None, path } => format!("mlflow-artifacts:/{path}"),
        }
    }
}

/// Filesystem path of a `file:` URI or bare path. `None` for any other scheme.
pub fn local_path_from_uri(uri: &str) -> Option<PathBuf> {
    if let Some(rest) = uri.strip_prefix("file://") {
        // file:///abs/path or file://localhost/abs/path
        let rest = rest.strip_prefix("localhost").unwrap_or(rest);
        return Some(PathBuf::from(rest));
    }
    if let Some(rest) = uri.strip_prefix("file:") {
        return Some(PathBuf::from(rest));
    }
    if has_scheme(uri) {
        return None;
    }
    Some(PathBuf::from(uri))
}

/// `file://` URI for `path`, made absolute against the working directory.
pub fn path_to_uri(path: &Path) -> String {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };
    format!("file://{}", normalize(&absolute).display())
}

/// Whether `uri` starts with `<scheme>:` (single-letter schemes are drive letters).
pub fn has_scheme(uri: &str) -> bool {
    match uri.split_once(':') {
        Some((scheme, _)) => {
            scheme.len() > 1
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

pub(crate) fn join_slash(base: &str, relative: &str) -> String {
    match (base.trim_end_matches('/'), relative.trim_start_matches('/')) {
        ("", rel) => rel.to_string(),
        (base, "") => base.to_string(),
        (base, rel) => format!("{base}/{rel}"),
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

// ─── Local directory helpers ─────────────────────────────────────────────────

/// Relative paths of every file below `root`, `/`-separated and sorted.
pub fn list_files(root: &Path) -> Result<Vec<String>> {
    let mut files = vec![];
    if root.is_file() {
        if let Some(name) = root.file_name().and_then(|n| n.to_str()) {
            files.push(name.to_string());
        }
        return Ok(files);
    }
    collect_files(root, root, &mut files)?;
    files.sort();
    Ok(files)
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.is_dir() {
            collect_files(root, &path, out)?;
        } else {
            let rel = path.strip_prefix(root).unwrap_or(&path);
            let parts: Vec<_> = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect();
            out.push(parts.join("/"));
        }
    }
    Ok(())
}

/// Copy a file or directory tree from `src` into `dest`. Returns the number of files copied.
pub fn copy_tree(src: &Path, dest: &Path) -> Result<usize> {
    if src.is_file() {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src, dest)?;
        return Ok(1);
    }
    if !src.exists() {
        return Err(TrackingError::ResourceDoesNotExist(format!(
            "artifact path {}",
            src.display()
        )));
    }
    let files = list_files(src)?;
    fs::create_dir_all(dest)?;
    for rel in &files {
        let target = dest.join(rel);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src.join(rel), &target)?;
    }
    Ok(files.len())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_local_uris() {
        assert_eq!(
            ArtifactLocation::parse("file:///tmp/mlruns/0").unwrap(),
            ArtifactLocation::Local(PathBuf::from("/tmp/mlruns/0"))
        );
        assert_eq!(
            ArtifactLocation::parse("file:relative/dir").unwrap(),
            ArtifactLocation::Local(PathBuf::from("relative/dir"))
        );
        assert_eq!(
            ArtifactLocation::parse("./mlruns").unwrap(),
            ArtifactLocation::Local(PathBuf::from("./mlruns"))
        );
    }

    #[test]
    fn parses_proxied_uris() {
        assert_eq!(
            ArtifactLocation::parse("mlflow-artifacts:/1/abc/artifacts").unwrap(),
            ArtifactLocation::Proxied { host: None, path: "1/abc/artifacts".into() }
        );
        assert_eq!(
            ArtifactLocation::parse("mlflow-artifacts://srv:5000/1/abc").unwrap(),
            ArtifactLocation::Proxied { host: Some("srv:5000".into()), path: "1/abc".into() }
        );
    }

    #[test]
    fn rejects_unknown_schemes() {
        assert!(matches!(
            ArtifactLocation::parse("s3://bucket/key"),
            Err(TrackingError::UnsupportedUri(_))
        ));
    }

    #[test]
    fn join_appends_relative_paths() {
        let base = ArtifactLocation::parse("mlflow-artifacts:/1/abc/artifacts").unwrap();
        assert_eq!(base.join("model").to_uri(), "mlflow-artifacts:/1/abc/artifacts/model");
    }
}
