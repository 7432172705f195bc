/// File collection and archive path resolution
///
/// This module handles:
/// - Walking source roots for the regular files to package
/// - Mapping each file to its path inside the archive
/// - Detecting two files that would land on the same archive entry
/// - Discovering dependency jars for the compile classpath

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{PackError, Result};

/// A file selected for packaging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateFile {
    /// Location of the file on disk
    pub absolute_path: PathBuf,
    /// Entry name inside the archive, always `/`-separated
    pub relative_path: String,
}

/// Maps an absolute file path to its path inside the archive.
///
/// Closures of type `Fn(&Path) -> PathBuf` implement this trait, so callers
/// can inject their own layout.
pub trait RootResolver {
    fn relative_path(&self, path: &Path) -> PathBuf;
}

impl<F> RootResolver for F
where
    F: Fn(&Path) -> PathBuf,
{
    fn relative_path(&self, path: &Path) -> PathBuf {
        self(path)
    }
}

/// Strips a fixed directory prefix from every path.
///
/// Paths outside the prefix keep only their file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrefixStrip {
    prefix: PathBuf,
}

impl PrefixStrip {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Strip the parent of the current working directory, so that archives
    /// keep the caller-relative directory of the selected sources
    pub fn working_dir_parent() -> io::Result<Self> {
        let cwd = std::env::current_dir()?;
        let prefix = cwd.parent().map(Path::to_path_buf).unwrap_or(cwd);
        Ok(Self::new(prefix))
    }

    pub fn prefix(&self) -> &Path {
        &self.prefix
    }
}

impl RootResolver for PrefixStrip {
    fn relative_path(&self, path: &Path) -> PathBuf {
        match path.strip_prefix(&self.prefix) {
            Ok(relative) if !relative.as_os_str().is_empty() => relative.to_path_buf(),
            _ => {
                let base = path
                    .file_name()
                    .map(PathBuf::from)
                    .unwrap_or_else(|| path.to_path_buf());
                warn!(
                    path = %path.display(),
                    prefix = %self.prefix.display(),
                    "path is outside the archive root, using its file name"
                );
                base
            }
        }
    }
}

/// Collect every regular file under `root`.
///
/// A file root yields itself. Directory roots are walked recursively in file
/// name order. Symbolic links below the root are not followed and not
/// packaged; a root that is itself a link is resolved.
pub fn collect_files(root: &Path) -> Result<Vec<PathBuf>> {
    let metadata = match fs::metadata(root) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(PackError::PathNotFound(root.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };

    if metadata.is_file() {
        return Ok(vec![root.to_path_buf()]);
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(false).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        } else if entry.path_is_symlink() {
            debug!(path = %entry.path().display(), "skipping symbolic link");
        }
    }

    debug!(root = %root.display(), count = files.len(), "collected files");
    Ok(files)
}

/// Resolve archive entry names for `files`, sorted by entry name.
///
/// The same file listed twice is kept once. Two different files mapping to
/// one entry name fail with [`PackError::DuplicateEntry`].
pub fn resolve_candidates(
    files: impl IntoIterator<Item = PathBuf>,
    resolver: &dyn RootResolver,
) -> Result<Vec<CandidateFile>> {
    let mut entries: BTreeMap<String, PathBuf> = BTreeMap::new();

    for file in files {
        let relative = resolver.relative_path(&file);
        let name = archive_name(&relative).ok_or_else(|| {
            PackError::InvalidRequest(format!(
                "{} resolves to '{}', which is not inside the archive",
                file.display(),
                relative.display()
            ))
        })?;

        match entries.get(&name) {
            Some(existing) if *existing == file => continue,
            Some(existing) => {
                return Err(PackError::duplicate_entry(name, existing, file));
            }
            None => {
                entries.insert(name, file);
            }
        }
    }

    Ok(entries
        .into_iter()
        .map(|(relative_path, absolute_path)| CandidateFile {
            absolute_path,
            relative_path,
        })
        .collect())
}

/// Make `path` absolute and fold its `.` and `..` components.
///
/// Folding is lexical: symbolic links are not resolved, so `link/..` names
/// the directory holding `link`.
pub fn normalize_path(path: &Path) -> io::Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    let mut normalized = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            other => normalized.push(other),
        }
    }
    Ok(normalized)
}

/// Turn a relative path into a `/`-separated archive entry name.
///
/// Returns `None` for paths that are empty or would escape the archive root.
pub fn archive_name(relative: &Path) -> Option<String> {
    let mut parts = Vec::new();
    for component in relative.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy()),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Find every `*.jar` below `dir`, sorted
pub fn discover_dependency_jars(dir: &Path) -> Result<Vec<PathBuf>> {
    let jars = collect_files(dir)?
        .into_iter()
        .filter(|path| {
            path.extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("jar"))
        })
        .collect::<Vec<_>>();

    debug!(dir = %dir.display(), count = jars.len(), "discovered dependency jars");
    Ok(jars)
}
