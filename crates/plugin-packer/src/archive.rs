/// Zip and jar assembly
///
/// Both archive kinds share one writer. A jar is a zip whose first entry is
/// `META-INF/MANIFEST.MF`. Archives are written to a temporary file next to
/// the target and renamed into place only once complete, so the target path
/// never holds a partial archive.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use crate::collector::CandidateFile;
use crate::error::{PackError, Result};
use crate::manifest::{JarManifest, MANIFEST_PATH};

/// Container format to produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    Jar,
}

impl ArchiveKind {
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveKind::Zip => "zip",
            ArchiveKind::Jar => "jar",
        }
    }
}

/// Writes candidate files into a zip or jar
#[derive(Debug, Clone)]
pub struct ArchiveAssembler {
    kind: ArchiveKind,
    manifest: Option<JarManifest>,
}

impl ArchiveAssembler {
    /// Plain zip, no manifest
    pub fn zip() -> Self {
        Self {
            kind: ArchiveKind::Zip,
            manifest: None,
        }
    }

    /// Jar with the given manifest as its first entry
    pub fn jar(manifest: JarManifest) -> Self {
        Self {
            kind: ArchiveKind::Jar,
            manifest: Some(manifest),
        }
    }

    /// Write `entries` to `target`, replacing any existing file.
    ///
    /// Returns the entry names in the order they were written. Nothing is
    /// written if the output directory is unusable or two entries share a
    /// name.
    pub fn assemble(&self, entries: &[CandidateFile], target: &Path) -> Result<Vec<String>> {
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        check_output_dir(dir)?;

        let ordered = self.plan(entries)?;

        let mut tmp = tempfile::Builder::new()
            .prefix(".plugin-packer-")
            .suffix(".tmp")
            .tempfile_in(dir)
            .map_err(|e| PackError::output_unavailable(dir, e.to_string()))?;

        let names = self.write_entries(&ordered, tmp.as_file_mut())?;
        tmp.as_file().sync_all()?;
        persist(tmp, target)?;

        info!(
            archive = %target.display(),
            kind = ?self.kind,
            entries = names.len(),
            "archive written"
        );
        Ok(names)
    }

    /// Validate entry names and fix the write order
    fn plan<'a>(&self, entries: &'a [CandidateFile]) -> Result<Vec<&'a CandidateFile>> {
        let mut seen: HashMap<&str, &CandidateFile> = HashMap::new();
        for entry in entries {
            if self.manifest.is_some() && entry.relative_path == MANIFEST_PATH {
                return Err(PackError::duplicate_entry(
                    MANIFEST_PATH,
                    "<generated manifest>",
                    &entry.absolute_path,
                ));
            }
            if let Some(first) = seen.insert(&entry.relative_path, entry) {
                return Err(PackError::duplicate_entry(
                    entry.relative_path.as_str(),
                    &first.absolute_path,
                    &entry.absolute_path,
                ));
            }
        }

        let mut ordered: Vec<&CandidateFile> = entries.iter().collect();
        ordered.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));
        Ok(ordered)
    }

    fn write_entries(&self, entries: &[&CandidateFile], file: &mut File) -> Result<Vec<String>> {
        // Fixed timestamps keep repeated runs byte-identical
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .last_modified_time(DateTime::default())
            .unix_permissions(0o644);

        let mut zip = ZipWriter::new(BufWriter::new(file));
        let mut names = Vec::with_capacity(entries.len() + 1);

        if let Some(manifest) = &self.manifest {
            zip.start_file(MANIFEST_PATH, options)?;
            zip.write_all(manifest.render().as_bytes())?;
            names.push(MANIFEST_PATH.to_string());
        }

        for entry in entries {
            debug!(
                entry = %entry.relative_path,
                source = %entry.absolute_path.display(),
                "adding"
            );
            let mut source = File::open(&entry.absolute_path)?;
            zip.start_file(entry.relative_path.as_str(), options)?;
            io::copy(&mut source, &mut zip)?;
            names.push(entry.relative_path.clone());
        }

        let writer = zip.finish()?;
        writer.into_inner().map_err(|e| e.into_error())?;
        Ok(names)
    }
}

/// The directory must exist, be a directory and not be read-only
pub fn check_output_dir(dir: &Path) -> Result<()> {
    let metadata =
        fs::metadata(dir).map_err(|e| PackError::output_unavailable(dir, e.to_string()))?;

    if !metadata.is_dir() {
        return Err(PackError::output_unavailable(dir, "not a directory"));
    }
    if metadata.permissions().readonly() {
        return Err(PackError::output_unavailable(dir, "directory is read-only"));
    }
    Ok(())
}

fn persist(tmp: NamedTempFile, target: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(tmp.path(), fs::Permissions::from_mode(0o644))?;
    }

    tmp.persist(target).map_err(|e| PackError::Io(e.error))?;
    Ok(())
}
