/// Packaging requests handed to the engine by the CLI or any other front-end

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::archive::ArchiveKind;
use crate::error::{PackError, Result};

/// Which artifact a request produces
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackMode {
    /// Archive the raw sources into `<plugin>.zip`
    Source,
    /// Compile the sources and archive the class files into `<plugin>.jar`
    Binary(BinaryOptions),
}

/// Compiler settings for binary packaging
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryOptions {
    /// Path to the compiler executable (e.g. `kotlinc`)
    pub compiler: PathBuf,
    /// Jars placed on the compile classpath
    pub dependency_jars: BTreeSet<PathBuf>,
    /// Kill the compiler if it runs longer than this. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl BinaryOptions {
    pub fn new(compiler: impl Into<PathBuf>) -> Self {
        Self {
            compiler: compiler.into(),
            dependency_jars: BTreeSet::new(),
            timeout: None,
        }
    }

    pub fn dependency_jar(mut self, jar: impl Into<PathBuf>) -> Self {
        self.dependency_jars.insert(jar.into());
        self
    }

    pub fn dependency_jars<I, P>(mut self, jars: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.dependency_jars.extend(jars.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// A single packaging invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackagingRequest {
    /// Base name of the produced archive
    pub plugin_name: String,
    /// Files or directory roots to package, in order
    pub source_paths: Vec<PathBuf>,
    /// Directory the archive is written into
    pub output_dir: PathBuf,
    pub mode: PackMode,
}

impl PackagingRequest {
    /// Create a request that packages raw sources into a zip
    pub fn source(plugin_name: impl Into<String>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            source_paths: Vec::new(),
            output_dir: output_dir.into(),
            mode: PackMode::Source,
        }
    }

    /// Create a request that compiles sources into a jar
    pub fn binary(
        plugin_name: impl Into<String>,
        output_dir: impl Into<PathBuf>,
        options: BinaryOptions,
    ) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            source_paths: Vec::new(),
            output_dir: output_dir.into(),
            mode: PackMode::Binary(options),
        }
    }

    pub fn source_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.source_paths.push(path.into());
        self
    }

    pub fn source_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        self.source_paths.extend(paths.into_iter().map(Into::into));
        self
    }

    /// Archive kind this request produces
    pub fn kind(&self) -> ArchiveKind {
        match self.mode {
            PackMode::Source => ArchiveKind::Zip,
            PackMode::Binary(_) => ArchiveKind::Jar,
        }
    }

    /// Final location of the artifact: `<output_dir>/<plugin_name>.<ext>`
    pub fn artifact_path(&self) -> PathBuf {
        self.artifact_path_as(self.kind())
    }

    /// Location of a `kind` artifact for this request
    pub fn artifact_path_as(&self, kind: ArchiveKind) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", self.plugin_name, kind.extension()))
    }

    /// Reject names that cannot serve as an archive base name
    pub fn validate_name(&self) -> Result<()> {
        let name = self.plugin_name.as_str();
        if name.trim().is_empty() {
            return Err(PackError::InvalidRequest("plugin name is empty".to_string()));
        }
        if name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(PackError::InvalidRequest(format!(
                "plugin name '{}' must not contain path components",
                name
            )));
        }
        if Path::new(name).is_absolute() {
            return Err(PackError::InvalidRequest(format!(
                "plugin name '{}' must not be a path",
                name
            )));
        }
        Ok(())
    }
}
