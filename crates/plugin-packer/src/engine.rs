/// Packaging engine that orchestrates collection, compilation and assembly

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::archive::{ArchiveAssembler, ArchiveKind, check_output_dir};
use crate::collector::{self, PrefixStrip, RootResolver};
use crate::compiler::{
    CompilerCommand, CompilerInvoker, CompilerProcess, SystemProcess, check_compiler,
};
use crate::error::{PackError, Result};
use crate::manifest::JarManifest;
use crate::request::{BinaryOptions, PackMode, PackagingRequest};

/// Result of one packaging run
#[derive(Debug)]
pub struct PackagingOutcome {
    /// Where the artifact is (or would have been) written
    pub artifact_path: PathBuf,
    /// Archive entry names, in write order. Empty on failure.
    pub entries: Vec<String>,
    /// Why the run failed, if it did
    pub error: Option<PackError>,
}

impl PackagingOutcome {
    fn from_result(artifact_path: PathBuf, result: Result<Vec<String>>) -> Self {
        match result {
            Ok(entries) => Self {
                artifact_path,
                entries,
                error: None,
            },
            Err(error) => Self {
                artifact_path,
                entries: Vec::new(),
                error: Some(error),
            },
        }
    }

    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// Captured compiler output when the compiler failed
    pub fn compiler_output(&self) -> Option<&str> {
        self.error.as_ref().and_then(PackError::compiler_output)
    }

    pub fn into_result(self) -> Result<PathBuf> {
        match self.error {
            None => Ok(self.artifact_path),
            Some(error) => Err(error),
        }
    }
}

/// The plugin packaging engine
pub struct PackagingEngine<P = SystemProcess> {
    process: P,
    source_root: Option<Box<dyn RootResolver>>,
    manifest: JarManifest,
}

impl PackagingEngine<SystemProcess> {
    /// Create an engine that spawns the real compiler
    pub fn new() -> Self {
        Self::with_process(SystemProcess)
    }
}

impl Default for PackagingEngine<SystemProcess> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: CompilerProcess> PackagingEngine<P> {
    /// Create an engine that runs the compiler through `process`
    pub fn with_process(process: P) -> Self {
        Self {
            process,
            source_root: None,
            manifest: JarManifest::new(),
        }
    }

    /// Layout for source archives.
    ///
    /// Defaults to stripping the parent of the working directory at the time
    /// of each call.
    pub fn source_root(mut self, resolver: impl RootResolver + 'static) -> Self {
        self.source_root = Some(Box::new(resolver));
        self
    }

    /// Manifest written into jars
    pub fn manifest(mut self, manifest: JarManifest) -> Self {
        self.manifest = manifest;
        self
    }

    /// Package according to `request.mode`
    pub fn package(&self, request: &PackagingRequest) -> PackagingOutcome {
        match request.mode {
            PackMode::Source => self.package_as_source(request),
            PackMode::Binary(_) => self.package_as_binary(request),
        }
    }

    /// Archive the raw sources into `<output_dir>/<plugin_name>.zip`
    pub fn package_as_source(&self, request: &PackagingRequest) -> PackagingOutcome {
        let artifact = request.artifact_path_as(ArchiveKind::Zip);
        let result = self.pack_sources(request, &artifact);
        PackagingOutcome::from_result(artifact, result)
    }

    /// Compile the sources and archive the class files into
    /// `<output_dir>/<plugin_name>.jar`
    pub fn package_as_binary(&self, request: &PackagingRequest) -> PackagingOutcome {
        let artifact = request.artifact_path_as(ArchiveKind::Jar);
        let result = match &request.mode {
            PackMode::Binary(options) => self.pack_binary(request, options, &artifact),
            PackMode::Source => Err(PackError::InvalidRequest(
                "binary packaging requires compiler options".to_string(),
            )),
        };
        PackagingOutcome::from_result(artifact, result)
    }

    fn pack_sources(&self, request: &PackagingRequest, artifact: &Path) -> Result<Vec<String>> {
        request.validate_name()?;
        info!(plugin = %request.plugin_name, "packaging sources");

        let files = collect_sources(&request.source_paths)?;

        let candidates = match &self.source_root {
            Some(resolver) => collector::resolve_candidates(files, &**resolver)?,
            None => {
                let resolver = PrefixStrip::working_dir_parent()?;
                debug!(
                    prefix = %resolver.prefix().display(),
                    "using working directory parent as archive root"
                );
                collector::resolve_candidates(files, &resolver)?
            }
        };

        ArchiveAssembler::zip().assemble(&candidates, artifact)
    }

    fn pack_binary(
        &self,
        request: &PackagingRequest,
        options: &BinaryOptions,
        artifact: &Path,
    ) -> Result<Vec<String>> {
        request.validate_name()?;
        info!(
            plugin = %request.plugin_name,
            compiler = %options.compiler.display(),
            "packaging binary"
        );

        check_compiler(&options.compiler)?;
        let dependency_jars = options
            .dependency_jars
            .iter()
            .map(|jar| {
                if jar.is_file() {
                    Ok(jar.clone())
                } else {
                    Err(PackError::PathNotFound(jar.clone()))
                }
            })
            .collect::<Result<Vec<_>>>()?;
        check_output_dir(&request.output_dir)?;

        let sources = collect_sources(&request.source_paths)?;

        // Fresh directory per run, removed when dropped
        let classes = tempfile::Builder::new()
            .prefix("plugin-packer-classes-")
            .tempdir()?;

        let command =
            CompilerCommand::new(&options.compiler, &dependency_jars, classes.path(), &sources)?
                .timeout(options.timeout);

        let mut invoker = CompilerInvoker::new(&self.process);
        let compilation = invoker.invoke(&command)?;
        if !compilation.succeeded {
            return Err(compilation.into_error(options.timeout));
        }

        let candidates = collector::resolve_candidates(
            compilation.produced_class_files,
            &PrefixStrip::new(classes.path()),
        )?;

        ArchiveAssembler::jar(self.manifest.clone()).assemble(&candidates, artifact)
    }
}

/// Collect the files under every source path, in order, without repeats
fn collect_sources(source_paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut seen = HashSet::new();
    let mut files = Vec::new();

    for source in source_paths {
        let root = collector::normalize_path(source)?;
        for file in collector::collect_files(&root)? {
            if seen.insert(file.clone()) {
                files.push(file);
            }
        }
    }

    if files.is_empty() {
        return Err(PackError::InvalidRequest(
            "no source files found to package".to_string(),
        ));
    }

    info!(files = files.len(), "collected source files");
    Ok(files)
}
