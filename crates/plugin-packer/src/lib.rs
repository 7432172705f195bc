/// Plugin packer
///
/// Packages plugin sources into a distributable artifact: either a zip of
/// the raw sources, or a jar of class files produced by an external compiler.

pub mod archive;
pub mod collector;
pub mod compiler;
pub mod engine;
pub mod error;
pub mod manifest;
pub mod request;

pub use archive::{ArchiveAssembler, ArchiveKind};
pub use collector::{
    CandidateFile, PrefixStrip, RootResolver, discover_dependency_jars, normalize_path,
};
pub use compiler::{
    CompilationResult, CompilerCommand, CompilerInvoker, CompilerProcess, InvocationState,
    ProcessOutput, SystemProcess,
};
pub use engine::{PackagingEngine, PackagingOutcome};
pub use error::{PackError, Result};
pub use manifest::{JarManifest, MANIFEST_PATH};
pub use request::{BinaryOptions, PackMode, PackagingRequest};
