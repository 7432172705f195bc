/// Plugin packer CLI

use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use plugin_packer::{
    BinaryOptions, PackagingEngine, PackagingRequest, PrefixStrip, discover_dependency_jars,
    normalize_path,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PackType {
    /// Archive the plugin sources without compiling
    Zip,
    /// Compile the plugin and archive the class files
    Jar,
}

#[derive(Parser, Debug)]
#[command(name = "plugin-packer")]
#[command(about = "Packs plugin sources into a zip, or compiles them into a jar")]
#[command(version)]
struct Args {
    /// The type of packing
    #[arg(short = 't', long = "type", value_enum)]
    pack_type: PackType,

    /// The name to give the packed plugin
    #[arg(short, long)]
    name: String,

    /// Plugin source file or directory (repeatable)
    #[arg(short, long = "source", value_name = "PATH", required = true)]
    sources: Vec<PathBuf>,

    /// Directory the packed plugin is written to
    #[arg(short, long, value_name = "DIR", default_value = "plugins")]
    output: PathBuf,

    /// Path to the Kotlin compiler [jar only]
    #[arg(
        short,
        long,
        value_name = "PATH",
        env = "PLUGIN_PACKER_COMPILER",
        required_if_eq("pack_type", "jar")
    )]
    compiler: Option<PathBuf>,

    /// Directory searched for dependency jars [jar only]
    #[arg(
        short,
        long,
        value_name = "DIR",
        env = "PLUGIN_PACKER_DEPS",
        required_if_eq("pack_type", "jar")
    )]
    deps: Option<PathBuf>,

    /// Prefix stripped from source paths inside a zip
    /// [default: parent of the working directory]
    #[arg(long, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Kill the compiler after this many seconds [jar only]
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Enable debug output, including compiler output
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,

    /// Only report errors
    #[arg(short, long)]
    quiet: bool,
}

fn init_logger(verbose: bool, quiet: bool) {
    let filter = if verbose {
        EnvFilter::new("plugin_packer=debug")
    } else if quiet {
        EnvFilter::new("plugin_packer=error")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("plugin_packer=info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn build_request(args: &Args) -> Result<PackagingRequest> {
    let request = match args.pack_type {
        PackType::Zip => PackagingRequest::source(&args.name, &args.output),
        PackType::Jar => {
            let compiler = args.compiler.clone().context("--compiler is required for jar packing")?;
            let deps = args.deps.as_ref().context("--deps is required for jar packing")?;
            let jars = discover_dependency_jars(deps).with_context(|| {
                format!("Game dependency jars could not be read from {}", deps.display())
            })?;

            let mut options = BinaryOptions::new(compiler).dependency_jars(jars);
            if let Some(secs) = args.timeout {
                options = options.timeout(Duration::from_secs(secs));
            }
            PackagingRequest::binary(&args.name, &args.output, options)
        }
    };

    Ok(request.source_paths(args.sources.iter().cloned()))
}

fn build_engine(args: &Args) -> Result<PackagingEngine> {
    let mut engine = PackagingEngine::new();
    if let Some(root) = &args.root {
        let root = normalize_path(root)
            .with_context(|| format!("Invalid archive root {}", root.display()))?;
        engine = engine.source_root(PrefixStrip::new(root));
    }
    Ok(engine)
}

fn run(args: &Args) -> Result<bool> {
    let request = build_request(args)?;
    let engine = build_engine(args)?;

    let outcome = engine.package(&request);
    match &outcome.error {
        None => {
            println!("Plugin has been packed to: {}", outcome.artifact_path.display());
            Ok(true)
        }
        Some(error) => {
            let hint = match args.pack_type {
                PackType::Zip => format!(
                    "Make sure you have write-access to {}",
                    request.output_dir.display()
                ),
                PackType::Jar => format!(
                    "Make sure your source files do not have any errors, that the Kotlin compiler \
                     is installed and that you have write-access to {}",
                    request.output_dir.display()
                ),
            };
            eprintln!("Could not pack plugin! {}", hint);
            eprintln!("Cause: {}", error);
            Ok(false)
        }
    }
}

fn main() {
    let args = Args::parse();
    init_logger(args.verbose, args.quiet);

    match run(&args) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            process::exit(1);
        }
    }
}
