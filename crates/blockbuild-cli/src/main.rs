//! blockbuild - build Android packages from block-language projects.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use blockbuild_core::reporter::Severity;
use blockbuild_core::{
    BuildConfig, BuildContext, BuildFactory, BuildPaths, DexerGeneration, MemoryReporter,
    PackageKind, ProjectDescriptor, Reporter, Resources,
};

#[derive(Parser)]
#[command(name = "blockbuild", version, about = "Android package build pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an app package from a project directory
    Build {
        /// Project root containing `project.toml`
        project: PathBuf,
        /// Tool tree root, or a `tools.toml` file
        #[arg(long)]
        tools: PathBuf,
        /// Build directory (default: `<project>/build`)
        #[arg(long)]
        out: Option<PathBuf>,
        /// Artifact format: apk or aab
        #[arg(long, default_value = "apk")]
        format: String,
        /// Build the companion (interpreter) variant
        #[arg(long)]
        companion: bool,
        /// Heap ceiling for child JVM tools, in megabytes
        #[arg(long, default_value_t = 2048)]
        ram: u32,
        /// Override the minimum API level
        #[arg(long)]
        min_api: Option<u32>,
        /// Shared pre-dex cache directory (default: `~/.blockbuild/dex-cache`)
        #[arg(long)]
        dex_cache: Option<PathBuf>,
        /// Force a dexer generation (d8 or dx) instead of probing
        #[arg(long)]
        dexer: Option<String>,
    },
    /// Verify a tool tree has everything a build needs
    Check {
        /// Tool tree root, or a `tools.toml` file
        #[arg(long)]
        tools: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Build {
            project,
            tools,
            out,
            format,
            companion,
            ram,
            min_api,
            dex_cache,
            dexer,
        } => build(BuildArgs {
            project,
            tools,
            out,
            format,
            companion,
            ram,
            min_api,
            dex_cache,
            dexer,
        }),
        Commands::Check { tools } => check(&tools),
    }
}

struct BuildArgs {
    project: PathBuf,
    tools: PathBuf,
    out: Option<PathBuf>,
    format: String,
    companion: bool,
    ram: u32,
    min_api: Option<u32>,
    dex_cache: Option<PathBuf>,
    dexer: Option<String>,
}

fn build(args: BuildArgs) -> Result<()> {
    let kind: PackageKind = args
        .format
        .parse()
        .map_err(|e: String| anyhow::anyhow!(e))?;

    let descriptor_path = args.project.join("project.toml");
    let descriptor = ProjectDescriptor::from_file(&descriptor_path)
        .with_context(|| format!("loading {}", descriptor_path.display()))?;

    let resources = load_resources(&args.tools)?;
    let dexer = match args.dexer.as_deref() {
        Some("d8") => DexerGeneration::D8,
        Some("dx") => DexerGeneration::Dx,
        Some(other) => bail!("unknown dexer {other:?} (expected d8 or dx)"),
        None => BuildFactory::detect_dexer(&resources),
    };

    let build_dir = args
        .out
        .clone()
        .unwrap_or_else(|| args.project.join("build"));
    let dex_cache = match args.dex_cache {
        Some(dir) => dir,
        None => default_dex_cache()?,
    };
    info!(build_dir = %build_dir.display(), dex_cache = %dex_cache.display(), "build starting");

    let paths = BuildPaths::new(&args.project, &build_dir, dex_cache);
    paths.prepare()?;

    let reporter = Arc::new(ConsoleReporter::default());
    let project_name = descriptor.name.clone();
    let mut context = BuildContext::new(
        descriptor,
        paths,
        resources,
        BuildConfig {
            kind,
            for_companion: args.companion,
            child_process_ram_mb: args.ram,
            min_api_override: args.min_api,
        },
        reporter.clone(),
    );

    let pipeline = BuildFactory::new(kind, dexer).build_pipeline();
    let started = Instant::now();
    let outcome = pipeline.run(&mut context);

    let log_path = build_log_path(&build_dir, &project_name);
    if let Err(e) = reporter.write_log(&log_path) {
        eprintln!("warning: could not write build log {}: {e}", log_path.display());
    }

    match outcome {
        Ok(()) => {
            let artifact = context
                .artifact
                .as_deref()
                .map_or_else(|| "<none>".to_string(), |p| p.display().to_string());
            println!(
                "Build succeeded in {:.1}s: {artifact}",
                started.elapsed().as_secs_f64()
            );
            Ok(())
        }
        Err(e) => bail!("build failed: {e} (log: {})", log_path.display()),
    }
}

fn check(tools: &Path) -> Result<()> {
    let resources = load_resources(tools)?;
    let missing = resources.missing_required();
    let generation = BuildFactory::detect_dexer(&resources);
    println!("dexer toolchain: {generation:?}");
    if missing.is_empty() {
        println!("tool tree OK: {}", resources.root.display());
        Ok(())
    } else {
        for path in &missing {
            eprintln!("missing: {}", path.display());
        }
        bail!("{} required tool location(s) missing", missing.len())
    }
}

fn load_resources(tools: &Path) -> Result<Resources> {
    if tools.is_file() {
        return Ok(Resources::from_file(tools)?);
    }
    let manifest = tools.join("tools.toml");
    if manifest.is_file() {
        Ok(Resources::from_file(&manifest)?)
    } else {
        Ok(Resources::rooted(tools))
    }
}

fn default_dex_cache() -> Result<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(".blockbuild").join("dex-cache"))
        .context("could not determine a home directory; pass --dex-cache")
}

/// Timestamped per-build log file path.
fn build_log_path(build_dir: &Path, project: &str) -> PathBuf {
    let timestamp = chrono::Utc::now().format("%Y%m%d-%H%M%S");
    build_dir.join(format!("build-{project}-{timestamp}.log"))
}

/// Prints progress to the terminal and keeps every line for the build log.
#[derive(Debug, Default)]
struct ConsoleReporter {
    memory: MemoryReporter,
}

impl ConsoleReporter {
    fn write_log(&self, path: &Path) -> std::io::Result<()> {
        use std::io::Write as _;
        let mut file = std::fs::File::create(path)?;
        for (severity, line) in self.memory.lines() {
            let tag = match severity {
                Severity::Info => "INFO",
                Severity::Warning => "WARN",
                Severity::Error => "ERROR",
            };
            writeln!(file, "{tag}: {line}")?;
        }
        Ok(())
    }
}

impl Reporter for ConsoleReporter {
    fn task_start(&self, name: &str) {
        println!("==> {name}");
        self.memory.task_start(name);
    }
    fn task_done(&self, name: &str, elapsed: std::time::Duration) {
        println!("    {name} done in {}ms", elapsed.as_millis());
        self.memory.task_done(name, elapsed);
    }
    fn info(&self, msg: &str) {
        println!("    {msg}");
        self.memory.info(msg);
    }
    fn warn(&self, msg: &str) {
        eprintln!("    warning: {msg}");
        self.memory.warn(msg);
    }
    fn error(&self, msg: &str) {
        eprintln!("    error: {msg}");
        self.memory.error(msg);
    }
}
