//! Command-line interface for nativebind
//!
//! This module provides the CLI commands and argument parsing for the
//! `nativebind` binary: building precompiled artifacts, checking that a
//! binding loads, and printing the effective configuration.

use clap::{Args, Parser, Subcommand};
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use crate::config::{Config, LibraryMode};
use crate::dist::strategy::select;
use crate::dist::{build_artifact, BindingRegistry, CCompiler, Distribution, Fragment};
use crate::env::Environment;
use crate::error::{Error, Result};
use crate::logging::LogLevel;

/// Native API binding layer
#[derive(Parser)]
#[command(name = "nativebind")]
#[command(about = "Build, load and inspect native API bindings")]
#[command(version)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Log level for the library (error, warn, info, debug, trace)
    #[arg(long, global = true)]
    pub log_level: Option<LogLevel>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Log level implied by the flags, if they imply one.
    pub fn effective_log_level(&self) -> Option<LogLevel> {
        match (self.log_level, self.verbose, self.quiet) {
            (Some(level), _, _) => Some(level),
            (None, _, true) => Some(LogLevel::Error),
            (None, true, false) => Some(LogLevel::Debug),
            (None, false, false) => None,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Compile a distribution into a precompiled artifact
    Build {
        #[command(flatten)]
        library: LibraryArgs,

        /// Output directory for the artifact
        #[arg(short, long, default_value = ".")]
        output: PathBuf,

        /// C compiler to use (default: configuration, then CC)
        #[arg(long)]
        compiler: Option<String>,

        /// Show a progress spinner while compiling
        #[arg(long)]
        progress: bool,
    },

    /// Load a binding and report how it was produced
    Check {
        #[command(flatten)]
        library: LibraryArgs,

        /// Binding strategy, overriding configuration and NATIVEBIND_LIBRARY
        #[arg(short, long)]
        mode: Option<LibraryMode>,

        /// Additional directory to search for artifacts
        #[arg(long = "search-path")]
        search_path: Vec<PathBuf>,
    },

    /// Print the effective configuration
    Config,
}

/// Selects a registered library or describes an ad-hoc distribution.
#[derive(Args, Debug, Clone)]
pub struct LibraryArgs {
    /// Library name
    #[arg(default_value = "kernel32")]
    pub name: String,

    /// Header fragment, in order (repeatable)
    #[arg(long = "header")]
    pub headers: Vec<PathBuf>,

    /// Source fragment, in order (repeatable)
    #[arg(long = "source")]
    pub sources: Vec<PathBuf>,

    /// System library to link (repeatable)
    #[arg(short = 'l', long = "link")]
    pub libraries: Vec<String>,

    /// Artifact module name
    #[arg(long)]
    pub module: Option<String>,
}

impl LibraryArgs {
    fn is_ad_hoc(&self) -> bool {
        !self.headers.is_empty() || !self.sources.is_empty()
    }

    /// The distribution these arguments name.
    pub fn resolve(&self, registry: &BindingRegistry) -> Result<Distribution> {
        let mut distribution = if self.is_ad_hoc() {
            let mut distribution = Distribution::new(&self.name);
            for header in &self.headers {
                distribution = distribution.header(Fragment::path(header));
            }
            for source in &self.sources {
                distribution = distribution.source(Fragment::path(source));
            }
            distribution
        } else {
            registry
                .distribution(&self.name)
                .ok_or_else(|| Error::UnknownLibrary(self.name.clone()))?
        };

        for library in &self.libraries {
            distribution = distribution.library(library);
        }
        if let Some(module) = &self.module {
            distribution = distribution.with_module_name(module);
        }
        Ok(distribution)
    }
}

/// CLI execution context
#[derive(Clone)]
pub struct CliContext {
    pub verbose: bool,
    pub quiet: bool,
    pub start_time: Instant,
}

impl CliContext {
    pub fn new(verbose: bool, quiet: bool) -> Self {
        Self {
            verbose,
            quiet,
            start_time: Instant::now(),
        }
    }

    /// Print info message if not quiet
    pub fn info(&self, message: &str) {
        if !self.quiet {
            println!("{}", message);
        }
    }

    /// Print verbose message if verbose mode enabled
    pub fn verbose(&self, message: &str) {
        if self.verbose && !self.quiet {
            println!("{} {}", "verbose:".dimmed(), message.dimmed());
        }
    }

    /// Print warning message
    pub fn warn(&self, message: &str) {
        if !self.quiet {
            eprintln!("{} {}", "warning:".yellow().bold(), message);
        }
    }

    /// Print error message
    pub fn error(&self, message: &str) {
        eprintln!("{} {}", "error:".red().bold(), message);
    }

    /// Print success message
    pub fn success(&self, message: &str) {
        if !self.quiet {
            println!("{} {}", "success:".green().bold(), message);
        }
    }

    /// Create a spinner for a step of unknown length
    pub fn spinner(&self, message: &str) -> Option<ProgressBar> {
        if self.quiet {
            return None;
        }

        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
            pb.set_style(style);
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        Some(pb)
    }

    /// Get elapsed time since CLI started
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}

/// Runs CLI commands against one configuration and registry.
pub struct Driver {
    context: CliContext,
    config: Config,
    registry: BindingRegistry,
}

impl Driver {
    pub fn new(context: CliContext, config: Config) -> Self {
        let registry = BindingRegistry::new(config.clone());
        registry.register(Distribution::kernel32());
        Self {
            context,
            config,
            registry,
        }
    }

    pub fn run(&self, command: &Commands) -> Result<()> {
        match command {
            Commands::Build {
                library,
                output,
                compiler,
                progress,
            } => self.build(library, output, compiler.as_deref(), *progress),
            Commands::Check {
                library,
                mode,
                search_path,
            } => self.check(library, *mode, search_path),
            Commands::Config => self.print_config(),
        }
    }

    /// Execute build command
    pub fn build(
        &self,
        library: &LibraryArgs,
        output: &std::path::Path,
        compiler: Option<&str>,
        progress: bool,
    ) -> Result<()> {
        let distribution = library.resolve(&self.registry)?;
        let compiler = match compiler {
            Some(program) => CCompiler::new(program),
            None => CCompiler::from_config(&self.config),
        };
        self.context.verbose(&format!(
            "Building '{}' as module '{}' with {}",
            distribution.name,
            distribution.module_name,
            compiler.program()
        ));

        let spinner = if progress {
            self.context.spinner(&format!("Compiling {}", distribution.module_name))
        } else {
            None
        };
        let result = build_artifact(&distribution, output, &compiler);
        if let Some(pb) = &spinner {
            pb.finish_and_clear();
        }

        let path = result?;
        self.context.success(&format!(
            "Built {} in {:.2}s",
            path.display(),
            self.context.elapsed().as_secs_f64()
        ));
        Ok(())
    }

    /// Execute check command
    pub fn check(&self, library: &LibraryArgs, mode: Option<LibraryMode>, search_path: &[PathBuf]) -> Result<()> {
        let distribution = library.resolve(&self.registry)?;

        let mut config = self.config.clone();
        config.apply_env()?;
        if let Some(mode) = mode {
            config.library = mode;
        }
        config.search_path.extend(search_path.iter().cloned());
        self.context
            .verbose(&format!("Loading '{}' ({})", distribution.name, config.library));

        let binding = select(Environment::global(), &distribution, &config)?;

        if mode == Some(LibraryMode::Precompiled) && binding.mode() != crate::dist::LoadMode::Prebuilt {
            self.context
                .warn("no usable precompiled artifact was found; the binding was compiled inline");
        }

        let declarations = binding.declarations();
        let functions: Vec<&str> = declarations.functions().collect();
        self.context.info(&format!("library:   {}", distribution.name));
        self.context.info(&format!("mode:      {}", binding.mode()));
        self.context
            .info(&format!("artifact:  {}", binding.library().path().display()));
        self.context.info(&format!("functions: {}", functions.len()));
        self.context
            .info(&format!("constants: {}", declarations.constants().count()));
        for name in &functions {
            self.context.verbose(name);
        }

        let missing: Vec<&str> = functions
            .iter()
            .copied()
            .filter(|name| !binding.library().has_symbol(name))
            .collect();
        if !missing.is_empty() {
            self.context.warn(&format!(
                "{} declared functions have no symbol: {}",
                missing.len(),
                missing.join(", ")
            ));
        }

        self.context.success(&format!(
            "Loaded in {:.2}s",
            self.context.elapsed().as_secs_f64()
        ));
        Ok(())
    }

    /// Execute config command
    pub fn print_config(&self) -> Result<()> {
        let mut config = self.config.clone();
        config.apply_env()?;
        print!("{}", config.to_toml()?);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_build() {
        let cli = Cli::parse_from([
            "nativebind", "build", "demo", "--header", "demo.h", "--source", "demo.c", "-l", "m", "-o", "out",
        ]);
        match cli.command {
            Commands::Build { library, output, .. } => {
                assert_eq!(library.name, "demo");
                assert_eq!(library.headers, vec![PathBuf::from("demo.h")]);
                assert_eq!(library.libraries, vec!["m"]);
                assert_eq!(output, PathBuf::from("out"));
            }
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn test_parse_check_mode() {
        let cli = Cli::parse_from(["nativebind", "-v", "check", "--mode", "inline"]);
        assert_eq!(cli.effective_log_level(), Some(LogLevel::Debug));
        match cli.command {
            Commands::Check { library, mode, .. } => {
                assert_eq!(library.name, "kernel32");
                assert_eq!(mode, Some(LibraryMode::Inline));
            }
            _ => panic!("expected check"),
        }
    }

    #[test]
    fn test_log_level_flag_wins() {
        let cli = Cli::parse_from(["nativebind", "-q", "--log-level", "trace", "config"]);
        assert_eq!(cli.effective_log_level(), Some(LogLevel::Trace));
    }

    #[test]
    fn test_ad_hoc_distribution() {
        let registry = BindingRegistry::new(Config::default());
        let args = LibraryArgs {
            name: "demo".to_string(),
            headers: vec![PathBuf::from("demo.h")],
            sources: vec![],
            libraries: vec!["m".to_string()],
            module: Some("_demo".to_string()),
        };
        let distribution = args.resolve(&registry).unwrap();
        assert_eq!(distribution.module_name, "_demo");
        assert_eq!(distribution.headers, vec![Fragment::path("demo.h")]);
        assert_eq!(distribution.libraries, vec!["m"]);
    }

    #[test]
    fn test_unregistered_library() {
        let registry = BindingRegistry::new(Config::default());
        let args = LibraryArgs {
            name: "missing".to_string(),
            headers: vec![],
            sources: vec![],
            libraries: vec![],
            module: None,
        };
        assert!(matches!(args.resolve(&registry), Err(Error::UnknownLibrary(_))));
    }
}
