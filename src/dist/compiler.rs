//! External C compiler driver
//!
//! Builds a shared library from one C source. GCC-compatible drivers get
//! `-shared -fPIC`; MSVC's `cl` gets `/LD` plus a module-definition file
//! listing what the library exports.

use crate::config::Config;
use crate::error::{Error, Result};
use regex::Regex;
use std::fs;
use std::path::Path;
use std::process::{Command, Stdio};
use std::sync::OnceLock;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilerFlavor {
    Gnu,
    Msvc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CCompiler {
    program: String,
    flavor: CompilerFlavor,
}

/// File name of the shared library built for `module` on this platform.
pub fn shared_library_name(module: &str) -> String {
    if cfg!(windows) {
        format!("{}.dll", module)
    } else if cfg!(target_os = "macos") {
        format!("lib{}.dylib", module)
    } else {
        format!("lib{}.so", module)
    }
}

fn function_definition_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^((?:[A-Za-z_]\w*[ \t\*\r\n]+)+)([A-Za-z_]\w*)[ \t]*\([^;{)]*\)[ \t\r\n]*\{")
            .expect("valid regex")
    })
}

fn global_definition_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^((?:[A-Za-z_]\w*[ \t\*]+)+)([A-Za-z_]\w*)[ \t]*(?:\[[ \t]*\d*[ \t]*\])?[ \t]*=")
            .expect("valid regex")
    })
}

/// Names of the externally visible functions and globals `source` defines at
/// file scope (column 0). `static` definitions are skipped.
pub fn defined_symbols(source: &str) -> (Vec<String>, Vec<String>) {
    let visible = |re: &Regex| -> Vec<String> {
        re.captures_iter(source)
            .filter(|captures| !captures[1].split_whitespace().any(|word| word == "static"))
            .map(|captures| captures[2].to_string())
            .filter(|name| !matches!(name.as_str(), "if" | "while" | "for" | "switch" | "return"))
            .collect()
    };
    (visible(function_definition_re()), visible(global_definition_re()))
}

impl CCompiler {
    pub fn new(program: impl Into<String>) -> Self {
        let program = program.into();
        let stem = Path::new(&program)
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        let flavor = if stem == "cl" || stem == "clang-cl" {
            CompilerFlavor::Msvc
        } else {
            CompilerFlavor::Gnu
        };
        CCompiler { program, flavor }
    }

    /// The configured compiler, then `CC`, then the platform default.
    pub fn from_config(config: &Config) -> Self {
        if let Some(program) = &config.compiler {
            return Self::new(program.clone());
        }
        match std::env::var("CC") {
            Ok(program) if !program.trim().is_empty() => Self::new(program.trim()),
            _ if cfg!(target_env = "msvc") => Self::new("cl"),
            _ => Self::new("cc"),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn flavor(&self) -> CompilerFlavor {
        self.flavor
    }

    /// Whether the compiler can be started at all.
    pub fn is_available(&self) -> bool {
        let mut cmd = Command::new(&self.program);
        if self.flavor == CompilerFlavor::Gnu {
            cmd.arg("--version");
        }
        cmd.stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .is_ok()
    }

    /// Compile `source` into the shared library `output`, linking
    /// `libraries`. `work_dir` receives the intermediate files.
    pub fn compile_shared(
        &self,
        source: &str,
        work_dir: &Path,
        output: &Path,
        libraries: &[String],
    ) -> Result<()> {
        let stem = output
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .unwrap_or_else(|| "module".to_string());
        let source_path = work_dir.join(format!("{}.c", stem));
        fs::write(&source_path, source)?;

        let mut cmd = Command::new(&self.program);
        match self.flavor {
            CompilerFlavor::Gnu => {
                cmd.arg("-shared").arg("-fPIC").arg("-o").arg(output).arg(&source_path);
                for lib in libraries {
                    cmd.arg(format!("-l{lib}"));
                }
            }
            CompilerFlavor::Msvc => {
                let def_path = work_dir.join(format!("{}.def", stem));
                fs::write(&def_path, module_definition(source))?;
                cmd.arg("/nologo")
                    .arg("/LD")
                    .arg(&source_path)
                    .arg(format!("/Fe{}", output.display()))
                    .arg(format!("/Fo{}\\", work_dir.display()))
                    .arg("/link")
                    .arg(format!("/DEF:{}", def_path.display()));
                for lib in libraries {
                    cmd.arg(format!("{lib}.lib"));
                }
            }
        }
        cmd.current_dir(work_dir);

        info!(compiler = %self.program, output = %output.display(), "compiling shared library");
        debug!(command = ?cmd, "compiler invocation");

        let result = cmd.output().map_err(|err| Error::CompilationFailure {
            status: None,
            stderr: format!("failed to run '{}': {}", self.program, err),
        })?;

        if !result.status.success() {
            let mut stderr = String::from_utf8_lossy(&result.stderr).into_owned();
            // cl reports diagnostics on stdout.
            if stderr.trim().is_empty() {
                stderr = String::from_utf8_lossy(&result.stdout).into_owned();
            }
            return Err(Error::CompilationFailure {
                status: result.status.code(),
                stderr: stderr.trim().to_string(),
            });
        }
        Ok(())
    }
}

/// A `.def` file exporting every visible definition in `source`.
fn module_definition(source: &str) -> String {
    let (functions, globals) = defined_symbols(source);
    let mut def = String::from("EXPORTS\n");
    for name in functions {
        def.push_str(&format!("    {}\n", name));
    }
    for name in globals {
        def.push_str(&format!("    {} DATA\n", name));
    }
    def
}
