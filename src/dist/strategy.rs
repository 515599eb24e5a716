//! Binding strategy selection
//!
//! Inline compiles the distribution on the spot in a scratch directory of its
//! own. Out-of-line loads the artifact built ahead of time. The configured
//! mode is read once per selection, and an unavailable artifact falls back to
//! inline compilation.

use crate::config::{Config, LibraryMode};
use crate::dist::artifact::{load_artifact, search_path, with_constant_exports, LoadError};
use crate::dist::compiler::{shared_library_name, CCompiler};
use crate::dist::{Binding, Distribution, LoadMode};
use crate::env::Environment;
use crate::error::{Error, Result};
use crate::ffi::{Declarations, NativeLibrary};
use tracing::{debug, info, warn};

/// Produce a binding of `distribution` the way `config.library` asks for.
pub fn select(env: &Environment, distribution: &Distribution, config: &Config) -> Result<Binding> {
    debug!(
        environment = %env.id(),
        library = %distribution.name,
        mode = %config.library,
        "selecting binding strategy"
    );

    match config.library {
        LibraryMode::Inline => inline(env, distribution, config),
        LibraryMode::Precompiled => match out_of_line(env, distribution, config) {
            Err(Error::Load(err @ LoadError::ArtifactUnavailable { .. })) => {
                warn!(library = %distribution.name, error = %err, "falling back to inline compilation");
                inline(env, distribution, config)
            }
            other => other,
        },
    }
}

/// Compile `distribution` now. Every call gets a fresh scratch directory,
/// which lives exactly as long as the returned binding.
pub fn inline(env: &Environment, distribution: &Distribution, config: &Config) -> Result<Binding> {
    let set = distribution.load_definitions()?;
    let declarations = Declarations::parse(&set.declarations)?;

    let mut builder = tempfile::Builder::new();
    builder.prefix("nativebind-");
    let scratch = match &config.tempdir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            builder.tempdir_in(dir)?
        }
        None => builder.tempdir()?,
    };

    let compiler = CCompiler::from_config(config);
    let output = scratch.path().join(shared_library_name(&distribution.module_name));
    let source = with_constant_exports(&set.source, &distribution.module_name, &declarations);
    compiler.compile_shared(&source, scratch.path(), &output, &distribution.libraries)?;

    let library = NativeLibrary::open(&output)?.with_system_libraries(&distribution.libraries)?;
    info!(
        environment = %env.id(),
        library = %distribution.name,
        scratch = %scratch.path().display(),
        "compiled inline binding"
    );
    Ok(Binding::new(
        LoadMode::Compiled,
        &distribution.module_name,
        declarations,
        library,
        Some(scratch),
    ))
}

/// Load the precompiled artifact without compiling anything.
pub fn out_of_line(env: &Environment, distribution: &Distribution, config: &Config) -> Result<Binding> {
    debug!(environment = %env.id(), library = %distribution.name, "loading precompiled binding");
    load_artifact(distribution, &search_path(config))
}
