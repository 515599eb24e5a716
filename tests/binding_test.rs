//! End-to-end tests for binding selection, artifacts and the binding cache
//!
//! Everything here drives the system C compiler; each test returns early
//! when none is installed.

use nativebind::config::{Config, LibraryMode};
use nativebind::dist::{build_artifact, constant_symbol, shared_library_name, CCompiler, LoadError};
use nativebind::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

type AddFn = extern "C" fn(i32, i32) -> i32;

fn compiler() -> Option<CCompiler> {
    let compiler = CCompiler::from_config(&Config::default());
    if compiler.is_available() {
        Some(compiler)
    } else {
        eprintln!("skipping: no C compiler available");
        None
    }
}

fn adder(module: &str) -> Distribution {
    Distribution::new("adder")
        .with_module_name(module)
        .header(Fragment::inline("adder.h", "int add(int a, int b);\nconst int answer;\n"))
        .source(Fragment::inline(
            "adder.c",
            "int add(int a, int b) { return a + b; }\nconst int answer = 42;\n",
        ))
}

fn limits(module: &str) -> Distribution {
    Distribution::new("limits")
        .with_module_name(module)
        .header(Fragment::inline(
            "limits.h",
            "#define ANSWER ...\n#define LIMIT 7\n#define NEGATIVE ...\nint get(void);\n",
        ))
        .source(Fragment::inline(
            "limits.c",
            "#define ANSWER 42\n#define NEGATIVE (-5)\nint get(void) { return ANSWER; }\n",
        ))
}

fn assert_define_constants(binding: &Binding) {
    unsafe {
        assert_eq!(binding.constant::<i32>("ANSWER").unwrap(), 42);
        assert_eq!(binding.constant::<i64>("LIMIT").unwrap(), 7);
        assert_eq!(binding.constant::<i32>("NEGATIVE").unwrap(), -5);
        assert_eq!(binding.constant::<u8>("ANSWER").unwrap(), 42);
    }
}

fn config(mode: LibraryMode, search_path: Vec<PathBuf>) -> Config {
    Config {
        library: mode,
        search_path,
        ..Config::default()
    }
}

fn call_add(binding: &Binding, a: i32, b: i32) -> i32 {
    let add: AddFn = unsafe { binding.function("add") }.unwrap();
    add(a, b)
}

#[test]
fn test_precompiled_falls_back_to_inline() {
    if compiler().is_none() {
        return;
    }
    let empty = TempDir::new().unwrap();
    let registry = BindingRegistry::new(config(LibraryMode::Precompiled, vec![empty.path().to_path_buf()]));
    registry.register(adder("_nativebind_fallback"));

    let env = Environment::new();
    let binding = registry.get(&env, "adder").unwrap();

    assert_eq!(binding.mode(), LoadMode::Compiled);
    assert_eq!(call_add(&binding, 1, 2), 3);
    assert!(binding.scratch_dir().is_some());
}

#[test]
fn test_cache_returns_the_same_binding() {
    if compiler().is_none() {
        return;
    }
    let registry = BindingRegistry::new(config(LibraryMode::Inline, vec![]));
    registry.register(adder("_nativebind_cached"));

    let env = Environment::new();
    let first = registry.get(&env, "adder").unwrap();
    let second = registry.get(&env, "adder").unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(registry.len(), 1);
    assert!(registry.contains(&env, "adder"));
}

#[test]
fn test_environments_do_not_share_bindings() {
    if compiler().is_none() {
        return;
    }
    let registry = BindingRegistry::new(config(LibraryMode::Inline, vec![]));
    registry.register(adder("_nativebind_envs"));

    let a = Environment::new();
    let b = Environment::new();
    let from_a = registry.get(&a, "adder").unwrap();
    let from_b = registry.get(&b, "adder").unwrap();

    assert!(!Arc::ptr_eq(&from_a, &from_b));
    assert_ne!(from_a.scratch_dir(), from_b.scratch_dir());
    assert_eq!(registry.len(), 2);
}

#[test]
fn test_concurrent_misses_build_once() {
    if compiler().is_none() {
        return;
    }
    let registry = BindingRegistry::new(config(LibraryMode::Inline, vec![]));
    registry.register(adder("_nativebind_threads"));
    let env = Environment::new();

    let bindings: Vec<Arc<Binding>> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..4)
            .map(|_| scope.spawn(|| registry.get(&env, "adder").unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert!(bindings.windows(2).all(|pair| Arc::ptr_eq(&pair[0], &pair[1])));
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_isolate_restores_cache() {
    if compiler().is_none() {
        return;
    }
    let registry = BindingRegistry::new(config(LibraryMode::Inline, vec![]));
    registry.register(adder("_nativebind_isolated"));
    let env = Environment::new();
    let outer = registry.get(&env, "adder").unwrap();

    {
        let _guard = registry.isolate();
        assert!(registry.is_empty());
        let inner = registry.get(&env, "adder").unwrap();
        assert!(!Arc::ptr_eq(&outer, &inner));
    }

    let restored = registry.get(&env, "adder").unwrap();
    assert!(Arc::ptr_eq(&outer, &restored));
}

#[test]
fn test_snapshot_and_restore() {
    if compiler().is_none() {
        return;
    }
    let registry = BindingRegistry::new(config(LibraryMode::Inline, vec![]));
    registry.register(adder("_nativebind_snapshot"));
    let env = Environment::new();
    let binding = registry.get(&env, "adder").unwrap();

    let snapshot = registry.snapshot();
    registry.clear();
    assert!(!registry.contains(&env, "adder"));
    // A binding handed out earlier outlives the cache entry.
    assert_eq!(call_add(&binding, 2, 2), 4);

    registry.restore(snapshot);
    assert!(Arc::ptr_eq(&binding, &registry.get(&env, "adder").unwrap()));
}

#[test]
fn test_build_and_load_artifact() {
    let Some(compiler) = compiler() else {
        return;
    };
    let out = TempDir::new().unwrap();
    let distribution = adder("_nativebind_artifact");

    let path = build_artifact(&distribution, out.path(), &compiler).unwrap();
    assert_eq!(path, out.path().join(shared_library_name("_nativebind_artifact")));

    let registry = BindingRegistry::new(config(LibraryMode::Precompiled, vec![out.path().to_path_buf()]));
    registry.register(distribution);
    let binding = registry.get(&Environment::new(), "adder").unwrap();

    assert_eq!(binding.mode(), LoadMode::Prebuilt);
    assert!(binding.scratch_dir().is_none());
    assert_eq!(call_add(&binding, 20, 22), 42);
    assert_eq!(unsafe { binding.constant::<i32>("answer") }.unwrap(), 42);
    assert!(binding.declarations().declares_function("add"));
}

#[test]
fn test_undeclared_function_is_refused() {
    let Some(compiler) = compiler() else {
        return;
    };
    let out = TempDir::new().unwrap();
    let distribution = adder("_nativebind_undeclared").source(Fragment::inline(
        "hidden.c",
        "int hidden(void) { return 7; }\n",
    ));
    build_artifact(&distribution, out.path(), &compiler).unwrap();

    let binding = dist::load_artifact(&distribution, &[out.path().to_path_buf()]).unwrap();
    assert!(binding.library().has_symbol("hidden"));
    let err = unsafe { binding.function::<extern "C" fn() -> i32>("hidden") }.unwrap_err();
    assert!(matches!(err, FFIError::SymbolNotFound { .. }));
}

#[test]
fn test_compilation_failure_is_not_a_fallback() {
    if compiler().is_none() {
        return;
    }
    let empty = TempDir::new().unwrap();
    let registry = BindingRegistry::new(config(LibraryMode::Precompiled, vec![empty.path().to_path_buf()]));
    registry.register(
        Distribution::new("broken")
            .with_module_name("_nativebind_broken")
            .header(Fragment::inline("broken.h", "int broken(void);"))
            .source(Fragment::inline("broken.c", "int broken(void) { return }\n")),
    );

    let err = registry.get(&Environment::new(), "broken").unwrap_err();
    match err {
        Error::CompilationFailure { status, stderr } => {
            assert!(status.is_some());
            assert!(!stderr.is_empty());
        }
        other => panic!("expected a compilation failure, got {:?}", other),
    }
    assert!(registry.is_empty());
}

#[test]
fn test_corrupt_declaration_blob_is_fatal() {
    let Some(compiler) = compiler() else {
        return;
    };
    let out = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let module = "_nativebind_corrupt";
    compiler
        .compile_shared(
            "const unsigned char _nativebind_corrupt_cdef[] = { 255, 254, 0 };\n",
            scratch.path(),
            &out.path().join(shared_library_name(module)),
            &[],
        )
        .unwrap();

    let registry = BindingRegistry::new(config(LibraryMode::Precompiled, vec![out.path().to_path_buf()]));
    registry.register(adder(module));

    let err = registry.get(&Environment::new(), "adder").unwrap_err();
    assert!(matches!(err, Error::Load(LoadError::Corrupt { .. })));
}

#[test]
fn test_artifact_without_declarations_falls_back() {
    let Some(compiler) = compiler() else {
        return;
    };
    let out = TempDir::new().unwrap();
    let scratch = TempDir::new().unwrap();
    let module = "_nativebind_no_cdef";
    compiler
        .compile_shared(
            "int add(int a, int b) { return a - b; }\n",
            scratch.path(),
            &out.path().join(shared_library_name(module)),
            &[],
        )
        .unwrap();

    let registry = BindingRegistry::new(config(LibraryMode::Precompiled, vec![out.path().to_path_buf()]));
    registry.register(adder(module));
    let binding = registry.get(&Environment::new(), "adder").unwrap();

    assert_eq!(binding.mode(), LoadMode::Compiled);
    assert_eq!(call_add(&binding, 1, 2), 3);
}

#[test]
fn test_define_constants_inline() {
    if compiler().is_none() {
        return;
    }
    let registry = BindingRegistry::new(config(LibraryMode::Inline, vec![]));
    registry.register(limits("_nativebind_defines_inline"));
    let binding = registry.get(&Environment::new(), "limits").unwrap();

    assert_eq!(binding.mode(), LoadMode::Compiled);
    assert!(binding.declarations().is_define("ANSWER"));
    assert_define_constants(&binding);
}

#[test]
fn test_define_constants_precompiled() {
    let Some(compiler) = compiler() else {
        return;
    };
    let out = TempDir::new().unwrap();
    let distribution = limits("_nativebind_defines_prebuilt");
    build_artifact(&distribution, out.path(), &compiler).unwrap();

    let binding = dist::load_artifact(&distribution, &[out.path().to_path_buf()]).unwrap();
    assert_eq!(binding.mode(), LoadMode::Prebuilt);
    assert!(binding.library().has_symbol(&constant_symbol("_nativebind_defines_prebuilt", "LIMIT")));
    assert_define_constants(&binding);
}

#[cfg(unix)]
#[test]
fn test_cache_hit_does_not_wait_for_other_builds() {
    use std::os::unix::fs::PermissionsExt;

    let Some(real) = compiler() else {
        return;
    };
    // Compiles normally until `slow` exists, then announces itself and stalls.
    let dir = TempDir::new().unwrap();
    let gate = dir.path().join("slow");
    let started = dir.path().join("started");
    let script = dir.path().join("slowcc");
    std::fs::write(
        &script,
        format!(
            "#!/bin/sh\nif [ -f '{}' ]; then touch '{}'; sleep 3; fi\nexec {} \"$@\"\n",
            gate.display(),
            started.display(),
            real.program()
        ),
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let registry = BindingRegistry::new(Config {
        compiler: Some(script.display().to_string()),
        ..config(LibraryMode::Inline, vec![])
    });
    registry.register(adder("_nativebind_fast"));
    registry.register(Distribution {
        name: "slow".to_string(),
        ..adder("_nativebind_slow")
    });
    let env = Environment::new();
    let fast = registry.get(&env, "adder").unwrap();
    std::fs::write(&gate, b"").unwrap();

    std::thread::scope(|scope| {
        let slow = scope.spawn(|| registry.get(&env, "slow").unwrap());

        let deadline = Instant::now() + Duration::from_secs(30);
        while !started.exists() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(started.exists());

        let start = Instant::now();
        let hit = registry.get(&env, "adder").unwrap();
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(Arc::ptr_eq(&fast, &hit));
        assert!(!registry.contains(&env, "slow"));

        assert_eq!(call_add(&slow.join().unwrap(), 2, 3), 5);
    });
    assert_eq!(registry.len(), 2);
}
