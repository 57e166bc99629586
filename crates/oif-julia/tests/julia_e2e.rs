/// End-to-end tests against a real `libjulia`.
///
/// They require a Julia installation whose shared library is reachable through
/// `OIF_JULIA_LIBRARY` (e.g. `/opt/julia/lib/libjulia.so`). `libjulia` can
/// be booted once per process, so the whole cycle runs in a single test.
///
/// Run with: `cargo test -p oif-julia --test julia_e2e -- --include-ignored`

use std::path::PathBuf;

use oif_core::{Arg, ArrayF64, LanguageBackend};
use oif_julia::{DispatchError, ErrorKind, JuliaBackend, JuliaConfig, LifecycleState};

fn fixture_config() -> JuliaConfig {
    let mut config = JuliaConfig::default().with_env_overrides();
    config.implementation.root = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures");
    config
}

#[test]
#[ignore = "requires libjulia (set OIF_JULIA_LIBRARY)"]
fn load_solve_raise_unload_cycle() {
    let mut backend = JuliaBackend::from_config(&fixture_config())
        .expect("failed to open libjulia; is OIF_JULIA_LIBRARY set?");

    // 1. Load
    let handle = backend.load("qeq_solver.jl QeqSolver", 1, 0).unwrap();
    assert_eq!(backend.state(), LifecycleState::Running);

    // 2. Solve x^2 - 3x + 2 into the caller's buffer
    let mut roots = [0.0; 2];
    {
        let inputs = [Arg::Float64(1.0), Arg::Float64(-3.0), Arg::Float64(2.0)];
        let outputs = [Arg::ArrayF64(ArrayF64::from_slice(&mut roots))];
        backend.call(&handle, "solve", &inputs, &outputs).unwrap();
    }
    assert_eq!(roots, [2.0, 1.0]);

    // 3. A raising callee fails without poisoning the runtime
    let mut scratch = [0.0; 2];
    {
        let outputs = [Arg::ArrayF64(ArrayF64::from_slice(&mut scratch))];
        let err = backend.call(&handle, "explode", &[], &outputs).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CalleeException);
        assert!(err.to_string().contains("DomainError"), "got: {err}");
    }

    // 4. Complex roots are reported through the return status
    let mut roots = [0.0; 2];
    {
        let inputs = [Arg::Float64(1.0), Arg::Float64(0.0), Arg::Float64(1.0)];
        let outputs = [Arg::ArrayF64(ArrayF64::from_slice(&mut roots))];
        let err = backend.call(&handle, "solve", &inputs, &outputs).unwrap_err();
        assert!(matches!(err, DispatchError::CalleeSignaledFailure(1)));
    }

    // 5. Missing callee
    let err = backend.call(&handle, "integrate", &[], &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CallableNotFound);

    // A bound constant is not a callee
    let err = backend.call(&handle, "tolerance", &[], &[]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CallableNotFound);

    // 6. Unload, then everything is rejected
    backend.unload(handle).unwrap();
    assert_eq!(backend.state(), LifecycleState::Finalized);
    assert!(backend.call(&handle, "solve", &[], &[]).is_err());
    assert!(matches!(
        backend.load("qeq_solver.jl QeqSolver", 1, 0),
        Err(DispatchError::RuntimeFinalized)
    ));
}
