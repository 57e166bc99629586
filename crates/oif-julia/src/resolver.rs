//! Loads an implementation's source into the runtime and finds its module.
//!
//! Resolution has three steps, each checked for a pending fault:
//!
//! 1. `include("<impl_root>/<source_path>")`
//! 2. `import .<ModuleName>`
//! 3. look up `<ModuleName>` in the top-level namespace.
//!
//! Step 3 uses the identifier parsed from the descriptor. Earlier versions of
//! this backend looked up a hardcoded `QeqSolver` there, which only worked for
//! the demo solver.

use std::path::Path;

use crate::BACKEND_NAME;
use crate::descriptor::ImplDescriptor;
use crate::error::{DispatchError, ResolveStage};
use crate::exception;
use crate::runtime::EmbeddedRuntime;

pub fn resolve_module<R: EmbeddedRuntime>(
    runtime: &R,
    impl_root: &Path,
    descriptor: &ImplDescriptor,
) -> Result<R::Module, DispatchError> {
    let source = impl_root.join(descriptor.source_path());
    let source = source.to_str().ok_or_else(|| {
        DispatchError::InvalidDescriptor(format!("source path {} is not UTF-8", source.display()))
    })?;

    let include = format!("include({})", string_literal(source));
    run_statement(runtime, ResolveStage::Include, &include)?;

    let import = format!("import .{}", descriptor.module_name());
    run_statement(runtime, ResolveStage::Import, &import)?;

    let module = runtime.lookup_module(descriptor.module_name());
    match exception::check(runtime, module) {
        Ok(module) => {
            tracing::debug!(
                backend = BACKEND_NAME,
                module = descriptor.module_name(),
                "Module resolved"
            );
            Ok(module)
        }
        Err(detail) => Err(DispatchError::ModuleResolutionFailed {
            stage: ResolveStage::Lookup,
            detail: format!("module `{}` is not bound: {detail}", descriptor.module_name()),
        }),
    }
}

fn run_statement<R: EmbeddedRuntime>(
    runtime: &R,
    stage: ResolveStage,
    statement: &str,
) -> Result<(), DispatchError> {
    tracing::debug!(backend = BACKEND_NAME, %stage, "Executing in julia: {statement}");
    let outcome = runtime.eval(statement);
    exception::check(runtime, outcome)
        .map(|_| ())
        .map_err(|detail| DispatchError::ModuleResolutionFailed { stage, detail })
}

/// Quote `s` as a string literal, escaping `\`, `"` and the `$` interpolation
/// sigil.
pub(crate) fn string_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '\\' | '"' | '$' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedRuntime;

    fn descriptor(s: &str) -> ImplDescriptor {
        ImplDescriptor::parse(s).unwrap()
    }

    #[test]
    fn includes_imports_and_finds_parsed_module() {
        let rt = ScriptedRuntime::with_qeq_solver("oif_impl/impl");
        let module = resolve_module(
            &rt,
            Path::new("oif_impl/impl"),
            &descriptor("qeq_solver.jl QeqSolver"),
        );
        assert!(module.is_ok());
        assert_eq!(
            rt.evaluated(),
            vec![
                "include(\"oif_impl/impl/qeq_solver.jl\")".to_string(),
                "import .QeqSolver".to_string(),
            ]
        );
    }

    #[test]
    fn resolves_modules_other_than_the_demo_solver() {
        let rt = ScriptedRuntime::new().with_source("impls/ivp.jl", "IvpSolver", vec![]);
        assert!(resolve_module(&rt, Path::new("impls"), &descriptor("ivp.jl IvpSolver")).is_ok());
    }

    #[test]
    fn missing_source_fails_at_include_and_clears_fault() {
        let rt = ScriptedRuntime::with_qeq_solver("oif_impl/impl");
        let err = resolve_module(&rt, Path::new("oif_impl/impl"), &descriptor("nope.jl QeqSolver"))
            .unwrap_err();

        match err {
            DispatchError::ModuleResolutionFailed { stage, detail } => {
                assert_eq!(stage, ResolveStage::Include);
                assert!(detail.contains("No such file"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!rt.has_pending());
        assert_eq!(rt.described(), 1);
        // The import step never ran.
        assert_eq!(rt.evaluated().len(), 1);
    }

    #[test]
    fn wrong_module_name_fails_at_import() {
        let rt = ScriptedRuntime::with_qeq_solver("oif_impl/impl");
        let err = resolve_module(
            &rt,
            Path::new("oif_impl/impl"),
            &descriptor("qeq_solver.jl OtherSolver"),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DispatchError::ModuleResolutionFailed {
                stage: ResolveStage::Import,
                ..
            }
        ));
        assert!(!rt.has_pending());
    }

    #[test]
    fn string_literal_escapes_quotes_and_interpolation() {
        assert_eq!(string_literal("a/b.jl"), "\"a/b.jl\"");
        assert_eq!(string_literal("we\"ird$x\\y"), "\"we\\\"ird\\$x\\\\y\"");
    }
}
