use std::path::PathBuf;

use oif_core::{Arg, DispatchLanguage, ImplHandle, ImplId, LanguageBackend};

use crate::BACKEND_NAME;
use crate::config::JuliaConfig;
use crate::descriptor::ImplDescriptor;
use crate::dispatch;
use crate::error::DispatchError;
use crate::julia::JuliaRuntime;
use crate::lifecycle::{LifecycleState, RuntimeContext};
use crate::resolver;
use crate::runtime::EmbeddedRuntime;

struct LoadedImpl<M> {
    id: ImplId,
    descriptor: ImplDescriptor,
    module: M,
}

/// The Julia language backend.
///
/// One implementation is loaded at a time. `load` boots the runtime on first
/// use and `unload` shuts it down for the rest of the process, so a backend
/// serves a single load/call.../unload cycle. A `load` whose resolution
/// failed leaves the runtime running and may be retried.
pub struct JuliaBackend<R: EmbeddedRuntime = JuliaRuntime> {
    context: RuntimeContext<R>,
    impl_root: PathBuf,
    mutating_suffix: char,
    loaded: Option<LoadedImpl<R::Module>>,
    next_id: u32,
}

impl JuliaBackend {
    /// Open the configured `libjulia`. The runtime boots on the first `load`.
    pub fn from_config(config: &JuliaConfig) -> Result<Self, DispatchError> {
        let runtime = JuliaRuntime::open(&config.runtime)?;
        Ok(Self::with_runtime(runtime, config))
    }
}

impl<R: EmbeddedRuntime> JuliaBackend<R> {
    pub fn with_runtime(runtime: R, config: &JuliaConfig) -> Self {
        Self {
            context: RuntimeContext::new(runtime),
            impl_root: config.implementation.root.clone(),
            mutating_suffix: config.dispatch.mutating_suffix,
            loaded: None,
            next_id: 0,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.context.state()
    }

    pub fn is_loaded(&self, handle: &ImplHandle) -> bool {
        self.loaded.as_ref().is_some_and(|l| l.id == handle.id())
    }

    fn check_language(&self, handle: &ImplHandle) -> Result<(), DispatchError> {
        if handle.language() == DispatchLanguage::Julia {
            Ok(())
        } else {
            Err(DispatchError::HandleMismatch {
                expected: DispatchLanguage::Julia,
                found: handle.language(),
            })
        }
    }

    fn try_load(&mut self, descriptor: &str) -> Result<ImplHandle, DispatchError> {
        if let Some(loaded) = &self.loaded {
            tracing::warn!(
                backend = BACKEND_NAME,
                loaded = %loaded.descriptor,
                "An implementation is already loaded"
            );
            return Err(DispatchError::RuntimeAlreadyInitialized);
        }

        let parsed = ImplDescriptor::parse(descriptor)?;
        let runtime = match self.context.state() {
            LifecycleState::Uninitialized => self.context.initialize()?,
            LifecycleState::Running => self.context.runtime()?,
            LifecycleState::Finalized => return Err(DispatchError::RuntimeFinalized),
        };
        let module = resolver::resolve_module(runtime, &self.impl_root, &parsed)?;

        self.next_id += 1;
        let id = ImplId(self.next_id);
        self.loaded = Some(LoadedImpl {
            id,
            descriptor: parsed,
            module,
        });
        Ok(ImplHandle::new(DispatchLanguage::Julia, id))
    }

    fn try_call(
        &self,
        handle: &ImplHandle,
        method: &str,
        in_args: &[Arg<'_>],
        out_args: &[Arg<'_>],
    ) -> Result<(), DispatchError> {
        self.check_language(handle)?;
        let loaded = self
            .loaded
            .as_ref()
            .filter(|l| l.id == handle.id())
            .ok_or(DispatchError::UnknownImplementation(handle.id()))?;
        let runtime = self.context.runtime()?;

        dispatch::dispatch(
            runtime,
            loaded.module,
            loaded.id,
            method,
            in_args,
            out_args,
            self.mutating_suffix,
        )
    }

    fn try_unload(&mut self, handle: ImplHandle) -> Result<(), DispatchError> {
        self.check_language(&handle)?;
        if !self.is_loaded(&handle) {
            return Err(DispatchError::UnknownImplementation(handle.id()));
        }
        self.context.finalize()?;
        if let Some(loaded) = self.loaded.take() {
            tracing::info!(
                backend = BACKEND_NAME,
                descriptor = %loaded.descriptor,
                id = %loaded.id,
                "Implementation unloaded"
            );
        }
        Ok(())
    }
}

impl<R: EmbeddedRuntime> LanguageBackend for JuliaBackend<R> {
    type Error = DispatchError;

    fn language(&self) -> DispatchLanguage {
        DispatchLanguage::Julia
    }

    fn load(
        &mut self,
        descriptor: &str,
        version_major: u32,
        version_minor: u32,
    ) -> Result<ImplHandle, DispatchError> {
        tracing::info!(
            backend = BACKEND_NAME,
            descriptor,
            version_major,
            version_minor,
            "Loading implementation"
        );
        let result = self.try_load(descriptor);
        match &result {
            Ok(handle) => {
                tracing::info!(backend = BACKEND_NAME, descriptor, id = %handle.id(), "Implementation loaded")
            }
            Err(e) if e.reported_by_runtime() => {
                tracing::debug!(backend = BACKEND_NAME, descriptor, kind = ?e.kind(), "Load failed")
            }
            Err(e) => tracing::error!(backend = BACKEND_NAME, descriptor, kind = ?e.kind(), "Load failed: {e}"),
        }
        result
    }

    fn call(
        &mut self,
        handle: &ImplHandle,
        method: &str,
        in_args: &[Arg<'_>],
        out_args: &[Arg<'_>],
    ) -> Result<(), DispatchError> {
        tracing::debug!(
            backend = BACKEND_NAME,
            method,
            id = %handle.id(),
            inputs = in_args.len(),
            outputs = out_args.len(),
            "Calling method"
        );
        self.try_call(handle, method, in_args, out_args)
            .inspect_err(|e| {
                if e.reported_by_runtime() {
                    tracing::debug!(backend = BACKEND_NAME, method, kind = ?e.kind(), "Call failed")
                } else {
                    tracing::error!(backend = BACKEND_NAME, method, kind = ?e.kind(), "Call failed: {e}")
                }
            })
    }

    fn unload(&mut self, handle: ImplHandle) -> Result<(), DispatchError> {
        self.try_unload(handle).inspect_err(|e| {
            tracing::error!(backend = BACKEND_NAME, id = %handle.id(), kind = ?e.kind(), "Unload failed: {e}")
        })
    }
}
