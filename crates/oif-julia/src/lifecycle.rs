use crate::BACKEND_NAME;
use crate::error::DispatchError;
use crate::runtime::EmbeddedRuntime;

/// Where the embedded runtime is in its one-shot lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Running,
    Finalized,
}

/// Owns the embedded runtime and enforces its lifecycle.
///
/// The runtime is initialized at most once and finalized at most once:
///
/// ```text
/// Uninitialized --initialize--> Running --finalize--> Finalized
/// ```
///
/// Every other transition is a checked error, and no runtime primitive is
/// reachable outside `Running`. The state is per context; the Julia runtime
/// additionally guards the whole process, since `libjulia` cannot be
/// restarted once shut down.
pub struct RuntimeContext<R: EmbeddedRuntime> {
    runtime: R,
    state: LifecycleState,
}

impl<R: EmbeddedRuntime> RuntimeContext<R> {
    pub fn new(runtime: R) -> Self {
        Self {
            runtime,
            state: LifecycleState::Uninitialized,
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn initialize(&mut self) -> Result<&R, DispatchError> {
        match self.state {
            LifecycleState::Running => return Err(DispatchError::RuntimeAlreadyInitialized),
            LifecycleState::Finalized => return Err(DispatchError::RuntimeFinalized),
            LifecycleState::Uninitialized => {}
        }

        self.runtime.initialize()?;
        self.state = LifecycleState::Running;
        tracing::info!(backend = BACKEND_NAME, "Embedded runtime initialized");
        Ok(&self.runtime)
    }

    /// The runtime, provided it is running.
    pub fn runtime(&self) -> Result<&R, DispatchError> {
        match self.state {
            LifecycleState::Running => Ok(&self.runtime),
            LifecycleState::Uninitialized => Err(DispatchError::RuntimeNotInitialized),
            LifecycleState::Finalized => Err(DispatchError::RuntimeFinalized),
        }
    }

    pub fn finalize(&mut self) -> Result<(), DispatchError> {
        self.runtime()?.finalize();
        self.state = LifecycleState::Finalized;
        tracing::info!(backend = BACKEND_NAME, "Embedded runtime finalized");
        Ok(())
    }

    /// The runtime regardless of state, for inspecting test doubles.
    #[cfg(test)]
    pub(crate) fn inner(&self) -> &R {
        &self.runtime
    }
}
