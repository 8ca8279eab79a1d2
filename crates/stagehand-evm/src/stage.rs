//! The staging session: one backend, one account book, one control surface.

use crate::{
    artifact::{ArtifactCompiler, ArtifactSet, ArtifactSource},
    attempt::attempt,
    backend::{BackendError, ExecutionBackend, ExecutionReceipt, InProcessBackend, SubmitOperation},
    config::StageConfig,
    deploy::{run_plan, Deployment},
    error::StageError,
    plan::DeploymentPlan,
};
use alloy_primitives::{Address, Bytes, U256};
use delegate::delegate;
use std::{
    cell::{Cell, RefCell},
    fmt,
    rc::Rc,
    time::Duration,
};

/// A staging session over one execution backend.
///
/// Owns the configuration and hands the shared backend to deployments,
/// facades and the isolation harness. Everything on a stage is sequential:
/// one operation at a time, each blocking until its outcome is known.
pub struct Stage {
    backend: Rc<RefCell<dyn ExecutionBackend>>,
    config: StageConfig,
    next_account: Cell<usize>,
    snapshot_outstanding: Cell<bool>,
}

impl fmt::Debug for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stage")
            .field("config", &self.config)
            .field("next_account", &self.next_account.get())
            .field("snapshot_outstanding", &self.snapshot_outstanding.get())
            .finish_non_exhaustive()
    }
}

impl Stage {
    /// A stage over the given backend.
    pub fn new(backend: impl ExecutionBackend + 'static, config: StageConfig) -> Self {
        Self {
            backend: Rc::new(RefCell::new(backend)),
            config,
            next_account: Cell::new(0),
            snapshot_outstanding: Cell::new(false),
        }
    }

    /// A stage over a fresh [`InProcessBackend`] funded from `config`.
    pub fn in_process(config: StageConfig) -> Self {
        let backend = InProcessBackend::new(&config);
        Self::new(backend, config)
    }

    /// The session configuration.
    pub const fn config(&self) -> &StageConfig {
        &self.config
    }

    /// The account that deploys and owns by default.
    pub const fn master(&self) -> Address {
        self.config.master
    }

    /// Hand out a configured account that has not been used yet.
    ///
    /// The master account is never handed out; it is reserved for
    /// deployment and ownership. Runs out rather than reusing accounts, so
    /// tests never alias each other's identities.
    pub fn fresh_account(&self) -> Result<Address, StageError> {
        loop {
            let index = self.next_account.get();
            let account =
                *self.config.accounts.get(index).ok_or(StageError::AccountsExhausted)?;
            self.next_account.set(index + 1);
            if account != self.config.master {
                return Ok(account);
            }
        }
    }

    /// The shared backend handle.
    pub(crate) fn backend(&self) -> Rc<RefCell<dyn ExecutionBackend>> {
        Rc::clone(&self.backend)
    }

    pub(crate) fn snapshot_flag(&self) -> &Cell<bool> {
        &self.snapshot_outstanding
    }

    /// Compile `sources` with the given compiler.
    pub fn compile(
        &self,
        compiler: &dyn ArtifactCompiler,
        sources: &[ArtifactSource],
    ) -> Result<ArtifactSet, StageError> {
        attempt("compile artifacts", || Ok(compiler.compile(sources)?))
    }

    /// Execute `plan` against this stage's backend.
    ///
    /// Runs deployments first, then the linking phase, stopping at the
    /// first failure. Nothing is rolled back on failure.
    pub fn deploy(
        &self,
        artifacts: &ArtifactSet,
        plan: &DeploymentPlan,
    ) -> Result<Deployment, StageError> {
        run_plan(self.backend(), artifacts, plan)
    }

    delegate! {
        to self.backend.borrow_mut() {
            /// Submit a raw operation and block for its receipt.
            pub fn submit(&self, op: SubmitOperation) -> Result<ExecutionReceipt, BackendError>;
            /// Execute a raw read-only call against current state.
            pub fn call(&self, target: Address, data: Bytes) -> Result<Bytes, BackendError>;
            /// Advance the chain clock by `delta`.
            ///
            /// Subsequent operations and view calls see the shifted time.
            /// Isolated units that warp the clock give the shift back when
            /// their snapshot is restored.
            pub fn advance_time(&self, delta: Duration) -> Result<(), BackendError>;
            /// Current chain-clock timestamp in seconds.
            pub fn timestamp(&self) -> Result<u64, BackendError>;
            /// Current balance of `account`.
            pub fn balance(&self, account: Address) -> Result<U256, BackendError>;
        }
    }
}
