//! Execution backend boundary.
//!
//! A backend is consumed through [`ExecutionBackend`]: submit a mutating
//! operation and block for its finalized receipt, run a read-only view call,
//! checkpoint/restore global state, and advance the chain clock. Rejections
//! are structured [`Rejection`] values rather than free-text errors; the
//! submit path reports them inside the [`ExecutionReceipt`], the view path
//! reports them synchronously as [`BackendError::CallRejected`].

use alloy_primitives::{Address, Bytes, Log, TxKind, U256};
use serde::{Deserialize, Serialize};
use std::{fmt, time::Duration};

mod in_process;
pub use in_process::*;

/// Machine-checkable classification of a backend rejection.
///
/// The codes separate "the program refused the operation" from environmental
/// failure, so tests can assert the cause instead of merely that something
/// went wrong.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionKind {
    /// The program itself refused the operation (a revert).
    Logic,
    /// Execution exhausted its gas or another metered resource.
    ResourceExhaustion,
    /// Execution faulted: invalid opcode or jump, stack violation.
    Fault,
    /// The submission was rejected before execution by nonce, size, balance
    /// or intrinsic-gas checks.
    Malformed,
}

impl fmt::Display for RejectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Logic => "program logic",
            Self::ResourceExhaustion => "resource exhaustion",
            Self::Fault => "execution fault",
            Self::Malformed => "malformed submission",
        };
        f.write_str(name)
    }
}

/// A structured rejection signal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Classification of the refusal.
    pub kind: RejectionKind,
    /// Raw data accompanying the rejection: the revert payload for logic
    /// rejections, a diagnostic tag otherwise.
    pub data: Bytes,
}

impl Rejection {
    /// A logic rejection carrying the program's revert payload.
    pub const fn logic(data: Bytes) -> Self {
        Self { kind: RejectionKind::Logic, data }
    }

    /// A rejection of the given kind with a textual diagnostic tag.
    pub fn tagged(kind: RejectionKind, tag: impl Into<String>) -> Self {
        Self { kind, data: Bytes::from(tag.into().into_bytes()) }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rejected by {}", self.kind)?;
        if !self.data.is_empty() {
            write!(f, " ({})", self.data)?;
        }
        Ok(())
    }
}

/// The backend's finalized outcome record for one submitted operation.
///
/// `success == false` holds exactly when [`Self::rejection`] is present; the
/// constructors keep that pairing.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExecutionReceipt {
    /// Whether the operation was applied.
    pub success: bool,
    /// Gas consumed by the operation.
    pub gas_used: u64,
    /// Logs emitted during execution.
    pub logs: Vec<Log>,
    /// Raw output (return data) of the operation.
    pub output: Bytes,
    /// Address of the created instance, for deployment submissions.
    pub contract_address: Option<Address>,
    /// The structured refusal, present iff the operation was not applied.
    pub rejection: Option<Rejection>,
}

impl ExecutionReceipt {
    /// Receipt for an applied operation.
    pub fn applied(
        gas_used: u64,
        logs: Vec<Log>,
        output: Bytes,
        contract_address: Option<Address>,
    ) -> Self {
        Self { success: true, gas_used, logs, output, contract_address, rejection: None }
    }

    /// Receipt for a rejected operation.
    pub fn rejected(gas_used: u64, rejection: Rejection) -> Self {
        Self {
            success: false,
            gas_used,
            logs: Vec::new(),
            output: Bytes::new(),
            contract_address: None,
            rejection: Some(rejection),
        }
    }
}

/// Handle returned by [`ExecutionBackend::checkpoint`].
///
/// Consumed by exactly one successful restore. Restoring a handle also
/// invalidates every handle taken after it; a consumed or invalidated handle
/// fails with [`BackendError::InvalidSnapshot`].
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    derive_more::Display,
)]
#[display("snapshot#{_0}")]
pub struct SnapshotId(u64);

impl SnapshotId {
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

/// A state-mutating submission: deploy new code or call a deployed instance.
#[derive(Clone, Debug)]
pub struct SubmitOperation {
    /// Submitting identity.
    pub sender: Address,
    /// Create new code, or call an existing address.
    pub target: TxKind,
    /// Init code for deployments, call data for calls.
    pub data: Bytes,
    /// Value transferred with the operation.
    pub value: U256,
    /// Per-operation gas-limit override; the backend's configured limit
    /// applies when absent.
    pub gas_limit: Option<u64>,
}

impl SubmitOperation {
    /// A deployment of `init_code` by `sender`.
    pub const fn deploy(sender: Address, init_code: Bytes) -> Self {
        Self { sender, target: TxKind::Create, data: init_code, value: U256::ZERO, gas_limit: None }
    }

    /// A call to `target` by `sender`.
    pub const fn call(sender: Address, target: Address, data: Bytes) -> Self {
        Self { sender, target: TxKind::Call(target), data, value: U256::ZERO, gas_limit: None }
    }

    /// Attach transferred value.
    pub const fn with_value(mut self, value: U256) -> Self {
        self.value = value;
        self
    }

    /// Override the gas limit for this operation only.
    pub const fn with_gas_limit(mut self, gas_limit: u64) -> Self {
        self.gas_limit = Some(gas_limit);
        self
    }
}

/// Backend failures that are not receipts.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// No finalized receipt within the configured bound.
    #[error("no finalized receipt within {limit:?}")]
    Timeout {
        /// The configured bound that was exceeded.
        limit: Duration,
    },
    /// Restore was called with an unknown, consumed, or invalidated handle.
    #[error("invalid snapshot handle {0}")]
    InvalidSnapshot(SnapshotId),
    /// A view call was rejected on the synchronous read path.
    #[error("view call {0}")]
    CallRejected(Rejection),
    /// The backend failed internally.
    #[error("backend failure: {0}")]
    Internal(String),
}

/// A stateful execution backend.
///
/// Implementations are strictly blocking: `submit` returns only once a
/// finalized receipt exists (or the configured wait bound is exceeded).
/// Backends are driven from a single logical thread; checkpoint/restore act
/// on all global state at once and have no unit of partition.
pub trait ExecutionBackend {
    /// Submit a state-mutating operation and block for its finalized receipt.
    ///
    /// Rejections of every kind are reported inside the receipt; an `Err` is
    /// reserved for timeouts and internal backend failure.
    fn submit(&mut self, op: SubmitOperation) -> Result<ExecutionReceipt, BackendError>;

    /// Execute a read-only call against current state.
    ///
    /// No receipt and no state change; rejections surface synchronously as
    /// [`BackendError::CallRejected`].
    fn call(&mut self, target: Address, data: Bytes) -> Result<Bytes, BackendError>;

    /// Record a checkpoint of global state.
    fn checkpoint(&mut self) -> Result<SnapshotId, BackendError>;

    /// Restore global state to `snapshot`, consuming it and invalidating
    /// every younger handle.
    fn restore(&mut self, snapshot: SnapshotId) -> Result<(), BackendError>;

    /// Advance the chain clock by `delta`, truncated to whole seconds.
    ///
    /// The shift applies to every subsequent submission and view call.
    /// Checkpoints capture the clock, so a restore also rewinds it.
    fn advance_time(&mut self, delta: Duration) -> Result<(), BackendError>;

    /// Current chain-clock timestamp in seconds.
    fn timestamp(&mut self) -> Result<u64, BackendError>;

    /// Current balance of `account`.
    fn balance(&mut self, account: Address) -> Result<U256, BackendError>;
}
