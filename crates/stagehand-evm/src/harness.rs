//! Snapshot isolation and rejection assertions for test runs.
//!
//! [`Stage::isolated`] brackets a test unit between a checkpoint and a
//! restore, with the restore taken on every exit path, panics included.
//! The `expect_*_rejected` helpers normalize the two rejection channels,
//! receipts for mutations and synchronous errors for views, into one
//! [`Rejection`] value that a test can assert on.

use crate::{
    backend::{BackendError, Rejection, RejectionKind, SnapshotId},
    contract::ContractHandle,
    error::StageError,
    stage::Stage,
};
use alloy_dyn_abi::DynSolValue;
use alloy_primitives::Address;
use tracing::error;

/// A test-level expectation failure.
///
/// These mean the program under test misbehaved, not that the harness
/// broke. State is still restored and later test units are unaffected.
#[derive(Debug, thiserror::Error)]
pub enum RejectionMismatch {
    /// The operation was expected to be rejected but went through.
    #[error("operation `{operation}` was expected to be rejected but {outcome}")]
    UnexpectedSuccess {
        /// The operation concerned.
        operation: String,
        /// What happened instead of a rejection.
        outcome: String,
    },
    /// The operation was rejected, but not for the expected reason.
    #[error("operation `{operation}` was rejected by {actual}, expected {expected}")]
    WrongKind {
        /// The operation concerned.
        operation: String,
        /// The kind the test expected.
        expected: RejectionKind,
        /// The kind the backend reported.
        actual: RejectionKind,
    },
}

/// Harness failure, split by severity.
///
/// [`Mismatch`](Self::Mismatch) is a finding about the program under test;
/// [`Fatal`](Self::Fatal) means the harness itself cannot continue, an
/// invalid snapshot handle being the canonical case.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    /// An expectation about the program under test did not hold.
    #[error(transparent)]
    Mismatch(#[from] RejectionMismatch),
    /// The harness or its backend failed.
    #[error(transparent)]
    Fatal(#[from] StageError),
}

/// Restores the pre-test checkpoint when dropped.
///
/// [`finish`](Self::finish) is the orderly path and surfaces restore
/// failures; the `Drop` impl is the unwind path and can only log them.
struct RestoreOnDrop<'a> {
    stage: &'a Stage,
    snapshot: Option<SnapshotId>,
}

impl<'a> RestoreOnDrop<'a> {
    fn begin(stage: &'a Stage) -> Result<Self, StageError> {
        if stage.snapshot_flag().replace(true) {
            return Err(StageError::IsolationViolation);
        }
        let snapshot = match stage.backend().borrow_mut().checkpoint() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                stage.snapshot_flag().set(false);
                return Err(err.into());
            }
        };
        Ok(Self { stage, snapshot: Some(snapshot) })
    }

    fn finish(&mut self) -> Result<(), StageError> {
        let Some(snapshot) = self.snapshot.take() else { return Ok(()) };
        self.stage.snapshot_flag().set(false);
        self.stage.backend().borrow_mut().restore(snapshot)?;
        Ok(())
    }
}

impl Drop for RestoreOnDrop<'_> {
    fn drop(&mut self) {
        let Some(snapshot) = self.snapshot.take() else { return };
        self.stage.snapshot_flag().set(false);
        if let Err(err) = self.stage.backend().borrow_mut().restore(snapshot) {
            error!("state restore failed during unwind: {err}");
        }
    }
}

impl Stage {
    /// Run `body` isolated from the rest of the session.
    ///
    /// Takes a checkpoint, runs `body`, restores the checkpoint. The
    /// restore happens on every exit path; if `body` panics, the panic
    /// propagates after state is restored. Isolated units do not nest: one
    /// unit holds the stage at a time.
    pub fn isolated<T>(&self, body: impl FnOnce() -> T) -> Result<T, StageError> {
        let mut guard = RestoreOnDrop::begin(self)?;
        let value = body();
        guard.finish()?;
        Ok(value)
    }

    /// Expect `operation` to be rejected by program logic when submitted
    /// from `sender`.
    pub fn expect_mutation_rejected(
        &self,
        contract: &ContractHandle,
        operation: &str,
        args: &[DynSolValue],
        sender: Address,
    ) -> Result<Rejection, HarnessError> {
        self.expect_mutation_rejected_with(contract, operation, args, sender, RejectionKind::Logic)
    }

    /// Expect `operation` to be rejected with the given kind when submitted
    /// from `sender`.
    ///
    /// Returns the rejection so the test can inspect its payload. A receipt
    /// that applied, or one rejected for another reason, is reported as a
    /// [`RejectionMismatch`].
    pub fn expect_mutation_rejected_with(
        &self,
        contract: &ContractHandle,
        operation: &str,
        args: &[DynSolValue],
        sender: Address,
        expected: RejectionKind,
    ) -> Result<Rejection, HarnessError> {
        let receipt = contract.send(sender, operation, args)?;
        match receipt.rejection {
            Some(rejection) if rejection.kind == expected => Ok(rejection),
            Some(rejection) => Err(RejectionMismatch::WrongKind {
                operation: operation.to_string(),
                expected,
                actual: rejection.kind,
            }
            .into()),
            None => Err(RejectionMismatch::UnexpectedSuccess {
                operation: operation.to_string(),
                outcome: format!("applied using {} gas", receipt.gas_used),
            }
            .into()),
        }
    }

    /// Expect a view `operation` to be rejected by program logic.
    pub fn expect_view_rejected(
        &self,
        contract: &ContractHandle,
        operation: &str,
        args: &[DynSolValue],
    ) -> Result<Rejection, HarnessError> {
        self.expect_view_rejected_with(contract, operation, args, RejectionKind::Logic)
    }

    /// Expect a view `operation` to be rejected with the given kind.
    ///
    /// Views report rejections synchronously rather than through receipts;
    /// this normalizes that channel into the same [`Rejection`] shape the
    /// mutation helpers return.
    pub fn expect_view_rejected_with(
        &self,
        contract: &ContractHandle,
        operation: &str,
        args: &[DynSolValue],
        expected: RejectionKind,
    ) -> Result<Rejection, HarnessError> {
        match contract.view(operation, args) {
            Ok(values) => Err(RejectionMismatch::UnexpectedSuccess {
                operation: operation.to_string(),
                outcome: format!("returned {} value(s)", values.len()),
            }
            .into()),
            Err(StageError::Backend(BackendError::CallRejected(rejection))) => {
                if rejection.kind == expected {
                    Ok(rejection)
                } else {
                    Err(RejectionMismatch::WrongKind {
                        operation: operation.to_string(),
                        expected,
                        actual: rejection.kind,
                    }
                    .into())
                }
            }
            Err(fatal) => Err(HarnessError::Fatal(fatal)),
        }
    }
}
