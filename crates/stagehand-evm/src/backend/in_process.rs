//! In-process EVM backend.

use super::{
    BackendError, ExecutionBackend, ExecutionReceipt, Rejection, RejectionKind, SnapshotId,
    SubmitOperation,
};
use crate::config::StageConfig;
use alloy_primitives::{Address, Bytes, TxKind, U256};
use revm::{
    context::{
        result::{EVMError, ExecutionResult, HaltReason, Output},
        BlockEnv, Context, TxEnv,
    },
    database::{CacheDB, EmptyDB},
    database_interface::DatabaseRef,
    handler::{ExecuteCommitEvm, MainBuilder, MainContext},
    state::AccountInfo,
};
use std::{
    collections::BTreeMap,
    time::{Duration, Instant},
};
use tracing::debug;

/// Backing state of the in-process backend.
type StateDb = CacheDB<EmptyDB>;

/// One recorded checkpoint: the state and the chain clock at that point.
#[derive(Debug)]
struct Snapshot {
    db: StateDb,
    timestamp: u64,
}

/// An EVM backend hosted inside the test process.
///
/// State lives in a [`CacheDB`]; submitted operations run through a mainnet
/// EVM instance and commit into it. The block environment carries a logical
/// chain clock: it starts at the configured genesis timestamp and moves only
/// through [`ExecutionBackend::advance_time`]. Checkpoints clone the
/// database and the clock into an ordered map; restore puts both back and
/// discards every younger checkpoint, mirroring the revert semantics of the
/// development backends this stands in for.
///
/// Sender nonces are read from the database before each submission, so
/// callers never manage nonces themselves.
#[derive(Debug)]
pub struct InProcessBackend {
    db: StateDb,
    timestamp: u64,
    snapshots: BTreeMap<SnapshotId, Snapshot>,
    next_snapshot: u64,
    gas_limit: u64,
    call_gas_limit: u64,
    receipt_timeout: Duration,
}

impl InProcessBackend {
    /// Create a backend with every configured account funded.
    pub fn new(config: &StageConfig) -> Self {
        let mut db = StateDb::default();
        for account in &config.accounts {
            db.insert_account_info(
                *account,
                AccountInfo { balance: config.initial_balance, ..Default::default() },
            );
        }
        Self {
            db,
            timestamp: config.genesis_timestamp,
            snapshots: BTreeMap::new(),
            next_snapshot: 0,
            gas_limit: config.gas_limit,
            call_gas_limit: config.call_gas_limit,
            receipt_timeout: config.receipt_timeout,
        }
    }

    /// Block environment for the next execution.
    fn block_env(&self) -> BlockEnv {
        BlockEnv { timestamp: U256::from(self.timestamp), ..Default::default() }
    }

    /// Current nonce of `account` in the backing state.
    fn current_nonce(&self, account: Address) -> u64 {
        match self.db.basic_ref(account) {
            Ok(info) => info.map(|info| info.nonce).unwrap_or_default(),
            Err(never) => match never {},
        }
    }

    /// Enforce the receipt wait bound.
    fn check_deadline(&self, started: Instant) -> Result<(), BackendError> {
        if started.elapsed() >= self.receipt_timeout {
            return Err(BackendError::Timeout { limit: self.receipt_timeout });
        }
        Ok(())
    }

    fn receipt_from(result: ExecutionResult<HaltReason>) -> ExecutionReceipt {
        match result {
            ExecutionResult::Success { gas_used, logs, output, .. } => {
                let (output, created) = match output {
                    Output::Call(bytes) => (bytes, None),
                    Output::Create(bytes, address) => (bytes, address),
                };
                ExecutionReceipt::applied(gas_used, logs, output, created)
            }
            ExecutionResult::Revert { gas_used, output } => {
                ExecutionReceipt::rejected(gas_used, Rejection::logic(output))
            }
            ExecutionResult::Halt { reason, gas_used } => {
                ExecutionReceipt::rejected(gas_used, halt_rejection(reason))
            }
        }
    }
}

impl ExecutionBackend for InProcessBackend {
    fn submit(&mut self, op: SubmitOperation) -> Result<ExecutionReceipt, BackendError> {
        let started = Instant::now();
        let tx = TxEnv {
            caller: op.sender,
            kind: op.target,
            data: op.data,
            value: op.value,
            gas_limit: op.gas_limit.unwrap_or(self.gas_limit),
            nonce: self.current_nonce(op.sender),
            ..Default::default()
        };
        debug!(sender = %op.sender, kind = ?op.target, "submitting operation");
        let block = self.block_env();
        let result = {
            let mut evm =
                Context::mainnet().with_db(&mut self.db).with_block(block).build_mainnet();
            evm.transact_commit(tx)
        };
        let receipt = match result {
            Ok(result) => Self::receipt_from(result),
            // Pre-execution validation produces no on-chain outcome; normalize
            // it into a failed receipt so callers see one shape.
            Err(EVMError::Transaction(invalid)) => ExecutionReceipt::rejected(
                0,
                Rejection::tagged(RejectionKind::Malformed, format!("{invalid:?}")),
            ),
            Err(other) => return Err(BackendError::Internal(other.to_string())),
        };
        self.check_deadline(started)?;
        Ok(receipt)
    }

    fn call(&mut self, target: Address, data: Bytes) -> Result<Bytes, BackendError> {
        let tx = TxEnv {
            caller: Address::ZERO,
            kind: TxKind::Call(target),
            data,
            gas_limit: self.call_gas_limit,
            nonce: self.current_nonce(Address::ZERO),
            ..Default::default()
        };
        // Views execute against a throwaway copy of state; nothing commits.
        let block = self.block_env();
        let result = {
            let mut evm =
                Context::mainnet().with_db(self.db.clone()).with_block(block).build_mainnet();
            evm.transact_commit(tx)
        };
        match result {
            Ok(ExecutionResult::Success { output, .. }) => {
                let bytes = match output {
                    Output::Call(bytes) => bytes,
                    Output::Create(bytes, _) => bytes,
                };
                Ok(bytes)
            }
            Ok(ExecutionResult::Revert { output, .. }) => {
                Err(BackendError::CallRejected(Rejection::logic(output)))
            }
            Ok(ExecutionResult::Halt { reason, .. }) => {
                Err(BackendError::CallRejected(halt_rejection(reason)))
            }
            Err(EVMError::Transaction(invalid)) => Err(BackendError::CallRejected(
                Rejection::tagged(RejectionKind::Malformed, format!("{invalid:?}")),
            )),
            Err(other) => Err(BackendError::Internal(other.to_string())),
        }
    }

    fn checkpoint(&mut self) -> Result<SnapshotId, BackendError> {
        let id = SnapshotId::new(self.next_snapshot);
        self.next_snapshot += 1;
        self.snapshots.insert(id, Snapshot { db: self.db.clone(), timestamp: self.timestamp });
        debug!(%id, "checkpoint taken");
        Ok(id)
    }

    fn restore(&mut self, snapshot: SnapshotId) -> Result<(), BackendError> {
        let restored = self
            .snapshots
            .remove(&snapshot)
            .ok_or(BackendError::InvalidSnapshot(snapshot))?;
        // Checkpoints taken after this one describe discarded futures.
        let discarded = self.snapshots.split_off(&snapshot);
        if !discarded.is_empty() {
            debug!(count = discarded.len(), "invalidated younger checkpoints");
        }
        self.db = restored.db;
        self.timestamp = restored.timestamp;
        debug!(%snapshot, "state restored");
        Ok(())
    }

    fn advance_time(&mut self, delta: Duration) -> Result<(), BackendError> {
        self.timestamp = self.timestamp.saturating_add(delta.as_secs());
        debug!(timestamp = self.timestamp, "chain clock advanced");
        Ok(())
    }

    fn timestamp(&mut self) -> Result<u64, BackendError> {
        Ok(self.timestamp)
    }

    fn balance(&mut self, account: Address) -> Result<U256, BackendError> {
        match self.db.basic_ref(account) {
            Ok(info) => Ok(info.map(|info| info.balance).unwrap_or_default()),
            Err(never) => match never {},
        }
    }
}

fn halt_rejection(reason: HaltReason) -> Rejection {
    let kind = match reason {
        HaltReason::OutOfGas(_) => RejectionKind::ResourceExhaustion,
        _ => RejectionKind::Fault,
    };
    Rejection::tagged(kind, format!("{reason:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::Assembler;
    use revm::bytecode::opcode::{CODECOPY, RETURN, STOP, TIMESTAMP};

    fn backend() -> InProcessBackend {
        InProcessBackend::new(&StageConfig::default())
    }

    fn master() -> Address {
        StageConfig::default().master
    }

    #[test]
    fn test_deploy_reports_created_address_and_cost() {
        let mut backend = backend();
        // Init code that returns a trivial STOP runtime.
        let init = Assembler::new()
            .push_int(1)
            .push_label("runtime")
            .push0()
            .op(CODECOPY)
            .push_int(1)
            .push0()
            .op(RETURN)
            .mark("runtime")
            .op(STOP)
            .build();
        let receipt = backend.submit(SubmitOperation::deploy(master(), init)).unwrap();
        assert!(receipt.success);
        assert!(receipt.gas_used > 0);
        assert!(receipt.contract_address.is_some());
        assert!(receipt.rejection.is_none());
    }

    #[test]
    fn test_nonce_advances_between_deploys() {
        let mut backend = backend();
        let init = Assembler::new().push0().push0().op(RETURN).build();
        let first = backend.submit(SubmitOperation::deploy(master(), init.clone())).unwrap();
        let second = backend.submit(SubmitOperation::deploy(master(), init)).unwrap();
        assert!(first.success && second.success);
        assert_ne!(first.contract_address, second.contract_address);
    }

    #[test]
    fn test_value_transfer_moves_balance() {
        let mut backend = backend();
        let config = StageConfig::default();
        let from = config.accounts[1];
        let to = config.accounts[2];
        let before = backend.balance(to).unwrap();
        let receipt = backend
            .submit(SubmitOperation::call(from, to, Bytes::new()).with_value(U256::from(7u64)))
            .unwrap();
        assert!(receipt.success);
        assert_eq!(backend.balance(to).unwrap(), before + U256::from(7u64));
    }

    #[test]
    fn test_unfunded_sender_is_classified_malformed() {
        let mut backend = backend();
        let stranger = Address::repeat_byte(0x77);
        let receipt = backend
            .submit(
                SubmitOperation::call(stranger, master(), Bytes::new())
                    .with_value(U256::from(1u64)),
            )
            .unwrap();
        assert!(!receipt.success);
        assert_eq!(receipt.rejection.unwrap().kind, RejectionKind::Malformed);
    }

    #[test]
    fn test_zero_timeout_reports_timeout() {
        let config = StageConfig { receipt_timeout: Duration::ZERO, ..Default::default() };
        let mut backend = InProcessBackend::new(&config);
        let err = backend
            .submit(SubmitOperation::call(config.master, config.accounts[1], Bytes::new()))
            .unwrap_err();
        assert!(matches!(err, BackendError::Timeout { .. }));
    }

    #[test]
    fn test_restore_discards_mutations() {
        let mut backend = backend();
        let config = StageConfig::default();
        let from = config.accounts[1];
        let to = config.accounts[2];
        let before = backend.balance(to).unwrap();
        let snapshot = backend.checkpoint().unwrap();
        backend
            .submit(SubmitOperation::call(from, to, Bytes::new()).with_value(U256::from(5u64)))
            .unwrap();
        assert_ne!(backend.balance(to).unwrap(), before);
        backend.restore(snapshot).unwrap();
        assert_eq!(backend.balance(to).unwrap(), before);
    }

    #[test]
    fn test_snapshot_handles_are_single_use() {
        let mut backend = backend();
        let snapshot = backend.checkpoint().unwrap();
        backend.restore(snapshot).unwrap();
        let err = backend.restore(snapshot).unwrap_err();
        assert!(matches!(err, BackendError::InvalidSnapshot(id) if id == snapshot));
    }

    #[test]
    fn test_restoring_older_snapshot_invalidates_younger() {
        let mut backend = backend();
        let older = backend.checkpoint().unwrap();
        let younger = backend.checkpoint().unwrap();
        backend.restore(older).unwrap();
        let err = backend.restore(younger).unwrap_err();
        assert!(matches!(err, BackendError::InvalidSnapshot(id) if id == younger));
    }

    #[test]
    fn test_the_clock_is_visible_to_executed_code() {
        let mut backend = backend();
        // Runtime that returns TIMESTAMP as a single word.
        let runtime = Assembler::new().op(TIMESTAMP).return_word().build();
        let init = Assembler::new()
            .push_int(runtime.len() as u64)
            .push_label("runtime")
            .push0()
            .op(CODECOPY)
            .push_int(runtime.len() as u64)
            .push0()
            .op(RETURN)
            .mark("runtime")
            .ops(runtime.iter().copied())
            .build();
        let receipt = backend.submit(SubmitOperation::deploy(master(), init)).unwrap();
        let clock = receipt.contract_address.unwrap();

        let start = backend.timestamp().unwrap();
        let reported = backend.call(clock, Bytes::new()).unwrap();
        assert_eq!(U256::from_be_slice(&reported), U256::from(start));

        backend.advance_time(Duration::from_secs(3_600)).unwrap();
        let reported = backend.call(clock, Bytes::new()).unwrap();
        assert_eq!(U256::from_be_slice(&reported), U256::from(start + 3_600));
    }

    #[test]
    fn test_restore_rewinds_the_clock() {
        let mut backend = backend();
        let start = backend.timestamp().unwrap();
        let snapshot = backend.checkpoint().unwrap();
        backend.advance_time(Duration::from_secs(500)).unwrap();
        assert_eq!(backend.timestamp().unwrap(), start + 500);
        backend.restore(snapshot).unwrap();
        assert_eq!(backend.timestamp().unwrap(), start);
    }
}
