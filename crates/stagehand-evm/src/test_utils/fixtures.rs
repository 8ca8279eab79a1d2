//! Prebuilt contract fixtures that need no external toolchain.
//!
//! Each fixture pairs a hand-written interface description with runtime
//! bytecode assembled here. Dispatch selectors are computed from the parsed
//! interface, so the bytecode and the facades built over it can never
//! disagree on an operation's identity.

use crate::{
    artifact::{ArtifactCompiler, ArtifactSet, ArtifactSource, CompileError, CompiledArtifact},
    config::UNIT,
    test_utils::Assembler,
};
use alloy_json_abi::JsonAbi;
use alloy_primitives::Bytes;
use revm::bytecode::opcode::{
    ADD, CALLER, CODECOPY, CODESIZE, DIV, DUP1, EQ, GT, INVALID, MUL, RETURN, SLOAD, SSTORE,
    SUB, SWAP1, TIMESTAMP,
};
use std::sync::Arc;

/// A compiler that serves the prebuilt fixtures.
///
/// Sources are matched by file stem: `fixtures/Token.sol` compiles to the
/// `Token` fixture. Unknown stems fail the whole batch, the same way a real
/// compiler fails on a missing file.
#[derive(Clone, Copy, Debug, Default)]
pub struct FixtureCompiler;

impl ArtifactCompiler for FixtureCompiler {
    fn compile(&self, sources: &[ArtifactSource]) -> Result<ArtifactSet, CompileError> {
        let mut artifacts = Vec::with_capacity(sources.len());
        for source in sources {
            let stem = source
                .path()
                .file_stem()
                .and_then(|stem| stem.to_str())
                .ok_or_else(|| CompileError::UnknownSource(source.path().display().to_string()))?;
            artifacts.push(match stem {
                "Registry" => registry_fixture(),
                "Token" => token_fixture(),
                "Vault" => vault_fixture(),
                "Brick" => brick_fixture(),
                "Spinner" => spinner_fixture(),
                other => return Err(CompileError::UnknownSource(other.to_string())),
            });
        }
        ArtifactSet::from_artifacts(artifacts)
    }
}

/// The source list covering every fixture.
pub fn fixture_sources() -> Vec<ArtifactSource> {
    ["Registry", "Token", "Vault", "Brick", "Spinner"]
        .into_iter()
        .map(|name| ArtifactSource::new(format!("fixtures/{name}.sol")))
        .collect()
}

/// Compile the full fixture set.
pub fn fixture_set() -> ArtifactSet {
    FixtureCompiler
        .compile(&fixture_sources())
        .expect("fixture set compiles")
}

fn interface(json: &str) -> Arc<JsonAbi> {
    Arc::new(serde_json::from_str(json).expect("fixture interface parses"))
}

fn selector(abi: &JsonAbi, name: &str) -> [u8; 4] {
    abi.functions
        .get(name)
        .and_then(|overloads| overloads.first())
        .map(|function| function.selector().0)
        .unwrap_or_else(|| panic!("fixture interface has no `{name}`"))
}

/// Wraps `runtime` in init code that copies trailing constructor argument
/// words to memory, runs `store_args` over them, then returns the runtime.
fn deployable(
    arg_words: u64,
    store_args: impl FnOnce(Assembler) -> Assembler,
    runtime: &Bytes,
) -> Bytes {
    let mut asm = Assembler::new();
    if arg_words > 0 {
        let arg_len = 32 * arg_words;
        // Arguments sit at the end of the executing code.
        asm = asm
            .push_int(arg_len)
            .push_int(arg_len)
            .op(CODESIZE)
            .op(SUB)
            .push0()
            .op(CODECOPY);
        asm = store_args(asm);
    }
    let len = runtime.len() as u64;
    asm.push_int(len)
        .push_label("runtime")
        .push0()
        .op(CODECOPY)
        .push_int(len)
        .push0()
        .op(RETURN)
        .mark("runtime")
        .ops(runtime.iter().copied())
        .build()
}

/// Appends a caller gate: falls through to `ok` when the caller matches the
/// address stored at `slot`, reverts for anyone else.
fn caller_gate(asm: Assembler, slot: u64, ok: &'static str) -> Assembler {
    asm.op(CALLER).slot_load(slot).op(EQ).jumpi(ok).revert().label(ok)
}

const REGISTRY_INTERFACE: &str = r#"[
    {"type": "constructor", "inputs": [{"name": "initialOwner", "type": "address"}], "stateMutability": "nonpayable"},
    {"type": "function", "name": "owner", "inputs": [], "outputs": [{"type": "address"}], "stateMutability": "view"},
    {"type": "function", "name": "setOwner", "inputs": [{"name": "newOwner", "type": "address"}], "outputs": [], "stateMutability": "nonpayable"},
    {"type": "function", "name": "requireOwner", "inputs": [], "outputs": [], "stateMutability": "view"}
]"#;

/// An owned registry: `owner`, `setOwner` gated on the owner, and a view
/// that rejects every caller but the owner.
fn registry_fixture() -> CompiledArtifact {
    const OWNER_SLOT: u64 = 0;

    let abi = interface(REGISTRY_INTERFACE);
    let mut runtime = Assembler::new()
        .load_selector()
        .dispatch(selector(&abi, "owner"), "owner")
        .dispatch(selector(&abi, "setOwner"), "set_owner")
        .dispatch(selector(&abi, "requireOwner"), "require_owner")
        .revert()
        .label("owner")
        .slot_load(OWNER_SLOT)
        .return_word();
    runtime = caller_gate(runtime.label("set_owner"), OWNER_SLOT, "set_owner_ok")
        .load_arg(0)
        .slot_store(OWNER_SLOT)
        .stop();
    runtime = caller_gate(runtime.label("require_owner"), OWNER_SLOT, "require_owner_ok").stop();
    let runtime = runtime.build();

    let bytecode = deployable(
        1,
        |asm| asm.mem_load(0).slot_store(OWNER_SLOT),
        &runtime,
    );
    CompiledArtifact { name: "Registry".to_string(), abi, bytecode }
}

const TOKEN_INTERFACE: &str = r#"[
    {"type": "constructor", "inputs": [{"name": "initialOwner", "type": "address"}, {"name": "initialSupply", "type": "uint256"}, {"name": "feeRate", "type": "uint256"}], "stateMutability": "nonpayable"},
    {"type": "function", "name": "owner", "inputs": [], "outputs": [{"type": "address"}], "stateMutability": "view"},
    {"type": "function", "name": "setOwner", "inputs": [{"name": "newOwner", "type": "address"}], "outputs": [], "stateMutability": "nonpayable"},
    {"type": "function", "name": "totalSupply", "inputs": [], "outputs": [{"type": "uint256"}], "stateMutability": "view"},
    {"type": "function", "name": "balanceOf", "inputs": [{"name": "account", "type": "address"}], "outputs": [{"type": "uint256"}], "stateMutability": "view"},
    {"type": "function", "name": "transfer", "inputs": [{"name": "to", "type": "address"}, {"name": "value", "type": "uint256"}], "outputs": [], "stateMutability": "nonpayable"},
    {"type": "function", "name": "allowance", "inputs": [{"name": "account", "type": "address"}, {"name": "spender", "type": "address"}], "outputs": [{"type": "uint256"}], "stateMutability": "view"},
    {"type": "function", "name": "approve", "inputs": [{"name": "spender", "type": "address"}, {"name": "value", "type": "uint256"}], "outputs": [], "stateMutability": "nonpayable"},
    {"type": "function", "name": "transferFrom", "inputs": [{"name": "from", "type": "address"}, {"name": "to", "type": "address"}, {"name": "value", "type": "uint256"}], "outputs": [], "stateMutability": "nonpayable"},
    {"type": "function", "name": "transferFeeRate", "inputs": [], "outputs": [{"type": "uint256"}], "stateMutability": "view"},
    {"type": "function", "name": "setTransferFeeRate", "inputs": [{"name": "rate", "type": "uint256"}], "outputs": [], "stateMutability": "nonpayable"},
    {"type": "function", "name": "feePool", "inputs": [], "outputs": [{"type": "uint256"}], "stateMutability": "view"},
    {"type": "function", "name": "feeAuthority", "inputs": [], "outputs": [{"type": "address"}], "stateMutability": "view"},
    {"type": "function", "name": "setFeeAuthority", "inputs": [{"name": "newAuthority", "type": "address"}], "outputs": [], "stateMutability": "nonpayable"},
    {"type": "function", "name": "withdrawFee", "inputs": [{"name": "account", "type": "address"}, {"name": "value", "type": "uint256"}], "outputs": [], "stateMutability": "nonpayable"},
    {"type": "function", "name": "vault", "inputs": [], "outputs": [{"type": "address"}], "stateMutability": "view"},
    {"type": "function", "name": "setVault", "inputs": [{"name": "newVault", "type": "address"}], "outputs": [], "stateMutability": "nonpayable"}
]"#;

/// A fee-charging token.
///
/// `transfer` and `transferFrom` move `value` to the recipient and accrue a
/// proportional fee into the fee pool; a balance or allowance holding less
/// than `value + fee` is rejected. `withdrawFee` returns accrued fees to
/// circulation and is gated on the fee authority, which starts as the
/// owner. `setOwner`, `setTransferFeeRate`, `setFeeAuthority` and
/// `setVault` are gated on the owner.
fn token_fixture() -> CompiledArtifact {
    const OWNER_SLOT: u64 = 0;
    const SUPPLY_SLOT: u64 = 1;
    const FEE_RATE_SLOT: u64 = 2;
    const FEE_POOL_SLOT: u64 = 3;
    const BALANCES_SLOT: u64 = 4;
    const VAULT_SLOT: u64 = 5;
    const ALLOWANCES_SLOT: u64 = 6;
    const FEE_AUTHORITY_SLOT: u64 = 7;

    // Memory locals used by the transfer paths, above the map_slot scratch
    // words.
    const VALUE_LOCAL: u64 = 0x40;
    const FEE_LOCAL: u64 = 0x60;
    const TOTAL_LOCAL: u64 = 0x80;
    const SENDER_SLOT_LOCAL: u64 = 0xA0;
    const FROM_SLOT_LOCAL: u64 = 0xC0;
    const ALLOWANCE_SLOT_LOCAL: u64 = 0xE0;

    let abi = interface(TOKEN_INTERFACE);
    let mut runtime = Assembler::new()
        .load_selector()
        .dispatch(selector(&abi, "owner"), "owner")
        .dispatch(selector(&abi, "setOwner"), "set_owner")
        .dispatch(selector(&abi, "totalSupply"), "total_supply")
        .dispatch(selector(&abi, "balanceOf"), "balance_of")
        .dispatch(selector(&abi, "transfer"), "transfer")
        .dispatch(selector(&abi, "allowance"), "allowance")
        .dispatch(selector(&abi, "approve"), "approve")
        .dispatch(selector(&abi, "transferFrom"), "transfer_from")
        .dispatch(selector(&abi, "transferFeeRate"), "fee_rate")
        .dispatch(selector(&abi, "setTransferFeeRate"), "set_fee_rate")
        .dispatch(selector(&abi, "feePool"), "fee_pool")
        .dispatch(selector(&abi, "feeAuthority"), "fee_authority")
        .dispatch(selector(&abi, "setFeeAuthority"), "set_fee_authority")
        .dispatch(selector(&abi, "withdrawFee"), "withdraw_fee")
        .dispatch(selector(&abi, "vault"), "vault")
        .dispatch(selector(&abi, "setVault"), "set_vault")
        .revert()
        .label("owner")
        .slot_load(OWNER_SLOT)
        .return_word()
        .label("total_supply")
        .slot_load(SUPPLY_SLOT)
        .return_word()
        .label("fee_rate")
        .slot_load(FEE_RATE_SLOT)
        .return_word()
        .label("fee_pool")
        .slot_load(FEE_POOL_SLOT)
        .return_word()
        .label("fee_authority")
        .slot_load(FEE_AUTHORITY_SLOT)
        .return_word()
        .label("vault")
        .slot_load(VAULT_SLOT)
        .return_word()
        .label("balance_of")
        .load_arg(0)
        .map_slot(BALANCES_SLOT)
        .op(SLOAD)
        .return_word()
        .label("allowance")
        .load_arg(0)
        .map_slot(ALLOWANCES_SLOT)
        .load_arg(1)
        .map_slot_nested()
        .op(SLOAD)
        .return_word();

    // transfer(to, value): fee = value * feeRate / UNIT, the sender pays
    // value + fee, the recipient receives value, the fee accrues to the
    // pool.
    runtime = runtime
        .label("transfer")
        .load_arg(1)
        .mem_store(VALUE_LOCAL)
        .mem_load(VALUE_LOCAL)
        .slot_load(FEE_RATE_SLOT)
        .op(MUL)
        .push_u256(UNIT)
        .op(SWAP1)
        .op(DIV)
        .mem_store(FEE_LOCAL)
        .mem_load(VALUE_LOCAL)
        .mem_load(FEE_LOCAL)
        .op(ADD)
        .mem_store(TOTAL_LOCAL)
        .op(CALLER)
        .map_slot(BALANCES_SLOT)
        .mem_store(SENDER_SLOT_LOCAL)
        // Reject when value + fee exceeds the sender's balance.
        .mem_load(SENDER_SLOT_LOCAL)
        .op(SLOAD)
        .mem_load(TOTAL_LOCAL)
        .op(GT)
        .jumpi("transfer_short")
        // Debit the sender.
        .mem_load(SENDER_SLOT_LOCAL)
        .op(SLOAD)
        .mem_load(TOTAL_LOCAL)
        .op(SWAP1)
        .op(SUB)
        .mem_load(SENDER_SLOT_LOCAL)
        .op(SSTORE)
        // Credit the recipient.
        .load_arg(0)
        .map_slot(BALANCES_SLOT)
        .op(DUP1)
        .op(SLOAD)
        .mem_load(VALUE_LOCAL)
        .op(ADD)
        .op(SWAP1)
        .op(SSTORE)
        // Accrue the fee.
        .slot_load(FEE_POOL_SLOT)
        .mem_load(FEE_LOCAL)
        .op(ADD)
        .slot_store(FEE_POOL_SLOT)
        .stop()
        .label("transfer_short")
        .revert();

    // approve(spender, value): the caller lets `spender` move `value` of
    // its balance through transferFrom.
    runtime = runtime
        .label("approve")
        .load_arg(1)
        .op(CALLER)
        .map_slot(ALLOWANCES_SLOT)
        .load_arg(0)
        .map_slot_nested()
        .op(SSTORE)
        .stop();

    // transferFrom(from, to, value): like transfer, but the caller spends
    // its allowance from `from`. Both the allowance and the source balance
    // must cover value + fee.
    runtime = runtime
        .label("transfer_from")
        .load_arg(2)
        .mem_store(VALUE_LOCAL)
        .mem_load(VALUE_LOCAL)
        .slot_load(FEE_RATE_SLOT)
        .op(MUL)
        .push_u256(UNIT)
        .op(SWAP1)
        .op(DIV)
        .mem_store(FEE_LOCAL)
        .mem_load(VALUE_LOCAL)
        .mem_load(FEE_LOCAL)
        .op(ADD)
        .mem_store(TOTAL_LOCAL)
        .load_arg(0)
        .map_slot(ALLOWANCES_SLOT)
        .op(CALLER)
        .map_slot_nested()
        .mem_store(ALLOWANCE_SLOT_LOCAL)
        .load_arg(0)
        .map_slot(BALANCES_SLOT)
        .mem_store(FROM_SLOT_LOCAL)
        // Reject when value + fee exceeds the allowance.
        .mem_load(ALLOWANCE_SLOT_LOCAL)
        .op(SLOAD)
        .mem_load(TOTAL_LOCAL)
        .op(GT)
        .jumpi("transfer_from_short")
        // Reject when value + fee exceeds the source balance.
        .mem_load(FROM_SLOT_LOCAL)
        .op(SLOAD)
        .mem_load(TOTAL_LOCAL)
        .op(GT)
        .jumpi("transfer_from_short")
        // Spend the allowance.
        .mem_load(ALLOWANCE_SLOT_LOCAL)
        .op(SLOAD)
        .mem_load(TOTAL_LOCAL)
        .op(SWAP1)
        .op(SUB)
        .mem_load(ALLOWANCE_SLOT_LOCAL)
        .op(SSTORE)
        // Debit the source.
        .mem_load(FROM_SLOT_LOCAL)
        .op(SLOAD)
        .mem_load(TOTAL_LOCAL)
        .op(SWAP1)
        .op(SUB)
        .mem_load(FROM_SLOT_LOCAL)
        .op(SSTORE)
        // Credit the recipient.
        .load_arg(1)
        .map_slot(BALANCES_SLOT)
        .op(DUP1)
        .op(SLOAD)
        .mem_load(VALUE_LOCAL)
        .op(ADD)
        .op(SWAP1)
        .op(SSTORE)
        // Accrue the fee.
        .slot_load(FEE_POOL_SLOT)
        .mem_load(FEE_LOCAL)
        .op(ADD)
        .slot_store(FEE_POOL_SLOT)
        .stop()
        .label("transfer_from_short")
        .revert();

    // withdrawFee(account, value): the fee authority moves `value` out of
    // the pool into an account's balance. Rejects past the pool.
    runtime = caller_gate(runtime.label("withdraw_fee"), FEE_AUTHORITY_SLOT, "withdraw_fee_ok")
        .slot_load(FEE_POOL_SLOT)
        .load_arg(1)
        .op(GT)
        .jumpi("withdraw_fee_short")
        .slot_load(FEE_POOL_SLOT)
        .load_arg(1)
        .op(SWAP1)
        .op(SUB)
        .slot_store(FEE_POOL_SLOT)
        .load_arg(0)
        .map_slot(BALANCES_SLOT)
        .op(DUP1)
        .op(SLOAD)
        .load_arg(1)
        .op(ADD)
        .op(SWAP1)
        .op(SSTORE)
        .stop()
        .label("withdraw_fee_short")
        .revert();

    runtime = caller_gate(runtime.label("set_owner"), OWNER_SLOT, "set_owner_ok")
        .load_arg(0)
        .slot_store(OWNER_SLOT)
        .stop();
    runtime = caller_gate(runtime.label("set_fee_rate"), OWNER_SLOT, "set_fee_rate_ok")
        .load_arg(0)
        .slot_store(FEE_RATE_SLOT)
        .stop();
    runtime = caller_gate(runtime.label("set_fee_authority"), OWNER_SLOT, "set_fee_authority_ok")
        .load_arg(0)
        .slot_store(FEE_AUTHORITY_SLOT)
        .stop();
    runtime = caller_gate(runtime.label("set_vault"), OWNER_SLOT, "set_vault_ok")
        .load_arg(0)
        .slot_store(VAULT_SLOT)
        .stop();
    let runtime = runtime.build();

    let bytecode = deployable(
        3,
        |asm| {
            asm.mem_load(0)
                .slot_store(OWNER_SLOT)
                .mem_load(0x20)
                .slot_store(SUPPLY_SLOT)
                .mem_load(0x40)
                .slot_store(FEE_RATE_SLOT)
                // Seed the owner's balance with the whole supply. The
                // mapping scratch clobbers the argument words, so read
                // from storage instead.
                .slot_load(SUPPLY_SLOT)
                .slot_load(OWNER_SLOT)
                .map_slot(BALANCES_SLOT)
                .op(SSTORE)
                // The owner starts as the fee authority.
                .slot_load(OWNER_SLOT)
                .slot_store(FEE_AUTHORITY_SLOT)
        },
        &runtime,
    );
    CompiledArtifact { name: "Token".to_string(), abi, bytecode }
}

const VAULT_INTERFACE: &str = r#"[
    {"type": "constructor", "inputs": [{"name": "token_", "type": "address"}], "stateMutability": "nonpayable"},
    {"type": "function", "name": "token", "inputs": [], "outputs": [{"type": "address"}], "stateMutability": "view"},
    {"type": "function", "name": "lockFor", "inputs": [{"name": "duration", "type": "uint256"}], "outputs": [], "stateMutability": "nonpayable"},
    {"type": "function", "name": "release", "inputs": [], "outputs": [], "stateMutability": "nonpayable"},
    {"type": "function", "name": "unlockAt", "inputs": [], "outputs": [{"type": "uint256"}], "stateMutability": "view"}
]"#;

/// A vault bound to a token at construction, carrying a time lock.
///
/// `lockFor` arms the lock `duration` seconds ahead of the chain clock;
/// `release` rejects until the clock reaches the armed time, then clears
/// the lock.
fn vault_fixture() -> CompiledArtifact {
    const TOKEN_SLOT: u64 = 0;
    const UNLOCK_SLOT: u64 = 1;

    let abi = interface(VAULT_INTERFACE);
    let runtime = Assembler::new()
        .load_selector()
        .dispatch(selector(&abi, "token"), "token")
        .dispatch(selector(&abi, "lockFor"), "lock_for")
        .dispatch(selector(&abi, "release"), "release")
        .dispatch(selector(&abi, "unlockAt"), "unlock_at")
        .revert()
        .label("token")
        .slot_load(TOKEN_SLOT)
        .return_word()
        .label("unlock_at")
        .slot_load(UNLOCK_SLOT)
        .return_word()
        .label("lock_for")
        .load_arg(0)
        .op(TIMESTAMP)
        .op(ADD)
        .slot_store(UNLOCK_SLOT)
        .stop()
        // release succeeds once the clock reaches the armed time.
        .label("release")
        .op(TIMESTAMP)
        .slot_load(UNLOCK_SLOT)
        .op(GT)
        .jumpi("release_locked")
        .push0()
        .slot_store(UNLOCK_SLOT)
        .stop()
        .label("release_locked")
        .revert()
        .build();

    let bytecode = deployable(1, |asm| asm.mem_load(0).slot_store(TOKEN_SLOT), &runtime);
    CompiledArtifact { name: "Vault".to_string(), abi, bytecode }
}

/// A contract whose constructor always rejects.
fn brick_fixture() -> CompiledArtifact {
    CompiledArtifact {
        name: "Brick".to_string(),
        abi: interface("[]"),
        bytecode: Assembler::new().revert().build(),
    }
}

const SPINNER_INTERFACE: &str = r#"[
    {"type": "function", "name": "spin", "inputs": [], "outputs": [], "stateMutability": "nonpayable"},
    {"type": "function", "name": "trip", "inputs": [], "outputs": [], "stateMutability": "nonpayable"}
]"#;

/// A contract that misbehaves on demand: `spin` loops until gas runs out,
/// `trip` executes an invalid instruction.
fn spinner_fixture() -> CompiledArtifact {
    let abi = interface(SPINNER_INTERFACE);
    let runtime = Assembler::new()
        .load_selector()
        .dispatch(selector(&abi, "spin"), "spin")
        .dispatch(selector(&abi, "trip"), "trip")
        .revert()
        .label("spin")
        .jump("spin")
        .label("trip")
        .op(INVALID)
        .build();

    let bytecode = deployable(0, |asm| asm, &runtime);
    CompiledArtifact { name: "Spinner".to_string(), abi, bytecode }
}
