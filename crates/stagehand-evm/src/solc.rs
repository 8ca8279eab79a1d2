//! [`ArtifactCompiler`] adapter over the `solc` command-line compiler.

use crate::artifact::{ArtifactCompiler, ArtifactSet, ArtifactSource, CompileError, CompiledArtifact};
use alloy_json_abi::JsonAbi;
use alloy_primitives::{Bytes, hex};
use serde::Deserialize;
use std::{collections::BTreeMap, path::PathBuf, process::Command, sync::Arc};

/// Compiles Solidity sources by shelling out to `solc`.
///
/// Uses the `--combined-json abi,bin` output, which is stable across compiler
/// versions. Compilation is synchronous and a failed run is reported as a
/// fatal [`CompileError`], never retried.
#[derive(Clone, Debug)]
pub struct SolcCompiler {
    solc: PathBuf,
    remappings: Vec<String>,
}

impl Default for SolcCompiler {
    fn default() -> Self {
        Self { solc: PathBuf::from("solc"), remappings: Vec::new() }
    }
}

impl SolcCompiler {
    /// A compiler using `solc` from the search path.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use the given executable instead of `solc` from the search path.
    pub fn with_executable(mut self, solc: impl Into<PathBuf>) -> Self {
        self.solc = solc.into();
        self
    }

    /// Add an import remapping, rendered as `from=to`.
    pub fn with_remapping(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.remappings.push(format!("{}={}", from.into(), to.into()));
        self
    }
}

impl ArtifactCompiler for SolcCompiler {
    fn compile(&self, sources: &[ArtifactSource]) -> Result<ArtifactSet, CompileError> {
        let mut command = Command::new(&self.solc);
        command.arg("--combined-json").arg("abi,bin");
        for remapping in &self.remappings {
            command.arg(remapping);
        }
        for source in sources {
            command.arg(source.path());
        }

        let output = command.output().map_err(|source| CompileError::Spawn {
            command: self.solc.display().to_string(),
            source,
        })?;
        if !output.status.success() {
            return Err(CompileError::Failed {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        parse_combined_json(&output.stdout)
    }
}

/// `--combined-json` document shape shared by all supported `solc` versions.
#[derive(Debug, Deserialize)]
struct CombinedJson {
    #[serde(default)]
    contracts: BTreeMap<String, RawContract>,
}

#[derive(Debug, Deserialize)]
struct RawContract {
    /// Inline JSON on modern compilers, a JSON-encoded string on older ones.
    abi: serde_json::Value,
    #[serde(default)]
    bin: String,
}

fn parse_combined_json(stdout: &[u8]) -> Result<ArtifactSet, CompileError> {
    let combined: CombinedJson =
        serde_json::from_slice(stdout).map_err(|err| CompileError::Output(err.to_string()))?;

    let mut artifacts = Vec::with_capacity(combined.contracts.len());
    for (key, raw) in combined.contracts {
        // Keys look like `contracts/Token.sol:Token`.
        let name = key.rsplit(':').next().unwrap_or(key.as_str()).to_string();
        let abi = parse_abi(&name, &raw.abi)?;
        let bytecode = parse_bytecode(&name, &raw.bin)?;
        artifacts.push(CompiledArtifact { name, abi: Arc::new(abi), bytecode });
    }
    ArtifactSet::from_artifacts(artifacts)
}

fn parse_abi(name: &str, value: &serde_json::Value) -> Result<JsonAbi, CompileError> {
    let parsed = match value {
        serde_json::Value::String(text) => serde_json::from_str(text),
        other => serde_json::from_value(other.clone()),
    };
    parsed.map_err(|source| CompileError::Abi { name: name.to_string(), source })
}

fn parse_bytecode(name: &str, bin: &str) -> Result<Bytes, CompileError> {
    if bin.is_empty() {
        return Ok(Bytes::new());
    }
    hex::decode(bin)
        .map(Bytes::from)
        .map_err(|source| CompileError::Bytecode { name: name.to_string(), source })
}
