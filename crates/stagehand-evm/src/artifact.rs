//! Compiled-artifact model and the compiler boundary.

use alloy_json_abi::JsonAbi;
use alloy_primitives::Bytes;
use derive_more::Deref;
use std::{collections::BTreeMap, path::PathBuf, sync::Arc};

/// One compilable unit, identified by a source path or name.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArtifactSource(PathBuf);

impl ArtifactSource {
    /// Source at the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// The source location.
    pub fn path(&self) -> &std::path::Path {
        &self.0
    }
}

impl From<&str> for ArtifactSource {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<PathBuf> for ArtifactSource {
    fn from(path: PathBuf) -> Self {
        Self(path)
    }
}

/// A compiled artifact: interface description plus deployable bytecode.
///
/// Produced once per compiler invocation and read-only afterward.
#[derive(Clone, Debug)]
pub struct CompiledArtifact {
    /// Artifact name, unique within its compilation batch.
    pub name: String,
    /// Interface description.
    pub abi: Arc<JsonAbi>,
    /// Deployable init bytecode. Empty for interface-only artifacts.
    pub bytecode: Bytes,
}

/// The outcome of one compiler invocation, keyed by artifact name.
#[derive(Clone, Debug, Default, Deref)]
pub struct ArtifactSet {
    artifacts: BTreeMap<String, CompiledArtifact>,
}

impl ArtifactSet {
    /// Build a set, rejecting duplicate artifact names.
    pub fn from_artifacts(
        artifacts: impl IntoIterator<Item = CompiledArtifact>,
    ) -> Result<Self, CompileError> {
        let mut set = BTreeMap::new();
        for artifact in artifacts {
            let name = artifact.name.clone();
            if set.insert(name.clone(), artifact).is_some() {
                return Err(CompileError::DuplicateArtifact(name));
            }
        }
        Ok(Self { artifacts: set })
    }
}

/// Turns source locations into compiled artifacts.
///
/// The source language and its compiler live behind this boundary; the rest
/// of the crate only ever sees [`ArtifactSet`]s.
pub trait ArtifactCompiler {
    /// Compile the given sources into one artifact set.
    fn compile(&self, sources: &[ArtifactSource]) -> Result<ArtifactSet, CompileError>;
}

/// Compilation failures. Fatal and never retried: they indicate a source or
/// toolchain defect.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// The compiler executable could not be spawned.
    #[error("failed to spawn compiler `{command}`: {source}")]
    Spawn {
        /// The executable that was invoked.
        command: String,
        /// The spawn failure.
        #[source]
        source: std::io::Error,
    },
    /// The compiler exited unsuccessfully.
    #[error("compiler failed ({status}): {stderr}")]
    Failed {
        /// The compiler's exit status.
        status: std::process::ExitStatus,
        /// Captured standard error.
        stderr: String,
    },
    /// The compiler's output could not be parsed.
    #[error("malformed compiler output: {0}")]
    Output(String),
    /// Two artifacts in one batch share a name.
    #[error("duplicate artifact name `{0}` in compilation batch")]
    DuplicateArtifact(String),
    /// An artifact's interface description is not a valid JSON ABI document.
    #[error("invalid interface description for `{name}`: {source}")]
    Abi {
        /// The artifact concerned.
        name: String,
        /// The underlying parse failure.
        #[source]
        source: serde_json::Error,
    },
    /// An artifact's bytecode payload is not valid hex.
    #[error("invalid bytecode for `{name}`: {source}")]
    Bytecode {
        /// The artifact concerned.
        name: String,
        /// The underlying decode failure.
        #[source]
        source: alloy_primitives::hex::FromHexError,
    },
    /// A source was requested that this compiler does not know.
    #[error("unknown source `{0}`")]
    UnknownSource(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn artifact(name: &str) -> CompiledArtifact {
        CompiledArtifact {
            name: name.to_string(),
            abi: Arc::new(JsonAbi::default()),
            bytecode: Bytes::new(),
        }
    }

    #[test]
    fn test_set_rejects_duplicate_names() {
        let err = ArtifactSet::from_artifacts([artifact("Token"), artifact("Token")]).unwrap_err();
        assert!(matches!(err, CompileError::DuplicateArtifact(name) if name == "Token"));
    }

    #[test]
    fn test_set_is_keyed_by_name() {
        let set = ArtifactSet::from_artifacts([artifact("A"), artifact("B")]).unwrap();
        assert_eq!(set.len(), 2);
        assert!(set.contains_key("A"));
        assert!(set.get("B").is_some());
    }
}
