//! The conversion-engine seam.
//!
//! Document transformations happen outside this crate. The orchestrator
//! hands an [`EngineRequest`] to a [`ConversionEngine`] and gets back the
//! exact artifacts the engine produced; it never guesses outputs from a
//! directory listing.

pub mod script;

use crate::artifact::ArtifactHandle;
use crate::catalog::OperationId;
use crate::error::EngineError;
use crate::params::OperationParams;
use crate::session::FileRef;
use async_trait::async_trait;
use serde::Serialize;

pub use script::ScriptEngine;

/// One engine call: the operation, its ordered inputs and typed parameters.
#[derive(Debug, Clone, Serialize)]
pub struct EngineRequest {
    pub operation: OperationId,
    pub inputs: Vec<FileRef>,
    pub params: OperationParams,
}

impl EngineRequest {
    /// The primary input (first uploaded file).
    pub fn primary(&self) -> Option<&FileRef> {
        self.inputs.first()
    }
}

/// Artifacts produced by a successful call, in delivery order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EngineOutput {
    pub artifacts: Vec<ArtifactHandle>,
}

/// Performs document transformations on staged artifacts.
#[async_trait]
pub trait ConversionEngine: Send + Sync {
    /// Number of pages in a staged document.
    async fn page_count(&self, document: &ArtifactHandle) -> Result<usize, EngineError>;

    /// Run one operation. Output artifacts must live in the staging directory.
    async fn run(&self, request: &EngineRequest) -> Result<EngineOutput, EngineError>;
}
