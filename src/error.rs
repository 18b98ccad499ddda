//! Error types for the hypergraph-sclam library
//!
//! This module provides the main error and result types used throughout the library.
//! Every module keeps its own `thiserror` enum; all of them convert into [`SclamError`]
//! so fatal conditions can travel with `?` up to the run's top level.

use crate::{
    config::ConfigError, core::graph::GraphError, gps::PipelineError, io::IoError,
    linalg::LinAlgError, manifold::ManifoldError, optimizer::OptimizerError,
};
use std::{
    io::Error,
    num::{ParseFloatError, ParseIntError},
};
use thiserror::Error;

/// Main result type used throughout the hypergraph-sclam library
pub type SclamResult<T> = Result<T, SclamError>;

/// Main error type for the hypergraph-sclam library
#[derive(Debug, Clone, Error)]
pub enum SclamError {
    /// Linear algebra related errors
    #[error("Linear algebra error: {0}")]
    LinearAlgebra(String),

    /// IO related errors (file loading, parsing, writing)
    #[error("IO error: {0}")]
    Io(String),

    /// Manifold operations errors
    #[error("Manifold error: {0}")]
    Manifold(String),

    /// Solver related errors
    #[error("Solver error: {0}")]
    Solver(String),

    /// Graph insertion or lookup errors
    #[error("Graph error: {0}")]
    Graph(String),

    /// GPS preprocessing errors
    #[error("GPS pipeline error: {0}")]
    Pipeline(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

// Conversions from standard library errors

impl From<Error> for SclamError {
    fn from(err: Error) -> Self {
        SclamError::Io(err.to_string())
    }
}

impl From<ParseFloatError> for SclamError {
    fn from(err: ParseFloatError) -> Self {
        SclamError::InvalidInput(format!("Failed to parse float: {err}"))
    }
}

impl From<ParseIntError> for SclamError {
    fn from(err: ParseIntError) -> Self {
        SclamError::InvalidInput(format!("Failed to parse integer: {err}"))
    }
}

// Convert module-specific errors to SclamError

impl From<LinAlgError> for SclamError {
    fn from(err: LinAlgError) -> Self {
        SclamError::LinearAlgebra(err.to_string())
    }
}

impl From<OptimizerError> for SclamError {
    fn from(err: OptimizerError) -> Self {
        SclamError::Solver(err.to_string())
    }
}

impl From<ManifoldError> for SclamError {
    fn from(err: ManifoldError) -> Self {
        SclamError::Manifold(err.to_string())
    }
}

impl From<IoError> for SclamError {
    fn from(err: IoError) -> Self {
        SclamError::Io(err.to_string())
    }
}

impl From<GraphError> for SclamError {
    fn from(err: GraphError) -> Self {
        SclamError::Graph(err.to_string())
    }
}

impl From<PipelineError> for SclamError {
    fn from(err: PipelineError) -> Self {
        SclamError::Pipeline(err.to_string())
    }
}

impl From<ConfigError> for SclamError {
    fn from(err: ConfigError) -> Self {
        SclamError::Config(err.to_string())
    }
}
