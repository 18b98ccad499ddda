//! Core optimization components for the hypergraph-sclam library
//!
//! This module contains the building blocks of the graph optimization engine:
//! - Vertices, their roles and estimates
//! - The hypergraph with its fixed/marginalized flags and active set
//! - Loss functions for robust estimation

pub mod graph;
pub mod loss_functions;
pub mod variable;

pub use graph::{Edge, Graph, GraphError, GraphStatistics};
pub use variable::{Estimate, PoseStamp, VariableRole, Vertex};
