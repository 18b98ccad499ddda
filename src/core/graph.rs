//! Hypergraph optimization engine.
//!
//! A [`Graph`] owns the vertices (poses, sensor offsets, odometry-bias windows) and the
//! edges (factors plus an optional robust kernel). Optimization follows the g2o-style
//! protocol the scheduler relies on:
//!
//! 1. toggle `fixed` / `marginalized` flags on the vertices,
//! 2. [`Graph::initialize_optimization`] builds the active set: free vertices touched by at
//!    least one edge, non-marginalized ones first, each with a column offset,
//! 3. [`Graph::compute_active_errors`] caches every edge's chi-square,
//! 4. [`Graph::optimize`] runs the configured solver for a bounded number of iterations.
//!
//! Fixed vertices contribute to residuals but get no columns in the normal equations.

use nalgebra::{DMatrix, DVector};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use thiserror::Error;
use tracing::debug;

use crate::core::loss_functions::Loss;
use crate::core::variable::{Estimate, VariableRole, Vertex};
use crate::error::SclamResult;
use crate::factors::Factor;
use crate::optimizer::{
    LevenbergMarquardt, LinearSystem, Optimizable, OptimizationSummary, OptimizerConfig,
    OptimizerError,
};

/// Errors raised when the graph rejects an insertion or a lookup.
#[derive(Debug, Clone, Error)]
pub enum GraphError {
    #[error("Vertex {id} already exists")]
    DuplicateVertex { id: usize },

    #[error("Edge references vertex {id} which is not in the graph")]
    DanglingVertex { id: usize },

    #[error("Unknown vertex {id}")]
    UnknownVertex { id: usize },

    #[error("Unknown edge {index}")]
    UnknownEdge { index: usize },

    #[error("Vertex {id} holds a {found} estimate, expected {expected}")]
    EstimateKind {
        id: usize,
        expected: &'static str,
        found: &'static str,
    },

    #[error("initialize_optimization must be called before optimizing")]
    NotInitialized,
}

/// Statistics about a graph
#[derive(Debug, Clone)]
pub struct GraphStatistics {
    pub num_vertices: usize,
    pub num_edges: usize,
    pub num_poses: usize,
    pub num_sensor_offsets: usize,
    pub num_odometry_biases: usize,
    pub num_fixed_vertices: usize,
}

impl fmt::Display for GraphStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Hypergraph Statistics:\n\
             Vertices: {} (poses: {}, offsets: {}, bias windows: {}, fixed: {})\n\
             Edges: {}",
            self.num_vertices,
            self.num_poses,
            self.num_sensor_offsets,
            self.num_odometry_biases,
            self.num_fixed_vertices,
            self.num_edges
        )
    }
}

/// A factor attached to the graph with its robust kernel and cached chi-square.
pub struct Edge<F> {
    pub factor: F,
    robust_kernel: Option<Box<dyn Loss>>,
    chi2: f64,
}

impl<F> Edge<F> {
    pub fn robust_kernel(&self) -> Option<&dyn Loss> {
        self.robust_kernel.as_deref()
    }

    /// Chi-square `rᵀΩr` from the last [`Graph::compute_active_errors`]
    pub fn chi2(&self) -> f64 {
        self.chi2
    }
}

impl<F: fmt::Debug> fmt::Debug for Edge<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Edge")
            .field("factor", &self.factor)
            .field("robust", &self.robust_kernel.is_some())
            .field("chi2", &self.chi2)
            .finish()
    }
}

/// Column layout of the free vertices for one optimization call.
#[derive(Debug, Clone, Default)]
struct ActiveSet {
    /// Free vertex id -> first column in the normal equations
    offsets: BTreeMap<usize, usize>,
    /// Free vertex ids in column order
    order: Vec<usize>,
    dimension: usize,
}

/// Hypergraph of vertices and factors of type `F`.
pub struct Graph<F: Factor> {
    vertices: BTreeMap<usize, Vertex>,
    edges: Vec<Edge<F>>,
    active: Option<ActiveSet>,
    backup: Vec<(usize, Estimate)>,
    optimizer_config: OptimizerConfig,
}

impl<F: Factor> fmt::Debug for Graph<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("vertices", &self.vertices.len())
            .field("edges", &self.edges.len())
            .field("initialized", &self.active.is_some())
            .finish()
    }
}

impl<F: Factor> Default for Graph<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: Factor> Graph<F> {
    pub fn new() -> Self {
        Self::with_optimizer_config(OptimizerConfig::default())
    }

    pub fn with_optimizer_config(optimizer_config: OptimizerConfig) -> Self {
        Graph {
            vertices: BTreeMap::new(),
            edges: Vec::new(),
            active: None,
            backup: Vec::new(),
            optimizer_config,
        }
    }

    pub fn optimizer_config(&self) -> &OptimizerConfig {
        &self.optimizer_config
    }

    pub fn set_optimizer_config(&mut self, config: OptimizerConfig) {
        self.optimizer_config = config;
    }

    /// Insert a vertex. A duplicate id is rejected.
    pub fn add_vertex(&mut self, vertex: Vertex) -> Result<(), GraphError> {
        let id = vertex.id();
        if self.vertices.contains_key(&id) {
            return Err(GraphError::DuplicateVertex { id });
        }
        self.vertices.insert(id, vertex);
        self.active = None;
        Ok(())
    }

    /// Insert an edge and return its index.
    ///
    /// Every endpoint must already exist and hold the estimate kind the factor expects.
    pub fn add_edge(&mut self, factor: F) -> SclamResult<usize> {
        self.add_edge_with_kernel(factor, None)
    }

    pub fn add_edge_with_kernel(
        &mut self,
        factor: F,
        robust_kernel: Option<Box<dyn Loss>>,
    ) -> SclamResult<usize> {
        for &id in factor.vertex_ids() {
            if !self.vertices.contains_key(&id) {
                return Err(GraphError::DanglingVertex { id }.into());
            }
        }
        let estimates = self.estimates_of(&factor)?;
        factor.linearize(&estimates, false)?;

        self.edges.push(Edge {
            factor,
            robust_kernel,
            chi2: 0.0,
        });
        self.active = None;
        Ok(self.edges.len() - 1)
    }

    pub fn vertex(&self, id: usize) -> Option<&Vertex> {
        self.vertices.get(&id)
    }

    pub fn vertex_mut(&mut self, id: usize) -> Option<&mut Vertex> {
        self.vertices.get_mut(&id)
    }

    /// Vertices in ascending id order
    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> {
        self.vertices.values()
    }

    pub fn vertices_mut(&mut self) -> impl Iterator<Item = &mut Vertex> {
        self.vertices.values_mut()
    }

    pub fn edge(&self, index: usize) -> Option<&Edge<F>> {
        self.edges.get(index)
    }

    pub fn edge_mut(&mut self, index: usize) -> Option<&mut Edge<F>> {
        self.edges.get_mut(index)
    }

    pub fn edges(&self) -> &[Edge<F>] {
        &self.edges
    }

    pub fn edges_mut(&mut self) -> impl Iterator<Item = &mut Edge<F>> {
        self.edges.iter_mut()
    }

    pub fn num_vertices(&self) -> usize {
        self.vertices.len()
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    pub fn set_fixed(&mut self, id: usize, fixed: bool) -> Result<(), GraphError> {
        let vertex = self
            .vertices
            .get_mut(&id)
            .ok_or(GraphError::UnknownVertex { id })?;
        vertex.set_fixed(fixed);
        self.active = None;
        Ok(())
    }

    pub fn set_marginalized(&mut self, id: usize, marginalized: bool) -> Result<(), GraphError> {
        let vertex = self
            .vertices
            .get_mut(&id)
            .ok_or(GraphError::UnknownVertex { id })?;
        vertex.set_marginalized(marginalized);
        self.active = None;
        Ok(())
    }

    /// Set `fixed` and `marginalized` on every vertex with the given role.
    pub fn set_role_flags(&mut self, role: VariableRole, fixed: bool, marginalized: bool) {
        for vertex in self.vertices.values_mut().filter(|v| v.role() == role) {
            vertex.set_fixed(fixed);
            vertex.set_marginalized(marginalized);
        }
        self.active = None;
    }

    pub fn set_estimate(&mut self, id: usize, estimate: Estimate) -> Result<(), GraphError> {
        let vertex = self
            .vertices
            .get_mut(&id)
            .ok_or(GraphError::UnknownVertex { id })?;
        if vertex.estimate.dimension() != estimate.dimension()
            || vertex.estimate.kind() != estimate.kind()
        {
            return Err(GraphError::EstimateKind {
                id,
                expected: vertex.estimate.kind(),
                found: estimate.kind(),
            });
        }
        vertex.estimate = estimate;
        Ok(())
    }

    pub fn set_robust_kernel(
        &mut self,
        index: usize,
        kernel: Option<Box<dyn Loss>>,
    ) -> Result<(), GraphError> {
        let edge = self
            .edges
            .get_mut(index)
            .ok_or(GraphError::UnknownEdge { index })?;
        edge.robust_kernel = kernel;
        Ok(())
    }

    /// Remove the robust kernel from every edge.
    pub fn clear_robust_kernels(&mut self) {
        for edge in &mut self.edges {
            edge.robust_kernel = None;
        }
    }

    pub fn statistics(&self) -> GraphStatistics {
        let count = |role| self.vertices.values().filter(|v| v.role() == role).count();
        GraphStatistics {
            num_vertices: self.vertices.len(),
            num_edges: self.edges.len(),
            num_poses: count(VariableRole::Pose),
            num_sensor_offsets: count(VariableRole::SensorOffset),
            num_odometry_biases: count(VariableRole::OdometryBias),
            num_fixed_vertices: self.vertices.values().filter(|v| v.is_fixed()).count(),
        }
    }

    /// Build the active set from the current flags. Must follow every flag change.
    pub fn initialize_optimization(&mut self) {
        let touched: BTreeSet<usize> = self
            .edges
            .iter()
            .flat_map(|e| e.factor.vertex_ids().iter().copied())
            .collect();

        let free: Vec<&Vertex> = touched
            .iter()
            .filter_map(|id| self.vertices.get(id))
            .filter(|v| !v.is_fixed())
            .collect();

        let mut active = ActiveSet::default();
        let ordered = free
            .iter()
            .filter(|v| !v.is_marginalized())
            .chain(free.iter().filter(|v| v.is_marginalized()));
        for vertex in ordered {
            active.offsets.insert(vertex.id(), active.dimension);
            active.order.push(vertex.id());
            active.dimension += vertex.dimension();
        }

        debug!(
            "Active set: {} free vertices, {} parameters, {} edges",
            active.order.len(),
            active.dimension,
            self.edges.len()
        );
        self.active = Some(active);
    }

    /// Recompute and cache the chi-square of every edge.
    pub fn compute_active_errors(&mut self) -> SclamResult<()> {
        let mut chi2s = Vec::with_capacity(self.edges.len());
        for edge in &self.edges {
            let estimates = self.estimates_of(&edge.factor)?;
            let (residual, _) = edge.factor.linearize(&estimates, false)?;
            chi2s.push(chi2(&residual, edge.factor.information()));
        }
        for (edge, value) in self.edges.iter_mut().zip(chi2s) {
            edge.chi2 = value;
        }
        Ok(())
    }

    /// Sum of the cached edge chi-squares
    pub fn active_chi2(&self) -> f64 {
        self.edges.iter().map(|e| e.chi2).sum()
    }

    /// Run at most `max_iterations` solver iterations over the active set.
    pub fn optimize(&mut self, max_iterations: usize) -> SclamResult<OptimizationSummary> {
        if self.active.is_none() {
            return Err(GraphError::NotInitialized.into());
        }
        let mut solver = LevenbergMarquardt::with_config(self.optimizer_config.clone());
        let summary = solver.minimize(self, max_iterations)?;
        self.compute_active_errors()?;
        Ok(summary)
    }

    /// Overwrite the free pose estimates by propagating from `roots` through the edges.
    ///
    /// `roots`, every non-pose vertex and every fixed vertex count as known. Unknown
    /// vertices are reached breadth-first; an edge seeds a neighbor only when its
    /// factor can produce an estimate from the vertices already known.
    /// Returns the number of seeded vertices.
    pub fn compute_initial_guess(&mut self, roots: &[usize]) -> SclamResult<usize> {
        let mut known: BTreeSet<usize> = self
            .vertices
            .values()
            .filter(|v| v.role() != VariableRole::Pose || v.is_fixed())
            .map(|v| v.id())
            .collect();
        known.extend(roots.iter().copied());

        let mut incident: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for (index, edge) in self.edges.iter().enumerate() {
            for &id in edge.factor.vertex_ids() {
                incident.entry(id).or_default().push(index);
            }
        }

        let mut queue: VecDeque<usize> = roots.iter().copied().collect();
        let mut seeded = 0;
        while let Some(current) = queue.pop_front() {
            let Some(edge_indices) = incident.get(&current) else {
                continue;
            };
            for &index in edge_indices {
                let proposals: Vec<(usize, Estimate)> = {
                    let factor = &self.edges[index].factor;
                    let ids = factor.vertex_ids();
                    let estimates: Vec<Option<&Estimate>> = ids
                        .iter()
                        .map(|id| {
                            if known.contains(id) {
                                self.vertices.get(id).map(|v| &v.estimate)
                            } else {
                                None
                            }
                        })
                        .collect();
                    ids.iter()
                        .enumerate()
                        .filter(|(_, id)| !known.contains(id))
                        .filter_map(|(target, &id)| {
                            factor
                                .initial_estimate(&estimates, target)
                                .map(|estimate| (id, estimate))
                        })
                        .collect()
                };
                for (id, estimate) in proposals {
                    if known.insert(id) {
                        self.set_estimate(id, estimate)?;
                        queue.push_back(id);
                        seeded += 1;
                    }
                }
            }
        }
        debug!("Initial guess propagated to {seeded} vertices");
        Ok(seeded)
    }

    fn estimates_of(&self, factor: &F) -> Result<Vec<&Estimate>, GraphError> {
        factor
            .vertex_ids()
            .iter()
            .map(|&id| {
                self.vertices
                    .get(&id)
                    .map(|v| &v.estimate)
                    .ok_or(GraphError::UnknownVertex { id })
            })
            .collect()
    }

    fn active_set(&self) -> Result<&ActiveSet, GraphError> {
        self.active.as_ref().ok_or(GraphError::NotInitialized)
    }
}

fn chi2(residual: &DVector<f64>, information: &DMatrix<f64>) -> f64 {
    residual.dot(&(information * residual))
}

impl<F: Factor> Optimizable for Graph<F> {
    fn dimension(&self) -> usize {
        self.active.as_ref().map_or(0, |a| a.dimension)
    }

    fn linearize(&self) -> SclamResult<LinearSystem> {
        let active = self.active_set()?;
        let mut system = LinearSystem::new(active.dimension);

        for edge in &self.edges {
            let factor = &edge.factor;
            let estimates = self.estimates_of(factor)?;
            let (residual, jacobian) = factor.linearize(&estimates, true)?;
            let Some(jacobian) = jacobian else {
                continue;
            };

            let information = factor.information();
            let s = chi2(&residual, information);
            let weight = match &edge.robust_kernel {
                Some(kernel) => {
                    let [rho, rho1, _] = kernel.evaluate(s);
                    system.cost += rho;
                    rho1
                }
                None => {
                    system.cost += s;
                    1.0
                }
            };
            let weighted_information = information * weight;

            // (vertex column offset, jacobian column start, dimension) of the free endpoints
            let mut blocks = Vec::with_capacity(estimates.len());
            let mut column = 0;
            for (&id, estimate) in factor.vertex_ids().iter().zip(&estimates) {
                let dim = estimate.dimension();
                if let Some(&offset) = active.offsets.get(&id) {
                    blocks.push((offset, column, dim));
                }
                column += dim;
            }

            let rows = residual.len();
            for &(offset_a, col_a, dim_a) in &blocks {
                let j_a = jacobian.view((0, col_a), (rows, dim_a));
                let jt_omega = j_a.transpose() * &weighted_information;

                let g_block = &jt_omega * &residual;
                for i in 0..dim_a {
                    system.gradient[offset_a + i] += g_block[i];
                }

                for &(offset_b, col_b, dim_b) in &blocks {
                    let j_b = jacobian.view((0, col_b), (rows, dim_b));
                    let h_block = &jt_omega * j_b;
                    for i in 0..dim_a {
                        for j in 0..dim_b {
                            *system
                                .hessian
                                .entry((offset_a + i, offset_b + j))
                                .or_insert(0.0) += h_block[(i, j)];
                        }
                    }
                }
            }
        }
        Ok(system)
    }

    fn cost(&self) -> SclamResult<f64> {
        let mut cost = 0.0;
        for edge in &self.edges {
            let estimates = self.estimates_of(&edge.factor)?;
            let (residual, _) = edge.factor.linearize(&estimates, false)?;
            let s = chi2(&residual, edge.factor.information());
            cost += match &edge.robust_kernel {
                Some(kernel) => kernel.evaluate(s)[0],
                None => s,
            };
        }
        Ok(cost)
    }

    fn apply_step(&mut self, step: &[f64]) -> SclamResult<()> {
        let active = self.active.as_ref().ok_or(GraphError::NotInitialized)?;
        if step.len() != active.dimension {
            return Err(OptimizerError::StepDimension {
                expected: active.dimension,
                actual: step.len(),
            }
            .into());
        }
        for (&id, &offset) in &active.offsets {
            let vertex = self
                .vertices
                .get_mut(&id)
                .ok_or(GraphError::UnknownVertex { id })?;
            let dim = vertex.dimension();
            vertex.estimate = vertex.estimate.plus(&step[offset..offset + dim]);
        }
        Ok(())
    }

    fn save_state(&mut self) {
        self.backup.clear();
        if let Some(active) = &self.active {
            for id in &active.order {
                if let Some(vertex) = self.vertices.get(id) {
                    self.backup.push((*id, vertex.estimate.clone()));
                }
            }
        }
    }

    fn restore_state(&mut self) {
        for (id, estimate) in self.backup.drain(..) {
            if let Some(vertex) = self.vertices.get_mut(&id) {
                vertex.estimate = estimate;
            }
        }
    }
}
