//! GPS preprocessing pipeline.
//!
//! Raw fixes are buffered during assembly and filtered before any of them reaches the
//! graph:
//!
//! 1. remove short segments delimited by implausible jumps (bursts of bad fixes),
//! 2. thin dense clusters down to about one fix per minimum spacing,
//! 3. remove short segments again, to clean up what thinning exposed,
//! 4. synthesize a heading for every survivor from its neighbors.
//!
//! Each stage consumes the buffer and returns a new one; no stage mutates a sequence
//! while walking it. The thresholds match the noise of the GPS unit and are constants.

use thiserror::Error;
use tracing::info;

use crate::factors::GpsFactor;

/// Displacement between consecutive fixes that marks a segment boundary
pub const OUTLIER_DISTANCE: f64 = 1.2;

/// Segments with fewer consecutive steps than this are discarded
pub const MIN_SEGMENT_STEPS: usize = 40;

/// Fixes closer than this to the last kept fix are dropped
pub const MIN_SPACING: f64 = 0.85;

/// Heading synthesis needs this many fixes
pub const MIN_FIXES: usize = 4;

/// Buffers of this size or smaller are left untouched by the filters
const MIN_FILTERABLE: usize = 5;

/// Errors raised by the GPS pipeline.
#[derive(Debug, Clone, Error)]
pub enum PipelineError {
    #[error("Insufficient GPS fixes: found {found}, at least {MIN_FIXES} are required")]
    InsufficientFixes { found: usize },
}

/// Drop every segment shorter than [`MIN_SEGMENT_STEPS`] steps.
///
/// A segment ends where the distance between two consecutive fixes exceeds `threshold`.
/// A trailing segment that never hits a boundary is kept.
pub fn remove_outlier_segments(fixes: Vec<GpsFactor>, threshold: f64) -> Vec<GpsFactor> {
    if fixes.len() <= MIN_FILTERABLE {
        return fixes;
    }

    let mut keep = vec![true; fixes.len()];
    let mut segment_start = 0;
    let mut steps = 0;

    for next in 1..fixes.len() {
        if fixes[next - 1].distance_to(&fixes[next]) > threshold {
            if steps < MIN_SEGMENT_STEPS {
                keep[segment_start..next].fill(false);
            }
            segment_start = next;
            steps = 0;
        } else {
            steps += 1;
        }
    }

    fixes
        .into_iter()
        .zip(keep)
        .filter_map(|(fix, kept)| kept.then_some(fix))
        .collect()
}

/// Drop every fix closer than `min_spacing` to the last kept one.
pub fn sparsify(fixes: Vec<GpsFactor>, min_spacing: f64) -> Vec<GpsFactor> {
    if fixes.len() <= MIN_FILTERABLE {
        return fixes;
    }

    let mut kept: Vec<GpsFactor> = Vec::with_capacity(fixes.len());
    for fix in fixes {
        match kept.last() {
            Some(last) if last.distance_to(&fix) < min_spacing => {}
            _ => kept.push(fix),
        }
    }
    kept
}

/// Fill in the synthetic heading of every fix.
///
/// Interior fixes take the direction from their predecessor to their successor; the
/// first and last fixes take the direction to or from their only neighbor.
pub fn synthesize_headings(fixes: &mut [GpsFactor]) -> Result<(), PipelineError> {
    let n = fixes.len();
    if n < MIN_FIXES {
        return Err(PipelineError::InsufficientFixes { found: n });
    }

    let direction = |from: &GpsFactor, to: &GpsFactor| {
        let d = to.position() - from.position();
        d.y.atan2(d.x)
    };

    let headings: Vec<f64> = (0..n)
        .map(|i| match i {
            0 => direction(&fixes[0], &fixes[1]),
            i if i == n - 1 => direction(&fixes[n - 2], &fixes[n - 1]),
            i => direction(&fixes[i - 1], &fixes[i + 1]),
        })
        .collect();

    for (fix, heading) in fixes.iter_mut().zip(headings) {
        fix.set_synthetic_heading(heading);
    }
    Ok(())
}

/// The full filtering pipeline over a time-ordered buffer of fixes.
#[derive(Debug, Clone)]
pub struct GpsPipeline {
    pub outlier_distance: f64,
    pub min_spacing: f64,
}

impl Default for GpsPipeline {
    fn default() -> Self {
        GpsPipeline {
            outlier_distance: OUTLIER_DISTANCE,
            min_spacing: MIN_SPACING,
        }
    }
}

impl GpsPipeline {
    /// Filter `buffer` and return the survivors with synthetic headings.
    pub fn run(&self, buffer: Vec<GpsFactor>) -> Result<Vec<GpsFactor>, PipelineError> {
        let raw = buffer.len();
        if raw < MIN_FIXES {
            return Err(PipelineError::InsufficientFixes { found: raw });
        }

        let fixes = remove_outlier_segments(buffer, self.outlier_distance);
        let after_removal = fixes.len();
        let fixes = sparsify(fixes, self.min_spacing);
        let after_sparsify = fixes.len();
        let mut fixes = remove_outlier_segments(fixes, self.outlier_distance);

        synthesize_headings(&mut fixes)?;

        info!(
            "GPS filtering: {} raw fixes, {} after outlier removal, {} after sparsification, {} kept",
            raw,
            after_removal,
            after_sparsify,
            fixes.len()
        );
        Ok(fixes)
    }
}
