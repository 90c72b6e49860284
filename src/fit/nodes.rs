//! Redshift node grid generation.
//!
//! Node grids are configuration-derived: the same range and spacing always give
//! the same grid, independent of the data being fit.

use crate::error::CalibError;

/// Generate an evenly spaced node grid covering `[zmin, zmax]` (inclusive).
///
/// The number of intervals is `round((zmax - zmin) / spacing)`, at least one, so
/// the realised spacing is close to (not exactly) the requested one. When
/// `max_count` is given the grid is thinned to at most that many nodes.
pub fn make_nodes(
    zrange: [f64; 2],
    spacing: f64,
    max_count: Option<usize>,
) -> Result<Vec<f64>, CalibError> {
    let [zmin, zmax] = zrange;
    if !(zmin.is_finite() && zmax.is_finite() && zmax > zmin) {
        return Err(CalibError::config(format!(
            "invalid node range: [{zmin}, {zmax}] (must be finite with max > min)"
        )));
    }
    if !(spacing.is_finite() && spacing > 0.0) {
        return Err(CalibError::config(format!(
            "node spacing must be positive, got {spacing}"
        )));
    }

    let intervals = ((zmax - zmin) / spacing).round().max(1.0) as usize;
    let mut count = intervals + 1;
    if let Some(cap) = max_count {
        if cap < 2 {
            return Err(CalibError::config(format!(
                "node count cap must be >= 2, got {cap}"
            )));
        }
        count = count.min(cap);
    }

    let step = (zmax - zmin) / (count as f64 - 1.0);
    let mut out = Vec::with_capacity(count);
    for i in 0..count - 1 {
        out.push(zmin + step * i as f64);
    }
    out.push(zmax);
    Ok(out)
}

/// Window `(lo, hi)` owned by node `i`: midpoints to the neighbours, or the node
/// itself at either end of the grid.
pub fn node_window(nodes: &[f64], i: usize) -> (f64, f64) {
    let lo = if i == 0 {
        nodes[0]
    } else {
        (nodes[i - 1] + nodes[i]) / 2.0
    };
    let hi = if i == nodes.len() - 1 {
        nodes[i]
    } else {
        (nodes[i] + nodes[i + 1]) / 2.0
    };
    (lo, hi)
}

/// For each node of `coarse`, the index of the nearest node of `fine` at or above it.
pub fn searchsorted(fine: &[f64], coarse: &[f64]) -> Vec<usize> {
    coarse
        .iter()
        .map(|&z| fine.partition_point(|&f| f < z).min(fine.len() - 1))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn five_nodes_for_point_two_range() {
        let nodes = make_nodes([0.1, 0.3], 0.05, None).unwrap();
        let expected = [0.1, 0.15, 0.2, 0.25, 0.3];
        assert_eq!(nodes.len(), expected.len());
        for (a, b) in nodes.iter().zip(expected) {
            assert_relative_eq!(*a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn count_cap_thins_the_grid() {
        let nodes = make_nodes([0.1, 0.3], 0.01, Some(3)).unwrap();
        assert_eq!(nodes.len(), 3);
        assert_relative_eq!(nodes[1], 0.2, epsilon = 1e-12);
        assert_eq!(nodes[2], 0.3);
    }

    #[test]
    fn coarse_spacing_still_gives_two_nodes() {
        let nodes = make_nodes([0.1, 0.3], 1.0, None).unwrap();
        assert_eq!(nodes, vec![0.1, 0.3]);
    }

    #[test]
    fn rejects_bad_ranges() {
        assert!(make_nodes([0.3, 0.1], 0.05, None).is_err());
        assert!(make_nodes([0.1, 0.3], 0.0, None).is_err());
        assert!(make_nodes([0.1, 0.3], 0.05, Some(1)).is_err());
    }

    #[test]
    fn windows_meet_at_midpoints() {
        let nodes = [0.1, 0.2, 0.3];
        let (lo, hi) = node_window(&nodes, 0);
        assert_eq!(lo, 0.1);
        assert_relative_eq!(hi, 0.15, epsilon = 1e-12);
        let (lo, hi) = node_window(&nodes, 2);
        assert_relative_eq!(lo, 0.25, epsilon = 1e-12);
        assert_eq!(hi, 0.3);
    }
}
