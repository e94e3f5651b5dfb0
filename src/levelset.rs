//! Signed-distance surfaces sampled at cell centers.

use crate::grid::{GridTransform, SampleType, ScalarGrid, Vec3, Vec3i};

/// A surface represented as a center-sampled signed-distance field.
///
/// Values are negative inside the region the surface bounds
/// and positive outside. Only the sign and approximate magnitude near
/// the surface matter to the solver; the field does not need to be
/// a perfect distance function away from it.
#[derive(Clone, Debug)]
pub struct LevelSet {
    phi: ScalarGrid<f64>,
}

impl LevelSet {
    /// Create a level set with a constant background value
    /// (positive: empty, negative: everything inside).
    pub fn new(xform: GridTransform, cells: Vec3i, background: f64) -> Self {
        Self {
            phi: ScalarGrid::new(xform, cells, background, SampleType::Center),
        }
    }

    /// Create a level set by evaluating a signed-distance function
    /// at every cell center.
    pub fn from_fn(xform: GridTransform, cells: Vec3i, f: impl Fn(Vec3) -> f64) -> Self {
        Self {
            phi: ScalarGrid::from_fn(xform, cells, SampleType::Center, f),
        }
    }

    /// The cell resolution of the underlying grid.
    #[inline]
    pub fn size(&self) -> Vec3i {
        self.phi.cells()
    }

    /// The underlying grid's transform.
    #[inline]
    pub fn xform(&self) -> GridTransform {
        self.phi.xform()
    }

    /// The grid spacing.
    #[inline]
    pub fn dx(&self) -> f64 {
        self.phi.xform().dx()
    }

    /// The signed distance interpolated at a world-space position.
    #[inline]
    pub fn interp(&self, world_pos: Vec3) -> f64 {
        self.phi.interp(world_pos)
    }

    /// The stored sample at a cell.
    #[inline]
    pub fn at_cell(&self, cell: Vec3i) -> f64 {
        self.phi[cell]
    }

    /// Whether another level set lives on the same lattice as this one.
    pub fn is_grid_matched(&self, other: &LevelSet) -> bool {
        self.phi.is_grid_matched(&other.phi)
    }

    /// Whether a scalar grid lives on the same lattice as this level set.
    pub fn is_grid_matched_scalar<T>(&self, other: &ScalarGrid<T>) -> bool {
        self.phi.is_grid_matched(other)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn sphere_distance_has_the_right_sign() {
        let xform = GridTransform::new(Vec3::new(-2.0, -2.0, -2.0), 0.25);
        let sphere = LevelSet::from_fn(xform, Vec3i::new(16, 16, 16), |p| p.norm() - 1.0);

        assert!(sphere.interp(Vec3::zeros()) < 0.0);
        assert!(sphere.interp(Vec3::new(1.8, 0.0, 0.0)) > 0.0);
        // near the surface the interpolated distance is close to exact
        assert_abs_diff_eq!(sphere.interp(Vec3::new(1.0, 0.0, 0.0)), 0.0, epsilon = 0.05);
    }

    #[test]
    fn grid_matching_requires_same_lattice() {
        let xform = GridTransform::new(Vec3::zeros(), 1.0);
        let a = LevelSet::new(xform, Vec3i::new(4, 4, 4), 1.0);
        let b = LevelSet::new(xform, Vec3i::new(4, 4, 4), -1.0);
        let c = LevelSet::new(xform, Vec3i::new(4, 4, 5), 1.0);
        assert!(a.is_grid_matched(&b));
        assert!(!a.is_grid_matched(&c));
    }
}
