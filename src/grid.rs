//! Regular-grid containers and the sampling conventions of a staggered
//! (MAC) discretization.
//!
//! Scalar quantities live at cell centers, vector components on the faces
//! orthogonal to their own axis, and stress-like quantities on cell edges.
//! [`ScalarGrid`] stores one dense lattice of samples; [`VectorGrid`] bundles
//! three of them, one per axis. The free functions at the bottom of the
//! module are the index-only adjacency lookups between cells, faces and
//! edges that the viscosity discretization is built on.

use nalgebra as na;

/// Type alias for a 3D `nalgebra` vector of reals.
pub type Vec3 = na::Vector3<f64>;
/// Type alias for an integer grid coordinate.
pub type Vec3i = na::Vector3<i32>;

/// Mapping from index space to world space: uniform spacing plus an origin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GridTransform {
    origin: Vec3,
    dx: f64,
}

impl GridTransform {
    /// Create a transform with the given world-space origin and cell width.
    pub fn new(origin: Vec3, dx: f64) -> Self {
        assert!(dx > 0.0, "cell width must be positive");
        Self { origin, dx }
    }

    /// The world-space width of one cell.
    #[inline]
    pub fn dx(&self) -> f64 {
        self.dx
    }

    /// The world-space position of the index-space origin.
    #[inline]
    pub fn origin(&self) -> Vec3 {
        self.origin
    }

    /// Map a (fractional) index-space position to world space.
    #[inline]
    pub fn index_to_world(&self, index_pos: Vec3) -> Vec3 {
        self.origin + self.dx * index_pos
    }

    /// Map a world-space position to (fractional) index space.
    #[inline]
    pub fn world_to_index(&self, world_pos: Vec3) -> Vec3 {
        (world_pos - self.origin) / self.dx
    }
}

/// Where on the cell lattice the samples of a grid live.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SampleType {
    /// One sample per cell, at the cell's center.
    Center,
    /// Samples on the faces orthogonal to the given axis;
    /// one more sample than cells along that axis.
    Face(usize),
    /// Samples on the edges running along the given axis;
    /// one more sample than cells along the two transverse axes.
    Edge(usize),
}

impl SampleType {
    /// Sample resolution for a grid of `cells` cells.
    pub fn size(self, cells: Vec3i) -> Vec3i {
        match self {
            SampleType::Center => cells,
            SampleType::Face(axis) => cells + unit(axis),
            SampleType::Edge(axis) => cells + Vec3i::new(1, 1, 1) - unit(axis),
        }
    }

    /// Index-space offset of sample (0, 0, 0) from the lattice origin.
    pub fn offset(self) -> Vec3 {
        match self {
            SampleType::Center => Vec3::new(0.5, 0.5, 0.5),
            SampleType::Face(axis) => {
                let mut offset = Vec3::new(0.5, 0.5, 0.5);
                offset[axis] = 0.0;
                offset
            }
            SampleType::Edge(axis) => {
                let mut offset = Vec3::zeros();
                offset[axis] = 0.5;
                offset
            }
        }
    }
}

/// Flat storage index of a coordinate in a grid of the given sample
/// resolution. Raster order: x varies fastest, then y, then z.
#[inline]
pub(crate) fn flat_index(size: Vec3i, coord: Vec3i) -> usize {
    debug_assert!(coord_in_bounds(size, coord));
    ((coord.z as usize * size.y as usize) + coord.y as usize) * size.x as usize + coord.x as usize
}

/// Inverse of [`flat_index`].
#[inline]
pub(crate) fn coord_from_flat(size: Vec3i, flat: usize) -> Vec3i {
    let x_span = size.x as usize;
    let xy_span = x_span * size.y as usize;
    Vec3i::new(
        (flat % x_span) as i32,
        ((flat / x_span) % size.y as usize) as i32,
        (flat / xy_span) as i32,
    )
}

#[inline]
fn coord_in_bounds(size: Vec3i, coord: Vec3i) -> bool {
    (0..3).all(|axis| coord[axis] >= 0 && coord[axis] < size[axis])
}

/// A dense lattice of samples of a single quantity.
#[derive(Clone, Debug)]
pub struct ScalarGrid<T> {
    xform: GridTransform,
    cells: Vec3i,
    sample_type: SampleType,
    size: Vec3i,
    data: Vec<T>,
}

impl<T: Clone> ScalarGrid<T> {
    /// Create a grid over `cells` cells filled with a background value.
    pub fn new(xform: GridTransform, cells: Vec3i, background: T, sample_type: SampleType) -> Self {
        assert!(
            cells.iter().all(|&c| c > 0),
            "grid must have at least one cell per axis"
        );
        let size = sample_type.size(cells);
        let voxel_count = size.iter().map(|&s| s as usize).product();
        Self {
            xform,
            cells,
            sample_type,
            size,
            data: vec![background; voxel_count],
        }
    }

    /// Create a grid by evaluating a function at every sample's world position.
    pub fn from_fn(
        xform: GridTransform,
        cells: Vec3i,
        sample_type: SampleType,
        f: impl Fn(Vec3) -> T,
    ) -> Self
    where
        T: Default,
    {
        let mut grid = Self::new(xform, cells, T::default(), sample_type);
        for flat in 0..grid.data.len() {
            let world = grid.index_to_world(coord_from_flat(grid.size, flat));
            grid.data[flat] = f(world);
        }
        grid
    }

    /// The sample resolution of this grid.
    #[inline]
    pub fn size(&self) -> Vec3i {
        self.size
    }

    /// The cell resolution of the underlying lattice.
    #[inline]
    pub fn cells(&self) -> Vec3i {
        self.cells
    }

    /// The grid's index-to-world transform.
    #[inline]
    pub fn xform(&self) -> GridTransform {
        self.xform
    }

    /// Where this grid's samples live.
    #[inline]
    pub fn sample_type(&self) -> SampleType {
        self.sample_type
    }

    /// Total number of samples.
    #[inline]
    pub fn voxel_count(&self) -> usize {
        self.data.len()
    }

    /// Flat storage index of a sample coordinate.
    #[inline]
    pub fn flatten(&self, coord: Vec3i) -> usize {
        flat_index(self.size, coord)
    }

    /// Sample coordinate of a flat storage index.
    #[inline]
    pub fn unflatten(&self, flat: usize) -> Vec3i {
        coord_from_flat(self.size, flat)
    }

    /// Bounds-checked sample read.
    #[inline]
    pub fn get(&self, coord: Vec3i) -> Option<&T> {
        if coord_in_bounds(self.size, coord) {
            Some(&self.data[flat_index(self.size, coord)])
        } else {
            None
        }
    }

    /// World-space position of a sample.
    #[inline]
    pub fn index_to_world(&self, coord: Vec3i) -> Vec3 {
        self.xform
            .index_to_world(coord.map(f64::from) + self.sample_type.offset())
    }

    /// Whether another grid shares this grid's transform and cell lattice.
    pub fn is_grid_matched<U>(&self, other: &ScalarGrid<U>) -> bool {
        self.xform == other.xform && self.cells == other.cells
    }

    /// The raw samples in raster order.
    #[inline]
    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    /// The raw samples in raster order, mutably.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [T] {
        &mut self.data
    }
}

impl<T: Clone> std::ops::Index<Vec3i> for ScalarGrid<T> {
    type Output = T;

    #[inline]
    fn index(&self, coord: Vec3i) -> &T {
        &self.data[flat_index(self.size, coord)]
    }
}

impl<T: Clone> std::ops::IndexMut<Vec3i> for ScalarGrid<T> {
    #[inline]
    fn index_mut(&mut self, coord: Vec3i) -> &mut T {
        let flat = flat_index(self.size, coord);
        &mut self.data[flat]
    }
}

impl ScalarGrid<f64> {
    /// Trilinearly interpolate the grid at a world-space position.
    ///
    /// Positions outside the sample lattice are clamped to it,
    /// so queries near the domain boundary degrade to constant extrapolation.
    pub fn interp(&self, world_pos: Vec3) -> f64 {
        let sample_pos = self.xform.world_to_index(world_pos) - self.sample_type.offset();

        let mut base = Vec3i::zeros();
        let mut frac = Vec3::zeros();
        for axis in 0..3 {
            let max_base = (self.size[axis] - 2).max(0) as f64;
            let clamped = sample_pos[axis].clamp(0.0, (self.size[axis] - 1) as f64);
            let floor = clamped.floor().min(max_base);
            base[axis] = floor as i32;
            frac[axis] = if self.size[axis] > 1 {
                clamped - floor
            } else {
                0.0
            };
        }

        let mut result = 0.0;
        for corner in 0..8 {
            let offset = Vec3i::new(corner & 1, (corner >> 1) & 1, (corner >> 2) & 1);
            let mut weight = 1.0;
            for axis in 0..3 {
                weight *= if offset[axis] == 1 {
                    frac[axis]
                } else {
                    1.0 - frac[axis]
                };
            }
            if weight > 0.0 {
                result += weight * self[base + offset];
            }
        }
        result
    }
}

/// Whether a [`VectorGrid`]'s per-axis subgrids sample faces or edges.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VectorSampleType {
    /// Subgrid `axis` samples the faces orthogonal to `axis`
    /// (the staggered velocity layout).
    Staggered,
    /// Subgrid `axis` samples the edges running along `axis`.
    Edge,
}

impl VectorSampleType {
    fn scalar_sample(self, axis: usize) -> SampleType {
        match self {
            VectorSampleType::Staggered => SampleType::Face(axis),
            VectorSampleType::Edge => SampleType::Edge(axis),
        }
    }
}

/// Three scalar grids sampling one component of a vector quantity each.
#[derive(Clone, Debug)]
pub struct VectorGrid<T> {
    grids: [ScalarGrid<T>; 3],
    sample_type: VectorSampleType,
}

impl<T: Clone> VectorGrid<T> {
    /// Create a vector grid over `cells` cells filled with a background value.
    pub fn new(
        xform: GridTransform,
        cells: Vec3i,
        background: T,
        sample_type: VectorSampleType,
    ) -> Self {
        Self {
            grids: [0, 1, 2].map(|axis| {
                ScalarGrid::new(
                    xform,
                    cells,
                    background.clone(),
                    sample_type.scalar_sample(axis),
                )
            }),
            sample_type,
        }
    }

    /// The subgrid holding the given axis component.
    #[inline]
    pub fn grid(&self, axis: usize) -> &ScalarGrid<T> {
        &self.grids[axis]
    }

    /// The subgrid holding the given axis component, mutably.
    #[inline]
    pub fn grid_mut(&mut self, axis: usize) -> &mut ScalarGrid<T> {
        &mut self.grids[axis]
    }

    /// The cell resolution of the underlying lattice.
    #[inline]
    pub fn cells(&self) -> Vec3i {
        self.grids[0].cells()
    }

    /// The grid's index-to-world transform.
    #[inline]
    pub fn xform(&self) -> GridTransform {
        self.grids[0].xform()
    }

    /// Where this grid's samples live.
    #[inline]
    pub fn sample_type(&self) -> VectorSampleType {
        self.sample_type
    }

    /// Bounds-checked sample read of one component.
    #[inline]
    pub fn get(&self, coord: Vec3i, axis: usize) -> Option<&T> {
        self.grids[axis].get(coord)
    }

    /// Whether another vector grid shares this grid's transform,
    /// cell lattice and sample layout.
    pub fn is_grid_matched<U>(&self, other: &VectorGrid<U>) -> bool {
        self.sample_type == other.sample_type
            && self.grids[0].is_grid_matched(&other.grids[0])
    }
}

impl<T: Clone> std::ops::Index<(Vec3i, usize)> for VectorGrid<T> {
    type Output = T;

    #[inline]
    fn index(&self, (coord, axis): (Vec3i, usize)) -> &T {
        &self.grids[axis][coord]
    }
}

impl<T: Clone> std::ops::IndexMut<(Vec3i, usize)> for VectorGrid<T> {
    #[inline]
    fn index_mut(&mut self, (coord, axis): (Vec3i, usize)) -> &mut T {
        &mut self.grids[axis][coord]
    }
}

//
// adjacency lookups
//

/// The unit coordinate step along an axis.
#[inline]
pub fn unit(axis: usize) -> Vec3i {
    let mut u = Vec3i::zeros();
    u[axis] = 1;
    u
}

/// The axis orthogonal to two distinct axes.
#[inline]
pub fn third_axis(a: usize, b: usize) -> usize {
    debug_assert!(a != b && a < 3 && b < 3);
    3 - a - b
}

/// The cell on either side of a face. Direction 0 is the lower neighbor.
#[inline]
pub fn face_to_cell(face: Vec3i, face_axis: usize, direction: usize) -> Vec3i {
    let mut cell = face;
    if direction == 0 {
        cell[face_axis] -= 1;
    }
    cell
}

/// The face bounding a cell along an axis. Direction 0 is the lower face.
#[inline]
pub fn cell_to_face(cell: Vec3i, face_axis: usize, direction: usize) -> Vec3i {
    let mut face = cell;
    if direction == 1 {
        face[face_axis] += 1;
    }
    face
}

/// The edge running along `edge_axis` incident to a face,
/// on the `direction` side across the axis orthogonal to both.
#[inline]
pub fn face_to_edge(face: Vec3i, face_axis: usize, edge_axis: usize, direction: usize) -> Vec3i {
    let offset_axis = third_axis(face_axis, edge_axis);
    let mut edge = face;
    if direction == 1 {
        edge[offset_axis] += 1;
    }
    edge
}

/// The face with the given axis incident to an edge,
/// on the `direction` side across the axis orthogonal to both.
#[inline]
pub fn edge_to_face(edge: Vec3i, edge_axis: usize, face_axis: usize, direction: usize) -> Vec3i {
    let offset_axis = third_axis(edge_axis, face_axis);
    let mut face = edge;
    if direction == 0 {
        face[offset_axis] -= 1;
    }
    face
}

//
// tests
//
