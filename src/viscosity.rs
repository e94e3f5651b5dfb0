//! Implicit integration of viscous stresses on a staggered velocity grid.
//!
//! One call to [`solve_viscosity`] advances the velocity field by a single
//! timestep of the variational viscosity discretization: faces are
//! classified against the fluid and solid surfaces, a sparse symmetric
//! positive-(semi)definite system is assembled from sub-grid volume
//! fractions at cell centers, edges and faces, the system is solved with
//! conjugate gradient seeded by the current velocity, and the solution is
//! scattered back onto the liquid faces. Faces outside the active set are
//! never written.
//!
//! Velocity components couple across axes through the shear terms, so the
//! whole staggered field is one linear system rather than three.

use itertools::izip;
use nalgebra::DVector;
use nalgebra_sparse::{CooMatrix, CsrMatrix};
use rayon::prelude::*;

use crate::grid::{
    cell_to_face, coord_from_flat, face_to_cell, face_to_edge, edge_to_face, third_axis,
    SampleType, ScalarGrid, Vec3i, VectorGrid, VectorSampleType,
};
use crate::levelset::LevelSet;
use crate::pcg::{self, PcgConfig, PcgError};

/// Supersampling factor for the volume fraction estimates.
const VOLUME_SAMPLES: usize = 3;

/// Sentinel for faces that hold no unknown.
const UNINDEXED: i32 = -1;

/// The material a staggered face belongs to.
///
/// Air faces carry a free-surface (zero stress) condition and solid faces
/// a prescribed velocity; only liquid faces are unknowns of the solve.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FaceMaterial {
    /// Inside a solid obstacle; velocity prescribed by the solid.
    Solid,
    /// Inside the liquid; one degree of freedom in the system.
    Liquid,
    /// Neither: no fluid volume nearby, zero-stress boundary.
    Air,
}

/// Diagnostics of a completed viscosity solve.
#[derive(Clone, Copy, Debug)]
pub struct SolveStats {
    /// Number of liquid faces, i.e. unknowns in the linear system.
    pub dof_count: usize,
    /// Conjugate gradient iterations taken.
    pub iterations: usize,
    /// Achieved relative residual.
    pub residual: f64,
}

/// Failure of a viscosity solve.
///
/// On failure the velocity field is left exactly as it was passed in;
/// partial results are never applied. The caller may retry with a
/// relaxed [`PcgConfig`] via [`solve_viscosity_with_config`].
#[derive(thiserror::Error, Debug)]
pub enum ViscosityError {
    /// The assembled system degenerated numerically.
    #[error("viscosity system is degenerate: {0}")]
    DegenerateSystem(#[source] PcgError),
    /// The iterative solve ran out of iterations.
    #[error("viscosity solve did not converge: {0}")]
    NotConverged(#[source] PcgError),
}

/// Apply viscous stresses to `velocity` over one timestep
/// with the default solver configuration (tolerance 1e-3).
///
/// `surface` is the liquid's signed-distance surface and `viscosity` a
/// center-sampled dynamic viscosity field on the same lattice.
/// `solid_surface` and `solid_velocity` describe obstacles; faces inside
/// the solid act as moving walls with the solid's velocity.
///
/// Grid preconditions (checked by assertion, violations are caller bugs):
/// the two surfaces and the viscosity field must share one lattice, the
/// two velocity grids must share one staggered lattice, and that lattice
/// must wrap the surface lattice in the usual staggered fashion
/// (one more face than cells along each component's own axis).
pub fn solve_viscosity(
    dt: f64,
    surface: &LevelSet,
    velocity: &mut VectorGrid<f64>,
    solid_surface: &LevelSet,
    solid_velocity: &VectorGrid<f64>,
    viscosity: &ScalarGrid<f64>,
) -> Result<SolveStats, ViscosityError> {
    solve_viscosity_with_config(
        dt,
        surface,
        velocity,
        solid_surface,
        solid_velocity,
        viscosity,
        PcgConfig::default(),
    )
}

/// [`solve_viscosity`] with explicit solver tuning.
pub fn solve_viscosity_with_config(
    dt: f64,
    surface: &LevelSet,
    velocity: &mut VectorGrid<f64>,
    solid_surface: &LevelSet,
    solid_velocity: &VectorGrid<f64>,
    viscosity: &ScalarGrid<f64>,
    config: PcgConfig,
) -> Result<SolveStats, ViscosityError> {
    assert!(dt >= 0.0, "timestep must be non-negative");
    assert!(
        surface.is_grid_matched(solid_surface),
        "solid surface must share the fluid surface's lattice"
    );
    assert!(
        surface.is_grid_matched_scalar(viscosity)
            && viscosity.sample_type() == SampleType::Center,
        "viscosity must be center-sampled on the fluid surface's lattice"
    );
    assert!(
        velocity.is_grid_matched(solid_velocity)
            && velocity.sample_type() == VectorSampleType::Staggered,
        "solid velocity must share the velocity's staggered lattice"
    );
    for axis in 0..3 {
        let mut face_size = velocity.grid(axis).size();
        face_size[axis] -= 1;
        assert_eq!(
            face_size,
            surface.size(),
            "velocity faces must wrap the surface cells"
        );
    }

    let mut center_volumes = ScalarGrid::new(
        surface.xform(),
        surface.size(),
        0.0,
        SampleType::Center,
    );
    crate::volumes::compute_supersample_volumes(&mut center_volumes, surface, VOLUME_SAMPLES);

    let mut edge_volumes =
        VectorGrid::new(surface.xform(), surface.size(), 0.0, VectorSampleType::Edge);
    for axis in 0..3 {
        crate::volumes::compute_supersample_volumes(
            edge_volumes.grid_mut(axis),
            surface,
            VOLUME_SAMPLES,
        );
    }

    let face_volumes = crate::volumes::compute_supersampled_face_volumes(surface, VOLUME_SAMPLES);

    let labels = classify_faces(&center_volumes, &edge_volumes, solid_surface);
    let (indices, dof_count) = assign_liquid_indices(&labels);

    if dof_count == 0 {
        return Ok(SolveStats {
            dof_count: 0,
            iterations: 0,
            residual: 0.0,
        });
    }

    prescale_volumes(&mut center_volumes, &mut edge_volumes, dt, viscosity);

    let (matrix, rhs, guess) = assemble_system(
        &labels,
        &indices,
        dof_count,
        &center_volumes,
        &edge_volumes,
        &face_volumes,
        velocity,
        solid_velocity,
    );

    let solution = pcg::solve(&matrix, &rhs, &guess, config).map_err(|err| match err {
        PcgError::Breakdown { .. } => ViscosityError::DegenerateSystem(err),
        PcgError::NotConverged { .. } => ViscosityError::NotConverged(err),
    })?;

    scatter_solution(velocity, &indices, &solution.x);

    Ok(SolveStats {
        dof_count,
        iterations: solution.iterations,
        residual: solution.residual,
    })
}

/// Label every staggered face of the grid by material.
///
/// A face participates in the solve if either adjacent cell carries fluid
/// volume, or failing that, if any of its four incident edges does; the
/// edge fallback keeps thin slivers of fluid coupled. Participating faces
/// inside the solid surface become walls, the rest become liquid unknowns.
/// Faces on the domain boundary stay out of the solve entirely.
fn classify_faces(
    center_volumes: &ScalarGrid<f64>,
    edge_volumes: &VectorGrid<f64>,
    solid_surface: &LevelSet,
) -> VectorGrid<FaceMaterial> {
    let mut labels = VectorGrid::new(
        center_volumes.xform(),
        center_volumes.cells(),
        FaceMaterial::Air,
        VectorSampleType::Staggered,
    );

    for face_axis in 0..3 {
        let size = labels.grid(face_axis).size();
        let offset = labels.grid(face_axis).sample_type().offset();
        let xform = labels.grid(face_axis).xform();

        labels
            .grid_mut(face_axis)
            .as_mut_slice()
            .par_iter_mut()
            .enumerate()
            .for_each(|(flat, label)| {
                let face = coord_from_flat(size, flat);

                if face[face_axis] == 0 || face[face_axis] == size[face_axis] - 1 {
                    return;
                }

                let mut in_solve = (0..2).any(|direction| {
                    center_volumes[face_to_cell(face, face_axis, direction)] > 0.0
                });

                if !in_solve {
                    'edges: for edge_axis in 0..3 {
                        if edge_axis == face_axis {
                            continue;
                        }
                        for direction in 0..2 {
                            let edge = face_to_edge(face, face_axis, edge_axis, direction);
                            if edge_volumes[(edge, edge_axis)] > 0.0 {
                                in_solve = true;
                                break 'edges;
                            }
                        }
                    }
                }

                if in_solve {
                    let world = xform.index_to_world(face.map(f64::from) + offset);
                    *label = if solid_surface.interp(world) <= 0.0 {
                        FaceMaterial::Solid
                    } else {
                        FaceMaterial::Liquid
                    };
                }
            });
    }

    labels
}

/// Number the liquid faces with a dense range of degree-of-freedom indices.
///
/// This pass is sequential by design: indices are handed out in axis order
/// and then raster order within each axis, which keeps the numbering
/// reproducible between runs.
fn assign_liquid_indices(labels: &VectorGrid<FaceMaterial>) -> (VectorGrid<i32>, usize) {
    let mut indices = VectorGrid::new(
        labels.xform(),
        labels.cells(),
        UNINDEXED,
        VectorSampleType::Staggered,
    );

    let mut dof_count = 0;
    for axis in 0..3 {
        let (labels, indices) = (labels.grid(axis), indices.grid_mut(axis));
        for (&label, index) in izip!(labels.as_slice(), indices.as_mut_slice()) {
            if label == FaceMaterial::Liquid {
                *index = dof_count as i32;
                dof_count += 1;
            }
        }
    }

    (indices, dof_count)
}

/// Scale the control volumes by the discretization coefficients they will
/// carry in the matrix: `2·(dt/dx²)·μ` at cell centers and `(dt/dx²)·μ`
/// at edges, with the viscosity interpolated to the edge position.
///
/// After this the grids are matrix coefficients, not geometric fractions.
fn prescale_volumes(
    center_volumes: &mut ScalarGrid<f64>,
    edge_volumes: &mut VectorGrid<f64>,
    dt: f64,
    viscosity: &ScalarGrid<f64>,
) {
    let dx = viscosity.xform().dx();
    let discrete_scalar = dt / (dx * dx);

    let size = center_volumes.size();
    center_volumes
        .as_mut_slice()
        .par_iter_mut()
        .enumerate()
        .for_each(|(flat, volume)| {
            if *volume > 0.0 {
                let cell = coord_from_flat(size, flat);
                *volume *= 2.0 * discrete_scalar * viscosity[cell];
            }
        });

    for edge_axis in 0..3 {
        let size = edge_volumes.grid(edge_axis).size();
        let offset = edge_volumes.grid(edge_axis).sample_type().offset();
        let xform = edge_volumes.grid(edge_axis).xform();

        edge_volumes
            .grid_mut(edge_axis)
            .as_mut_slice()
            .par_iter_mut()
            .enumerate()
            .for_each(|(flat, volume)| {
                if *volume > 0.0 {
                    let edge = coord_from_flat(size, flat);
                    let world = xform.index_to_world(edge.map(f64::from) + offset);
                    *volume *= discrete_scalar * viscosity.interp(world);
                }
            });
    }
}

/// Coefficient of one leg of the divergence-of-gradient stencil:
/// the two difference signs applied to the shared control volume.
#[inline]
fn stress_coefficient(divergence_direction: usize, gradient_direction: usize, volume: f64) -> f64 {
    let divergence_sign = if divergence_direction == 0 { -1.0 } else { 1.0 };
    let gradient_sign = if gradient_direction == 0 { -1.0 } else { 1.0 };
    divergence_sign * gradient_sign * volume
}

/// Route one stencil coefficient to its destination based on the material
/// of the face it references: liquid faces couple through the matrix
/// (or fold into the diagonal when the face is the row's own), solid
/// faces move their prescribed velocity to the right-hand side, and air
/// faces contribute nothing.
#[allow(clippy::too_many_arguments)]
fn accumulate_term(
    row: usize,
    neighbor_face: Vec3i,
    neighbor_axis: usize,
    coefficient: f64,
    labels: &VectorGrid<FaceMaterial>,
    indices: &VectorGrid<i32>,
    solid_velocity: &VectorGrid<f64>,
    diagonal: &mut f64,
    rhs: &mut f64,
    triplets: &mut Vec<(usize, usize, f64)>,
) {
    // a lookup can run past the grid when a boundary edge carries volume;
    // a face outside the grid holds no unknown and contributes nothing
    let Some(&neighbor_index) = indices.get(neighbor_face, neighbor_axis) else {
        return;
    };

    if neighbor_index >= 0 {
        if neighbor_index as usize == row {
            *diagonal -= coefficient;
        } else {
            triplets.push((row, neighbor_index as usize, -coefficient));
        }
    } else if labels[(neighbor_face, neighbor_axis)] == FaceMaterial::Solid {
        *rhs += coefficient * solid_velocity[(neighbor_face, neighbor_axis)];
    }
}

/// Per-task scratch for parallel assembly, merged by concatenation
/// once all face batches have completed.
#[derive(Default)]
struct AssemblyBatch {
    triplets: Vec<(usize, usize, f64)>,
    /// `(dof, rhs, guess)` of each liquid face this task visited.
    rows: Vec<(usize, f64, f64)>,
}

/// Build the sparse system `A·x = b` plus the initial guess vector.
///
/// The matrix is symmetric by construction: the coefficient coupling two
/// liquid faces is derived from the cell or edge volume they share, with
/// signs that are consistent under swapping the roles of the two faces.
#[allow(clippy::too_many_arguments)]
fn assemble_system(
    labels: &VectorGrid<FaceMaterial>,
    indices: &VectorGrid<i32>,
    dof_count: usize,
    center_volumes: &ScalarGrid<f64>,
    edge_volumes: &VectorGrid<f64>,
    face_volumes: &VectorGrid<f64>,
    velocity: &VectorGrid<f64>,
    solid_velocity: &VectorGrid<f64>,
) -> (CsrMatrix<f64>, DVector<f64>, DVector<f64>) {
    let mut matrix = CooMatrix::new(dof_count, dof_count);
    let mut rhs = DVector::zeros(dof_count);
    let mut guess = DVector::zeros(dof_count);

    for face_axis in 0..3 {
        let size = indices.grid(face_axis).size();
        let index_slice = indices.grid(face_axis).as_slice();
        let velocity_slice = velocity.grid(face_axis).as_slice();
        let face_volume_slice = face_volumes.grid(face_axis).as_slice();

        let batches: Vec<AssemblyBatch> = (0..index_slice.len())
            .into_par_iter()
            .fold(AssemblyBatch::default, |mut batch, flat| {
                let dof = index_slice[flat];
                if dof < 0 {
                    debug_assert!(
                        labels.grid(face_axis).as_slice()[flat] != FaceMaterial::Liquid
                    );
                    return batch;
                }
                let row = dof as usize;
                let face = coord_from_flat(size, flat);

                // the old velocity is both the inertial term and a good
                // starting point: viscosity rarely changes it drastically
                // within one step
                let face_velocity = velocity_slice[flat];
                let face_volume = face_volume_slice[flat];
                let mut row_rhs = face_volume * face_velocity;
                let mut diagonal = face_volume;

                // normal stress: divergence of the diagonal stress
                // components across the two cells sharing the face
                for divergence_direction in 0..2 {
                    let cell = face_to_cell(face, face_axis, divergence_direction);
                    let cell_volume = center_volumes[cell];
                    if cell_volume > 0.0 {
                        for gradient_direction in 0..2 {
                            let adjacent_face =
                                cell_to_face(cell, face_axis, gradient_direction);
                            let coefficient = stress_coefficient(
                                divergence_direction,
                                gradient_direction,
                                cell_volume,
                            );
                            accumulate_term(
                                row,
                                adjacent_face,
                                face_axis,
                                coefficient,
                                labels,
                                indices,
                                solid_velocity,
                                &mut diagonal,
                                &mut row_rhs,
                                &mut batch.triplets,
                            );
                        }
                    }
                }

                // shear stress: velocity gradients around the four edges
                // bounding the face
                for edge_axis in 0..3 {
                    if edge_axis == face_axis {
                        continue;
                    }
                    for divergence_direction in 0..2 {
                        let edge =
                            face_to_edge(face, face_axis, edge_axis, divergence_direction);
                        let edge_volume = edge_volumes[(edge, edge_axis)];
                        if edge_volume > 0.0 {
                            for gradient_axis in 0..3 {
                                if gradient_axis == edge_axis {
                                    continue;
                                }
                                let gradient_face_axis = third_axis(gradient_axis, edge_axis);
                                for gradient_direction in 0..2 {
                                    let gradient_face = edge_to_face(
                                        edge,
                                        edge_axis,
                                        gradient_face_axis,
                                        gradient_direction,
                                    );
                                    let coefficient = stress_coefficient(
                                        divergence_direction,
                                        gradient_direction,
                                        edge_volume,
                                    );
                                    accumulate_term(
                                        row,
                                        gradient_face,
                                        gradient_face_axis,
                                        coefficient,
                                        labels,
                                        indices,
                                        solid_velocity,
                                        &mut diagonal,
                                        &mut row_rhs,
                                        &mut batch.triplets,
                                    );
                                }
                            }
                        }
                    }
                }

                batch.triplets.push((row, row, diagonal));
                batch.rows.push((row, row_rhs, face_velocity));
                batch
            })
            .collect();

        for batch in batches {
            for (row, col, value) in batch.triplets {
                matrix.push(row, col, value);
            }
            for (dof, row_rhs, row_guess) in batch.rows {
                rhs[dof] = row_rhs;
                guess[dof] = row_guess;
            }
        }
    }

    // duplicate triplets sum on conversion
    (CsrMatrix::from(&matrix), rhs, guess)
}

/// Write the solved velocities back onto the liquid faces;
/// solid, air and boundary faces keep their incoming values.
fn scatter_solution(
    velocity: &mut VectorGrid<f64>,
    indices: &VectorGrid<i32>,
    solution: &DVector<f64>,
) {
    for axis in 0..3 {
        let index_slice = indices.grid(axis).as_slice();
        velocity
            .grid_mut(axis)
            .as_mut_slice()
            .par_iter_mut()
            .enumerate()
            .for_each(|(flat, velocity)| {
                let dof = index_slice[flat];
                if dof >= 0 {
                    *velocity = solution[dof as usize];
                }
            });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{GridTransform, Vec3};
    use crate::volumes::{compute_supersample_volumes, compute_supersampled_face_volumes};
    use approx::assert_abs_diff_eq;
    use std::collections::HashMap;

    fn unit_xform() -> GridTransform {
        GridTransform::new(Vec3::zeros(), 1.0)
    }

    fn no_solid(cells: Vec3i) -> LevelSet {
        LevelSet::new(unit_xform(), cells, 1.0)
    }

    fn uniform_viscosity(cells: Vec3i, value: f64) -> ScalarGrid<f64> {
        ScalarGrid::new(unit_xform(), cells, value, SampleType::Center)
    }

    /// A liquid box inset one cell from the domain boundary,
    /// so that no fluid volume touches the boundary rind.
    fn inset_liquid_box(cells: Vec3i) -> LevelSet {
        let half_extent = Vec3::new(
            cells.x as f64 / 2.0 - 1.0,
            cells.y as f64 / 2.0 - 1.0,
            cells.z as f64 / 2.0 - 1.0,
        );
        let center = Vec3::new(cells.x as f64 / 2.0, cells.y as f64 / 2.0, cells.z as f64 / 2.0);
        LevelSet::from_fn(unit_xform(), cells, move |p| {
            let d = p - center;
            (0..3)
                .map(|axis| d[axis].abs() - half_extent[axis])
                .fold(f64::MIN, f64::max)
        })
    }

    fn classified_scene(
        surface: &LevelSet,
        solid: &LevelSet,
    ) -> (VectorGrid<FaceMaterial>, VectorGrid<i32>, usize) {
        let mut center_volumes =
            ScalarGrid::new(surface.xform(), surface.size(), 0.0, SampleType::Center);
        compute_supersample_volumes(&mut center_volumes, surface, VOLUME_SAMPLES);
        let mut edge_volumes =
            VectorGrid::new(surface.xform(), surface.size(), 0.0, VectorSampleType::Edge);
        for axis in 0..3 {
            compute_supersample_volumes(edge_volumes.grid_mut(axis), surface, VOLUME_SAMPLES);
        }
        let labels = classify_faces(&center_volumes, &edge_volumes, solid);
        let (indices, dof_count) = assign_liquid_indices(&labels);
        (labels, indices, dof_count)
    }

    #[test]
    fn boundary_faces_stay_out_of_the_active_set() {
        let cells = Vec3i::new(4, 4, 4);
        let surface = LevelSet::new(unit_xform(), cells, -1.0);
        let (labels, indices, _) = classified_scene(&surface, &no_solid(cells));

        for axis in 0..3 {
            let size = labels.grid(axis).size();
            for flat in 0..labels.grid(axis).voxel_count() {
                let face = labels.grid(axis).unflatten(flat);
                if face[axis] == 0 || face[axis] == size[axis] - 1 {
                    assert_eq!(labels[(face, axis)], FaceMaterial::Air);
                    assert_eq!(indices[(face, axis)], UNINDEXED);
                }
            }
        }
    }

    #[test]
    fn liquid_indices_are_dense_and_deterministic() {
        let cells = Vec3i::new(5, 4, 6);
        let surface = LevelSet::from_fn(unit_xform(), cells, |p| p.y - 2.3);
        let solid = LevelSet::from_fn(unit_xform(), cells, |p| 0.8 - p.x);
        let (labels, indices, dof_count) = classified_scene(&surface, &solid);

        // indices are handed out in axis-then-raster order with no gaps
        let mut expected = 0;
        for axis in 0..3 {
            for (&label, &index) in izip!(
                labels.grid(axis).as_slice(),
                indices.grid(axis).as_slice()
            ) {
                if label == FaceMaterial::Liquid {
                    assert_eq!(index, expected);
                    expected += 1;
                } else {
                    assert_eq!(index, UNINDEXED);
                }
            }
        }
        assert_eq!(expected as usize, dof_count);
        assert!(dof_count > 0);

        // a second pass over identical input reproduces the numbering
        let (_, indices_again, dof_again) = classified_scene(&surface, &solid);
        assert_eq!(dof_again, dof_count);
        for axis in 0..3 {
            assert_eq!(
                indices.grid(axis).as_slice(),
                indices_again.grid(axis).as_slice()
            );
        }
    }

    #[test]
    fn an_edge_sliver_pulls_faces_into_the_solve() {
        let cells = Vec3i::new(5, 5, 5);
        // no cell volume anywhere, one z-edge carrying a sliver of fluid
        let center_volumes = ScalarGrid::new(unit_xform(), cells, 0.0, SampleType::Center);
        let mut edge_volumes =
            VectorGrid::new(unit_xform(), cells, 0.0, VectorSampleType::Edge);
        let edge = Vec3i::new(2, 2, 2);
        edge_volumes[(edge, 2)] = 0.5;

        let labels = classify_faces(&center_volumes, &edge_volumes, &no_solid(cells));

        // exactly the four faces incident to that edge join the solve
        let expected_liquid = [
            (Vec3i::new(2, 1, 2), 0),
            (Vec3i::new(2, 2, 2), 0),
            (Vec3i::new(1, 2, 2), 1),
            (Vec3i::new(2, 2, 2), 1),
        ];
        for (face, axis) in expected_liquid {
            assert_eq!(labels[(face, axis)], FaceMaterial::Liquid, "face {face:?} axis {axis}");
        }

        let liquid_count: usize = (0..3)
            .map(|axis| {
                labels
                    .grid(axis)
                    .as_slice()
                    .iter()
                    .filter(|&&l| l == FaceMaterial::Liquid)
                    .count()
            })
            .sum();
        assert_eq!(liquid_count, 4);
    }

    #[test]
    fn assembled_matrix_is_symmetric() {
        let cells = Vec3i::new(6, 6, 6);
        let surface = LevelSet::from_fn(unit_xform(), cells, |p| p.y - 3.4);
        let solid = LevelSet::from_fn(unit_xform(), cells, |p| 1.2 - p.x);
        let (labels, indices, dof_count) = classified_scene(&surface, &solid);

        let mut center_volumes =
            ScalarGrid::new(unit_xform(), cells, 0.0, SampleType::Center);
        compute_supersample_volumes(&mut center_volumes, &surface, VOLUME_SAMPLES);
        let mut edge_volumes =
            VectorGrid::new(unit_xform(), cells, 0.0, VectorSampleType::Edge);
        for axis in 0..3 {
            compute_supersample_volumes(edge_volumes.grid_mut(axis), &surface, VOLUME_SAMPLES);
        }
        let face_volumes = compute_supersampled_face_volumes(&surface, VOLUME_SAMPLES);

        // spatially varying viscosity exercises the edge interpolation
        let viscosity =
            ScalarGrid::from_fn(unit_xform(), cells, SampleType::Center, |p| {
                0.5 + 0.1 * p.x + 0.05 * p.z
            });
        prescale_volumes(&mut center_volumes, &mut edge_volumes, 0.1, &viscosity);

        let velocity = VectorGrid::new(unit_xform(), cells, 1.0, VectorSampleType::Staggered);
        let solid_velocity =
            VectorGrid::new(unit_xform(), cells, 0.0, VectorSampleType::Staggered);

        let (matrix, _, _) = assemble_system(
            &labels,
            &indices,
            dof_count,
            &center_volumes,
            &edge_volumes,
            &face_volumes,
            &velocity,
            &solid_velocity,
        );

        let mut entries = HashMap::new();
        for (row, col, &value) in matrix.triplet_iter() {
            entries.insert((row, col), value);
        }
        assert!(!entries.is_empty());
        for (&(row, col), &value) in &entries {
            let mirrored = entries.get(&(col, row)).copied().unwrap_or(0.0);
            assert_abs_diff_eq!(value, mirrored, epsilon = 1e-10);
        }
    }

    #[test]
    fn an_isolated_face_converges_to_the_wall_velocity() {
        let cells = Vec3i::new(3, 3, 3);
        let face = Vec3i::new(1, 1, 1);
        let wall_velocity = 3.0;

        // every face is a wall moving at a common speed,
        // except one liquid unknown in the middle
        let mut labels = VectorGrid::new(
            unit_xform(),
            cells,
            FaceMaterial::Solid,
            VectorSampleType::Staggered,
        );
        labels[(face, 0)] = FaceMaterial::Liquid;
        let (indices, dof_count) = assign_liquid_indices(&labels);
        assert_eq!(dof_count, 1);

        // control volumes already prescaled; large values model a strongly
        // viscous fluid where the wall dominates the face's inertia
        let center_volumes =
            ScalarGrid::new(unit_xform(), cells, 100.0, SampleType::Center);
        let edge_volumes =
            VectorGrid::new(unit_xform(), cells, 100.0, VectorSampleType::Edge);
        let face_volumes =
            VectorGrid::new(unit_xform(), cells, 1.0, VectorSampleType::Staggered);

        let velocity = VectorGrid::new(unit_xform(), cells, 0.0, VectorSampleType::Staggered);
        let solid_velocity = VectorGrid::new(
            unit_xform(),
            cells,
            wall_velocity,
            VectorSampleType::Staggered,
        );

        let (matrix, rhs, guess) = assemble_system(
            &labels,
            &indices,
            dof_count,
            &center_volumes,
            &edge_volumes,
            &face_volumes,
            &velocity,
            &solid_velocity,
        );

        let solution = pcg::solve(
            &matrix,
            &rhs,
            &guess,
            PcgConfig {
                max_iterations: 100,
                tolerance: 1e-9,
            },
        )
        .unwrap();
        assert_abs_diff_eq!(solution.x[0], wall_velocity, epsilon = 0.05);
    }

    #[test]
    fn uniform_velocity_in_free_floating_liquid_is_stationary() {
        let cells = Vec3i::new(6, 6, 6);
        let surface = inset_liquid_box(cells);
        let solid = no_solid(cells);
        let solid_velocity =
            VectorGrid::new(unit_xform(), cells, 0.0, VectorSampleType::Staggered);
        let viscosity = uniform_viscosity(cells, 1.0);

        let mut velocity =
            VectorGrid::new(unit_xform(), cells, 2.0, VectorSampleType::Staggered);
        let before = velocity.clone();

        let stats =
            solve_viscosity(0.1, &surface, &mut velocity, &solid, &solid_velocity, &viscosity)
                .unwrap();
        assert!(stats.dof_count > 0);

        // a spatially uniform field has zero viscous stress divergence
        for axis in 0..3 {
            for (&after, &original) in izip!(
                velocity.grid(axis).as_slice(),
                before.grid(axis).as_slice()
            ) {
                assert_abs_diff_eq!(after, original, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn zero_viscosity_passes_velocities_through() {
        let cells = Vec3i::new(4, 4, 4);
        let surface = LevelSet::new(unit_xform(), cells, -1.0);
        let solid = no_solid(cells);
        let solid_velocity =
            VectorGrid::new(unit_xform(), cells, 0.0, VectorSampleType::Staggered);
        let viscosity = uniform_viscosity(cells, 0.0);

        let mut velocity =
            VectorGrid::new(unit_xform(), cells, 0.0, VectorSampleType::Staggered);
        for axis in 0..3 {
            for (flat, v) in velocity.grid_mut(axis).as_mut_slice().iter_mut().enumerate() {
                *v = (flat % 7) as f64 - 3.0;
            }
        }
        let before = velocity.clone();

        let stats =
            solve_viscosity(0.1, &surface, &mut velocity, &solid, &solid_velocity, &viscosity)
                .unwrap();
        assert_eq!(stats.iterations, 0);

        for axis in 0..3 {
            assert_eq!(
                velocity.grid(axis).as_slice(),
                before.grid(axis).as_slice()
            );
        }
    }

    #[test]
    fn zero_timestep_is_the_identity() {
        let cells = Vec3i::new(4, 4, 4);
        let surface = inset_liquid_box(cells);
        let solid = no_solid(cells);
        let solid_velocity =
            VectorGrid::new(unit_xform(), cells, 0.0, VectorSampleType::Staggered);
        let viscosity = uniform_viscosity(cells, 5.0);

        let mut velocity =
            VectorGrid::new(unit_xform(), cells, 0.0, VectorSampleType::Staggered);
        for axis in 0..3 {
            for (flat, v) in velocity.grid_mut(axis).as_mut_slice().iter_mut().enumerate() {
                *v = (flat as f64 * 0.37).sin();
            }
        }
        let before = velocity.clone();

        for _ in 0..2 {
            solve_viscosity(0.0, &surface, &mut velocity, &solid, &solid_velocity, &viscosity)
                .unwrap();
        }

        for axis in 0..3 {
            assert_eq!(
                velocity.grid(axis).as_slice(),
                before.grid(axis).as_slice()
            );
        }
    }

    #[test]
    fn velocity_decays_toward_a_fixed_wall() {
        let cells = Vec3i::new(8, 4, 4);
        // liquid everywhere, solid wall occupying x < 1.1
        let surface = LevelSet::new(unit_xform(), cells, -1.0);
        let solid = LevelSet::from_fn(unit_xform(), cells, |p| p.x - 1.1);
        let solid_velocity =
            VectorGrid::new(unit_xform(), cells, 0.0, VectorSampleType::Staggered);
        let viscosity = uniform_viscosity(cells, 1.0);

        // tangential flow past the wall
        let mut velocity =
            VectorGrid::new(unit_xform(), cells, 0.0, VectorSampleType::Staggered);
        velocity.grid_mut(1).as_mut_slice().fill(1.0);

        solve_viscosity(1.0, &surface, &mut velocity, &solid, &solid_velocity, &viscosity)
            .unwrap();

        // drag decays monotonically with distance from the wall
        let probe = |i: i32| velocity[(Vec3i::new(i, 2, 2), 1)];
        let mut previous = probe(1);
        assert!(previous < 0.95, "wall-adjacent velocity {previous} should feel drag");
        for i in 2..7 {
            let current = probe(i);
            assert!(
                current >= previous - 1e-9,
                "velocity did not recover monotonically: v({i}) = {current} < {previous}"
            );
            previous = current;
        }
        assert!(previous <= 1.0 + 1e-9);
        assert!(previous > 0.9);
    }

    #[test]
    fn a_failed_solve_leaves_the_velocity_untouched() {
        let cells = Vec3i::new(6, 4, 4);
        let surface = LevelSet::new(unit_xform(), cells, -1.0);
        let solid = LevelSet::from_fn(unit_xform(), cells, |p| p.x - 1.1);
        let solid_velocity =
            VectorGrid::new(unit_xform(), cells, 0.0, VectorSampleType::Staggered);
        let viscosity = uniform_viscosity(cells, 1.0);

        let mut velocity =
            VectorGrid::new(unit_xform(), cells, 0.0, VectorSampleType::Staggered);
        velocity.grid_mut(1).as_mut_slice().fill(1.0);
        let before = velocity.clone();

        let result = solve_viscosity_with_config(
            1.0,
            &surface,
            &mut velocity,
            &solid,
            &solid_velocity,
            &viscosity,
            PcgConfig {
                max_iterations: 0,
                tolerance: 1e-12,
            },
        );
        assert!(matches!(result, Err(ViscosityError::NotConverged(_))));

        for axis in 0..3 {
            assert_eq!(
                velocity.grid(axis).as_slice(),
                before.grid(axis).as_slice()
            );
        }
    }

    #[test]
    #[should_panic(expected = "solid surface must share")]
    fn mismatched_surfaces_are_a_caller_bug() {
        let cells = Vec3i::new(4, 4, 4);
        let surface = LevelSet::new(unit_xform(), cells, -1.0);
        let solid = LevelSet::new(unit_xform(), Vec3i::new(4, 4, 5), 1.0);
        let solid_velocity =
            VectorGrid::new(unit_xform(), cells, 0.0, VectorSampleType::Staggered);
        let viscosity = uniform_viscosity(cells, 1.0);
        let mut velocity =
            VectorGrid::new(unit_xform(), cells, 0.0, VectorSampleType::Staggered);

        let _ = solve_viscosity(0.1, &surface, &mut velocity, &solid, &solid_velocity, &viscosity);
    }
}
