//! Sub-grid volume fraction estimation by supersampling a level set.
//!
//! Each sample of the target grid owns a unit cube of index space centered
//! on it. The fraction of that cube lying inside the surface is estimated
//! by testing the sign of the level set on a regular lattice of points.
//! The estimates become the discretization coefficients of the viscosity
//! system, so they only need to be accurate to the supersampling
//! resolution, not exact.

use rayon::prelude::*;

use crate::grid::{coord_from_flat, ScalarGrid, Vec3, VectorGrid, VectorSampleType};
use crate::levelset::LevelSet;

/// Fill a grid with the fraction of each sample's control volume
/// that lies inside the surface.
///
/// `samples` is the number of test points per axis; the total per sample
/// is its cube. The grid's own sample type decides where the control
/// volumes sit (cell centers, faces or edges).
pub fn compute_supersample_volumes(
    volumes: &mut ScalarGrid<f64>,
    surface: &LevelSet,
    samples: usize,
) {
    assert!(samples > 0, "supersampling needs at least one sample");

    let size = volumes.size();
    let offset = volumes.sample_type().offset();
    let xform = volumes.xform();

    let sample_dx = 1.0 / samples as f64;
    let point_count = (samples * samples * samples) as f64;

    volumes
        .as_mut_slice()
        .par_iter_mut()
        .enumerate()
        .for_each(|(flat, volume)| {
            let coord = coord_from_flat(size, flat);
            let center = coord.map(f64::from) + offset;

            let mut inside = 0;
            for i in 0..samples {
                for j in 0..samples {
                    for k in 0..samples {
                        let local = Vec3::new(
                            (i as f64 + 0.5) * sample_dx - 0.5,
                            (j as f64 + 0.5) * sample_dx - 0.5,
                            (k as f64 + 0.5) * sample_dx - 0.5,
                        );
                        if surface.interp(xform.index_to_world(center + local)) <= 0.0 {
                            inside += 1;
                        }
                    }
                }
            }

            *volume = inside as f64 / point_count;
        });
}

/// Estimate fluid volume fractions at every staggered face of the grid.
pub fn compute_supersampled_face_volumes(surface: &LevelSet, samples: usize) -> VectorGrid<f64> {
    let mut face_volumes = VectorGrid::new(
        surface.xform(),
        surface.size(),
        0.0,
        VectorSampleType::Staggered,
    );
    for axis in 0..3 {
        compute_supersample_volumes(face_volumes.grid_mut(axis), surface, samples);
    }
    face_volumes
}
