//! An implicit viscosity solver for staggered-grid liquid simulations.
//!
//! Given a velocity field on a staggered (MAC) grid, signed-distance
//! surfaces for the liquid and for solid obstacles, and a spatially varying
//! viscosity coefficient, [`solve_viscosity`] integrates the viscous stress
//! divergence over one timestep by assembling and solving a sparse
//! symmetric positive-(semi)definite system over the liquid faces.
//! The discretization follows the variational finite-difference approach:
//! sub-grid volume fractions at cell centers, edges and faces weight the
//! stencil coefficients, so the surface and obstacles are resolved below
//! grid resolution.
//!
//! The crate deliberately stops at the viscous substep: advection,
//! pressure projection and time-step management belong to the caller.
//!
//! ```
//! use viscid::{
//!     solve_viscosity, GridTransform, LevelSet, ScalarGrid, SampleType,
//!     Vec3, Vec3i, VectorGrid, VectorSampleType,
//! };
//!
//! let cells = Vec3i::new(8, 8, 8);
//! let xform = GridTransform::new(Vec3::zeros(), 0.5);
//!
//! // a ball of liquid in the middle of the domain, no obstacles
//! let surface = LevelSet::from_fn(xform, cells, |p| (p - Vec3::new(2.0, 2.0, 2.0)).norm() - 1.2);
//! let solid_surface = LevelSet::new(xform, cells, 1.0);
//!
//! let mut velocity = VectorGrid::new(xform, cells, 0.0, VectorSampleType::Staggered);
//! let solid_velocity = VectorGrid::new(xform, cells, 0.0, VectorSampleType::Staggered);
//! let viscosity = ScalarGrid::new(xform, cells, 5.0, SampleType::Center);
//!
//! let stats = solve_viscosity(
//!     0.01, &surface, &mut velocity, &solid_surface, &solid_velocity, &viscosity,
//! )?;
//! assert!(stats.dof_count > 0);
//! # Ok::<(), viscid::ViscosityError>(())
//! ```

#![warn(missing_docs)]

pub mod grid;
#[doc(inline)]
pub use grid::{
    GridTransform, SampleType, ScalarGrid, Vec3, Vec3i, VectorGrid, VectorSampleType,
};

pub mod levelset;
#[doc(inline)]
pub use levelset::LevelSet;

pub mod volumes;
#[doc(inline)]
pub use volumes::{compute_supersample_volumes, compute_supersampled_face_volumes};

pub mod pcg;
#[doc(inline)]
pub use pcg::{PcgConfig, PcgError, PcgSolution};

pub mod viscosity;
#[doc(inline)]
pub use viscosity::{
    solve_viscosity, solve_viscosity_with_config, FaceMaterial, SolveStats, ViscosityError,
};

// nalgebra re-export for callers constructing vectors and inspecting solves
pub use nalgebra as na;
