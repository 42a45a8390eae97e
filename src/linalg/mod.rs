//! Linear-algebra helpers (§4.A): UUT inverse, constraint range/null
//! projectors, and Hessian-correction strategies.

pub mod hessian;
pub mod projection;
pub mod uut;

pub use hessian::{correct_hessian, HessianCorrection};
pub use projection::{constraint_projections, ConstraintProjections};
pub use uut::uut_inverse;
