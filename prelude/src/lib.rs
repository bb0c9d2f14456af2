pub extern crate flame;
pub extern crate nalgebra;

#[allow(non_camel_case_types)]
pub type float = f64;
pub use std::f64::consts::PI;

pub const INFINITY: float = f64::INFINITY;
pub const NEG_INFINITY: float = f64::NEG_INFINITY;

pub type Matrix<R, C> = nalgebra::OMatrix<float, R, C>;
pub type Vector<N> = nalgebra::OVector<float, N>;
pub type BoolMatrix<R, C> = nalgebra::OMatrix<bool, R, C>;

pub use nalgebra::{DMatrix, DVector, Dyn as Dy};

pub fn all_finite<'a, I>(values: I) -> bool
where
    I: IntoIterator<Item = &'a float>,
{
    values.into_iter().all(|v| v.is_finite())
}

/// Element-wise `NaN` check that lets infinities through, used for bounds.
pub fn any_nan<'a, I>(values: I) -> bool
where
    I: IntoIterator<Item = &'a float>,
{
    values.into_iter().any(|v| v.is_nan())
}
