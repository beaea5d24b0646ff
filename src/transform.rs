//! Affine transforms in homogeneous coordinates
//!
//! Every builder returns a 4 x 4 matrix; compose them with `dot` and apply
//! the result with [`apply_transform`].

use crate::error::{Error, Result};
use ndarray::{s, Array2, ArrayView2, Axis};

pub fn translation(v: [f64; 3]) -> Array2<f64> {
    let mut m = Array2::eye(4);
    for (i, &value) in v.iter().enumerate() {
        m[[i, 3]] = value;
    }
    m
}

pub fn scale(factors: [f64; 3]) -> Array2<f64> {
    let mut m = Array2::eye(4);
    for (i, &value) in factors.iter().enumerate() {
        m[[i, i]] = value;
    }
    m
}

/// Shear factors, named `<row><column>`: `xy` adds `xy * y` to `x`
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Shear {
    pub xy: f64,
    pub xz: f64,
    pub yx: f64,
    pub yz: f64,
    pub zx: f64,
    pub zy: f64,
}

pub fn shear(h: Shear) -> Array2<f64> {
    let mut m = Array2::eye(4);
    m[[0, 1]] = h.xy;
    m[[0, 2]] = h.xz;
    m[[1, 0]] = h.yx;
    m[[1, 2]] = h.yz;
    m[[2, 0]] = h.zx;
    m[[2, 1]] = h.zy;
    m
}

/// Rotation about the x axis, `theta` in radians
pub fn rotation_x(theta: f64) -> Array2<f64> {
    let (sin, cos) = theta.sin_cos();
    let mut m = Array2::eye(4);
    m[[1, 1]] = cos;
    m[[1, 2]] = -sin;
    m[[2, 1]] = sin;
    m[[2, 2]] = cos;
    m
}

pub fn rotation_y(theta: f64) -> Array2<f64> {
    let (sin, cos) = theta.sin_cos();
    let mut m = Array2::eye(4);
    m[[0, 0]] = cos;
    m[[0, 2]] = sin;
    m[[2, 0]] = -sin;
    m[[2, 2]] = cos;
    m
}

pub fn rotation_z(theta: f64) -> Array2<f64> {
    let (sin, cos) = theta.sin_cos();
    let mut m = Array2::eye(4);
    m[[0, 0]] = cos;
    m[[0, 1]] = -sin;
    m[[1, 0]] = sin;
    m[[1, 1]] = cos;
    m
}

/// Append a row of ones to a point set. Accepts points as columns (3 x N)
/// or as rows (N x 3); a 3 x 3 input is read as columns. Returns 4 x N.
pub fn homogeneous(points: ArrayView2<'_, f64>) -> Result<Array2<f64>> {
    let columns = match [points.nrows(), points.ncols()] {
        [3, _] => points,
        [_, 3] => points.reversed_axes(),
        shape => {
            return Err(Error::InvalidShape(format!(
                "expected 3 x N or N x 3 points, got {:?}",
                shape
            )))
        }
    };
    let mut out = Array2::ones((4, columns.ncols()));
    out.slice_mut(s![..3, ..]).assign(&columns);
    Ok(out)
}

/// Apply a 4 x 4 transform to a point set, returning N x 3 points
pub fn apply_transform(points: ArrayView2<'_, f64>, m: &Array2<f64>) -> Result<Array2<f64>> {
    if m.shape() != [4, 4] {
        return Err(Error::InvalidShape(format!(
            "transform must be 4 x 4, got {:?}",
            m.shape()
        )));
    }
    let moved = m.dot(&homogeneous(points)?);
    Ok(moved.slice(s![..3, ..]).t().to_owned())
}

/// Row-stack points given as `[x, y, z]` triples into an N x 3 array
pub fn points<I: IntoIterator<Item = [f64; 3]>>(coords: I) -> Array2<f64> {
    let rows: Vec<[f64; 3]> = coords.into_iter().collect();
    let mut out = Array2::zeros((rows.len(), 3));
    for (mut row, point) in out.axis_iter_mut(Axis(0)).zip(rows) {
        row.assign(&ndarray::aview1(&point));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;
    use std::f64::consts::FRAC_PI_2;

    fn close(a: &Array2<f64>, b: &Array2<f64>) -> bool {
        a.shape() == b.shape() && a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() < 1e-9)
    }

    #[test]
    fn test_translation_and_scale() {
        let p = points([[1.0, 2.0, 3.0], [0.0, 0.0, 0.0]]);
        let moved = apply_transform(p.view(), &translation([1.0, -1.0, 0.5])).unwrap();
        assert!(close(&moved, &arr2(&[[2.0, 1.0, 3.5], [1.0, -1.0, 0.5]])));

        let scaled = apply_transform(p.view(), &scale([2.0, 3.0, 4.0])).unwrap();
        assert!(close(&scaled, &arr2(&[[2.0, 6.0, 12.0], [0.0, 0.0, 0.0]])));
    }

    #[test]
    fn test_shear_uses_off_diagonal_factors() {
        let m = shear(Shear {
            xy: 1.0,
            zx: 2.0,
            ..Shear::default()
        });
        let p = points([[1.0, 1.0, 1.0]]);
        let moved = apply_transform(p.view(), &m).unwrap();
        assert!(close(&moved, &arr2(&[[2.0, 1.0, 3.0]])));
        assert_eq!(m[[0, 0]], 1.0);
        assert_eq!(m[[3, 3]], 1.0);
    }

    #[test]
    fn test_rotations() {
        let p = points([[1.0, 0.0, 0.0]]);
        let z = apply_transform(p.view(), &rotation_z(FRAC_PI_2)).unwrap();
        assert!(close(&z, &arr2(&[[0.0, 1.0, 0.0]])));

        let y = apply_transform(p.view(), &rotation_y(FRAC_PI_2)).unwrap();
        assert!(close(&y, &arr2(&[[0.0, 0.0, -1.0]])));

        let q = points([[0.0, 1.0, 0.0]]);
        let x = apply_transform(q.view(), &rotation_x(FRAC_PI_2)).unwrap();
        assert!(close(&x, &arr2(&[[0.0, 0.0, 1.0]])));
    }

    #[test]
    fn test_homogeneous_accepts_both_layouts() {
        let rows = arr2(&[[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]]);
        let columns = rows.t().to_owned();
        let from_rows = homogeneous(rows.view()).unwrap();
        let from_columns = homogeneous(columns.view()).unwrap();
        assert_eq!(from_rows, from_columns);
        assert_eq!(from_rows.shape(), &[4, 2]);
        assert_eq!(from_rows.row(3).to_vec(), vec![1.0, 1.0]);

        let bad = Array2::<f64>::zeros((2, 2));
        assert!(matches!(homogeneous(bad.view()), Err(Error::InvalidShape(_))));
        assert!(matches!(
            apply_transform(rows.view(), &Array2::eye(3)),
            Err(Error::InvalidShape(_))
        ));
    }

    #[test]
    fn test_composition() {
        let m = translation([0.0, 0.0, 1.0]).dot(&scale([2.0, 2.0, 2.0]));
        let moved = apply_transform(points([[1.0, 1.0, 1.0]]).view(), &m).unwrap();
        assert!(close(&moved, &arr2(&[[2.0, 2.0, 3.0]])));
    }
}
