//! Dense matrix inversion for the thin plate spline system.
//!
//! Matrices are flat row-major `n * n` buffers. The default backend is a
//! Gauss-Jordan elimination with partial pivoting; building with the
//! `nalgebra` feature delegates to [`nalgebra::DMatrix::try_inverse`] instead.
//! Both backends are stateless and safe to call from several threads on
//! independent buffers.

use crate::error::{Result, TpsError};

/// Inverts the `n x n` row-major matrix `input` with the configured backend.
pub fn invert(n: usize, input: &[f64]) -> Result<Vec<f64>> {
    #[cfg(feature = "nalgebra")]
    {
        nalgebra_invert(n, input)
    }
    #[cfg(not(feature = "nalgebra"))]
    {
        gauss_jordan_invert(n, input)
    }
}

fn check_len(n: usize, input: &[f64]) -> Result<()> {
    let expected = n
        .checked_mul(n)
        .ok_or(TpsError::TooManyPoints { points: n })?;
    if input.len() != expected {
        return Err(TpsError::DimensionMismatch {
            expected,
            actual: input.len(),
        });
    }
    Ok(())
}

/// Gauss-Jordan elimination on an `n x 2n` working buffer `[input | identity]`.
///
/// At each step the row with the largest magnitude in the pivot column is
/// swapped into place. Fails with [`TpsError::SingularMatrix`] when a pivot is
/// exactly zero.
pub fn gauss_jordan_invert(n: usize, input: &[f64]) -> Result<Vec<f64>> {
    check_len(n, input)?;

    let width = 2 * n;
    let mut temp = Vec::new();
    temp.try_reserve_exact(width * n)?;

    for row in input.chunks_exact(n.max(1)).take(n) {
        let identity_col = temp.len() / width;
        temp.extend_from_slice(row);
        temp.extend((0..n).map(|col| if col == identity_col { 1.0 } else { 0.0 }));
    }

    for k in 0..n {
        let mut max = temp[k * width + k].abs();
        let mut max_row = k;
        for row in k + 1..n {
            let t = temp[row * width + k].abs();
            if t > max {
                max = t;
                max_row = row;
            }
        }

        if max_row != k {
            for col in k..width {
                temp.swap(k * width + col, max_row * width + col);
            }
        }

        let pivot = temp[k * width + k];
        if pivot == 0.0 {
            tracing::debug!("zero pivot at column {} of {}x{} matrix", k, n, n);
            return Err(TpsError::SingularMatrix { size: n });
        }

        for col in k..width {
            temp[k * width + col] /= pivot;
        }

        for row in 0..n {
            if row == k {
                continue;
            }
            let f = temp[row * width + k];
            if f == 0.0 {
                continue;
            }
            for col in k..width {
                temp[row * width + col] -= f * temp[k * width + col];
            }
        }
    }

    let mut output = Vec::new();
    output.try_reserve_exact(n * n)?;
    for row in 0..n {
        output.extend_from_slice(&temp[row * width + n..(row + 1) * width]);
    }
    Ok(output)
}

#[cfg(feature = "nalgebra")]
pub fn nalgebra_invert(n: usize, input: &[f64]) -> Result<Vec<f64>> {
    use nalgebra::DMatrix;

    check_len(n, input)?;

    let matrix = DMatrix::from_row_slice(n, n, input);
    let inverse = matrix
        .try_inverse()
        .filter(|inverse| inverse.iter().all(|v| v.is_finite()))
        .ok_or(TpsError::SingularMatrix { size: n })?;

    // DMatrix stores columns contiguously; the transpose's storage is row-major.
    Ok(inverse.transpose().as_slice().to_vec())
}
