// Copyright 2025 Neuraville Inc.
// SPDX-License-Identifier: Apache-2.0

/*!
Steady-state variance of a two-state Kalman filter.

For a constant-velocity state model with spectral density `q` and a mix of
absolute and relative measurements, the expected steady-state error follows
from the stable eigenvectors of a 4x4 Hamiltonian system matrix (D. Allen
and G. Welch, "A General Method for Comparing the Expected Performance of
Tracking and Motion Capture Systems", VRST 2005).

The eigenproblem is solved locally: characteristic polynomial via Newton's
identities, quartic roots via Ferrari's method in complex arithmetic, and
eigenvectors as null vectors of `A - lambda*I` by complex elimination.
*/

use num_complex::Complex64;

use crate::error::{GraphError, Result};

/// Whether a measurement observes the absolute state or its derivative.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementKind {
    Absolute,
    Relative,
}

/// One measurement stream: kind, sample interval `dt` and variance `r`.
#[derive(Debug, Clone, Copy)]
pub struct MeasurementModel {
    pub kind: MeasurementKind,
    pub dt: f64,
    pub r: f64,
}

type Mat4 = [[f64; 4]; 4];
type CVec4 = [Complex64; 4];

/// Computes the steady-state variance for the given motion model `q` and
/// measurement mix.
///
/// Fails with [`GraphError::SingularMatrix`] when the system matrix is
/// numerically singular.
pub fn steady_state_variance(q: f64, measurements: &[MeasurementModel]) -> Result<f64> {
    let mut psi_sum = [[0.0; 4]; 4];
    for m in measurements {
        let psi = system_matrix(q, m);
        for i in 0..4 {
            for j in 0..4 {
                psi_sum[i][j] += psi[i][j];
            }
        }
    }

    let eigenvalues = eigenvalues4(&psi_sum)?;

    // the steady state lives on the stable subspace: the two eigenvalues
    // with the smallest real part
    let mut ordered = eigenvalues;
    ordered.sort_by(|a, b| a.re.partial_cmp(&b.re).unwrap_or(std::cmp::Ordering::Equal));

    let v1 = eigenvector4(&psi_sum, ordered[0])?;
    let v2 = eigenvector4(&psi_sum, ordered[1])?;

    // P = B * C^-1 with B the upper and C the lower 2x2 block of the
    // stacked stable eigenvectors
    let b = [[v1[0], v2[0]], [v1[1], v2[1]]];
    let c = [[v1[2], v2[2]], [v1[3], v2[3]]];

    let det = c[0][0] * c[1][1] - c[0][1] * c[1][0];
    if det.norm() < 1e-12 {
        return Err(GraphError::SingularMatrix);
    }
    // (B * C^-1)[0][0] via the 2x2 adjugate
    let p00 = (b[0][0] * c[1][1] - b[0][1] * c[1][0]) / det;

    if !p00.re.is_finite() || !p00.im.is_finite() {
        return Err(GraphError::SingularMatrix);
    }
    Ok(p00.norm())
}

fn system_matrix(q: f64, m: &MeasurementModel) -> Mat4 {
    let (dt, r) = (m.dt, m.r);
    match m.kind {
        MeasurementKind::Absolute => [
            [
                1.0 - (q * dt * dt * dt) / (6.0 * r),
                dt,
                -(q * dt * dt * dt) / 6.0,
                (q * dt * dt) / 2.0,
            ],
            [-(q * dt * dt) / (2.0 * r), 1.0, -(q * dt * dt) / 2.0, q * dt],
            [1.0 / r, 0.0, 1.0, 0.0],
            [-dt / r, 0.0, -dt, 1.0],
        ],
        MeasurementKind::Relative => [
            [
                1.0,
                dt + (q * dt * dt) / (2.0 * r),
                -(q * dt * dt * dt) / 6.0,
                (q * dt * dt) / 2.0,
            ],
            [0.0, 1.0 + (q * dt) / r, -(q * dt * dt) / 2.0, q * dt],
            [0.0, 0.0, 1.0, 0.0],
            [0.0, 1.0 / r, -dt, 1.0],
        ],
    }
}

fn mat_mul(a: &Mat4, b: &Mat4) -> Mat4 {
    let mut out = [[0.0; 4]; 4];
    for i in 0..4 {
        for j in 0..4 {
            for (k, row) in b.iter().enumerate() {
                out[i][j] += a[i][k] * row[j];
            }
        }
    }
    out
}

fn trace(a: &Mat4) -> f64 {
    a[0][0] + a[1][1] + a[2][2] + a[3][3]
}

/// All four (complex) eigenvalues of a real 4x4 matrix.
fn eigenvalues4(a: &Mat4) -> Result<[Complex64; 4]> {
    // power-sum traces -> elementary symmetric polynomials (Newton)
    let a2 = mat_mul(a, a);
    let a3 = mat_mul(&a2, a);
    let a4 = mat_mul(&a3, a);
    let (t1, t2, t3, t4) = (trace(a), trace(&a2), trace(&a3), trace(&a4));

    let e1 = t1;
    let e2 = (e1 * t1 - t2) / 2.0;
    let e3 = (e2 * t1 - e1 * t2 + t3) / 3.0;
    let e4 = (e3 * t1 - e2 * t2 + e1 * t3 - t4) / 4.0;

    if !(e1.is_finite() && e2.is_finite() && e3.is_finite() && e4.is_finite()) {
        return Err(GraphError::SingularMatrix);
    }

    // characteristic polynomial x^4 - e1 x^3 + e2 x^2 - e3 x + e4
    solve_quartic(-e1, e2, -e3, e4)
}

/// Roots of x^4 + b x^3 + c x^2 + d x + e, Ferrari's method.
fn solve_quartic(b: f64, c: f64, d: f64, e: f64) -> Result<[Complex64; 4]> {
    // depressed quartic y^4 + p y^2 + q y + r with x = y - b/4
    let p = c - 3.0 * b * b / 8.0;
    let q = d - b * c / 2.0 + b * b * b / 8.0;
    let r = e - b * d / 4.0 + b * b * c / 16.0 - 3.0 * b.powi(4) / 256.0;
    let shift = Complex64::new(-b / 4.0, 0.0);

    let scale = 1.0_f64.max(p.abs()).max(q.abs()).max(r.abs());
    if q.abs() < 1e-14 * scale {
        // biquadratic: y^2 = (-p +- sqrt(p^2 - 4r)) / 2
        let disc = Complex64::new(p * p - 4.0 * r, 0.0).sqrt();
        let y2a = (Complex64::new(-p, 0.0) + disc) / 2.0;
        let y2b = (Complex64::new(-p, 0.0) - disc) / 2.0;
        let (ya, yb) = (y2a.sqrt(), y2b.sqrt());
        return Ok([ya + shift, -ya + shift, yb + shift, -yb + shift]);
    }

    // resolvent cubic 8m^3 + 8p m^2 + (2p^2 - 8r) m - q^2 = 0; use the root
    // of largest magnitude so that sqrt(2m) is well-conditioned
    let m = cubic_roots(
        p,
        p * p / 4.0 - r,
        -q * q / 8.0,
    )
    .into_iter()
    .max_by(|a, b| a.norm().partial_cmp(&b.norm()).unwrap_or(std::cmp::Ordering::Equal))
    .unwrap_or_default();

    if m.norm() < 1e-300 {
        return Err(GraphError::SingularMatrix);
    }

    let s = (m * 2.0).sqrt();
    let half_p = Complex64::new(p / 2.0, 0.0);
    let q_over = Complex64::new(q, 0.0) / (s * 2.0);

    // (y^2 + p/2 + m)^2 = 2m (y - q/(4m))^2 splits into two quadratics
    let mut roots = [Complex64::default(); 4];
    let pair1 = solve_quadratic(-s, half_p + m + q_over);
    let pair2 = solve_quadratic(s, half_p + m - q_over);
    roots[0] = pair1.0 + shift;
    roots[1] = pair1.1 + shift;
    roots[2] = pair2.0 + shift;
    roots[3] = pair2.1 + shift;
    Ok(roots)
}

/// Roots of y^2 + b y + c with complex coefficients.
fn solve_quadratic(b: Complex64, c: Complex64) -> (Complex64, Complex64) {
    let disc = (b * b - c * 4.0).sqrt();
    ((-b + disc) / 2.0, (-b - disc) / 2.0)
}

/// All three roots of m^3 + b m^2 + c m + d (real coefficients, complex
/// roots), Cardano's method.
fn cubic_roots(b: f64, c: f64, d: f64) -> [Complex64; 3] {
    // depressed cubic u^3 + pu + q with m = u - b/3
    let p = c - b * b / 3.0;
    let q = 2.0 * b * b * b / 27.0 - b * c / 3.0 + d;
    let shift = Complex64::new(-b / 3.0, 0.0);

    let disc = (Complex64::new(q * q / 4.0 + p * p * p / 27.0, 0.0)).sqrt();
    let mut alpha = (Complex64::new(-q / 2.0, 0.0) + disc).cbrt();
    if alpha.norm() < 1e-300 {
        alpha = (Complex64::new(-q / 2.0, 0.0) - disc).cbrt();
    }

    if alpha.norm() < 1e-300 {
        // p == q == 0: triple root at the shift
        return [shift; 3];
    }

    let omega = Complex64::new(-0.5, 0.75_f64.sqrt());
    let p_c = Complex64::new(p, 0.0);
    let mut roots = [Complex64::default(); 3];
    let mut a_k = alpha;
    for root in &mut roots {
        *root = a_k - p_c / (a_k * 3.0) + shift;
        a_k *= omega;
    }
    roots
}

/// A null vector of `A - lambda*I`, i.e. an eigenvector for `lambda`.
fn eigenvector4(a: &Mat4, lambda: Complex64) -> Result<CVec4> {
    let mut m = [[Complex64::default(); 4]; 4];
    for i in 0..4 {
        for j in 0..4 {
            m[i][j] = Complex64::new(a[i][j], 0.0);
        }
        m[i][i] -= lambda;
    }

    // forward elimination with partial pivoting; track pivot columns
    let mut pivot_cols = [usize::MAX; 4];
    let mut row = 0;
    for col in 0..4 {
        let (best_row, best_norm) = (row..4)
            .map(|r| (r, m[r][col].norm()))
            .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .unwrap_or((row, 0.0));
        if best_norm < 1e-9 {
            continue; // free column
        }
        m.swap(row, best_row);
        for r in (row + 1)..4 {
            let factor = m[r][col] / m[row][col];
            for cc in col..4 {
                let sub = factor * m[row][cc];
                m[r][cc] -= sub;
            }
        }
        pivot_cols[row] = col;
        row += 1;
        if row == 4 {
            break;
        }
    }

    // lambda is an eigenvalue, so at least one column must be free
    let free_col = (0..4)
        .rev()
        .find(|col| !pivot_cols.contains(col))
        .ok_or(GraphError::SingularMatrix)?;

    let mut v = [Complex64::default(); 4];
    v[free_col] = Complex64::new(1.0, 0.0);

    // back substitution over the pivot rows
    for r in (0..row).rev() {
        let col = pivot_cols[r];
        let mut sum = Complex64::default();
        for cc in (col + 1)..4 {
            sum += m[r][cc] * v[cc];
        }
        v[col] = -sum / m[r][col];
    }
    Ok(v)
}
