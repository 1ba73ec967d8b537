//! Small dense linear algebra helpers
//!
//! Design matrices in this pipeline have a handful of columns, so every
//! system here is solved directly on flat row-major `Vec<f64>` buffers.

use ndarray::Array2;

/// Cross product `X' W X` as a flat `p x p` row-major buffer
pub fn weighted_cross_product(design: &Array2<f64>, weights: &[f64]) -> Vec<f64> {
    let p = design.ncols();
    let mut out = vec![0.0; p * p];
    for (i, &w) in weights.iter().enumerate().take(design.nrows()) {
        for j in 0..p {
            let xij = design[[i, j]];
            if xij == 0.0 {
                continue;
            }
            for k in 0..p {
                out[j * p + k] += w * xij * design[[i, k]];
            }
        }
    }
    out
}

/// `X' W z` for a weighted working response
pub fn weighted_cross_response(design: &Array2<f64>, weights: &[f64], z: &[f64]) -> Vec<f64> {
    let p = design.ncols();
    let mut out = vec![0.0; p];
    for i in 0..design.nrows() {
        for j in 0..p {
            out[j] += weights[i] * design[[i, j]] * z[i];
        }
    }
    out
}

/// Solve `A x = b` for symmetric positive (semi-)definite `A` via Cholesky.
///
/// Non-positive pivots are replaced by a tiny epsilon so nearly singular
/// systems still return finite values.
pub fn cholesky_solve(a: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let l = cholesky_factor(a, n);

    let mut y = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i * n + j] * y[j];
        }
        y[i] = sum / l[i * n + i];
    }

    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = y[i];
        for j in (i + 1)..n {
            sum -= l[j * n + i] * x[j];
        }
        x[i] = sum / l[i * n + i];
    }
    x
}

fn cholesky_factor(a: &[f64], n: usize) -> Vec<f64> {
    let mut l = vec![0.0; n * n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[i * n + j];
            for k in 0..j {
                sum -= l[i * n + k] * l[j * n + k];
            }
            if i == j {
                l[i * n + j] = sum.max(1e-12).sqrt();
            } else {
                l[i * n + j] = sum / l[j * n + j];
            }
        }
    }
    l
}

/// Inverse of a symmetric positive definite matrix (flat row-major)
pub fn invert_symmetric(a: &[f64], n: usize) -> Vec<f64> {
    let mut inv = vec![0.0; n * n];
    let mut e = vec![0.0; n];
    for col in 0..n {
        e.iter_mut().for_each(|v| *v = 0.0);
        e[col] = 1.0;
        let x = cholesky_solve(a, &e, n);
        for row in 0..n {
            inv[row * n + col] = x[row];
        }
    }
    inv
}

/// Solve a general square system with partial pivoting; `None` when singular
pub fn solve(a: &[f64], b: &[f64], n: usize) -> Option<Vec<f64>> {
    if a.len() != n * n || b.len() != n {
        return None;
    }
    let mut m = a.to_vec();
    let mut rhs = b.to_vec();

    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&r1, &r2| m[r1 * n + col].abs().total_cmp(&m[r2 * n + col].abs()))?;
        if m[pivot * n + col].abs() < 1e-14 {
            return None;
        }
        if pivot != col {
            for k in 0..n {
                m.swap(col * n + k, pivot * n + k);
            }
            rhs.swap(col, pivot);
        }
        for row in (col + 1)..n {
            let factor = m[row * n + col] / m[col * n + col];
            for k in col..n {
                m[row * n + k] -= factor * m[col * n + k];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = rhs[i];
        for j in (i + 1)..n {
            sum -= m[i * n + j] * x[j];
        }
        x[i] = sum / m[i * n + i];
    }
    Some(x)
}

/// Determinant via LU decomposition with partial pivoting
pub fn determinant(a: &[f64], n: usize) -> f64 {
    match n {
        0 => return 0.0,
        1 => return a[0],
        2 => return a[0] * a[3] - a[1] * a[2],
        _ => {}
    }
    let mut lu = a.to_vec();
    let mut det = 1.0;
    for col in 0..n {
        let mut pivot = col;
        for row in (col + 1)..n {
            if lu[row * n + col].abs() > lu[pivot * n + col].abs() {
                pivot = row;
            }
        }
        if lu[pivot * n + col].abs() < 1e-14 {
            return 0.0;
        }
        if pivot != col {
            for k in 0..n {
                lu.swap(col * n + k, pivot * n + k);
            }
            det = -det;
        }
        for row in (col + 1)..n {
            let factor = lu[row * n + col] / lu[col * n + col];
            for k in col..n {
                lu[row * n + k] -= factor * lu[col * n + k];
            }
        }
        det *= lu[col * n + col];
    }
    det
}

/// Quadratic form `c' A c`
pub fn quadratic_form(a: &[f64], c: &[f64]) -> f64 {
    let n = c.len();
    let mut total = 0.0;
    for i in 0..n {
        if c[i] == 0.0 {
            continue;
        }
        for j in 0..n {
            total += c[i] * a[i * n + j] * c[j];
        }
    }
    total
}

/// Eigen-decomposition of a symmetric matrix by cyclic Jacobi rotations.
///
/// Returns eigenvalues in descending order and the matching eigenvectors as
/// the columns of the returned matrix.
pub fn symmetric_eigen(a: &Array2<f64>) -> (Vec<f64>, Array2<f64>) {
    let n = a.nrows();
    let mut m = a.clone();
    let mut v = Array2::<f64>::eye(n);

    for _sweep in 0..100 {
        let mut off = 0.0;
        for i in 0..n {
            for j in (i + 1)..n {
                off += m[[i, j]] * m[[i, j]];
            }
        }
        if off < 1e-22 {
            break;
        }

        for p in 0..n {
            for q in (p + 1)..n {
                if m[[p, q]].abs() < 1e-300 {
                    continue;
                }
                let theta = (m[[q, q]] - m[[p, p]]) / (2.0 * m[[p, q]]);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let t = if theta == 0.0 { 1.0 } else { t };
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;

                for k in 0..n {
                    let mkp = m[[k, p]];
                    let mkq = m[[k, q]];
                    m[[k, p]] = c * mkp - s * mkq;
                    m[[k, q]] = s * mkp + c * mkq;
                }
                for k in 0..n {
                    let mpk = m[[p, k]];
                    let mqk = m[[q, k]];
                    m[[p, k]] = c * mpk - s * mqk;
                    m[[q, k]] = s * mpk + c * mqk;
                }
                for k in 0..n {
                    let vkp = v[[k, p]];
                    let vkq = v[[k, q]];
                    v[[k, p]] = c * vkp - s * vkq;
                    v[[k, q]] = s * vkp + c * vkq;
                }
            }
        }
    }

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| m[[j, j]].total_cmp(&m[[i, i]]));
    let values: Vec<f64> = order.iter().map(|&i| m[[i, i]]).collect();
    let mut vectors = Array2::zeros((n, n));
    for (new_col, &old_col) in order.iter().enumerate() {
        for row in 0..n {
            vectors[[row, new_col]] = v[[row, old_col]];
        }
    }
    (values, vectors)
}
