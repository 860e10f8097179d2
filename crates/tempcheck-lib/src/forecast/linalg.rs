/// Solve `(XᵀX + diag(penalty)) β = Xᵀy` for the row-major design matrix `rows`.
/// Returns `None` when the penalised normal matrix is not positive definite.
pub(crate) fn ridge_solve(rows: &[Vec<f64>], y: &[f64], penalty: &[f64]) -> Option<Vec<f64>> {
    let p = penalty.len();
    let mut gram = vec![vec![0.0; p]; p];
    let mut rhs = vec![0.0; p];
    for (x, &target) in rows.iter().zip(y) {
        for i in 0..p {
            rhs[i] += x[i] * target;
            for j in 0..=i {
                gram[i][j] += x[i] * x[j];
            }
        }
    }
    for i in 0..p {
        gram[i][i] += penalty[i];
        for j in 0..i {
            gram[j][i] = gram[i][j];
        }
    }
    let lower = cholesky(&gram)?;
    Some(cholesky_solve(&lower, &rhs))
}

fn cholesky(a: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let n = a.len();
    let mut l = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[i][k] * l[j][k]).sum();
            if i == j {
                let d = a[i][i] - sum;
                if !(d > 1e-12) {
                    return None;
                }
                l[i][j] = d.sqrt();
            } else {
                l[i][j] = (a[i][j] - sum) / l[j][j];
            }
        }
    }
    Some(l)
}

fn cholesky_solve(l: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let n = b.len();
    let mut z = vec![0.0; n];
    for i in 0..n {
        let sum: f64 = (0..i).map(|k| l[i][k] * z[k]).sum();
        z[i] = (b[i] - sum) / l[i][i];
    }
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let sum: f64 = (i + 1..n).map(|k| l[k][i] * x[k]).sum();
        x[i] = (z[i] - sum) / l[i][i];
    }
    x
}
