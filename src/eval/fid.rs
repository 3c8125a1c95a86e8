use burn::{
    nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig},
    prelude::*,
    tensor::ElementConversion,
};

use crate::error::TrainError;

/// Upper bound on cyclic Jacobi sweeps for the symmetric eigenproblem.
const JACOBI_SWEEPS: usize = 64;

/// Maps a batch of images `[N, C, H, W]` to feature vectors `[N, F]`.
pub trait FeatureExtractor<B: Backend> {
    fn features(&self, images: Tensor<B, 4>) -> Tensor<B, 2>;
}

/// Average-pools every channel onto a fixed `grid x grid` lattice and
/// flattens the result.
#[derive(Debug, Clone)]
pub struct PooledFeatureExtractor {
    pool: AdaptiveAvgPool2d,
}

impl PooledFeatureExtractor {
    pub fn new(grid: usize) -> Self {
        Self {
            pool: AdaptiveAvgPool2dConfig::new([grid, grid]).init(),
        }
    }
}

impl<B: Backend> FeatureExtractor<B> for PooledFeatureExtractor {
    fn features(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let pooled = self.pool.forward(images);
        let [n, c, h, w] = pooled.dims();
        pooled.reshape([n, c * h * w])
    }
}

/// Fréchet distance between Gaussians fitted to two feature sets:
/// `|mu_r - mu_f|^2 + tr(S_r + S_f - 2 (S_r S_f)^(1/2))`.
///
/// The covariances are never formed. With `S = X^T X / (n - 1)` for the
/// centred rows `X`, the nonzero spectrum of `S_r S_f` is the squared
/// singular values of `X_r X_f^T / sqrt((n_r - 1)(n_f - 1))`, so the
/// square-root trace is the nuclear norm of that small cross matrix. This
/// stays exact when there are fewer samples than features.
pub fn frechet_distance<B: Backend>(
    real: Tensor<B, 2>,
    fake: Tensor<B, 2>,
) -> Result<f64, TrainError> {
    let [n_real, dim] = real.dims();
    let [n_fake, dim_fake] = fake.dims();
    if dim != dim_fake {
        return Err(TrainError::Metric(format!(
            "feature sizes differ: {dim} vs {dim_fake}"
        )));
    }
    if n_real < 2 || n_fake < 2 {
        return Err(TrainError::Metric(format!(
            "need at least two samples per set, got {n_real} and {n_fake}"
        )));
    }

    let (mu_real, centered_real) = center(real);
    let (mu_fake, centered_fake) = center(fake);

    let mean_term = to_f64((mu_real - mu_fake).powf_scalar(2.0).sum());
    let trace_real = to_f64(centered_real.clone().powf_scalar(2.0).sum()) / (n_real - 1) as f64;
    let trace_fake = to_f64(centered_fake.clone().powf_scalar(2.0).sum()) / (n_fake - 1) as f64;

    let cross = centered_real.matmul(centered_fake.transpose());
    let scale = (((n_real - 1) * (n_fake - 1)) as f64).sqrt();
    let cross = cross
        .into_data()
        .convert::<f64>()
        .to_vec::<f64>()
        .map_err(|err| TrainError::Metric(format!("cannot read cross matrix: {err:?}")))?;
    let cross: Vec<f64> = cross.into_iter().map(|value| value / scale).collect();
    let trace_covmean = nuclear_norm(&cross, n_real, n_fake);

    let distance = mean_term + trace_real + trace_fake - 2.0 * trace_covmean;
    if !distance.is_finite() {
        return Err(TrainError::Metric(format!("distance is not finite ({distance})")));
    }
    // Round-off can push identical sets slightly negative.
    Ok(distance.max(0.0))
}

/// Row mean `[1, D]` and the centred rows `[N, D]`.
fn center<B: Backend>(features: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 2>) {
    let mean = features.clone().mean_dim(0);
    let centered = features - mean.clone();
    (mean, centered)
}

/// Sum of singular values of the row-major `rows x cols` matrix `c`, from the
/// eigenvalues of the smaller Gram matrix.
fn nuclear_norm(c: &[f64], rows: usize, cols: usize) -> f64 {
    let (side, inner) = (rows.min(cols), rows.max(cols));
    let at = |i: usize, k: usize| {
        if rows <= cols {
            c[i * cols + k]
        } else {
            c[k * cols + i]
        }
    };

    let mut gram = vec![0.0; side * side];
    for i in 0..side {
        for j in i..side {
            let dot: f64 = (0..inner).map(|k| at(i, k) * at(j, k)).sum();
            gram[i * side + j] = dot;
            gram[j * side + i] = dot;
        }
    }

    symmetric_eigenvalues(gram, side)
        .into_iter()
        .map(|lambda| lambda.max(0.0).sqrt())
        .sum()
}

/// Eigenvalues of the symmetric row-major `n x n` matrix `a` by cyclic
/// Jacobi rotations.
fn symmetric_eigenvalues(mut a: Vec<f64>, n: usize) -> Vec<f64> {
    for _ in 0..JACOBI_SWEEPS {
        let mut off = 0.0;
        let mut diag = 0.0;
        for i in 0..n {
            for j in 0..n {
                if i == j {
                    diag += a[i * n + j] * a[i * n + j];
                } else {
                    off += a[i * n + j] * a[i * n + j];
                }
            }
        }
        if off <= 1e-22 * diag || off == 0.0 {
            break;
        }

        for p in 0..n {
            for q in p + 1..n {
                let apq = a[p * n + q];
                if apq == 0.0 {
                    continue;
                }
                let theta = (a[q * n + q] - a[p * n + p]) / (2.0 * apq);
                let t = theta.signum() / (theta.abs() + (theta * theta + 1.0).sqrt());
                let c = 1.0 / (t * t + 1.0).sqrt();
                let s = t * c;
                for k in 0..n {
                    let (akp, akq) = (a[k * n + p], a[k * n + q]);
                    a[k * n + p] = c * akp - s * akq;
                    a[k * n + q] = s * akp + c * akq;
                }
                for k in 0..n {
                    let (apk, aqk) = (a[p * n + k], a[q * n + k]);
                    a[p * n + k] = c * apk - s * aqk;
                    a[q * n + k] = s * apk + c * aqk;
                }
            }
        }
    }
    (0..n).map(|i| a[i * n + i]).collect()
}

fn to_f64<B: Backend>(scalar: Tensor<B, 1>) -> f64 {
    scalar.into_scalar().elem::<f64>()
}
