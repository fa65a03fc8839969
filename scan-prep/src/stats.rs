//! Statistics functions

use ndarray::prelude::*;
use ndarray::DataMut;
use ndarray_stats::errors::QuantileError;
use noisy_float::prelude::{n64, N64};
use num_traits::FromPrimitive;
use std::f64::consts::PI;
use std::ops::{Add, Div, Mul, Rem, Sub};

/// Return the median. Sorts its argument in place.
// Sorting directly rather than calling `Quantile1dExt::quantile_mut`, which may overflow the
// stack on large inputs (https://github.com/rust-ndarray/ndarray-stats/issues/86).
pub fn median_mut<S, T>(xs: &mut ArrayBase<S, Ix1>) -> Result<T, QuantileError>
where
    S: DataMut<Elem = T>,
    T: Clone + Copy + Ord + FromPrimitive,
    T: Add<Output = T> + Sub<Output = T> + Mul<Output = T> + Div<Output = T> + Rem<Output = T>,
{
    if xs.is_empty() {
        return Err(QuantileError::EmptyInput);
    }
    match xs.as_slice_mut() {
        Some(vector) => vector.sort_unstable(),
        None => {
            let mut owned = xs.to_vec();
            owned.sort_unstable();
            xs.assign(&Array1::from(owned));
        }
    }
    Ok(if xs.len() % 2 == 0 {
        (xs[xs.len() / 2] + xs[xs.len() / 2 - 1]) / (T::from_u64(2).unwrap())
    } else {
        xs[xs.len() / 2]
    })
}

/// Median of the finite values in `values`, or None if there are none.
pub fn median(values: &[f64]) -> Option<f64> {
    let mut xs: Array1<N64> = values.iter().filter(|v| v.is_finite()).map(|&v| n64(v)).collect();
    median_mut(&mut xs).ok().map(N64::raw)
}

/// Mean and variance of `values`, with `ddof` delta degrees of freedom for the variance.
pub fn mean_var(values: &[f64], ddof: usize) -> (f64, f64) {
    let n = values.len();
    if n == 0 {
        return (f64::NAN, f64::NAN);
    }
    let mean = values.iter().sum::<f64>() / n as f64;
    if n <= ddof {
        return (mean, f64::NAN);
    }
    let ss: f64 = values.iter().map(|v| (v - mean).powi(2)).sum();
    (mean, ss / (n - ddof) as f64)
}

/// Scott's rule bandwidth for a Gaussian kernel density estimate.
pub fn scott_bandwidth(values: &[f64]) -> f64 {
    let (_, var) = mean_var(values, 1);
    let n = values.len() as f64;
    let bw = var.sqrt() * n.powf(-0.2);
    if bw.is_finite() && bw > 0.0 {
        bw
    } else {
        1.0
    }
}

/// Gaussian kernel density estimate of `values` evaluated at each point of `grid`.
pub fn gaussian_kde(values: &[f64], grid: &[f64]) -> Vec<f64> {
    if values.is_empty() {
        return vec![0.0; grid.len()];
    }
    let bw = scott_bandwidth(values);
    let norm = 1.0 / (values.len() as f64 * bw * (2.0 * PI).sqrt());
    grid.iter()
        .map(|&g| {
            values
                .iter()
                .map(|&v| {
                    let z = (g - v) / bw;
                    (-0.5 * z * z).exp()
                })
                .sum::<f64>()
                * norm
        })
        .collect()
}

#[cfg(test)]
mod test_stats {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::prelude::array;

    #[test]
    fn test_median_mut() {
        assert_eq!(
            median_mut(&mut Array::<usize, Ix1>::from(vec![])),
            Err(QuantileError::EmptyInput)
        );
        assert_eq!(median_mut(&mut array![1]), Ok(1));
        assert_eq!(median_mut(&mut array![1, 10]), Ok(5));
        assert_eq!(median_mut(&mut array![100, 1, 10]), Ok(10));
        assert_eq!(median_mut(&mut array![1000, 1, 100, 10]), Ok(55));

        assert_eq!(median_mut(&mut array![1.].mapv(n64)), Ok(n64(1.0)));
        assert_eq!(median_mut(&mut array![10., 1.].mapv(n64)), Ok(n64(5.5)));
    }

    #[test]
    fn test_median_skips_non_finite() {
        assert_eq!(median(&[]), None);
        assert_eq!(median(&[f64::NAN]), None);
        assert_eq!(median(&[3.0, f64::NAN, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), Some(2.5));
    }

    #[test]
    fn test_mean_var() {
        let (m, v) = mean_var(&[1.0, 2.0, 3.0, 4.0], 1);
        assert_abs_diff_eq!(m, 2.5);
        assert_abs_diff_eq!(v, 1.6666666666666667, epsilon = 1e-12);
        let (_, v0) = mean_var(&[1.0, 2.0, 3.0, 4.0], 0);
        assert_abs_diff_eq!(v0, 1.25);
        assert!(mean_var(&[1.0], 1).1.is_nan());
    }

    #[test]
    fn test_kde_integrates_to_one() {
        let values = [0.0, 0.5, 1.0, 1.5, 4.0];
        let grid: Vec<f64> = (0..2001).map(|i| -10.0 + i as f64 * 0.01).collect();
        let density = gaussian_kde(&values, &grid);
        let area: f64 = density.iter().sum::<f64>() * 0.01;
        assert_abs_diff_eq!(area, 1.0, epsilon = 1e-3);
    }
}
