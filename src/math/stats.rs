//! Small robust statistics used for S/N estimation.

/// Median of the finite values, `None` if there are none.
pub fn nan_median(values: &[f64]) -> Option<f64> {
    let mut v: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
    median_mut(&mut v)
}

/// Population standard deviation (ddof = 0) of the finite values.
pub fn nan_std(values: &[f64]) -> Option<f64> {
    let v: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
    if v.is_empty() {
        return None;
    }
    let n = v.len() as f64;
    let mean = v.iter().sum::<f64>() / n;
    let var = v.iter().map(|x| (x - mean) * (x - mean)).sum::<f64>() / n;
    Some(var.sqrt())
}

/// Iterative sigma clipping around the median.
///
/// Returns the surviving finite values. Stops when a pass rejects nothing or
/// after `max_iters` passes.
pub fn sigma_clip(values: &[f64], sigma: f64, max_iters: usize) -> Vec<f64> {
    let mut kept: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
    for _ in 0..max_iters {
        let (Some(center), Some(std)) = (nan_median(&kept), nan_std(&kept)) else {
            break;
        };
        let bound = sigma * std;
        let before = kept.len();
        kept.retain(|x| (x - center).abs() <= bound);
        if kept.len() == before {
            break;
        }
    }
    kept
}

pub(crate) fn median_mut(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        Some((values[mid - 1] + values[mid]) / 2.0)
    }
}
