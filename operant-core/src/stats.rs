//! Small numeric helpers shared by the adaptation rules.
//!
//! Statistics over too-few samples return NaN; callers substitute a
//! sentinel (usually zero) rather than propagating it.

/// Median of a slice. NaN when empty.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let half = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[half - 1] + sorted[half]) / 2.0
    } else {
        sorted[half]
    }
}

/// Linearly interpolated percentile, `fraction` in `[0, 1]`.
pub fn percentile(values: &[f64], fraction: f64) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = fraction * (sorted.len() - 1) as f64;
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;
    if lower == upper {
        sorted[lower]
    } else {
        let weight = rank - lower as f64;
        sorted[lower] * (1.0 - weight) + sorted[upper] * weight
    }
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation. NaN when empty.
pub fn std_dev(values: &[f64]) -> f64 {
    let avg = mean(values);
    if avg.is_nan() {
        return f64::NAN;
    }
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Element-to-element differences; one shorter than the input.
pub fn diff(values: &[f64]) -> Vec<f64> {
    values.windows(2).map(|w| w[1] - w[0]).collect()
}

/// Boxcar moving average. Window edges shrink so the output keeps the
/// input's length.
pub fn smooth(values: &[f64], window: usize) -> Vec<f64> {
    if window <= 1 || values.is_empty() {
        return values.to_vec();
    }
    let half = window / 2;
    (0..values.len())
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + half + 1).min(values.len());
            mean(&values[start..end])
        })
        .collect()
}

/// A local maximum found by [`find_peaks`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub index: usize,
    pub value: f64,
}

/// Walks the signal alternating between rising and falling segments,
/// reporting each local maximum as it is left behind.
pub fn find_peaks(values: &[f64]) -> Vec<Peak> {
    let mut peaks = Vec::new();

    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    let mut max_pos = 0usize;
    let mut looking_for_max = true;

    for (i, &v) in values.iter().enumerate() {
        if v > max {
            max = v;
            max_pos = i;
        }
        if v < min {
            min = v;
        }

        if looking_for_max {
            if v < max {
                peaks.push(Peak {
                    index: max_pos,
                    value: max,
                });
                min = v;
                looking_for_max = false;
            }
        } else if v > min {
            max = v;
            max_pos = i;
            looking_for_max = true;
        }
    }

    peaks
}

/// NaN-to-sentinel substitution for display and bookkeeping paths.
pub fn nan_to_zero(value: f64) -> f64 {
    if value.is_nan() { 0.0 } else { value }
}
