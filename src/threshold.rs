//! Overlay threshold resolution.

use crate::config::{DisplayConfig, ThresholdMode};
use crate::volume::Volume;

/// Upper bound on the number of samples sorted for a percentile.
pub const PERCENTILE_SAMPLE_CAP: usize = 200_000;

/// Percentile used when the configured one is not a number.
const FALLBACK_PERCENTILE: f64 = 95.0;

/// Approximate percentile of `values`.
///
/// Takes every `ceil(n / PERCENTILE_SAMPLE_CAP)`-th element, sorts the
/// sample and picks index `floor(p / 100 * (len - 1))`. Deterministic for a
/// given input. Returns 0 for an empty input.
pub fn sampled_percentile<I>(values: I, p: f64) -> f32
where
    I: ExactSizeIterator<Item = f32>,
{
    let n = values.len();
    if n == 0 {
        return 0.0;
    }
    let step = n.div_ceil(PERCENTILE_SAMPLE_CAP).max(1);
    let mut sample: Vec<f32> = values.step_by(step).collect();
    sample.sort_unstable_by(f32::total_cmp);

    let last = sample.len() - 1;
    let k = ((p / 100.0) * last as f64).floor();
    let k = if k.is_nan() || k < 0.0 {
        0
    } else {
        (k as usize).min(last)
    };
    sample[k]
}

/// Threshold the compositor should apply, or `None` without an overlay.
pub fn resolve_threshold(overlay: Option<&Volume>, display: &DisplayConfig) -> Option<f32> {
    let overlay = overlay?;
    let threshold = match display.threshold_mode {
        ThresholdMode::Value => {
            if display.threshold_value.is_finite() {
                display.threshold_value
            } else {
                0.0
            }
        }
        ThresholdMode::Percentile => {
            let p = if display.percentile.is_nan() {
                FALLBACK_PERCENTILE
            } else {
                display.percentile.clamp(0.0, 100.0)
            };
            sampled_percentile(overlay.samples(), p)
        }
    };
    Some(threshold)
}
