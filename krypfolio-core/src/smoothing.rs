//! Time-aware exponentially weighted moving average.
//!
//! Weight of observation i at time t_n: w_i = 0.5^((t_n - t_i) / halflife).
//! Result: Σ w_i x_i / Σ w_i (bias-adjusted, no seed window).
//! Recursive: numerator and denominator both decay by 0.5^(Δdays / halflife)
//! between consecutive observations, so irregular date gaps decay correctly.

use chrono::NaiveDate;

/// EWMA of `values` observed on `dates` with a half-life in days.
///
/// `dates` must be ascending. Non-finite observations contribute no weight;
/// positions before the first finite observation are NaN.
///
/// # Panics
///
/// Panics if `dates` and `values` differ in length or `halflife_days` is not
/// positive.
pub fn ewma_by_halflife(dates: &[NaiveDate], values: &[f64], halflife_days: f64) -> Vec<f64> {
    assert_eq!(dates.len(), values.len(), "dates and values must align");
    assert!(halflife_days > 0.0, "halflife must be positive");

    let mut result = Vec::with_capacity(values.len());
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    let mut prev_date: Option<NaiveDate> = None;

    for (&date, &value) in dates.iter().zip(values) {
        if let Some(prev) = prev_date {
            let elapsed = (date - prev).num_days() as f64;
            let decay = 0.5_f64.powf(elapsed / halflife_days);
            numerator *= decay;
            denominator *= decay;
        }
        prev_date = Some(date);

        if value.is_finite() {
            numerator += value;
            denominator += 1.0;
        }

        result.push(if denominator > 0.0 {
            numerator / denominator
        } else {
            f64::NAN
        });
    }

    result
}
