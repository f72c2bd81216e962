// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Pure rate-distribution planning.
//!
//! [`plan_rates`] maps a total requested rate and a worker count to a
//! per-worker rate vector. It has no side effects and does not touch the
//! registry or any store, so it is validated independently of the rest of
//! the engine.

use crate::distributed::types::{DistributedError, RateDistributionMode};

/// Compute the per-worker rate vector for `total_rate` spread across
/// `worker_count` workers under `mode`.
///
/// `worker_count == 0` is normalised to 1 before planning. `weights` is
/// required, and must have exactly `worker_count` positive entries, when
/// `mode == RateDistributionMode::Weighted`.
pub fn plan_rates(
    total_rate: u32,
    worker_count: u32,
    mode: RateDistributionMode,
    weights: Option<&[f64]>,
) -> Result<Vec<u32>, DistributedError> {
    let n = worker_count.max(1) as usize;
    let t = total_rate as i64;

    match mode {
        RateDistributionMode::Shared => {
            let base = t / n as i64;
            let remainder = t % n as i64;
            Ok((0..n)
                .map(|i| (base + i64::from((i as i64) < remainder)) as u32)
                .collect())
        }
        RateDistributionMode::Same => Ok(vec![total_rate; n]),
        RateDistributionMode::Weighted => {
            let weights = weights.ok_or_else(|| {
                DistributedError::Validation("weighted mode requires rate_weights".into())
            })?;
            if weights.len() != n {
                return Err(DistributedError::Validation(format!(
                    "rate_weights length {} does not match worker_count {}",
                    weights.len(),
                    n
                )));
            }
            if weights.iter().any(|w| *w <= 0.0) {
                return Err(DistributedError::Validation(
                    "rate_weights must all be positive".into(),
                ));
            }

            let sum: f64 = weights.iter().sum();
            let mut rates: Vec<u32> = weights
                .iter()
                .map(|w| ((t as f64) * w / sum).floor() as u32)
                .collect();

            let distributed: i64 = rates.iter().map(|r| i64::from(*r)).sum();
            let shortfall = t - distributed;
            if shortfall > 0 {
                rates[0] += shortfall as u32;
            }
            Ok(rates)
        }
        RateDistributionMode::Ramped => {
            let base = t / n as i64;
            let step = base / 2;
            Ok((0..n)
                .map(|i| {
                    let ramp_factor = if n > 1 {
                        i as f64 / (n - 1) as f64
                    } else {
                        0.0
                    };
                    let adjusted = base as f64 + (2.0 * ramp_factor - 1.0) * step as f64;
                    adjusted.max(1.0) as u32
                })
                .collect())
        }
        RateDistributionMode::Burst => {
            let burst = (n / 2).max(1);
            let tail = n - burst;
            Ok((0..n)
                .map(|i| {
                    if i < burst {
                        ((70 * t) / (100 * burst as i64)) as u32
                    } else {
                        ((30 * t) / (100 * tail as i64)) as u32
                    }
                })
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_sums_exactly() {
        let rates = plan_rates(30, 3, RateDistributionMode::Shared, None).unwrap();
        assert_eq!(rates, vec![10, 10, 10]);
        assert_eq!(rates.iter().sum::<u32>(), 30);
    }

    #[test]
    fn shared_distributes_remainder_to_front() {
        let rates = plan_rates(10, 3, RateDistributionMode::Shared, None).unwrap();
        assert_eq!(rates, vec![4, 3, 3]);
        assert_eq!(rates.iter().sum::<u32>(), 10);
    }

    #[test]
    fn shared_single_worker() {
        let rates = plan_rates(30, 1, RateDistributionMode::Shared, None).unwrap();
        assert_eq!(rates, vec![30]);
    }

    #[test]
    fn worker_count_zero_normalises_to_one() {
        let rates = plan_rates(30, 0, RateDistributionMode::Shared, None).unwrap();
        assert_eq!(rates, vec![30]);
    }

    #[test]
    fn same_repeats_total_for_every_worker() {
        let rates = plan_rates(10, 4, RateDistributionMode::Same, None).unwrap();
        assert_eq!(rates, vec![10, 10, 10, 10]);
    }

    #[test]
    fn weighted_sums_exactly_with_remainder_on_first() {
        let rates =
            plan_rates(30, 3, RateDistributionMode::Weighted, Some(&[2.0, 1.0, 1.0])).unwrap();
        assert_eq!(rates.iter().sum::<u32>(), 30);
        assert!(rates[0] >= 15);
    }

    #[test]
    fn weighted_requires_matching_length() {
        let err = plan_rates(30, 3, RateDistributionMode::Weighted, Some(&[1.0, 1.0])).unwrap_err();
        assert!(matches!(err, DistributedError::Validation(_)));
    }

    #[test]
    fn weighted_rejects_non_positive_weight() {
        let err =
            plan_rates(30, 2, RateDistributionMode::Weighted, Some(&[1.0, 0.0])).unwrap_err();
        assert!(matches!(err, DistributedError::Validation(_)));
    }

    #[test]
    fn weighted_requires_weights_present() {
        let err = plan_rates(30, 3, RateDistributionMode::Weighted, None).unwrap_err();
        assert!(matches!(err, DistributedError::Validation(_)));
    }

    #[test]
    fn ramped_rates_are_at_least_one() {
        let rates = plan_rates(10, 5, RateDistributionMode::Ramped, None).unwrap();
        assert!(rates.iter().all(|r| *r >= 1));
    }

    #[test]
    fn ramped_single_worker_uses_base_rate() {
        let rates = plan_rates(30, 1, RateDistributionMode::Ramped, None).unwrap();
        assert_eq!(rates, vec![30]);
    }

    #[test]
    fn burst_front_group_gets_majority_share() {
        let rates = plan_rates(100, 4, RateDistributionMode::Burst, None).unwrap();
        assert!(rates[0] > rates[3]);
    }

    #[test]
    fn burst_single_worker_gets_front_share() {
        let rates = plan_rates(100, 1, RateDistributionMode::Burst, None).unwrap();
        assert_eq!(rates.len(), 1);
    }
}
