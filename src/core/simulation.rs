use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use tracing::info;

use super::types::{
    DEFAULT_HISTOGRAM_BINS, HistogramBin, RiskLevel, RiskModel, SimulationConfig,
    SimulationResult,
};

/// Per-customer economics behind a scenario, used by [`RiskModel::UnitEconomics`].
///
/// `exposure` is horizon traffic and `lift_exposure` the same traffic weighted by the surviving
/// share of lift, so nominal inputs reproduce the projected revenues.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct UnitEconomics {
    pub exposure: f64,
    pub lift_exposure: f64,
    pub variant_rate: f64,
    pub control_rate: f64,
    pub control_ltv: f64,
    pub variant_ltv: f64,
    pub first_year_price: f64,
    pub renewal_price: f64,
    pub retention: f64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RiskScenario {
    pub variant: String,
    pub variant_revenue: f64,
    pub control_revenue: f64,
    pub cost: f64,
    pub unit: UnitEconomics,
}

impl RiskScenario {
    pub fn expected_profit(&self) -> f64 {
        self.variant_revenue - self.control_revenue - self.cost
    }
}

pub fn simulate(scenario: &RiskScenario, config: &SimulationConfig) -> SimulationResult {
    let seed = config.seed.unwrap_or_else(rand::random);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let samples: Vec<f64> = (0..config.samples)
        .map(|_| match config.model {
            RiskModel::Revenue => sample_revenue_profit(scenario, config, &mut rng),
            RiskModel::UnitEconomics => sample_unit_profit(scenario, config, &mut rng),
        })
        .collect();

    let result = summarize(&scenario.variant, seed, samples);
    info!(
        variant = %scenario.variant,
        seed,
        win_rate = result.win_rate,
        p5 = result.p5,
        p95 = result.p95,
        risk = result.risk.label(),
        "risk simulation finished"
    );
    result
}

fn perturb(mean: f64, relative_sd: f64, rng: &mut ChaCha8Rng) -> f64 {
    let z: f64 = rng.sample(StandardNormal);
    mean + mean * relative_sd * z
}

fn sample_revenue_profit(
    scenario: &RiskScenario,
    config: &SimulationConfig,
    rng: &mut ChaCha8Rng,
) -> f64 {
    let variant = perturb(scenario.variant_revenue, config.volatility, rng);
    let control = perturb(
        scenario.control_revenue,
        config.volatility * config.control_volatility_ratio,
        rng,
    );
    variant - control - scenario.cost
}

fn sample_unit_profit(
    scenario: &RiskScenario,
    config: &SimulationConfig,
    rng: &mut ChaCha8Rng,
) -> f64 {
    let unit = &scenario.unit;
    let stable_sd = config.volatility * config.control_volatility_ratio;

    let variant_rate = perturb(unit.variant_rate, config.volatility, rng);
    let retention = perturb(unit.retention, stable_sd, rng);
    let control_rate = perturb(unit.control_rate, stable_sd, rng);

    let variant = (unit.control_rate * unit.exposure
        + (variant_rate - unit.control_rate) * unit.lift_exposure)
        * variant_ltv(unit, retention);
    let control = unit.exposure * control_rate * unit.control_ltv;
    variant - control - scenario.cost
}

/// Variant LTV under a perturbed retention, clipped to [0.1, 1].
///
/// The first-year plus renewal value only sets the ratio; the level stays the blended LTV of
/// whichever valuation produced it.
pub(crate) fn variant_ltv(unit: &UnitEconomics, retention: f64) -> f64 {
    let two_year = |r: f64| unit.first_year_price + r.clamp(0.1, 1.0) * unit.renewal_price;
    let nominal = two_year(unit.retention);
    if nominal > 0.0 {
        unit.variant_ltv * two_year(retention) / nominal
    } else {
        unit.variant_ltv
    }
}

pub fn summarize(variant: &str, seed: u64, samples: Vec<f64>) -> SimulationResult {
    let n = samples.len();
    let wins = samples.iter().filter(|&&p| p > 0.0).count();
    let win_rate = if n == 0 { 0.0 } else { wins as f64 / n as f64 };
    let mean = if n == 0 {
        0.0
    } else {
        samples.iter().sum::<f64>() / n as f64
    };

    let mut sorted = samples.clone();
    let p5 = percentile(&mut sorted, 5.0);
    let p95 = percentile(&mut sorted, 95.0);
    let histogram = histogram(&samples, DEFAULT_HISTOGRAM_BINS);

    SimulationResult {
        variant: variant.to_string(),
        seed,
        samples,
        win_rate,
        mean,
        p5,
        p95,
        risk: RiskLevel::from_win_rate(win_rate),
        histogram,
    }
}

pub fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}

pub fn histogram(samples: &[f64], bins: usize) -> Vec<HistogramBin> {
    if samples.is_empty() || bins == 0 {
        return Vec::new();
    }

    let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
    let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if max <= min {
        return vec![HistogramBin {
            lower: min,
            upper: max,
            count: samples.len() as u32,
        }];
    }

    let width = (max - min) / bins as f64;
    let mut out: Vec<HistogramBin> = (0..bins)
        .map(|i| HistogramBin {
            lower: min + width * i as f64,
            upper: if i + 1 == bins {
                max
            } else {
                min + width * (i + 1) as f64
            },
            count: 0,
        })
        .collect();
    for &value in samples {
        let idx = (((value - min) / width) as usize).min(bins - 1);
        out[idx].count += 1;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::{any, prop_assert, proptest};

    const EPS: f64 = 1e-9;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn scenario(variant_revenue: f64, control_revenue: f64, cost: f64) -> RiskScenario {
        RiskScenario {
            variant: "Variant 1".to_string(),
            variant_revenue,
            control_revenue,
            cost,
            unit: UnitEconomics {
                exposure: 10_000.0,
                lift_exposure: 10_000.0,
                variant_rate: 0.023,
                control_rate: 0.02,
                control_ltv: 400.0,
                variant_ltv: 400.0,
                first_year_price: 250.0,
                renewal_price: 300.0,
                retention: 0.5,
            },
        }
    }

    fn seeded(seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed: Some(seed),
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn same_seed_reproduces_samples() {
        let s = scenario(120_000.0, 100_000.0, 5_000.0);
        let a = simulate(&s, &seeded(7));
        let b = simulate(&s, &seeded(7));
        let c = simulate(&s, &seeded(8));
        assert_eq!(a, b);
        assert_ne!(a.samples, c.samples);
        assert_eq!(a.samples.len(), 1_000);
        assert_eq!(a.seed, 7);
    }

    #[test]
    fn zero_volatility_collapses_to_expected_profit() {
        let s = scenario(120_000.0, 100_000.0, 5_000.0);
        let config = SimulationConfig {
            volatility: 0.0,
            ..seeded(1)
        };
        let result = simulate(&s, &config);
        assert!(result.samples.iter().all(|&p| (p - 15_000.0).abs() < EPS));
        assert_approx(result.win_rate, 1.0);
        assert_eq!(result.risk, RiskLevel::Low);
        assert_eq!(result.histogram.len(), 1);
        assert_eq!(result.histogram[0].count, 1_000);
    }

    #[test]
    fn sample_mean_tracks_expected_profit() {
        let s = scenario(120_000.0, 100_000.0, 5_000.0);
        let result = simulate(&s, &seeded(42));
        let sd = ((0.10 * 120_000.0_f64).powi(2) + (0.05 * 100_000.0_f64).powi(2)).sqrt();
        let standard_error = sd / (1_000.0_f64).sqrt();
        assert!(
            (result.mean - s.expected_profit()).abs() < 5.0 * standard_error,
            "mean {} too far from {}",
            result.mean,
            s.expected_profit()
        );
        assert!(result.p5 < result.mean && result.mean < result.p95);
    }

    #[test]
    fn unit_economics_model_rebuilds_ltv_from_retention() {
        let s = scenario(0.0, 0.0, 1_000.0);
        let config = SimulationConfig {
            volatility: 0.0,
            model: RiskModel::UnitEconomics,
            ..seeded(3)
        };
        let result = simulate(&s, &config);
        let expected = 10_000.0 * 0.023 * (250.0 + 0.5 * 300.0) - 10_000.0 * 0.02 * 400.0 - 1_000.0;
        assert!(result.samples.iter().all(|&p| (p - expected).abs() < 1e-6));
    }

    #[test]
    fn unit_economics_scales_blended_ltv_by_retention() {
        let mut s = scenario(0.0, 0.0, 0.0);
        s.unit.variant_ltv = 800.0;
        let unit = s.unit;
        assert_approx(variant_ltv(&unit, 0.5), 800.0);
        assert_approx(variant_ltv(&unit, 1.0), 800.0 * 550.0 / 400.0);
        assert_approx(variant_ltv(&unit, -3.0), variant_ltv(&unit, 0.1));
        assert_approx(variant_ltv(&unit, 4.0), variant_ltv(&unit, 1.0));
    }

    #[test]
    fn unit_economics_decays_only_the_lift() {
        let mut s = scenario(0.0, 0.0, 0.0);
        s.unit.lift_exposure = 4_000.0;
        let config = SimulationConfig {
            volatility: 0.0,
            model: RiskModel::UnitEconomics,
            ..seeded(3)
        };
        let result = simulate(&s, &config);
        let variant = (0.02 * 10_000.0 + 0.003 * 4_000.0) * 400.0;
        let control = 0.02 * 10_000.0 * 400.0;
        assert!((result.mean - (variant - control)).abs() < 1e-6);
    }

    #[test]
    fn risk_thresholds_put_boundaries_in_lower_bucket() {
        assert_eq!(RiskLevel::from_win_rate(0.81), RiskLevel::Low);
        assert_eq!(RiskLevel::from_win_rate(0.80), RiskLevel::Moderate);
        assert_eq!(RiskLevel::from_win_rate(0.51), RiskLevel::Moderate);
        assert_eq!(RiskLevel::from_win_rate(0.50), RiskLevel::High);
        assert_eq!(RiskLevel::from_win_rate(0.0), RiskLevel::High);
    }

    #[test]
    fn percentile_interpolates_between_ranks() {
        let mut values = vec![4.0, 1.0, 3.0, 2.0, 5.0];
        assert_approx(percentile(&mut values, 50.0), 3.0);
        assert_approx(percentile(&mut values, 10.0), 1.4);
        assert_approx(percentile(&mut [], 5.0), 0.0);
    }

    #[test]
    fn histogram_counts_every_sample() {
        let samples: Vec<f64> = (0..100).map(f64::from).collect();
        let bins = histogram(&samples, 30);
        assert_eq!(bins.len(), 30);
        assert_eq!(bins.iter().map(|b| b.count).sum::<u32>(), 100);
        assert_approx(bins[0].lower, 0.0);
        assert_approx(bins[29].upper, 99.0);
    }

    #[test]
    fn extreme_gaps_saturate_win_rate() {
        let winning = simulate(&scenario(1e9, 1_000.0, 0.0), &seeded(5));
        let losing = simulate(&scenario(1_000.0, 1e9, 0.0), &seeded(5));
        assert_approx(winning.win_rate, 1.0);
        assert_approx(losing.win_rate, 0.0);
        assert_eq!(losing.risk, RiskLevel::High);
    }

    proptest! {
        #![proptest_config(proptest::test_runner::Config::with_cases(24))]

        #[test]
        fn prop_win_rate_non_decreasing_in_profit_gap(
            seed in any::<u64>(),
            base in 50_000u32..150_000,
            step in 0u32..50_000
        ) {
            let config = SimulationConfig { samples: 400, ..seeded(seed) };
            let low = simulate(&scenario(base as f64, 100_000.0, 2_000.0), &config);
            let high = simulate(&scenario((base + step) as f64, 100_000.0, 2_000.0), &config);
            prop_assert!(high.win_rate >= low.win_rate);
        }
    }
}
