use tracing::{debug, info};

use super::error::{EngineError, InsufficientReason};
use super::types::{
    BreakEven, EngineConfig, GroupAggregate, LiftFloor, RevenuePoint, RevenueStream,
    ScenarioResult,
};

#[derive(Clone, Debug, PartialEq)]
pub struct ScenarioProjection {
    pub control: RevenueStream,
    pub variants: Vec<RevenueStream>,
    pub results: Vec<ScenarioResult>,
    pub winner: Option<usize>,
}

impl ScenarioProjection {
    pub fn winner_result(&self) -> Option<&ScenarioResult> {
        self.winner.map(|idx| &self.results[idx + 1])
    }
}

pub fn traffic_for_month(config: &EngineConfig, month_index: u32) -> f64 {
    let multiplier = config
        .seasonality
        .as_ref()
        .map_or(1.0, |s| s.multiplier(month_index));
    config.monthly_traffic * multiplier
}

/// Conversion rate for month `month_index`: only the lift decays, never the baseline.
pub fn decayed_conversion_rate(
    control_rate: f64,
    variant_rate: f64,
    decay_rate: f64,
    month_index: u32,
    floor: LiftFloor,
) -> f64 {
    let initial_lift = variant_rate - control_rate;
    let lift = initial_lift * (1.0 - decay_rate).powi(month_index as i32);
    let rate = control_rate + lift;
    match floor {
        LiftFloor::PositiveLiftOnly if initial_lift > 0.0 => rate.max(control_rate),
        _ => rate,
    }
}

fn ensure_traffic(config: &EngineConfig, group: &str) -> Result<(), EngineError> {
    if config.monthly_traffic > 0.0 && config.monthly_traffic.is_finite() {
        Ok(())
    } else {
        Err(EngineError::insufficient(group, InsufficientReason::NoTraffic))
    }
}

pub fn project_control(
    control: &GroupAggregate,
    config: &EngineConfig,
) -> Result<RevenueStream, EngineError> {
    ensure_traffic(config, &control.group_name)?;
    let points = (0..config.horizon_months)
        .map(|month_index| {
            let traffic = traffic_for_month(config, month_index);
            RevenuePoint {
                month_index,
                traffic,
                conversion_rate: control.conversion_rate,
                revenue: traffic * control.conversion_rate * control.blended_ltv,
            }
        })
        .collect();
    Ok(RevenueStream {
        group: control.group_name.clone(),
        points,
    })
}

pub fn project_variant(
    control: &GroupAggregate,
    variant: &GroupAggregate,
    config: &EngineConfig,
) -> Result<RevenueStream, EngineError> {
    ensure_traffic(config, &variant.group_name)?;
    let points = (0..config.horizon_months)
        .map(|month_index| {
            let traffic = traffic_for_month(config, month_index);
            let conversion_rate = decayed_conversion_rate(
                control.conversion_rate,
                variant.conversion_rate,
                config.decay_rate,
                month_index,
                config.lift_floor,
            );
            RevenuePoint {
                month_index,
                traffic,
                conversion_rate,
                revenue: traffic * conversion_rate * variant.blended_ltv,
            }
        })
        .collect();
    Ok(RevenueStream {
        group: variant.group_name.clone(),
        points,
    })
}

pub fn control_result(control: &RevenueStream) -> ScenarioResult {
    ScenarioResult {
        group: control.group.clone(),
        total_revenue: control.total(),
        incremental_revenue: 0.0,
        net_profit: 0.0,
        roi_pct: None,
        payback_month: None,
        break_even: None,
    }
}

pub fn variant_result(
    control: &RevenueStream,
    variant: &RevenueStream,
    implementation_cost: f64,
) -> ScenarioResult {
    let total_revenue = variant.total();
    let incremental_revenue = total_revenue - control.total();
    let net_profit = incremental_revenue - implementation_cost;
    let roi_pct = (implementation_cost > 0.0).then(|| net_profit / implementation_cost * 100.0);

    let mut cumulative = 0.0;
    let payback_month = control
        .points
        .iter()
        .zip(&variant.points)
        .find(|(c, v)| {
            cumulative += v.revenue - c.revenue;
            cumulative >= implementation_cost
        })
        .map(|(_, v)| v.month_index);

    ScenarioResult {
        group: variant.group.clone(),
        total_revenue,
        incremental_revenue,
        net_profit,
        roi_pct,
        payback_month,
        break_even: None,
    }
}

/// Horizon traffic `(ΣT, ΣT·k^m)`; the second sum weights each month by the surviving lift.
pub fn horizon_exposure(config: &EngineConfig) -> (f64, f64) {
    let retained = 1.0 - config.decay_rate;
    (0..config.horizon_months).fold((0.0, 0.0), |(all, lifted), month_index| {
        let traffic = traffic_for_month(config, month_index);
        (
            all + traffic,
            lifted + traffic * retained.powi(month_index as i32),
        )
    })
}

/// Variant conversion rate at which horizon revenue covers control revenue plus cost.
/// Revenue is linear in the variant rate for a fixed decay schedule, so this is solved directly.
pub fn break_even(
    control: &GroupAggregate,
    variant: &GroupAggregate,
    control_total: f64,
    config: &EngineConfig,
) -> BreakEven {
    let (exposure, lift_exposure) = horizon_exposure(config);
    if !(variant.blended_ltv > 0.0 && lift_exposure > 0.0) {
        return BreakEven::Undefined;
    }

    let target = control_total + config.implementation_cost;
    let base = control.conversion_rate;
    let rate = base + (target / variant.blended_ltv - base * exposure) / lift_exposure;

    if rate > 1.0 {
        return BreakEven::Unreachable {
            conversion_rate: rate,
        };
    }
    let rate = rate.max(0.0);
    BreakEven::Reachable {
        conversion_rate: rate,
        lift_required: (base > 0.0).then(|| (rate - base) / base),
        met: variant.conversion_rate >= rate,
    }
}

/// Highest net profit wins; on ties the earlier variant is kept.
pub fn select_winner(variant_results: &[ScenarioResult]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, result) in variant_results.iter().enumerate() {
        if best.is_none_or(|(_, profit)| result.net_profit > profit) {
            best = Some((idx, result.net_profit));
        }
    }
    best.map(|(idx, _)| idx)
}

/// Projects control and every variant. `results[0]` is control, `results[i + 1]` is variant `i`.
pub fn project_scenario(
    control: &GroupAggregate,
    variants: &[GroupAggregate],
    config: &EngineConfig,
) -> Result<ScenarioProjection, EngineError> {
    let control_stream = project_control(control, config)?;
    let control_total = control_stream.total();

    let mut streams = Vec::with_capacity(variants.len());
    let mut variant_results = Vec::with_capacity(variants.len());
    for variant in variants {
        let stream = project_variant(control, variant, config)?;
        let mut result = variant_result(&control_stream, &stream, config.implementation_cost);
        result.break_even = Some(break_even(control, variant, control_total, config));
        debug!(
            group = %variant.group_name,
            total = result.total_revenue,
            net_profit = result.net_profit,
            "projected variant"
        );
        streams.push(stream);
        variant_results.push(result);
    }

    let winner = select_winner(&variant_results);
    if let Some(idx) = winner {
        info!(
            winner = %variant_results[idx].group,
            net_profit = variant_results[idx].net_profit,
            "selected winning variant"
        );
    }

    let mut results = Vec::with_capacity(variants.len() + 1);
    results.push(control_result(&control_stream));
    results.extend(variant_results);

    Ok(ScenarioProjection {
        control: control_stream,
        variants: streams,
        results,
        winner,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Seasonality;
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn group(name: &str, conversion_rate: f64, blended_ltv: f64) -> GroupAggregate {
        GroupAggregate {
            group_name: name.to_string(),
            total_count: 100.0,
            conversion_rate,
            blended_ltv,
            average_unit_price: blended_ltv,
            average_first_year_price: blended_ltv,
            average_renewal_price: blended_ltv,
            effective_retention: 0.0,
            unmatched_count: 0,
            mix: Vec::new(),
        }
    }

    fn one_month_config() -> EngineConfig {
        EngineConfig {
            horizon_months: 1,
            decay_rate: 0.0,
            monthly_traffic: 10_000.0,
            implementation_cost: 1_000.0,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn one_month_scenario_matches_hand_calculation() {
        let control = group("Control", 0.02, 150.0);
        let variant = group("Variant 1", 0.03, 150.0);
        let projection =
            project_scenario(&control, &[variant], &one_month_config()).expect("projects");

        assert_approx(projection.results[0].total_revenue, 30_000.0);
        assert_approx(projection.results[0].net_profit, 0.0);
        assert_eq!(projection.results[0].roi_pct, None);
        assert_approx(projection.results[1].total_revenue, 45_000.0);
        assert_approx(projection.results[1].incremental_revenue, 15_000.0);
        assert_approx(projection.results[1].net_profit, 14_000.0);
        assert_approx(projection.results[1].roi_pct.expect("cost > 0"), 1_400.0);
        assert_eq!(projection.results[1].payback_month, Some(0));
        assert_eq!(projection.winner, Some(0));
    }

    #[test]
    fn zero_decay_keeps_rate_constant_and_full_decay_removes_lift_after_first_month() {
        for month in 0..24 {
            assert_approx(
                decayed_conversion_rate(0.02, 0.03, 0.0, month, LiftFloor::PositiveLiftOnly),
                0.03,
            );
        }
        assert_approx(
            decayed_conversion_rate(0.02, 0.03, 1.0, 0, LiftFloor::PositiveLiftOnly),
            0.03,
        );
        for month in 1..24 {
            assert_approx(
                decayed_conversion_rate(0.02, 0.03, 1.0, month, LiftFloor::PositiveLiftOnly),
                0.02,
            );
        }
    }

    #[test]
    fn losing_variant_recovers_toward_control_without_floor() {
        let m0 = decayed_conversion_rate(0.03, 0.02, 0.5, 0, LiftFloor::PositiveLiftOnly);
        let m1 = decayed_conversion_rate(0.03, 0.02, 0.5, 1, LiftFloor::PositiveLiftOnly);
        assert_approx(m0, 0.02);
        assert_approx(m1, 0.025);
        assert!(m1 < 0.03);
    }

    #[test]
    fn decaying_variant_stream_converges_to_control() {
        let config = EngineConfig {
            horizon_months: 24,
            decay_rate: 0.2,
            ..one_month_config()
        };
        let control = group("Control", 0.02, 100.0);
        let variant = group("Variant 1", 0.04, 100.0);
        let stream = project_variant(&control, &variant, &config).expect("projects");
        let control_stream = project_control(&control, &config).expect("projects");

        assert_eq!(stream.points.len(), 24);
        let first_gap = stream.points[0].revenue - control_stream.points[0].revenue;
        let last_gap = stream.points[23].revenue - control_stream.points[23].revenue;
        assert!(last_gap < first_gap);
        assert!(last_gap >= 0.0);
        assert!(control_stream
            .points
            .iter()
            .all(|p| (p.conversion_rate - 0.02).abs() < 1e-15));
    }

    #[test]
    fn seasonality_scales_traffic_from_launch_month() {
        let mut multipliers = [1.0; 12];
        multipliers[10] = 2.0; // November
        multipliers[11] = 3.0; // December
        let config = EngineConfig {
            horizon_months: 3,
            seasonality: Some(Seasonality {
                multipliers,
                launch_month: 11,
            }),
            ..one_month_config()
        };
        assert_approx(traffic_for_month(&config, 0), 20_000.0);
        assert_approx(traffic_for_month(&config, 1), 30_000.0);
        assert_approx(traffic_for_month(&config, 2), 10_000.0);

        let control = project_control(&group("Control", 0.01, 10.0), &config).expect("projects");
        assert_approx(control.points[1].revenue, 30_000.0 * 0.01 * 10.0);
    }

    #[test]
    fn zero_traffic_is_insufficient_data() {
        let config = EngineConfig {
            monthly_traffic: 0.0,
            ..one_month_config()
        };
        let err = project_control(&group("Control", 0.02, 10.0), &config).expect_err("no traffic");
        assert_eq!(
            err,
            EngineError::insufficient("Control", InsufficientReason::NoTraffic)
        );
    }

    #[test]
    fn winner_ties_keep_first_seen_variant() {
        let control = group("Control", 0.02, 100.0);
        let variants = [
            group("Variant 1", 0.01, 100.0),
            group("Variant 2", 0.03, 100.0),
            group("Variant 3", 0.03, 100.0),
        ];
        let projection =
            project_scenario(&control, &variants, &one_month_config()).expect("projects");
        assert_eq!(projection.winner, Some(1));
        assert_eq!(
            projection.winner_result().map(|r| r.group.as_str()),
            Some("Variant 2")
        );
        assert_eq!(select_winner(&[]), None);
    }

    #[test]
    fn roi_is_undefined_without_cost() {
        let config = EngineConfig {
            implementation_cost: 0.0,
            ..one_month_config()
        };
        let control = project_control(&group("Control", 0.02, 10.0), &config).expect("projects");
        let variant = project_variant(
            &group("Control", 0.02, 10.0),
            &group("Variant 1", 0.03, 10.0),
            &config,
        )
        .expect("projects");
        assert_eq!(variant_result(&control, &variant, 0.0).roi_pct, None);
    }

    #[test]
    fn break_even_rate_zeroes_net_profit_under_decay() {
        let config = EngineConfig {
            horizon_months: 24,
            decay_rate: 0.1,
            implementation_cost: 25_000.0,
            ..one_month_config()
        };
        let control = group("Control", 0.02, 120.0);
        let variant = group("Variant 1", 0.025, 150.0);
        let control_stream = project_control(&control, &config).expect("projects");

        let BreakEven::Reachable {
            conversion_rate, ..
        } = break_even(&control, &variant, control_stream.total(), &config)
        else {
            panic!("break-even should be reachable");
        };

        let at_break_even = group("Variant 1", conversion_rate, 150.0);
        let stream = project_variant(&control, &at_break_even, &config).expect("projects");
        let result = variant_result(&control_stream, &stream, config.implementation_cost);
        assert!(result.net_profit.abs() < 1e-4, "net {}", result.net_profit);
    }

    #[test]
    fn break_even_without_decay_matches_static_formula() {
        let config = one_month_config();
        let control = group("Control", 0.02, 150.0);
        let variant = group("Variant 1", 0.03, 150.0);
        let outcome = break_even(&control, &variant, 30_000.0, &config);
        let expected = 31_000.0 / (10_000.0 * 150.0);
        match outcome {
            BreakEven::Reachable {
                conversion_rate,
                lift_required,
                met,
            } => {
                assert_approx(conversion_rate, expected);
                assert_approx(lift_required.expect("control rate > 0"), expected / 0.02 - 1.0);
                assert!(met);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn break_even_flags_unreachable_and_undefined_states() {
        let config = EngineConfig {
            implementation_cost: 1e12,
            ..one_month_config()
        };
        let control = group("Control", 0.02, 150.0);
        assert!(matches!(
            break_even(&control, &group("Variant 1", 0.03, 150.0), 30_000.0, &config),
            BreakEven::Unreachable { .. }
        ));
        assert_eq!(
            break_even(&control, &group("Variant 1", 0.03, 0.0), 30_000.0, &config),
            BreakEven::Undefined
        );
    }

    proptest! {
        #[test]
        fn prop_lift_shrinks_monotonically(
            control_bp in 1u32..500,
            variant_bp in 1u32..500,
            decay_bp in 0u32..2_000,
            month in 0u32..23
        ) {
            let c = control_bp as f64 / 10_000.0;
            let v = variant_bp as f64 / 10_000.0;
            let d = decay_bp as f64 / 10_000.0;
            let now = decayed_conversion_rate(c, v, d, month, LiftFloor::PositiveLiftOnly);
            let next = decayed_conversion_rate(c, v, d, month + 1, LiftFloor::PositiveLiftOnly);
            prop_assert!((next - c).abs() <= (now - c).abs() + 1e-15);
            if v > c {
                prop_assert!(next >= c);
            }
        }

        #[test]
        fn prop_net_profit_grows_with_variant_rate(
            control_bp in 1u32..400,
            low_bp in 1u32..400,
            step_bp in 1u32..400
        ) {
            let config = EngineConfig {
                decay_rate: 0.05,
                horizon_months: 24,
                ..one_month_config()
            };
            let control = group("Control", control_bp as f64 / 10_000.0, 100.0);
            let low = group("Variant 1", low_bp as f64 / 10_000.0, 100.0);
            let high = group("Variant 2", (low_bp + step_bp) as f64 / 10_000.0, 100.0);
            let projection = project_scenario(&control, &[low, high], &config).expect("projects");
            prop_assert!(projection.results[2].net_profit > projection.results[1].net_profit);
            prop_assert!(projection.winner == Some(1));
        }
    }
}
