use serde::Serialize;
use tracing::{info, warn};

use super::catalog::Catalog;
use super::error::{EngineError, InsufficientReason};
use super::matcher::parse_paste;
use super::mix::{RateSource, aggregate_group};
use super::projection::{horizon_exposure, project_scenario};
use super::simulation::{RiskScenario, UnitEconomics, simulate};
use super::types::{
    EngineConfig, GroupAggregate, GroupInput, MatchStatus, ParsedLine, RevenueStream,
    ScenarioInput, ScenarioResult, SimulationResult,
};
use super::valuation::{LtvTable, valuate};

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupReport {
    pub name: String,
    pub rows: Vec<ParsedLine>,
    pub unmatched_rows: usize,
    pub anomalous_rows: usize,
    pub aggregate: Option<GroupAggregate>,
    pub issue: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioReport {
    pub groups: Vec<GroupReport>,
    pub streams: Vec<RevenueStream>,
    pub results: Vec<ScenarioResult>,
    pub winner: Option<String>,
    pub issues: Vec<String>,
}

impl ScenarioReport {
    pub fn control(&self) -> Option<&GroupReport> {
        self.groups.first()
    }

    pub fn group(&self, name: &str) -> Option<&GroupReport> {
        self.groups.iter().find(|g| g.name == name)
    }

    pub fn result(&self, name: &str) -> Option<&ScenarioResult> {
        self.results.iter().find(|r| r.group == name)
    }

    pub fn unmatched_rows(&self) -> usize {
        self.groups.iter().map(|g| g.unmatched_rows).sum()
    }
}

pub fn run_scenario(
    catalog: &Catalog,
    config: &EngineConfig,
    input: &ScenarioInput,
) -> ScenarioReport {
    let ltv_table = valuate(catalog, &config.valuation);
    run_scenario_with_values(catalog, &ltv_table, config, input)
}

/// Same as [`run_scenario`] with a caller-supplied valuation table, for hosts that memoise it.
pub fn run_scenario_with_values(
    catalog: &Catalog,
    ltv_table: &LtvTable,
    config: &EngineConfig,
    input: &ScenarioInput,
) -> ScenarioReport {
    let group_count = input.group_count();
    let groups: Vec<GroupReport> = std::iter::once(&input.control)
        .chain(&input.variants)
        .map(|group| build_group(group, group_count, catalog, ltv_table, config))
        .collect();

    let mut report = ScenarioReport {
        groups,
        streams: Vec::new(),
        results: Vec::new(),
        winner: None,
        issues: Vec::new(),
    };

    let Some(control) = report.groups[0].aggregate.clone() else {
        let err = EngineError::insufficient(
            &input.control.name,
            InsufficientReason::ControlUnavailable,
        );
        warn!(%err, "skipping projection");
        report.issues.push(err.to_string());
        return report;
    };

    let variants: Vec<GroupAggregate> = report.groups[1..]
        .iter()
        .filter_map(|g| g.aggregate.clone())
        .collect();
    if variants.is_empty() {
        report.issues.push(EngineError::NoScenario.to_string());
        return report;
    }

    match project_scenario(&control, &variants, config) {
        Ok(projection) => {
            report.winner = projection.winner_result().map(|r| r.group.clone());
            report.streams = std::iter::once(projection.control)
                .chain(projection.variants)
                .collect();
            report.results = projection.results;
        }
        Err(err) => {
            warn!(%err, "projection skipped");
            report.issues.push(err.to_string());
        }
    }

    info!(
        groups = report.groups.len(),
        projected = report.results.len(),
        winner = ?report.winner,
        unmatched = report.unmatched_rows(),
        "scenario evaluated"
    );
    report
}

fn build_group(
    group: &GroupInput,
    group_count: usize,
    catalog: &Catalog,
    ltv_table: &LtvTable,
    config: &EngineConfig,
) -> GroupReport {
    let rows = parse_paste(&group.paste, catalog, config.match_threshold);
    let source = match group.conversion_rate {
        Some(rate) => RateSource::Direct(rate),
        None => RateSource::Derived {
            test_visitors: config.test_visitors,
            group_count,
        },
    };

    let (aggregate, issue) = match aggregate_group(&group.name, &rows, ltv_table, source) {
        Ok(aggregate) => (Some(aggregate), None),
        Err(err) => {
            warn!(group = %group.name, %err, "group skipped");
            (None, Some(err.to_string()))
        }
    };

    GroupReport {
        name: group.name.clone(),
        unmatched_rows: rows
            .iter()
            .filter(|r| r.match_status == MatchStatus::NotFound)
            .count(),
        anomalous_rows: rows.iter().filter(|r| r.anomaly.is_some()).count(),
        rows,
        aggregate,
        issue,
    }
}

/// Builds the Monte Carlo inputs for `variant`, or for the winner when no name is given.
pub fn risk_scenario(
    report: &ScenarioReport,
    config: &EngineConfig,
    variant: Option<&str>,
) -> Result<RiskScenario, EngineError> {
    let name = match variant {
        Some(name) => name,
        None => report.winner.as_deref().ok_or(EngineError::NoScenario)?,
    };

    let control_group = report.control().ok_or(EngineError::NoScenario)?;
    let control = control_group.aggregate.as_ref().ok_or_else(|| {
        EngineError::insufficient(&control_group.name, InsufficientReason::ControlUnavailable)
    })?;
    let control_result = report
        .result(&control_group.name)
        .ok_or(EngineError::NoScenario)?;

    let variant_result = report
        .results
        .iter()
        .skip(1)
        .find(|r| r.group == name)
        .ok_or_else(|| EngineError::UnknownGroup(name.to_string()))?;
    let variant_aggregate = report
        .group(name)
        .and_then(|g| g.aggregate.as_ref())
        .ok_or_else(|| EngineError::UnknownGroup(name.to_string()))?;

    let (exposure, lift_exposure) = horizon_exposure(config);

    Ok(RiskScenario {
        variant: name.to_string(),
        variant_revenue: variant_result.total_revenue,
        control_revenue: control_result.total_revenue,
        cost: config.implementation_cost,
        unit: UnitEconomics {
            exposure,
            lift_exposure,
            variant_rate: variant_aggregate.conversion_rate,
            control_rate: control.conversion_rate,
            control_ltv: control.blended_ltv,
            variant_ltv: variant_aggregate.blended_ltv,
            first_year_price: variant_aggregate.average_first_year_price,
            renewal_price: variant_aggregate.average_renewal_price,
            retention: variant_aggregate.effective_retention,
        },
    })
}

pub fn run_simulation(
    report: &ScenarioReport,
    config: &EngineConfig,
    variant: Option<&str>,
) -> Result<SimulationResult, EngineError> {
    let scenario = risk_scenario(report, config, variant)?;
    Ok(simulate(&scenario, &config.simulation))
}
