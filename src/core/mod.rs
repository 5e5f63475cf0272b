mod catalog;
mod engine;
mod error;
mod matcher;
mod mix;
mod projection;
mod simulation;
mod types;
mod valuation;

pub use catalog::{Catalog, default_catalog};
pub use engine::{
    GroupReport, ScenarioReport, risk_scenario, run_scenario, run_scenario_with_values,
    run_simulation,
};
pub use error::{EngineError, InsufficientReason};
pub use matcher::{
    MatchOutcome, match_product, parse_count, parse_line, parse_paste, similarity, split_line,
};
pub use mix::{RateSource, aggregate_group, resolve_conversion_rate};
pub use projection::{
    ScenarioProjection, break_even, decayed_conversion_rate, horizon_exposure, project_control,
    project_scenario, project_variant, select_winner, traffic_for_month,
};
pub use simulation::{RiskScenario, UnitEconomics, histogram, percentile, simulate};
pub use types::{
    BreakEven, COHORT_YEARS, CatalogEntry, CohortYear, DEFAULT_HORIZON_MONTHS,
    DEFAULT_MATCH_THRESHOLD, DEFAULT_SIMULATIONS, DEFAULT_VOLATILITY, EngineConfig, GroupAggregate,
    GroupInput, HistogramBin, LineAnomaly, LiftFloor, MAX_VARIANTS, MatchStatus, MixShare,
    ParsedLine, RevenuePoint, RevenueStream, RiskLevel, RiskModel, ScenarioInput, ScenarioResult,
    Seasonality, SimulationConfig, SimulationResult, Valuation, YearPrice,
};
pub use valuation::{
    LtvTable, ProductValue, ValuationMemo, cohort_cash_flows, cohort_value, npv, simple_value,
    valuate,
};
