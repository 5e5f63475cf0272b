use serde::{Deserialize, Serialize};

pub const DEFAULT_HORIZON_MONTHS: u32 = 24;
pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.6;
pub const DEFAULT_SIMULATIONS: u32 = 1_000;
pub const DEFAULT_VOLATILITY: f64 = 0.10;
pub const DEFAULT_CONTROL_VOLATILITY_RATIO: f64 = 0.5;
pub const DEFAULT_HISTOGRAM_BINS: usize = 30;
pub const COHORT_YEARS: u32 = 5;
pub const MAX_VARIANTS: usize = 5;

/// Cash-flow price for one cohort year, either relative to the base price or fixed.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "camelCase")]
pub enum YearPrice {
    Multiplier(f64),
    Absolute(f64),
}

impl YearPrice {
    pub fn resolve(self, base_price: f64) -> f64 {
        match self {
            YearPrice::Multiplier(m) => base_price * m,
            YearPrice::Absolute(price) => price,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortYear {
    pub year: u32,
    pub retention_pct: f64,
    pub price: YearPrice,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub name: String,
    pub base_price: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renewal_price: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renewal_retention: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year_curve: Option<Vec<CohortYear>>,
}

impl CatalogEntry {
    pub fn new(name: impl Into<String>, base_price: f64) -> Self {
        Self {
            name: name.into(),
            base_price,
            renewal_price: None,
            renewal_retention: None,
            year_curve: None,
        }
    }

    pub fn with_renewal(mut self, renewal_price: f64, renewal_retention: f64) -> Self {
        self.renewal_price = Some(renewal_price);
        self.renewal_retention = Some(renewal_retention);
        self
    }

    pub fn with_year_curve(mut self, curve: Vec<CohortYear>) -> Self {
        self.year_curve = Some(curve);
        self
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchStatus {
    Exact,
    CaseFixed,
    Fuzzy,
    NotFound,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LineAnomaly {
    MissingCount,
    UnparsableCount { token: String },
    NegativeCount { token: String },
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ParsedLine {
    pub raw_name: String,
    pub count: f64,
    pub matched_name: String,
    pub matched_price: f64,
    pub match_status: MatchStatus,
    pub similarity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomaly: Option<LineAnomaly>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MixShare {
    pub name: String,
    pub share: f64,
    pub ltv: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupAggregate {
    pub group_name: String,
    pub total_count: f64,
    pub conversion_rate: f64,
    pub blended_ltv: f64,
    pub average_unit_price: f64,
    pub average_first_year_price: f64,
    pub average_renewal_price: f64,
    pub effective_retention: f64,
    pub unmatched_count: usize,
    pub mix: Vec<MixShare>,
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenuePoint {
    pub month_index: u32,
    pub traffic: f64,
    pub conversion_rate: f64,
    pub revenue: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RevenueStream {
    pub group: String,
    pub points: Vec<RevenuePoint>,
}

impl RevenueStream {
    pub fn total(&self) -> f64 {
        self.points.iter().map(|p| p.revenue).sum()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum BreakEven {
    #[serde(rename_all = "camelCase")]
    Reachable {
        conversion_rate: f64,
        lift_required: Option<f64>,
        met: bool,
    },
    Unreachable {
        #[serde(rename = "conversionRate")]
        conversion_rate: f64,
    },
    Undefined,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioResult {
    pub group: String,
    pub total_revenue: f64,
    pub incremental_revenue: f64,
    pub net_profit: f64,
    pub roi_pct: Option<f64>,
    pub payback_month: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub break_even: Option<BreakEven>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
}

impl RiskLevel {
    pub fn from_win_rate(win_rate: f64) -> Self {
        if win_rate > 0.80 {
            RiskLevel::Low
        } else if win_rate > 0.50 {
            RiskLevel::Moderate
        } else {
            RiskLevel::High
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RiskLevel::Low => "low risk",
            RiskLevel::Moderate => "moderate risk",
            RiskLevel::High => "high risk",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistogramBin {
    pub lower: f64,
    pub upper: f64,
    pub count: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    pub variant: String,
    pub seed: u64,
    pub samples: Vec<f64>,
    pub win_rate: f64,
    pub mean: f64,
    pub p5: f64,
    pub p95: f64,
    pub risk: RiskLevel,
    pub histogram: Vec<HistogramBin>,
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Valuation {
    Simple {
        global_retention: f64,
        use_product_retention: bool,
    },
    CohortNpv {
        discount_rate: f64,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Seasonality {
    pub multipliers: [f64; 12],
    pub launch_month: u32,
}

impl Seasonality {
    pub fn multiplier(&self, month_index: u32) -> f64 {
        let start = self.launch_month.clamp(1, 12) - 1;
        self.multipliers[((start + month_index) % 12) as usize]
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum LiftFloor {
    PositiveLiftOnly,
    None,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RiskModel {
    Revenue,
    UnitEconomics,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SimulationConfig {
    pub samples: u32,
    pub volatility: f64,
    pub control_volatility_ratio: f64,
    pub model: RiskModel,
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            samples: DEFAULT_SIMULATIONS,
            volatility: DEFAULT_VOLATILITY,
            control_volatility_ratio: DEFAULT_CONTROL_VOLATILITY_RATIO,
            model: RiskModel::Revenue,
            seed: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    pub valuation: Valuation,
    pub horizon_months: u32,
    pub decay_rate: f64,
    pub monthly_traffic: f64,
    pub test_visitors: f64,
    pub implementation_cost: f64,
    pub seasonality: Option<Seasonality>,
    pub lift_floor: LiftFloor,
    pub match_threshold: f64,
    pub simulation: SimulationConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            valuation: Valuation::Simple {
                global_retention: 0.85,
                use_product_retention: false,
            },
            horizon_months: DEFAULT_HORIZON_MONTHS,
            decay_rate: 0.05,
            monthly_traffic: 10_000.0,
            test_visitors: 10_000.0,
            implementation_cost: 5_000.0,
            seasonality: None,
            lift_floor: LiftFloor::PositiveLiftOnly,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            simulation: SimulationConfig::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GroupInput {
    pub name: String,
    pub paste: String,
    pub conversion_rate: Option<f64>,
}

impl GroupInput {
    pub fn new(name: impl Into<String>, paste: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            paste: paste.into(),
            conversion_rate: None,
        }
    }

    pub fn with_conversion_rate(mut self, rate: f64) -> Self {
        self.conversion_rate = Some(rate);
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScenarioInput {
    pub control: GroupInput,
    pub variants: Vec<GroupInput>,
}

impl ScenarioInput {
    pub fn group_count(&self) -> usize {
        self.variants.len() + 1
    }
}
