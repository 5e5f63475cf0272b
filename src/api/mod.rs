use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use anyhow::Context;
use axum::{
    Router,
    extract::Json,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::info;

use crate::core::{
    Catalog, CatalogEntry, DEFAULT_HORIZON_MONTHS, DEFAULT_MATCH_THRESHOLD, DEFAULT_SIMULATIONS,
    EngineConfig, GroupInput, LiftFloor, MAX_VARIANTS, MatchOutcome, MatchStatus, RiskModel,
    ScenarioInput, ScenarioReport, Seasonality, SimulationConfig, SimulationResult, Valuation,
    default_catalog, match_product, run_scenario, run_simulation,
};

pub const DEFAULT_SEASONALITY: [f64; 12] = [
    1.15, 1.05, 1.0, 0.95, 0.9, 0.85, 0.85, 0.9, 1.0, 1.05, 1.1, 1.2,
];

#[derive(Parser, Debug)]
#[command(
    name = "abroi",
    about = "A/B test financial scenario engine (product mix, LTV, lift decay, risk simulation)"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Serve the JSON API
    Serve {
        #[arg(long, default_value_t = 8080)]
        port: u16,
    },
    /// Evaluate one scenario and print the JSON report
    Run(RunArgs),
    /// Resolve product names against the built-in catalog
    Match {
        names: Vec<String>,
        #[arg(long, default_value_t = DEFAULT_MATCH_THRESHOLD)]
        threshold: f64,
    },
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliValuationMode {
    Simple,
    CohortNpv,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum CliRiskModel {
    Revenue,
    UnitEconomics,
}

impl From<CliRiskModel> for RiskModel {
    fn from(value: CliRiskModel) -> Self {
        match value {
            CliRiskModel::Revenue => RiskModel::Revenue,
            CliRiskModel::UnitEconomics => RiskModel::UnitEconomics,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiValuationMode {
    #[serde(alias = "marketing")]
    Simple,
    #[serde(alias = "cohortNpv", alias = "cohort_npv", alias = "finance")]
    CohortNpv,
}

impl From<ApiValuationMode> for CliValuationMode {
    fn from(value: ApiValuationMode) -> Self {
        match value {
            ApiValuationMode::Simple => CliValuationMode::Simple,
            ApiValuationMode::CohortNpv => CliValuationMode::CohortNpv,
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum ApiRiskModel {
    Revenue,
    #[serde(alias = "unitEconomics", alias = "unit_economics")]
    UnitEconomics,
}

impl From<ApiRiskModel> for CliRiskModel {
    fn from(value: ApiRiskModel) -> Self {
        match value {
            ApiRiskModel::Revenue => CliRiskModel::Revenue,
            ApiRiskModel::UnitEconomics => CliRiskModel::UnitEconomics,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct ConfigArgs {
    #[arg(long, value_enum, default_value_t = CliValuationMode::Simple)]
    pub valuation_mode: CliValuationMode,
    #[arg(
        long,
        default_value_t = 85.0,
        help = "Year-2 renewal rate in percent applied to every product (simple mode)"
    )]
    pub global_retention: f64,
    #[arg(
        long,
        default_value_t = false,
        help = "Use per-product renewal rates from the catalog where present (simple mode)"
    )]
    pub product_retention: bool,
    #[arg(
        long,
        default_value_t = 8.0,
        help = "Annual discount rate in percent (cohort-npv mode)"
    )]
    pub discount_rate: f64,
    #[arg(long, default_value_t = DEFAULT_HORIZON_MONTHS)]
    pub horizon_months: u32,
    #[arg(long, default_value_t = 5.0, help = "Monthly lift decay in percent")]
    pub decay_rate: f64,
    #[arg(long, default_value_t = 10_000.0)]
    pub monthly_traffic: f64,
    #[arg(
        long,
        help = "Visitors across all groups for derived rates; defaults to monthly traffic"
    )]
    pub test_visitors: Option<f64>,
    #[arg(long, default_value_t = 5_000.0)]
    pub implementation_cost: f64,
    #[arg(long, default_value_t = false)]
    pub seasonality: bool,
    #[arg(
        long,
        value_delimiter = ',',
        help = "Twelve month-of-year traffic multipliers, January first"
    )]
    pub seasonality_multipliers: Option<Vec<f64>>,
    #[arg(long, default_value_t = 1, help = "Calendar month of launch, 1 = January")]
    pub launch_month: u32,
    #[arg(
        long,
        default_value_t = false,
        help = "Let decayed positive lift undershoot the control rate"
    )]
    pub no_lift_floor: bool,
    #[arg(long, default_value_t = DEFAULT_MATCH_THRESHOLD)]
    pub match_threshold: f64,
    #[arg(long, default_value_t = DEFAULT_SIMULATIONS)]
    pub simulations: u32,
    #[arg(
        long,
        default_value_t = 10.0,
        help = "Variant volatility in percent of the simulated value"
    )]
    pub volatility: f64,
    #[arg(
        long,
        default_value_t = 50.0,
        help = "Control volatility as a percent of the variant volatility"
    )]
    pub control_volatility_ratio: f64,
    #[arg(long, value_enum, default_value_t = CliRiskModel::Revenue)]
    pub risk_model: CliRiskModel,
    #[arg(long)]
    pub seed: Option<u64>,
}

impl Default for ConfigArgs {
    fn default() -> Self {
        Self {
            valuation_mode: CliValuationMode::Simple,
            global_retention: 85.0,
            product_retention: false,
            discount_rate: 8.0,
            horizon_months: DEFAULT_HORIZON_MONTHS,
            decay_rate: 5.0,
            monthly_traffic: 10_000.0,
            test_visitors: None,
            implementation_cost: 5_000.0,
            seasonality: false,
            seasonality_multipliers: None,
            launch_month: 1,
            no_lift_floor: false,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            simulations: DEFAULT_SIMULATIONS,
            volatility: 10.0,
            control_volatility_ratio: 50.0,
            risk_model: CliRiskModel::Revenue,
            seed: None,
        }
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,
    #[arg(
        long,
        help = "JSON scenario file; its values take precedence over flags"
    )]
    pub scenario: Option<PathBuf>,
    #[arg(long, help = "Control group paste file (product, count per line)")]
    pub control: Option<PathBuf>,
    #[arg(long = "variant", help = "Variant paste file, repeat for each variant")]
    pub variants: Vec<PathBuf>,
    #[arg(long, help = "Control conversion rate in percent; derived from visitors if omitted")]
    pub control_rate: Option<f64>,
    #[arg(long = "variant-rate", help = "Variant conversion rate in percent, in variant order")]
    pub variant_rates: Vec<f64>,
    #[arg(long, default_value_t = false)]
    pub simulate: bool,
    #[arg(long, help = "Variant to simulate; defaults to the winner")]
    pub simulate_variant: Option<String>,
}

#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GroupPayload {
    name: Option<String>,
    paste: String,
    conversion_rate: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScenarioPayload {
    valuation_mode: Option<ApiValuationMode>,
    global_retention: Option<f64>,
    product_retention: Option<bool>,
    discount_rate: Option<f64>,
    horizon_months: Option<u32>,
    decay_rate: Option<f64>,
    monthly_traffic: Option<f64>,
    test_visitors: Option<f64>,
    implementation_cost: Option<f64>,
    seasonality: Option<bool>,
    seasonality_multipliers: Option<Vec<f64>>,
    launch_month: Option<u32>,
    lift_floor: Option<bool>,
    match_threshold: Option<f64>,
    simulations: Option<u32>,
    volatility: Option<f64>,
    control_volatility_ratio: Option<f64>,
    risk_model: Option<ApiRiskModel>,
    seed: Option<u64>,

    catalog: Option<Vec<CatalogEntry>>,
    control: Option<GroupPayload>,
    variants: Option<Vec<GroupPayload>>,
    simulate_variant: Option<String>,
}

#[derive(Debug)]
pub struct ApiRequest {
    pub config: EngineConfig,
    pub catalog: Catalog,
    pub scenario: ScenarioInput,
    pub simulate_variant: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ConfigEcho {
    valuation_mode: &'static str,
    horizon_months: u32,
    decay_rate: f64,
    monthly_traffic: f64,
    implementation_cost: f64,
    seasonality: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ScenarioResponse<'a> {
    config: ConfigEcho,
    unmatched_rows: usize,
    report: &'a ScenarioReport,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SimulationResponse<'a> {
    risk_label: &'static str,
    #[serde(flatten)]
    result: &'a SimulationResult,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunResponse<'a> {
    #[serde(flatten)]
    scenario: ScenarioResponse<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    simulation: Option<SimulationResponse<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    simulation_error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MatchRow {
    input: String,
    #[serde(flatten)]
    outcome: MatchOutcomeDto,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MatchOutcomeDto {
    matched_name: String,
    matched_price: f64,
    match_status: MatchStatus,
    similarity: f64,
}

impl From<MatchOutcome> for MatchOutcomeDto {
    fn from(value: MatchOutcome) -> Self {
        Self {
            matched_name: value.name,
            matched_price: value.price,
            match_status: value.status,
            similarity: value.similarity,
        }
    }
}

#[derive(Debug, Serialize)]
struct CatalogResponse<'a> {
    entries: &'a [CatalogEntry],
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn build_config(args: &ConfigArgs) -> Result<EngineConfig, String> {
    if !(0.0..=100.0).contains(&args.global_retention) {
        return Err("--global-retention must be between 0 and 100".to_string());
    }

    if !(0.0..=15.0).contains(&args.discount_rate) {
        return Err("--discount-rate must be between 0 and 15".to_string());
    }

    if !(1..=120).contains(&args.horizon_months) {
        return Err("--horizon-months must be between 1 and 120".to_string());
    }

    if !(0.0..=20.0).contains(&args.decay_rate) {
        return Err("--decay-rate must be between 0 and 20".to_string());
    }

    for (name, value) in [
        ("--monthly-traffic", args.monthly_traffic),
        ("--implementation-cost", args.implementation_cost),
        ("--test-visitors", args.test_visitors.unwrap_or(0.0)),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(format!("{name} must be >= 0"));
        }
    }

    if !(1..=12).contains(&args.launch_month) {
        return Err("--launch-month must be between 1 and 12".to_string());
    }

    if !(0.0..=1.0).contains(&args.match_threshold) {
        return Err("--match-threshold must be between 0 and 1".to_string());
    }

    if !(1..=100_000).contains(&args.simulations) {
        return Err("--simulations must be between 1 and 100000".to_string());
    }

    if !(0.0..=100.0).contains(&args.volatility) {
        return Err("--volatility must be between 0 and 100".to_string());
    }

    if !(0.0..=100.0).contains(&args.control_volatility_ratio) {
        return Err("--control-volatility-ratio must be between 0 and 100".to_string());
    }

    let seasonality = if args.seasonality {
        let multipliers = match &args.seasonality_multipliers {
            Some(values) => {
                let table: [f64; 12] = values.as_slice().try_into().map_err(|_| {
                    "--seasonality-multipliers must contain exactly 12 values".to_string()
                })?;
                if table.iter().any(|m| !m.is_finite() || *m < 0.0) {
                    return Err("--seasonality-multipliers must be >= 0".to_string());
                }
                table
            }
            None => DEFAULT_SEASONALITY,
        };
        Some(Seasonality {
            multipliers,
            launch_month: args.launch_month,
        })
    } else {
        None
    };

    let valuation = match args.valuation_mode {
        CliValuationMode::Simple => Valuation::Simple {
            global_retention: args.global_retention / 100.0,
            use_product_retention: args.product_retention,
        },
        CliValuationMode::CohortNpv => Valuation::CohortNpv {
            discount_rate: args.discount_rate / 100.0,
        },
    };

    Ok(EngineConfig {
        valuation,
        horizon_months: args.horizon_months,
        decay_rate: args.decay_rate / 100.0,
        monthly_traffic: args.monthly_traffic,
        test_visitors: args.test_visitors.unwrap_or(args.monthly_traffic),
        implementation_cost: args.implementation_cost,
        seasonality,
        lift_floor: if args.no_lift_floor {
            LiftFloor::None
        } else {
            LiftFloor::PositiveLiftOnly
        },
        match_threshold: args.match_threshold,
        simulation: SimulationConfig {
            samples: args.simulations,
            volatility: args.volatility / 100.0,
            control_volatility_ratio: args.control_volatility_ratio / 100.0,
            model: args.risk_model.into(),
            seed: args.seed,
        },
    })
}

fn build_group(payload: &GroupPayload, default_name: String) -> Result<GroupInput, String> {
    let name = payload
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map_or(default_name, str::to_string);

    let mut group = GroupInput::new(name, payload.paste.clone());
    if let Some(rate) = payload.conversion_rate {
        if !(0.0..=100.0).contains(&rate) {
            return Err(format!(
                "conversionRate for {} must be between 0 and 100",
                group.name
            ));
        }
        group = group.with_conversion_rate(rate / 100.0);
    }
    Ok(group)
}

fn build_scenario(
    control: Option<&GroupPayload>,
    variants: &[GroupPayload],
) -> Result<ScenarioInput, String> {
    let control = control.ok_or_else(|| "control group is required".to_string())?;
    if !(1..=MAX_VARIANTS).contains(&variants.len()) {
        return Err(format!(
            "variants must contain between 1 and {MAX_VARIANTS} groups"
        ));
    }

    let control = build_group(control, "Control".to_string())?;
    let variants = variants
        .iter()
        .enumerate()
        .map(|(idx, payload)| build_group(payload, format!("Variant {}", idx + 1)))
        .collect::<Result<Vec<_>, _>>()?;

    let mut names: Vec<&str> = std::iter::once(control.name.as_str())
        .chain(variants.iter().map(|v| v.name.as_str()))
        .collect();
    names.sort_unstable();
    if names.windows(2).any(|pair| pair[0] == pair[1]) {
        return Err("group names must be unique".to_string());
    }

    Ok(ScenarioInput { control, variants })
}

pub fn api_request_from_payload(
    payload: ScenarioPayload,
    mut args: ConfigArgs,
) -> Result<ApiRequest, String> {
    if let Some(v) = payload.valuation_mode {
        args.valuation_mode = v.into();
    }
    if let Some(v) = payload.global_retention {
        args.global_retention = v;
    }
    if let Some(v) = payload.product_retention {
        args.product_retention = v;
    }
    if let Some(v) = payload.discount_rate {
        args.discount_rate = v;
    }
    if let Some(v) = payload.horizon_months {
        args.horizon_months = v;
    }
    if let Some(v) = payload.decay_rate {
        args.decay_rate = v;
    }
    if let Some(v) = payload.monthly_traffic {
        args.monthly_traffic = v;
    }
    if let Some(v) = payload.test_visitors {
        args.test_visitors = Some(v);
    }
    if let Some(v) = payload.implementation_cost {
        args.implementation_cost = v;
    }
    if let Some(v) = payload.seasonality {
        args.seasonality = v;
    }
    if let Some(v) = payload.seasonality_multipliers {
        args.seasonality_multipliers = Some(v);
    }
    if let Some(v) = payload.launch_month {
        args.launch_month = v;
    }
    if let Some(v) = payload.lift_floor {
        args.no_lift_floor = !v;
    }
    if let Some(v) = payload.match_threshold {
        args.match_threshold = v;
    }
    if let Some(v) = payload.simulations {
        args.simulations = v;
    }
    if let Some(v) = payload.volatility {
        args.volatility = v;
    }
    if let Some(v) = payload.control_volatility_ratio {
        args.control_volatility_ratio = v;
    }
    if let Some(v) = payload.risk_model {
        args.risk_model = v.into();
    }
    if let Some(v) = payload.seed {
        args.seed = Some(v);
    }

    let config = build_config(&args)?;
    let catalog = match payload.catalog {
        Some(entries) => Catalog::new(entries).map_err(|e| e.to_string())?,
        None => default_catalog(),
    };
    let scenario = build_scenario(
        payload.control.as_ref(),
        payload.variants.as_deref().unwrap_or_default(),
    )?;

    Ok(ApiRequest {
        config,
        catalog,
        scenario,
        simulate_variant: payload.simulate_variant,
    })
}

fn config_echo(config: &EngineConfig) -> ConfigEcho {
    ConfigEcho {
        valuation_mode: match config.valuation {
            Valuation::Simple { .. } => "simple",
            Valuation::CohortNpv { .. } => "cohort-npv",
        },
        horizon_months: config.horizon_months,
        decay_rate: config.decay_rate,
        monthly_traffic: config.monthly_traffic,
        implementation_cost: config.implementation_cost,
        seasonality: config.seasonality.is_some(),
    }
}

fn scenario_response<'a>(
    config: &EngineConfig,
    report: &'a ScenarioReport,
) -> ScenarioResponse<'a> {
    ScenarioResponse {
        config: config_echo(config),
        unmatched_rows: report.unmatched_rows(),
        report,
    }
}

fn read_text(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

pub fn run_command(args: RunArgs) -> anyhow::Result<String> {
    let mut payload = match &args.scenario {
        Some(path) => serde_json::from_str::<ScenarioPayload>(&read_text(path)?)
            .with_context(|| format!("invalid scenario JSON in {}", path.display()))?,
        None => ScenarioPayload::default(),
    };

    if let Some(path) = &args.control {
        payload.control = Some(GroupPayload {
            name: None,
            paste: read_text(path)?,
            conversion_rate: args.control_rate,
        });
    }
    if !args.variants.is_empty() {
        payload.variants = Some(
            args.variants
                .iter()
                .enumerate()
                .map(|(idx, path)| {
                    Ok(GroupPayload {
                        name: None,
                        paste: read_text(path)?,
                        conversion_rate: args.variant_rates.get(idx).copied(),
                    })
                })
                .collect::<anyhow::Result<Vec<_>>>()?,
        );
    }
    if args.simulate_variant.is_some() {
        payload.simulate_variant = args.simulate_variant.clone();
    }

    let request = api_request_from_payload(payload, args.config).map_err(anyhow::Error::msg)?;
    let report = run_scenario(&request.catalog, &request.config, &request.scenario);

    let (simulation, simulation_error) = if args.simulate {
        match run_simulation(&report, &request.config, request.simulate_variant.as_deref()) {
            Ok(result) => (Some(result), None),
            Err(err) => (None, Some(err.to_string())),
        }
    } else {
        (None, None)
    };

    let response = RunResponse {
        scenario: scenario_response(&request.config, &report),
        simulation: simulation.as_ref().map(|result| SimulationResponse {
            risk_label: result.risk.label(),
            result,
        }),
        simulation_error,
    };
    Ok(serde_json::to_string_pretty(&response)?)
}

pub fn match_names(names: &[String], threshold: f64) -> anyhow::Result<String> {
    let catalog = default_catalog();
    let rows: Vec<MatchRow> = names
        .iter()
        .map(|name| MatchRow {
            input: name.clone(),
            outcome: match_product(name, &catalog, threshold).into(),
        })
        .collect();
    Ok(serde_json::to_string_pretty(&rows)?)
}

pub async fn run_http_server(port: u16) -> std::io::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let app = Router::new()
        .route("/api/catalog", get(catalog_handler))
        .route("/api/scenario", post(scenario_handler))
        .route("/api/simulate", post(simulate_handler))
        .fallback(not_found_handler);

    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "scenario API listening");

    axum::serve(listener, app).await
}

async fn catalog_handler() -> Response {
    let catalog = default_catalog();
    json_response(
        StatusCode::OK,
        CatalogResponse {
            entries: catalog.entries(),
        },
    )
}

async fn not_found_handler() -> Response {
    error_response(StatusCode::NOT_FOUND, "Not found")
}

async fn scenario_handler(Json(payload): Json<ScenarioPayload>) -> Response {
    let request = match api_request_from_payload(payload, ConfigArgs::default()) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    let report = run_scenario(&request.catalog, &request.config, &request.scenario);
    json_response(StatusCode::OK, scenario_response(&request.config, &report))
}

async fn simulate_handler(Json(payload): Json<ScenarioPayload>) -> Response {
    let request = match api_request_from_payload(payload, ConfigArgs::default()) {
        Ok(request) => request,
        Err(msg) => return error_response(StatusCode::BAD_REQUEST, &msg),
    };
    let report = run_scenario(&request.catalog, &request.config, &request.scenario);
    let result = match run_simulation(&report, &request.config, request.simulate_variant.as_deref())
    {
        Ok(result) => result,
        Err(err) => return error_response(StatusCode::UNPROCESSABLE_ENTITY, &err.to_string()),
    };

    json_response(
        StatusCode::OK,
        RunResponse {
            scenario: scenario_response(&request.config, &report),
            simulation: Some(SimulationResponse {
                risk_label: result.risk.label(),
                result: &result,
            }),
            simulation_error: None,
        },
    )
}

fn json_response<T: Serialize>(status: StatusCode, body: T) -> Response {
    let mut response = (status, Json(body)).into_response();
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        header::HeaderValue::from_static("no-store"),
    );
    response
}

fn error_response(status: StatusCode, msg: &str) -> Response {
    json_response(
        status,
        ErrorResponse {
            error: msg.to_string(),
        },
    )
}

#[cfg(test)]
fn api_request_from_json(json: &str) -> Result<ApiRequest, String> {
    let payload = serde_json::from_str::<ScenarioPayload>(json)
        .map_err(|e| format!("Invalid API JSON payload: {e}"))?;
    api_request_from_payload(payload, ConfigArgs::default())
}
