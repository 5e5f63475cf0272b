use tracing::{debug, warn};

use super::error::{EngineError, InsufficientReason};
use super::types::{GroupAggregate, MatchStatus, MixShare, ParsedLine};
use super::valuation::{LtvTable, ProductValue};

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum RateSource {
    Direct(f64),
    Derived { test_visitors: f64, group_count: usize },
}

pub fn resolve_conversion_rate(
    group_name: &str,
    total_count: f64,
    source: RateSource,
) -> Result<f64, EngineError> {
    let rate = match source {
        RateSource::Direct(rate) => rate,
        RateSource::Derived {
            test_visitors,
            group_count,
        } => {
            let visitors = if group_count == 0 {
                0.0
            } else {
                test_visitors / group_count as f64
            };
            if !(visitors.is_finite() && visitors > 0.0) {
                return Err(EngineError::insufficient(
                    group_name,
                    InsufficientReason::NoVisitors,
                ));
            }
            total_count / visitors
        }
    };

    if rate > 1.0 {
        warn!(group = group_name, rate, "conversion rate above 100%, clamping");
    }
    Ok(rate.clamp(0.0, 1.0))
}

pub fn aggregate_group(
    group_name: &str,
    rows: &[ParsedLine],
    ltv_table: &LtvTable,
    source: RateSource,
) -> Result<GroupAggregate, EngineError> {
    let total_count: f64 = rows.iter().map(|row| row.count).sum();
    if total_count <= 0.0 {
        return Err(EngineError::insufficient(
            group_name,
            InsufficientReason::NoSales,
        ));
    }
    let conversion_rate = resolve_conversion_rate(group_name, total_count, source)?;

    let mut mix: Vec<MixShare> = Vec::new();
    let mut blended_ltv = 0.0;
    let mut average_unit_price = 0.0;
    let mut average_first_year_price = 0.0;
    let mut average_renewal_price = 0.0;
    let mut effective_retention = 0.0;
    let mut unmatched_count = 0;

    for row in rows {
        let share = row.count / total_count;
        let value = row_value(row, ltv_table);
        if row.match_status == MatchStatus::NotFound {
            unmatched_count += 1;
        }

        blended_ltv += share * value.ltv;
        average_unit_price += share * row.matched_price;
        average_first_year_price += share * value.first_year_price;
        average_renewal_price += share * value.renewal_price;
        effective_retention += share * value.renewal_retention;

        match mix.iter_mut().find(|m| m.name == row.matched_name) {
            Some(existing) => existing.share += share,
            None => mix.push(MixShare {
                name: row.matched_name.clone(),
                share,
                ltv: value.ltv,
            }),
        }
    }

    debug!(
        group = group_name,
        total_count, conversion_rate, blended_ltv, unmatched_count, "aggregated group mix"
    );

    Ok(GroupAggregate {
        group_name: group_name.to_string(),
        total_count,
        conversion_rate,
        blended_ltv: blended_ltv.max(0.0),
        average_unit_price,
        average_first_year_price,
        average_renewal_price,
        effective_retention,
        unmatched_count,
        mix,
    })
}

fn row_value(row: &ParsedLine, ltv_table: &LtvTable) -> ProductValue {
    const ZERO: ProductValue = ProductValue {
        ltv: 0.0,
        first_year_price: 0.0,
        renewal_price: 0.0,
        renewal_retention: 0.0,
    };

    if row.match_status == MatchStatus::NotFound {
        return ZERO;
    }
    match ltv_table.get(&row.matched_name) {
        Some(value) => *value,
        None => {
            warn!(product = %row.matched_name, "matched product missing from valuation table");
            ZERO
        }
    }
}
