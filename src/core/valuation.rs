use std::collections::BTreeMap;

use serde::Serialize;
use tracing::debug;

use super::catalog::Catalog;
use super::types::{COHORT_YEARS, CatalogEntry, Valuation, YearPrice};

/// Retention for cohort years 2 through 5 when an entry carries no curve of its own.
pub const DEFAULT_RETENTION_CURVE_PCT: [f64; 4] = [80.0, 85.0, 88.0, 90.0];
pub const DEFAULT_PRICE_ESCALATION: f64 = 1.05;

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductValue {
    pub ltv: f64,
    pub first_year_price: f64,
    pub renewal_price: f64,
    pub renewal_retention: f64,
}

pub type LtvTable = BTreeMap<String, ProductValue>;

pub fn valuate(catalog: &Catalog, valuation: &Valuation) -> LtvTable {
    let table: LtvTable = catalog
        .entries()
        .iter()
        .map(|entry| {
            let value = match *valuation {
                Valuation::Simple {
                    global_retention,
                    use_product_retention,
                } => simple_value(entry, global_retention, use_product_retention),
                Valuation::CohortNpv { discount_rate } => cohort_value(entry, discount_rate),
            };
            (entry.name.clone(), value)
        })
        .collect();
    debug!(products = table.len(), ?valuation, "valuated catalog");
    table
}

pub fn simple_value(
    entry: &CatalogEntry,
    global_retention: f64,
    use_product_retention: bool,
) -> ProductValue {
    let first_year_price = entry.base_price;
    let renewal_price = entry.renewal_price.unwrap_or(first_year_price);
    let retention = if use_product_retention {
        entry.renewal_retention.unwrap_or(global_retention)
    } else {
        global_retention
    }
    .clamp(0.0, 1.0);

    ProductValue {
        ltv: first_year_price + renewal_price * retention,
        first_year_price,
        renewal_price,
        renewal_retention: retention,
    }
}

fn cohort_point(entry: &CatalogEntry, year: u32) -> (f64, f64) {
    let configured = entry
        .year_curve
        .as_ref()
        .and_then(|curve| curve.iter().find(|point| point.year == year));

    let (retention_pct, price) = match configured {
        Some(point) => (point.retention_pct, point.price),
        None => {
            let retention_pct = match year {
                0 | 1 => 100.0,
                _ => DEFAULT_RETENTION_CURVE_PCT[(year as usize - 2).min(3)],
            };
            let escalation = DEFAULT_PRICE_ESCALATION.powi(year.saturating_sub(1) as i32);
            (retention_pct, YearPrice::Multiplier(escalation))
        }
    };
    (retention_pct.clamp(0.0, 100.0), price.resolve(entry.base_price))
}

/// Surviving-cohort cash per year; year one is paid by every customer.
pub fn cohort_cash_flows(entry: &CatalogEntry) -> [f64; COHORT_YEARS as usize] {
    let mut flows = [0.0; COHORT_YEARS as usize];
    let mut surviving = 1.0;
    for year in 1..=COHORT_YEARS {
        let (retention_pct, price) = cohort_point(entry, year);
        if year > 1 {
            surviving *= retention_pct / 100.0;
        }
        flows[(year - 1) as usize] = surviving * price;
    }
    flows
}

pub fn npv(cash_flows: &[f64], discount_rate: f64) -> f64 {
    cash_flows
        .iter()
        .enumerate()
        .map(|(t, cash)| cash / (1.0 + discount_rate).powi(t as i32))
        .sum()
}

pub fn cohort_value(entry: &CatalogEntry, discount_rate: f64) -> ProductValue {
    let flows = cohort_cash_flows(entry);
    let (_, first_year_price) = cohort_point(entry, 1);
    let (renewal_pct, renewal_price) = cohort_point(entry, 2);
    ProductValue {
        ltv: npv(&flows, discount_rate).max(0.0),
        first_year_price,
        renewal_price,
        renewal_retention: renewal_pct / 100.0,
    }
}

/// Host-side memo: the table is reused only while the catalog and valuation are unchanged.
#[derive(Debug, Default)]
pub struct ValuationMemo {
    key: Option<(Catalog, Valuation)>,
    table: LtvTable,
}

impl ValuationMemo {
    pub fn get_or_compute(&mut self, catalog: &Catalog, valuation: &Valuation) -> &LtvTable {
        let fresh = matches!(&self.key, Some((c, v)) if c == catalog && v == valuation);
        if !fresh {
            self.table = valuate(catalog, valuation);
            self.key = Some((catalog.clone(), *valuation));
        }
        &self.table
    }

    pub fn is_cached(&self, catalog: &Catalog, valuation: &Valuation) -> bool {
        matches!(&self.key, Some((c, v)) if c == catalog && v == valuation)
    }
}
