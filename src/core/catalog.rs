use std::collections::HashMap;

use super::error::EngineError;
use super::types::CatalogEntry;

/// Canonical product list. Lookups keep insertion order so similarity ties resolve to the
/// entry listed first.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    index: HashMap<String, usize>,
}

impl Catalog {
    pub fn new(entries: Vec<CatalogEntry>) -> Result<Self, EngineError> {
        let mut index = HashMap::with_capacity(entries.len());
        for (idx, entry) in entries.iter().enumerate() {
            validate_entry(entry)?;
            if index.insert(entry.name.clone(), idx).is_some() {
                return Err(EngineError::InvalidConfig(format!(
                    "duplicate catalog entry '{}'",
                    entry.name
                )));
            }
        }
        Ok(Self { entries, index })
    }

    pub fn from_prices<'a>(
        prices: impl IntoIterator<Item = (&'a str, f64)>,
    ) -> Result<Self, EngineError> {
        Self::new(
            prices
                .into_iter()
                .map(|(name, price)| CatalogEntry::new(name, price))
                .collect(),
        )
    }

    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.index.get(name).map(|&idx| &self.entries[idx])
    }

    pub fn get_ignore_case(&self, name: &str) -> Option<&CatalogEntry> {
        let lowered = name.to_lowercase();
        self.entries
            .iter()
            .find(|entry| entry.name.to_lowercase() == lowered)
    }

    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn validate_entry(entry: &CatalogEntry) -> Result<(), EngineError> {
    let invalid = |what: &str| {
        Err(EngineError::InvalidConfig(format!(
            "catalog entry '{}' has invalid {what}",
            entry.name
        )))
    };

    if entry.name.trim().is_empty() {
        return Err(EngineError::InvalidConfig(
            "catalog entry names must not be empty".to_string(),
        ));
    }
    if !entry.base_price.is_finite() || entry.base_price < 0.0 {
        return invalid("base price");
    }
    if entry
        .renewal_price
        .is_some_and(|price| !price.is_finite() || price < 0.0)
    {
        return invalid("renewal price");
    }
    if entry
        .renewal_retention
        .is_some_and(|retention| !(0.0..=1.0).contains(&retention))
    {
        return invalid("renewal retention");
    }
    if let Some(curve) = &entry.year_curve {
        for point in curve {
            if point.year == 0 {
                return invalid("cohort year (years start at 1)");
            }
            if !(0.0..=100.0).contains(&point.retention_pct) {
                return invalid("cohort retention");
            }
            let price = point.price.resolve(entry.base_price);
            if !price.is_finite() || price < 0.0 {
                return invalid("cohort price");
            }
        }
    }
    Ok(())
}

pub fn default_catalog() -> Catalog {
    let entries = vec![
        CatalogEntry::new("Basic Cover", 150.0).with_renewal(175.0, 0.75),
        CatalogEntry::new("Gold Cover", 300.0).with_renewal(350.0, 0.85),
        CatalogEntry::new("Platinum Cover", 500.0).with_renewal(550.0, 0.95),
    ];
    let index = entries
        .iter()
        .enumerate()
        .map(|(idx, entry)| (entry.name.clone(), idx))
        .collect();
    Catalog { entries, index }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{CohortYear, YearPrice};

    #[test]
    fn default_catalog_is_valid_and_ordered() {
        let catalog = default_catalog();
        let rebuilt = Catalog::new(catalog.entries().to_vec()).expect("default must validate");
        assert_eq!(rebuilt, catalog);
        let names: Vec<_> = catalog.entries().iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["Basic Cover", "Gold Cover", "Platinum Cover"]);
    }

    #[test]
    fn lookup_is_case_sensitive_unless_requested() {
        let catalog = Catalog::from_prices([("Gold Cover", 300.0)]).expect("valid catalog");
        assert!(catalog.get("gold cover").is_none());
        assert_eq!(
            catalog.get_ignore_case("GOLD COVER").map(|e| e.base_price),
            Some(300.0)
        );
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = Catalog::from_prices([("A", 1.0), ("A", 2.0)]).expect_err("duplicate");
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn rejects_negative_prices_and_bad_curves() {
        assert!(Catalog::from_prices([("A", -1.0)]).is_err());

        let entry = CatalogEntry::new("A", 10.0).with_year_curve(vec![CohortYear {
            year: 2,
            retention_pct: 120.0,
            price: YearPrice::Multiplier(1.0),
        }]);
        assert!(Catalog::new(vec![entry]).is_err());
    }
}
