use tracing::{debug, warn};

use super::catalog::Catalog;
use super::types::{LineAnomaly, MatchStatus, ParsedLine};

const STRIPPED_COUNT_CHARS: [char; 7] = [',', '_', '$', '£', '€', '%', '\''];

#[derive(Clone, Debug, PartialEq)]
pub struct MatchOutcome {
    pub name: String,
    pub price: f64,
    pub status: MatchStatus,
    pub similarity: f64,
}

/// Resolves a typed product name: exact key, then case-insensitive key, then the single most
/// similar catalog name if it clears `threshold`.
pub fn match_product(raw_name: &str, catalog: &Catalog, threshold: f64) -> MatchOutcome {
    let name = raw_name.trim();

    if let Some(entry) = catalog.get(name) {
        return MatchOutcome {
            name: entry.name.clone(),
            price: entry.base_price,
            status: MatchStatus::Exact,
            similarity: 1.0,
        };
    }

    if let Some(entry) = catalog.get_ignore_case(name) {
        return MatchOutcome {
            name: entry.name.clone(),
            price: entry.base_price,
            status: MatchStatus::CaseFixed,
            similarity: 1.0,
        };
    }

    let lowered = name.to_lowercase();
    let mut best: Option<(usize, f64)> = None;
    for (idx, entry) in catalog.entries().iter().enumerate() {
        let score = similarity(&lowered, &entry.name.to_lowercase());
        // strict comparison keeps the first-listed entry on ties
        if best.is_none_or(|(_, best_score)| score > best_score) {
            best = Some((idx, score));
        }
    }

    match best {
        Some((idx, score)) if score >= threshold => {
            let entry = &catalog.entries()[idx];
            debug!(raw = name, matched = %entry.name, score, "fuzzy product match");
            MatchOutcome {
                name: entry.name.clone(),
                price: entry.base_price,
                status: MatchStatus::Fuzzy,
                similarity: score,
            }
        }
        _ => MatchOutcome {
            name: name.to_string(),
            price: 0.0,
            status: MatchStatus::NotFound,
            similarity: best.map(|(_, score)| score).unwrap_or(0.0),
        },
    }
}

/// Normalised Levenshtein ratio in `[0, 1]`; identical strings score 1.
pub fn similarity(a: &str, b: &str) -> f64 {
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f64 / max_len as f64
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0_usize; b.len() + 1];

    for i in 1..=a.len() {
        curr[0] = i;
        for j in 1..=b.len() {
            let cost = usize::from(a[i - 1] != b[j - 1]);
            curr[j] = (prev[j] + 1).min(curr[j - 1] + 1).min(prev[j - 1] + cost);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b.len()]
}

/// Splits one pasted row into `(name, count token)`: tab first, then comma, then the last
/// whitespace run.
pub fn split_line(line: &str) -> (&str, Option<&str>) {
    let line = line.trim();

    if let Some((name, rest)) = line.split_once('\t') {
        let count = rest.split('\t').map(str::trim).find(|t| !t.is_empty());
        return (name.trim(), count);
    }

    if let Some(idx) = line.rfind(char::is_whitespace) {
        let token = line[idx..].trim();
        if is_grouped_number(token) {
            let name = line[..idx].trim_end().trim_end_matches(',').trim_end();
            return (name, Some(token));
        }
    }

    if let Some((name, rest)) = line.split_once(',') {
        let rest = rest.trim();
        return (name.trim(), (!rest.is_empty()).then_some(rest));
    }

    match line.rfind(char::is_whitespace) {
        Some(idx) => (line[..idx].trim_end(), Some(line[idx..].trim())),
        None => (line, None),
    }
}

/// `1,200`, `$12,345.50`: a thousands-grouped count whose commas must not split the row.
fn is_grouped_number(token: &str) -> bool {
    let digits = token.trim_start_matches(['$', '£', '€']);
    let (whole, fraction) = match digits.split_once('.') {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (digits, None),
    };
    let all_digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());

    let mut groups = whole.split(',');
    let leading_ok = groups
        .next()
        .is_some_and(|first| all_digits(first) && first.len() <= 3);
    let mut rest = groups.peekable();
    let grouped = rest.peek().is_some() && rest.all(|g| all_digits(g) && g.len() == 3);

    leading_ok && grouped && fraction.is_none_or(all_digits)
}

pub fn parse_count(token: &str) -> Result<f64, LineAnomaly> {
    let cleaned: String = token
        .chars()
        .filter(|c| !c.is_whitespace() && !STRIPPED_COUNT_CHARS.contains(c))
        .collect();

    let value = cleaned
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| LineAnomaly::UnparsableCount {
            token: token.to_string(),
        })?;

    if value < 0.0 {
        return Err(LineAnomaly::NegativeCount {
            token: token.to_string(),
        });
    }
    Ok(value)
}

pub fn parse_line(line: &str, catalog: &Catalog, threshold: f64) -> ParsedLine {
    let (name, count_token) = split_line(line);
    let (count, anomaly) = match count_token.map(parse_count) {
        Some(Ok(count)) => (count, None),
        Some(Err(anomaly)) => (0.0, Some(anomaly)),
        None => (0.0, Some(LineAnomaly::MissingCount)),
    };
    if let Some(anomaly) = &anomaly {
        warn!(line, ?anomaly, "row count defaulted to zero");
    }

    let outcome = match_product(name, catalog, threshold);
    if outcome.status == MatchStatus::NotFound {
        warn!(product = name, "product not found in catalog");
    }

    ParsedLine {
        raw_name: name.to_string(),
        count,
        matched_name: outcome.name,
        matched_price: outcome.price,
        match_status: outcome.status,
        similarity: outcome.similarity,
        anomaly,
    }
}

pub fn parse_paste(text: &str, catalog: &Catalog, threshold: f64) -> Vec<ParsedLine> {
    text.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| parse_line(line, catalog, threshold))
        .collect()
}
