use regex::Regex;
use std::sync::OnceLock;

use crate::{Result, ToolkitError};

fn index_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"[【\[]\s*[Pp]\s*(\d+)\s*[】\]]").expect("episode token pattern is valid")
    })
}

/// Extract the episode index from a filename like `【P12】title.txt` or
/// `[p 12] title.txt`. Absence of a token is a normal result, not a failure;
/// digit runs too large for `u32` also count as "no index".
pub fn extract_index(name: &str) -> Option<u32> {
    let caps = index_pattern().captures(name)?;
    caps[1].parse::<u32>().ok()
}

/// One segment of a natural-order sort key.
///
/// Digit runs compare as numbers, everything else as lowercased text, so
/// `file2` sorts before `file10`. Variant order makes a digit run sort before
/// text where the two ever line up against each other.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum NaturalPart {
    Number(u128),
    Text(String),
}

/// Split a name into alternating digit and non-digit runs for natural-order
/// comparison. Digit runs longer than a `u128` saturate, which keeps the key
/// total and deterministic.
pub fn natural_key(name: &str) -> Vec<NaturalPart> {
    let mut parts = Vec::new();
    let mut run = String::new();
    let mut run_is_digit = false;

    for ch in name.chars() {
        let is_digit = ch.is_ascii_digit();
        if !run.is_empty() && is_digit != run_is_digit {
            parts.push(flush_run(&run, run_is_digit));
            run.clear();
        }
        run_is_digit = is_digit;
        run.push(ch);
    }
    if !run.is_empty() {
        parts.push(flush_run(&run, run_is_digit));
    }
    parts
}

fn flush_run(run: &str, is_digit: bool) -> NaturalPart {
    if is_digit {
        let value = run.bytes().fold(0u128, |acc, b| {
            acc.saturating_mul(10).saturating_add(u128::from(b - b'0'))
        });
        NaturalPart::Number(value)
    } else {
        NaturalPart::Text(run.to_lowercase())
    }
}

/// Inclusive episode range filter. Validated on construction, before any
/// scanning happens; an inverted range is a configuration error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRange {
    pub min: Option<u32>,
    pub max: Option<u32>,
}

impl IndexRange {
    pub fn new(min: Option<u32>, max: Option<u32>) -> Result<Self> {
        if let (Some(lo), Some(hi)) = (min, max) {
            if lo > hi {
                return Err(ToolkitError::InvalidRange(format!(
                    "lower bound P{lo} exceeds upper bound P{hi}"
                ))
                .into());
            }
        }
        Ok(Self { min, max })
    }

    /// A range with no bounds accepts everything.
    pub fn unbounded() -> Self {
        Self { min: None, max: None }
    }

    pub fn contains(&self, index: u32) -> bool {
        if let Some(lo) = self.min {
            if index < lo {
                return false;
            }
        }
        if let Some(hi) = self.max {
            if index > hi {
                return false;
            }
        }
        true
    }

    pub fn filter<I: IntoIterator<Item = u32>>(&self, indices: I) -> Vec<u32> {
        indices.into_iter().filter(|i| self.contains(*i)).collect()
    }
}
