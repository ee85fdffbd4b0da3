//! Compact integer-set notation ("0-3,7,9-10").
//!
//! Idsets name execution-target ranks and per-pool logical ids on the wire:
//! resource-acquire up/down sets, R-set `children` maps, and the stats
//! by-rank breakdown all use this notation.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdsetError {
    #[error("empty idset element")]
    EmptyElement,

    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("descending range: {0}-{1}")]
    DescendingRange(u64, u64),
}

/// Parses "0-3,7" into an ordered id set. Whitespace around elements is
/// ignored; an empty string parses to the empty set.
pub fn parse(s: &str) -> Result<BTreeSet<u64>, IdsetError> {
    let mut ids = BTreeSet::new();
    let trimmed = s.trim();
    if trimmed.is_empty() {
        return Ok(ids);
    }
    for elem in trimmed.split(',') {
        let elem = elem.trim();
        if elem.is_empty() {
            return Err(IdsetError::EmptyElement);
        }
        match elem.split_once('-') {
            Some((lo, hi)) => {
                let lo = parse_id(lo)?;
                let hi = parse_id(hi)?;
                if lo > hi {
                    return Err(IdsetError::DescendingRange(lo, hi));
                }
                ids.extend(lo..=hi);
            }
            None => {
                ids.insert(parse_id(elem)?);
            }
        }
    }
    Ok(ids)
}

fn parse_id(s: &str) -> Result<u64, IdsetError> {
    s.trim()
        .parse::<u64>()
        .map_err(|_| IdsetError::InvalidId(s.trim().to_owned()))
}

/// Encodes ids into the ranged notation. Consecutive runs collapse into
/// "lo-hi"; the input need not be sorted or unique.
pub fn encode<I: IntoIterator<Item = u64>>(ids: I) -> String {
    let sorted: BTreeSet<u64> = ids.into_iter().collect();
    let mut out = String::new();
    let mut run: Option<(u64, u64)> = None;
    for id in sorted {
        match run {
            Some((lo, hi)) if id == hi + 1 => run = Some((lo, id)),
            Some((lo, hi)) => {
                push_run(&mut out, lo, hi);
                run = Some((id, id));
            }
            None => run = Some((id, id)),
        }
    }
    if let Some((lo, hi)) = run {
        push_run(&mut out, lo, hi);
    }
    out
}

fn push_run(out: &mut String, lo: u64, hi: u64) {
    if !out.is_empty() {
        out.push(',');
    }
    if lo == hi {
        let _ = write!(out, "{lo}");
    } else {
        let _ = write!(out, "{lo}-{hi}");
    }
}
