//! Comparing the harness's bookkeeping against a server snapshot.
//!
//! Client lists are compared as multisets: order never matters, but a client
//! reported twice is not the same as a client reported once.

use crate::station::{StationDatabase, StationId};
use std::collections::HashMap;
use std::hash::Hash;

/// True iff `expected` and `actual` hold the same elements with the same counts.
pub fn matches<T, E, A>(expected: E, actual: A) -> bool
where
    T: Eq + Hash,
    E: IntoIterator<Item = T>,
    A: IntoIterator<Item = T>,
{
    let mut counts: HashMap<T, isize> = HashMap::new();
    for item in expected {
        *counts.entry(item).or_default() += 1;
    }
    for item in actual {
        *counts.entry(item).or_default() -= 1;
    }
    counts.values().all(|&n| n == 0)
}

/// What one client slot expects the server to report
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expectation {
    pub slot: usize,
    pub station: StationId,
    pub client: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationMismatch {
    pub station: StationId,
    pub expected: Vec<String>,
    pub actual: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerificationReport {
    pub matched: Vec<StationId>,
    pub mismatched: Vec<StationMismatch>,
    /// Expectations naming a station id the catalog does not have
    pub out_of_catalog: Vec<Expectation>,
}

impl VerificationReport {
    pub fn is_consistent(&self) -> bool {
        self.mismatched.is_empty()
    }
}

/// Compares every catalog station in `db` against `expectations`.
///
/// Stations `0..catalog_len` are all checked, including ones missing from the
/// dump, which count as empty.
pub fn verify_snapshot(
    db: &StationDatabase,
    expectations: &[Expectation],
    catalog_len: usize,
) -> VerificationReport {
    let mut report = VerificationReport::default();
    let mut expected: HashMap<StationId, Vec<String>> = HashMap::new();

    for expectation in expectations {
        if usize::from(expectation.station) < catalog_len {
            expected
                .entry(expectation.station)
                .or_default()
                .push(expectation.client.clone());
        } else {
            report.out_of_catalog.push(expectation.clone());
        }
    }

    for index in 0..catalog_len {
        let Ok(id) = StationId::try_from(index) else {
            break;
        };
        let want = expected.remove(&id).unwrap_or_default();
        let got = db.clients_of(id);
        if matches(want.iter().map(String::as_str), got.iter().map(String::as_str)) {
            report.matched.push(id);
        } else {
            report.mismatched.push(StationMismatch {
                station: id,
                expected: want,
                actual: got.to_vec(),
            });
        }
    }

    report
}
