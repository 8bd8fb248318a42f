//! Host port selection for model containers

use crate::error::{PredictError, PredictResult};
use rand::Rng;
use std::net::TcpListener;
use std::ops::Range;

/// Find a free port in `range`, starting at `search_start` and wrapping
/// around to `range.start` before giving up.
///
/// A `search_start` outside the range starts the search at `range.start`.
pub fn find_free_port_in_range(range: Range<u16>, search_start: u16) -> Option<u16> {
    if range.is_empty() {
        return None;
    }
    let start = if range.contains(&search_start) {
        search_start
    } else {
        range.start
    };

    (start..range.end)
        .chain(range.start..start)
        .find(|&port| is_port_free(port))
}

/// Random starting point inside `range`, so concurrent predictors rarely race
/// for the same port
pub fn random_search_start(range: &Range<u16>) -> u16 {
    if range.is_empty() {
        return range.start;
    }
    rand::thread_rng().gen_range(range.clone())
}

/// Pick a free port from a random point in `range`
pub fn allocate_port(range: Range<u16>) -> PredictResult<u16> {
    let search_start = random_search_start(&range);
    find_free_port_in_range(range.clone(), search_start).ok_or(PredictError::PortAllocation {
        start: range.start,
        end: range.end,
    })
}

fn is_port_free(port: u16) -> bool {
    TcpListener::bind(("0.0.0.0", port)).is_ok()
}
