//! Candidate ranking
//!
//! Stable multi-key sort, best first:
//! 1. position of the candidate's format tag in the preferred order
//!    (unlisted tags after all listed ones)
//! 2. lossless before lossy
//! 3. reported speed, descending (unknown or 0 last)
//! 4. peer queue length, ascending (unknown last)
//!
//! Remaining ties keep discovery order.

use std::cmp::Reverse;

use crate::models::{Candidate, FormatTag};

/// Sort key for one candidate; smaller is better
type RankKey = (usize, bool, Reverse<u64>, u64);

fn rank_key(candidate: &Candidate, preferred_format_order: &[FormatTag]) -> RankKey {
    let format_rank = candidate
        .format_tag()
        .and_then(|tag| preferred_format_order.iter().position(|p| *p == tag))
        .unwrap_or(preferred_format_order.len());

    // Unknown speed ranks below every known speed
    let speed = candidate.reported_speed.unwrap_or(0);

    // Unknown queue ranks after every known queue length
    let queue = candidate
        .peer_queue_len
        .map(u64::from)
        .unwrap_or(u64::MAX);

    (format_rank, !candidate.is_lossless, Reverse(speed), queue)
}

/// Order candidates best-first.
///
/// With `allow_lossy_fallback` off, lossy candidates are removed before
/// sorting; an empty result then means only lossy sources exist and the
/// caller must fail the track.
pub fn rank(
    candidates: &[Candidate],
    preferred_format_order: &[FormatTag],
    allow_lossy_fallback: bool,
) -> Vec<Candidate> {
    let mut ranked: Vec<Candidate> = candidates
        .iter()
        .filter(|c| allow_lossy_fallback || c.is_lossless)
        .cloned()
        .collect();

    // sort_by_cached_key is stable
    ranked.sort_by_cached_key(|c| rank_key(c, preferred_format_order));
    ranked
}
