//! Placement-leader scoring (§4.9 rule 4): a generalization of the
//! teacher's `compute_assignment` deterministic ownership rule
//! (`cluster::assignment`) from *partition* ownership by sorted node id to
//! *object placement* ownership by scored fitness, ties broken by
//! nodename.

/// Per-node resource stats read from C6, feeding the placement score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NodeStats {
    pub load_15m: f64,
    pub mem_avail: f64,
    pub swap_avail: f64,
    pub frozen: bool,
    pub avail_warn_or_err: bool,
}

/// A candidate node for placement leadership, carrying its name and the
/// stats its score is computed from.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub nodename: String,
    pub stats: NodeStats,
}

/// `(100/load_15m + 100+mem_avail + 2*(100+swap_avail)) / 7` per §4.9
/// rule 4. Guards against a zero or negative `load_15m` (an idle node)
/// by treating it as fully unloaded rather than dividing by zero.
#[must_use]
pub fn compute_score(stats: &NodeStats) -> f64 {
    let load_term = if stats.load_15m > 0.0 { 100.0 / stats.load_15m } else { 100.0 };
    let mem_term = 100.0 + stats.mem_avail;
    let swap_term = 2.0 * (100.0 + stats.swap_avail);
    (load_term + mem_term + swap_term) / 7.0
}

/// Nodes with `frozen` or `avail in {warn, err}` are ineligible for
/// placement leadership (§4.9 rule 4).
#[must_use]
pub fn is_eligible(stats: &NodeStats) -> bool {
    !stats.frozen && !stats.avail_warn_or_err
}

/// Sorts eligible candidates by `(score desc, nodename asc)` and returns
/// the winner, or `None` if no candidate is eligible.
#[must_use]
pub fn placement_leader(candidates: &[Candidate]) -> Option<&Candidate> {
    candidates
        .iter()
        .filter(|c| is_eligible(&c.stats))
        .max_by(|a, b| {
            let sa = compute_score(&a.stats);
            let sb = compute_score(&b.stats);
            sa.partial_cmp(&sb).unwrap_or(std::cmp::Ordering::Equal).then_with(|| b.nodename.cmp(&a.nodename))
        })
}
