//! Character-level similarity primitives used by the command resolver.
//!
//! Both functions operate on already-normalized character slices and are pure.

/// A run of consecutive matching characters found by [`find_consecutive_runs`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Run {
    /// Index into the query where the run starts.
    pub start: usize,
    /// Number of consecutive matching characters.
    pub len: usize,
}

/// Minimum run length accepted by [`find_consecutive_runs`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RunThreshold {
    /// An absolute number of characters.
    Fixed(usize),
    /// A fraction of the candidate length, rounded up.
    Fraction(f64),
}

impl RunThreshold {
    pub fn resolve(self, candidate_len: usize) -> usize {
        match self {
            Self::Fixed(n) => n,
            Self::Fraction(f) => (candidate_len as f64 * f).ceil() as usize,
        }
    }
}

/// Longest common subsequence length between `query` and `candidate`, plus
/// the earliest candidate index at which any match begins.
///
/// The offset is `candidate.len()` when nothing matches.
pub fn lcs(query: &[char], candidate: &[char]) -> (usize, usize) {
    let cols = candidate.len() + 1;
    let mut table = vec![0usize; (query.len() + 1) * cols];
    let mut first_match = candidate.len();

    for i in 1..=query.len() {
        for j in 1..=candidate.len() {
            let cell = if query[i - 1] == candidate[j - 1] {
                let extended = table[(i - 1) * cols + (j - 1)] + 1;
                if extended == 1 {
                    first_match = first_match.min(j - 1);
                }
                extended
            } else {
                table[(i - 1) * cols + j].max(table[i * cols + (j - 1)])
            };
            table[i * cols + j] = cell;
        }
    }

    (table[query.len() * cols + candidate.len()], first_match)
}

/// Scan for runs of consecutive characters shared by `query` and `candidate`.
///
/// Single greedy pass: a mismatch rewinds the query to one past the start of
/// the broken run and restarts the candidate from its beginning. Every run
/// that reaches `threshold` is recorded and tracking starts over from the
/// current positions, so one pass can report several disjoint runs. This is
/// a cheap heuristic, not an optimal alignment.
pub fn find_consecutive_runs(query: &[char], candidate: &[char], threshold: RunThreshold) -> Vec<Run> {
    let threshold = threshold.resolve(candidate.len()).max(1);
    let mut runs = Vec::new();
    let mut count = 0usize;
    let mut start = 0usize;
    let mut i = 0usize;
    let mut j = 0usize;

    while i < query.len() && j < candidate.len() {
        if query[i] == candidate[j] {
            if count == 0 {
                start = i;
            }
            count += 1;
            i += 1;
            j += 1;

            if count >= threshold {
                runs.push(Run { start, len: count });
                count = 0;
            }
        } else {
            i = i - count + 1;
            j = 0;
            count = 0;
        }
    }

    runs
}

pub fn has_consecutive_run(query: &[char], candidate: &[char], threshold: RunThreshold) -> bool {
    !find_consecutive_runs(query, candidate, threshold).is_empty()
}
