//! Job partitioning and proportional assignment
//!
//! A job over `[lower, upper)` is cut into exactly one sub-task per unit of
//! aggregate capacity. Those sub-tasks are then handed out to sessions as
//! contiguous runs of ascending index, in snapshot (registration) order, with
//! each session's share proportional to its capacity.

use crate::distributed::protocol::SubTask;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// How per-session shares are rounded to whole sub-tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AssignmentPolicy {
    /// Floor each share, then give leftover sub-tasks to the largest
    /// remainders (ties go to the earlier session)
    #[default]
    LargestRemainder,
    /// `ceil(c * T / C)` per session with a shared cursor; when the rounded
    /// quotas overshoot the pool, later sessions receive nothing
    CeilingQuota,
}

/// Sub-task indices handed to one session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignment {
    pub session_id: u64,
    pub tasks: Range<usize>,
}

/// Split `[lower, upper)` into `pieces` equal-width sub-tasks
///
/// Sub-task ids are the local indices `0..pieces`; the coordinator overwrites
/// them with global ids at dispatch. Bounds are derived from the index rather
/// than accumulated, and the last upper bound is pinned to `upper`, so the
/// pieces are contiguous and cover the interval exactly. An empty or inverted
/// interval, a non-positive step, or `pieces == 0` yields no sub-tasks.
pub fn partition(lower: f64, upper: f64, step: f64, pieces: usize) -> Vec<SubTask> {
    if pieces == 0 || !(upper > lower) || !(step > 0.0) {
        return Vec::new();
    }

    let width = (upper - lower) / pieces as f64;
    (0..pieces)
        .map(|i| {
            let task_lower = lower + i as f64 * width;
            let task_upper = if i == pieces - 1 {
                upper
            } else {
                lower + (i + 1) as f64 * width
            };
            SubTask {
                id: i as u64,
                lower: task_lower,
                upper: task_upper,
                step,
            }
        })
        .collect()
}

/// Number of sub-tasks each session should receive, in snapshot order
pub fn quotas(capacities: &[usize], total_tasks: usize, policy: AssignmentPolicy) -> Vec<usize> {
    let total_capacity: usize = capacities.iter().sum();
    if total_capacity == 0 || total_tasks == 0 {
        return vec![0; capacities.len()];
    }

    match policy {
        AssignmentPolicy::CeilingQuota => capacities
            .iter()
            .map(|&c| (c * total_tasks).div_ceil(total_capacity))
            .collect(),
        AssignmentPolicy::LargestRemainder => {
            let mut shares: Vec<usize> = capacities
                .iter()
                .map(|&c| c * total_tasks / total_capacity)
                .collect();
            let assigned: usize = shares.iter().sum();
            let leftover = total_tasks - assigned;

            let mut by_remainder: Vec<usize> = (0..capacities.len()).collect();
            // stable sort keeps snapshot order among equal remainders
            by_remainder.sort_by(|&a, &b| {
                let ra = capacities[a] * total_tasks % total_capacity;
                let rb = capacities[b] * total_tasks % total_capacity;
                rb.cmp(&ra)
            });
            for &idx in by_remainder.iter().take(leftover) {
                shares[idx] += 1;
            }
            shares
        }
    }
}

/// Assign `total_tasks` sub-task indices to sessions
///
/// `sessions` holds `(session_id, capacity)` in snapshot order. Every session
/// gets an entry, possibly with an empty range. A shared cursor walks the
/// pool in ascending index order and stops at `total_tasks`.
pub fn assign(
    sessions: &[(u64, usize)],
    total_tasks: usize,
    policy: AssignmentPolicy,
) -> Vec<Assignment> {
    let capacities: Vec<usize> = sessions.iter().map(|&(_, c)| c).collect();
    let quotas = quotas(&capacities, total_tasks, policy);

    let mut cursor = 0;
    sessions
        .iter()
        .zip(quotas)
        .map(|(&(session_id, _), quota)| {
            let start = cursor;
            let end = (cursor + quota).min(total_tasks);
            cursor = end;
            Assignment {
                session_id,
                tasks: start..end,
            }
        })
        .collect()
}
