//! Worker-side local executor
//!
//! A worker receives one sub-task at a time and fans it out across its own
//! declared capacity: the sub-task interval is split into `capacity`
//! equal-width ranges, each range is integrated on its own thread, and the
//! partial sums are joined before the result goes back to the coordinator.

pub mod kernel;

use crate::distributed::protocol::SubTask;
use anyhow::Result;
use kernel::{midpoint, Integrand};
use std::sync::Arc;

/// Runs sub-tasks across `capacity` local threads
pub struct LocalExecutor {
    capacity: usize,
    kernel: Arc<dyn Integrand>,
}

impl LocalExecutor {
    /// Create an executor; a capacity of 0 is raised to 1
    pub fn new(capacity: usize, kernel: Arc<dyn Integrand>) -> Self {
        Self {
            capacity: capacity.max(1),
            kernel,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Local `(lower, upper)` ranges for a sub-task, last one pinned to `upper`
    pub fn local_ranges(&self, task: &SubTask) -> Vec<(f64, f64)> {
        let width = task.width() / self.capacity as f64;
        (0..self.capacity)
            .map(|i| {
                let lower = task.lower + i as f64 * width;
                let upper = if i == self.capacity - 1 {
                    task.upper
                } else {
                    task.lower + (i + 1) as f64 * width
                };
                (lower, upper)
            })
            .collect()
    }

    /// Integrate one sub-task, blocking until every local range has finished
    pub fn run(&self, task: &SubTask) -> Result<f64> {
        if !(task.upper > task.lower) || !(task.step > 0.0) {
            return Ok(0.0);
        }

        let ranges = self.local_ranges(task);
        let kernel: &dyn Integrand = self.kernel.as_ref();
        let step = task.step;

        let partials = crossbeam::thread::scope(|s| {
            let handles: Vec<_> = ranges
                .iter()
                .map(|&(lower, upper)| s.spawn(move |_| midpoint(kernel, lower, upper, step)))
                .collect();

            handles
                .into_iter()
                .map(|h| h.join())
                .collect::<Vec<_>>()
        })
        .map_err(|_| anyhow::anyhow!("Local range thread panicked"))?;

        let mut total = 0.0;
        for partial in partials {
            total += partial.map_err(|_| anyhow::anyhow!("Local range thread panicked"))?;
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel::InverseLog;

    fn task(lower: f64, upper: f64, step: f64) -> SubTask {
        SubTask {
            id: 0,
            lower,
            upper,
            step,
        }
    }

    #[test]
    fn test_zero_capacity_raised_to_one() {
        let exec = LocalExecutor::new(0, Arc::new(InverseLog));
        assert_eq!(exec.capacity(), 1);
    }

    #[test]
    fn test_local_ranges_cover_interval() {
        let exec = LocalExecutor::new(3, Arc::new(InverseLog));
        let ranges = exec.local_ranges(&task(2.0, 3.0, 0.01));

        assert_eq!(ranges.len(), 3);
        assert_eq!(ranges[0].0, 2.0);
        assert_eq!(ranges[2].1, 3.0);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].1, pair[1].0);
        }
        let width: f64 = ranges.iter().map(|(l, u)| u - l).sum();
        assert!((width - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_local_ranges_match_partition_boundaries() {
        let exec = LocalExecutor::new(3, Arc::new(InverseLog));
        let ranges = exec.local_ranges(&task(2.0, 3.0, 0.01));
        let pieces = crate::distributed::partition::partition(2.0, 3.0, 0.01, 3);

        let bounds: Vec<(f64, f64)> = pieces.iter().map(|t| (t.lower, t.upper)).collect();
        assert_eq!(ranges, bounds);
        assert_eq!(ranges[1].1.to_bits(), ranges[2].0.to_bits());
    }

    #[test]
    fn test_run_matches_single_threaded_midpoint() {
        let exec = LocalExecutor::new(4, Arc::new(InverseLog));
        let parallel = exec.run(&task(2.0, 4.0, 0.01)).unwrap();
        let serial = midpoint(&InverseLog, 2.0, 4.0, 0.01);

        assert!((parallel - serial).abs() < 1e-6, "{} vs {}", parallel, serial);
    }

    #[test]
    fn test_run_with_custom_kernel() {
        let exec = LocalExecutor::new(2, Arc::new(|x: f64| x));
        // x^2/2 over [0, 2] = 2
        let result = exec.run(&task(0.0, 2.0, 0.5)).unwrap();
        assert!((result - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_run_degenerate_task() {
        let exec = LocalExecutor::new(2, Arc::new(InverseLog));
        assert_eq!(exec.run(&task(4.0, 2.0, 0.01)).unwrap(), 0.0);
        assert_eq!(exec.run(&task(2.0, 2.0, 0.01)).unwrap(), 0.0);
        assert_eq!(exec.run(&task(2.0, 4.0, 0.0)).unwrap(), 0.0);
        assert_eq!(exec.run(&task(2.0, 4.0, -1.0)).unwrap(), 0.0);
    }
}
