//! Corpus-wide coverage aggregation and plateau tracking.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use ahash::{HashSet, HashSetExt};
use libafl_bolts::current_time;
use serde::Serialize;

use crate::execution::ExecutionResult;

/// Aggregate metrics over every sample folded into the tracker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorpusStatResult {
    pub total_edges: usize,
    pub total_branch_sites: usize,
    pub total_unique_instructions: usize,
    pub avg_pathlen_blocks: f64,
    pub max_pathlen_blocks: u64,
    pub avg_calldepth: f64,
    pub max_calldepth: u64,
}

/// The tracker itself is single-threaded; parallel workers must serialize
/// `add_sample` through this lock.
pub type SharedCorpusStats = Arc<Mutex<CorpusStatTracker>>;

#[derive(Debug)]
pub struct CorpusStatTracker {
    map_size: usize,
    edge_bitmap: Vec<u8>,
    branch_taken: Vec<u8>,
    branch_fallthrough: Vec<u8>,
    instruction_addresses: HashSet<u64>,
    total_instructions: u64,
    pathlen_blocks_sum: u64,
    pathlen_blocks_max: u64,
    calldepth_sum: u64,
    calldepth_max: u64,
    num_samples: u64,
    cumulative_execution_time: Duration,
    plateau_timeout: Duration,
    last_coverage_time: Duration,
}

impl CorpusStatTracker {
    pub fn new(map_size: usize, plateau_timeout: Duration) -> Self {
        Self {
            map_size,
            edge_bitmap: vec![0; map_size],
            branch_taken: vec![0; map_size],
            branch_fallthrough: vec![0; map_size],
            instruction_addresses: HashSet::new(),
            total_instructions: 0,
            pathlen_blocks_sum: 0,
            pathlen_blocks_max: 0,
            calldepth_sum: 0,
            calldepth_max: 0,
            num_samples: 0,
            cumulative_execution_time: Duration::ZERO,
            plateau_timeout,
            last_coverage_time: current_time(),
        }
    }

    pub fn into_shared(self) -> SharedCorpusStats {
        Arc::new(Mutex::new(self))
    }

    pub fn map_size(&self) -> usize {
        self.map_size
    }

    pub fn num_samples(&self) -> u64 {
        self.num_samples
    }

    pub fn cumulative_execution_time(&self) -> Duration {
        self.cumulative_execution_time
    }

    /// Fold one execution into the global state. Returns whether the sample
    /// covered an edge never seen before; new edges also refresh the
    /// plateau clock.
    pub fn add_sample(&mut self, sample: &ExecutionResult) -> bool {
        let mut new_edge_coverage = false;

        if let Some(edges) = &sample.coverage.edge_bitmap {
            debug_assert_eq!(self.map_size, edges.len(), "edge bitmap size mismatch");
            for (global, observed) in self.edge_bitmap.iter_mut().zip(edges) {
                if *observed != 0 && *global == 0 {
                    *global = 1;
                    new_edge_coverage = true;
                }
            }
        }
        if let Some(taken) = &sample.coverage.branch_taken_bitmap {
            for (global, observed) in self.branch_taken.iter_mut().zip(taken) {
                *global |= u8::from(*observed != 0);
            }
        }
        if let Some(fallthrough) = &sample.coverage.branch_fallthrough_bitmap {
            for (global, observed) in self.branch_fallthrough.iter_mut().zip(fallthrough) {
                *global |= u8::from(*observed != 0);
            }
        }
        if let Some(addresses) = &sample.coverage.instr_addresses {
            self.instruction_addresses.extend(addresses);
        }

        if new_edge_coverage {
            self.reset_time_since_last_coverage();
        }

        self.total_instructions += sample.coverage.total_instructions;
        self.pathlen_blocks_sum += sample.coverage.pathlen_blocks;
        self.pathlen_blocks_max = self.pathlen_blocks_max.max(sample.coverage.pathlen_blocks);
        self.calldepth_sum += sample.coverage.call_depth;
        self.calldepth_max = self.calldepth_max.max(sample.coverage.call_depth);
        self.cumulative_execution_time += sample.execution_time;
        self.num_samples += 1;

        new_edge_coverage
    }

    /// Aggregate metrics. Calling this on an empty tracker is a programmer
    /// error.
    pub fn get_result(&self) -> CorpusStatResult {
        assert!(
            self.num_samples > 0,
            "get_result requires at least one sample"
        );
        CorpusStatResult {
            total_edges: self.edge_bitmap.iter().filter(|&&b| b != 0).count(),
            total_branch_sites: self
                .branch_taken
                .iter()
                .zip(&self.branch_fallthrough)
                .filter(|(taken, fallthrough)| **taken != 0 || **fallthrough != 0)
                .count(),
            total_unique_instructions: self.instruction_addresses.len(),
            avg_pathlen_blocks: self.pathlen_blocks_sum as f64 / self.num_samples as f64,
            max_pathlen_blocks: self.pathlen_blocks_max,
            avg_calldepth: self.calldepth_sum as f64 / self.num_samples as f64,
            max_calldepth: self.calldepth_max,
        }
    }

    pub fn is_coverage_plateau(&self) -> bool {
        current_time() - self.last_coverage_time >= self.plateau_timeout
    }

    pub fn reset_time_since_last_coverage(&mut self) {
        self.last_coverage_time = current_time();
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::execution::{CoverageObservations, ExecutionResult};

    const MAP_SIZE: usize = 8;

    fn sample_with_edges(edges: &[usize]) -> ExecutionResult {
        let mut bitmap = vec![0u8; MAP_SIZE];
        for &edge in edges {
            bitmap[edge] = 1;
        }
        ExecutionResult {
            coverage: CoverageObservations {
                edge_bitmap: Some(bitmap),
                ..CoverageObservations::default()
            },
            ..ExecutionResult::default()
        }
    }

    fn tracker(plateau_timeout: Duration) -> CorpusStatTracker {
        CorpusStatTracker::new(MAP_SIZE, plateau_timeout)
    }

    #[test]
    fn edge_bits_are_monotonic() {
        let mut tracker = tracker(Duration::from_secs(60));
        assert!(tracker.add_sample(&sample_with_edges(&[1, 3])));
        assert_eq!(2, tracker.get_result().total_edges);

        // A sample covering a subset adds nothing and clears nothing.
        assert!(!tracker.add_sample(&sample_with_edges(&[3])));
        assert_eq!(2, tracker.get_result().total_edges);

        assert!(tracker.add_sample(&sample_with_edges(&[3, 5])));
        assert_eq!(3, tracker.get_result().total_edges);
    }

    #[test]
    fn new_edges_reset_the_plateau() {
        let mut tracker = tracker(Duration::from_millis(50));
        tracker.add_sample(&sample_with_edges(&[0]));
        assert!(!tracker.is_coverage_plateau());

        thread::sleep(Duration::from_millis(60));
        assert!(tracker.is_coverage_plateau());

        // Re-covering a known edge does not clear the plateau...
        tracker.add_sample(&sample_with_edges(&[0]));
        assert!(tracker.is_coverage_plateau());

        // ...but a new edge does.
        tracker.add_sample(&sample_with_edges(&[7]));
        assert!(!tracker.is_coverage_plateau());
    }

    #[test]
    fn branch_sites_count_taken_or_fallthrough() {
        let mut tracker = tracker(Duration::from_secs(60));
        let mut sample = ExecutionResult::default();
        let mut taken = vec![0u8; MAP_SIZE];
        let mut fallthrough = vec![0u8; MAP_SIZE];
        taken[0] = 1;
        taken[2] = 1;
        fallthrough[2] = 1;
        fallthrough[4] = 1;
        sample.coverage.branch_taken_bitmap = Some(taken);
        sample.coverage.branch_fallthrough_bitmap = Some(fallthrough);
        tracker.add_sample(&sample);
        assert_eq!(3, tracker.get_result().total_branch_sites);
    }

    #[test]
    fn pathlen_and_calldepth_aggregate() {
        let mut tracker = tracker(Duration::from_secs(60));
        for (pathlen, depth) in [(10, 2), (30, 6), (20, 1)] {
            let mut sample = ExecutionResult::default();
            sample.coverage.pathlen_blocks = pathlen;
            sample.coverage.call_depth = depth;
            tracker.add_sample(&sample);
        }
        let result = tracker.get_result();
        assert_eq!(20.0, result.avg_pathlen_blocks);
        assert_eq!(30, result.max_pathlen_blocks);
        assert_eq!(3.0, result.avg_calldepth);
        assert_eq!(6, result.max_calldepth);
    }

    #[test]
    fn instruction_addresses_are_unioned() {
        let mut tracker = tracker(Duration::from_secs(60));
        let mut sample = ExecutionResult::default();
        sample.coverage.instr_addresses = Some([0x1000, 0x1004].into_iter().collect());
        tracker.add_sample(&sample);
        let mut sample = ExecutionResult::default();
        sample.coverage.instr_addresses = Some([0x1004, 0x2000].into_iter().collect());
        tracker.add_sample(&sample);
        assert_eq!(3, tracker.get_result().total_unique_instructions);
    }

    #[test]
    fn samples_without_coverage_still_count() {
        let mut tracker = tracker(Duration::from_secs(60));
        let mut sample = ExecutionResult::default();
        sample.execution_time = Duration::from_millis(5);
        tracker.add_sample(&sample);
        assert_eq!(1, tracker.num_samples());
        assert_eq!(Duration::from_millis(5), tracker.cumulative_execution_time());
        assert_eq!(0, tracker.get_result().total_edges);
    }

    #[test]
    #[should_panic(expected = "at least one sample")]
    fn get_result_on_empty_tracker_panics() {
        tracker(Duration::from_secs(60)).get_result();
    }
}
