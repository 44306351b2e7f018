use crate::models::network::Uid;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Header a validator uses to identify itself to a worker.
pub const VALIDATOR_UID_HEADER: &str = "x-validator-uid";

/// Size of one payload element (an f32).
const ELEMENT_BYTES: u64 = 4;

/// Dimensions of the synthetic tensor a worker sends back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct BenchmarkShape(pub Vec<usize>);

impl Default for BenchmarkShape {
    fn default() -> Self {
        Self(vec![15, 1024, 1024])
    }
}

impl BenchmarkShape {
    /// `None` when the product does not fit in a `u64`.
    pub fn element_count(&self) -> Option<u64> {
        self.0
            .iter()
            .try_fold(1u64, |count, d| count.checked_mul(u64::try_from(*d).ok()?))
    }

    pub fn payload_bytes(&self) -> Option<u64> {
        self.element_count()?.checked_mul(ELEMENT_BYTES)
    }
}

impl fmt::Display for BenchmarkShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.0.iter().map(|d| d.to_string()).collect();
        write!(f, "({})", dims.join(", "))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BenchmarkRequest {
    pub shape: BenchmarkShape,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WorkerStatus {
    pub version: String,
    pub job_id: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Offline,
    Idle,
    Benchmarking,
    Working,
}

impl JobState {
    pub fn from_job_id(job_id: i64) -> Self {
        match job_id {
            i64::MIN..=-1 => JobState::Offline,
            0 => JobState::Idle,
            1 => JobState::Benchmarking,
            _ => JobState::Working,
        }
    }

    pub fn job_id(&self) -> i64 {
        match self {
            JobState::Offline => -1,
            JobState::Idle => 0,
            JobState::Benchmarking => 1,
            JobState::Working => 2,
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobState::Offline => write!(f, "offline"),
            JobState::Idle => write!(f, "idle"),
            JobState::Benchmarking => write!(f, "benchmarking"),
            JobState::Working => write!(f, "working"),
        }
    }
}

impl WorkerStatus {
    pub fn job_state(&self) -> JobState {
        JobState::from_job_id(self.job_id)
    }

    /// Only workers that answered with a non-negative job id are grouped.
    pub fn is_available(&self) -> bool {
        self.job_state() != JobState::Offline
    }
}

/// One worker's outcome in a validator's benchmark run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BenchmarkEntry {
    Measured { elapsed_secs: f64, size_bytes: u64 },
    Unmeasured,
}

impl BenchmarkEntry {
    /// Bytes per second, if the worker was measured.
    pub fn throughput(&self) -> Option<f64> {
        match *self {
            BenchmarkEntry::Measured {
                elapsed_secs,
                size_bytes,
            } if elapsed_secs > 0.0 => Some(size_bytes as f64 / elapsed_secs),
            _ => None,
        }
    }
}

pub type BenchmarkResults = BTreeMap<Uid, BenchmarkEntry>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_shape_payload() {
        let shape = BenchmarkShape::default();
        assert_eq!(shape.element_count(), Some(15 * 1024 * 1024));
        assert_eq!(shape.payload_bytes(), Some(15 * 1024 * 1024 * 4));
        assert_eq!(shape.to_string(), "(15, 1024, 1024)");
    }

    #[test]
    fn test_overflowing_shape_has_no_size() {
        let shape: BenchmarkShape = serde_json::from_str(&format!("[{}, 8]", usize::MAX)).unwrap();
        assert_eq!(shape.element_count(), None);
        assert_eq!(shape.payload_bytes(), None);

        // fits as an element count, wraps once multiplied by the f32 width
        let shape = BenchmarkShape(vec![(1 << 62) + 1, 1]);
        assert_eq!(shape.element_count(), Some((1 << 62) + 1));
        assert_eq!(shape.payload_bytes(), None);
    }

    #[test]
    fn test_job_state_mapping() {
        assert_eq!(JobState::from_job_id(-1), JobState::Offline);
        assert_eq!(JobState::from_job_id(0), JobState::Idle);
        assert_eq!(JobState::from_job_id(1), JobState::Benchmarking);
        assert_eq!(JobState::from_job_id(7), JobState::Working);
        let status = WorkerStatus {
            version: "1.0.0".to_string(),
            job_id: -1,
        };
        assert!(!status.is_available());
    }

    #[test]
    fn test_unmeasured_has_no_throughput() {
        let measured = BenchmarkEntry::Measured {
            elapsed_secs: 2.0,
            size_bytes: 100,
        };
        assert_eq!(measured.throughput(), Some(50.0));
        assert_eq!(BenchmarkEntry::Unmeasured.throughput(), None);
    }

    #[test]
    fn test_results_round_trip_with_numeric_keys() {
        let mut results = BenchmarkResults::new();
        results.insert(12, BenchmarkEntry::Unmeasured);
        results.insert(
            3,
            BenchmarkEntry::Measured {
                elapsed_secs: 1.5,
                size_bytes: 10,
            },
        );
        let json = serde_json::to_string(&results).unwrap();
        let parsed: BenchmarkResults = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, results);
        assert!(json.contains("\"12\":{\"status\":\"unmeasured\"}"));
    }
}
