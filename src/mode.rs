//! Execution modes for `map`, `filter` and `for_each` stages.

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;
use std::thread;

use crate::error::FlowError;

/// Upstream elements pulled per worker for each parallel batch.
pub const BATCH_PER_WORKER: usize = 4;

/// Upper bound on the elements pulled for one parallel batch, whatever the
/// worker bound.
pub const MAX_BATCH: usize = 1024;

/// How a stage applies its function to the elements it pulls.
///
/// Selected per call, so stages of one pipeline may use different modes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExecMode {
    /// Apply in order on the calling thread as elements are pulled.
    #[default]
    Sequential,
    /// Apply each batch across a worker pool of at most `max_workers`
    /// threads; results are released in input order.
    Parallel { max_workers: NonZeroUsize },
    /// Drain the whole input into a numeric array and apply the stage over
    /// it in one pass.
    ///
    /// The stage function is still called once per element, through
    /// `Array1::mapv`. Use `Pipeline::map_array` for a kernel that works on
    /// the whole array.
    Vectorized,
}

impl ExecMode {
    /// Parallel mode with an explicit worker bound. Zero workers is rejected.
    pub fn parallel(max_workers: usize) -> Result<Self, FlowError> {
        NonZeroUsize::new(max_workers)
            .map(|max_workers| ExecMode::Parallel { max_workers })
            .ok_or_else(|| FlowError::invalid("parallel", "max_workers must be positive"))
    }

    /// Parallel mode sized to the machine's available parallelism.
    pub fn parallel_default() -> Self {
        let max_workers = thread::available_parallelism().unwrap_or(NonZeroUsize::MIN);
        ExecMode::Parallel { max_workers }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExecMode::Sequential => "sequential",
            ExecMode::Parallel { .. } => "parallel",
            ExecMode::Vectorized => "vectorized",
        }
    }

    /// The worker bound; `None` outside parallel mode.
    pub fn max_workers(&self) -> Option<usize> {
        match self {
            ExecMode::Parallel { max_workers } => Some(max_workers.get()),
            _ => None,
        }
    }

    pub(crate) fn batch_size(max_workers: usize) -> usize {
        max_workers.saturating_mul(BATCH_PER_WORKER).min(MAX_BATCH)
    }
}

impl fmt::Display for ExecMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecMode::Parallel { max_workers } => write!(f, "parallel:{max_workers}"),
            other => f.write_str(other.name()),
        }
    }
}

/// Parses `sequential`, `parallel`, `parallel:N` and `vectorized`
/// (case-insensitive).
impl FromStr for ExecMode {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        match lower.split_once(':') {
            Some(("parallel", workers)) => {
                let n: usize = workers.trim().parse().map_err(|_| {
                    FlowError::invalid("mode", format!("invalid worker count {workers:?}"))
                })?;
                ExecMode::parallel(n)
            }
            Some(_) => Err(FlowError::invalid("mode", format!("unknown mode {s:?}"))),
            None => match lower.as_str() {
                "sequential" | "seq" => Ok(ExecMode::Sequential),
                "parallel" => Ok(ExecMode::parallel_default()),
                "vectorized" => Ok(ExecMode::Vectorized),
                _ => Err(FlowError::invalid("mode", format!("unknown mode {s:?}"))),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_sequential() {
        assert_eq!(ExecMode::default(), ExecMode::Sequential);
        assert_eq!(ExecMode::default().max_workers(), None);
    }

    #[test]
    fn test_parallel_rejects_zero_workers() {
        assert!(matches!(
            ExecMode::parallel(0),
            Err(FlowError::InvalidArgument { op: "parallel", .. })
        ));
        assert_eq!(ExecMode::parallel(4).unwrap().max_workers(), Some(4));
    }

    #[test]
    fn test_parse_modes() {
        assert_eq!("sequential".parse::<ExecMode>().unwrap(), ExecMode::Sequential);
        assert_eq!("VECTORIZED".parse::<ExecMode>().unwrap(), ExecMode::Vectorized);
        assert_eq!(
            "parallel:3".parse::<ExecMode>().unwrap(),
            ExecMode::parallel(3).unwrap()
        );
        assert_eq!("parallel".parse::<ExecMode>().unwrap().name(), "parallel");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("parallel:0".parse::<ExecMode>().is_err());
        assert!("parallel:x".parse::<ExecMode>().is_err());
        assert!("threads:4".parse::<ExecMode>().is_err());
        assert!("fast".parse::<ExecMode>().is_err());
    }

    #[test]
    fn test_display_round_trips_parallel() {
        let mode = ExecMode::parallel(6).unwrap();
        assert_eq!(mode.to_string(), "parallel:6");
        assert_eq!(mode.to_string().parse::<ExecMode>().unwrap(), mode);
    }

    #[test]
    fn test_batch_size_scales_with_workers() {
        assert_eq!(ExecMode::batch_size(3), 3 * BATCH_PER_WORKER);
    }

    #[test]
    fn test_batch_size_is_capped() {
        assert_eq!(ExecMode::batch_size(1 << 40), MAX_BATCH);
        assert_eq!(ExecMode::batch_size(usize::MAX), MAX_BATCH);
    }
}
