use std::num::NonZeroUsize;

use crate::error::{Result, TpsError};

pub const NUM_THREADS_KEY: &str = "NUM_THREADS";
pub const ALL_CPUS: &str = "ALL_CPUS";

/// How many threads may be used to solve the forward and reverse splines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumThreads {
    Count(NonZeroUsize),
    AllCpus,
}

impl Default for NumThreads {
    fn default() -> Self {
        NumThreads::Count(NonZeroUsize::MIN)
    }
}

impl NumThreads {
    /// Parses a positive decimal count or `ALL_CPUS`.
    pub fn parse(value: &str) -> Result<Self> {
        let value = value.trim();
        if value.eq_ignore_ascii_case(ALL_CPUS) {
            return Ok(NumThreads::AllCpus);
        }
        value
            .parse::<NonZeroUsize>()
            .map(NumThreads::Count)
            .map_err(|_| TpsError::InvalidOption {
                key: NUM_THREADS_KEY.to_string(),
                value: value.to_string(),
            })
    }

    pub fn resolve(self) -> usize {
        match self {
            NumThreads::Count(n) => n.get(),
            NumThreads::AllCpus => std::thread::available_parallelism().map_or(1, |n| n.get()),
        }
    }
}

/// Construction options for [`TpsTransformer`](crate::TpsTransformer).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TpsOptions {
    pub num_threads: NumThreads,
}

impl TpsOptions {
    pub fn with_num_threads(num_threads: NumThreads) -> Self {
        Self { num_threads }
    }

    /// Builds options from a string keyed option bag such as `NUM_THREADS=4`.
    /// Unknown keys are ignored.
    pub fn from_pairs<I, K, V>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut options = Self::default();
        for (key, value) in pairs {
            let (key, value) = (key.as_ref(), value.as_ref());
            if key.eq_ignore_ascii_case(NUM_THREADS_KEY) {
                options.num_threads = NumThreads::parse(value)?;
            } else {
                tracing::debug!("ignoring unknown TPS option {}={}", key, value);
            }
        }
        Ok(options)
    }
}
