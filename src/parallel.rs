use anyhow::{Context, Result};
use rayon::ThreadPoolBuilder;
use tracing::warn;

/// Worker bound for one fan-out stage (chromosome builds or phenotype
/// regressions). The bound never exceeds the number of independent units;
/// unset means the rayon global pool decides.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerBudget(Option<usize>);

impl WorkerBudget {
    pub fn for_units(cores: Option<usize>, units: usize) -> Self {
        let Some(cores) = cores else {
            return WorkerBudget(None);
        };
        let capped = cores.min(units.max(1));
        if cores > capped {
            warn!("Requested {cores} workers for {units} unit(s); using {capped}");
        }
        WorkerBudget(Some(capped))
    }

    pub fn workers(self) -> Option<usize> {
        self.0
    }

    /// Run the stage closure under this budget, inside a dedicated pool
    /// when bounded.
    pub fn run<T, F>(self, stage: &'static str, f: F) -> Result<T>
    where
        F: FnOnce() -> T + Send,
        T: Send,
    {
        match self.0 {
            Some(workers) => {
                let pool = ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .build()
                    .context(stage)?;
                Ok(pool.install(f))
            }
            None => Ok(f()),
        }
    }
}
