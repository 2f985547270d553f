use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::error::{ErrorKind, HarnessError, HarnessResult};
use crate::harness_error;

/// Owns the worker tasks of a load run.
#[derive(Debug, Default)]
pub struct WorkerPool {
    join_set: JoinSet<(usize, HarnessResult<()>)>,
}

impl WorkerPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawns worker `id`.
    pub fn spawn<F>(&mut self, id: usize, future: F)
    where
        F: Future<Output = HarnessResult<()>> + Send + 'static,
    {
        self.join_set.spawn(async move { (id, future.await) });
        debug!(worker = id, "spawned load worker");
    }

    pub fn len(&self) -> usize {
        self.join_set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.join_set.is_empty()
    }

    /// Waits for every worker and collects their errors.
    ///
    /// A panicking worker is reported as [`ErrorKind::WorkerPanic`]; the others keep running
    /// until they finish on their own.
    pub async fn wait_all(mut self) -> Vec<HarnessError> {
        let mut errors = Vec::new();

        while let Some(result) = self.join_set.join_next().await {
            match result {
                Ok((_, Ok(()))) => {}
                Ok((id, Err(err))) => {
                    error!(worker = id, error = %err, "load worker failed");
                    errors.push(err);
                }
                Err(join_err) => {
                    if join_err.is_cancelled() {
                        debug!("load worker was cancelled");
                    } else {
                        error!(error = %join_err, "load worker panicked");
                        errors.push(harness_error!(
                            ErrorKind::WorkerPanic,
                            "Load worker panicked",
                            join_err
                        ));
                    }
                }
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn errors_and_panics_are_collected() {
        let mut pool = WorkerPool::new();
        pool.spawn(0, async { Ok(()) });
        pool.spawn(1, async {
            Err(harness_error!(ErrorKind::SourceQueryFailed, "Insert failed"))
        });
        pool.spawn(2, async {
            let keys: Vec<u64> = Vec::new();
            assert!(!keys.is_empty(), "worker exploded");
            Ok(())
        });
        assert_eq!(pool.len(), 3);

        let errors = pool.wait_all().await;
        let mut kinds: Vec<_> = errors.iter().map(|err| err.kind()).collect();
        kinds.sort_by_key(|kind| format!("{kind:?}"));
        assert_eq!(kinds, vec![ErrorKind::SourceQueryFailed, ErrorKind::WorkerPanic]);
    }
}
