use std::sync::Arc;

use crate::errors::OptimizerError;

///
/// Fixed-size rayon pool used for the data-parallel stages (FFT lines, pointwise
/// filtering, sparse products). `None` runs on the global rayon pool.
///
#[derive(Clone, Default)]
pub struct WorkerPool
{
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl WorkerPool
{
    pub fn global() -> Self
    {
        Self { pool: None }
    }

    pub fn with_threads(num_threads: usize) -> Result<Self, OptimizerError>
    {
        if num_threads == 0
        {
            return Err(OptimizerError::invalid_configuration("numberOfThreads must be positive"));
        }
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .map_err(|e| OptimizerError::ThreadPool(e.to_string()))?;
        Ok(Self { pool: Some(Arc::new(pool)) })
    }

    pub fn num_threads(&self) -> usize
    {
        match &self.pool
        {
            Some(pool) => pool.current_num_threads(),
            None => rayon::current_num_threads(),
        }
    }

    #[inline]
    pub fn install<R: Send, OP: FnOnce() -> R + Send>(&self, op: OP) -> R
    {
        match &self.pool
        {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }
}

impl std::fmt::Debug for WorkerPool
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool").field("num_threads", &self.num_threads()).finish()
    }
}

#[test]
fn check_pool_sizes()
{
    let pool = WorkerPool::with_threads(2).unwrap();
    assert_eq!(pool.num_threads(), 2);
    assert_eq!(pool.install(|| rayon::current_num_threads()), 2);
    assert!(WorkerPool::with_threads(0).is_err());
}
