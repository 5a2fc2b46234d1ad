//! Bounded worker pool for per-tile work.

use rayon::ThreadPool;

use crate::error::{Result, TileGridError};

/// Build a pool with `workers` threads (at least one).
///
/// # Errors
/// Returns `Io` if the OS refuses to spawn the threads.
pub fn worker_pool(workers: usize) -> Result<ThreadPool> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(workers.max(1))
        .thread_name(|i| format!("tilegrid-worker-{i}"))
        .build()
        .map_err(|e| TileGridError::Io(std::io::Error::other(e.to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_size() {
        let pool = worker_pool(3).unwrap();
        assert_eq!(pool.current_num_threads(), 3);
        assert_eq!(worker_pool(0).unwrap().current_num_threads(), 1);
    }
}
