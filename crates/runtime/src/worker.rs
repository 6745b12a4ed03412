//! Bounded pool for blocking handler bodies.
//!
//! Handler bodies call into backends and stores that may block, so they
//! never run on the dispatch tasks. The pool admits at most `size` jobs at
//! once; further jobs wait for a permit.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;

use crate::error::{Error, Result};

/// Default number of concurrent workers.
pub const DEFAULT_WORKERS: usize = 8;

#[derive(Clone)]
pub struct WorkerPool {
	permits: Arc<Semaphore>,
	size: usize,
	runtime: Handle,
}

impl std::fmt::Debug for WorkerPool {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("WorkerPool")
			.field("size", &self.size)
			.field("available", &self.permits.available_permits())
			.finish()
	}
}

impl WorkerPool {
	/// Creates a pool bound to the current tokio runtime.
	///
	/// # Errors
	///
	/// Returns [`Error::Worker`] when called outside a runtime.
	pub fn new(size: usize) -> Result<Self> {
		let runtime = Handle::try_current().map_err(|e| Error::Worker(e.to_string()))?;
		Ok(Self::with_handle(size, runtime))
	}

	pub fn with_handle(size: usize, runtime: Handle) -> Self {
		let size = size.max(1);
		Self {
			permits: Arc::new(Semaphore::new(size)),
			size,
			runtime,
		}
	}

	pub fn size(&self) -> usize {
		self.size
	}

	pub fn runtime(&self) -> &Handle {
		&self.runtime
	}

	/// Runs `job` on a blocking thread once a permit is free.
	pub async fn run<F, T>(&self, job: F) -> Result<T>
	where
		F: FnOnce() -> T + Send + 'static,
		T: Send + 'static,
	{
		let _permit = self
			.permits
			.clone()
			.acquire_owned()
			.await
			.map_err(|_| Error::Worker("worker pool closed".to_string()))?;
		tokio::task::spawn_blocking(job)
			.await
			.map_err(|e| Error::Worker(e.to_string()))
	}

	/// Stops admitting jobs. Jobs already running finish.
	pub fn close(&self) {
		self.permits.close();
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};
	use std::time::Duration;

	use super::*;

	#[tokio::test]
	async fn run_returns_job_result() {
		let pool = WorkerPool::new(2).unwrap();
		let value = pool.run(|| 40 + 2).await.unwrap();
		assert_eq!(value, 42);
	}

	#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
	async fn concurrency_is_bounded_by_size() {
		let pool = WorkerPool::new(2).unwrap();
		let running = Arc::new(AtomicUsize::new(0));
		let peak = Arc::new(AtomicUsize::new(0));

		let mut jobs = Vec::new();
		for _ in 0..6 {
			let running = running.clone();
			let peak = peak.clone();
			let pool = pool.clone();
			jobs.push(tokio::spawn(async move {
				pool.run(move || {
					let now = running.fetch_add(1, Ordering::SeqCst) + 1;
					peak.fetch_max(now, Ordering::SeqCst);
					std::thread::sleep(Duration::from_millis(20));
					running.fetch_sub(1, Ordering::SeqCst);
				})
				.await
			}));
		}
		for job in jobs {
			job.await.unwrap().unwrap();
		}

		assert!(peak.load(Ordering::SeqCst) <= 2);
	}

	#[tokio::test]
	async fn closed_pool_rejects_jobs() {
		let pool = WorkerPool::new(1).unwrap();
		pool.close();
		let err = pool.run(|| ()).await.unwrap_err();
		assert!(matches!(err, Error::Worker(_)));
	}

	#[tokio::test]
	async fn panicking_job_is_reported() {
		let pool = WorkerPool::new(1).unwrap();
		let err = pool.run(|| panic!("boom")).await.unwrap_err();
		assert!(matches!(err, Error::Worker(_)));
	}

	#[test]
	fn new_outside_runtime_fails() {
		assert!(WorkerPool::new(1).is_err());
	}
}
