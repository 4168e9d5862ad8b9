//! Exponential backoff helper shared by the reporting client (spec §4.11)
//! and any other component that retries a transient failure.

use std::time::Duration;

/// Fixed backoff schedule used by the reporting client: 1s, 2s, 4s (spec
/// §4.11 "Network/5xx errors are retried up to 3x with exponential
/// backoff").
pub const REPORTING_BACKOFF: [Duration; 3] =
	[Duration::from_secs(1), Duration::from_secs(2), Duration::from_secs(4)];

/// Runs `f` up to `delays.len() + 1` times, sleeping `delays[attempt]`
/// between attempts, retrying only while `should_retry` returns true for the
/// error. Returns the last error if every attempt fails.
pub async fn retry_with_backoff<T, E, F, Fut, R>(
	delays: &[Duration],
	mut f: F,
	should_retry: R,
) -> Result<T, E>
where
	F: FnMut() -> Fut,
	Fut: std::future::Future<Output = Result<T, E>>,
	R: Fn(&E) -> bool,
{
	let mut attempt = 0usize;
	loop {
		match f().await {
			Ok(v) => return Ok(v),
			Err(e) if attempt < delays.len() && should_retry(&e) => {
				tokio::time::sleep(delays[attempt]).await;
				attempt += 1;
			},
			Err(e) => return Err(e),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};

	#[tokio::test(start_paused = true)]
	async fn retries_until_success_within_budget() {
		let calls = AtomicUsize::new(0);
		let delays = [Duration::from_millis(1), Duration::from_millis(1)];
		let result: Result<u32, &str> = retry_with_backoff(
			&delays,
			|| {
				let n = calls.fetch_add(1, Ordering::SeqCst);
				async move { if n < 2 { Err("boom") } else { Ok(42) } }
			},
			|_| true,
		)
		.await;
		assert_eq!(result, Ok(42));
		assert_eq!(calls.load(Ordering::SeqCst), 3);
	}

	#[tokio::test(start_paused = true)]
	async fn gives_up_after_exhausting_delays() {
		let delays = [Duration::from_millis(1)];
		let result: Result<u32, &str> =
			retry_with_backoff(&delays, || async { Err("boom") }, |_| true).await;
		assert_eq!(result, Err("boom"));
	}

	#[tokio::test]
	async fn does_not_retry_when_should_retry_is_false() {
		let calls = AtomicUsize::new(0);
		let delays = [Duration::from_millis(1)];
		let result: Result<u32, &str> = retry_with_backoff(
			&delays,
			|| {
				calls.fetch_add(1, Ordering::SeqCst);
				async { Err("schema error") }
			},
			|_| false,
		)
		.await;
		assert_eq!(result, Err("schema error"));
		assert_eq!(calls.load(Ordering::SeqCst), 1);
	}
}
