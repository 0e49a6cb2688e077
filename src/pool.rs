use crate::report::{CheckResult, CheckStatus};
use futures::stream::{self, StreamExt};
use std::future::Future;
use std::time::Duration;
use tokio::time;

/// Runs one probe per target with at most `concurrency` in flight, each
/// bounded by `timeout`. A probe that exceeds its deadline is cancelled and
/// replaced by a single `timeout` result for its target; other in-flight
/// probes are unaffected. Every target yields exactly one result.
pub async fn run_probes<T, F, Fut>(
    check: &str,
    targets: Vec<T>,
    concurrency: usize,
    timeout: Duration,
    probe: F,
) -> Vec<CheckResult>
where
    F: Fn(T) -> Fut,
    Fut: Future<Output = CheckResult>,
    T: TargetId,
{
    stream::iter(targets.into_iter().map(|target| {
        let id = target.target_id();
        let fut = probe(target);
        async move {
            match time::timeout(timeout, fut).await {
                Ok(result) => result,
                Err(_) => CheckResult::new(check, id, CheckStatus::Timeout)
                    .with_message(format!("probe exceeded {}s", timeout.as_secs())),
            }
        }
    }))
    .buffer_unordered(concurrency.max(1))
    .collect()
    .await
}

/// Stable string key identifying a probe target in its CheckResult.
pub trait TargetId {
    fn target_id(&self) -> String;
}

impl TargetId for String {
    fn target_id(&self) -> String {
        self.clone()
    }
}

impl TargetId for &str {
    fn target_id(&self) -> String {
        (*self).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn hung_probe_yields_single_timeout_result() {
        let targets = vec!["/mnt/alive".to_string(), "/mnt/hung".to_string()];
        let results = run_probes(
            "nfs",
            targets,
            4,
            Duration::from_secs(1),
            |target| async move {
                if target.contains("hung") {
                    std::future::pending::<()>().await;
                }
                CheckResult::new("nfs", target, CheckStatus::Ok)
            },
        )
        .await;

        assert_eq!(results.len(), 2);
        let hung = results.iter().find(|r| r.target == "/mnt/hung").unwrap();
        assert_eq!(hung.status, CheckStatus::Timeout);
        let alive = results.iter().find(|r| r.target == "/mnt/alive").unwrap();
        assert_eq!(alive.status, CheckStatus::Ok);
    }

    #[tokio::test(start_paused = true)]
    async fn pool_never_exceeds_concurrency() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let targets: Vec<String> = (0..16).map(|i| format!("disk{i}")).collect();
        let results = run_probes("smart", targets, 3, Duration::from_secs(60), |target| {
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                CheckResult::new("smart", target, CheckStatus::Ok)
            }
        })
        .await;

        assert_eq!(results.len(), 16);
        assert!(max_seen.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test(start_paused = true)]
    async fn every_target_has_exactly_one_result() {
        let targets: Vec<String> = (0..5).map(|i| format!("t{i}")).collect();
        let results = run_probes(
            "nfs",
            targets.clone(),
            2,
            Duration::from_secs(1),
            |target| async move {
                match target.as_str() {
                    "t1" => std::future::pending().await,
                    "t2" => CheckResult::new("nfs", target, CheckStatus::Error)
                        .with_message("probe failed"),
                    _ => CheckResult::new("nfs", target, CheckStatus::Ok),
                }
            },
        )
        .await;

        assert_eq!(results.len(), targets.len());
        for target in &targets {
            assert_eq!(results.iter().filter(|r| &r.target == target).count(), 1);
        }
    }
}
