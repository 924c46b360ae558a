//! Filter runner (§4.4): consumes packs from its delivery channel, may
//! inject zero or more new packs, and receives periodic ticker events.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Interval;
use tracing::warn;

use super::retry::{RetryPolicy, RetryState};
use super::RunnerContext;
use crate::error::RunnerError;
use crate::pack::Pack;

#[async_trait]
pub trait Filter: Send + Sync {
    fn name(&self) -> &str;

    /// Consumes one delivered pack. The implementation releases it (it
    /// holds the router's retained reference) and may call `ctx.inject` any
    /// number of times for derived packs.
    async fn process(&mut self, pack: Pack, ctx: &RunnerContext) -> Result<(), RunnerError>;

    /// Called on each ticker interval; the default implementation does
    /// nothing.
    async fn tick(&mut self, _ctx: &RunnerContext) -> Result<(), RunnerError> {
        Ok(())
    }
}

/// Whether a filter-runner failure should bring the process down
/// (`can_exit=false`) or just stop this one plugin (§4.4, §7f).
pub enum FilterOutcome {
    Continue,
    PluginStopped,
    ProcessShutdown,
}

/// Drives one filter plugin against its delivery channel and ticker until
/// stopped, a fatal error occurs, or the channel closes.
///
/// A fatal error with `can_exit=false` brings the process down immediately.
/// With `can_exit=true` the filter is instead restarted in place: the runner
/// backs off per `retry_policy` and keeps serving the same delivery channel,
/// only giving up (`PluginStopped`) once the retry budget is exhausted or
/// shutdown is requested mid-backoff.
pub async fn run_filter(
    filter: &mut dyn Filter,
    ctx: &RunnerContext,
    mut rx: mpsc::Receiver<Pack>,
    mut ticker: Interval,
    can_exit: bool,
    retry_policy: RetryPolicy,
) -> FilterOutcome {
    let mut retry = RetryState::new(retry_policy);
    loop {
        tokio::select! {
            biased;
            _ = ctx.stopped() => return FilterOutcome::Continue,
            _ = ticker.tick() => {
                match filter.tick(ctx).await {
                    Ok(()) => retry.reset(),
                    Err(e) => {
                        ctx.log_error(filter.name(), &e);
                        if matches!(e, RunnerError::Fatal(_)) {
                            match restart_or_stop(filter.name(), can_exit, &mut retry, ctx).await {
                                Some(outcome) => return outcome,
                                None => continue,
                            }
                        }
                    }
                }
            }
            maybe_pack = rx.recv() => {
                match maybe_pack {
                    None => return FilterOutcome::Continue,
                    Some(pack) => {
                        match filter.process(pack, ctx).await {
                            Ok(()) => retry.reset(),
                            Err(e) => {
                                ctx.record_failure();
                                ctx.log_error(filter.name(), &e);
                                if matches!(e, RunnerError::Fatal(_)) {
                                    match restart_or_stop(filter.name(), can_exit, &mut retry, ctx).await {
                                        Some(outcome) => return outcome,
                                        None => continue,
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Decides what a fatal error means for the running filter. `None` means
/// "keep the loop running, the plugin restarted"; `Some(outcome)` means the
/// runner is done.
async fn restart_or_stop(
    name: &str,
    can_exit: bool,
    retry: &mut RetryState,
    ctx: &RunnerContext,
) -> Option<FilterOutcome> {
    if !can_exit {
        return Some(FilterOutcome::ProcessShutdown);
    }
    if retry.exhausted() {
        return Some(FilterOutcome::PluginStopped);
    }
    warn!(filter = name, attempt = retry.attempt(), "restarting filter after fatal error");
    if retry.wait(ctx).await {
        None
    } else {
        Some(FilterOutcome::PluginStopped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::PackPool;
    use crate::router::Router;
    use std::time::Duration;

    struct CountingFilter {
        seen: usize,
    }

    #[async_trait]
    impl Filter for CountingFilter {
        fn name(&self) -> &str {
            "counting"
        }

        async fn process(&mut self, pack: Pack, _ctx: &RunnerContext) -> Result<(), RunnerError> {
            self.seen += 1;
            pack.release().map_err(|e| RunnerError::Fatal(e.to_string()))
        }
    }

    fn fast_retry_policy() -> RetryPolicy {
        RetryPolicy {
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
            max_retries: 3,
            multiplier: 1.5,
        }
    }

    #[tokio::test]
    async fn filter_processes_packs_until_channel_closes() {
        let pool = PackPool::new(4);
        let router = Router::new(pool.clone(), 8);
        let handle = router.handle();
        let join = tokio::spawn(router.run());
        let ctx = RunnerContext::new(pool.clone(), handle.clone());

        let (tx, rx) = mpsc::channel(4);
        for _ in 0..3 {
            let p = pool.acquire().await;
            tx.send(p).await.unwrap();
        }
        drop(tx);

        let mut filter = CountingFilter { seen: 0 };
        let ticker = super::super::ticker(Duration::from_secs(3600));
        let outcome = run_filter(&mut filter, &ctx, rx, ticker, true, RetryPolicy::default()).await;
        assert!(matches!(outcome, FilterOutcome::Continue));
        assert_eq!(filter.seen, 3);

        handle.shutdown();
        join.await.unwrap();
    }

    struct FlakyFilter {
        fail_times: usize,
        processed: usize,
    }

    #[async_trait]
    impl Filter for FlakyFilter {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn process(&mut self, pack: Pack, _ctx: &RunnerContext) -> Result<(), RunnerError> {
            pack.release().map_err(|e| RunnerError::Fatal(e.to_string()))?;
            if self.fail_times > 0 {
                self.fail_times -= 1;
                return Err(RunnerError::Fatal("transient startup failure".into()));
            }
            self.processed += 1;
            Ok(())
        }
    }

    #[tokio::test]
    async fn can_exit_filter_restarts_after_fatal_error_and_keeps_running() {
        let pool = PackPool::new(4);
        let router = Router::new(pool.clone(), 8);
        let handle = router.handle();
        let join = tokio::spawn(router.run());
        let ctx = RunnerContext::new(pool.clone(), handle.clone());

        let (tx, rx) = mpsc::channel(4);
        for _ in 0..2 {
            let p = pool.acquire().await;
            tx.send(p).await.unwrap();
        }
        drop(tx);

        let mut filter = FlakyFilter { fail_times: 1, processed: 0 };
        let ticker = super::super::ticker(Duration::from_secs(3600));
        let outcome = run_filter(&mut filter, &ctx, rx, ticker, true, fast_retry_policy()).await;

        assert!(matches!(outcome, FilterOutcome::Continue));
        assert_eq!(filter.processed, 1);

        handle.shutdown();
        join.await.unwrap();
    }

    struct AlwaysFatalFilter;

    #[async_trait]
    impl Filter for AlwaysFatalFilter {
        fn name(&self) -> &str {
            "always-fatal"
        }

        async fn process(&mut self, pack: Pack, _ctx: &RunnerContext) -> Result<(), RunnerError> {
            pack.release().map_err(|e| RunnerError::Fatal(e.to_string()))?;
            Err(RunnerError::Fatal("never recovers".into()))
        }
    }

    #[tokio::test]
    async fn can_exit_filter_stops_plugin_once_retries_are_exhausted() {
        let pool = PackPool::new(4);
        let router = Router::new(pool.clone(), 8);
        let handle = router.handle();
        let join = tokio::spawn(router.run());
        let ctx = RunnerContext::new(pool.clone(), handle.clone());

        let (tx, rx) = mpsc::channel(4);
        let p = pool.acquire().await;
        tx.send(p).await.unwrap();

        let mut filter = AlwaysFatalFilter;
        let ticker = super::super::ticker(Duration::from_secs(3600));
        let outcome = run_filter(&mut filter, &ctx, rx, ticker, true, fast_retry_policy()).await;
        assert!(matches!(outcome, FilterOutcome::PluginStopped));

        drop(tx);
        handle.shutdown();
        join.await.unwrap();
    }

    #[tokio::test]
    async fn cannot_exit_filter_shuts_process_down_on_first_fatal_error() {
        let pool = PackPool::new(4);
        let router = Router::new(pool.clone(), 8);
        let handle = router.handle();
        let join = tokio::spawn(router.run());
        let ctx = RunnerContext::new(pool.clone(), handle.clone());

        let (tx, rx) = mpsc::channel(4);
        let p = pool.acquire().await;
        tx.send(p).await.unwrap();
        drop(tx);

        let mut filter = AlwaysFatalFilter;
        let ticker = super::super::ticker(Duration::from_secs(3600));
        let outcome = run_filter(&mut filter, &ctx, rx, ticker, false, fast_retry_policy()).await;
        assert!(matches!(outcome, FilterOutcome::ProcessShutdown));

        handle.shutdown();
        join.await.unwrap();
    }
}
