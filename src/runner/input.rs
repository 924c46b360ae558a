//! Input runner (§4.4): long-lived, owns its sources, produces or injects
//! packs, and must obey a stop signal promptly.

use async_trait::async_trait;

use super::RunnerContext;
use crate::error::RunnerError;

#[async_trait]
pub trait Input: Send + Sync {
    fn name(&self) -> &str;

    /// Runs until the plugin's source is exhausted or `ctx.stopped()`
    /// resolves. Implementations should `tokio::select!` their I/O against
    /// `ctx.stopped()` so shutdown is observed within one tick (§5).
    async fn run(&mut self, ctx: &RunnerContext) -> Result<(), RunnerError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::PackPool;
    use crate::router::Router;

    struct CountingInput {
        emitted: usize,
        target: usize,
    }

    #[async_trait]
    impl Input for CountingInput {
        fn name(&self) -> &str {
            "counting"
        }

        async fn run(&mut self, ctx: &RunnerContext) -> Result<(), RunnerError> {
            while self.emitted < self.target {
                if ctx.stop_requested() {
                    break;
                }
                let pack = ctx.new_pack().await;
                pack.with_message_mut(|m| m.msg_type = "test".into());
                ctx.inject(pack).await.map_err(|e| RunnerError::Fatal(e.to_string()))?;
                self.emitted += 1;
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn input_runner_injects_configured_count() {
        let pool = PackPool::new(4);
        let mut router = Router::new(pool.clone(), 8);
        let matcher = crate::matcher::MatcherSpecification::compile("TRUE").unwrap();
        let mut rx = router.register("sink", matcher, None, true, 8);
        let handle = router.handle();
        let join = tokio::spawn(router.run());

        let ctx = RunnerContext::new(pool, handle.clone());
        let mut input = CountingInput { emitted: 0, target: 3 };
        input.run(&ctx).await.unwrap();

        for _ in 0..3 {
            let pack = rx.recv().await.unwrap();
            pack.release().unwrap();
        }

        handle.shutdown();
        join.await.unwrap();
    }
}
