//! Decoder runner (§4.4): turns raw-bytes packs into one-or-more populated
//! packs and forwards them to the router. On decode failure the original
//! pack is recycled and a process-message-failures counter increments.

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::warn;

use super::RunnerContext;
use crate::error::RunnerError;
use crate::message::Message;
use crate::pack::Pack;

#[async_trait]
pub trait Decoder: Send + Sync {
    fn name(&self) -> &str;

    /// Decodes raw bytes into one or more messages. A decode failure
    /// rejects the whole input pack; it never panics.
    fn decode(&self, raw: &[u8]) -> Result<Vec<Message>, RunnerError>;
}

/// Drives a decoder against a stream of raw-bytes packs received on `rx`,
/// forwarding decoded packs to the router and recycling the original pack
/// in every case (success or failure).
pub async fn run_decoder(
    decoder: &dyn Decoder,
    ctx: &RunnerContext,
    mut rx: mpsc::Receiver<Pack>,
) -> Result<(), RunnerError> {
    loop {
        tokio::select! {
            biased;
            _ = ctx.stopped() => return Ok(()),
            maybe_pack = rx.recv() => {
                let Some(raw_pack) = maybe_pack else { return Ok(()) };
                let raw_bytes = raw_pack.with_message(|m| m.payload.clone().into_bytes());
                match decoder.decode(&raw_bytes) {
                    Ok(messages) => {
                        for message in messages {
                            let pack = ctx.new_pack().await;
                            pack.with_message_mut(|m| *m = message);
                            pack.set_decoded(true);
                            if let Err(e) = ctx.inject(pack).await {
                                ctx.log_error(decoder.name(), e);
                            }
                        }
                    }
                    Err(e) => {
                        let total = ctx.record_failure();
                        warn!(decoder = decoder.name(), error = %e, total_failures = total, "decode failed, recycling pack");
                    }
                }
                if let Err(e) = raw_pack.release() {
                    ctx.log_error(decoder.name(), e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::PackPool;
    use crate::router::Router;

    struct UppercaseDecoder;

    impl Decoder for UppercaseDecoder {
        fn name(&self) -> &str {
            "uppercase"
        }

        fn decode(&self, raw: &[u8]) -> Result<Vec<Message>, RunnerError> {
            let text = std::str::from_utf8(raw).map_err(|e| RunnerError::Fatal(e.to_string()))?;
            if text.is_empty() {
                return Err(RunnerError::Fatal("empty payload".into()));
            }
            let mut m = Message::new();
            m.payload = text.to_uppercase();
            Ok(vec![m])
        }
    }

    #[tokio::test]
    async fn decode_failure_increments_counter_and_recycles_pack() {
        let pool = PackPool::new(4);
        let mut router = Router::new(pool.clone(), 8);
        let matcher = crate::matcher::MatcherSpecification::compile("TRUE").unwrap();
        let mut out_rx = router.register("sink", matcher, None, true, 8);
        let handle = router.handle();
        let join = tokio::spawn(router.run());

        let ctx = RunnerContext::new(pool.clone(), handle.clone());
        let (tx, rx) = mpsc::channel(4);

        let good = pool.acquire().await;
        good.with_message_mut(|m| m.payload = "hi".into());
        tx.send(good).await.unwrap();

        let bad = pool.acquire().await;
        bad.with_message_mut(|m| m.payload = String::new());
        tx.send(bad).await.unwrap();
        drop(tx);

        let decoder = UppercaseDecoder;
        run_decoder(&decoder, &ctx, rx).await.unwrap();

        let delivered = out_rx.recv().await.unwrap();
        delivered.with_message(|m| assert_eq!(m.payload, "HI"));
        delivered.release().unwrap();

        assert_eq!(ctx.failure_count(), 1);

        handle.shutdown();
        join.await.unwrap();
    }
}
