// Catch-up poller against the bridge. Complements the live channel: the
// channel is fast but lossy across reconnect windows, the poller is slow but
// complete above the watermark. Overlap is harmless, the engine's merge
// rules are idempotent.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::core::wire::BridgeResponse;
use crate::updates::{CoreMsg, InternalEvent};

const POLL_INTERVAL: Duration = Duration::from_secs(3);
const FETCH_LIMIT: u32 = 500;

/// One bounded fetch every tick, first tick immediately. The watermark is
/// read fresh per tick from the shared atomic that the actor keeps current,
/// so consecutive fetches do not re-request already-merged history.
pub(crate) async fn run(
    client: reqwest::Client,
    bridge_base: String,
    peer: String,
    token: u64,
    alive: Arc<AtomicBool>,
    watermark: Arc<AtomicI64>,
    core_tx: flume::Sender<CoreMsg>,
) {
    let mut ticker = tokio::time::interval(POLL_INTERVAL);
    loop {
        ticker.tick().await;
        if !alive.load(Ordering::Relaxed) {
            return;
        }

        let after = watermark.load(Ordering::Relaxed);
        match fetch_batch(&client, &bridge_base, &peer, after).await {
            Ok(items) if !items.is_empty() => {
                let _ = core_tx.send(CoreMsg::Internal(Box::new(InternalEvent::BridgeBatch {
                    token,
                    items,
                })));
            }
            Ok(_) => {}
            // Transient bridge failures are invisible; the next tick retries.
            Err(e) => debug!("bridge poll failed: {e}"),
        }
    }
}

async fn fetch_batch(
    client: &reqwest::Client,
    bridge_base: &str,
    peer: &str,
    after: i64,
) -> anyhow::Result<Vec<crate::core::wire::BridgeItem>> {
    let url = format!("{bridge_base}/messages");
    let resp = client
        .get(&url)
        .query(&[
            ("peer", peer.to_string()),
            ("after", after.to_string()),
            ("limit", FETCH_LIMIT.to_string()),
        ])
        .send()
        .await?
        .error_for_status()?;
    let body: BridgeResponse = resp.json().await?;
    Ok(body.items)
}
