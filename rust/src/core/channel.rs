// Live channel to the gateway's receive stream. One task per open chat
// session; reconnects forever with capped exponential backoff. Teardown is
// driven by the session aborting the task; the alive flag is a secondary
// fence for frames already buffered when the session closes.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::core::wire;
use crate::updates::{CoreMsg, InternalEvent};

const BACKOFF_FLOOR_SECS: u64 = 1;
const BACKOFF_CAP_SECS: u64 = 16;

pub(crate) fn receive_url(ws_base: &str, number: &str) -> String {
    let encoded = utf8_percent_encode(number, NON_ALPHANUMERIC);
    format!("{ws_base}/v1/receive/{encoded}")
}

/// Connect-read-reconnect loop. Every decoded event batch is redispatched to
/// the actor thread tagged with the session token, so late arrivals after the
/// chat closed are discarded there.
pub(crate) async fn run(
    ws_base: String,
    number: String,
    token: u64,
    alive: Arc<AtomicBool>,
    core_tx: flume::Sender<CoreMsg>,
) {
    let url = receive_url(&ws_base, &number);
    let mut retry_secs = BACKOFF_FLOOR_SECS;

    while alive.load(Ordering::Relaxed) {
        let stream = match connect_async(url.as_str()).await {
            Ok((stream, _resp)) => stream,
            Err(e) => {
                warn!("channel connect failed: {e}");
                let delay = retry_secs.min(BACKOFF_CAP_SECS);
                retry_secs = (retry_secs * 2).min(BACKOFF_CAP_SECS);
                tokio::time::sleep(Duration::from_secs(delay)).await;
                continue;
            }
        };

        info!("channel open");
        retry_secs = BACKOFF_FLOOR_SECS;
        let _ = core_tx.send(CoreMsg::Internal(Box::new(InternalEvent::ChannelState {
            token,
            open: true,
        })));

        let (mut write, mut read) = stream.split();
        while let Some(frame) = read.next().await {
            if !alive.load(Ordering::Relaxed) {
                break;
            }
            match frame {
                Ok(Message::Text(text)) => match wire::decode_payload(text.as_str()) {
                    Ok(events) if !events.is_empty() => {
                        let _ = core_tx.send(CoreMsg::Internal(Box::new(
                            InternalEvent::ChannelEvents { token, events },
                        )));
                    }
                    Ok(_) => {}
                    Err(e) => debug!("dropping undecodable channel frame: {e}"),
                },
                Ok(Message::Ping(payload)) => {
                    let _ = write.send(Message::Pong(payload)).await;
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("channel read error: {e}");
                    break;
                }
            }
        }

        let _ = core_tx.send(CoreMsg::Internal(Box::new(InternalEvent::ChannelState {
            token,
            open: false,
        })));

        if !alive.load(Ordering::Relaxed) {
            break;
        }
        let delay = retry_secs.min(BACKOFF_CAP_SECS);
        retry_secs = (retry_secs * 2).min(BACKOFF_CAP_SECS);
        debug!("channel closed, reconnecting in {delay}s");
        tokio::time::sleep(Duration::from_secs(delay)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn receive_url_percent_encodes_the_number() {
        assert_eq!(
            receive_url("ws://10.0.0.2:5000", "+15551234567"),
            "ws://10.0.0.2:5000/v1/receive/%2B15551234567"
        );
    }

    #[test]
    fn backoff_doubles_to_the_cap() {
        let mut retry = BACKOFF_FLOOR_SECS;
        let mut observed = Vec::new();
        for _ in 0..6 {
            observed.push(retry.min(BACKOFF_CAP_SECS));
            retry = (retry * 2).min(BACKOFF_CAP_SECS);
        }
        assert_eq!(observed, vec![1, 2, 4, 8, 16, 16]);
    }
}
