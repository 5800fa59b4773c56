// Boundary decoding for the two wire formats this crate consumes: gateway
// WebSocket frames and bridge catch-up batches. Everything is decoded into
// typed `ChatEvent`s here, once, so the engine never touches raw JSON.
//
// A frame that is not JSON at all is rejected whole. Inside an array frame,
// an element that fails to decode is dropped alone and the rest survive.

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::debug;

use crate::core::engine::{ChatEvent, ReceiptKind};

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Attachment {
    #[serde(default)]
    pub id: String,
    #[serde(default, rename = "contentType")]
    pub content_type: String,
}

impl Attachment {
    /// Only image attachments with a fetchable id produce records.
    pub fn is_image(&self) -> bool {
        !self.id.is_empty() && self.content_type.starts_with("image/")
    }
}

/// One row of a bridge `GET /messages` response.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct BridgeItem {
    #[serde(default)]
    pub dir: String,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default, rename = "serverTs")]
    pub server_ts: i64,
    #[serde(default)]
    pub status: i64,
}

impl BridgeItem {
    pub fn is_incoming(&self) -> bool {
        self.dir == "in"
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct BridgeResponse {
    #[serde(default)]
    pub items: Vec<BridgeItem>,
}

#[derive(Debug, Deserialize)]
struct Frame {
    #[serde(default)]
    envelope: Option<Envelope>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default, alias = "source")]
    source_number: Option<String>,
    #[serde(default)]
    source_uuid: Option<String>,
    #[serde(default)]
    timestamp: i64,
    #[serde(default)]
    data_message: Option<DataMessage>,
    #[serde(default)]
    sync_message: Option<SyncMessage>,
    #[serde(default)]
    receipt_message: Option<ReceiptMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataMessage {
    #[serde(default, alias = "text")]
    message: Option<String>,
    #[serde(default)]
    attachments: Vec<Attachment>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SyncMessage {
    #[serde(default)]
    sent_message: Option<SentMessage>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SentMessage {
    #[serde(default)]
    destination_number: Option<String>,
    #[serde(default)]
    destination_uuid: Option<String>,
    #[serde(default)]
    timestamp: i64,
    #[serde(default, alias = "text")]
    message: Option<String>,
    #[serde(default)]
    attachments: Vec<Attachment>,
}

#[derive(Debug, Deserialize)]
struct ReceiptMessage {
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    timestamps: Vec<i64>,
}

/// Decode one raw gateway frame into chat events. Frames carry either a bare
/// envelope object or an array of them.
pub(crate) fn decode_payload(raw: &str) -> Result<Vec<ChatEvent>> {
    let value: serde_json::Value =
        serde_json::from_str(raw).context("gateway frame is not JSON")?;
    let mut events = Vec::new();
    match value {
        serde_json::Value::Array(elements) => {
            for element in elements {
                match serde_json::from_value::<Frame>(element) {
                    Ok(frame) => collect_events(frame, &mut events),
                    Err(e) => debug!("dropping undecodable frame element: {e}"),
                }
            }
        }
        other => {
            let frame: Frame =
                serde_json::from_value(other).context("gateway frame has unexpected shape")?;
            collect_events(frame, &mut events);
        }
    }
    Ok(events)
}

fn collect_events(frame: Frame, out: &mut Vec<ChatEvent>) {
    let Some(env) = frame.envelope else {
        return;
    };

    if let Some(receipt) = env.receipt_message {
        // Only delivery and read/viewed receipts affect records; anything
        // else (typing, story, future types) is ignored.
        let kind = match receipt.kind.to_ascii_uppercase().as_str() {
            "DELIVERY" => Some(ReceiptKind::Delivery),
            "READ" | "VIEWED" => Some(ReceiptKind::Read),
            other => {
                debug!("ignoring receipt type {other:?}");
                None
            }
        };
        if let Some(kind) = kind {
            out.push(ChatEvent::Receipt {
                kind,
                timestamps: receipt.timestamps,
            });
        }
    }

    if let Some(sync) = env.sync_message {
        if let Some(sent) = sync.sent_message {
            out.push(ChatEvent::SyncEcho {
                dest_number: sent.destination_number,
                dest_uuid: sent.destination_uuid,
                server_ts: sent.timestamp,
                text: sent.message,
                attachments: sent.attachments,
            });
        }
    }

    if let Some(data) = env.data_message {
        out.push(ChatEvent::Incoming {
            source_number: env.source_number,
            source_uuid: env.source_uuid,
            timestamp: env.timestamp,
            text: data.message,
            attachments: data.attachments,
        });
    }
}
