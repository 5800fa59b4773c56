// Reconciliation engine: folds channel envelopes, bridge batches, and local
// send progress into one conversation. Pure over `Conversation`; all network
// and persistence stays in the session layer.
//
// Every rule is an idempotent upgrade or a dedupe-before-append, so replayed
// envelopes and overlapping poller batches are safe. Outgoing status only
// ever climbs the Pending -> Sent -> Delivered -> Read ladder.

use crate::core::endpoints::PeerIdentity;
use crate::core::store::Conversation;
use crate::core::wire::{Attachment, BridgeItem};
use crate::state::{now_millis, DeliveryStatus, Direction, MessageKind, MessageRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReceiptKind {
    Delivery,
    Read,
}

impl ReceiptKind {
    fn target(self) -> DeliveryStatus {
        match self {
            ReceiptKind::Delivery => DeliveryStatus::Delivered,
            ReceiptKind::Read => DeliveryStatus::Read,
        }
    }
}

#[derive(Debug, Clone)]
pub(crate) enum ChatEvent {
    LocalSendStarted {
        text: String,
    },
    SendAcked {
        text: String,
        success: bool,
    },
    Incoming {
        source_number: Option<String>,
        source_uuid: Option<String>,
        timestamp: i64,
        text: Option<String>,
        attachments: Vec<Attachment>,
    },
    SyncEcho {
        dest_number: Option<String>,
        dest_uuid: Option<String>,
        server_ts: i64,
        text: Option<String>,
        attachments: Vec<Attachment>,
    },
    Receipt {
        kind: ReceiptKind,
        timestamps: Vec<i64>,
    },
    BridgeBatch {
        items: Vec<BridgeItem>,
    },
}

/// Apply one event to the conversation. Returns true when anything visible
/// or persisted changed (records or watermark).
pub(crate) fn apply(convo: &mut Conversation, peer: &PeerIdentity, event: ChatEvent) -> bool {
    match event {
        ChatEvent::LocalSendStarted { text } => {
            convo.append(MessageRecord::text(
                Direction::Outgoing,
                text,
                DeliveryStatus::Pending,
                now_millis(),
            ));
            true
        }

        ChatEvent::SendAcked { text, success } => {
            if !success {
                return false;
            }
            upgrade_newest_pending(convo, &text)
        }

        ChatEvent::Incoming {
            source_number,
            source_uuid,
            timestamp,
            text,
            attachments,
        } => {
            if !peer.matches_source(source_number.as_deref(), source_uuid.as_deref()) {
                return false;
            }
            let mut changed = false;
            // Trim before dedupe so a replay with different surrounding
            // whitespace still matches.
            let text = text
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty());
            if let Some(text) = text {
                if !convo.has_recent_incoming_text(&text) {
                    convo.append(MessageRecord::text(
                        Direction::Incoming,
                        text,
                        DeliveryStatus::Delivered,
                        now_millis(),
                    ));
                    changed = true;
                }
                if timestamp > convo.watermark {
                    convo.bump_watermark(timestamp);
                    changed = true;
                }
            }
            for att in attachments.iter().filter(|a| a.is_image()) {
                if convo.has_recent_attachment(&att.id) {
                    continue;
                }
                convo.append(MessageRecord::image(
                    Direction::Incoming,
                    att.id.clone(),
                    att.content_type.clone(),
                    DeliveryStatus::Delivered,
                    now_millis(),
                ));
                if timestamp > convo.watermark {
                    convo.bump_watermark(timestamp);
                }
                changed = true;
            }
            changed
        }

        ChatEvent::SyncEcho {
            dest_number,
            dest_uuid,
            server_ts,
            text: _,
            attachments,
        } => {
            if !peer.matches_destination(dest_number.as_deref(), dest_uuid.as_deref()) {
                return false;
            }
            let mut changed = false;

            // Correlation: pin the server timestamp onto the newest outgoing
            // record that does not have one yet and has not been delivered.
            // Later receipts key on this timestamp.
            if server_ts > 0 {
                if let Some(rec) = convo.newest_mut(|r| {
                    r.is_outgoing() && r.server_ts.is_none() && r.status <= DeliveryStatus::Sent
                }) {
                    rec.server_ts = Some(server_ts);
                    changed = true;
                }
                for rec in convo.records.iter_mut() {
                    if rec.is_outgoing()
                        && rec.server_ts == Some(server_ts)
                        && rec.status < DeliveryStatus::Sent
                    {
                        rec.status = DeliveryStatus::Sent;
                        changed = true;
                    }
                }
            }

            // Image sends issued from another linked device were never staged
            // locally, so the echo is the first time this device sees them.
            for att in attachments.iter().filter(|a| a.is_image()) {
                if convo.has_recent_attachment(&att.id) {
                    continue;
                }
                let mut rec = MessageRecord::image(
                    Direction::Outgoing,
                    att.id.clone(),
                    att.content_type.clone(),
                    DeliveryStatus::Sent,
                    now_millis(),
                );
                if server_ts > 0 {
                    rec.server_ts = Some(server_ts);
                }
                convo.append(rec);
                changed = true;
            }
            changed
        }

        ChatEvent::Receipt { kind, timestamps } => {
            let target = kind.target();
            let mut changed = false;
            if timestamps.is_empty() {
                // Degraded fallback for receipts with no timestamp list:
                // upgrade only the single newest outgoing record still below
                // the target. Coarser than timestamp matching and can pick
                // the wrong record when several are in flight.
                if let Some(rec) =
                    convo.newest_mut(|r| r.is_outgoing() && r.status < target)
                {
                    rec.status = target;
                    changed = true;
                }
                return changed;
            }
            for ts in timestamps {
                for rec in convo.records.iter_mut() {
                    if rec.is_outgoing() && rec.server_ts == Some(ts) && rec.status < target {
                        rec.status = target;
                        changed = true;
                    }
                }
            }
            changed
        }

        ChatEvent::BridgeBatch { items } => {
            let mut changed = false;
            for item in items {
                if item.server_ts > convo.watermark {
                    convo.bump_watermark(item.server_ts);
                    changed = true;
                }
                let Some(text) = item.text.as_deref().filter(|t| !t.is_empty()) else {
                    continue;
                };
                if item.is_incoming() {
                    if convo.has_recent_incoming_text(text) {
                        continue;
                    }
                    convo.append(MessageRecord::text(
                        Direction::Incoming,
                        text.to_string(),
                        DeliveryStatus::from_level(item.status).max(DeliveryStatus::Delivered),
                        now_millis(),
                    ));
                    changed = true;
                } else {
                    let status = DeliveryStatus::from_level(item.status);
                    if let Some(rec) = convo.newest_mut(|r| {
                        r.is_outgoing() && r.kind == MessageKind::Text && r.text == text
                    }) {
                        if rec.status < status {
                            rec.status = status;
                            changed = true;
                        }
                        if rec.server_ts.is_none() && item.server_ts > 0 {
                            rec.server_ts = Some(item.server_ts);
                            changed = true;
                        }
                    } else {
                        // A send this device never saw, made from another
                        // client against the same account.
                        let mut rec = MessageRecord::text(
                            Direction::Outgoing,
                            text.to_string(),
                            status.max(DeliveryStatus::Sent),
                            now_millis(),
                        );
                        if item.server_ts > 0 {
                            rec.server_ts = Some(item.server_ts);
                        }
                        convo.append(rec);
                        changed = true;
                    }
                }
            }
            changed
        }
    }
}

/// Newest pending outgoing record, preferring an exact text match when one
/// exists (two pending sends with different text resolve unambiguously).
fn upgrade_newest_pending(convo: &mut Conversation, text: &str) -> bool {
    let exact = convo.newest_mut(|r| {
        r.is_outgoing() && r.status == DeliveryStatus::Pending && r.text == text
    });
    if let Some(rec) = exact {
        rec.status = DeliveryStatus::Sent;
        return true;
    }
    if let Some(rec) = convo.newest_mut(|r| r.is_outgoing() && r.status == DeliveryStatus::Pending)
    {
        rec.status = DeliveryStatus::Sent;
        return true;
    }
    false
}
