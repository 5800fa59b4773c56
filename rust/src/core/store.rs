// In-memory record list for one conversation, plus its bridge watermark.
// Persisted wholesale through `Prefs` by the session layer.

use crate::state::{Direction, MessageKind, MessageRecord};

/// Hard cap on records kept per conversation.
const MAX_RECORDS: usize = 400;
/// How many of the oldest records are dropped when the cap is crossed.
const TRIM_CHUNK: usize = 50;
/// How far back duplicate detection looks.
const DEDUPE_WINDOW: usize = 50;

#[derive(Debug, Clone, Default)]
pub(crate) struct Conversation {
    pub records: Vec<MessageRecord>,
    /// Highest bridge `serverTs` already folded in. Only ever moves forward.
    pub watermark: i64,
}

impl Conversation {
    pub fn new(records: Vec<MessageRecord>, watermark: i64) -> Self {
        Self { records, watermark }
    }

    pub fn append(&mut self, record: MessageRecord) {
        self.records.push(record);
        if self.records.len() > MAX_RECORDS {
            self.records.drain(..TRIM_CHUNK);
        }
    }

    /// Newest record matching `pred`, scanning from the end.
    pub fn newest_mut<F>(&mut self, pred: F) -> Option<&mut MessageRecord>
    where
        F: Fn(&MessageRecord) -> bool,
    {
        self.records.iter_mut().rev().find(|r| pred(r))
    }

    fn recent(&self) -> impl Iterator<Item = &MessageRecord> {
        self.records.iter().rev().take(DEDUPE_WINDOW)
    }

    pub fn has_recent_incoming_text(&self, text: &str) -> bool {
        self.recent().any(|r| {
            r.direction == Direction::Incoming && r.kind == MessageKind::Text && r.text == text
        })
    }

    pub fn has_recent_attachment(&self, attachment_id: &str) -> bool {
        self.recent().any(|r| {
            r.kind == MessageKind::Image && r.attachment_id.as_deref() == Some(attachment_id)
        })
    }

    /// Raise the watermark; a lower or equal value is a no-op.
    pub fn bump_watermark(&mut self, server_ts: i64) {
        if server_ts > self.watermark {
            self.watermark = server_ts;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::DeliveryStatus;

    fn text_record(n: usize) -> MessageRecord {
        MessageRecord::text(
            Direction::Incoming,
            format!("msg {n}"),
            DeliveryStatus::Delivered,
            n as i64,
        )
    }

    #[test]
    fn append_trims_oldest_block_past_the_cap() {
        let mut convo = Conversation::default();
        for n in 0..MAX_RECORDS {
            convo.append(text_record(n));
        }
        assert_eq!(convo.records.len(), MAX_RECORDS);

        // One more record crosses the cap and drops the oldest chunk.
        convo.append(text_record(MAX_RECORDS));
        assert_eq!(convo.records.len(), MAX_RECORDS + 1 - TRIM_CHUNK);
        assert_eq!(convo.records[0].text, format!("msg {TRIM_CHUNK}"));
        assert_eq!(
            convo.records.last().unwrap().text,
            format!("msg {MAX_RECORDS}")
        );
    }

    #[test]
    fn dedupe_window_only_sees_recent_records() {
        let mut convo = Conversation::default();
        convo.append(MessageRecord::text(
            Direction::Incoming,
            "old hello".into(),
            DeliveryStatus::Delivered,
            0,
        ));
        for n in 0..DEDUPE_WINDOW {
            convo.append(text_record(n));
        }
        // The first record has scrolled out of the window.
        assert!(!convo.has_recent_incoming_text("old hello"));
        assert!(convo.has_recent_incoming_text("msg 0"));
    }

    #[test]
    fn outgoing_text_does_not_count_as_incoming_duplicate() {
        let mut convo = Conversation::default();
        convo.append(MessageRecord::text(
            Direction::Outgoing,
            "hi".into(),
            DeliveryStatus::Sent,
            1,
        ));
        assert!(!convo.has_recent_incoming_text("hi"));
    }

    #[test]
    fn watermark_never_moves_backwards() {
        let mut convo = Conversation::default();
        convo.bump_watermark(100);
        convo.bump_watermark(50);
        convo.bump_watermark(100);
        assert_eq!(convo.watermark, 100);
        convo.bump_watermark(101);
        assert_eq!(convo.watermark, 101);
    }
}
