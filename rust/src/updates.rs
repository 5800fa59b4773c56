use crate::state::{AppState, ChatSummary};
use crate::AppAction;

#[derive(uniffi::Enum, Clone, Debug)]
pub enum AppUpdate {
    FullState(AppState),
}

impl AppUpdate {
    pub fn rev(&self) -> u64 {
        match self {
            AppUpdate::FullState(s) => s.rev,
        }
    }
}

#[derive(Debug)]
pub(crate) enum CoreMsg {
    Action(AppAction),
    Internal(Box<InternalEvent>),
}

/// Results of background work, redispatched onto the actor thread. Everything
/// that touches `AppCore` state arrives here; the session `token` lets the
/// actor discard results that outlived the chat session that spawned them.
#[derive(Debug)]
pub(crate) enum InternalEvent {
    // Server pairing
    ConnectFinished {
        host: String,
        number: String,
        bridge_override: Option<String>,
        error: Option<String>,
    },

    // Chat list hydration
    ChatsLoaded {
        rows: Vec<ChatSummary>,
    },
    ChatsLoadFailed {
        error: String,
    },

    // Live channel (gateway WebSocket)
    ChannelEvents {
        token: u64,
        events: Vec<crate::core::engine::ChatEvent>,
    },
    ChannelState {
        token: u64,
        open: bool,
    },

    // Bridge catch-up poller
    BridgeBatch {
        token: u64,
        items: Vec<crate::core::wire::BridgeItem>,
    },

    // Send pipeline
    SendFinished {
        token: u64,
        text: String,
        ok: bool,
        error: Option<String>,
    },

    Toast(String),

    // Test hook: a raw gateway payload, decoded and applied to the open chat
    // as if it had arrived on the live channel.
    InjectedGatewayPayload {
        raw: String,
    },
}
