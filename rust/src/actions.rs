use crate::state::Screen;

#[derive(uniffi::Enum, Debug, Clone)]
pub enum AppAction {
    // Server pairing
    ConnectServer {
        host: String,
        number: String,
        bridge_override: Option<String>,
    },
    RestoreSession,

    // Navigation
    PushScreen {
        screen: Screen,
    },
    UpdateScreenStack {
        stack: Vec<Screen>,
    },

    // Chat
    RefreshChats,
    OpenChat {
        name: String,
        number: Option<String>,
        uuid: Option<String>,
    },
    SendMessage {
        text: String,
    },

    // UI
    ClearToast,

    // Lifecycle
    Foregrounded,
    Backgrounded,
}

impl AppAction {
    /// Log-safe action tag (never includes message text or phone numbers).
    pub fn tag(&self) -> &'static str {
        match self {
            AppAction::ConnectServer { .. } => "ConnectServer",
            AppAction::RestoreSession => "RestoreSession",
            AppAction::PushScreen { .. } => "PushScreen",
            AppAction::UpdateScreenStack { .. } => "UpdateScreenStack",
            AppAction::RefreshChats => "RefreshChats",
            AppAction::OpenChat { .. } => "OpenChat",
            AppAction::SendMessage { .. } => "SendMessage",
            AppAction::ClearToast => "ClearToast",
            AppAction::Foregrounded => "Foregrounded",
            AppAction::Backgrounded => "Backgrounded",
        }
    }
}
