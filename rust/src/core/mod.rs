pub(crate) mod channel;
pub(crate) mod config;
pub(crate) mod contacts;
pub(crate) mod endpoints;
pub(crate) mod engine;
pub(crate) mod poller;
pub(crate) mod prefs;
pub(crate) mod session;
pub(crate) mod store;
pub(crate) mod wire;

use std::sync::atomic::Ordering;
use std::sync::{Arc, RwLock};

use flume::Sender;

use crate::actions::AppAction;
use crate::state::{AppState, BusyState, Screen};
use crate::updates::{AppUpdate, CoreMsg, InternalEvent};

use session::{ChatSession, ServerConfig};

pub struct AppCore {
    pub state: AppState,
    rev: u64,

    update_sender: Sender<AppUpdate>,
    core_sender: Sender<CoreMsg>,
    shared_state: Arc<RwLock<AppState>>,

    config: config::AppConfig,
    runtime: tokio::runtime::Runtime,
    http: reqwest::Client,
    prefs: prefs::Prefs,

    server: Option<ServerConfig>,
    chat: Option<ChatSession>,
    // Bumped whenever background tasks are (re)started or torn down; results
    // stamped with an older token are stale and dropped.
    session_token: u64,
}

impl AppCore {
    pub fn new(
        update_sender: Sender<AppUpdate>,
        core_sender: Sender<CoreMsg>,
        data_dir: String,
        shared_state: Arc<RwLock<AppState>>,
    ) -> Self {
        let config = config::load_app_config(&data_dir);
        let state = AppState::empty();
        let prefs = prefs::Prefs::new(&data_dir);

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_time()
            .enable_io()
            .build()
            .expect("tokio runtime");

        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(8))
            .timeout(std::time::Duration::from_secs(8))
            .build()
            .expect("http client");

        let this = Self {
            state,
            rev: 0,
            update_sender,
            core_sender,
            shared_state,
            config,
            runtime,
            http,
            prefs,
            server: None,
            chat: None,
            session_token: 0,
        };

        // Ensure FfiApp.state() has an immediately-available snapshot.
        let snapshot = this.state.clone();
        this.commit_state_snapshot(&snapshot);
        this
    }

    fn next_rev(&mut self) -> u64 {
        self.rev += 1;
        self.state.rev = self.rev;
        self.rev
    }

    fn commit_state_snapshot(&self, snapshot: &AppState) {
        match self.shared_state.write() {
            Ok(mut g) => *g = snapshot.clone(),
            Err(poison) => *poison.into_inner() = snapshot.clone(),
        }
    }

    fn emit_state(&mut self) {
        self.next_rev();
        let snapshot = self.state.clone();
        self.commit_state_snapshot(&snapshot);
        let _ = self.update_sender.send(AppUpdate::FullState(snapshot));
    }

    fn toast(&mut self, msg: impl Into<String>) {
        // Keep toast in state until the UI explicitly clears it, so a rev-gap
        // resync via state() still shows it.
        self.state.toast = Some(msg.into());
        self.emit_state();
    }

    fn set_busy(&mut self, f: impl FnOnce(&mut BusyState)) {
        let mut next = self.state.busy.clone();
        f(&mut next);
        if next != self.state.busy {
            self.state.busy = next;
            self.emit_state();
        }
    }

    fn is_configured(&self) -> bool {
        self.server.is_some()
    }

    fn push_screen(&mut self, screen: Screen) {
        if self.state.router.screen_stack.last() != Some(&screen) {
            self.state.router.screen_stack.push(screen);
        }
    }

    /// Keep the open chat session in lockstep with the top of the screen
    /// stack: leaving the chat screen tears the session down, landing on one
    /// (re)opens it.
    fn sync_chat_session_to_router(&mut self) {
        let top = self.state.router.screen_stack.last().cloned();
        match top {
            Some(Screen::Chat { peer_key }) => {
                let already_open = self
                    .chat
                    .as_ref()
                    .map(|c| c.peer_key == peer_key)
                    .unwrap_or(false);
                if !already_open {
                    // Restored stacks land here without an OpenChat action;
                    // recover the peer handles from the chat list.
                    let row = self
                        .state
                        .chat_list
                        .iter()
                        .find(|c| c.peer_key == peer_key)
                        .cloned();
                    match row {
                        Some(row) => {
                            self.open_chat(row.name, row.number, row.uuid);
                        }
                        None => {
                            self.close_chat_session();
                        }
                    }
                }
            }
            _ => self.close_chat_session(),
        }
    }

    pub fn handle_message(&mut self, msg: CoreMsg) {
        match msg {
            CoreMsg::Action(ref action) => {
                // Never log `?action` directly: it can contain message text
                // and phone numbers.
                tracing::info!(action = action.tag(), "dispatch");
                self.handle_action(action.clone());
            }
            CoreMsg::Internal(internal) => self.handle_internal(*internal),
        }
    }

    fn handle_action(&mut self, action: AppAction) {
        match action {
            AppAction::ConnectServer {
                host,
                number,
                bridge_override,
            } => {
                self.start_connect(host, number, bridge_override);
            }
            AppAction::RestoreSession => {
                self.restore_session();
            }

            AppAction::PushScreen { screen } => {
                if !self.is_configured() && screen != Screen::ServerConnect {
                    self.toast("Connect to a server first");
                    return;
                }
                self.push_screen(screen);
                self.sync_chat_session_to_router();
                self.emit_state();
            }
            AppAction::UpdateScreenStack { stack } => {
                self.state.router.screen_stack = stack;
                self.sync_chat_session_to_router();
                self.emit_state();
            }

            AppAction::RefreshChats => {
                if !self.is_configured() {
                    self.toast("Connect to a server first");
                    return;
                }
                self.load_chat_list();
            }
            AppAction::OpenChat { name, number, uuid } => {
                if !self.is_configured() {
                    self.toast("Connect to a server first");
                    return;
                }
                self.open_chat(name, number, uuid);
                self.emit_state();
            }
            AppAction::SendMessage { text } => {
                self.send_message(text);
            }

            AppAction::ClearToast => {
                if self.state.toast.is_some() {
                    self.state.toast = None;
                    self.emit_state();
                }
            }

            AppAction::Foregrounded => {
                if self.chat.is_some() {
                    self.restart_live_tasks();
                } else if self.is_configured() {
                    self.load_chat_list();
                }
            }
            AppAction::Backgrounded => {
                if let Some(chat) = self.chat.as_mut() {
                    chat.stop_live_tasks();
                }
            }
        }
    }

    fn handle_internal(&mut self, internal: InternalEvent) {
        match internal {
            InternalEvent::ConnectFinished {
                host,
                number,
                bridge_override,
                error,
            } => {
                self.set_busy(|b| b.connecting = false);
                match error {
                    Some(err) => self.toast(err),
                    None => self.finish_connect(ServerConfig {
                        host,
                        number,
                        bridge_override,
                    }),
                }
            }

            InternalEvent::ChatsLoaded { rows } => {
                self.set_busy(|b| b.loading_chats = false);
                self.apply_chat_list(rows);
            }
            InternalEvent::ChatsLoadFailed { error } => {
                self.set_busy(|b| b.loading_chats = false);
                tracing::warn!(%error, "chat list load failed");
                self.toast(error);
            }

            InternalEvent::ChannelEvents { token, events } => {
                if !self.token_is_current(token) {
                    return;
                }
                self.apply_chat_events(events);
            }
            InternalEvent::ChannelState { token, open } => {
                if !self.token_is_current(token) {
                    return;
                }
                tracing::info!(open, "channel state");
            }

            InternalEvent::BridgeBatch { token, items } => {
                if !self.token_is_current(token) {
                    return;
                }
                self.apply_chat_events(vec![engine::ChatEvent::BridgeBatch { items }]);
            }

            InternalEvent::SendFinished {
                token,
                text,
                ok,
                error,
            } => {
                self.set_busy(|b| b.sending = false);
                if !self.token_is_current(token) {
                    return;
                }
                self.apply_chat_events(vec![engine::ChatEvent::SendAcked {
                    text,
                    success: ok,
                }]);
                if !ok {
                    self.toast(error.unwrap_or_else(|| "Send failed".into()));
                }
            }

            InternalEvent::Toast(msg) => {
                tracing::info!(%msg, "toast");
                self.toast(msg);
            }

            InternalEvent::InjectedGatewayPayload { raw } => match wire::decode_payload(&raw) {
                Ok(events) => self.apply_chat_events(events),
                Err(e) => tracing::warn!("injected payload rejected: {e}"),
            },
        }
    }

    fn token_is_current(&self, token: u64) -> bool {
        self.chat.as_ref().map(|c| c.token) == Some(token)
    }

    /// Run every event through the engine against the open conversation, then
    /// persist and re-render if anything changed.
    fn apply_chat_events(&mut self, events: Vec<engine::ChatEvent>) {
        let Some(chat) = self.chat.as_mut() else {
            return;
        };
        let mut changed = false;
        for event in events {
            changed |= engine::apply(&mut chat.convo, &chat.peer, event);
        }
        if changed {
            chat.watermark
                .store(chat.convo.watermark, Ordering::Relaxed);
            self.persist_open_conversation();
            self.refresh_current_chat_view();
            self.emit_state();
        }
    }

    fn close_chat_session(&mut self) {
        if let Some(mut chat) = self.chat.take() {
            chat.stop_live_tasks();
            self.session_token += 1;
        }
        if self.state.current_chat.is_some() {
            self.state.current_chat = None;
        }
    }
}
