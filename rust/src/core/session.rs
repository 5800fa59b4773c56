// Server pairing, chat list hydration, chat session lifecycle, and the send
// pipeline. Everything here runs on the actor thread; network work is
// spawned onto the embedded runtime and returns as `InternalEvent`s.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::contacts::Contact;
use super::endpoints::{self, PeerIdentity};
use super::store::Conversation;
use super::wire::BridgeResponse;
use super::{channel, engine, poller, prefs, AppCore};
use crate::state::{
    ChatSummary, ChatViewState, ConnectionState, MessageKind, MessageRecord, Screen,
};
use crate::updates::{CoreMsg, InternalEvent};

/// Persisted pairing: which gateway, which account, optional bridge override.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ServerConfig {
    pub host: String,
    pub number: String,
    #[serde(default)]
    pub bridge_override: Option<String>,
}

/// One open conversation plus the background tasks feeding it. Teardown
/// clears the alive flag and aborts the task handles (the channel can sit in
/// a socket read for a long time on a quiet gateway, so the flag alone is
/// not enough); the token fences off any results still in flight.
pub(crate) struct ChatSession {
    pub peer: PeerIdentity,
    pub peer_key: String,
    pub name: String,
    pub convo: Conversation,
    pub token: u64,
    pub alive: Arc<AtomicBool>,
    pub watermark: Arc<AtomicI64>,
    pub tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl ChatSession {
    pub fn stop_live_tasks(&mut self) {
        self.alive.store(false, Ordering::Relaxed);
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl AppCore {
    pub(super) fn start_connect(
        &mut self,
        host: String,
        number: String,
        bridge_override: Option<String>,
    ) {
        let host = host.trim().to_string();
        let number = number.trim().to_string();
        if host.is_empty() || number.is_empty() {
            self.toast("Enter a server address and account number");
            return;
        }
        self.set_busy(|b| b.connecting = true);

        if !self.network_enabled() {
            // Deterministic tests: accept the pairing unverified.
            let _ = self.core_sender.send(CoreMsg::Internal(Box::new(
                InternalEvent::ConnectFinished {
                    host,
                    number,
                    bridge_override,
                    error: None,
                },
            )));
            return;
        }

        let http = self.http.clone();
        let tx = self.core_sender.clone();
        let ep = endpoints::resolve_endpoints(&host, bridge_override.as_deref());
        self.runtime.spawn(async move {
            let result = verify_gateway(&http, &ep.gateway_http, &number).await;
            let (number, error) = match result {
                Ok(canonical) => (canonical, None),
                Err(e) => (number, Some(format!("{e:#}"))),
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::ConnectFinished {
                host,
                number,
                bridge_override,
                error,
            })));
        });
    }

    pub(super) fn finish_connect(&mut self, server: ServerConfig) {
        if let Err(e) = self.prefs.save(prefs::KEY_SERVER_CONFIG, &server) {
            warn!("failed to persist server config: {e:#}");
        }
        info!("server pairing established");
        self.apply_server_config(server);
        self.load_chat_list();
    }

    pub(super) fn restore_session(&mut self) {
        match self.prefs.load::<ServerConfig>(prefs::KEY_SERVER_CONFIG) {
            Some(server) => {
                self.apply_server_config(server);
                self.load_chat_list();
            }
            None => {
                self.state.router.default_screen = Screen::ServerConnect;
                self.emit_state();
            }
        }
    }

    fn apply_server_config(&mut self, server: ServerConfig) {
        let ep = endpoints::resolve_endpoints(&server.host, server.bridge_override.as_deref());
        self.state.connection = ConnectionState::Configured {
            gateway_host: ep.gateway_http,
            account_number: server.number.clone(),
        };
        self.state.router.default_screen = Screen::ChatList;
        self.state.router.screen_stack.clear();
        self.server = Some(server);
        self.close_chat_session();
        self.emit_state();
    }

    pub(super) fn load_chat_list(&mut self) {
        let Some(server) = self.server.clone() else {
            return;
        };
        self.set_busy(|b| b.loading_chats = true);

        if !self.network_enabled() {
            let _ = self
                .core_sender
                .send(CoreMsg::Internal(Box::new(InternalEvent::ChatsLoaded {
                    rows: vec![],
                })));
            return;
        }

        let http = self.http.clone();
        let tx = self.core_sender.clone();
        let ep = endpoints::resolve_endpoints(&server.host, server.bridge_override.as_deref());
        self.runtime.spawn(async move {
            let url = format!(
                "{}/v1/contacts/{}",
                ep.gateway_http,
                utf8_percent_encode(&server.number, NON_ALPHANUMERIC)
            );
            let event = match fetch_contacts(&http, &url).await {
                Ok(mut rows) => {
                    for row in rows.iter_mut() {
                        hydrate_row_from_bridge(&http, &ep.bridge_http, row).await;
                    }
                    InternalEvent::ChatsLoaded { rows }
                }
                Err(e) => InternalEvent::ChatsLoadFailed {
                    error: format!("Could not load chats: {e:#}"),
                },
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(event)));
        });
    }

    /// Overlay locally persisted history on the bridge previews (a send from
    /// this device may be newer than anything the bridge archived), drop
    /// contacts with no conversation at all, sort newest-first.
    pub(super) fn apply_chat_list(&mut self, mut rows: Vec<ChatSummary>) {
        for row in rows.iter_mut() {
            let records: Vec<MessageRecord> = self
                .prefs
                .load(&prefs::history_key(&row.peer_key))
                .unwrap_or_default();
            if let Some(last) = records.last() {
                if last.local_ts > row.last_ts {
                    row.snippet = match last.kind {
                        MessageKind::Text => last.text.clone(),
                        MessageKind::Image => "[Image]".to_string(),
                    };
                    row.last_ts = last.local_ts;
                }
            }
        }
        rows.retain(|r| !r.snippet.is_empty() || r.last_ts > 0);
        rows.sort_by(|a, b| {
            b.last_ts
                .cmp(&a.last_ts)
                .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
        });
        self.state.chat_list = rows;
        self.emit_state();
    }

    pub(super) fn open_chat(
        &mut self,
        name: String,
        number: Option<String>,
        uuid: Option<String>,
    ) {
        let peer = PeerIdentity::new(number.as_deref(), uuid.as_deref());
        if peer.is_empty() {
            self.toast("Contact has no usable number or id");
            return;
        }
        let peer_key = peer.canonical_key();

        if self
            .chat
            .as_ref()
            .map(|c| c.peer_key == peer_key)
            .unwrap_or(false)
        {
            self.push_screen(Screen::Chat { peer_key });
            return;
        }
        self.close_chat_session();

        let records: Vec<MessageRecord> = self
            .prefs
            .load(&prefs::history_key(&peer_key))
            .unwrap_or_default();
        let watermark: i64 = self
            .prefs
            .load(&prefs::watermark_key(&peer_key))
            .unwrap_or(0);

        self.session_token += 1;
        let chat = ChatSession {
            peer,
            peer_key: peer_key.clone(),
            name,
            convo: Conversation::new(records, watermark),
            token: self.session_token,
            alive: Arc::new(AtomicBool::new(true)),
            watermark: Arc::new(AtomicI64::new(watermark)),
            tasks: Vec::new(),
        };
        self.chat = Some(chat);
        self.push_screen(Screen::Chat { peer_key });
        self.refresh_current_chat_view();
        self.start_live_tasks();
    }

    fn start_live_tasks(&mut self) {
        if !self.network_enabled() {
            return;
        }
        let (Some(server), Some(chat)) = (self.server.as_ref(), self.chat.as_ref()) else {
            return;
        };
        let Some(recipient) = chat.peer.recipient() else {
            return;
        };
        let ep = endpoints::resolve_endpoints(&server.host, server.bridge_override.as_deref());

        let channel_task = self.runtime.spawn(channel::run(
            ep.gateway_ws,
            server.number.clone(),
            chat.token,
            chat.alive.clone(),
            self.core_sender.clone(),
        ));
        let poller_task = self.runtime.spawn(poller::run(
            self.http.clone(),
            ep.bridge_http,
            recipient.to_string(),
            chat.token,
            chat.alive.clone(),
            chat.watermark.clone(),
            self.core_sender.clone(),
        ));
        if let Some(chat) = self.chat.as_mut() {
            chat.tasks.push(channel_task);
            chat.tasks.push(poller_task);
        }
    }

    /// Tear down and respawn the channel and poller under a fresh token, used
    /// when the app returns to the foreground with a chat still open.
    pub(super) fn restart_live_tasks(&mut self) {
        self.session_token += 1;
        let token = self.session_token;
        if let Some(chat) = self.chat.as_mut() {
            chat.stop_live_tasks();
            chat.alive = Arc::new(AtomicBool::new(true));
            chat.token = token;
        } else {
            return;
        }
        self.start_live_tasks();
    }

    pub(super) fn send_message(&mut self, text: String) {
        let text = text.trim().to_string();
        if text.is_empty() {
            return;
        }
        let Some(chat) = self.chat.as_ref() else {
            self.toast("Open a chat first");
            return;
        };
        let token = chat.token;
        let recipient = chat.peer.recipient().map(str::to_string);

        // Optimistic: the record is visible as PENDING before the POST runs.
        self.apply_chat_events(vec![engine::ChatEvent::LocalSendStarted {
            text: text.clone(),
        }]);

        if !self.network_enabled() {
            let _ = self
                .core_sender
                .send(CoreMsg::Internal(Box::new(InternalEvent::SendFinished {
                    token,
                    text,
                    ok: true,
                    error: None,
                })));
            return;
        }

        let Some(server) = self.server.clone() else {
            return;
        };
        let Some(recipient) = recipient else {
            self.toast("Contact has no usable number or id");
            return;
        };
        self.set_busy(|b| b.sending = true);

        let http = self.http.clone();
        let tx = self.core_sender.clone();
        let ep = endpoints::resolve_endpoints(&server.host, server.bridge_override.as_deref());
        self.runtime.spawn(async move {
            let url = format!("{}/v2/send", ep.gateway_http);
            let body = serde_json::json!({
                "message": text,
                "number": server.number,
                "recipients": [recipient],
            });
            let result = http.post(&url).json(&body).send().await;
            let (ok, error) = match result {
                Ok(resp) if resp.status().is_success() => (true, None),
                Ok(resp) => (false, Some(format!("Send failed: HTTP {}", resp.status()))),
                Err(e) => (false, Some(format!("Send failed: {e}"))),
            };
            let _ = tx.send(CoreMsg::Internal(Box::new(InternalEvent::SendFinished {
                token,
                text,
                ok,
                error,
            })));
        });
    }

    /// Write the whole conversation blob and watermark for the open chat.
    /// Best-effort: history is not safety-critical and a failed write must
    /// never block the UI.
    pub(super) fn persist_open_conversation(&self) {
        let Some(chat) = self.chat.as_ref() else {
            return;
        };
        if let Err(e) = self
            .prefs
            .save(&prefs::history_key(&chat.peer_key), &chat.convo.records)
        {
            warn!("failed to persist history: {e:#}");
        }
        if let Err(e) = self
            .prefs
            .save(&prefs::watermark_key(&chat.peer_key), &chat.convo.watermark)
        {
            warn!("failed to persist watermark: {e:#}");
        }
    }

    pub(super) fn refresh_current_chat_view(&mut self) {
        let Some(chat) = self.chat.as_ref() else {
            self.state.current_chat = None;
            return;
        };
        self.state.current_chat = Some(ChatViewState {
            peer_key: chat.peer_key.clone(),
            peer_name: chat.name.clone(),
            number: chat.peer.number.clone(),
            uuid: chat.peer.uuid.clone(),
            messages: chat.convo.records.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::RwLock;
    use std::time::Duration;

    use super::*;
    use crate::actions::AppAction;
    use crate::state::AppState;

    fn core_with_server(dir: &tempfile::TempDir) -> AppCore {
        let (update_tx, _update_rx) = flume::unbounded();
        let (core_tx, _core_rx) = flume::unbounded();
        let mut core = AppCore::new(
            update_tx,
            core_tx,
            dir.path().to_string_lossy().into_owned(),
            Arc::new(RwLock::new(AppState::empty())),
        );
        // Unroutable on purpose; the tasks just need to exist, not connect.
        core.server = Some(ServerConfig {
            host: "127.0.0.1:1".into(),
            number: "+15550001111".into(),
            bridge_override: None,
        });
        core
    }

    fn wait_for_finish(handle: &tokio::task::AbortHandle) {
        let mut waited = Duration::ZERO;
        while !handle.is_finished() && waited < Duration::from_secs(5) {
            std::thread::sleep(Duration::from_millis(20));
            waited += Duration::from_millis(20);
        }
        assert!(handle.is_finished(), "task survived teardown");
    }

    #[test]
    fn closing_the_chat_aborts_channel_and_poller_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let mut core = core_with_server(&dir);
        core.open_chat("Peer".into(), Some("+15551234567".into()), None);

        let handles: Vec<_> = core
            .chat
            .as_ref()
            .unwrap()
            .tasks
            .iter()
            .map(|t| t.abort_handle())
            .collect();
        assert_eq!(handles.len(), 2);

        core.close_chat_session();
        for handle in &handles {
            wait_for_finish(handle);
        }
    }

    #[test]
    fn backgrounding_stops_live_tasks_but_keeps_the_conversation() {
        let dir = tempfile::tempdir().unwrap();
        let mut core = core_with_server(&dir);
        core.open_chat("Peer".into(), Some("+15551234567".into()), None);
        let handles: Vec<_> = core
            .chat
            .as_ref()
            .unwrap()
            .tasks
            .iter()
            .map(|t| t.abort_handle())
            .collect();

        core.handle_action(AppAction::Backgrounded);
        let chat = core.chat.as_ref().expect("conversation stays open");
        assert!(chat.tasks.is_empty());
        for handle in &handles {
            wait_for_finish(handle);
        }
    }
}

async fn verify_gateway(
    http: &reqwest::Client,
    gateway_http: &str,
    entered_number: &str,
) -> anyhow::Result<String> {
    let health = http
        .get(format!("{gateway_http}/v1/health"))
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("server unreachable: {e}"))?;
    if !health.status().is_success() {
        anyhow::bail!("server health check failed: HTTP {}", health.status());
    }

    let accounts: serde_json::Value = http
        .get(format!("{gateway_http}/v1/accounts"))
        .send()
        .await
        .map_err(|e| anyhow::anyhow!("account lookup failed: {e}"))?
        .error_for_status()?
        .json()
        .await?;

    endpoints::canonical_account(&accounts, entered_number)
        .ok_or_else(|| anyhow::anyhow!("number is not registered on this server"))
}

async fn fetch_contacts(http: &reqwest::Client, url: &str) -> anyhow::Result<Vec<ChatSummary>> {
    let contacts: Vec<Contact> = http
        .get(url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    let rows = contacts
        .into_iter()
        .filter_map(|c| {
            let peer_key = c.peer_key()?;
            Some(ChatSummary {
                peer_key,
                name: c.display_name(),
                number: c.number.clone(),
                uuid: c.uuid.clone(),
                snippet: String::new(),
                last_ts: 0,
            })
        })
        .collect();
    Ok(rows)
}

/// Pull a last-message preview for one chat row from the bridge. Best-effort:
/// a failed fetch leaves the row without a preview rather than failing the
/// whole list.
async fn hydrate_row_from_bridge(http: &reqwest::Client, bridge_http: &str, row: &mut ChatSummary) {
    let Some(recipient) = row.number.as_deref().or(row.uuid.as_deref()) else {
        return;
    };
    let url = format!("{bridge_http}/messages");
    let resp = http
        .get(&url)
        .query(&[("peer", recipient), ("after", "0"), ("limit", "50")])
        .send()
        .await;
    let body: BridgeResponse = match resp.and_then(|r| r.error_for_status()) {
        Ok(r) => match r.json().await {
            Ok(b) => b,
            Err(_) => return,
        },
        Err(_) => return,
    };
    if let Some(last) = body
        .items
        .iter()
        .rev()
        .find(|i| i.text.as_deref().is_some_and(|t| !t.is_empty()))
    {
        row.snippet = last.text.clone().unwrap_or_default();
        row.last_ts = last.server_ts;
    }
}
