// Canonical base URLs for the gateway and the bridge, plus peer identity
// matching. The peer key produced here is the join key across the live
// channel, the bridge, and the preference store.

use serde::{Deserialize, Serialize};

/// Well-known port the bridge listens on when no explicit override is given.
const BRIDGE_PORT: u16 = 9099;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Endpoints {
    pub gateway_http: String,
    pub gateway_ws: String,
    pub bridge_http: String,
}

pub(crate) fn resolve_endpoints(host: &str, bridge_override: Option<&str>) -> Endpoints {
    let gateway_http = normalize_base(host);
    let gateway_ws = to_ws(&gateway_http);
    let bridge_http = match bridge_override {
        Some(b) if !b.trim().is_empty() => normalize_base(b),
        _ => derive_bridge_base(host),
    };
    Endpoints {
        gateway_http,
        gateway_ws,
        bridge_http,
    }
}

/// Add `http://` when no scheme is present, strip a trailing slash.
pub(crate) fn normalize_base(host: &str) -> String {
    let mut base = host.trim().to_string();
    if !base.starts_with("http://") && !base.starts_with("https://") {
        base = format!("http://{base}");
    }
    if base.ends_with('/') {
        base.pop();
    }
    base
}

/// The bridge lives next to the gateway: same host, fixed well-known port.
fn derive_bridge_base(host: &str) -> String {
    let mut bare = host.trim();
    bare = bare.strip_prefix("http://").unwrap_or(bare);
    bare = bare.strip_prefix("https://").unwrap_or(bare);
    let bare = bare.trim_end_matches('/');
    let host_only = match bare.find(':') {
        Some(idx) if idx > 0 => &bare[..idx],
        _ => bare,
    };
    format!("http://{host_only}:{BRIDGE_PORT}")
}

/// Scheme substitution only: http→ws, https→wss.
fn to_ws(http_base: &str) -> String {
    if let Some(rest) = http_base.strip_prefix("https://") {
        return format!("wss://{rest}");
    }
    if let Some(rest) = http_base.strip_prefix("http://") {
        return format!("ws://{rest}");
    }
    format!("ws://{http_base}")
}

pub(crate) fn digits(s: &str) -> String {
    s.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn non_empty(s: Option<&str>) -> Option<&str> {
    s.map(str::trim).filter(|t| !t.is_empty())
}

/// The two handles a Signal peer can be known by. Either may be absent, but
/// not both. Matching is disjunctive: one matching handle is enough, which
/// tolerates envelopes that carry only a number or only a uuid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PeerIdentity {
    pub number: Option<String>,
    pub uuid: Option<String>,
}

impl PeerIdentity {
    pub fn new(number: Option<&str>, uuid: Option<&str>) -> Self {
        Self {
            number: non_empty(number).map(str::to_string),
            uuid: non_empty(uuid).map(str::to_string),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.number.is_none() && self.uuid.is_none()
    }

    /// Persistence key suffix and envelope attribution key: digit-normalized
    /// number when known, else the opaque uuid.
    pub fn canonical_key(&self) -> String {
        if let Some(num) = &self.number {
            let d = digits(num);
            if !d.is_empty() {
                return d;
            }
        }
        self.uuid.clone().unwrap_or_default()
    }

    /// The recipient handle used for sends and bridge queries, preferring the
    /// number in its canonical form.
    pub fn recipient(&self) -> Option<&str> {
        self.number.as_deref().or(self.uuid.as_deref())
    }

    pub fn matches_source(&self, number: Option<&str>, uuid: Option<&str>) -> bool {
        let by_number = match (&self.number, non_empty(number)) {
            (Some(mine), Some(theirs)) => {
                let mine = digits(mine);
                !mine.is_empty() && mine == digits(theirs)
            }
            _ => false,
        };
        let by_uuid = match (&self.uuid, non_empty(uuid)) {
            (Some(mine), Some(theirs)) => mine.eq_ignore_ascii_case(theirs),
            _ => false,
        };
        by_number || by_uuid
    }

    /// Like `matches_source`, plus the permissive rule for sync echoes: an
    /// echo carrying neither a destination number nor uuid is accepted as
    /// "could be this chat". This can misattribute a same-account send made
    /// in another conversation; kept deliberately, matching observed gateway
    /// behavior for broadcast-style echoes.
    pub fn matches_destination(&self, number: Option<&str>, uuid: Option<&str>) -> bool {
        if non_empty(number).is_none() && non_empty(uuid).is_none() {
            return true;
        }
        self.matches_source(number, uuid)
    }
}

/// Match a user-entered number against the gateway's account list by digit
/// equality, returning the server's canonical form (usually with a `+`).
/// Accounts arrive either as bare strings or as objects with a `number` field.
pub(crate) fn canonical_account(accounts: &serde_json::Value, entered: &str) -> Option<String> {
    let wanted = digits(entered);
    if wanted.is_empty() {
        return None;
    }
    for account in accounts.as_array()? {
        // Entries that are neither a string nor carry a number field are
        // skipped, not fatal for the whole list.
        let Some(candidate) = account
            .as_str()
            .or_else(|| account.get("number").and_then(|n| n.as_str()))
        else {
            continue;
        };
        if digits(candidate) == wanted {
            return Some(candidate.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_adds_scheme_and_strips_slash() {
        let ep = resolve_endpoints("192.168.1.24:5000/", None);
        assert_eq!(ep.gateway_http, "http://192.168.1.24:5000");
        assert_eq!(ep.gateway_ws, "ws://192.168.1.24:5000");
        assert_eq!(ep.bridge_http, "http://192.168.1.24:9099");
    }

    #[test]
    fn resolve_keeps_https_and_swaps_scheme_only() {
        let ep = resolve_endpoints("https://signal.example.org", None);
        assert_eq!(ep.gateway_http, "https://signal.example.org");
        assert_eq!(ep.gateway_ws, "wss://signal.example.org");
        assert_eq!(ep.bridge_http, "http://signal.example.org:9099");
    }

    #[test]
    fn bridge_override_wins_over_derivation() {
        let ep = resolve_endpoints("10.0.0.2:5000", Some("10.0.0.9:7000"));
        assert_eq!(ep.bridge_http, "http://10.0.0.9:7000");
    }

    #[test]
    fn canonical_key_prefers_digits_of_number() {
        let peer = PeerIdentity::new(Some("+49 171 123456"), Some("ABCD-1234"));
        assert_eq!(peer.canonical_key(), "49171123456");
        let uuid_only = PeerIdentity::new(None, Some("ABCD-1234"));
        assert_eq!(uuid_only.canonical_key(), "ABCD-1234");
    }

    #[test]
    fn matches_source_is_disjunctive() {
        let peer = PeerIdentity::new(Some("+15551234567"), Some("uuid-a"));
        // Either handle alone is enough.
        assert!(peer.matches_source(Some("15551234567"), None));
        assert!(peer.matches_source(None, Some("UUID-A")));
        assert!(peer.matches_source(Some("15551234567"), Some("uuid-b")));
        // Both present and both different: no match.
        assert!(!peer.matches_source(Some("+15550000000"), Some("uuid-b")));
        // Nothing present: no match for sources.
        assert!(!peer.matches_source(None, None));
        assert!(!peer.matches_source(Some(""), Some("  ")));
    }

    #[test]
    fn matches_destination_accepts_missing_handles() {
        let peer = PeerIdentity::new(Some("+15551234567"), None);
        assert!(peer.matches_destination(None, None));
        assert!(peer.matches_destination(Some(""), None));
        assert!(!peer.matches_destination(Some("+15550000000"), None));
    }

    #[test]
    fn canonical_account_matches_by_digits() {
        let accounts = serde_json::json!(["+15551234567", "+441234567890"]);
        assert_eq!(
            canonical_account(&accounts, "1 (555) 123-4567").as_deref(),
            Some("+15551234567")
        );
        assert_eq!(canonical_account(&accounts, "999"), None);

        let objects = serde_json::json!([{ "number": "+15551234567" }]);
        assert_eq!(
            canonical_account(&objects, "15551234567").as_deref(),
            Some("+15551234567")
        );
    }

    #[test]
    fn canonical_account_skips_malformed_entries() {
        let accounts = serde_json::json!([42, {"uuid": "abc"}, "+15551234567"]);
        assert_eq!(
            canonical_account(&accounts, "15551234567").as_deref(),
            Some("+15551234567")
        );
    }
}
