// Gateway contact objects and the display-name fallback chain.

use serde::Deserialize;

use crate::core::endpoints::digits;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct Contact {
    pub name: Option<String>,
    pub number: Option<String>,
    pub uuid: Option<String>,
    pub username: Option<String>,
    pub profile_name: Option<String>,
    pub nickname: Option<Nickname>,
    pub profile: Option<Profile>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct Nickname {
    pub name: Option<String>,
    pub given_name: Option<String>,
    pub family_name: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub(crate) struct Profile {
    pub given_name: Option<String>,
    pub lastname: Option<String>,
}

fn non_blank(s: &Option<String>) -> Option<&str> {
    s.as_deref().map(str::trim).filter(|t| !t.is_empty())
}

fn join_names(a: Option<&str>, b: Option<&str>) -> Option<String> {
    match (a, b) {
        (Some(a), Some(b)) => Some(format!("{a} {b}")),
        (Some(a), None) => Some(a.to_string()),
        (None, Some(b)) => Some(b.to_string()),
        (None, None) => None,
    }
}

impl Contact {
    /// Best human-readable label, in decreasing order of how deliberately the
    /// user chose it: local nickname, address-book name, the peer's own
    /// profile, username, then raw handles.
    pub fn display_name(&self) -> String {
        if let Some(nick) = &self.nickname {
            if let Some(name) = non_blank(&nick.name) {
                return name.to_string();
            }
            if let Some(joined) =
                join_names(non_blank(&nick.given_name), non_blank(&nick.family_name))
            {
                return joined;
            }
        }
        if let Some(name) = non_blank(&self.name) {
            return name.to_string();
        }
        if let Some(name) = non_blank(&self.profile_name) {
            return name.to_string();
        }
        if let Some(profile) = &self.profile {
            if let Some(joined) =
                join_names(non_blank(&profile.given_name), non_blank(&profile.lastname))
            {
                return joined;
            }
        }
        if let Some(username) = non_blank(&self.username) {
            return format!("@{username}");
        }
        if let Some(number) = non_blank(&self.number) {
            return number.to_string();
        }
        if let Some(uuid) = non_blank(&self.uuid) {
            let short: String = uuid.chars().take(8).collect();
            return short;
        }
        "Unknown".to_string()
    }

    /// Persistence and routing key for the chat behind this contact.
    pub fn peer_key(&self) -> Option<String> {
        if let Some(number) = non_blank(&self.number) {
            let d = digits(number);
            if !d.is_empty() {
                return Some(d);
            }
        }
        non_blank(&self.uuid).map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nickname_beats_everything() {
        let contact: Contact = serde_json::from_str(
            r#"{
                "name": "Address Book",
                "profile_name": "Profile",
                "nickname": {"name": "Nick"},
                "number": "+15551234567"
            }"#,
        )
        .unwrap();
        assert_eq!(contact.display_name(), "Nick");
    }

    #[test]
    fn nickname_parts_join_when_no_full_name() {
        let contact: Contact = serde_json::from_str(
            r#"{"nickname": {"given_name": "Ada", "family_name": "Lovelace"}}"#,
        )
        .unwrap();
        assert_eq!(contact.display_name(), "Ada Lovelace");
    }

    #[test]
    fn falls_through_profile_username_number_uuid() {
        let profile: Contact = serde_json::from_str(
            r#"{"profile": {"given_name": "Grace"}, "username": "ghopper"}"#,
        )
        .unwrap();
        assert_eq!(profile.display_name(), "Grace");

        let username: Contact = serde_json::from_str(r#"{"username": "ghopper"}"#).unwrap();
        assert_eq!(username.display_name(), "@ghopper");

        let number: Contact = serde_json::from_str(r#"{"number": "+15551234567"}"#).unwrap();
        assert_eq!(number.display_name(), "+15551234567");

        let uuid: Contact =
            serde_json::from_str(r#"{"uuid": "0123456789abcdef"}"#).unwrap();
        assert_eq!(uuid.display_name(), "01234567");

        let empty: Contact = serde_json::from_str(r#"{"name": "   "}"#).unwrap();
        assert_eq!(empty.display_name(), "Unknown");
    }

    #[test]
    fn peer_key_prefers_number_digits() {
        let contact: Contact = serde_json::from_str(
            r#"{"number": "+1 (555) 123-4567", "uuid": "uuid-a"}"#,
        )
        .unwrap();
        assert_eq!(contact.peer_key().as_deref(), Some("15551234567"));

        let uuid_only: Contact = serde_json::from_str(r#"{"uuid": "uuid-a"}"#).unwrap();
        assert_eq!(uuid_only.peer_key().as_deref(), Some("uuid-a"));

        let nothing: Contact = serde_json::from_str("{}").unwrap();
        assert_eq!(nothing.peer_key(), None);
    }
}
