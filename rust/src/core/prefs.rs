// Small JSON-on-disk preference store under `<data_dir>/prefs/`.
//
// One file per key, written whole on every save. Loads fail open: a missing
// or unparsable file reads as "not set", so a corrupt history blob costs one
// conversation's history instead of wedging startup.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

pub(crate) const KEY_SERVER_CONFIG: &str = "server_config";

pub(crate) fn history_key(peer_key: &str) -> String {
    format!("chat_hist_{peer_key}")
}

pub(crate) fn watermark_key(peer_key: &str) -> String {
    format!("chat_last_ts_{peer_key}")
}

#[derive(Debug, Clone)]
pub(crate) struct Prefs {
    dir: PathBuf,
}

impl Prefs {
    pub fn new(data_dir: &str) -> Self {
        Self {
            dir: Path::new(data_dir).join("prefs"),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are digit strings, uuids, or fixed names; keep anything else
        // filename-safe.
        let safe: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }

    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("creating prefs dir {}", self.dir.display()))?;
        let path = self.path_for(key);
        let bytes = serde_json::to_vec(value).context("serializing pref")?;
        std::fs::write(&path, bytes).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.path_for(key);
        let bytes = std::fs::read(&path).ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("discarding unreadable pref {}: {e}", path.display());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = Prefs::new(dir.path().to_str().unwrap());
        prefs.save("chat_last_ts_4917112345", &1_700_000_000_123i64).unwrap();
        let back: Option<i64> = prefs.load("chat_last_ts_4917112345");
        assert_eq!(back, Some(1_700_000_000_123));
    }

    #[test]
    fn missing_and_corrupt_files_load_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = Prefs::new(dir.path().to_str().unwrap());
        assert_eq!(prefs.load::<i64>("nope"), None);

        prefs.save("bad", &"placeholder").unwrap();
        std::fs::write(prefs.path_for("bad"), b"{not json").unwrap();
        assert_eq!(prefs.load::<i64>("bad"), None);
    }

    #[test]
    fn keys_with_odd_characters_stay_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = Prefs::new(dir.path().to_str().unwrap());
        prefs.save("chat_hist_+49/171", &vec![1, 2, 3]).unwrap();
        let back: Option<Vec<i32>> = prefs.load("chat_hist_+49/171");
        assert_eq!(back, Some(vec![1, 2, 3]));
    }
}
