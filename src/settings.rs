// src/settings.rs
//
// Runtime settings changed while the bot runs (auto trading, threshold,
// confirmation timeout) persisted as JSON in the data directory, so operator
// choices survive a restart. Credentials are only ever stored masked; the
// real values come from the environment.

use crate::config::{Secrets, TradingConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

pub const SETTINGS_FILE: &str = "settings.json";
/// Characters left visible at each end of a masked secret.
const MASK_VISIBLE: usize = 4;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeSettings {
    pub trading: TradingConfig,
    /// Masked credentials keyed by dotted name, e.g. `telegram.bot_token`.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub api_keys: BTreeMap<String, String>,
}

impl RuntimeSettings {
    fn validate(&self) -> Result<(), String> {
        if !(0.0..=100.0).contains(&self.trading.auto_trade_threshold) {
            return Err(format!(
                "trading.auto_trade_threshold must be within 0..100, got {}",
                self.trading.auto_trade_threshold
            ));
        }
        if self.trading.confirmation_timeout_secs == 0 {
            return Err("trading.confirmation_timeout_secs must be positive".to_string());
        }
        Ok(())
    }
}

/// Keeps the first and last few characters, stars the rest. Short secrets
/// are starred entirely.
pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 2 * MASK_VISIBLE {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..MASK_VISIBLE].iter().collect();
    let tail: String = chars[chars.len() - MASK_VISIBLE..].iter().collect();
    format!("{}{}{}", head, "*".repeat(chars.len() - 2 * MASK_VISIBLE), tail)
}

enum FileFormat {
    Json,
    Toml,
}

fn format_of(path: &Path) -> FileFormat {
    match path.extension().and_then(|e| e.to_str()) {
        Some(ext) if ext.eq_ignore_ascii_case("toml") => FileFormat::Toml,
        _ => FileFormat::Json,
    }
}

fn read_settings(path: &Path) -> Result<RuntimeSettings, String> {
    let text = fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {}", path.display(), e))?;
    let settings: RuntimeSettings = match format_of(path) {
        FileFormat::Toml => toml::from_str(&text).map_err(|e| format!("Failed to parse {}: {}", path.display(), e))?,
        FileFormat::Json => {
            serde_json::from_str(&text).map_err(|e| format!("Failed to parse {}: {}", path.display(), e))?
        }
    };
    settings.validate()?;
    Ok(settings)
}

fn write_settings(path: &Path, settings: &RuntimeSettings) -> Result<(), String> {
    let text = match format_of(path) {
        FileFormat::Toml => toml::to_string_pretty(settings).map_err(|e| format!("Failed to serialize settings: {}", e))?,
        FileFormat::Json => {
            serde_json::to_string_pretty(settings).map_err(|e| format!("Failed to serialize settings: {}", e))?
        }
    };
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, text).map_err(|e| format!("Failed to write {}: {}", tmp.display(), e))?;
    fs::rename(&tmp, path).map_err(|e| format!("Failed to replace {}: {}", path.display(), e))
}

pub struct SettingsManager {
    path: PathBuf,
    defaults: TradingConfig,
    settings: Mutex<RuntimeSettings>,
}

impl SettingsManager {
    /// Loads `settings.json` from `data_dir`, or creates it from `defaults`.
    /// An unreadable file is replaced by the defaults.
    pub fn open<P: AsRef<Path>>(data_dir: P, defaults: TradingConfig) -> Result<Self, String> {
        let dir = data_dir.as_ref();
        fs::create_dir_all(dir).map_err(|e| format!("Failed to create {}: {}", dir.display(), e))?;
        let path = dir.join(SETTINGS_FILE);
        let fresh = RuntimeSettings {
            trading: defaults.clone(),
            api_keys: BTreeMap::new(),
        };
        let loaded = if path.exists() {
            read_settings(&path)
                .map_err(|e| log::error!("[Settings] {}, using defaults", e))
                .ok()
        } else {
            None
        };
        let settings = match loaded {
            Some(settings) => settings,
            None => {
                write_settings(&path, &fresh)?;
                fresh
            }
        };
        log::info!("[Settings] Loaded {}", path.display());
        Ok(Self {
            path,
            defaults,
            settings: Mutex::new(settings),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn current(&self) -> RuntimeSettings {
        self.settings.lock().await.clone()
    }

    pub async fn trading(&self) -> TradingConfig {
        self.settings.lock().await.trading.clone()
    }

    pub async fn set_trading(&self, trading: TradingConfig) -> Result<(), String> {
        let mut settings = self.settings.lock().await;
        let updated = RuntimeSettings {
            trading,
            api_keys: settings.api_keys.clone(),
        };
        updated.validate()?;
        write_settings(&self.path, &updated)?;
        *settings = updated;
        Ok(())
    }

    /// Value at a dotted key such as `trading.auto_trade_threshold`.
    pub async fn get(&self, key: &str) -> Option<Value> {
        let tree = serde_json::to_value(&*self.settings.lock().await).ok()?;
        key.split('.').try_fold(tree, |node, part| node.get(part).cloned())
    }

    /// Replaces the value at a dotted key and saves. Unknown keys and values
    /// of the wrong type are refused.
    pub async fn set(&self, key: &str, value: Value) -> Result<(), String> {
        if key == "api_keys" || key.starts_with("api_keys.") {
            return Err("Credentials are set with set_api_key".to_string());
        }
        let mut settings = self.settings.lock().await;
        let mut tree = serde_json::to_value(&*settings).map_err(|e| format!("Failed to serialize settings: {}", e))?;
        let mut slot = &mut tree;
        for part in key.split('.') {
            slot = slot
                .get_mut(part)
                .ok_or_else(|| format!("Unknown setting {}", key))?;
        }
        *slot = value;
        let updated: RuntimeSettings =
            serde_json::from_value(tree).map_err(|e| format!("Invalid value for {}: {}", key, e))?;
        updated.validate()?;
        write_settings(&self.path, &updated)?;
        *settings = updated;
        log::info!("[Settings] {} updated", key);
        Ok(())
    }

    /// Records a credential as configured. Only the masked form is kept.
    pub async fn set_api_key(&self, name: &str, secret: &str) -> Result<(), String> {
        let mut settings = self.settings.lock().await;
        let mut updated = settings.clone();
        if secret.is_empty() {
            updated.api_keys.remove(name);
        } else {
            updated.api_keys.insert(name.to_string(), mask_secret(secret));
        }
        if updated == *settings {
            return Ok(());
        }
        write_settings(&self.path, &updated)?;
        *settings = updated;
        Ok(())
    }

    pub async fn api_keys(&self) -> BTreeMap<String, String> {
        self.settings.lock().await.api_keys.clone()
    }

    /// Masks whichever environment credentials are present.
    pub async fn record_credentials(&self, secrets: &Secrets) -> Result<(), String> {
        if let Some(token) = &secrets.telegram_token {
            self.set_api_key("telegram.bot_token", token).await?;
        }
        if let Some(chat_id) = secrets.telegram_chat_id {
            self.set_api_key("telegram.chat_id", &chat_id.to_string()).await?;
        }
        if let Some(key) = &secrets.bridge_api_key {
            self.set_api_key("bridge.api_key", key).await?;
        }
        Ok(())
    }

    pub async fn save(&self) -> Result<(), String> {
        write_settings(&self.path, &*self.settings.lock().await)
    }

    /// Restores the configured trading defaults. Recorded credentials stay.
    pub async fn reset(&self) -> Result<(), String> {
        self.set_trading(self.defaults.clone()).await?;
        log::info!("[Settings] Reset to defaults");
        Ok(())
    }

    /// Writes the settings without credentials; `.toml` paths get TOML,
    /// anything else JSON.
    pub async fn export<P: AsRef<Path>>(&self, path: P) -> Result<(), String> {
        let exported = RuntimeSettings {
            trading: self.trading().await,
            api_keys: BTreeMap::new(),
        };
        write_settings(path.as_ref(), &exported)?;
        log::info!("[Settings] Exported to {}", path.as_ref().display());
        Ok(())
    }

    /// Replaces the settings with a TOML or JSON export. Credentials already
    /// recorded here are kept, imported ones ignored.
    pub async fn import<P: AsRef<Path>>(&self, path: P) -> Result<(), String> {
        let imported = read_settings(path.as_ref())?;
        self.set_trading(imported.trading).await?;
        log::info!("[Settings] Imported {}", path.as_ref().display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn temp_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "test_{}_{}",
            name,
            Utc::now().timestamp_nanos_opt().unwrap_or_default()
        ))
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("123456:ABCDEFGHIJ"), "1234*********GHIJ");
        assert_eq!(mask_secret("short"), "*****");
        assert_eq!(mask_secret("ключ-секрет-длинный"), "ключ***********нный");
        assert_eq!(mask_secret(""), "");
    }

    #[tokio::test]
    async fn test_set_survives_reopen() {
        let dir = temp_dir("settings_reopen");
        let manager = SettingsManager::open(&dir, TradingConfig::default()).unwrap();
        assert!(manager.path().exists());
        assert_eq!(manager.get("trading.auto_trade_enabled").await, Some(json!(false)));

        manager.set("trading.auto_trade_enabled", json!(true)).await.unwrap();
        manager.set("trading.auto_trade_threshold", json!(80)).await.unwrap();
        assert!(manager.set("trading.no_such_key", json!(1)).await.is_err());
        assert!(manager.set("trading.auto_trade_threshold", json!("high")).await.is_err());
        assert!(manager.set("trading.auto_trade_threshold", json!(150.0)).await.is_err());
        assert_eq!(manager.get("trading.auto_trade_threshold").await, Some(json!(80.0)));
        drop(manager);

        let reopened = SettingsManager::open(&dir, TradingConfig::default()).unwrap();
        let trading = reopened.trading().await;
        assert!(trading.auto_trade_enabled);
        assert_eq!(trading.auto_trade_threshold, 80.0);

        reopened.reset().await.unwrap();
        assert_eq!(reopened.trading().await, TradingConfig::default());
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_credentials_stored_masked() {
        let dir = temp_dir("settings_keys");
        let manager = SettingsManager::open(&dir, TradingConfig::default()).unwrap();
        let secrets = Secrets {
            telegram_token: Some("123456789:AAbbCCddEEffGG".to_string()),
            telegram_chat_id: Some(42),
            bridge_api_key: None,
        };
        manager.record_credentials(&secrets).await.unwrap();
        assert!(manager.set("api_keys.telegram.bot_token", json!("x")).await.is_err());

        let on_disk = fs::read_to_string(manager.path()).unwrap();
        assert!(!on_disk.contains("AAbbCCddEEffGG"));
        let keys = manager.api_keys().await;
        assert_eq!(keys["telegram.bot_token"], "1234****************ffGG");
        assert_eq!(keys["telegram.chat_id"], "**");
        assert!(!keys.contains_key("bridge.api_key"));
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_export_import_roundtrip_formats() {
        let dir = temp_dir("settings_export");
        let source = SettingsManager::open(dir.join("a"), TradingConfig::default()).unwrap();
        source.set("trading.confirmation_timeout_secs", json!(120)).await.unwrap();
        source.set_api_key("bridge.api_key", "super-secret-value").await.unwrap();

        let toml_path = dir.join("export.toml");
        source.export(&toml_path).await.unwrap();
        let text = fs::read_to_string(&toml_path).unwrap();
        assert!(text.contains("confirmation_timeout_secs = 120"));
        assert!(!text.contains("api_keys"));

        let target = SettingsManager::open(dir.join("b"), TradingConfig::default()).unwrap();
        target.set_api_key("bridge.api_key", "other-secret-value").await.unwrap();
        target.import(&toml_path).await.unwrap();
        assert_eq!(target.trading().await.confirmation_timeout_secs, 120);
        assert_eq!(target.api_keys().await["bridge.api_key"], mask_secret("other-secret-value"));

        let json_path = dir.join("export.json");
        target.export(&json_path).await.unwrap();
        fs::write(dir.join("broken.json"), "{ not json").unwrap();
        assert!(target.import(dir.join("broken.json")).await.is_err());
        assert!(target.import(&json_path).await.is_ok());
        let _ = fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn test_corrupt_file_falls_back_to_defaults() {
        let dir = temp_dir("settings_corrupt");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(SETTINGS_FILE), "{ \"trading\": 7 }").unwrap();
        let manager = SettingsManager::open(&dir, TradingConfig::default()).unwrap();
        assert_eq!(manager.trading().await, TradingConfig::default());
        assert!(read_settings(manager.path()).is_ok());
        let _ = fs::remove_dir_all(&dir);
    }
}
