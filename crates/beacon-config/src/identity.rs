// ── Identity persistence ──
//
// `identity.toml` holds the values the device learns at runtime (assigned
// user, device uuid, last known status). Credentials come from `Config`
// and are never written back.

use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use beacon_core::{CoreError, IdentityStore};

use crate::{Config, ConfigError, resolve_access_token, resolve_anon_key};

/// On-disk identity record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PersistedIdentity {
    pub user_uuid: Option<String>,
    pub device_uuid: Option<String>,
    pub last_webex_status: Option<String>,
    pub display_name: Option<String>,
}

impl PersistedIdentity {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => toml::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// [`IdentityStore`] backed by `identity.toml` plus read-only settings
/// from [`Config`]. Every setter rewrites the file.
#[derive(Debug)]
pub struct FileIdentityStore {
    path: PathBuf,
    persisted: PersistedIdentity,
    anon_key: Option<SecretString>,
    access_token: Option<SecretString>,
    service_url: Option<String>,
    pairing_code: Option<String>,
    fixed_device_uuid: Option<String>,
    pairing_realtime_debug: bool,
}

impl FileIdentityStore {
    /// Open the identity file at `path` with no connection settings.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let persisted = PersistedIdentity::load(&path)?;
        Ok(Self {
            path,
            persisted,
            anon_key: None,
            access_token: None,
            service_url: None,
            pairing_code: None,
            fixed_device_uuid: None,
            pairing_realtime_debug: false,
        })
    }

    /// Open the identity file named by `config` and attach its settings.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        let mut store = Self::open(config.identity_path())?;
        store.anon_key = resolve_anon_key(&config.realtime);
        store.access_token = resolve_access_token(&config.realtime);
        store.service_url = trimmed(config.realtime.service_url.as_deref());
        store.pairing_code = trimmed(config.device.pairing_code.as_deref());
        store.fixed_device_uuid = trimmed(config.device.device_uuid.as_deref());
        store.pairing_realtime_debug = config.realtime.pairing_realtime_debug;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn persisted(&self) -> &PersistedIdentity {
        &self.persisted
    }

    /// Access token from config, handed to the backend session.
    pub fn access_token(&self) -> Option<SecretString> {
        self.access_token
            .as_ref()
            .map(|t| SecretString::from(t.expose_secret().to_owned()))
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        self.persisted.save(&self.path)?;
        tracing::debug!(path = %self.path.display(), "Identity saved");
        Ok(())
    }

    /// Forget everything learned at runtime and remove the file.
    pub fn clear(&mut self) -> Result<(), ConfigError> {
        self.persisted = PersistedIdentity::default();
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn update(
        &mut self,
        field: &'static str,
        value: &str,
        apply: impl FnOnce(&mut PersistedIdentity, String),
    ) -> Result<(), CoreError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(CoreError::InvalidIdentity {
                field,
                reason: "value is empty".into(),
            });
        }
        apply(&mut self.persisted, value.to_owned());
        self.save().map_err(CoreError::from)
    }
}

fn trimmed(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_owned)
}

impl IdentityStore for FileIdentityStore {
    fn anon_key(&self) -> Option<SecretString> {
        self.anon_key
            .as_ref()
            .map(|k| SecretString::from(k.expose_secret().to_owned()))
    }

    fn service_url(&self) -> Option<String> {
        self.service_url.clone()
    }

    fn pairing_code(&self) -> Option<String> {
        self.pairing_code.clone()
    }

    fn pairing_realtime_debug(&self) -> bool {
        self.pairing_realtime_debug
    }

    fn user_uuid(&self) -> Option<String> {
        trimmed(self.persisted.user_uuid.as_deref())
    }

    fn set_user_uuid(&mut self, uuid: &str) -> Result<(), CoreError> {
        self.update("user_uuid", uuid, |p, v| p.user_uuid = Some(v))
    }

    fn device_uuid(&self) -> Option<String> {
        self.fixed_device_uuid
            .clone()
            .or_else(|| trimmed(self.persisted.device_uuid.as_deref()))
    }

    fn set_device_uuid(&mut self, uuid: &str) -> Result<(), CoreError> {
        self.update("device_uuid", uuid, |p, v| p.device_uuid = Some(v))
    }

    fn last_webex_status(&self) -> Option<String> {
        trimmed(self.persisted.last_webex_status.as_deref())
    }

    fn set_last_webex_status(&mut self, status: &str) -> Result<(), CoreError> {
        self.update("last_webex_status", status, |p, v| {
            p.last_webex_status = Some(v);
        })
    }

    fn display_name(&self) -> Option<String> {
        trimmed(self.persisted.display_name.as_deref())
    }

    fn set_display_name(&mut self, name: &str) -> Result<(), CoreError> {
        self.update("display_name", name, |p, v| p.display_name = Some(v))
    }
}
