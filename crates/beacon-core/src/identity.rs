// ── Identity ──
//
// Credentials and device/user identifiers, plus the runtime decision of
// which subscription shape they allow.

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::error::CoreError;

/// Read/write access to durable identity and connection credentials.
///
/// Getters return `None` for unset values; implementations should also
/// map empty strings to `None`. Setters persist immediately.
pub trait IdentityStore {
    fn anon_key(&self) -> Option<SecretString>;
    fn service_url(&self) -> Option<String>;
    fn pairing_code(&self) -> Option<String>;
    fn pairing_realtime_debug(&self) -> bool;

    fn user_uuid(&self) -> Option<String>;
    fn set_user_uuid(&mut self, uuid: &str) -> Result<(), CoreError>;

    fn device_uuid(&self) -> Option<String>;
    fn set_device_uuid(&mut self, uuid: &str) -> Result<(), CoreError>;

    fn last_webex_status(&self) -> Option<String>;
    fn set_last_webex_status(&mut self, status: &str) -> Result<(), CoreError>;

    fn display_name(&self) -> Option<String>;
    fn set_display_name(&mut self, name: &str) -> Result<(), CoreError>;
}

/// Which channel family the stored identity qualifies for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedIdentity {
    User {
        user_uuid: String,
        device_uuid: Option<String>,
    },
    Pairing {
        code: String,
    },
    None,
}

pub fn resolve_identity(store: &dyn IdentityStore) -> ResolvedIdentity {
    if let Some(user_uuid) = non_empty(store.user_uuid()) {
        return ResolvedIdentity::User {
            user_uuid,
            device_uuid: non_empty(store.device_uuid()),
        };
    }
    match non_empty(store.pairing_code()) {
        Some(code) => ResolvedIdentity::Pairing { code },
        None => ResolvedIdentity::None,
    }
}

pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

// ── Subscription modes ───────────────────────────────────────────────

/// Active subscription shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum SubscriptionMode {
    UserChannel,
    DeviceChannel,
    LegacyAllTables,
    LegacyCommandsOnly,
    LegacyPairingsOnly,
    LegacyBroadcast,
}

/// Legacy subscription used when only a pairing code is known.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum LegacyMode {
    #[default]
    AllTables,
    CommandsOnly,
    PairingsOnly,
    Broadcast,
}

impl LegacyMode {
    pub fn subscription_mode(self) -> SubscriptionMode {
        match self {
            Self::AllTables => SubscriptionMode::LegacyAllTables,
            Self::CommandsOnly => SubscriptionMode::LegacyCommandsOnly,
            Self::PairingsOnly => SubscriptionMode::LegacyPairingsOnly,
            Self::Broadcast => SubscriptionMode::LegacyBroadcast,
        }
    }

    /// Tables covered by a row-change subscription. Empty for broadcast.
    pub fn tables(self) -> &'static [&'static str] {
        match self {
            Self::AllTables => &["commands", "pairings", "devices"],
            Self::CommandsOnly => &["commands"],
            Self::PairingsOnly => &["pairings"],
            Self::Broadcast => &[],
        }
    }
}

// ── In-memory store ──────────────────────────────────────────────────

/// Non-persistent [`IdentityStore`], handy for tests and dry runs.
#[derive(Debug, Default)]
pub struct MemoryIdentityStore {
    pub anon_key: Option<String>,
    pub service_url: Option<String>,
    pub pairing_code: Option<String>,
    pub pairing_realtime_debug: bool,
    pub user_uuid: Option<String>,
    pub device_uuid: Option<String>,
    pub last_webex_status: Option<String>,
    pub display_name: Option<String>,
}

impl IdentityStore for MemoryIdentityStore {
    fn anon_key(&self) -> Option<SecretString> {
        non_empty(self.anon_key.clone()).map(SecretString::from)
    }

    fn service_url(&self) -> Option<String> {
        non_empty(self.service_url.clone())
    }

    fn pairing_code(&self) -> Option<String> {
        non_empty(self.pairing_code.clone())
    }

    fn pairing_realtime_debug(&self) -> bool {
        self.pairing_realtime_debug
    }

    fn user_uuid(&self) -> Option<String> {
        non_empty(self.user_uuid.clone())
    }

    fn set_user_uuid(&mut self, uuid: &str) -> Result<(), CoreError> {
        self.user_uuid = Some(uuid.to_owned());
        Ok(())
    }

    fn device_uuid(&self) -> Option<String> {
        non_empty(self.device_uuid.clone())
    }

    fn set_device_uuid(&mut self, uuid: &str) -> Result<(), CoreError> {
        self.device_uuid = Some(uuid.to_owned());
        Ok(())
    }

    fn last_webex_status(&self) -> Option<String> {
        non_empty(self.last_webex_status.clone())
    }

    fn set_last_webex_status(&mut self, status: &str) -> Result<(), CoreError> {
        self.last_webex_status = Some(status.to_owned());
        Ok(())
    }

    fn display_name(&self) -> Option<String> {
        non_empty(self.display_name.clone())
    }

    fn set_display_name(&mut self, name: &str) -> Result<(), CoreError> {
        self.display_name = Some(name.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn user_uuid_wins_over_pairing_code() {
        let store = MemoryIdentityStore {
            user_uuid: Some("u-1".into()),
            device_uuid: Some("  ".into()),
            pairing_code: Some("ABC123".into()),
            ..MemoryIdentityStore::default()
        };
        assert_eq!(
            resolve_identity(&store),
            ResolvedIdentity::User {
                user_uuid: "u-1".into(),
                device_uuid: None,
            }
        );
    }

    #[test]
    fn empty_user_uuid_falls_back_to_pairing() {
        let store = MemoryIdentityStore {
            user_uuid: Some(String::new()),
            pairing_code: Some("ABC123".into()),
            ..MemoryIdentityStore::default()
        };
        assert_eq!(
            resolve_identity(&store),
            ResolvedIdentity::Pairing {
                code: "ABC123".into()
            }
        );
    }

    #[test]
    fn nothing_resolves_to_none() {
        assert_eq!(
            resolve_identity(&MemoryIdentityStore::default()),
            ResolvedIdentity::None
        );
    }

    #[test]
    fn legacy_mode_parses_snake_case() {
        assert_eq!(
            LegacyMode::from_str("commands_only").ok(),
            Some(LegacyMode::CommandsOnly)
        );
        assert_eq!(LegacyMode::Broadcast.to_string(), "broadcast");
        assert_eq!(LegacyMode::AllTables.tables().len(), 3);
        assert!(LegacyMode::Broadcast.tables().is_empty());
    }
}
