//! Identity subcommand handlers.

use serde::Serialize;

use beacon_config::FileIdentityStore;
use beacon_core::{IdentityStore, LegacyMode, ResolvedIdentity, SubscriptionMode, resolve_identity};

use crate::cli::{GlobalOpts, IdentityArgs, IdentityCommand};
use crate::commands::{load_config, open_identity};
use crate::error::CliError;
use crate::output::{self, Field};

#[derive(Debug, Serialize)]
struct IdentityView {
    path: String,
    user_uuid: Option<String>,
    device_uuid: Option<String>,
    pairing_code: Option<String>,
    last_webex_status: Option<String>,
    display_name: Option<String>,
    subscription: Option<String>,
}

impl IdentityView {
    fn new(store: &FileIdentityStore, legacy_mode: LegacyMode) -> Self {
        let subscription = match resolve_identity(store) {
            ResolvedIdentity::User { .. } => Some(SubscriptionMode::UserChannel),
            ResolvedIdentity::Pairing { .. } => Some(legacy_mode.subscription_mode()),
            ResolvedIdentity::None => None,
        };
        Self {
            path: store.path().display().to_string(),
            user_uuid: store.user_uuid(),
            device_uuid: store.device_uuid(),
            pairing_code: store.pairing_code(),
            last_webex_status: store.last_webex_status(),
            display_name: store.display_name(),
            subscription: subscription.map(|m| m.to_string()),
        }
    }

    fn rows(&self) -> Vec<Field> {
        vec![
            Field::new("path", self.path.clone()),
            Field::optional("user_uuid", self.user_uuid.as_deref()),
            Field::optional("device_uuid", self.device_uuid.as_deref()),
            Field::optional("pairing_code", self.pairing_code.as_deref()),
            Field::optional("last_webex_status", self.last_webex_status.as_deref()),
            Field::optional("display_name", self.display_name.as_deref()),
            Field::optional("subscription", self.subscription.as_deref()),
        ]
    }
}

pub fn handle(args: IdentityArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = load_config(global)?;
    let mut store = open_identity(&cfg)?;

    match args.command {
        IdentityCommand::Show => {
            let view = IdentityView::new(&store, cfg.realtime.legacy_mode);
            let rendered = output::render_detail(&global.output, &view, &view.rows())?;
            output::print_output(&rendered);
        }
        IdentityCommand::SetUser { uuid } => {
            store.set_user_uuid(&uuid.to_string())?;
            tracing::info!(user_uuid = %uuid, "User uuid saved");
            output::print_output(&format!("user_uuid = {uuid}"));
        }
        IdentityCommand::SetDevice { uuid } => {
            if cfg.device.device_uuid.is_some() {
                tracing::warn!("device.device_uuid in config overrides the persisted value");
            }
            store.set_device_uuid(&uuid.to_string())?;
            output::print_output(&format!("device_uuid = {uuid}"));
        }
        IdentityCommand::Clear => {
            store.clear().map_err(CliError::Identity)?;
            output::print_output(&format!("Cleared {}", store.path().display()));
        }
    }
    Ok(())
}
