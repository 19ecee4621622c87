// beacon-core: Realtime sync supervision, event routing, and command ingestion.

pub mod clock;
pub mod command;
pub mod context;
pub mod error;
pub mod host;
pub mod identity;
pub mod pairing;
pub mod router;
pub mod state;
pub mod supervisor;

// ── Primary re-exports ──────────────────────────────────────────────
pub use clock::{Clock, Tick};
pub use command::{
    Command, CommandEngine, CommandRejection, CommandStatus, QueuedCommandEngine,
    RecentCommands, build_command,
};
pub use context::{BackendSession, ConfigSync, Platform, SyncContext};
pub use error::CoreError;
pub use host::{ConfigRequest, HostPlatform, PendingConfigBroadcast, StaticSession};
pub use identity::{
    IdentityStore, LegacyMode, MemoryIdentityStore, ResolvedIdentity, SubscriptionMode,
    resolve_identity,
};
pub use pairing::PairingSnapshot;
pub use router::{BroadcastEvent, DropReason, EventRouter, RouteOutcome, RouterStats};
pub use state::{DeviceState, StatusSource};
pub use supervisor::{ConnectionState, InitFailure, Supervisor};
