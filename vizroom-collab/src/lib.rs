//! # vizroom-collab: Collaborative session sync for VizRoom
//!
//! Keeps every participant of a room looking at the same software landscape:
//! open applications, expanded components, highlights, detached menus,
//! who holds what, and where everyone stands.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────┐   WebSocket    ┌───────────────────┐
//! │ CollabSession     │ ◄────────────► │ SyncServer        │
//! │  ├ Transport      │  bincode Frame │  ├ RoomRegistry   │
//! │  ├ Presence       │                │  └ RoomActor ×N   │
//! │  ├ Highlighting   │                │     ├ RoomState   │
//! │  ├ Ownership      │   HTTP/JSON    │     └ Broadcast-  │
//! │  ├ Spectate       │ ◄────────────► │       Group       │
//! │  └ Scene          │  lobby API     │                   │
//! └───────────────────┘                └───────────────────┘
//! ```
//!
//! ## Modules
//!
//! Client side:
//! - [`protocol`]: Event catalog and wire frame codec
//! - [`transport`]: WebSocket connection, nonce-correlated requests, offline fallback
//! - [`presence`]: Connection status and remote participants
//! - [`serializer`]: Room snapshots and the restore completeness check
//! - [`highlighting`]: Local and remote highlight application
//! - [`ownership`]: Grab tokens, object moves, detached menus
//! - [`spectate`]: Follow another participant's camera
//! - [`lobby`]: Room lifecycle REST client
//! - [`session`]: Ties the above to one `Scene`
//!
//! Relay side:
//! - [`room`]: Authoritative room state and its actor
//! - [`registry`]: Rooms and lobby tickets
//! - [`broadcast`]: Per-room fan-out
//! - [`server`]: WebSocket sync server
//! - [`api`]: Lobby REST API

pub mod protocol;
pub mod transport;
pub mod presence;
pub mod serializer;
pub mod highlighting;
pub mod ownership;
pub mod spectate;
pub mod lobby;
pub mod session;

pub mod broadcast;
pub mod room;
pub mod registry;
pub mod server;
pub mod api;

// Re-exports for convenience
pub use protocol::{encode_event, Decoded, Frame, ParticipantInfo, ProtocolError, RoomEvent};
pub use transport::{Transport, TransportConfig, TransportError, TransportEvent};
pub use presence::{ConnectionStatus, Participant, PresenceError, PresenceRegistry};
pub use serializer::{restore_room, serialize_room, RestoreOutcome, RestoreSummary};
pub use highlighting::HighlightingSynchronizer;
pub use ownership::{GrabToken, OwnershipArbiter, OwnershipError};
pub use spectate::{SpectateController, SpectateState};
pub use lobby::{
    CreateRoomPayload, JoinLobbyPayload, LobbyError, LobbyJoinedRecord, RoomCreatedRecord, RoomLifecycleClient,
    RoomListRecord,
};
pub use session::{CollabSession, SessionConfig, SessionError, SessionNotice};
pub use broadcast::{BroadcastGroup, BroadcastStats, RelayFrame};
pub use room::{RoomHandle, RoomSettings, RoomState};
pub use registry::{LobbyTicket, RegistryError, RoomRegistry};
pub use server::{ServerConfig, ServerStats, SyncServer};
