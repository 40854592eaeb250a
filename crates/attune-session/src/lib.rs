//! Per-session sync layer for the Attune control room.
//!
//! Wires one [`attune_socket::SessionSocket`], one
//! [`attune_voice::EventForwarder`] and one [`attune_graph::GraphProjection`]
//! together, and adds the REST client, the local session record store and
//! environment-driven runtime configuration.

pub mod api_client;
pub mod record_store;
pub mod runtime_config;
pub mod sync;

pub use api_client::{
    AccessTokenResponse, ApiClientConfig, ApiClientError, BackendApiClient, CreateSessionResponse,
    EndSessionResponse, TopConcept,
};
pub use record_store::{SessionRecord, SessionRecordStore, SESSION_RECORDS_FILE_NAME};
pub use runtime_config::{derive_ws_base_url, RuntimeConfig, RuntimeConfigError};
pub use sync::{SessionSync, SessionSyncState, SocketEnvelopeSink, SyncConfig};
