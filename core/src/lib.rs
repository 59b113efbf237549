//! Client core for the Vinca spaced-repetition study API.
//!
//! # Overview
//! Builds authenticated `HttpRequest` values and parses `HttpResponse`
//! values without touching the network (host-does-IO pattern). `Gateway`
//! pairs that core with a blocking transport and durable credential
//! storage; `Dashboard` keeps the study screen's derived values fresh.
//!
//! # Design
//! - `VincaClient` is stateless: it holds only the base URL.
//! - Each endpoint is split into `build_*` and `parse_*`, so the I/O
//!   boundary is explicit and every request shape is testable offline.
//! - The bearer token travels in an explicit `Session`, never in globals.
//! - Failures are `ApiError` values; presentation is the caller's concern.
//! - Derived refreshes are ordered by ticket generation, not completion.

pub mod client;
pub mod config;
pub mod derived;
pub mod error;
pub mod gateway;
pub mod http;
pub mod session;
pub mod transport;
pub mod types;

pub use client::{VincaClient, DEFAULT_BASE_URL};
pub use config::ClientConfig;
pub use derived::{Count, Dashboard, DashboardInputs, Derived, Inputs, Ticket};
pub use error::{ApiError, Result};
pub use gateway::Gateway;
pub use http::{HttpMethod, HttpRequest, HttpResponse};
pub use session::{Credential, CredentialStore, FileCredentialStore, MemoryCredentialStore, Session};
pub use transport::{Transport, UreqTransport};
pub use types::{
    temporary_id, Card, CardId, Criteria, Filters, Grade, MediaBlob, MediaId, Metadata, NextTwoDue,
    RecordId, Sort, UnixDay,
};
