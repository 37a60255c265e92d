//! # mymark-sync Server
//!
//! The network face of the sync service:
//!
//! - `GET /automerge`: WebSocket endpoint speaking the sync protocol
//! - `GET /api/sync/document-url`: the caller's workspace root, if any
//! - `POST /api/sync/document-url`: record the caller's workspace root once
//! - `GET /health`
//!
//! Identity comes from a [`SessionResolver`]; by default a header set by the
//! authenticating proxy.

pub mod error;
pub mod routes;
pub mod session;
pub mod socket;

pub use error::ApiError;
pub use routes::{build_router, AppState, DocumentUrlResponse, StoreDocumentUrlRequest};
pub use session::{SessionResolver, TrustedHeaderResolver, DEFAULT_USER_HEADER};
pub use socket::WebSocketConnection;
