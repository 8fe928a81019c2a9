//! HTTP surface of the leaderboard service.
//!
//! A thin Axum layer over [`leaderboard_core::Leaderboard`]: handlers
//! decode the request, call one engine operation with a request-scoped
//! cancellation token, and wrap the result in the `{code, msg, data}`
//! [`Envelope`](error::Envelope).
//!
//! - [`handlers`] -- game routes (submit, top, rank, remove)
//! - [`admin`] -- operator routes (tenants, configs, maintenance, alerts, health)
//!
//! A client that disconnects mid-request drops its handler, which cancels
//! the request token; a score whose fast-store write already committed
//! still reaches the durable store.

pub mod admin;
pub mod error;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;

pub use error::{ApiError, Envelope};
pub use router::build_router;
pub use server::{ServerError, start_server};
pub use state::AppState;
