//! # Bulwark Axum Integration
//!
//! Axum glue for the bulwark login guard:
//!
//! - [`ConnectionInfo`] extracts a [`bulwark::RequestContext`] from the request,
//!   resolving the client IP through the usual forwarding headers before falling
//!   back to the peer address from [`axum::extract::ConnectInfo`]
//! - [`GuardRejection`] turns guard errors into JSON responses, including
//!   `429 Too Many Requests` with `Retry-After` for locked out callers
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::{net::SocketAddr, sync::Arc};
//! use axum::{Json, Router, extract::State, routing::post};
//! use bulwark::{GuardOrchestrator, GuardOrchestratorBuilder, InMemoryRepositoryProvider};
//! use bulwark_axum::{ConnectionInfo, GuardRejection};
//!
//! type Guard = Arc<GuardOrchestrator<InMemoryRepositoryProvider>>;
//!
//! #[derive(serde::Deserialize)]
//! struct Login {
//!     email: String,
//!     password: String,
//! }
//!
//! async fn login(
//!     State(guard): State<Guard>,
//!     ConnectionInfo(ctx): ConnectionInfo,
//!     Json(login): Json<Login>,
//! ) -> Result<&'static str, GuardRejection> {
//!     guard.check_login_allowed(&ctx, &login.email).await?;
//!
//!     let valid = login.password == "correct horse battery staple";
//!     guard.record_login_attempt(&ctx, &login.email, valid).await?;
//!
//!     Ok(if valid { "welcome" } else { "invalid credentials" })
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let guard: Guard = Arc::new(
//!         GuardOrchestratorBuilder::new()
//!             .with_in_memory()
//!             .build()
//!             .await
//!             .unwrap(),
//!     );
//!
//!     let app = Router::new()
//!         .route("/login", post(login))
//!         .with_state(guard);
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await.unwrap();
//!     axum::serve(
//!         listener,
//!         app.into_make_service_with_connect_info::<SocketAddr>(),
//!     )
//!     .await
//!     .unwrap();
//! }
//! ```

mod error;
mod extractors;
mod types;

pub use error::{GuardRejection, Result};
pub use types::{ConnectionInfo, Principal};
