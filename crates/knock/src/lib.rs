//! Pluggable login/auth dispatcher for axum middleware pipelines.
//!
//! Callers register named [`Schema`]s implementing a login capability
//! (`knockLogin`: authenticate credentials, establish a session marker)
//! and/or an auth capability (`knockAuth`: validate an existing marker).
//! [`Knock`] hands out middleware that picks a schema per request, runs it,
//! and turns the outcome into a user identity or an [`UnauthorizedError`].
//!
//! ```ignore
//! use knock::{layer::guard, Knock, KnockOptions, Schema};
//!
//! let knock = Knock::new(KnockOptions::from_env());
//! knock.enable(None, password_schema(), true, None)?;
//!
//! let app = Router::new().route(
//!     "/login",
//!     post(login).route_layer(from_fn_with_state(knock.knock_login(None), guard)),
//! );
//! ```
//!
//! Design decisions:
//! - Schemas are descriptors built once; which methods exist is known at registration
//! - The default flag lives in the registry entry, not on the schema
//! - Configuration errors (`KnockError`) are never turned into request failures

pub mod capability;
pub mod carrier;
pub mod config;
pub mod engine;
pub mod error;
pub mod layer;
pub mod middleware;
pub mod registry;
pub mod schema;

pub use capability::{Capability, Method, MethodKind};
pub use carrier::{normalize_user, AuthRequest, AuthResponse};
pub use config::{KnockOptions, ResponseHook};
pub use error::{KnockError, Result, UnauthorizedError};
pub use layer::{guard, Identity, Unauthorized};
pub use middleware::{Flow, Knock, SchemaMiddleware};
pub use registry::SchemaRegistry;
pub use schema::{verifier, HandlerResult, Schema, SchemaBuilder, SchemaHandler, Verifier};
