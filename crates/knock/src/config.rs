// Dispatcher options
// Decision: Follow the AUTH_ env pattern with a KNOCK_ prefix
// Decision: throw_unauthorized_error is tri-state; unset means true, explicit false is honoured

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::carrier::{AuthRequest, AuthResponse};
use crate::schema::Schema;

/// Default cap on request bodies buffered by the axum adapter
pub const DEFAULT_BODY_LIMIT: usize = 64 * 1024;

/// Hook run after every successful login or auth, whatever the schema
#[async_trait]
pub trait ResponseHook: Send + Sync {
    async fn call(
        &self,
        schema: &Schema,
        req: &mut AuthRequest,
        res: &mut AuthResponse,
    ) -> anyhow::Result<()>;
}

#[async_trait]
impl<F> ResponseHook for F
where
    F: for<'a> Fn(&'a Schema, &'a mut AuthRequest, &'a mut AuthResponse) -> BoxFuture<'a, anyhow::Result<()>>
        + Send
        + Sync,
{
    async fn call(
        &self,
        schema: &Schema,
        req: &mut AuthRequest,
        res: &mut AuthResponse,
    ) -> anyhow::Result<()> {
        self(schema, req, res).await
    }
}

/// Construction options for [`crate::Knock`]
#[derive(Clone, Default)]
pub struct KnockOptions {
    pub global_login_response: Option<Arc<dyn ResponseHook>>,
    pub global_auth_response: Option<Arc<dyn ResponseHook>>,
    /// Forward failures to the pipeline (`true`, the default) or only record
    /// them on the request
    pub throw_unauthorized_error: Option<bool>,
    /// Max body bytes the axum adapter buffers
    pub body_limit: Option<usize>,
}

impl KnockOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load options from environment variables
    pub fn from_env() -> Self {
        let throw_unauthorized_error = std::env::var("KNOCK_THROW_UNAUTHORIZED")
            .ok()
            .and_then(|s| parse_bool(&s));

        let body_limit = std::env::var("KNOCK_BODY_LIMIT")
            .ok()
            .and_then(|s| s.parse().ok());

        Self {
            global_login_response: None,
            global_auth_response: None,
            throw_unauthorized_error,
            body_limit,
        }
    }

    pub fn with_global_login_response<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(&'a Schema, &'a mut AuthRequest, &'a mut AuthResponse) -> BoxFuture<'a, anyhow::Result<()>>
            + Send
            + Sync
            + 'static,
    {
        self.global_login_response = Some(Arc::new(hook));
        self
    }

    pub fn with_global_auth_response<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(&'a Schema, &'a mut AuthRequest, &'a mut AuthResponse) -> BoxFuture<'a, anyhow::Result<()>>
            + Send
            + Sync
            + 'static,
    {
        self.global_auth_response = Some(Arc::new(hook));
        self
    }

    pub fn with_throw_unauthorized_error(mut self, throw: bool) -> Self {
        self.throw_unauthorized_error = Some(throw);
        self
    }

    pub fn with_body_limit(mut self, limit: usize) -> Self {
        self.body_limit = Some(limit);
        self
    }

    pub(crate) fn normalize(self) -> Options {
        Options {
            global_login_response: self.global_login_response,
            global_auth_response: self.global_auth_response,
            throw_unauthorized_error: self.throw_unauthorized_error.unwrap_or(true),
            body_limit: self.body_limit.unwrap_or(DEFAULT_BODY_LIMIT),
        }
    }
}

/// Options with defaults applied
pub(crate) struct Options {
    pub global_login_response: Option<Arc<dyn ResponseHook>>,
    pub global_auth_response: Option<Arc<dyn ResponseHook>>,
    pub throw_unauthorized_error: bool,
    pub body_limit: usize,
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
