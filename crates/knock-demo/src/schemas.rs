// Demo schemas: password login backed by cookie sessions
// Decision: Sessions live in process memory; restarting the server logs everyone out
// Decision: The password schema only extracts credentials, checking them is the verifier's job

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum_extra::extract::cookie::{Cookie, SameSite};
use knock::{
    verifier, AuthRequest, AuthResponse, HandlerResult, Method, Schema, SchemaHandler,
    UnauthorizedError, Verifier,
};
use parking_lot::RwLock;
use rand::RngCore;
use serde_json::{json, Value};

pub const PASSWORD_SCHEMA: &str = "password";
pub const SESSION_SCHEMA: &str = "session";
pub const SESSION_COOKIE: &str = "session";

/// In-memory session tokens
#[derive(Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<String, Value>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a token for `user`
    pub fn open(&self, user: Value) -> String {
        let mut bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut bytes);
        let token = hex::encode(bytes);
        self.sessions.write().insert(token.clone(), user);
        token
    }

    pub fn get(&self, token: &str) -> Option<Value> {
        self.sessions.read().get(token).cloned()
    }

    pub fn close(&self, token: &str) -> Option<Value> {
        self.sessions.write().remove(token)
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn unauthorized(schema: &str, message: &str) -> anyhow::Error {
    UnauthorizedError::new(Some(schema), message).into()
}

/// Login schema reading `username` and `password` parameters
pub fn password_schema() -> Schema {
    Schema::builder(PASSWORD_SCHEMA)
        .knock_login(|schema, req, _| {
            Box::pin(async move {
                let (Some(username), Some(password)) = (req.param("username"), req.param("password"))
                else {
                    return Err(unauthorized(schema.name(), "username and password required"));
                };
                let credentials = json!({ "username": username, "password": password });
                schema.verify(credentials).await
            })
        })
        .build()
}

/// Verifier accepting a single configured account
pub fn single_user_verifier(username: String, password: String) -> Arc<dyn Verifier> {
    verifier(move |credentials: Value| {
        let matches = credentials.get("username").and_then(Value::as_str) == Some(username.as_str())
            && credentials.get("password").and_then(Value::as_str) == Some(password.as_str());
        let user = json!({ "name": username.as_str() });
        async move {
            if matches {
                Ok(Some(user))
            } else {
                Err(unauthorized(PASSWORD_SCHEMA, "invalid credentials"))
            }
        }
    })
}

/// Auth schema keeping users in `store` behind a `session` cookie
pub fn session_schema(store: SessionStore) -> Schema {
    Schema::builder(SESSION_SCHEMA)
        .handler(Method::KnockAuth, ValidateSession(store.clone()))
        .handler(Method::Create, CreateSession(store.clone()))
        .handler(Method::Revoke, RevokeSession(store))
        .build()
}

struct ValidateSession(SessionStore);

#[async_trait]
impl SchemaHandler for ValidateSession {
    async fn call(
        &self,
        schema: &Schema,
        req: &mut AuthRequest,
        _res: &mut AuthResponse,
    ) -> HandlerResult {
        let Some(token) = req.cookies().get(SESSION_COOKIE) else {
            return Err(unauthorized(schema.name(), "missing session"));
        };
        match self.0.get(token) {
            Some(user) => Ok(Some(user)),
            None => Err(unauthorized(schema.name(), "invalid or expired session")),
        }
    }
}

struct CreateSession(SessionStore);

#[async_trait]
impl SchemaHandler for CreateSession {
    async fn call(
        &self,
        _schema: &Schema,
        req: &mut AuthRequest,
        res: &mut AuthResponse,
    ) -> HandlerResult {
        let Some(user) = req.user().cloned() else {
            return Ok(None);
        };

        let token = self.0.open(user);
        tracing::debug!(sessions = self.0.len(), "Session opened");
        res.add_cookie(
            Cookie::build((SESSION_COOKIE, token))
                .path("/")
                .http_only(true)
                .same_site(SameSite::Lax)
                .build(),
        );
        Ok(None)
    }
}

struct RevokeSession(SessionStore);

#[async_trait]
impl SchemaHandler for RevokeSession {
    async fn call(
        &self,
        schema: &Schema,
        req: &mut AuthRequest,
        res: &mut AuthResponse,
    ) -> HandlerResult {
        let user = req
            .cookies()
            .get(SESSION_COOKIE)
            .and_then(|token| self.0.close(token));

        match user {
            Some(user) => {
                res.remove_cookie(Cookie::build(SESSION_COOKIE).path("/"));
                Ok(Some(user))
            }
            None => Err(unauthorized(schema.name(), "no active session")),
        }
    }
}
