// Login/auth execution
// Decision: Hooks only run once a user is established and no failure is recorded
// Decision: A schema finishing the response inside knockLogin/knockAuth is a request failure

use serde_json::Value;

use crate::capability::{Capability, Method};
use crate::carrier::{is_truthy, normalize_user, AuthRequest, AuthResponse};
use crate::error::{KnockError, Result, UnauthorizedError};
use crate::middleware::Knock;
use crate::schema::Schema;

/// Message for a schema that finished the response itself
pub const FINISHED_RESPONSE_MESSAGE: &str = "schema must not finish the response";

/// Apply the set-user rule to a handler's return value, falling back to a
/// user the handler placed on the request itself.
pub(crate) fn establish_user(req: &mut AuthRequest, returned: Option<Value>) {
    let user = returned.filter(is_truthy).or_else(|| req.take_user());
    req.replace_user(user.and_then(normalize_user));
}

fn ensure_unfinished(schema: &Schema, res: &AuthResponse) -> Result<()> {
    if res.is_finished() {
        tracing::warn!(schema = %schema.name(), "Schema finished the response");
        return Err(UnauthorizedError::new(Some(schema.name()), FINISHED_RESPONSE_MESSAGE).into());
    }
    Ok(())
}

impl Knock {
    /// Run `schema`'s knockLogin with the full hook pipeline.
    ///
    /// On success the companion auth schema's `create` hook runs, then the
    /// schema's `loginResponse`, then the global login hook.
    pub async fn login(
        &self,
        schema: &Schema,
        req: &mut AuthRequest,
        res: &mut AuthResponse,
    ) -> Result<Option<Value>> {
        if !self.is_valid() {
            return Err(KnockError::NoLoginSchema);
        }

        let returned = schema.call(Method::KnockLogin, req, res).await?;
        establish_user(req, returned);
        ensure_unfinished(schema, res)?;

        if req.is_authenticated() {
            self.create_session(req, res).await?;

            if schema.implements(Method::LoginResponse) {
                schema.call(Method::LoginResponse, req, res).await?;
            }
            if let Some(hook) = &self.options().global_login_response {
                hook.call(schema, req, res).await?;
            }
            tracing::debug!(schema = %schema.name(), "Login succeeded");
        }

        Ok(req.user().cloned())
    }

    /// Run `schema`'s knockAuth with the full hook pipeline
    pub async fn auth(
        &self,
        schema: &Schema,
        req: &mut AuthRequest,
        res: &mut AuthResponse,
    ) -> Result<Option<Value>> {
        let returned = schema.call(Method::KnockAuth, req, res).await?;
        establish_user(req, returned);
        ensure_unfinished(schema, res)?;

        if req.is_authenticated() {
            if schema.implements(Method::AuthResponse) {
                schema.call(Method::AuthResponse, req, res).await?;
            }
            if let Some(hook) = &self.options().global_auth_response {
                hook.call(schema, req, res).await?;
            }
            tracing::debug!(schema = %schema.name(), "Auth succeeded");
        }

        Ok(req.user().cloned())
    }

    /// Mint a session through the auth schema selected by the request, or the default one
    async fn create_session(&self, req: &mut AuthRequest, res: &mut AuthResponse) -> Result<()> {
        let selector = req.param(Capability::Auth.selector()).map(str::to_owned);
        let Some(auth) = self.prefer_schema(selector.as_deref(), Some(Capability::Auth)) else {
            tracing::debug!(selector = ?selector, "No auth schema for session creation");
            return Ok(());
        };

        if auth.implements(Method::Create) {
            auth.call(Method::Create, req, res).await?;
            tracing::debug!(schema = %auth.name(), "Session created");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KnockOptions;
    use axum::http::StatusCode;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn login_returning(value: Value) -> Schema {
        Schema::builder("login")
            .knock_login(move |_, _, _| {
                let value = value.clone();
                Box::pin(async move { Ok(Some(value)) })
            })
            .build()
    }

    #[test]
    fn test_establish_user_prefers_return_value() {
        let mut req = AuthRequest::new();
        req.set_user(json!({"from": "request"}));
        establish_user(&mut req, Some(json!({"from": "return"})));
        assert_eq!(req.user(), Some(&json!({"from": "return"})));
    }

    #[test]
    fn test_establish_user_falls_back_to_request() {
        let mut req = AuthRequest::new();
        req.set_user(json!({"from": "request"}));
        establish_user(&mut req, Some(json!(false)));
        assert_eq!(req.user(), Some(&json!({"from": "request"})));

        let mut req = AuthRequest::new();
        establish_user(&mut req, Some(json!("alice")));
        assert_eq!(req.user(), Some(&json!({"user": "alice"})));
    }

    #[tokio::test]
    async fn test_login_requires_valid_registry() {
        let knock = Knock::new(KnockOptions::default());
        let schema = login_returning(json!({"id": 1}));
        let mut req = AuthRequest::new();
        let mut res = AuthResponse::new();

        let result = knock.login(&schema, &mut req, &mut res).await;
        assert!(matches!(result, Err(KnockError::NoLoginSchema)));
    }

    #[tokio::test]
    async fn test_login_runs_hooks_in_order() {
        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let global_order = order.clone();
        let knock = Knock::new(KnockOptions::new().with_global_login_response(move |schema, _, _| {
            global_order.lock().push(format!("global:{}", schema.name()));
            Box::pin(async { Ok(()) })
        }));

        let create_order = order.clone();
        let session = Schema::builder("session")
            .knock_auth(|_, _, _| Box::pin(async { Ok(None) }))
            .create(move |_, req, _| {
                create_order.lock().push(format!("create:{}", req.user().is_some()));
                Box::pin(async { Ok(None) })
            })
            .build();

        let knock_order = order.clone();
        let response_order = order.clone();
        let password = Schema::builder("password")
            .knock_login(move |_, _, _| {
                knock_order.lock().push("knockLogin".to_string());
                Box::pin(async { Ok(Some(json!({"id": 1}))) })
            })
            .login_response(move |_, _, _| {
                response_order.lock().push("loginResponse".to_string());
                Box::pin(async { Ok(None) })
            })
            .build();

        knock.enable(None, password, true, None).unwrap();
        knock.enable(None, session, true, None).unwrap();

        let schema = knock.registry().get("password").unwrap();
        let mut req = AuthRequest::new();
        let mut res = AuthResponse::new();
        let user = knock.login(&schema, &mut req, &mut res).await.unwrap();

        assert_eq!(user, Some(json!({"id": 1})));
        assert_eq!(
            *order.lock(),
            vec![
                "knockLogin".to_string(),
                "create:true".to_string(),
                "loginResponse".to_string(),
                "global:password".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_login_skips_hooks_without_user() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let knock = Knock::new(KnockOptions::new().with_global_login_response(move |_, _, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }));
        knock.enable(None, login_returning(json!(null)), true, None).unwrap();

        let schema = knock.registry().get("login").unwrap();
        let mut req = AuthRequest::new();
        let mut res = AuthResponse::new();
        let user = knock.login(&schema, &mut req, &mut res).await.unwrap();

        assert!(user.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_login_uses_selected_auth_schema_for_create() {
        let knock = Knock::default();
        knock.enable(None, login_returning(json!({"id": 1})), true, None).unwrap();

        for name in ["cookie", "token"] {
            let tag = name.to_string();
            let schema = Schema::builder(name)
                .knock_auth(|_, _, _| Box::pin(async { Ok(None) }))
                .create(move |_, _, res| {
                    let tag = tag.clone();
                    Box::pin(async move {
                        res.headers_mut()
                            .insert("x-session-schema", tag.parse().unwrap());
                        Ok(None)
                    })
                })
                .build();
            knock.enable(None, schema, true, None).unwrap();
        }

        let schema = knock.registry().get("login").unwrap();
        let mut req = AuthRequest::new().with_query("knockAuth", "token");
        let mut res = AuthResponse::new();
        knock.login(&schema, &mut req, &mut res).await.unwrap();
        assert_eq!(res.headers()["x-session-schema"], "token");

        let mut req = AuthRequest::new();
        let mut res = AuthResponse::new();
        knock.login(&schema, &mut req, &mut res).await.unwrap();
        assert_eq!(res.headers()["x-session-schema"], "cookie");
    }

    #[tokio::test]
    async fn test_finished_response_fails_login() {
        let knock = Knock::default();
        let schema = Schema::builder("rude")
            .knock_login(|_, _, res| {
                Box::pin(async move {
                    res.finish(StatusCode::OK, "done");
                    Ok(Some(json!({"id": 1})))
                })
            })
            .build();
        knock.enable(None, schema, true, None).unwrap();

        let schema = knock.registry().get("rude").unwrap();
        let mut req = AuthRequest::new();
        let mut res = AuthResponse::new();
        let result = knock.login(&schema, &mut req, &mut res).await;

        match result {
            Err(KnockError::Unauthorized(err)) => {
                assert_eq!(err.message(), FINISHED_RESPONSE_MESSAGE);
                assert_eq!(err.schema(), Some("rude"));
            }
            other => panic!("expected unauthorized error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_auth_runs_auth_response_and_global_hook() {
        let calls = Arc::new(AtomicUsize::new(0));
        let global = calls.clone();
        let knock = Knock::new(KnockOptions::new().with_global_auth_response(move |_, _, _| {
            global.fetch_add(10, Ordering::SeqCst);
            Box::pin(async { Ok(()) })
        }));

        let local = calls.clone();
        let schema = Schema::builder("session")
            .knock_auth(|_, req, _| {
                Box::pin(async move {
                    req.set_user(json!({"sid": "abc"}));
                    Ok(None)
                })
            })
            .auth_response(move |_, _, _| {
                local.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Ok(None) })
            })
            .build();

        let mut req = AuthRequest::new();
        let mut res = AuthResponse::new();
        let user = knock.auth(&schema, &mut req, &mut res).await.unwrap();

        assert_eq!(user, Some(json!({"sid": "abc"})));
        assert_eq!(calls.load(Ordering::SeqCst), 11);
    }
}
