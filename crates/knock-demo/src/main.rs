// Knock demo server
// Decision: Password login with cookie sessions, the smallest setup exercising login, auth and revoke
// Decision: Dispatcher options come from KNOCK_* env vars, demo settings from KNOCK_DEMO_*

mod config;
mod schemas;

use anyhow::{Context, Result};
use axum::{
    extract::State,
    middleware::from_fn_with_state,
    routing::{get, post},
    Json, Router,
};
use knock::{guard, Identity, Knock, KnockOptions};
use serde::Serialize;
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::DemoConfig;
use crate::schemas::{password_schema, session_schema, single_user_verifier, SessionStore};

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    schemas: Vec<String>,
}

async fn health(State(knock): State<Knock>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        schemas: knock.registry().names(),
    })
}

async fn login(Identity(user): Identity) -> Json<Value> {
    Json(json!({ "user": user }))
}

async fn me(Identity(user): Identity) -> Json<Value> {
    Json(user)
}

async fn logout(Identity(user): Identity) -> Json<Value> {
    Json(json!({ "revoked": user }))
}

/// Register the demo schemas on `knock`
fn configure(knock: &Knock, config: &DemoConfig, store: SessionStore) -> Result<()> {
    let account = config.account.clone();
    knock
        .enable(
            None,
            password_schema(),
            true,
            Some(single_user_verifier(account.username, account.password)),
        )
        .context("Failed to enable password schema")?;
    knock
        .enable(None, session_schema(store), true, None)
        .context("Failed to enable session schema")?;
    Ok(())
}

fn build_router(knock: &Knock) -> Router {
    Router::new()
        .route("/health", get(health).with_state(knock.clone()))
        .route(
            "/login",
            post(login).route_layer(from_fn_with_state(knock.knock_login(None), guard)),
        )
        .route(
            "/me",
            get(me).route_layer(from_fn_with_state(knock.knock_auth(None), guard)),
        )
        .route(
            "/logout",
            post(logout).route_layer(from_fn_with_state(knock.revoke(None), guard)),
        )
}

#[tokio::main]
async fn main() -> Result<()> {
    if let Ok(path) = dotenvy::dotenv() {
        eprintln!("Loaded environment from {}", path.display());
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "knock=debug,knock_demo=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("knock-demo starting...");

    let config = DemoConfig::from_env();
    let options = KnockOptions::from_env();
    let knock = Knock::new(options);
    configure(&knock, &config, SessionStore::new())?;

    tracing::info!(
        schemas = ?knock.registry().names(),
        throw_unauthorized = knock.throws_unauthorized_error(),
        body_limit = knock.body_limit(),
        "Knock configured"
    );

    let app = build_router(&knock).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(&config.addr)
        .await
        .context("Failed to bind to address")?;
    tracing::info!("HTTP server listening on {}", config.addr);

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_app() -> Router {
        let knock = Knock::default();
        configure(&knock, &DemoConfig::default(), SessionStore::new()).unwrap();
        build_router(&knock)
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    fn session_cookie(response: &axum::response::Response) -> String {
        let set_cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|v| v.to_str().ok())
            .unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }

    #[tokio::test]
    async fn test_health_lists_schemas() {
        let response = test_app()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["schemas"], json!(["password", "session"]));
    }

    #[tokio::test]
    async fn test_login_me_logout() {
        let app = test_app();

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/login")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"username":"demo","password":"demo"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let cookie = session_cookie(&response);
        assert!(cookie.starts_with("session="));
        assert_eq!(json_body(response).await, json!({"user": {"name": "demo"}}));

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/me")
                    .header(header::COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await, json!({"name": "demo"}));

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/logout")
                    .header(header::COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(
                Request::builder()
                    .uri("/me")
                    .header(header::COOKIE, &cookie)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_wrong_password_is_rejected() {
        let response = test_app()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/login")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .body(Body::from("username=demo&password=guess"))
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert!(response.headers().get(header::SET_COOKIE).is_none());
        let body = json_body(response).await;
        assert_eq!(body["error"], "invalid credentials");
    }
}
