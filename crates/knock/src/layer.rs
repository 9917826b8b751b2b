// axum adapter
// Decision: Use with from_fn_with_state(middleware, guard) on route_layer so path params are visible
// Decision: Buffered body is handed back to the inner service untouched

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    async_trait,
    body::{self, Body, Bytes},
    extract::{FromRequestParts, Query, RawPathParams, Request, State},
    http::{header, request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use axum_extra::extract::cookie::CookieJar;
use serde_json::{Map, Value};

use crate::carrier::{AuthRequest, AuthResponse};
use crate::error::UnauthorizedError;
use crate::middleware::{Flow, SchemaMiddleware};

/// User established by a knock middleware, stored in request extensions
#[derive(Debug, Clone)]
pub struct Identity(pub Value);

/// Failure recorded on a request when rejections are suppressed.
///
/// Only present on failed requests. Handlers that also serve authenticated
/// requests take `Option<Unauthorized>`; extracting it directly on a request
/// with no failure is a routing mistake and answers 500, like a missing
/// `Extension`.
#[derive(Debug, Clone)]
pub struct Unauthorized(pub Arc<UnauthorizedError>);

#[async_trait]
impl<S> FromRequestParts<S> for Identity
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        // A recorded failure outranks any user
        if let Some(Unauthorized(err)) = parts.extensions.get::<Unauthorized>() {
            return Err(err.to_response());
        }
        parts
            .extensions
            .get::<Identity>()
            .cloned()
            .ok_or_else(|| UnauthorizedError::new(None, "authentication required").to_response())
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Unauthorized
where
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Unauthorized>()
            .cloned()
            .ok_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

/// axum middleware running a [`SchemaMiddleware`]
pub async fn guard(State(mw): State<SchemaMiddleware>, request: Request, next: Next) -> Response {
    let (mut parts, body) = request.into_parts();
    let bytes = match body::to_bytes(body, mw.knock().body_limit()).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::debug!("Failed to buffer request body: {}", e);
            return (StatusCode::BAD_REQUEST, "invalid request body").into_response();
        }
    };

    let mut auth_req = auth_request(&mut parts, &bytes).await;
    let mut auth_res = AuthResponse::with_cookie_jar(CookieJar::from_headers(&parts.headers));

    let flow = mw.handle(&mut auth_req, &mut auth_res).await;
    let (jar, headers, finished) = auth_res.into_parts();

    match flow {
        Err(err) => {
            tracing::error!(method = %mw.method(), "Knock misconfigured: {}", err);
            err.into_response()
        }
        Ok(Flow::Reject(err)) => (headers, jar, err.to_response()).into_response(),
        Ok(Flow::Continue) => {
            if let Some(response) = finished {
                return (headers, jar, response).into_response();
            }

            match auth_req.unauthorized_error() {
                Some(err) => {
                    parts.extensions.insert(Unauthorized(err.clone()));
                }
                None => {
                    if let Some(user) = auth_req.take_user() {
                        parts.extensions.insert(Identity(user));
                    }
                }
            }

            let response = next.run(Request::from_parts(parts, Body::from(bytes))).await;
            (headers, jar, response).into_response()
        }
    }
}

/// Build the carrier from request parts and the buffered body
async fn auth_request(parts: &mut Parts, bytes: &Bytes) -> AuthRequest {
    let params: Vec<(String, String)> = match RawPathParams::from_request_parts(parts, &()).await {
        Ok(raw) => raw
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        Err(_) => Vec::new(),
    };

    let query = Query::<HashMap<String, String>>::try_from_uri(&parts.uri)
        .map(|Query(q)| q)
        .unwrap_or_default();

    let cookies: Vec<(String, String)> = CookieJar::from_headers(&parts.headers)
        .iter()
        .map(|c| (c.name().to_string(), c.value().to_string()))
        .collect();

    AuthRequest::new()
        .with_params(params)
        .with_queries(query)
        .with_cookies(cookies)
        .with_body(parse_body(parts, bytes))
        .with_headers(parts.headers.clone())
}

fn parse_body(parts: &Parts, bytes: &Bytes) -> Map<String, Value> {
    if bytes.is_empty() {
        return Map::new();
    }

    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    if content_type.starts_with("application/json") {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(Value::Object(map)) => map,
            Ok(_) => Map::new(),
            Err(e) => {
                tracing::debug!("Ignoring malformed JSON body: {}", e);
                Map::new()
            }
        }
    } else if content_type.starts_with("application/x-www-form-urlencoded") {
        url::form_urlencoded::parse(bytes)
            .map(|(k, v)| (k.into_owned(), Value::String(v.into_owned())))
            .collect()
    } else {
        Map::new()
    }
}
