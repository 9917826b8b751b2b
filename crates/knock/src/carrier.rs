// Request/response carriers handed to schemas
// Decision: Carriers are plain owned structs so the core runs without a live HTTP exchange
// Decision: Parameter lookup precedence is path, query, cookie, body

use std::collections::HashMap;
use std::sync::Arc;

use axum::{
    body::Body,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use serde_json::{json, Map, Value};

use crate::error::UnauthorizedError;

/// JS-style truthiness of a JSON value
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Set-user rule: falsy values establish no user, non-object truthy values
/// are wrapped as `{"user": value}`.
pub fn normalize_user(value: Value) -> Option<Value> {
    match value {
        Value::Object(_) | Value::Array(_) => Some(value),
        other if is_truthy(&other) => Some(json!({ "user": other })),
        _ => None,
    }
}

/// Request side of an exchange.
///
/// Exposes the four parameter sources and carries the two outcome fields a
/// schema is expected to set.
#[derive(Debug, Default)]
pub struct AuthRequest {
    params: HashMap<String, String>,
    query: HashMap<String, String>,
    cookies: HashMap<String, String>,
    body: Map<String, Value>,
    headers: HeaderMap,
    user: Option<Value>,
    unauthorized_error: Option<Arc<UnauthorizedError>>,
}

impl AuthRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_params(mut self, params: impl IntoIterator<Item = (String, String)>) -> Self {
        self.params.extend(params);
        self
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn with_queries(mut self, query: impl IntoIterator<Item = (String, String)>) -> Self {
        self.query.extend(query);
        self
    }

    pub fn with_cookie(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(key.into(), value.into());
        self
    }

    pub fn with_cookies(mut self, cookies: impl IntoIterator<Item = (String, String)>) -> Self {
        self.cookies.extend(cookies);
        self
    }

    pub fn with_body_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.body.insert(key.into(), value.into());
        self
    }

    pub fn with_body(mut self, body: Map<String, Value>) -> Self {
        self.body = body;
        self
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut HashMap<String, String> {
        &mut self.params
    }

    pub fn query(&self) -> &HashMap<String, String> {
        &self.query
    }

    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.cookies
    }

    pub fn body(&self) -> &Map<String, Value> {
        &self.body
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// First defined value for `key` among path params, query, cookies and
    /// body fields, in that order. Body fields only count when they are
    /// JSON strings.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params
            .get(key)
            .or_else(|| self.query.get(key))
            .or_else(|| self.cookies.get(key))
            .map(String::as_str)
            .or_else(|| self.body.get(key).and_then(Value::as_str))
    }

    pub fn user(&self) -> Option<&Value> {
        self.user.as_ref()
    }

    /// Establish the user, applying the set-user rule
    pub fn set_user(&mut self, value: impl Into<Value>) {
        self.user = normalize_user(value.into());
    }

    pub fn take_user(&mut self) -> Option<Value> {
        self.user.take()
    }

    pub(crate) fn replace_user(&mut self, user: Option<Value>) {
        self.user = user;
    }

    pub fn unauthorized_error(&self) -> Option<&Arc<UnauthorizedError>> {
        self.unauthorized_error.as_ref()
    }

    pub fn set_unauthorized_error(&mut self, err: impl Into<Arc<UnauthorizedError>>) {
        self.unauthorized_error = Some(err.into());
    }

    /// True when a user is set and no failure is recorded
    pub fn is_authenticated(&self) -> bool {
        self.user.is_some() && self.unauthorized_error.is_none()
    }
}

/// Response side of an exchange.
///
/// Schemas stage cookies and headers here. Finishing the response is
/// possible (pass-through endpoints such as an OAuth redirect need it) but
/// the knockLogin/knockAuth pipeline treats a finished response as a failure.
#[derive(Debug, Default)]
pub struct AuthResponse {
    cookies: CookieJar,
    headers: HeaderMap,
    finished: Option<Response>,
}

impl AuthResponse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from the request's cookie jar so removals produce removal cookies
    pub fn with_cookie_jar(jar: CookieJar) -> Self {
        Self {
            cookies: jar,
            ..Self::default()
        }
    }

    pub fn cookies(&self) -> &CookieJar {
        &self.cookies
    }

    pub fn add_cookie(&mut self, cookie: Cookie<'static>) {
        self.cookies = std::mem::take(&mut self.cookies).add(cookie);
    }

    pub fn remove_cookie(&mut self, cookie: impl Into<Cookie<'static>>) {
        self.cookies = std::mem::take(&mut self.cookies).remove(cookie);
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// Finalize the response
    pub fn finish(&mut self, status: StatusCode, body: impl Into<Body>) {
        self.finished = Some((status, body.into()).into_response());
    }

    pub fn redirect(&mut self, uri: &str) {
        self.finished = Some(Redirect::to(uri).into_response());
    }

    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    /// Staged cookie jar, staged headers and the finished response, if any
    pub fn into_parts(self) -> (CookieJar, HeaderMap, Option<Response>) {
        (self.cookies, self.headers, self.finished)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_precedence() {
        let mut req = AuthRequest::new()
            .with_param("k", "path")
            .with_query("k", "query")
            .with_cookie("k", "cookie")
            .with_body_field("k", "body");
        assert_eq!(req.param("k"), Some("path"));

        req.params.remove("k");
        assert_eq!(req.param("k"), Some("query"));

        req.query.remove("k");
        assert_eq!(req.param("k"), Some("cookie"));

        req.cookies.remove("k");
        assert_eq!(req.param("k"), Some("body"));

        req.body.remove("k");
        assert_eq!(req.param("k"), None);
    }

    #[test]
    fn test_empty_query_value_is_defined() {
        let req = AuthRequest::new()
            .with_query("k", "")
            .with_cookie("k", "cookie");
        assert_eq!(req.param("k"), Some(""));
    }

    #[test]
    fn test_non_string_body_field_is_skipped() {
        let req = AuthRequest::new().with_body_field("k", 42);
        assert_eq!(req.param("k"), None);
    }

    #[test]
    fn test_normalize_user() {
        assert_eq!(normalize_user(json!({"id": 1})), Some(json!({"id": 1})));
        assert_eq!(normalize_user(json!("alice")), Some(json!({"user": "alice"})));
        assert_eq!(normalize_user(json!(7)), Some(json!({"user": 7})));
        assert_eq!(normalize_user(json!(true)), Some(json!({"user": true})));
        assert_eq!(normalize_user(json!([1])), Some(json!([1])));
        assert_eq!(normalize_user(json!(null)), None);
        assert_eq!(normalize_user(json!(false)), None);
        assert_eq!(normalize_user(json!(0)), None);
        assert_eq!(normalize_user(json!("")), None);
    }

    #[test]
    fn test_set_user_wraps_scalars() {
        let mut req = AuthRequest::new();
        req.set_user("bob");
        assert_eq!(req.user(), Some(&json!({"user": "bob"})));
        assert!(req.is_authenticated());

        req.set_unauthorized_error(UnauthorizedError::new(None, "denied"));
        assert!(!req.is_authenticated());
    }

    #[test]
    fn test_response_finish() {
        let mut res = AuthResponse::new();
        assert!(!res.is_finished());
        res.redirect("/elsewhere");
        assert!(res.is_finished());

        let (_, _, finished) = res.into_parts();
        assert_eq!(finished.map(|r| r.status()), Some(StatusCode::SEE_OTHER));
    }

    #[test]
    fn test_response_stages_cookies() {
        let mut res = AuthResponse::new();
        res.add_cookie(Cookie::new("session", "abc"));
        assert_eq!(res.cookies().get("session").map(Cookie::value), Some("abc"));

        res.remove_cookie(Cookie::from("session"));
        assert!(res.cookies().get("session").is_none());
    }
}
