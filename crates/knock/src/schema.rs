// Schema plugin contract
// Decision: A schema is a descriptor of handlers built once, not an object probed at call time
// Decision: Handlers get the schema itself so they can reach its verifier

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde_json::Value;

use crate::capability::{Capability, Method};
use crate::carrier::{AuthRequest, AuthResponse};

/// Result of a schema handler: an optional user value
pub type HandlerResult = anyhow::Result<Option<Value>>;

/// A single schema method.
///
/// Implement this for handlers that carry state (a session store, an OAuth
/// client). Closures of the right shape implement it automatically.
///
/// Handlers must not finish the response from within knockLogin/knockAuth.
#[async_trait]
pub trait SchemaHandler: Send + Sync {
    async fn call(
        &self,
        schema: &Schema,
        req: &mut AuthRequest,
        res: &mut AuthResponse,
    ) -> HandlerResult;
}

#[async_trait]
impl<F> SchemaHandler for F
where
    F: for<'a> Fn(&'a Schema, &'a mut AuthRequest, &'a mut AuthResponse) -> BoxFuture<'a, HandlerResult>
        + Send
        + Sync,
{
    async fn call(
        &self,
        schema: &Schema,
        req: &mut AuthRequest,
        res: &mut AuthResponse,
    ) -> HandlerResult {
        self(schema, req, res).await
    }
}

/// Credential verifier installed on a schema
#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify(&self, credentials: Value) -> HandlerResult;
}

#[async_trait]
impl<F, Fut> Verifier for F
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerResult> + Send,
{
    async fn verify(&self, credentials: Value) -> HandlerResult {
        self(credentials).await
    }
}

/// Box a verifier for `SchemaRegistry::enable`
pub fn verifier<V: Verifier + 'static>(verifier: V) -> Arc<dyn Verifier> {
    Arc::new(verifier)
}

/// A named set of login/auth handlers
pub struct Schema {
    name: String,
    handlers: HashMap<Method, Arc<dyn SchemaHandler>>,
    verifier: Option<Arc<dyn Verifier>>,
}

impl Schema {
    pub fn builder(name: impl Into<String>) -> SchemaBuilder {
        SchemaBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn rename(&mut self, name: &str) {
        self.name = name.to_string();
    }

    pub(crate) fn set_verifier(&mut self, verifier: Arc<dyn Verifier>) {
        self.verifier = Some(verifier);
    }

    pub fn implements(&self, method: Method) -> bool {
        self.handlers.contains_key(&method)
    }

    /// True iff the capability's required method is present
    pub fn supports(&self, capability: Capability) -> bool {
        self.implements(capability.required_method())
    }

    /// Implemented methods, in table order
    pub fn methods(&self) -> Vec<Method> {
        Method::ALL
            .into_iter()
            .filter(|m| self.implements(*m))
            .collect()
    }

    /// Run a method. Absent methods are a no-op returning no user.
    pub async fn call(
        &self,
        method: Method,
        req: &mut AuthRequest,
        res: &mut AuthResponse,
    ) -> HandlerResult {
        match self.handlers.get(&method) {
            Some(handler) => handler.call(self, req, res).await,
            None => Ok(None),
        }
    }

    /// Check credentials with the installed verifier
    pub async fn verify(&self, credentials: Value) -> HandlerResult {
        match &self.verifier {
            Some(verifier) => verifier.verify(credentials).await,
            None => Err(anyhow::anyhow!("schema '{}' has no verifier", self.name)),
        }
    }

    pub fn has_verifier(&self) -> bool {
        self.verifier.is_some()
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.name)
            .field("methods", &self.methods())
            .field("verifier", &self.verifier.is_some())
            .finish()
    }
}

/// Builds a [`Schema`] one handler at a time
pub struct SchemaBuilder {
    schema: Schema,
}

macro_rules! handler_setters {
    ($($fn_name:ident => $method:ident),* $(,)?) => {
        $(
            pub fn $fn_name<F>(self, handler: F) -> Self
            where
                F: for<'a> Fn(
                        &'a Schema,
                        &'a mut AuthRequest,
                        &'a mut AuthResponse,
                    ) -> BoxFuture<'a, HandlerResult>
                    + Send
                    + Sync
                    + 'static,
            {
                self.handler(Method::$method, handler)
            }
        )*
    };
}

impl SchemaBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            schema: Schema {
                name: name.into(),
                handlers: HashMap::new(),
                verifier: None,
            },
        }
    }

    /// Install any handler for a method
    pub fn handler<H: SchemaHandler + 'static>(mut self, method: Method, handler: H) -> Self {
        self.schema.handlers.insert(method, Arc::new(handler));
        self
    }

    handler_setters! {
        knock_login => KnockLogin,
        login => Login,
        login_response => LoginResponse,
        oauth_login => OauthLogin,
        oauth_callback => OauthCallback,
        knock_auth => KnockAuth,
        create => Create,
        auth => Auth,
        auth_response => AuthResponse,
        revoke => Revoke,
    }

    pub fn verify<V: Verifier + 'static>(mut self, verifier: V) -> Self {
        self.schema.verifier = Some(Arc::new(verifier));
        self
    }

    pub fn build(self) -> Schema {
        self.schema
    }
}
