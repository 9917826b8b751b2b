// Dispatcher and middleware factories
// Decision: One factory per exposed method, all delegating to SchemaMiddleware::handle
// Decision: Configuration errors come back as Err(KnockError), request failures as Flow

use std::sync::Arc;

use serde_json::Value;

use crate::capability::{Capability, Method, MethodKind};
use crate::carrier::{is_truthy, AuthRequest, AuthResponse};
use crate::config::{KnockOptions, Options};
use crate::error::{KnockError, Result, UnauthorizedError, UNSET_OUTCOME_MESSAGE};
use crate::registry::SchemaRegistry;
use crate::schema::{Schema, Verifier};

/// What the surrounding pipeline should do after a middleware ran
#[derive(Debug, Clone)]
pub enum Flow {
    /// `next()`: continue. With failures suppressed the request may still
    /// carry an unauthorized error.
    Continue,
    /// `next(error)`: abort with this failure
    Reject(Arc<UnauthorizedError>),
}

impl Flow {
    pub fn is_continue(&self) -> bool {
        matches!(self, Flow::Continue)
    }
}

struct KnockInner {
    registry: SchemaRegistry,
    options: Options,
}

/// The schema dispatcher. Cheap to clone; clones share the registry.
#[derive(Clone)]
pub struct Knock {
    inner: Arc<KnockInner>,
}

impl Default for Knock {
    fn default() -> Self {
        Self::new(KnockOptions::default())
    }
}

impl Knock {
    pub fn new(options: KnockOptions) -> Self {
        Self {
            inner: Arc::new(KnockInner {
                registry: SchemaRegistry::new(),
                options: options.normalize(),
            }),
        }
    }

    /// Register a schema, see [`SchemaRegistry::enable`]
    pub fn enable(
        &self,
        name: Option<&str>,
        schema: Schema,
        set_default: bool,
        verify: Option<Arc<dyn Verifier>>,
    ) -> Result<()> {
        self.inner.registry.enable(name, schema, set_default, verify)
    }

    pub fn disable(&self, name: &str) -> Result<()> {
        self.inner.registry.disable(name)
    }

    /// True iff some registered schema can log users in
    pub fn is_valid(&self) -> bool {
        self.inner.registry.is_valid()
    }

    pub fn registry(&self) -> &SchemaRegistry {
        &self.inner.registry
    }

    pub fn prefer_schema(
        &self,
        name: Option<&str>,
        capability: Option<Capability>,
    ) -> Option<Arc<Schema>> {
        self.inner.registry.prefer_schema(name, capability)
    }

    pub fn throws_unauthorized_error(&self) -> bool {
        self.inner.options.throw_unauthorized_error
    }

    pub fn body_limit(&self) -> usize {
        self.inner.options.body_limit
    }

    pub(crate) fn options(&self) -> &Options {
        &self.inner.options
    }

    /// Log in through knockLogin of `schema`, or the schema selected by the request
    pub fn knock_login(&self, schema: Option<&str>) -> SchemaMiddleware {
        self.middleware(Method::KnockLogin, schema)
    }

    pub fn oauth_login(&self, schema: Option<&str>) -> SchemaMiddleware {
        self.middleware(Method::OauthLogin, schema)
    }

    pub fn oauth_callback(&self, schema: Option<&str>) -> SchemaMiddleware {
        self.middleware(Method::OauthCallback, schema)
    }

    /// Authenticate through knockAuth of `schema`, or the schema selected by the request
    pub fn knock_auth(&self, schema: Option<&str>) -> SchemaMiddleware {
        self.middleware(Method::KnockAuth, schema)
    }

    pub fn revoke(&self, schema: Option<&str>) -> SchemaMiddleware {
        self.middleware(Method::Revoke, schema)
    }

    fn middleware(&self, method: Method, name: Option<&str>) -> SchemaMiddleware {
        let name = name.filter(|n| !n.is_empty());
        let schema = name.and_then(|name| {
            let schema = self.prefer_schema(Some(name), Some(method.capability()));
            if schema.is_none() {
                tracing::warn!(
                    schema = %name,
                    %method,
                    "Schema not resolvable at construction, resolving by name per request"
                );
            }
            schema
        });

        SchemaMiddleware {
            knock: self.clone(),
            method,
            name: name.map(str::to_owned),
            schema,
        }
    }
}

/// Middleware bound to one schema method
#[derive(Clone)]
pub struct SchemaMiddleware {
    knock: Knock,
    method: Method,
    /// Name given to the factory; pins resolution to that schema
    name: Option<String>,
    schema: Option<Arc<Schema>>,
}

impl SchemaMiddleware {
    pub fn method(&self) -> Method {
        self.method
    }

    pub fn knock(&self) -> &Knock {
        &self.knock
    }

    /// Schema name the middleware was built for, if any
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Schema resolved when the middleware was built, if any
    pub fn schema(&self) -> Option<&Arc<Schema>> {
        self.schema.as_ref()
    }

    /// Run the middleware against one exchange.
    ///
    /// Request-level failures are stored on `req` and, unless suppressed,
    /// returned as `Flow::Reject` carrying the same instance.
    pub async fn handle(&self, req: &mut AuthRequest, res: &mut AuthResponse) -> Result<Flow> {
        if !self.knock.is_valid() {
            tracing::error!(method = %self.method, "No schema implements knockLogin");
            return Err(KnockError::NoLoginSchema);
        }

        let schema = self.resolve(req)?;
        let outcome = match self.run(&schema, req, res).await {
            Ok(()) => return Ok(Flow::Continue),
            Err(err) => classify(&schema, err)?,
        };

        req.set_unauthorized_error(outcome.clone());
        tracing::warn!(
            schema = %schema.name(),
            method = %self.method,
            error = %outcome,
            "Request unauthorized"
        );

        if self.knock.throws_unauthorized_error() {
            Ok(Flow::Reject(outcome))
        } else {
            Ok(Flow::Continue)
        }
    }

    fn resolve(&self, req: &AuthRequest) -> Result<Arc<Schema>> {
        let capability = self.method.capability();
        let schema = match (&self.schema, &self.name) {
            (Some(schema), _) => Some(schema.clone()),
            (None, Some(name)) => self.knock.prefer_schema(Some(name.as_str()), Some(capability)),
            (None, None) => self
                .knock
                .prefer_schema(req.param(capability.selector()), Some(capability)),
        };

        let Some(schema) = schema else {
            tracing::error!(method = %self.method, "No schema resolved");
            return Err(KnockError::schema_not_resolved(self.method));
        };
        if !schema.implements(self.method) {
            tracing::error!(schema = %schema.name(), method = %self.method, "Method not implemented");
            return Err(KnockError::method_not_implemented(schema.name(), self.method));
        }
        Ok(schema)
    }

    async fn run(&self, schema: &Schema, req: &mut AuthRequest, res: &mut AuthResponse) -> Result<()> {
        match (self.method.kind(), self.method.capability()) {
            (MethodKind::Required, Capability::Login) => {
                self.knock.login(schema, req, res).await?;
            }
            (MethodKind::Required, Capability::Auth) => {
                self.knock.auth(schema, req, res).await?;
            }
            (MethodKind::Optional, _) => {
                let returned: Option<Value> = schema.call(self.method, req, res).await?;
                if let Some(value) = returned.filter(is_truthy) {
                    req.set_user(value);
                }
                // The method answered the exchange itself (an OAuth redirect)
                if res.is_finished() && req.unauthorized_error().is_none() {
                    return Ok(());
                }
            }
        }

        if req.user().is_none() && req.unauthorized_error().is_none() {
            req.set_unauthorized_error(UnauthorizedError::new(
                Some(schema.name()),
                UNSET_OUTCOME_MESSAGE,
            ));
        }
        if let Some(err) = req.unauthorized_error() {
            return Err(KnockError::Unauthorized(err.clone()));
        }
        Ok(())
    }
}

/// Turn a failure into an `UnauthorizedError`, passing configuration errors through
fn classify(schema: &Schema, err: KnockError) -> Result<Arc<UnauthorizedError>> {
    match err {
        KnockError::Unauthorized(err) => Ok(err),
        KnockError::Handler(err) => match err.downcast::<UnauthorizedError>() {
            Ok(err) => Ok(Arc::new(err)),
            Err(err) => {
                tracing::error!(schema = %schema.name(), error = %err, "Schema raised an unexpected error");
                Ok(Arc::new(UnauthorizedError::internal(Some(schema.name()), err)))
            }
        },
        config => Err(config),
    }
}
