//! Schema capability model.
//!
//! Two capability families exist. `Login` authenticates credentials and
//! establishes a session marker, `Auth` validates an existing marker. Each
//! family has exactly one required method; a schema is usable for a family
//! iff it implements that method. Optional methods are hooks or pass-through
//! endpoints, and a subset of methods is exposed as middleware factories.

use std::fmt;

/// Capability family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Login,
    Auth,
}

impl Capability {
    pub const ALL: [Capability; 2] = [Capability::Login, Capability::Auth];

    /// The method whose presence makes a schema usable for this capability
    pub fn required_method(self) -> Method {
        match self {
            Capability::Login => Method::KnockLogin,
            Capability::Auth => Method::KnockAuth,
        }
    }

    pub fn optional_methods(self) -> &'static [Method] {
        match self {
            Capability::Login => &[
                Method::Login,
                Method::LoginResponse,
                Method::OauthLogin,
                Method::OauthCallback,
            ],
            Capability::Auth => &[
                Method::Create,
                Method::Auth,
                Method::AuthResponse,
                Method::Revoke,
            ],
        }
    }

    /// Methods turned into middleware factories
    pub fn exposed_methods(self) -> &'static [Method] {
        match self {
            Capability::Login => &[Method::KnockLogin, Method::OauthLogin, Method::OauthCallback],
            Capability::Auth => &[Method::KnockAuth, Method::Revoke],
        }
    }

    /// Request parameter that selects a schema by name for this capability
    pub fn selector(self) -> &'static str {
        self.required_method().as_str()
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Login => write!(f, "login"),
            Capability::Auth => write!(f, "auth"),
        }
    }
}

/// Whether a method is the interface method of its family or an extra
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodKind {
    Required,
    Optional,
}

/// Every method a schema may implement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    KnockLogin,
    Login,
    LoginResponse,
    OauthLogin,
    OauthCallback,
    KnockAuth,
    Create,
    Auth,
    AuthResponse,
    Revoke,
}

impl Method {
    pub const ALL: [Method; 10] = [
        Method::KnockLogin,
        Method::Login,
        Method::LoginResponse,
        Method::OauthLogin,
        Method::OauthCallback,
        Method::KnockAuth,
        Method::Create,
        Method::Auth,
        Method::AuthResponse,
        Method::Revoke,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Method::KnockLogin => "knockLogin",
            Method::Login => "login",
            Method::LoginResponse => "loginResponse",
            Method::OauthLogin => "oauthLogin",
            Method::OauthCallback => "oauthCallback",
            Method::KnockAuth => "knockAuth",
            Method::Create => "create",
            Method::Auth => "auth",
            Method::AuthResponse => "authResponse",
            Method::Revoke => "revoke",
        }
    }

    /// Family owning this method
    pub fn capability(self) -> Capability {
        match self {
            Method::KnockLogin
            | Method::Login
            | Method::LoginResponse
            | Method::OauthLogin
            | Method::OauthCallback => Capability::Login,
            Method::KnockAuth
            | Method::Create
            | Method::Auth
            | Method::AuthResponse
            | Method::Revoke => Capability::Auth,
        }
    }

    pub fn kind(self) -> MethodKind {
        if self.capability().required_method() == self {
            MethodKind::Required
        } else {
            MethodKind::Optional
        }
    }

    pub fn is_exposed(self) -> bool {
        self.capability().exposed_methods().contains(&self)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
