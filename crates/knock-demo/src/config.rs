// Demo server configuration loaded from environment variables.
// Decision: KNOCK_DEMO_ prefix; dispatcher options stay under KNOCK_
// Decision: Default account is demo/demo so the server runs with no setup

/// Account accepted by the password schema
#[derive(Debug, Clone)]
pub struct DemoAccount {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone)]
pub struct DemoConfig {
    /// Listen address
    pub addr: String,
    pub account: DemoAccount,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            addr: "0.0.0.0:9300".to_string(),
            account: DemoAccount {
                username: "demo".to_string(),
                password: "demo".to_string(),
            },
        }
    }
}

impl DemoConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let addr = std::env::var("KNOCK_DEMO_ADDR")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.addr);

        let username = std::env::var("KNOCK_DEMO_USERNAME")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.account.username);
        let password = std::env::var("KNOCK_DEMO_PASSWORD")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.account.password);

        Self {
            addr,
            account: DemoAccount { username, password },
        }
    }
}
