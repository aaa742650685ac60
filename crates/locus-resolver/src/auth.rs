//! Token authentication for the authoritative endpoint.

/// Token provider for outgoing requests.
#[derive(Debug, Clone, Default)]
pub enum TokenProvider {
    /// Static bearer token (from config or env).
    Static(String),

    /// No authentication.
    #[default]
    None,
}

impl TokenProvider {
    /// Create a static token provider.
    pub fn static_token(token: impl Into<String>) -> Self {
        Self::Static(token.into())
    }

    /// Create from `LOCUS_PROFILE_TOKEN`, falling back to no auth.
    pub fn from_env() -> Self {
        match std::env::var("LOCUS_PROFILE_TOKEN") {
            Ok(token) if !token.is_empty() => Self::Static(token),
            _ => Self::None,
        }
    }

    /// Pick the configured token, else the environment.
    pub fn from_config(token: Option<&String>) -> Self {
        token
            .filter(|t| !t.is_empty())
            .map(Self::static_token)
            .unwrap_or_else(Self::from_env)
    }

    pub fn token(&self) -> Option<&str> {
        match self {
            Self::Static(token) => Some(token),
            Self::None => None,
        }
    }

    /// Check if authentication is configured.
    pub fn is_authenticated(&self) -> bool {
        !matches!(self, Self::None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_config_token_wins_over_env() {
        std::env::set_var("LOCUS_PROFILE_TOKEN", "from-env");
        let configured = "from-config".to_string();

        let provider = TokenProvider::from_config(Some(&configured));
        assert_eq!(provider.token(), Some("from-config"));

        let provider = TokenProvider::from_config(None);
        assert_eq!(provider.token(), Some("from-env"));

        std::env::remove_var("LOCUS_PROFILE_TOKEN");
    }

    #[test]
    #[serial]
    fn test_no_token_means_unauthenticated() {
        std::env::remove_var("LOCUS_PROFILE_TOKEN");
        let provider = TokenProvider::from_config(None);
        assert!(!provider.is_authenticated());
        assert!(provider.token().is_none());
    }
}
