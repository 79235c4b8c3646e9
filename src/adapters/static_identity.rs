//! Identity adapter backed by a fixed token table from the config file.

use std::collections::HashMap;

use crate::domain::algorithm::UserId;
use crate::domain::error::StratlabError;
use crate::ports::config_port::ConfigPort;
use crate::ports::identity_port::IdentityPort;

pub struct StaticTokenIdentity {
    tokens: HashMap<String, UserId>,
}

impl StaticTokenIdentity {
    pub fn new(tokens: HashMap<String, UserId>) -> Self {
        Self { tokens }
    }

    /// Parse `[auth] tokens = token:user_id, token:user_id`.
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, StratlabError> {
        let raw = config.get_string("auth", "tokens").unwrap_or_default();
        let mut tokens = HashMap::new();
        for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let invalid = || StratlabError::ConfigInvalid {
                section: "auth".to_string(),
                key: "tokens".to_string(),
                reason: format!("expected token:user_id, got '{pair}'"),
            };
            let (token, user) = pair.rsplit_once(':').ok_or_else(invalid)?;
            let user: UserId = user.trim().parse().map_err(|_| invalid())?;
            if token.trim().is_empty() {
                return Err(invalid());
            }
            tokens.insert(token.trim().to_string(), user);
        }
        Ok(Self { tokens })
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

impl IdentityPort for StaticTokenIdentity {
    fn verify(&self, token: &str) -> Result<UserId, StratlabError> {
        self.tokens
            .get(token.trim())
            .copied()
            .ok_or(StratlabError::Unauthorized)
    }
}
