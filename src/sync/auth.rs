use async_trait::async_trait;
use serde::{
    Deserialize,
    Serialize,
};

use crate::core::TutorError;

pub const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Bearer credential handed out by the identity provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantedToken {
    pub access_token: String,
    pub expires_in_secs: Option<i64>,
}

impl GrantedToken {
    pub fn expires_at(&self, now_ms: i64) -> i64 {
        now_ms + self.expires_in_secs.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS) * 1000
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountProfile {
    pub email: String,
    pub name: String,
}

impl AccountProfile {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.email
        } else {
            &self.name
        }
    }
}

/// OAuth token lifecycle, owned by whatever hosts the app.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Asks for a token. With `interactive == false` no consent prompt may be
    /// shown; `Ok(None)` means no token could be obtained that way.
    async fn request_token(&self, interactive: bool) -> Result<Option<GrantedToken>, TutorError>;

    async fn fetch_profile(&self, access_token: &str) -> Result<AccountProfile, TutorError>;

    async fn revoke(&self, access_token: &str) -> Result<(), TutorError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_expiry_defaults_to_an_hour() {
        let token = GrantedToken { access_token: "t".to_string(), expires_in_secs: None };
        assert_eq!(token.expires_at(1_000), 1_000 + 3_600_000);

        let short = GrantedToken { access_token: "t".to_string(), expires_in_secs: Some(60) };
        assert_eq!(short.expires_at(0), 60_000);
    }

    #[test]
    fn test_profile_display_name_falls_back_to_email() {
        let profile: AccountProfile = serde_json::from_str(r#"{"email":"a@b.c"}"#).unwrap();
        assert_eq!(profile.display_name(), "a@b.c");
    }
}
