//! Setting keys read and written by the core.

pub const API_KEY: &str = "gemini_api_key";
pub const LOCALE: &str = "app_locale";
pub const TARGET_SCORE: &str = "target_score";

pub const SYNC_ENABLED: &str = "cloud_sync_enabled";
pub const ACCOUNT_EMAIL: &str = "cloud_user_email";
pub const ACCOUNT_NAME: &str = "cloud_user_name";
pub const LAST_SYNC: &str = "cloud_last_sync";
pub const ACCESS_TOKEN: &str = "gis_access_token";
pub const TOKEN_EXPIRES_AT: &str = "gis_token_expires_at";

/// Keys owned by sync itself. Writing them must not schedule another upload.
pub const SYNC_BOOKKEEPING: &[&str] =
    &[SYNC_ENABLED, ACCOUNT_EMAIL, ACCOUNT_NAME, LAST_SYNC, ACCESS_TOKEN, TOKEN_EXPIRES_AT];

/// Settings carried in a backup snapshot and restored on import.
pub const EXPORTED: &[&str] = &[LOCALE, TARGET_SCORE];
