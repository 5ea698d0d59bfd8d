//! Secret handling.
//!
//! Re-exports the secrecy types used for API keys and connection strings.

pub use secrecy::{ExposeSecret, SecretString};

/// `"sk-ant-ab…"`-style prefix for logs, never the whole secret.
pub fn redacted_prefix(secret: &SecretString) -> String {
    let exposed = secret.expose_secret();
    let prefix: String = exposed.chars().take(8).collect();
    if exposed.chars().count() > 8 {
        format!("{prefix}…")
    } else {
        "…".to_string()
    }
}
