use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;

#[derive(Clone)]
pub struct Config {
    pub port: u16,
    /// Directory for persistent state (SQLite database).
    /// Defaults to current working directory.
    pub state_dir: PathBuf,
    /// Email for the bootstrap admin account, created on first start when
    /// the user table is empty. If not set, no account is created and every
    /// request fails authentication until users exist.
    pub bootstrap_admin_email: Option<String>,
    pub bootstrap_admin_name: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let state_dir = env::var("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let bootstrap_admin_email = parse_bootstrap_admin_email(env::var("BOOTSTRAP_ADMIN_EMAIL").ok());

        let bootstrap_admin_name =
            env::var("BOOTSTRAP_ADMIN_NAME").unwrap_or_else(|_| "Administrator".to_string());

        Ok(Config {
            port,
            state_dir,
            bootstrap_admin_email,
            bootstrap_admin_name,
        })
    }
}

/// Parse BOOTSTRAP_ADMIN_EMAIL from an optional string value.
///
/// Returns None if the value is missing, empty, or contains only whitespace,
/// so a blank variable cannot create an admin account with an empty email.
pub fn parse_bootstrap_admin_email(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bootstrap_admin_email_none() {
        assert_eq!(parse_bootstrap_admin_email(None), None);
    }

    #[test]
    fn test_parse_bootstrap_admin_email_empty_string() {
        assert_eq!(parse_bootstrap_admin_email(Some("".to_string())), None);
    }

    #[test]
    fn test_parse_bootstrap_admin_email_whitespace_only() {
        assert_eq!(parse_bootstrap_admin_email(Some("   ".to_string())), None);
        assert_eq!(parse_bootstrap_admin_email(Some("\t\n".to_string())), None);
    }

    #[test]
    fn test_parse_bootstrap_admin_email_valid() {
        assert_eq!(
            parse_bootstrap_admin_email(Some("admin@example.com".to_string())),
            Some("admin@example.com".to_string())
        );
    }
}
