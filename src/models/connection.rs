//! Connection-related data models.
//!
//! This module defines per-request credentials, the parsed endpoint they point
//! at, and the key used to deduplicate connection pools.

use crate::error::{GatewayError, GatewayResult};
use serde::Deserialize;
use url::Url;

/// Scheme marker every endpoint must carry, optionally behind a prefix
/// such as `jdbc:`.
const MYSQL_SCHEME: &str = "mysql://";

/// Database credentials supplied with every request.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    /// Format: `[scheme:]mysql://host:port/database`
    pub endpoint: String,
    pub user: String,
    /// Contains sensitive data - never log
    #[serde(default)]
    pub password: String,
}

impl Credentials {
    pub fn new(
        endpoint: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            user: user.into(),
            password: password.into(),
        }
    }

    /// The identity of the pool these credentials resolve to.
    pub fn pool_key(&self) -> PoolKey {
        PoolKey::new(&self.endpoint, &self.user)
    }

    /// Reject credentials missing an endpoint or user before touching the kernel.
    pub fn ensure_present(&self) -> GatewayResult<()> {
        if self.endpoint.trim().is_empty() {
            return Err(GatewayError::validation("endpoint is required"));
        }
        if self.user.trim().is_empty() {
            return Err(GatewayError::validation("user is required"));
        }
        Ok(())
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("endpoint", &self.endpoint)
            .field("user", &self.user)
            .field("password", &"****")
            .finish()
    }
}

/// Identity tuple used to deduplicate connection pools.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    endpoint: String,
    user: String,
}

impl PoolKey {
    pub fn new(endpoint: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            user: user.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn user(&self) -> &str {
        &self.user
    }
}

impl std::fmt::Display for PoolKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.user, self.endpoint)
    }
}

/// A validated database endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub database: String,
}

impl Endpoint {
    /// Parse an endpoint of the form `[scheme:]mysql://host:port/database`.
    ///
    /// Host, port and database are all mandatory. Any failure is a
    /// validation error; nothing here touches the network.
    pub fn parse(raw: &str) -> GatewayResult<Self> {
        let raw = raw.trim();
        let lower = raw.to_ascii_lowercase();
        let scheme_pos = lower.find(MYSQL_SCHEME).ok_or_else(|| {
            GatewayError::validation(format!(
                "Endpoint must use the {} scheme: [scheme:]mysql://host:port/database",
                MYSQL_SCHEME
            ))
        })?;

        // Anything before "mysql://" must be a scheme prefix like "jdbc:"
        let prefix = &raw[..scheme_pos];
        if !prefix.is_empty() && !prefix.ends_with(':') {
            return Err(GatewayError::validation(format!(
                "Invalid endpoint prefix '{}'",
                prefix
            )));
        }

        let url = Url::parse(&raw[scheme_pos..])
            .map_err(|e| GatewayError::validation(format!("Invalid endpoint: {}", e)))?;

        let host = url
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| GatewayError::validation("Endpoint is missing a host"))?
            .to_string();

        let port = url
            .port()
            .ok_or_else(|| GatewayError::validation("Endpoint is missing a port"))?;
        if port == 0 {
            return Err(GatewayError::validation(
                "Endpoint port must be between 1 and 65535",
            ));
        }

        let database = url.path().trim_start_matches('/');
        if database.is_empty() {
            return Err(GatewayError::validation(
                "Endpoint is missing a database name",
            ));
        }
        if database.contains('/') {
            return Err(GatewayError::validation(format!(
                "Invalid database name '{}'",
                database
            )));
        }

        Ok(Self {
            host,
            port,
            database: database.to_string(),
        })
    }
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}/{}", self.host, self.port, self.database)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_endpoint() {
        let endpoint = Endpoint::parse("mysql://db.internal:3306/shop").unwrap();
        assert_eq!(endpoint.host, "db.internal");
        assert_eq!(endpoint.port, 3306);
        assert_eq!(endpoint.database, "shop");
    }

    #[test]
    fn test_parse_prefixed_endpoint() {
        let endpoint = Endpoint::parse("jdbc:mysql://10.0.0.7:3307/reports").unwrap();
        assert_eq!(endpoint.host, "10.0.0.7");
        assert_eq!(endpoint.port, 3307);
        assert_eq!(endpoint.database, "reports");
    }

    #[test]
    fn test_parse_rejects_missing_port() {
        let err = Endpoint::parse("mysql://localhost/shop").unwrap_err();
        assert!(matches!(err, GatewayError::Validation { .. }));
        assert!(err.to_string().contains("port"));
    }

    #[test]
    fn test_parse_rejects_port_out_of_range() {
        assert!(matches!(
            Endpoint::parse("mysql://localhost:0/shop"),
            Err(GatewayError::Validation { .. })
        ));
        assert!(matches!(
            Endpoint::parse("mysql://localhost:70000/shop"),
            Err(GatewayError::Validation { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_missing_database() {
        let err = Endpoint::parse("mysql://localhost:3306").unwrap_err();
        assert!(err.to_string().contains("database"));

        let err = Endpoint::parse("mysql://localhost:3306/").unwrap_err();
        assert!(err.to_string().contains("database"));
    }

    #[test]
    fn test_parse_rejects_missing_host() {
        assert!(matches!(
            Endpoint::parse("mysql://:3306/shop"),
            Err(GatewayError::Validation { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_other_schemes() {
        assert!(matches!(
            Endpoint::parse("postgres://localhost:5432/shop"),
            Err(GatewayError::Validation { .. })
        ));
        assert!(matches!(
            Endpoint::parse("garbage mysql://localhost:3306/shop"),
            Err(GatewayError::Validation { .. })
        ));
    }

    #[test]
    fn test_pool_key_identity() {
        let a = Credentials::new("mysql://h:3306/db", "alice", "one").pool_key();
        let b = Credentials::new("mysql://h:3306/db", "alice", "two").pool_key();
        let c = Credentials::new("mysql://h:3306/db", "bob", "one").pool_key();
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.to_string(), "alice@mysql://h:3306/db");
    }

    #[test]
    fn test_credentials_debug_masks_password() {
        let creds = Credentials::new("mysql://h:3306/db", "alice", "hunter2");
        let debug = format!("{:?}", creds);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("****"));
    }

    #[test]
    fn test_credentials_presence() {
        assert!(Credentials::new("mysql://h:3306/db", "alice", "").ensure_present().is_ok());
        assert!(Credentials::new(" ", "alice", "x").ensure_present().is_err());
        assert!(Credentials::new("mysql://h:3306/db", "", "x").ensure_present().is_err());
    }
}
