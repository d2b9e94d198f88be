//! Connection-related data models.
//!
//! This module defines the resolved connection descriptor handed to the
//! warehouse driver, and the transaction state a connection moves through.

use serde::{Deserialize, Serialize};
use url::Url;

/// How a session authenticates.
///
/// The engine factory always asks for external browser sign-in; the process
/// itself never sees a password.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Authenticator {
    /// Interactive sign-in performed outside this process
    #[default]
    ExternalBrowser,
}

impl Authenticator {
    /// Value of the `authenticator` connection parameter.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExternalBrowser => "externalbrowser",
        }
    }
}

impl std::fmt::Display for Authenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything a driver needs to open a session. Contains no credentials.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionDescriptor {
    pub account: String,
    pub user: String,
    pub warehouse: String,
    pub role: Option<String>,
    pub authenticator: Authenticator,
    pub database: Option<String>,
    pub schema: Option<String>,
}

impl ConnectionDescriptor {
    /// Render as a `snowflake://` URL, e.g.
    /// `snowflake://analyst@xy12345/SANDBOX/PUBLIC?warehouse=WH&authenticator=externalbrowser`.
    pub fn to_url(&self) -> Result<Url, String> {
        let mut url = Url::parse(&format!("snowflake://{}", self.account))
            .map_err(|e| format!("Invalid account identifier '{}': {e}", self.account))?;
        url.set_username(&self.user)
            .map_err(|_| format!("Invalid user name '{}'", self.user))?;

        if let Some(database) = &self.database {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| "URL cannot carry a database path".to_string())?;
            segments.clear().push(database);
            if let Some(schema) = &self.schema {
                segments.push(schema);
            }
        }

        {
            let mut query = url.query_pairs_mut();
            query.append_pair("warehouse", &self.warehouse);
            if let Some(role) = &self.role {
                query.append_pair("role", role);
            }
            // Schema without database cannot live in the path
            if self.database.is_none() {
                if let Some(schema) = &self.schema {
                    query.append_pair("schema", schema);
                }
            }
            query.append_pair("authenticator", self.authenticator.as_str());
        }

        Ok(url)
    }
}

impl std::fmt::Display for ConnectionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.to_url() {
            Ok(url) => write!(f, "{}", url),
            Err(_) => write!(f, "snowflake://{}@{}", self.user, self.account),
        }
    }
}

/// State of the transaction on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// No transaction open
    #[default]
    Idle,
    Active,
    Committed,
    RolledBack,
}

impl TransactionState {
    /// Check if the transaction is still active.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }
}
