//! Snowflake SQL API driver.
//!
//! Implements the [`crate::db::driver`] traits on top of the Snowflake SQL
//! API v2. The API is stateless, so a "connection" is an authenticated client
//! plus the descriptor's warehouse, role, database and schema, sent with every
//! statement.

pub mod client;
pub mod driver;
pub mod wire;

pub use client::SqlApiClient;
pub use driver::{SqlApiConnection, SqlApiDriver};

use crate::error::{WarehouseError, WarehouseResult};
use std::str::FromStr;
use std::time::Duration;

/// Kind of session token presented to the SQL API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenType {
    #[default]
    Oauth,
    KeypairJwt,
    ProgrammaticAccessToken,
}

impl TokenType {
    /// Value of the `X-Snowflake-Authorization-Token-Type` header.
    pub fn as_header(&self) -> &'static str {
        match self {
            Self::Oauth => "OAUTH",
            Self::KeypairJwt => "KEYPAIR_JWT",
            Self::ProgrammaticAccessToken => "PROGRAMMATIC_ACCESS_TOKEN",
        }
    }
}

impl FromStr for TokenType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "OAUTH" => Ok(Self::Oauth),
            "KEYPAIR_JWT" | "JWT" => Ok(Self::KeypairJwt),
            "PROGRAMMATIC_ACCESS_TOKEN" | "PAT" => Ok(Self::ProgrammaticAccessToken),
            _ => Err(format!(
                "Unknown token type '{}'. Expected OAUTH, KEYPAIR_JWT or PROGRAMMATIC_ACCESS_TOKEN",
                s
            )),
        }
    }
}

impl std::fmt::Display for TokenType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_header())
    }
}

/// Settings for [`SqlApiDriver`].
#[derive(Clone, PartialEq, Eq)]
pub struct SqlApiOptions {
    /// Session token from the external sign-in. Required at first use.
    pub token: Option<String>,
    /// Raw `SNOWFLAKE_TOKEN_TYPE`; parsed when a session is opened
    pub token_type: String,
    /// Account URL override, e.g. for private link
    pub host: Option<String>,
    pub statement_timeout: Duration,
}

impl SqlApiOptions {
    /// Parse the token type. An unknown value is a configuration error.
    pub fn token_type(&self) -> WarehouseResult<TokenType> {
        self.token_type
            .parse()
            .map_err(|message: String| WarehouseError::config(message))
    }
}

impl std::fmt::Debug for SqlApiOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlApiOptions")
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("token_type", &self.token_type)
            .field("host", &self.host)
            .field("statement_timeout", &self.statement_timeout)
            .finish()
    }
}
