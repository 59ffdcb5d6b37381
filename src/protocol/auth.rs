//! Basic authentication credentials.

use std::fmt;
use std::str::FromStr;

use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use thiserror::Error;

/// Credentials in `user:password` form.
///
/// The textual form splits on the first `:`, so the user name must not
/// contain a colon while the password may.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Auth {
    user: String,
    password: String,
}

/// The credential string did not contain a `:` separator.
#[derive(Error, Debug, PartialEq, Eq)]
#[error("auth string must contain a ':' separator")]
pub struct InvalidAuth;

impl Auth {
    /// Creates credentials from already split parts.
    pub fn new<U: Into<String>, P: Into<String>>(user: U, password: P) -> Self {
        Self { user: user.into(), password: password.into() }
    }

    /// Returns the user name.
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Returns the password.
    pub fn password(&self) -> &str {
        &self.password
    }

    /// Renders the `Authorization` header value.
    pub(crate) fn basic(&self) -> String {
        let credentials = BASE64_STANDARD.encode(format!("{}:{}", self.user, self.password));
        format!("Basic {credentials}")
    }
}

impl FromStr for Auth {
    type Err = InvalidAuth;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((user, password)) => Ok(Self::new(user, password)),
            None => Err(InvalidAuth),
        }
    }
}

impl fmt::Display for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.user, self.password)
    }
}
