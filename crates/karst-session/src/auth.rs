//! Authentication credentials and their wire payload.

use std::fmt;

use karst_protocol::Value;

/// Credentials for the `Auth` request.
///
/// Stored by the client so authentication can be re-run with the same
/// credentials after a reconnect.
#[derive(Clone, PartialEq, Eq)]
pub enum Auth {
    /// An opaque access token.
    Token(String),
    /// A username/password pair.
    Credentials { username: String, password: String },
}

impl Auth {
    /// Token-based credentials.
    pub fn token(token: impl Into<String>) -> Self {
        Self::Token(token.into())
    }

    /// Username/password credentials.
    pub fn credentials(
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self::Credentials {
            username: username.into(),
            password: password.into(),
        }
    }

    /// The `Auth` request body: the bare token string, or a
    /// two-element `[username, password]` list.
    pub fn to_payload(&self) -> Value {
        match self {
            Self::Token(token) => Value::Str(token.clone()),
            Self::Credentials { username, password } => Value::List(vec![
                Value::Str(username.clone()),
                Value::Str(password.clone()),
            ]),
        }
    }
}

// Secrets must not leak into logs; Debug prints the shape only.
impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token(_) => f.write_str("Auth::Token(***)"),
            Self::Credentials { username, .. } => {
                write!(f, "Auth::Credentials({username}, ***)")
            }
        }
    }
}

impl From<&str> for Auth {
    fn from(token: &str) -> Self {
        Self::token(token)
    }
}

impl From<(&str, &str)> for Auth {
    fn from((username, password): (&str, &str)) -> Self {
        Self::credentials(username, password)
    }
}
