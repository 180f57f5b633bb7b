use serde_json::Value;
use thiserror::Error;

const ACCESS_EXPIRED_CODES: [&str; 2] = ["EUA_EXPIRED", "CR_EXPIRED"];
const REAUTH_CODES: [&str; 2] = ["ACCESS_INVALID", "ITEM_LOGIN_REQUIRED"];

#[derive(Debug, Error)]
pub enum Error {
    #[error("authentication failed: {}", describe(.details))]
    AuthFailure { details: Value },
    #[error("resource not found")]
    NotFound { details: Value },
    #[error("conflict ({code}): {}", describe(.details))]
    Conflict { code: String, details: Value },
    #[error("access grant expired ({code})")]
    AccessExpired { code: String, details: Value },
    #[error("connection requires re-authentication ({code})")]
    RequiresReauth { code: String, details: Value },
    #[error("api error ({status}, {code}): {}", describe(.details))]
    Api {
        status: u16,
        code: String,
        details: Value,
    },
    #[error("client credentials were not provided")]
    MissingCredentials,
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Decode(#[from] serde_json::Error),
}

/// What the caller should do about a failed remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recovery {
    /// The consent grant lapsed; the connection is expired.
    ExpireConnection,
    /// The user has to go through the consent flow again.
    SuspendConnection,
    /// The resource is already gone. Only meaningful for teardown.
    AlreadyGone,
    /// Nothing to recover, surface the failure.
    Fail,
}

impl Error {
    pub fn recovery(&self) -> Recovery {
        match self {
            Error::AccessExpired { .. } => Recovery::ExpireConnection,
            Error::RequiresReauth { .. } => Recovery::SuspendConnection,
            Error::NotFound { .. } => Recovery::AlreadyGone,
            _ => Recovery::Fail,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// The remote error code, or the HTTP status when the body carried none.
    pub fn code(&self) -> Option<String> {
        match self {
            Error::AuthFailure { .. } => Some("AUTH_FAILED".into()),
            Error::NotFound { .. } => Some("NOT_FOUND".into()),
            Error::Conflict { code, .. }
            | Error::AccessExpired { code, .. }
            | Error::RequiresReauth { code, .. }
            | Error::Api { code, .. } => Some(code.clone()),
            _ => None,
        }
    }
}

/// Maps a non-2xx response into the error taxonomy.
///
/// A recognised error code in the body (`type`, falling back to `code`) wins;
/// otherwise the HTTP status decides.
pub fn classify(status: u16, details: Value) -> Error {
    let code = remote_code(&details);

    if let Some(code) = code.as_deref() {
        if ACCESS_EXPIRED_CODES.contains(&code) {
            return Error::AccessExpired {
                code: code.to_string(),
                details,
            };
        }

        if REAUTH_CODES.contains(&code) {
            return Error::RequiresReauth {
                code: code.to_string(),
                details,
            };
        }

        match code {
            "NOT_FOUND" => return Error::NotFound { details },
            "AUTH_FAILED" => return Error::AuthFailure { details },
            _ => {}
        }
    }

    match status {
        401 => Error::AuthFailure { details },
        404 => Error::NotFound { details },
        409 => Error::Conflict {
            code: code.unwrap_or_else(|| "CONFLICT".to_string()),
            details,
        },
        _ => Error::Api {
            status,
            code: code.unwrap_or_else(|| status.to_string()),
            details,
        },
    }
}

fn remote_code(details: &Value) -> Option<String> {
    ["type", "code"]
        .iter()
        .filter_map(|key| details.get(key))
        .find_map(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
}

pub(crate) fn describe(details: &Value) -> String {
    ["detail", "summary", "message"]
        .iter()
        .find_map(|key| details.get(key).and_then(Value::as_str))
        .map(str::to_string)
        .unwrap_or_else(|| match details {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
}
