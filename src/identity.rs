//! Service identity - the "self" used for queue namespacing and origin tagging.
//!
//! Every outbound message is stamped with the identity of the producing
//! service, and every inbound message is checked against it. Because fanout
//! exchanges deliver a copy to every bound queue, a service that publishes to
//! an exchange it also consumes from would otherwise reprocess its own output.

use std::env;
use std::error::Error;
use std::fmt;

/// Reserved fanout exchange for success echoes (`{requeueUid}`).
pub const SUCCESS_EXCHANGE: &str = "success.messages";

/// Reserved fanout exchange for failure records.
pub const ERROR_EXCHANGE: &str = "error.messages";

/// Environment variable read by [`ServiceIdentity::from_env`].
pub const SERVICE_NAME_VAR: &str = "SERVICE_NAME";

/// Error type for resolving the service identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// The environment variable is unset or empty.
    Missing(&'static str),
}

impl fmt::Display for IdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdentityError::Missing(var) => {
                write!(f, "service identity not configured ({} is unset)", var)
            }
        }
    }
}

impl Error for IdentityError {}

/// The identity of the running service.
///
/// Read-only after construction and cheap to clone, so it can be handed to
/// every consumer and publisher in the process.
///
/// ## Example
///
/// ```
/// use fanout_adapter::ServiceIdentity;
///
/// let identity = ServiceIdentity::new("billing");
/// assert_eq!(identity.queue_name("invoices"), "billing.invoices");
/// assert!(identity.is_self(Some("billing")));
/// assert!(!identity.is_self(None));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceIdentity(String);

impl ServiceIdentity {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Resolve the identity from `SERVICE_NAME`.
    pub fn from_env() -> Result<Self, IdentityError> {
        match env::var(SERVICE_NAME_VAR) {
            Ok(name) if !name.trim().is_empty() => Ok(Self(name)),
            _ => Err(IdentityError::Missing(SERVICE_NAME_VAR)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Namespace a logical queue name as `<service>.<queue>`.
    pub fn queue_name(&self, logical: &str) -> String {
        format!("{}.{}", self.0, logical)
    }

    /// Whether a message origin refers to this service.
    pub fn is_self(&self, origin: Option<&str>) -> bool {
        origin == Some(self.0.as_str())
    }
}

impl fmt::Display for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ServiceIdentity {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}
