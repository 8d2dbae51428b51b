pub mod environment;
pub mod load;
pub mod shared;

use std::fmt;

use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize, Serializer};

/// A secret string that can be serialized back out of config structures.
///
/// [`secrecy::Secret`] deliberately does not implement [`Serialize`]; this wrapper
/// opts back in for the few places where config round-tripping is required, while
/// keeping the redacted [`fmt::Debug`] output.
#[derive(Clone, Deserialize)]
pub struct SerializableSecretString(Secret<String>);

impl SerializableSecretString {
    pub fn expose_secret(&self) -> &str {
        self.0.expose_secret()
    }
}

impl fmt::Debug for SerializableSecretString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SerializableSecretString([REDACTED])")
    }
}

impl Serialize for SerializableSecretString {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.0.expose_secret())
    }
}

impl From<String> for SerializableSecretString {
    fn from(value: String) -> Self {
        Self(Secret::new(value))
    }
}

impl From<Secret<String>> for SerializableSecretString {
    fn from(value: Secret<String>) -> Self {
        Self(value)
    }
}
