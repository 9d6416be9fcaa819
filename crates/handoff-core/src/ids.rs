use std::fmt;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::CoreError;

const MAX_SEGMENT_LEN: usize = 128;
const TOKEN_BYTES: usize = 32;

fn validate_segment(kind: &'static str, value: &str) -> Result<(), CoreError> {
    let ok = !value.is_empty()
        && value.len() <= MAX_SEGMENT_LEN
        && value
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if ok {
        Ok(())
    } else {
        Err(CoreError::InvalidIdentifier {
            kind,
            value: value.to_string(),
        })
    }
}

macro_rules! path_segment_id {
    ($(#[$meta:meta])* $name:ident, $kind:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl TryFrom<String> for $name {
            type Error = CoreError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                validate_segment($kind, &value)?;
                Ok(Self(value))
            }
        }

        impl FromStr for $name {
            type Err = CoreError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::try_from(s.to_string())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

path_segment_id!(
    /// Identifier of the in-progress application record (the `visaId` on the wire).
    ApplicationId,
    "application id"
);

path_segment_id!(
    /// Wizard page a handoff applies to, e.g. `visa-pg-1`.
    StepId,
    "step"
);

/// Opaque one-time credential. Only the authority mints these.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenId(String);

impl TokenId {
    /// Mints a fresh random token: 32 bytes, URL-safe base64 without padding.
    pub fn generate() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TokenId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TokenId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The scope every token is bound to: one application, one wizard step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandoffPair {
    #[serde(rename = "visaId")]
    pub application_id: ApplicationId,
    #[serde(rename = "page")]
    pub step: StepId,
}

impl HandoffPair {
    pub fn new(application_id: ApplicationId, step: StepId) -> Self {
        Self {
            application_id,
            step,
        }
    }

    /// Parses both halves from raw path segments.
    pub fn parse(application_id: &str, step: &str) -> Result<Self, CoreError> {
        Ok(Self::new(application_id.parse()?, step.parse()?))
    }

    pub fn with_step(&self, step: StepId) -> Self {
        Self::new(self.application_id.clone(), step)
    }
}

impl fmt::Display for HandoffPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.application_id, self.step)
    }
}
