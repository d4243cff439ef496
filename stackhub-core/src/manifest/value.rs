//! Parameter values and kinds.
//!
//! A parameter value is one of a few shapes rather than arbitrary data, and
//! every conversion between shapes goes through an explicit function here.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of a parameter or output.
///
/// Serialized as `plain`, `license`, `secret` or `secret/<secret kind>`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ParameterKind {
    #[default]
    Plain,
    /// Secret with an optional secret kind (`password`, `certificate`, ...).
    Secret(Option<String>),
    License,
}

impl ParameterKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "" | "plain" => Some(ParameterKind::Plain),
            "license" => Some(ParameterKind::License),
            "secret" => Some(ParameterKind::Secret(None)),
            other => other
                .strip_prefix("secret/")
                .filter(|k| !k.is_empty())
                .map(|k| ParameterKind::Secret(Some(k.to_string()))),
        }
    }

    pub fn is_secret(&self) -> bool {
        matches!(self, ParameterKind::Secret(_))
    }

    /// Secret kind, `text` when unspecified. `None` for non-secrets.
    pub fn secret_kind(&self) -> Option<&str> {
        match self {
            ParameterKind::Secret(Some(kind)) => Some(kind.as_str()),
            ParameterKind::Secret(None) => Some("text"),
            _ => None,
        }
    }
}

impl fmt::Display for ParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterKind::Plain => write!(f, "plain"),
            ParameterKind::License => write!(f, "license"),
            ParameterKind::Secret(None) => write!(f, "secret"),
            ParameterKind::Secret(Some(kind)) => write!(f, "secret/{}", kind),
        }
    }
}

impl TryFrom<String> for ParameterKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ParameterKind::parse(&value).ok_or_else(|| format!("unknown parameter kind '{}'", value))
    }
}

impl From<ParameterKind> for String {
    fn from(kind: ParameterKind) -> Self {
        kind.to_string()
    }
}

/// Scalar parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Bool(b) => write!(f, "{}", b),
            Scalar::Int(i) => write!(f, "{}", i),
            Scalar::Float(x) => write!(f, "{}", x),
            Scalar::String(s) => write!(f, "{}", s),
        }
    }
}

/// Value of a parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Scalar(Scalar),
    /// Reference to a secret held by the control plane.
    SecretRef {
        #[serde(rename = "secretRef")]
        secret_ref: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        kind: Option<String>,
    },
    /// Reference to a license held by the control plane.
    LicenseRef {
        #[serde(rename = "licenseRef")]
        license_ref: String,
    },
    /// Lists and maps are passed through as JSON.
    Structured(serde_yaml::Value),
}

impl ParameterValue {
    pub fn string(s: impl Into<String>) -> Self {
        ParameterValue::Scalar(Scalar::String(s.into()))
    }

    /// String form used in expression bindings and environment variables.
    ///
    /// Secret and license references render as their reference id.
    pub fn as_binding(&self) -> String {
        match self {
            ParameterValue::Scalar(s) => s.to_string(),
            ParameterValue::SecretRef { secret_ref, .. } => secret_ref.clone(),
            ParameterValue::LicenseRef { license_ref } => license_ref.clone(),
            ParameterValue::Structured(v) => serde_json::to_string(v).unwrap_or_default(),
        }
    }

    /// The raw template text when this is a plain string.
    pub fn as_template(&self) -> Option<&str> {
        match self {
            ParameterValue::Scalar(Scalar::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ParameterValue::Scalar(Scalar::String(s)) => s.is_empty(),
            ParameterValue::SecretRef { secret_ref, .. } => secret_ref.is_empty(),
            ParameterValue::LicenseRef { license_ref } => license_ref.is_empty(),
            ParameterValue::Structured(v) => v.is_null(),
            ParameterValue::Scalar(_) => false,
        }
    }

    /// Kind recorded on the value itself, if any.
    pub fn stored_kind(&self) -> Option<ParameterKind> {
        match self {
            ParameterValue::SecretRef { kind, .. } => Some(ParameterKind::Secret(kind.clone())),
            ParameterValue::LicenseRef { .. } => Some(ParameterKind::License),
            _ => None,
        }
    }

    /// Convert into the shape demanded by `kind`.
    ///
    /// A plain string given for a secret parameter is taken as the secret
    /// reference, likewise for licenses. Plaintext secrets never stay inline.
    pub fn coerce(self, kind: &ParameterKind) -> Self {
        match (kind, self) {
            (ParameterKind::Secret(secret_kind), ParameterValue::Scalar(s)) => {
                ParameterValue::SecretRef { secret_ref: s.to_string(), kind: secret_kind.clone() }
            }
            (ParameterKind::License, ParameterValue::Scalar(s)) => {
                ParameterValue::LicenseRef { license_ref: s.to_string() }
            }
            (_, value) => value,
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_binding())
    }
}

impl From<&str> for ParameterValue {
    fn from(s: &str) -> Self {
        ParameterValue::string(s)
    }
}
