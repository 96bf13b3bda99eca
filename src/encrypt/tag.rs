//! Classification tags
//!
//! A tag binds a JSON pointer to a classification and an operation.
//! Tags come either from a type's declared field tags (strings of the form
//! `"<level>[,<operation>]"`) or from a payload implementing [`Taggable`].

use crate::error::{EventError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Sensitivity level of a field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    Public,
    Sensitive,
    Secret,
}

impl Classification {
    /// Operation applied when a tag names only the classification
    pub fn default_operation(self) -> Operation {
        match self {
            Self::Public => Operation::None,
            Self::Sensitive => Operation::Encrypt,
            Self::Secret => Operation::Redact,
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Public => write!(f, "public"),
            Self::Sensitive => write!(f, "sensitive"),
            Self::Secret => write!(f, "secret"),
        }
    }
}

impl FromStr for Classification {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "public" => Ok(Self::Public),
            "sensitive" => Ok(Self::Sensitive),
            "secret" => Ok(Self::Secret),
            other => Err(EventError::InvalidTag {
                tag: other.to_string(),
                reason: "unknown classification".to_string(),
            }),
        }
    }
}

/// Transform applied to a classified field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    #[serde(rename = "none")]
    None,
    #[serde(rename = "redact")]
    Redact,
    #[serde(rename = "encrypt")]
    Encrypt,
    #[serde(rename = "hmac-sha256")]
    HmacSha256,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Redact => write!(f, "redact"),
            Self::Encrypt => write!(f, "encrypt"),
            Self::HmacSha256 => write!(f, "hmac-sha256"),
        }
    }
}

impl FromStr for Operation {
    type Err = EventError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "redact" => Ok(Self::Redact),
            "encrypt" => Ok(Self::Encrypt),
            "hmac-sha256" => Ok(Self::HmacSha256),
            other => Err(EventError::InvalidTag {
                tag: other.to_string(),
                reason: "unknown operation".to_string(),
            }),
        }
    }
}

/// A (pointer, classification, operation) triple for one field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointerTag {
    /// JSON pointer (RFC 6901) to the field, e.g. `/user/email`
    pub pointer: String,
    pub classification: Classification,
    pub operation: Operation,
}

impl PointerTag {
    pub fn new(
        pointer: impl Into<String>,
        classification: Classification,
        operation: Operation,
    ) -> Self {
        Self {
            pointer: pointer.into(),
            classification,
            operation,
        }
    }

    /// Tag using the classification's default operation
    pub fn classified(pointer: impl Into<String>, classification: Classification) -> Self {
        Self::new(pointer, classification, classification.default_operation())
    }

    pub(crate) fn validate(&self) -> Result<()> {
        validate_pointer(&self.pointer)
    }

    /// Operation actually applied; `public` fields are never transformed
    pub fn effective_operation(&self) -> Operation {
        match self.classification {
            Classification::Public => Operation::None,
            _ => self.operation,
        }
    }
}

/// Payloads that describe their own classification
///
/// Used when the shape of a value is only known at runtime (maps, dynamic
/// records). Pointers must be empty (the whole payload) or start with `/`.
pub trait Taggable: Send + Sync {
    fn tags(&self) -> Result<Vec<PointerTag>>;
}

/// A declared field tag in the `"<level>[,<operation>]"` syntax
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldTag {
    pub pointer: String,
    pub tag: String,
}

impl FieldTag {
    pub fn new(pointer: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            pointer: pointer.into(),
            tag: tag.into(),
        }
    }

    /// Parse the tag string into a `PointerTag`
    ///
    /// A `public` field never gets transformed, whatever operation it names.
    pub fn parse(&self) -> Result<PointerTag> {
        validate_pointer(&self.pointer)?;

        let mut parts = self.tag.split(',').map(str::trim);
        let level = parts.next().unwrap_or_default();
        if level.is_empty() {
            return Err(EventError::InvalidTag {
                tag: self.tag.clone(),
                reason: "missing classification".to_string(),
            });
        }
        let classification: Classification = level.parse().map_err(|_| EventError::InvalidTag {
            tag: self.tag.clone(),
            reason: format!("unknown classification '{}'", level),
        })?;

        let operation = match parts.next() {
            Some(op) => op.parse().map_err(|_| EventError::InvalidTag {
                tag: self.tag.clone(),
                reason: format!("unknown operation '{}'", op),
            })?,
            None => classification.default_operation(),
        };

        if parts.next().is_some() {
            return Err(EventError::InvalidTag {
                tag: self.tag.clone(),
                reason: "expected '<classification>[,<operation>]'".to_string(),
            });
        }

        let tag = PointerTag::new(self.pointer.clone(), classification, operation);
        Ok(PointerTag {
            operation: tag.effective_operation(),
            ..tag
        })
    }
}

/// Types whose fields carry declared classification tags
///
/// The static counterpart of [`Taggable`]: tags describe the type, not a
/// particular value.
///
/// ```rust
/// use a3s_eventlogger::encrypt::{Classified, FieldTag};
///
/// struct Login {
///     user_id: String,
///     password: String,
/// }
///
/// impl Classified for Login {
///     fn classification() -> Vec<FieldTag> {
///         vec![
///             FieldTag::new("/user_id", "public"),
///             FieldTag::new("/password", "secret,redact"),
///         ]
///     }
/// }
/// ```
pub trait Classified {
    fn classification() -> Vec<FieldTag>;
}

/// Re-root declared tags of a nested value under `prefix`
///
/// ```rust
/// use a3s_eventlogger::encrypt::{nest_field_tags, Classified, FieldTag};
///
/// struct Card;
///
/// impl Classified for Card {
///     fn classification() -> Vec<FieldTag> {
///         vec![FieldTag::new("/number", "secret,hmac-sha256")]
///     }
/// }
///
/// struct Order;
///
/// impl Classified for Order {
///     fn classification() -> Vec<FieldTag> {
///         let mut tags = vec![FieldTag::new("/order_id", "public")];
///         tags.extend(nest_field_tags("/payment/card", Card::classification()));
///         tags
///     }
/// }
///
/// assert_eq!(Order::classification()[1].pointer, "/payment/card/number");
/// ```
pub fn nest_field_tags(prefix: &str, tags: Vec<FieldTag>) -> Vec<FieldTag> {
    tags.into_iter()
        .map(|t| FieldTag::new(format!("{}{}", prefix, t.pointer), t.tag))
        .collect()
}

/// Re-root pointer tags of a nested value under `prefix`
///
/// A parent [`Taggable`] uses this to include the tags of a child that
/// serializes under one of its fields.
///
/// ```rust
/// use a3s_eventlogger::encrypt::{nest_pointer_tags, Classification, PointerTag, Taggable};
/// use a3s_eventlogger::Result;
///
/// struct Address {
///     street: String,
/// }
///
/// impl Taggable for Address {
///     fn tags(&self) -> Result<Vec<PointerTag>> {
///         Ok(vec![PointerTag::classified("/street", Classification::Sensitive)])
///     }
/// }
///
/// struct Customer {
///     id: String,
///     address: Address,
/// }
///
/// impl Taggable for Customer {
///     fn tags(&self) -> Result<Vec<PointerTag>> {
///         let mut tags = vec![PointerTag::classified("/id", Classification::Public)];
///         tags.extend(nest_pointer_tags("/address", self.address.tags()?));
///         Ok(tags)
///     }
/// }
///
/// let customer = Customer {
///     id: "c-7".to_string(),
///     address: Address { street: "1 Main St".to_string() },
/// };
/// let tags = customer.tags().unwrap();
/// assert_eq!(tags[1].pointer, "/address/street");
/// assert_eq!(tags[1].classification, Classification::Sensitive);
/// ```
pub fn nest_pointer_tags(prefix: &str, tags: Vec<PointerTag>) -> Vec<PointerTag> {
    tags.into_iter()
        .map(|t| PointerTag::new(format!("{}{}", prefix, t.pointer), t.classification, t.operation))
        .collect()
}

/// Escape one pointer segment (`~` → `~0`, `/` → `~1`)
pub fn escape_segment(segment: &str) -> String {
    segment.replace('~', "~0").replace('/', "~1")
}

fn validate_pointer(pointer: &str) -> Result<()> {
    if pointer.is_empty() || pointer.starts_with('/') {
        Ok(())
    } else {
        Err(EventError::InvalidTag {
            tag: pointer.to_string(),
            reason: "pointer must be empty or start with '/'".to_string(),
        })
    }
}
