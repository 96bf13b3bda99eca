//! Classification-driven encrypt/redact filter
//!
//! Every leaf of the payload resolves to exactly one operation: the tag on
//! its own pointer, else the tag on its closest tagged ancestor, else the
//! fail-safe `{secret, redact}`. Redacted leaves become `"<REDACTED>"`,
//! encrypted leaves `"encrypted:<base64url blob>"`, and hashed leaves
//! `"hmac-sha256:<base64url digest>"`.

mod tag;
mod wrapper;

pub use tag::{
    escape_segment, nest_field_tags, nest_pointer_tags, Classification, Classified, FieldTag,
    Operation, PointerTag, Taggable,
};
pub use wrapper::{AeadWrapper, EncryptedBlob, Wrapper};

use crate::context::Context;
use crate::error::{EventError, Result};
use crate::node::{Node, NodeType};
use crate::types::{Event, Payload, TagSource};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::Arc;

/// Replacement for redacted values
pub const REDACTED: &str = "<REDACTED>";

/// Prefix of encrypted field values
pub const ENCRYPTED_PREFIX: &str = "encrypted:";

/// Prefix of HMAC field values
pub const HMAC_PREFIX: &str = "hmac-sha256:";

const HMAC_KEY_LEN: usize = 32;

type HmacSha256 = Hmac<Sha256>;

/// Encrypt filter configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptFilterConfig {
    /// Node name used in logs and errors
    #[serde(default = "default_name")]
    pub name: String,

    /// HKDF salt for the HMAC key
    #[serde(default)]
    pub hmac_salt: String,

    /// HKDF info (purpose) for the HMAC key
    #[serde(default)]
    pub hmac_info: String,

    /// Replace the operation of every declared tag with this classification
    ///
    /// Never applies to untagged fields, which are always redacted.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub operation_overrides: HashMap<Classification, Operation>,

    /// Treat `Taggable` payloads as untagged
    #[serde(default)]
    pub ignore_taggable: bool,
}

fn default_name() -> String {
    "encrypt-filter".to_string()
}

/// Filter node applying per-field redaction, encryption, and HMAC
pub struct EncryptFilter {
    wrapper: Arc<dyn Wrapper>,
    config: EncryptFilterConfig,
}

impl EncryptFilter {
    pub fn new(wrapper: Arc<dyn Wrapper>, config: EncryptFilterConfig) -> Self {
        let config = if config.name.is_empty() {
            EncryptFilterConfig {
                name: default_name(),
                ..config
            }
        } else {
            config
        };
        Self { wrapper, config }
    }

    /// Filter with default configuration
    pub fn with_wrapper(wrapper: Arc<dyn Wrapper>) -> Self {
        Self::new(wrapper, EncryptFilterConfig::default())
    }

    pub fn with_hmac_salt(mut self, salt: impl Into<String>) -> Self {
        self.config.hmac_salt = salt.into();
        self
    }

    pub fn with_hmac_info(mut self, info: impl Into<String>) -> Self {
        self.config.hmac_info = info.into();
        self
    }

    pub fn with_override(mut self, classification: Classification, operation: Operation) -> Self {
        self.config.operation_overrides.insert(classification, operation);
        self
    }

    pub fn config(&self) -> &EncryptFilterConfig {
        &self.config
    }

    /// Transform a payload according to its tags
    ///
    /// The tag source is kept; only the value tree changes. On error the
    /// payload is left untouched.
    pub async fn transform(&self, ctx: &Context, payload: &mut Payload) -> Result<()> {
        let index = self.tag_index(payload)?;

        let mut leaves = Vec::new();
        collect_leaves(payload.value(), &mut String::new(), &mut leaves);

        let mut hmac_key: Option<Vec<u8>> = None;
        let mut value = payload.value().clone();

        for pointer in &leaves {
            let operation = index.resolve(pointer);
            let Some(leaf) = value.pointer(pointer) else {
                continue;
            };

            let replacement = match operation {
                Operation::None => continue,
                Operation::Redact => REDACTED.to_string(),
                Operation::Encrypt => {
                    let plaintext = leaf_bytes(leaf)?;
                    encrypt_bytes(ctx, self.wrapper.as_ref(), &plaintext).await?
                }
                Operation::HmacSha256 => {
                    let data = leaf_bytes(leaf)?;
                    if hmac_key.is_none() {
                        hmac_key = Some(
                            self.wrapper
                                .derive_key(
                                    ctx,
                                    self.config.hmac_salt.as_bytes(),
                                    self.config.hmac_info.as_bytes(),
                                    HMAC_KEY_LEN,
                                )
                                .await?,
                        );
                    }
                    let key = hmac_key.as_deref().unwrap_or_default();
                    hmac_with_key(key, &data)?
                }
            };

            if let Some(slot) = value.pointer_mut(pointer) {
                *slot = serde_json::Value::String(replacement);
            }
        }

        payload.replace_value(value);

        tracing::debug!(
            filter = %self.config.name,
            leaves = leaves.len(),
            tags = index.len(),
            "Payload classified"
        );
        Ok(())
    }

    fn tag_index(&self, payload: &Payload) -> Result<TagIndex> {
        let tags = match &payload.tags {
            TagSource::Taggable(taggable) if !self.config.ignore_taggable => {
                let tags = taggable.tags()?;
                for tag in &tags {
                    tag.validate()?;
                }
                tags
            }
            TagSource::Declared(fields) => fields
                .iter()
                .map(FieldTag::parse)
                .collect::<Result<Vec<_>>>()?,
            _ => Vec::new(),
        };

        let mut index = TagIndex::default();
        for tag in tags {
            let operation = match tag.classification {
                Classification::Public => tag.effective_operation(),
                level => self
                    .config
                    .operation_overrides
                    .get(&level)
                    .copied()
                    .unwrap_or(tag.operation),
            };
            index.ops.insert(tag.pointer, operation);
        }
        Ok(index)
    }
}

#[async_trait]
impl Node for EncryptFilter {
    async fn process(&self, ctx: &Context, mut event: Event) -> Result<Option<Event>> {
        self.transform(ctx, &mut event.payload).await?;
        Ok(Some(event))
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn node_type(&self) -> NodeType {
        NodeType::Filter
    }
}

/// Resolved operations keyed by pointer
#[derive(Default)]
struct TagIndex {
    ops: HashMap<String, Operation>,
}

impl TagIndex {
    /// Operation of the leaf's own tag or its closest tagged ancestor
    fn resolve(&self, pointer: &str) -> Operation {
        let mut current = pointer;
        loop {
            if let Some(op) = self.ops.get(current) {
                return *op;
            }
            match current.rfind('/') {
                Some(idx) => current = &current[..idx],
                None => return Classification::Secret.default_operation(),
            }
        }
    }

    fn len(&self) -> usize {
        self.ops.len()
    }
}

/// Pointers of every non-null scalar in the tree
fn collect_leaves(value: &serde_json::Value, pointer: &mut String, out: &mut Vec<String>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, child) in map {
                let len = pointer.len();
                pointer.push('/');
                pointer.push_str(&escape_segment(key));
                collect_leaves(child, pointer, out);
                pointer.truncate(len);
            }
        }
        serde_json::Value::Array(items) => {
            for (idx, child) in items.iter().enumerate() {
                let len = pointer.len();
                pointer.push('/');
                pointer.push_str(&idx.to_string());
                collect_leaves(child, pointer, out);
                pointer.truncate(len);
            }
        }
        serde_json::Value::Null => {}
        _ => out.push(pointer.clone()),
    }
}

/// Strings contribute their UTF-8 bytes, other scalars their JSON text
fn leaf_bytes(value: &serde_json::Value) -> Result<Vec<u8>> {
    match value {
        serde_json::Value::String(s) => Ok(s.as_bytes().to_vec()),
        other => Ok(serde_json::to_vec(other)?),
    }
}

async fn encrypt_bytes(ctx: &Context, wrapper: &dyn Wrapper, plaintext: &[u8]) -> Result<String> {
    let blob = wrapper.encrypt(ctx, plaintext, None).await?;
    let serialized = serde_json::to_vec(&blob)?;
    Ok(format!("{}{}", ENCRYPTED_PREFIX, URL_SAFE_NO_PAD.encode(serialized)))
}

fn hmac_with_key(key: &[u8], data: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| EventError::Wrapper(format!("Invalid HMAC key: {}", e)))?;
    mac.update(data);
    Ok(format!(
        "{}{}",
        HMAC_PREFIX,
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    ))
}

/// Decrypt an `encrypted:` field value back to its original bytes
pub async fn decrypt_value(ctx: &Context, wrapper: &dyn Wrapper, field: &str) -> Result<Vec<u8>> {
    let encoded = field.strip_prefix(ENCRYPTED_PREFIX).ok_or_else(|| {
        EventError::Wrapper(format!("Value is not prefixed with '{}'", ENCRYPTED_PREFIX))
    })?;
    let serialized = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|e| EventError::Wrapper(format!("Invalid encrypted field encoding: {}", e)))?;
    let blob: EncryptedBlob = serde_json::from_slice(&serialized)?;
    wrapper.decrypt(ctx, &blob, None).await
}

/// Compute the HMAC field value a filter with this salt and info would emit
pub async fn hmac_sha256(
    ctx: &Context,
    wrapper: &dyn Wrapper,
    salt: &[u8],
    info: &[u8],
    data: &[u8],
) -> Result<String> {
    let key = wrapper.derive_key(ctx, salt, info, HMAC_KEY_LEN).await?;
    hmac_with_key(&key, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;

    fn wrapper() -> Arc<dyn Wrapper> {
        Arc::new(AeadWrapper::new("test-key", &[0x42; 32]))
    }

    fn filter() -> EncryptFilter {
        EncryptFilter::with_wrapper(wrapper())
            .with_hmac_salt("salt")
            .with_hmac_info("info")
    }

    /// Tags a single map field, leaving the rest untagged
    struct TaggedMap(serde_json::Value);

    impl Serialize for TaggedMap {
        fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
            self.0.serialize(s)
        }
    }

    impl Taggable for TaggedMap {
        fn tags(&self) -> Result<Vec<PointerTag>> {
            Ok(vec![
                PointerTag::classified("/foo", Classification::Secret),
                PointerTag::classified("/bar", Classification::Public),
            ])
        }
    }

    struct BadTags;

    impl Serialize for BadTags {
        fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
            json!({"a": 1}).serialize(s)
        }
    }

    impl Taggable for BadTags {
        fn tags(&self) -> Result<Vec<PointerTag>> {
            Ok(vec![PointerTag::classified("a", Classification::Public)])
        }
    }

    #[tokio::test]
    async fn test_classification_scenario() {
        let mut payload = Payload::declared(
            json!({
                "noClassification": "no classification",
                "public": "public",
                "sensitive": "sensitive",
                "secret": "secret",
            }),
            vec![
                FieldTag::new("/public", "public"),
                FieldTag::new("/sensitive", "sensitive,redact"),
                FieldTag::new("/secret", "secret,redact"),
            ],
        );

        filter().transform(&Context::new(), &mut payload).await.unwrap();

        assert_eq!(
            payload.value(),
            &json!({
                "noClassification": REDACTED,
                "public": "public",
                "sensitive": REDACTED,
                "secret": REDACTED,
            })
        );
    }

    #[tokio::test]
    async fn test_untagged_payload_fully_redacted() {
        let mut payload = Payload::new(json!({
            "user": "alice",
            "age": 42,
            "admin": true,
            "nested": {"token": "abc", "list": [1, "two"]},
            "missing": null,
        }));

        filter().transform(&Context::new(), &mut payload).await.unwrap();

        assert_eq!(
            payload.value(),
            &json!({
                "user": REDACTED,
                "age": REDACTED,
                "admin": REDACTED,
                "nested": {"token": REDACTED, "list": [REDACTED, REDACTED]},
                "missing": null,
            })
        );
    }

    #[tokio::test]
    async fn test_scalar_payload_redacted() {
        let mut payload = Payload::new(json!("First entry"));
        filter().transform(&Context::new(), &mut payload).await.unwrap();
        assert_eq!(payload.value(), &json!(REDACTED));
    }

    #[tokio::test]
    async fn test_encrypt_roundtrip_through_wrapper() {
        let ctx = Context::new();
        let w = wrapper();
        let mut payload = Payload::declared(
            json!({"email": "alice@example.com", "attempts": 3}),
            vec![
                FieldTag::new("/email", "sensitive"),
                FieldTag::new("/attempts", "sensitive,encrypt"),
            ],
        );

        EncryptFilter::with_wrapper(w.clone())
            .transform(&Context::new(), &mut payload)
            .await
            .unwrap();

        let email = payload.get("email").unwrap().as_str().unwrap();
        assert!(email.starts_with(ENCRYPTED_PREFIX));
        assert_eq!(
            decrypt_value(&ctx, w.as_ref(), email).await.unwrap(),
            b"alice@example.com"
        );

        let attempts = payload.get("attempts").unwrap().as_str().unwrap();
        assert_eq!(decrypt_value(&ctx, w.as_ref(), attempts).await.unwrap(), b"3");
    }

    #[tokio::test]
    async fn test_hmac_matches_helper() {
        let ctx = Context::new();
        let w = wrapper();
        let mut payload = Payload::declared(
            json!({"email": "alice@example.com"}),
            vec![FieldTag::new("/email", "sensitive,hmac-sha256")],
        );

        EncryptFilter::with_wrapper(w.clone())
            .with_hmac_salt("salt")
            .with_hmac_info("info")
            .transform(&ctx, &mut payload)
            .await
            .unwrap();

        let expected = hmac_sha256(&ctx, w.as_ref(), b"salt", b"info", b"alice@example.com")
            .await
            .unwrap();
        assert_eq!(payload.get("email").unwrap(), &json!(expected));
        assert!(expected.starts_with(HMAC_PREFIX));
    }

    #[tokio::test]
    async fn test_hmac_deterministic_and_scoped() {
        let ctx = Context::new();
        let w = wrapper();
        let a = hmac_sha256(&ctx, w.as_ref(), b"salt", b"info", b"value").await.unwrap();
        let b = hmac_sha256(&ctx, w.as_ref(), b"salt", b"info", b"value").await.unwrap();
        assert_eq!(a, b);

        let other_salt = hmac_sha256(&ctx, w.as_ref(), b"salt2", b"info", b"value").await.unwrap();
        let other_info = hmac_sha256(&ctx, w.as_ref(), b"salt", b"info2", b"value").await.unwrap();
        assert_ne!(a, other_salt);
        assert_ne!(a, other_info);
    }

    #[tokio::test]
    async fn test_nested_tags_override_ancestor() {
        let mut payload = Payload::declared(
            json!({
                "user": {"id": "u-1", "name": "Alice"},
                "keys": ["k1", "k2"],
            }),
            vec![
                FieldTag::new("/user", "public"),
                FieldTag::new("/user/name", "secret"),
                FieldTag::new("/keys", "secret"),
            ],
        );

        filter().transform(&Context::new(), &mut payload).await.unwrap();

        assert_eq!(
            payload.value(),
            &json!({
                "user": {"id": "u-1", "name": REDACTED},
                "keys": [REDACTED, REDACTED],
            })
        );
    }

    #[tokio::test]
    async fn test_tag_for_absent_path_is_noop() {
        let mut payload = Payload::declared(
            json!({"present": "x", "info": null}),
            vec![
                FieldTag::new("/present", "public"),
                FieldTag::new("/info/nested", "secret"),
            ],
        );

        filter().transform(&Context::new(), &mut payload).await.unwrap();
        assert_eq!(payload.value(), &json!({"present": "x", "info": null}));
    }

    #[tokio::test]
    async fn test_escaped_keys_resolve() {
        let mut payload = Payload::declared(
            json!({"a/b": "visible", "c~d": "hidden"}),
            vec![FieldTag::new(format!("/{}", escape_segment("a/b")), "public")],
        );

        filter().transform(&Context::new(), &mut payload).await.unwrap();
        assert_eq!(payload.get("a/b").unwrap(), "visible");
        assert_eq!(payload.get("c~d").unwrap(), REDACTED);
    }

    #[tokio::test]
    async fn test_taggable_payload() {
        let mut payload = Payload::tagged(TaggedMap(json!({
            "foo": "hidden",
            "bar": "shown",
            "baz": "untagged",
        })))
        .unwrap();

        filter().transform(&Context::new(), &mut payload).await.unwrap();
        assert_eq!(payload.get("foo").unwrap(), REDACTED);
        assert_eq!(payload.get("bar").unwrap(), "shown");
        assert_eq!(payload.get("baz").unwrap(), REDACTED);
    }

    #[tokio::test]
    async fn test_ignore_taggable_redacts_everything() {
        let mut payload = Payload::tagged(TaggedMap(json!({"bar": "shown"}))).unwrap();

        let config = EncryptFilterConfig {
            ignore_taggable: true,
            ..Default::default()
        };
        EncryptFilter::new(wrapper(), config)
            .transform(&Context::new(), &mut payload)
            .await
            .unwrap();
        assert_eq!(payload.get("bar").unwrap(), REDACTED);
    }

    #[tokio::test]
    async fn test_invalid_taggable_pointer() {
        let mut payload = Payload::tagged(BadTags).unwrap();
        let err = filter().transform(&Context::new(), &mut payload).await.unwrap_err();
        assert!(matches!(err, EventError::InvalidTag { .. }));
    }

    #[tokio::test]
    async fn test_invalid_declared_tag() {
        let mut payload = Payload::declared(
            json!({"a": "x"}),
            vec![FieldTag::new("/a", "classified,redact")],
        );
        let err = filter().transform(&Context::new(), &mut payload).await.unwrap_err();
        assert!(matches!(err, EventError::InvalidTag { .. }));
    }

    #[tokio::test]
    async fn test_override_applies_to_declared_tags_only() {
        let mut payload = Payload::declared(
            json!({"secret": "s", "untagged": "u"}),
            vec![FieldTag::new("/secret", "secret")],
        );

        filter()
            .with_override(Classification::Secret, Operation::HmacSha256)
            .transform(&Context::new(), &mut payload)
            .await
            .unwrap();

        let secret = payload.get("secret").unwrap().as_str().unwrap();
        assert!(secret.starts_with(HMAC_PREFIX));
        assert_eq!(payload.get("untagged").unwrap(), REDACTED);
    }

    #[tokio::test]
    async fn test_node_never_drops_event() {
        let event = Event::new(
            "test".into(),
            Utc::now(),
            Payload::new(json!({"a": "b"})),
        );
        let out = filter().process(&Context::new(), event).await.unwrap();
        assert_eq!(out.unwrap().payload.get("a").unwrap(), REDACTED);
    }

    /// Wrapper whose key service is unreachable
    struct Unavailable;

    #[async_trait]
    impl Wrapper for Unavailable {
        async fn encrypt(
            &self,
            _ctx: &Context,
            _plaintext: &[u8],
            _aad: Option<&[u8]>,
        ) -> Result<EncryptedBlob> {
            Err(EventError::Wrapper("key unavailable".to_string()))
        }

        async fn decrypt(
            &self,
            _ctx: &Context,
            _blob: &EncryptedBlob,
            _aad: Option<&[u8]>,
        ) -> Result<Vec<u8>> {
            Err(EventError::Wrapper("key unavailable".to_string()))
        }

        async fn derive_key(
            &self,
            _ctx: &Context,
            _salt: &[u8],
            _info: &[u8],
            _len: usize,
        ) -> Result<Vec<u8>> {
            Err(EventError::Wrapper("key unavailable".to_string()))
        }

        fn key_id(&self) -> &str {
            "unavailable"
        }
    }

    #[tokio::test]
    async fn test_wrapper_failure_leaves_payload_untouched() {
        let original = json!({"email": "alice@example.com", "note": "hello"});
        let filter = EncryptFilter::with_wrapper(Arc::new(Unavailable));

        for tag in ["sensitive,encrypt", "sensitive,hmac-sha256"] {
            let mut payload = Payload::declared(
                original.clone(),
                vec![FieldTag::new("/email", tag)],
            );
            let err = filter
                .transform(&Context::new(), &mut payload)
                .await
                .unwrap_err();

            assert!(matches!(err, EventError::Wrapper(ref msg) if msg == "key unavailable"));
            assert_eq!(payload.value(), &original);
        }
    }

    #[tokio::test]
    async fn test_wrapper_failure_fails_node() {
        let event = Event::new(
            "test".into(),
            Utc::now(),
            Payload::declared(json!({"a": "b"}), vec![FieldTag::new("/a", "secret,encrypt")]),
        );
        let err = EncryptFilter::with_wrapper(Arc::new(Unavailable))
            .process(&Context::new(), event)
            .await
            .unwrap_err();
        assert!(matches!(err, EventError::Wrapper(_)));
    }

    #[tokio::test]
    async fn test_cancelled_context_reaches_wrapper() {
        let original = json!({"email": "alice@example.com"});
        let mut payload = Payload::declared(
            original.clone(),
            vec![FieldTag::new("/email", "sensitive,encrypt")],
        );
        let ctx = Context::new();
        ctx.cancel();

        let err = filter().transform(&ctx, &mut payload).await.unwrap_err();
        assert!(matches!(err, EventError::Cancelled));
        assert_eq!(payload.value(), &original);
    }

    /// Marks `/id` public but asks for redaction
    struct PublicRedact(serde_json::Value);

    impl Serialize for PublicRedact {
        fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
            self.0.serialize(s)
        }
    }

    impl Taggable for PublicRedact {
        fn tags(&self) -> Result<Vec<PointerTag>> {
            Ok(vec![PointerTag::new(
                "/id",
                Classification::Public,
                Operation::Redact,
            )])
        }
    }

    #[tokio::test]
    async fn test_public_never_transformed_whatever_the_source() {
        let mut tagged = Payload::tagged(PublicRedact(json!({"id": "u-1"}))).unwrap();
        let mut declared =
            Payload::declared(json!({"id": "u-1"}), vec![FieldTag::new("/id", "public,redact")]);

        let filter = filter().with_override(Classification::Public, Operation::Encrypt);
        filter.transform(&Context::new(), &mut tagged).await.unwrap();
        filter.transform(&Context::new(), &mut declared).await.unwrap();

        assert_eq!(tagged.value(), &json!({"id": "u-1"}));
        assert_eq!(declared.value(), &json!({"id": "u-1"}));
    }

    #[test]
    fn test_config_deserialize_defaults() {
        let config: EncryptFilterConfig = serde_json::from_str(
            r#"{"hmacSalt": "s", "operationOverrides": {"sensitive": "redact"}}"#,
        )
        .unwrap();
        assert_eq!(config.name, "encrypt-filter");
        assert_eq!(config.hmac_salt, "s");
        assert_eq!(
            config.operation_overrides[&Classification::Sensitive],
            Operation::Redact
        );
        assert!(!config.ignore_taggable);
    }

    #[test]
    fn test_empty_name_falls_back_to_default() {
        let f = EncryptFilter::new(wrapper(), EncryptFilterConfig::default());
        assert_eq!(f.name(), "encrypt-filter");
    }

    #[test]
    fn test_resolve_walks_ancestors() {
        let mut index = TagIndex::default();
        index.ops.insert("/a".to_string(), Operation::None);
        index.ops.insert("".to_string(), Operation::Encrypt);

        assert_eq!(index.resolve("/a/b/c"), Operation::None);
        assert_eq!(index.resolve("/z"), Operation::Encrypt);
        assert_eq!(TagIndex::default().resolve("/z"), Operation::Redact);
    }
}
