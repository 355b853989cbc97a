//! Per-message overrides.
//!
//! The `override` object supplied with a message is applied to the selected
//! channel and provider just before dispatch:
//!
//! ```json
//! {
//!   "channels":  { "email":    { "config": { ... } } },
//!   "providers": { "sendgrid": { "config": { ... } } },
//!   "brand": { ... }
//! }
//! ```

use serde_json::Value;

/// Recursively merge `patch` into `base`. Objects merge key by key; any
/// other patch value replaces the base value.
pub fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base), Value::Object(patch)) => {
            for (key, value) in patch {
                deep_merge(base.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
        (base, patch) => *base = patch.clone(),
    }
}

/// What an override document changes for one channel kind and provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolvedOverrides<'a> {
    pub channel: Option<&'a Value>,
    pub provider: Option<&'a Value>,
    pub brand: Option<&'a Value>,
}

impl<'a> ResolvedOverrides<'a> {
    pub fn resolve(overrides: Option<&'a Value>, channel_kind: &str, provider_key: &str) -> Self {
        let Some(overrides) = overrides else {
            return Self::default();
        };
        Self {
            channel: overrides.pointer(&format!("/channels/{}/config", channel_kind)),
            provider: overrides.pointer(&format!("/providers/{}/config", provider_key)),
            brand: overrides.get("brand"),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.channel.is_none() && self.provider.is_none() && self.brand.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deep_merge_override_wins() {
        let mut base = json!({
            "apiKey": "k1",
            "from": { "address": "a@acme.io", "name": "Acme" },
            "tags": ["a"],
        });
        deep_merge(
            &mut base,
            &json!({ "from": { "address": "b@acme.io" }, "tags": ["b", "c"], "sandbox": true }),
        );
        assert_eq!(
            base,
            json!({
                "apiKey": "k1",
                "from": { "address": "b@acme.io", "name": "Acme" },
                "tags": ["b", "c"],
                "sandbox": true,
            })
        );
    }

    #[test]
    fn test_deep_merge_into_null() {
        let mut base = serde_json::Value::Null;
        deep_merge(&mut base, &json!({ "a": 1 }));
        assert_eq!(base, json!({ "a": 1 }));
    }

    #[test]
    fn test_resolve() {
        let overrides = json!({
            "channels": { "email": { "config": { "replyTo": "x@acme.io" } } },
            "providers": { "sendgrid": { "config": { "apiKey": "override" } } },
        });
        let resolved = ResolvedOverrides::resolve(Some(&overrides), "email", "sendgrid");
        assert_eq!(resolved.channel, Some(&json!({ "replyTo": "x@acme.io" })));
        assert_eq!(resolved.provider, Some(&json!({ "apiKey": "override" })));
        assert!(resolved.brand.is_none());

        let other = ResolvedOverrides::resolve(Some(&overrides), "sms", "twilio");
        assert!(other.is_empty());
        assert!(ResolvedOverrides::resolve(None, "email", "sendgrid").is_empty());
    }
}
