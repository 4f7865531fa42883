use std::fmt;

use crate::hash::fast_hash;
use crate::languages::LanguageCode;

const UNKNOWN_MODEL: &str = ":unknown:";

/// Cache and in-flight key for one piece of content translated into one
/// language by one model.
///
/// Built from the content itself (or its fingerprint), never from a URL alone,
/// so equivalent content served from different CDNs maps to one identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentIdentity(String);

impl ContentIdentity {
    pub fn from_hash(target: LanguageCode, model: Option<&str>, content_hash: &str) -> Self {
        let model = model.filter(|value| !value.is_empty()).unwrap_or(UNKNOWN_MODEL);
        Self(format!("{}{}{}", target.as_str(), model, content_hash))
    }

    pub fn from_content(target: LanguageCode, model: Option<&str>, content: &str) -> Self {
        Self::from_hash(target, model, &fast_hash(content))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContentIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_depends_on_language_model_and_content() {
        let base = ContentIdentity::from_content(LanguageCode::En, Some("m1"), "data:abc");
        assert_eq!(
            base,
            ContentIdentity::from_content(LanguageCode::En, Some("m1"), "data:abc")
        );
        assert_ne!(
            base,
            ContentIdentity::from_content(LanguageCode::Fr, Some("m1"), "data:abc")
        );
        assert_ne!(
            base,
            ContentIdentity::from_content(LanguageCode::En, Some("m2"), "data:abc")
        );
        assert_ne!(
            base,
            ContentIdentity::from_content(LanguageCode::En, Some("m1"), "data:abd")
        );
    }

    #[test]
    fn missing_model_uses_placeholder() {
        let identity = ContentIdentity::from_hash(LanguageCode::De, None, "123");
        assert_eq!(identity.as_str(), "de:unknown:123");
    }
}
