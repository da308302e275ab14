//! Cache key scheme.
//!
//! Keys are rendered as `"{type}:{owner}"` or `"{type}:{owner}:{context}"`.
//! The owner is numeric and the context is restricted to a word token, so
//! the separator can never appear inside a component and the text form
//! parses back into exactly the key it came from.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{ArtifactError, Result};

/// Unique identifier for a user (the owner of every artifact)
pub type UserId = u64;

/// The closed set of artifact kinds the cache stores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Pantry,
    Preferences,
    Recipes,
}

impl ArtifactType {
    pub const ALL: [ArtifactType; 3] = [
        ArtifactType::Pantry,
        ArtifactType::Preferences,
        ArtifactType::Recipes,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ArtifactType::Pantry => "pantry",
            ArtifactType::Preferences => "preferences",
            ArtifactType::Recipes => "recipes",
        }
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArtifactType {
    type Err = ArtifactError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pantry" => Ok(ArtifactType::Pantry),
            "preferences" => Ok(ArtifactType::Preferences),
            "recipes" => Ok(ArtifactType::Recipes),
            other => Err(ArtifactError::invalid_key(other, "unknown artifact type")),
        }
    }
}

/// Deterministic identifier for one cached artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    artifact_type: ArtifactType,
    owner: UserId,
    context: Option<String>,
}

impl CacheKey {
    /// Key without a context component.
    pub fn new(artifact_type: ArtifactType, owner: UserId) -> Self {
        Self {
            artifact_type,
            owner,
            context: None,
        }
    }

    /// Key with a context component. The context must be a non-empty word
    /// token (`[A-Za-z0-9_-]+`).
    pub fn with_context(
        artifact_type: ArtifactType,
        owner: UserId,
        context: impl Into<String>,
    ) -> Result<Self> {
        let context = context.into();
        if !is_word_token(&context) {
            return Err(ArtifactError::invalid_key(
                context,
                "context must be a non-empty word token",
            ));
        }
        Ok(Self {
            artifact_type,
            owner,
            context: Some(context),
        })
    }

    pub fn artifact_type(&self) -> ArtifactType {
        self.artifact_type
    }

    pub fn owner(&self) -> UserId {
        self.owner
    }

    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Glob pattern matching every contextual key of this type and owner
    /// (but not the context-free key itself).
    pub fn context_pattern(artifact_type: ArtifactType, owner: UserId) -> String {
        format!("{}:{}:*", artifact_type, owner)
    }
}

/// Build the textual key for `(type, owner, context)`.
///
/// Invalid contexts are reported as errors rather than silently rewritten,
/// so producers and consumers always agree on the key.
pub fn build_key(
    artifact_type: ArtifactType,
    owner: UserId,
    context: Option<&str>,
) -> Result<String> {
    let key = match context {
        Some(ctx) => CacheKey::with_context(artifact_type, owner, ctx)?,
        None => CacheKey::new(artifact_type, owner),
    };
    Ok(key.to_string())
}

/// True when `s` is a non-empty run of ASCII letters, digits, `_` or `-`.
pub fn is_word_token(s: &str) -> bool {
    !s.is_empty()
        && s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.context {
            Some(ctx) => write!(f, "{}:{}:{}", self.artifact_type, self.owner, ctx),
            None => write!(f, "{}:{}", self.artifact_type, self.owner),
        }
    }
}

impl FromStr for CacheKey {
    type Err = ArtifactError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, ':');
        let (Some(kind), Some(owner)) = (parts.next(), parts.next()) else {
            return Err(ArtifactError::invalid_key(s, "expected type:owner[:context]"));
        };

        let artifact_type = kind
            .parse::<ArtifactType>()
            .map_err(|_| ArtifactError::invalid_key(s, "unknown artifact type"))?;

        // Reject signs and leading zeros so parsing stays the exact inverse
        // of Display
        let canonical = !owner.is_empty()
            && owner.bytes().all(|b| b.is_ascii_digit())
            && (owner == "0" || !owner.starts_with('0'));
        if !canonical {
            return Err(ArtifactError::invalid_key(s, "owner must be numeric"));
        }
        let owner = owner
            .parse::<UserId>()
            .map_err(|e| ArtifactError::invalid_key(s, e.to_string()))?;

        match parts.next() {
            Some(ctx) => CacheKey::with_context(artifact_type, owner, ctx)
                .map_err(|_| ArtifactError::invalid_key(s, "malformed context")),
            None => Ok(CacheKey::new(artifact_type, owner)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_text_format() {
        assert_eq!(CacheKey::new(ArtifactType::Pantry, 42).to_string(), "pantry:42");
        assert_eq!(
            CacheKey::with_context(ArtifactType::Recipes, 7, "ctx1")
                .unwrap()
                .to_string(),
            "recipes:7:ctx1"
        );
    }

    #[test]
    fn test_contexts_never_collide() {
        let a = build_key(ArtifactType::Recipes, 7, Some("ctx1")).unwrap();
        let b = build_key(ArtifactType::Recipes, 7, Some("ctx2")).unwrap();
        let c = build_key(ArtifactType::Recipes, 7, None).unwrap();

        assert_ne!(a, b);
        assert_ne!(b, c);
        assert_ne!(a, c);
    }

    #[test]
    fn test_key_parses_back() {
        for text in ["pantry:1", "preferences:99", "recipes:7:q0a1b2", "recipes:0:x_y-z"] {
            let key: CacheKey = text.parse().unwrap();
            assert_eq!(key.to_string(), text, "parse/display should be inverse");
        }

        let key: CacheKey = "recipes:7:ctx1".parse().unwrap();
        assert_eq!(key.artifact_type(), ArtifactType::Recipes);
        assert_eq!(key.owner(), 7);
        assert_eq!(key.context(), Some("ctx1"));
    }

    #[test]
    fn test_rejects_malformed_keys() {
        for text in [
            "",
            "pantry",
            "meals:1",
            "pantry:abc",
            "pantry:-1",
            "pantry:007",
            "recipes:7:",
            "recipes:7:has space",
            "recipes:7:a:b",
        ] {
            assert!(text.parse::<CacheKey>().is_err(), "'{}' should not parse", text);
        }
    }

    #[test]
    fn test_context_must_be_word_token() {
        assert!(CacheKey::with_context(ArtifactType::Recipes, 1, "").is_err());
        assert!(CacheKey::with_context(ArtifactType::Recipes, 1, "a:b").is_err());
        assert!(CacheKey::with_context(ArtifactType::Recipes, 1, "dinner_for-2").is_ok());
    }

    #[test]
    fn test_context_pattern() {
        assert_eq!(CacheKey::context_pattern(ArtifactType::Recipes, 7), "recipes:7:*");
    }
}
