//! Key tags
//!
//! A key tag is the part of a key that is hashed instead of the whole key,
//! so related keys (`user{42}:profile`, `user{42}:orders`) land on one shard.

use crate::error::ShardError;
use regex::Regex;

/// Default tag: the first non-empty substring between `{` and `}`
pub const DEFAULT_KEY_TAG_PATTERN: &str = r"\{(.+?)\}";

/// A compiled key tag pattern with exactly one capture group
#[derive(Debug, Clone)]
pub struct KeyTagPattern {
    regex: Regex,
}

impl KeyTagPattern {
    /// Compile a tag pattern. The pattern must have exactly one capture group,
    /// which delimits the tag.
    pub fn new(pattern: &str) -> Result<Self, ShardError> {
        let regex = Regex::new(pattern)
            .map_err(|e| ShardError::InvalidKeyTagPattern(e.to_string()))?;

        // captures_len counts the implicit whole-match group
        let groups = regex.captures_len() - 1;
        if groups != 1 {
            return Err(ShardError::InvalidKeyTagPattern(format!(
                "pattern '{}' has {} capture groups, expected exactly 1",
                pattern, groups
            )));
        }

        Ok(Self { regex })
    }

    /// Return the tag if the pattern matches, or the key unchanged
    pub fn extract<'a>(&self, key: &'a str) -> &'a str {
        self.regex
            .captures(key)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
            .unwrap_or(key)
    }

    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }
}

impl Default for KeyTagPattern {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_TAG_PATTERN).expect("default key tag pattern is valid")
    }
}
