//! Key hashing
//!
//! The ring only needs a `bytes -> u64` function. Any closure of that shape
//! can be plugged in; `HashAlgorithm` provides the built-in choices.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use xxhash_rust::{xxh3::xxh3_64, xxh64::xxh64};

/// A 64-bit hash function over raw key bytes
pub trait Hashing: Send + Sync {
    fn hash(&self, key: &[u8]) -> u64;
}

impl<F> Hashing for F
where
    F: Fn(&[u8]) -> u64 + Send + Sync,
{
    fn hash(&self, key: &[u8]) -> u64 {
        self(key)
    }
}

/// Shared handle to a hash function
pub type SharedHasher = Arc<dyn Hashing>;

/// Built-in hash algorithms
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum HashAlgorithm {
    /// XXH64 with seed 0 (default)
    #[default]
    Xxh64,
    /// XXH3, 64-bit output
    Xxh3,
}

impl HashAlgorithm {
    /// Wrap the algorithm as a shared hasher
    pub fn shared(self) -> SharedHasher {
        Arc::new(self)
    }
}

impl Hashing for HashAlgorithm {
    fn hash(&self, key: &[u8]) -> u64 {
        match self {
            Self::Xxh64 => xxh64(key, 0),
            Self::Xxh3 => xxh3_64(key),
        }
    }
}

impl std::str::FromStr for HashAlgorithm {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "xxh64" | "xxhash64" => Ok(Self::Xxh64),
            "xxh3" | "xxhash3" => Ok(Self::Xxh3),
            _ => anyhow::bail!("Invalid hash algorithm: {}. Expected: xxh64 or xxh3", s),
        }
    }
}

impl std::fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Xxh64 => write!(f, "xxh64"),
            Self::Xxh3 => write!(f, "xxh3"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_xxh64_reference_values() {
        assert_eq!(HashAlgorithm::Xxh64.hash(b""), 0xEF46_DB37_51D8_E999);
        assert_eq!(HashAlgorithm::Xxh64.hash(b"abc"), 0x44BC_2CF5_AD77_0999);
    }

    #[test]
    fn test_algorithms_differ() {
        let key = b"user:1000";
        assert_ne!(HashAlgorithm::Xxh64.hash(key), HashAlgorithm::Xxh3.hash(key));
    }

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!("xxh64".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Xxh64);
        assert_eq!("XXH3".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Xxh3);
        assert!("md5".parse::<HashAlgorithm>().is_err());
        assert_eq!(HashAlgorithm::default().to_string(), "xxh64");
    }

    #[test]
    fn test_closure_hasher() {
        let constant = |_: &[u8]| 42u64;
        assert_eq!(constant.hash(b"anything"), 42);

        let shared: SharedHasher = Arc::new(|key: &[u8]| key.len() as u64);
        assert_eq!(shared.hash(b"four"), 4);
    }
}
