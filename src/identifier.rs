//! Client-side order identifiers.
//!
//! Orders get a short frontend id the moment they are created, long before
//! the server assigns its own. Ids are 6 characters from `[A-Z0-9]`, drawn
//! from the OS CSPRNG. Each byte is mapped by modulo 36, which slightly
//! favours the first 4 symbols; that bias is accepted.

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

pub const ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
pub const ID_LEN: usize = 6;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Generate a random frontend id. Uniqueness is not checked.
pub fn generate() -> String {
    let mut bytes = [0u8; ID_LEN];
    OsRng.fill_bytes(&mut bytes);
    bytes
        .iter()
        .map(|b| ALPHABET[*b as usize % ALPHABET.len()] as char)
        .collect()
}

/// Generate ids until `exists` reports one as free.
///
/// Fails with `IdentifierExhausted` after `max_attempts` collisions.
pub fn generate_unique<F>(max_attempts: u32, exists: F) -> StoreResult<String>
where
    F: FnMut(&str) -> StoreResult<bool>,
{
    generate_unique_from(generate, max_attempts, exists)
}

fn generate_unique_from<G, F>(mut next: G, max_attempts: u32, mut exists: F) -> StoreResult<String>
where
    G: FnMut() -> String,
    F: FnMut(&str) -> StoreResult<bool>,
{
    for attempt in 1..=max_attempts {
        let candidate = next();
        if !exists(&candidate)? {
            return Ok(candidate);
        }
        debug!(attempt, candidate = %candidate, "Frontend id collision, retrying");
    }
    warn!(max_attempts, "Unable to find a free frontend id");
    Err(StoreError::IdentifierExhausted {
        attempts: max_attempts,
    })
}

/// True iff `id` is exactly 6 characters from the id alphabet.
pub fn validate_format(id: &str) -> bool {
    id.len() == ID_LEN && id.bytes().all(|b| ALPHABET.contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_generate_produces_valid_ids() {
        for _ in 0..500 {
            let id = generate();
            assert!(validate_format(&id), "bad id {id}");
        }
    }

    #[test]
    fn test_generate_unique_sequence_is_distinct() {
        let mut seen = HashSet::new();
        for _ in 0..200 {
            let id = generate_unique(DEFAULT_MAX_ATTEMPTS, |candidate| {
                Ok(seen.contains(candidate))
            })
            .unwrap();
            assert!(validate_format(&id));
            assert!(seen.insert(id));
        }
        assert_eq!(seen.len(), 200);
    }

    #[test]
    fn test_generate_unique_skips_collisions() {
        let mut scripted = vec!["AAAAAA", "BBBBBB", "CCCCCC"].into_iter();
        let taken: HashSet<&str> = ["AAAAAA", "BBBBBB"].into_iter().collect();

        let id = generate_unique_from(
            || scripted.next().unwrap().to_string(),
            DEFAULT_MAX_ATTEMPTS,
            |candidate| Ok(taken.contains(candidate)),
        )
        .unwrap();
        assert_eq!(id, "CCCCCC");
    }

    #[test]
    fn test_generate_unique_exhausts_after_budget() {
        let mut calls = 0;
        let err = generate_unique(3, |_| {
            calls += 1;
            Ok(true)
        })
        .unwrap_err();
        assert!(matches!(err, StoreError::IdentifierExhausted { attempts: 3 }));
        assert_eq!(calls, 3);
    }

    #[test]
    fn test_validate_format() {
        assert!(validate_format("AB12CD"));
        assert!(validate_format("000000"));
        assert!(!validate_format("ab12cd"));
        assert!(!validate_format("AB12C"));
        assert!(!validate_format("AB12CDE"));
        assert!(!validate_format("AB-2CD"));
        assert!(!validate_format("ÄB12C"));
    }
}
