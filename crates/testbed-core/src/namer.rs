//! Resource naming
//!
//! Generates identifiers for clusters, containers, networks and image tags
//! that are valid for docker, kind and kubectl alike, that never collide
//! between environments running side by side on one host, and that still
//! show which project created them.
//!
//! Shape: `{owner}-{seed}-{sequence}{nonce}`
//!
//! - `owner`: the logical owner, normalised and truncated to fit
//! - `seed`: random per namer, doubles as the run id
//! - `sequence`: per-namer counter, unique within the run
//! - `nonce`: two random characters guarding against reused seeds

use crate::model::{ResourceHandle, ResourceKind};
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};

const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const SEED_LEN: usize = 6;
const MAX_SEED_LEN: usize = 12;
const NONCE_LEN: usize = 2;
const FALLBACK_OWNER: &str = "tb";

#[derive(Debug)]
pub struct ResourceNamer {
    seed: String,
    sequence: AtomicU64,
}

impl ResourceNamer {
    /// Namer with a fresh random seed
    pub fn from_entropy() -> Self {
        let mut rng = rand::thread_rng();
        let seed = (0..SEED_LEN)
            .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
            .collect();
        Self::with_seed_unchecked(seed)
    }

    /// Namer with a caller-provided seed (normalised to the allowed alphabet)
    pub fn with_seed(seed: &str) -> Self {
        let normalized: String = normalize(seed).chars().take(MAX_SEED_LEN).collect();
        let normalized = normalized.trim_end_matches('-').to_string();
        if normalized.is_empty() {
            Self::from_entropy()
        } else {
            Self::with_seed_unchecked(normalized)
        }
    }

    fn with_seed_unchecked(seed: String) -> Self {
        Self {
            seed,
            sequence: AtomicU64::new(0),
        }
    }

    pub fn seed(&self) -> &str {
        &self.seed
    }

    /// Generate a unique name for a resource of `kind` owned by `owner`.
    pub fn generate(&self, kind: ResourceKind, owner: &str) -> String {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let suffix = format!("{}-{}{}", self.seed, to_base36(sequence), nonce());

        let mut owner = normalize(owner);
        if !owner.starts_with(|c: char| c.is_ascii_lowercase()) {
            owner = if owner.is_empty() {
                FALLBACK_OWNER.to_string()
            } else {
                format!("{}-{}", FALLBACK_OWNER, owner)
            };
        }

        let room = kind.max_name_len().saturating_sub(suffix.len() + 1);
        let mut owner: String = owner.chars().take(room).collect();
        while owner.ends_with('-') {
            owner.pop();
        }
        if owner.is_empty() {
            owner = FALLBACK_OWNER.chars().take(room.max(1)).collect();
        }

        let name = format!("{}-{}", owner, suffix);
        tracing::debug!(kind = %kind, name = %name, "generated resource name");
        name
    }

    /// Generate a name and wrap it in a handle stamped with the current time.
    pub fn handle(&self, kind: ResourceKind, owner: &str) -> ResourceHandle {
        let name = self.generate(kind, owner);
        ResourceHandle::new(kind, name, owner)
    }
}

/// Whether `name` satisfies the identifier rules for `kind`.
pub fn is_valid_name(kind: ResourceKind, name: &str) -> bool {
    !name.is_empty()
        && name.len() <= kind.max_name_len()
        && name.starts_with(|c: char| c.is_ascii_lowercase())
        && !name.ends_with('-')
        && !name.contains("--")
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// Lowercase, map disallowed characters to `-`, collapse and trim separators.
fn normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        let c = c.to_ascii_lowercase();
        if c.is_ascii_lowercase() || c.is_ascii_digit() {
            out.push(c);
        } else if !out.ends_with('-') {
            out.push('-');
        }
    }
    out.trim_matches('-').to_string()
}

fn to_base36(mut n: u64) -> String {
    if n == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while n > 0 {
        digits.push(ALPHABET[(n % 36) as usize]);
        n /= 36;
    }
    digits.reverse();
    String::from_utf8_lossy(&digits).into_owned()
}

fn nonce() -> String {
    let mut rng = rand::thread_rng();
    (0..NONCE_LEN)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}
