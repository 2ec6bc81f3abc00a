use rand::rngs::{OsRng, StdRng};
use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng};
use thiserror::Error;

use crate::{PasteStore, StoreError};

const ADJECTIVES: &[&str] = &[
    "happy", "fast", "brave", "bright", "calm", "clever", "cool", "eager", "fancy", "gentle",
    "grand", "great", "kind", "lively", "lucky", "mighty", "nice", "noble", "proud", "quick",
    "quiet", "smart", "strong", "sweet", "tough", "wild", "wise", "young", "bold", "crisp",
    "funny", "jolly", "merry", "silly", "sunny", "vivid", "witty", "zesty", "lazy", "busy",
    "tiny", "huge", "soft", "loud", "magic", "epic", "super", "mega", "ultra", "hyper",
];

const NOUNS: &[&str] = &[
    "ape", "bat", "bee", "bug", "cat", "cow", "crab", "crow", "dog", "dove", "duck", "eel",
    "elk", "fox", "frog", "goat", "hare", "hawk", "jay", "lamb", "lion", "mole", "moose",
    "mouse", "otter", "owl", "panda", "pig", "pony", "rabbit", "rat", "seal", "shark", "sheep",
    "snail", "snake", "swan", "tiger", "toad", "whale", "wolf", "zebra", "apple", "banana",
    "grape", "kiwi", "lemon", "lime", "mango", "melon", "olive", "orange", "book", "cup",
    "door", "bed", "phone", "shoe", "lamp", "clock", "key", "glass", "plate", "paris", "rome",
    "lima", "cairo", "osaka", "lagos", "milan", "perth", "tokyo", "seoul", "pizza", "donut",
    "taco", "sushi", "burger", "cookie", "muffin", "cactus", "rocket", "comet",
];

const FALLBACK_ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

pub const DEFAULT_WORD_ATTEMPTS: usize = 100;
pub const SUFFIX_BYTES: usize = 3;
pub const FALLBACK_LEN: usize = 16;

#[derive(Error, Debug)]
pub enum IdError {
    #[error("random source unavailable: {0}")]
    Entropy(#[from] rand::Error),
    #[error("no free identifier after {0} attempts")]
    Exhausted(usize),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Produces `adjective-noun-hex` identifiers that are free in a store.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    word_attempts: usize,
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new(DEFAULT_WORD_ATTEMPTS)
    }
}

impl IdGenerator {
    pub fn new(word_attempts: usize) -> Self {
        Self { word_attempts }
    }

    /// Returns an id no live record holds at `now`.
    ///
    /// The check is advisory: the caller must still treat a
    /// [`StoreError::Conflict`] from `create` as a lost race and allocate
    /// again.
    pub async fn allocate<S>(&self, store: &S, now: i64) -> Result<String, IdError>
    where
        S: PasteStore + ?Sized,
    {
        for _ in 0..self.word_attempts {
            // Reseeded per candidate so no RNG is held across the await.
            let candidate = word_candidate(&mut seeded_rng()?);
            if !store.exists(&candidate, now).await? {
                return Ok(candidate);
            }
        }

        log::warn!(
            "word identifiers exhausted after {} attempts, falling back to random id",
            self.word_attempts
        );
        let candidate = fallback_candidate(&mut seeded_rng()?);
        if store.exists(&candidate, now).await? {
            return Err(IdError::Exhausted(self.word_attempts + 1));
        }
        Ok(candidate)
    }
}

fn seeded_rng() -> Result<StdRng, rand::Error> {
    StdRng::from_rng(OsRng)
}

fn word_candidate<R: Rng>(rng: &mut R) -> String {
    let adjective = ADJECTIVES.choose(rng).copied().unwrap_or(ADJECTIVES[0]);
    let noun = NOUNS.choose(rng).copied().unwrap_or(NOUNS[0]);
    let mut suffix = [0u8; SUFFIX_BYTES];
    rng.fill_bytes(&mut suffix);
    format!("{adjective}-{noun}-{}", hex::encode(suffix))
}

fn fallback_candidate<R: Rng>(rng: &mut R) -> String {
    (0..FALLBACK_LEN)
        .map(|_| FALLBACK_ALPHABET[rng.gen_range(0..FALLBACK_ALPHABET.len())] as char)
        .collect()
}
