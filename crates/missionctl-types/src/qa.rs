//! Q&A cache entry (spec §3 "Q&A cache").
//!
//! Keyed by `(mission, asker-task, target-task, index?, normalized-question)`
//! so that identical questions asked by parallel iterations of the same
//! task hit the same cached answer instead of round-tripping to the
//! ancestor Commander again (spec §8, scenario 3).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaCacheEntry {
    pub mission_id: String,
    pub asker: String,
    pub target: String,
    pub index: Option<u32>,
    pub question: String,
    pub question_hash: String,
    pub answer: String,
}

/// Normalizes a question for cache-key purposes: trims, lowercases and
/// collapses internal whitespace so that cosmetically different phrasings
/// issued by parallel iterations still collide.
pub fn normalize_question(question: &str) -> String {
    question
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_ascii_lowercase()
}

pub fn question_hash(question: &str) -> String {
    // FNV-1a: stable, dependency-free, good enough for a cache key (not a
    // security boundary).
    let normalized = normalize_question(question);
    let mut hash: u64 = 0xcbf29ce484222325;
    for byte in normalized.as_bytes() {
        hash ^= *byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    format!("{hash:016x}")
}
