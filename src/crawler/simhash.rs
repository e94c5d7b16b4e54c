//! SimHash fingerprints
//!
//! Each distinct term is hashed to 64 bits; every bit position accumulates the
//! term frequency when the term's bit is set and subtracts it otherwise. The
//! fingerprint keeps the positions whose total ends up positive, so similar
//! documents land a small Hamming distance apart.

use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Splits document text into terms
#[cfg_attr(test, mockall::automock)]
pub trait Tokenizer: Send + Sync {
    fn tokenize(&self, text: &str) -> Vec<String>;
}

/// Lowercased alphanumeric words; CJK ideographs become one term each
#[derive(Debug, Default, Clone, Copy)]
pub struct WordTokenizer;

fn is_ideograph(c: char) -> bool {
    matches!(c, '\u{4E00}'..='\u{9FFF}' | '\u{3400}'..='\u{4DBF}' | '\u{F900}'..='\u{FAFF}')
}

impl Tokenizer for WordTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        let mut word = String::new();

        for c in text.chars() {
            if is_ideograph(c) {
                if !word.is_empty() {
                    tokens.push(std::mem::take(&mut word));
                }
                tokens.push(c.to_string());
            } else if c.is_alphanumeric() {
                word.extend(c.to_lowercase());
            } else if !word.is_empty() {
                tokens.push(std::mem::take(&mut word));
            }
        }

        if !word.is_empty() {
            tokens.push(word);
        }

        tokens
    }
}

/// Every match of a regular expression is a term
#[derive(Debug, Clone)]
pub struct RegexTokenizer {
    pattern: Regex,
}

impl RegexTokenizer {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }
}

impl Tokenizer for RegexTokenizer {
    fn tokenize(&self, text: &str) -> Vec<String> {
        self.pattern.find_iter(text)
            .map(|m| m.as_str().to_lowercase())
            .collect()
    }
}

/// 64-bit signature of a single term
pub fn term_hash(term: &str) -> u64 {
    let digest = Sha256::digest(term.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    u64::from_be_bytes(bytes)
}

/// Frequency-weighted SimHash of a token sequence
pub fn simhash<S: AsRef<str>>(tokens: &[S]) -> u64 {
    let mut frequencies: HashMap<&str, i64> = HashMap::new();
    for token in tokens {
        *frequencies.entry(token.as_ref()).or_insert(0) += 1;
    }

    let mut weights = [0i64; 64];
    for (term, weight) in frequencies {
        let hash = term_hash(term);
        for (bit, total) in weights.iter_mut().enumerate() {
            if (hash >> bit) & 1 == 1 {
                *total += weight;
            } else {
                *total -= weight;
            }
        }
    }

    weights.iter()
        .enumerate()
        .filter(|(_, total)| **total > 0)
        .fold(0u64, |fingerprint, (bit, _)| fingerprint | (1u64 << bit))
}

/// Number of differing bits
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}
