//! Random password generation.

use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const LETTERS: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DIGITS: &str = "0123456789";
const PUNCTUATION: &str = r##"!"#$%&'()*+,-./:;<=>?@[\]^_`{|}~"##;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GeneratorError {
    #[error("password length must be at least 1")]
    ZeroLength,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PasswordGenerator {
    pub length: usize,
    pub use_digits: bool,
    pub use_special_chars: bool,
}

impl Default for PasswordGenerator {
    fn default() -> Self {
        Self {
            length: 12,
            use_digits: true,
            use_special_chars: true,
        }
    }
}

impl PasswordGenerator {
    fn alphabet(&self) -> Vec<char> {
        let mut chars: Vec<char> = LETTERS.chars().collect();
        if self.use_digits {
            chars.extend(DIGITS.chars());
        }
        if self.use_special_chars {
            chars.extend(PUNCTUATION.chars());
        }
        chars
    }

    /// Draw `length` characters uniformly from the configured alphabet.
    pub fn generate(&self) -> Result<String, GeneratorError> {
        if self.length == 0 {
            return Err(GeneratorError::ZeroLength);
        }
        let alphabet = self.alphabet();
        let mut rng = OsRng;
        Ok((0..self.length)
            .filter_map(|_| alphabet.choose(&mut rng).copied())
            .collect())
    }
}
