//! Password strength score shown next to password inputs.

use std::fmt;

pub const MIN_STRONG_LENGTH: usize = 12;
const SPECIALS: &str = r#"!@#$%^&*(),.?":{}|<>"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strength {
    VeryWeak,
    Weak,
    Medium,
    Good,
    VeryStrong,
}

impl Strength {
    pub fn from_score(score: u8) -> Self {
        match score {
            0 => Strength::VeryWeak,
            1 => Strength::Weak,
            2 => Strength::Medium,
            3 => Strength::Good,
            _ => Strength::VeryStrong,
        }
    }
}

impl fmt::Display for Strength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Strength::VeryWeak => "very weak",
            Strength::Weak => "weak",
            Strength::Medium => "medium",
            Strength::Good => "good",
            Strength::VeryStrong => "very strong",
        };
        f.write_str(label)
    }
}

/// One point each for: length >= 12, an uppercase letter, a lowercase
/// letter, a digit (any Unicode digit), a special character.  Range `0..=5`.
pub fn evaluate(password: &str) -> u8 {
    let checks = [
        password.chars().count() >= MIN_STRONG_LENGTH,
        password.chars().any(|c| c.is_ascii_uppercase()),
        password.chars().any(|c| c.is_ascii_lowercase()),
        password.chars().any(|c| c.is_numeric()),
        password.chars().any(|c| SPECIALS.contains(c)),
    ];
    checks.iter().filter(|&&hit| hit).count() as u8
}

pub fn strength(password: &str) -> Strength {
    Strength::from_score(evaluate(password))
}
