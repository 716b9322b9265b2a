//! Single-use access codes and their issuer.

use rand::Rng;
use serde::{Deserialize, Serialize};

use hsync_core::{DomainError, DomainResult};

const MAX_CODE_LEN: usize = 64;

pub const MIN_GENERATED_LEN: usize = 4;
pub const MAX_GENERATED_LEN: usize = 32;

const NUMERIC: &[u8] = b"0123456789";
const BASE36: &[u8] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Opaque token authorizing exactly one dispensing action.
///
/// `Debug` is redacted so codes do not end up in logs.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccessCode(String);

impl AccessCode {
    /// Parse a submitted code. Surrounding whitespace is ignored and letters are
    /// upper-cased to match the generated alphabet; the token must be non-empty
    /// ASCII alphanumeric.
    pub fn parse(raw: &str) -> DomainResult<Self> {
        let code = raw.trim();
        if code.is_empty() {
            return Err(DomainError::validation("access code cannot be empty"));
        }
        if code.len() > MAX_CODE_LEN {
            return Err(DomainError::validation("access code is too long"));
        }
        if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DomainError::validation(
                "access code must be alphanumeric",
            ));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Debug for AccessCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("AccessCode(<redacted>)")
    }
}

impl TryFrom<String> for AccessCode {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AccessCode> for String {
    fn from(value: AccessCode) -> Self {
        value.0
    }
}

/// Character set codes are drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodeAlphabet {
    /// Digits only. The first digit is never `0`.
    Numeric,
    /// Digits and upper-case ASCII letters.
    Base36,
}

impl CodeAlphabet {
    fn symbols(self) -> &'static [u8] {
        match self {
            CodeAlphabet::Numeric => NUMERIC,
            CodeAlphabet::Base36 => BASE36,
        }
    }
}

impl core::str::FromStr for CodeAlphabet {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "numeric" => Ok(CodeAlphabet::Numeric),
            "base36" => Ok(CodeAlphabet::Base36),
            other => Err(DomainError::validation(format!(
                "unknown access code alphabet '{other}' (expected numeric or base36)"
            ))),
        }
    }
}

/// Length + alphabet of generated codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessCodePolicy {
    length: usize,
    alphabet: CodeAlphabet,
}

impl AccessCodePolicy {
    pub fn new(length: usize, alphabet: CodeAlphabet) -> DomainResult<Self> {
        if !(MIN_GENERATED_LEN..=MAX_GENERATED_LEN).contains(&length) {
            return Err(DomainError::validation(format!(
                "access code length must be between {MIN_GENERATED_LEN} and {MAX_GENERATED_LEN}"
            )));
        }
        Ok(Self { length, alphabet })
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn alphabet(&self) -> CodeAlphabet {
        self.alphabet
    }
}

impl Default for AccessCodePolicy {
    /// Six numeric digits.
    fn default() -> Self {
        Self {
            length: 6,
            alphabet: CodeAlphabet::Numeric,
        }
    }
}

/// Generates fresh codes. Uniqueness among active codes is enforced by the store;
/// callers retry on collision.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessCodeIssuer {
    policy: AccessCodePolicy,
}

impl AccessCodeIssuer {
    pub fn new(policy: AccessCodePolicy) -> Self {
        Self { policy }
    }

    pub fn generate(&self) -> AccessCode {
        self.generate_with(&mut rand::thread_rng())
    }

    pub fn generate_with<R: Rng>(&self, rng: &mut R) -> AccessCode {
        let symbols = self.policy.alphabet.symbols();
        let mut code = String::with_capacity(self.policy.length);
        for pos in 0..self.policy.length {
            let idx = if pos == 0 && self.policy.alphabet == CodeAlphabet::Numeric {
                rng.gen_range(1..symbols.len())
            } else {
                rng.gen_range(0..symbols.len())
            };
            code.push(symbols[idx] as char);
        }
        AccessCode(code)
    }
}
