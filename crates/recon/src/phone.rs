use serde::Serialize;

/// Normalized 10-digit identity key used to match leads across sources.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct PhoneKey(String);

impl PhoneKey {
    pub const LEN: usize = 10;

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl std::fmt::Display for PhoneKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PhoneKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Canonicalize a raw phone string into its identity key.
///
/// Strips every non-digit and keeps the rightmost ten digits, which drops
/// country-code prefixes (`1`, `91`, …). Fewer than ten digits, or a
/// missing/empty input, means the record has no identity. That is an
/// expected outcome, not an error.
pub fn normalize_phone(raw: Option<&str>) -> Option<PhoneKey> {
    let raw = raw?;
    if raw.is_empty() {
        return None;
    }

    let digits: Vec<char> = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < PhoneKey::LEN {
        return None;
    }

    Some(PhoneKey(digits[digits.len() - PhoneKey::LEN..].iter().collect()))
}
