//! Validated configuration file names

/// Suffix every stored configuration carries
pub const CONFIG_EXTENSION: &str = ".json";

/// Longest name accepted (common filesystem limit)
pub const MAX_NAME_LEN: usize = 255;

/// Character substituted for anything outside `[A-Za-z0-9.-]`
const REPLACEMENT: char = '_';

/// Name of a stored configuration.
///
/// Only contains `[A-Za-z0-9._-]`, ends in `.json` and has a non-empty stem,
/// so it is always a plain file name inside the configs directory and can
/// never traverse out of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConfigName(String);

impl ConfigName {
    /// Build a name from an uploaded file name, replacing every disallowed
    /// character. Returns `None` if the result is not a usable `.json` name.
    pub fn sanitize(raw: &str) -> Option<Self> {
        let cleaned: String = raw
            .chars()
            .map(|c| if is_allowed(c) { c } else { REPLACEMENT })
            .collect();
        Self::checked(cleaned)
    }

    /// Accept a name only if it is already in sanitized form.
    ///
    /// Lookups (start, delete, download) use this: a name that `sanitize`
    /// would change can never refer to a stored configuration.
    pub fn parse(raw: &str) -> Option<Self> {
        if !raw.chars().all(|c| is_allowed(c) || c == REPLACEMENT) {
            return None;
        }
        Self::checked(raw.to_string())
    }

    fn checked(name: String) -> Option<Self> {
        let valid = name.len() <= MAX_NAME_LEN
            && name.len() > CONFIG_EXTENSION.len()
            && name.ends_with(CONFIG_EXTENSION);
        valid.then_some(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_allowed(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '.' || c == '-'
}

impl std::fmt::Display for ConfigName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ConfigName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
