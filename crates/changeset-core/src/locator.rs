// locator.rs — Canonical resource identity for change set elements.
//
// Every element is identified by a Locator. Two elements refer to the same
// resource exactly when their canonical forms are equal, so the Locator is
// used directly as a map key.
//
// Canonical form is always `scheme://rest`:
//   "src/main.rs"                  → "fs://workspace/src/main.rs"
//   "FS://workspace//src/./lib.rs" → "fs://workspace/src/lib.rs"
//   "gmail://inbox/msg-1/"         → "gmail://inbox/msg-1"

use std::fmt;
use std::str::FromStr;

use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};

use crate::error::LocatorError;

/// Scheme + authority prefix applied to bare workspace paths.
pub const FS_PREFIX: &str = "fs://workspace/";

/// A canonical, comparable resource identity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Locator {
    canonical: String,
    scheme_len: usize,
}

impl Locator {
    /// Parse and canonicalize a locator.
    pub fn parse(input: &str) -> Result<Self, LocatorError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(LocatorError::Empty);
        }

        let (scheme, rest) = match trimmed.split_once("://") {
            Some((scheme, rest)) => (canonical_scheme(scheme)?, rest.to_string()),
            None => ("fs".to_string(), format!("workspace/{}", trimmed)),
        };

        let leading_slash = rest.starts_with('/');
        let segments: Vec<&str> = rest
            .split('/')
            .filter(|segment| !segment.is_empty() && *segment != ".")
            .collect();

        let canonical = format!(
            "{}://{}{}",
            scheme,
            if leading_slash { "/" } else { "" },
            segments.join("/")
        );
        Ok(Self {
            canonical,
            scheme_len: scheme.len(),
        })
    }

    /// The canonical string form.
    pub fn as_str(&self) -> &str {
        &self.canonical
    }

    /// The lower-cased scheme (e.g. `fs`, `gmail`).
    pub fn scheme(&self) -> &str {
        &self.canonical[..self.scheme_len]
    }

    /// Everything after `://`.
    pub fn path(&self) -> &str {
        &self.canonical[self.scheme_len + 3..]
    }

    /// Path relative to the workspace for `fs://workspace/` locators.
    pub fn workspace_path(&self) -> Option<&str> {
        self.canonical.strip_prefix(FS_PREFIX)
    }

    /// Scheme-aware glob match.
    ///
    /// 1. A pattern with `://` is matched against the full locator, and only
    ///    when the schemes agree.
    /// 2. A bare pattern (`src/**`) is prefixed with `fs://workspace/` and only
    ///    matches `fs://` locators.
    /// 3. Invalid glob patterns never match.
    pub fn matches(&self, pattern: &str) -> bool {
        if pattern.contains("://") {
            let pattern_scheme = pattern.split("://").next().unwrap_or("");
            if !pattern_scheme.eq_ignore_ascii_case(self.scheme()) {
                return false;
            }
            let pattern = format!(
                "{}{}",
                pattern_scheme.to_ascii_lowercase(),
                &pattern[pattern_scheme.len()..]
            );
            glob_match(&pattern, &self.canonical)
        } else {
            if self.workspace_path().is_none() {
                return false;
            }
            glob_match(&format!("{}{}", FS_PREFIX, pattern), &self.canonical)
        }
    }
}

fn canonical_scheme(scheme: &str) -> Result<String, LocatorError> {
    let mut chars = scheme.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {
            chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '.' | '-'))
        }
        _ => false,
    };
    if valid {
        Ok(scheme.to_ascii_lowercase())
    } else {
        Err(LocatorError::InvalidScheme(scheme.to_string()))
    }
}

fn glob_match(pattern: &str, target: &str) -> bool {
    let opts = MatchOptions {
        require_literal_separator: true,
        ..Default::default()
    };
    match Pattern::new(pattern) {
        Ok(p) => p.matches_with(target, opts),
        Err(_) => false,
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical)
    }
}

impl FromStr for Locator {
    type Err = LocatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Locator {
    type Error = LocatorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Locator> for String {
    fn from(locator: Locator) -> Self {
        locator.canonical
    }
}

impl AsRef<str> for Locator {
    fn as_ref(&self) -> &str {
        &self.canonical
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(s: &str) -> Locator {
        Locator::parse(s).unwrap()
    }

    #[test]
    fn bare_path_gets_workspace_prefix() {
        assert_eq!(loc("src/main.rs").as_str(), "fs://workspace/src/main.rs");
        assert_eq!(loc("src/main.rs").workspace_path(), Some("src/main.rs"));
    }

    #[test]
    fn equivalent_spellings_are_equal() {
        assert_eq!(loc("src/main.rs"), loc("fs://workspace/src/main.rs"));
        assert_eq!(loc("./src//main.rs"), loc("FS://workspace/src/./main.rs"));
        assert_eq!(loc("gmail://inbox/msg-1/"), loc("gmail://inbox/msg-1"));
        assert_ne!(loc("src/main.rs"), loc("src/lib.rs"));
    }

    #[test]
    fn leading_slash_after_scheme_is_kept() {
        let l = loc("file:///etc/hosts");
        assert_eq!(l.as_str(), "file:///etc/hosts");
        assert_eq!(l.scheme(), "file");
        assert_eq!(l.path(), "/etc/hosts");
    }

    #[test]
    fn empty_and_bad_scheme_rejected() {
        assert_eq!(Locator::parse("   "), Err(LocatorError::Empty));
        assert!(matches!(
            Locator::parse("9p://x"),
            Err(LocatorError::InvalidScheme(_))
        ));
        assert!(matches!(
            Locator::parse("://x"),
            Err(LocatorError::InvalidScheme(_))
        ));
    }

    #[test]
    fn serializes_as_canonical_string() {
        let json = serde_json::to_string(&loc("src/a.rs")).unwrap();
        assert_eq!(json, "\"fs://workspace/src/a.rs\"");

        let restored: Locator = serde_json::from_str("\"src//a.rs\"").unwrap();
        assert_eq!(restored, loc("src/a.rs"));

        assert!(serde_json::from_str::<Locator>("\"\"").is_err());
    }

    #[test]
    fn bare_pattern_only_matches_workspace_files() {
        assert!(loc("src/main.rs").matches("src/**"));
        assert!(loc("src/lib.rs").matches("src/*.rs"));
        assert!(!loc("src/sub/deep.rs").matches("src/*.rs"));
        assert!(!loc("gmail://inbox/src/draft").matches("src/**"));
    }

    #[test]
    fn explicit_pattern_requires_matching_scheme() {
        assert!(loc("gmail://inbox/msg-1").matches("gmail://inbox/*"));
        assert!(loc("gmail://inbox/msg-1").matches("GMAIL://**"));
        assert!(!loc("gmail://inbox/msg-1").matches("fs://**"));
        assert!(!loc("src/main.rs").matches("gmail://**"));
    }

    #[test]
    fn invalid_glob_never_matches() {
        assert!(!loc("src/main.rs").matches("[invalid"));
        assert!(!loc("src/main.rs").matches(""));
    }
}
