//! System architecture detection and ranked package preference
//!
//! Store packages come in per-architecture flavors plus a `neutral` build.
//! Selection walks a ranked list: the machine's primary architecture first,
//! then `neutral`, then the emulation fallbacks the OS can actually run.
//! All comparisons are case-insensitive.

use std::fmt;
use std::str::FromStr;

/// Detected machine architecture with its ranked emulation fallbacks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchitecturePreference {
    /// Native architecture (`x64`, `x86`, `arm64`, `arm`)
    pub primary: String,
    /// Architectures the machine can run through emulation, best first
    pub fallback: Vec<String>,
}

impl ArchitecturePreference {
    /// Ranked candidate list: primary, then `neutral`, then fallbacks
    pub fn ranked(&self) -> Vec<String> {
        let mut ranks = vec![self.primary.clone(), "neutral".to_string()];
        ranks.extend(self.fallback.iter().cloned());
        ranks
    }
}

/// Detect the machine architecture
///
/// A 32-bit process on 64-bit Windows sees the real architecture through
/// `PROCESSOR_ARCHITEW6432`; otherwise `PROCESSOR_ARCHITECTURE` or the
/// compile target decides.
pub fn detect_architecture() -> ArchitecturePreference {
    let raw = std::env::var("PROCESSOR_ARCHITEW6432")
        .or_else(|_| std::env::var("PROCESSOR_ARCHITECTURE"))
        .unwrap_or_else(|_| std::env::consts::ARCH.to_string());

    let primary = normalize_architecture(&raw);
    let fallback = fallbacks_for(&primary);
    ArchitecturePreference { primary, fallback }
}

/// Map OS and toolchain spellings onto the Store's architecture names
pub fn normalize_architecture(raw: &str) -> String {
    match raw.to_ascii_lowercase().as_str() {
        "amd64" | "x86_64" | "x64" => "x64".to_string(),
        "arm64" | "aarch64" => "arm64".to_string(),
        "x86" | "i686" | "i386" => "x86".to_string(),
        "arm" => "arm".to_string(),
        other => other.to_string(),
    }
}

fn fallbacks_for(primary: &str) -> Vec<String> {
    match primary {
        "x64" => vec!["x86".to_string()],
        "arm64" => vec!["x64".to_string(), "x86".to_string()],
        _ => Vec::new(),
    }
}

/// Return all items matching the first ranked architecture with any match
///
/// Ranking is `[primary, neutral, fallback…]`; an empty result means no
/// candidate architecture matched at all.
pub fn prefer_architecture<'a, T>(
    items: &'a [T],
    architecture_of: impl Fn(&T) -> &str,
    preference: &ArchitecturePreference,
) -> Vec<&'a T> {
    for rank in preference.ranked() {
        let matches: Vec<&T> = items
            .iter()
            .filter(|item| architecture_of(item).eq_ignore_ascii_case(&rank))
            .collect();
        if !matches.is_empty() {
            return matches;
        }
    }
    Vec::new()
}

/// Architecture policy a caller hands to the Store pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchSelection {
    /// Keep every architecture
    All,
    /// Walk the detected ranked list, keep the first rank with matches
    Autodetect,
    /// Keep exact matches only
    Exact(String),
}

impl FromStr for ArchSelection {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(match s.to_ascii_lowercase().as_str() {
            "all" => ArchSelection::All,
            "autodetect" | "auto" => ArchSelection::Autodetect,
            other => ArchSelection::Exact(normalize_architecture(other)),
        })
    }
}

impl fmt::Display for ArchSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArchSelection::All => write!(f, "All"),
            ArchSelection::Autodetect => write!(f, "Autodetect"),
            ArchSelection::Exact(arch) => write!(f, "{arch}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pref() -> ArchitecturePreference {
        ArchitecturePreference {
            primary: "x64".to_string(),
            fallback: vec!["x86".to_string()],
        }
    }

    #[test]
    fn test_normalize_architecture() {
        assert_eq!(normalize_architecture("AMD64"), "x64");
        assert_eq!(normalize_architecture("x86_64"), "x64");
        assert_eq!(normalize_architecture("aarch64"), "arm64");
        assert_eq!(normalize_architecture("X86"), "x86");
    }

    #[test]
    fn test_prefer_primary_over_neutral() {
        let items = vec!["neutral", "x64", "x86", "X64"];
        let chosen = prefer_architecture(&items, |s| s, &pref());
        assert_eq!(chosen, vec![&"x64", &"X64"]);
    }

    #[test]
    fn test_neutral_ranks_above_fallback() {
        let items = vec!["x86", "neutral"];
        let chosen = prefer_architecture(&items, |s| s, &pref());
        assert_eq!(chosen, vec![&"neutral"]);
    }

    #[test]
    fn test_fallback_used_when_nothing_else_matches() {
        let items = vec!["x86", "arm"];
        let chosen = prefer_architecture(&items, |s| s, &pref());
        assert_eq!(chosen, vec![&"x86"]);
    }

    #[test]
    fn test_no_match_is_empty() {
        let items = vec!["arm", "arm64"];
        let chosen = prefer_architecture(&items, |s| s, &pref());
        assert!(chosen.is_empty());
    }

    #[test]
    fn test_selection_parsing() {
        assert_eq!("All".parse::<ArchSelection>().unwrap(), ArchSelection::All);
        assert_eq!(
            "autodetect".parse::<ArchSelection>().unwrap(),
            ArchSelection::Autodetect
        );
        assert_eq!(
            "AMD64".parse::<ArchSelection>().unwrap(),
            ArchSelection::Exact("x64".to_string())
        );
    }
}
