//! System locale detection and ordered installer-locale preference

use tracing::debug;

/// Detected user locale
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocaleInfo {
    /// Full BCP-47 tag, e.g. `en-US`
    pub full: String,
    /// Language part only, e.g. `en`
    pub short: String,
}

impl LocaleInfo {
    /// Build from a full tag, deriving the short form
    pub fn from_full(full: &str) -> Self {
        let short = full.split('-').next().unwrap_or(full).to_string();
        Self {
            full: full.to_string(),
            short,
        }
    }
}

/// Market/language pair used to shape catalog queries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locale {
    /// Two-letter market, e.g. `US`
    pub market: String,
    /// Language part, e.g. `en`
    pub language: String,
    /// Whether the `neutral` language is appended to queries
    pub include_neutral: bool,
}

impl Locale {
    /// Project into the DisplayCatalog query fragment
    ///
    /// `market=<M>&languages=<L>-<M>,<L>[,neutral]`
    pub fn query_fragment(&self) -> String {
        let mut fragment = format!(
            "market={}&languages={}-{},{}",
            self.market, self.language, self.market, self.language
        );
        if self.include_neutral {
            fragment.push_str(",neutral");
        }
        fragment
    }
}

/// Detect the user's locale
///
/// Uses `GetUserDefaultLocaleName` on Windows and the `LANG` environment
/// variable elsewhere; `en-US` when neither yields a usable tag.
pub fn detect_locale() -> LocaleInfo {
    let full = platform_locale().unwrap_or_else(|| "en-US".to_string());
    debug!(locale = %full, "detected user locale");
    LocaleInfo::from_full(&full)
}

#[cfg(windows)]
fn platform_locale() -> Option<String> {
    use windows::Win32::Globalization::GetUserDefaultLocaleName;

    // LOCALE_NAME_MAX_LENGTH is 85 including the terminator.
    let mut buffer = [0u16; 85];
    let written = unsafe { GetUserDefaultLocaleName(&mut buffer) };
    if written <= 1 {
        return None;
    }
    let name = String::from_utf16_lossy(&buffer[..(written as usize - 1)]);
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

#[cfg(not(windows))]
fn platform_locale() -> Option<String> {
    // LANG is shaped like en_US.UTF-8
    let lang = std::env::var("LANG").ok()?;
    let tag = lang.split('.').next()?.replace('_', "-");
    if tag.is_empty() || tag.eq_ignore_ascii_case("c") || tag.eq_ignore_ascii_case("posix") {
        None
    } else {
        Some(tag)
    }
}

/// Return the first item whose locale matches, in strict preference order
///
/// Order is `[full, short]`, then `[en-US, en]` when the English fallback
/// is enabled. Comparison is case-insensitive.
pub fn prefer_locale<'a, T>(
    items: &'a [T],
    locale_of: impl Fn(&T) -> &str,
    detected: &LocaleInfo,
    use_english_fallback: bool,
) -> Option<&'a T> {
    let mut candidates = vec![detected.full.as_str(), detected.short.as_str()];
    if use_english_fallback {
        candidates.push("en-US");
        candidates.push("en");
    }

    for candidate in candidates {
        if let Some(found) = items
            .iter()
            .find(|item| locale_of(item).eq_ignore_ascii_case(candidate))
        {
            return Some(found);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detected() -> LocaleInfo {
        LocaleInfo::from_full("de-DE")
    }

    #[test]
    fn test_query_fragment() {
        let locale = Locale {
            market: "US".to_string(),
            language: "en".to_string(),
            include_neutral: true,
        };
        assert_eq!(
            locale.query_fragment(),
            "market=US&languages=en-US,en,neutral"
        );

        let no_neutral = Locale {
            include_neutral: false,
            ..locale
        };
        assert_eq!(no_neutral.query_fragment(), "market=US&languages=en-US,en");
    }

    #[test]
    fn test_prefer_full_over_short() {
        let items = vec!["de", "de-DE", "en-US"];
        let chosen = prefer_locale(&items, |s| s, &detected(), true);
        assert_eq!(chosen, Some(&"de-DE"));
    }

    #[test]
    fn test_prefer_short_before_english() {
        let items = vec!["en-US", "de"];
        let chosen = prefer_locale(&items, |s| s, &detected(), true);
        assert_eq!(chosen, Some(&"de"));
    }

    #[test]
    fn test_english_fallback_order() {
        let items = vec!["en", "en-US"];
        let chosen = prefer_locale(&items, |s| s, &detected(), true);
        assert_eq!(chosen, Some(&"en-US"));
    }

    #[test]
    fn test_fallback_disabled() {
        let items = vec!["en-US", "en"];
        let chosen = prefer_locale(&items, |s| s, &detected(), false);
        assert_eq!(chosen, None);
    }

    #[test]
    fn test_short_form_derivation() {
        let info = LocaleInfo::from_full("pt-BR");
        assert_eq!(info.short, "pt");
    }
}
