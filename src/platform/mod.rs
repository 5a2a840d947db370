//! Architecture and locale detection with ranked preference policies
//!
//! Package selection across the Store and WinGet pipelines funnels through
//! these two policies so both ends rank candidates identically.

pub mod arch;
pub mod locale;

pub use arch::{
    detect_architecture, normalize_architecture, prefer_architecture, ArchSelection,
    ArchitecturePreference,
};
pub use locale::{detect_locale, prefer_locale, Locale, LocaleInfo};
