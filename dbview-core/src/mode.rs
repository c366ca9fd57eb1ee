//! Freshness modes and their combination rule.
//!
//! Modes are totally ordered from most to least conservative:
//!
//! ```text
//! Offline < PreferCache < Freshen
//! ```
//!
//! A per-call limit can only make a load more conservative than the
//! view-wide mode, never less.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// How eagerly a load may contact the origin store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub enum Mode {
    /// Never contact the origin; answer from cache or fail.
    Offline,
    /// Answer from cache when the aspect was ever fetched, else fetch.
    PreferCache,
    /// Always fetch from the origin and merge into cache.
    #[default]
    Freshen,
}

impl Mode {
    /// Combine the view-wide mode with an optional per-call limit.
    ///
    /// `None` inherits the view mode; otherwise the smaller of the two wins.
    pub fn effective(view_mode: Mode, limit: Option<Mode>) -> Mode {
        match limit {
            None => view_mode,
            Some(limit) => view_mode.min(limit),
        }
    }

    /// Returns true when cached answers may be used at all.
    pub fn allows_cache(&self) -> bool {
        !matches!(self, Mode::Freshen)
    }

    /// Returns true when the origin may be contacted.
    pub fn allows_origin(&self) -> bool {
        !matches!(self, Mode::Offline)
    }

    /// Convert to configuration string representation.
    pub fn as_config_str(&self) -> &'static str {
        match self {
            Mode::Offline => "offline",
            Mode::PreferCache => "prefer_cache",
            Mode::Freshen => "freshen",
        }
    }

    /// Parse from configuration string representation.
    pub fn from_config_str(s: &str) -> Result<Self, ModeParseError> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "offline" => Ok(Mode::Offline),
            "prefer_cache" => Ok(Mode::PreferCache),
            "freshen" => Ok(Mode::Freshen),
            _ => Err(ModeParseError(s.to_string())),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_config_str())
    }
}

impl FromStr for Mode {
    type Err = ModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_config_str(s)
    }
}

/// Error when parsing an invalid mode string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModeParseError(pub String);

impl fmt::Display for ModeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid mode: {}", self.0)
    }
}

impl std::error::Error for ModeParseError {}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn any_mode() -> impl Strategy<Value = Mode> {
        prop_oneof![
            Just(Mode::Offline),
            Just(Mode::PreferCache),
            Just(Mode::Freshen)
        ]
    }

    #[test]
    fn test_ordering() {
        assert!(Mode::Offline < Mode::PreferCache);
        assert!(Mode::PreferCache < Mode::Freshen);
    }

    #[test]
    fn test_effective_inherits_without_limit() {
        assert_eq!(Mode::effective(Mode::Freshen, None), Mode::Freshen);
        assert_eq!(Mode::effective(Mode::Offline, None), Mode::Offline);
    }

    #[test]
    fn test_effective_limit_only_tightens() {
        assert_eq!(
            Mode::effective(Mode::Freshen, Some(Mode::PreferCache)),
            Mode::PreferCache
        );
        // a looser limit cannot bring an offline view online
        assert_eq!(
            Mode::effective(Mode::Offline, Some(Mode::Freshen)),
            Mode::Offline
        );
    }

    #[test]
    fn test_parse_roundtrip_and_aliases() {
        assert_eq!("offline".parse::<Mode>(), Ok(Mode::Offline));
        assert_eq!("Prefer-Cache".parse::<Mode>(), Ok(Mode::PreferCache));
        assert_eq!(" FRESHEN ".parse::<Mode>(), Ok(Mode::Freshen));
        assert_eq!(
            "sometimes".parse::<Mode>(),
            Err(ModeParseError("sometimes".to_string()))
        );
        assert_eq!(Mode::PreferCache.to_string(), "prefer_cache");
    }

    #[test]
    fn test_cache_and_origin_permissions() {
        assert!(Mode::Offline.allows_cache());
        assert!(!Mode::Offline.allows_origin());
        assert!(Mode::PreferCache.allows_cache());
        assert!(Mode::PreferCache.allows_origin());
        assert!(!Mode::Freshen.allows_cache());
    }

    proptest! {
        #[test]
        fn prop_effective_never_exceeds_either(view in any_mode(), limit in any_mode()) {
            let eff = Mode::effective(view, Some(limit));
            prop_assert!(eff <= view);
            prop_assert!(eff <= limit);
            prop_assert!(eff == view || eff == limit);
        }
    }
}
