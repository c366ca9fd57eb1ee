//! Per-call load options.

use dbview_core::{Mode, ViewError, ViewResult};

/// What to return when a load is offline and the aspect was never fetched.
#[derive(Debug, Clone, Default)]
pub enum OfflineFallback<R> {
    /// Fail with `ViewError::IsOffline`.
    #[default]
    Raise,
    /// Return this value as-is.
    Value(R),
}

impl<R> OfflineFallback<R> {
    /// Resolve an offline miss on `what`.
    pub(crate) fn resolve(self, what: impl Into<String>) -> ViewResult<R> {
        match self {
            OfflineFallback::Raise => Err(ViewError::IsOffline { what: what.into() }),
            OfflineFallback::Value(value) => Ok(value),
        }
    }
}

/// Options for a single load.
#[derive(Debug, Clone)]
pub struct LoadOptions<R> {
    /// Cap on the view mode for this call; `None` inherits it.
    pub mode: Option<Mode>,
    pub fallback: OfflineFallback<R>,
}

impl<R> Default for LoadOptions<R> {
    fn default() -> Self {
        Self {
            mode: None,
            fallback: OfflineFallback::Raise,
        }
    }
}

impl<R> LoadOptions<R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limit this call to at most `mode`.
    pub fn limit(mode: Mode) -> Self {
        Self {
            mode: Some(mode),
            fallback: OfflineFallback::Raise,
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Return `value` instead of failing on an offline miss.
    pub fn or_fallback(mut self, value: R) -> Self {
        self.fallback = OfflineFallback::Value(value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_raise_and_inherit() {
        let opts: LoadOptions<u32> = LoadOptions::default();
        assert!(opts.mode.is_none());
        assert!(matches!(opts.fallback, OfflineFallback::Raise));

        let err = opts.fallback.resolve("parent#1").unwrap_err();
        assert!(err.is_offline());
    }

    #[test]
    fn test_fallback_value_returned_verbatim() {
        let opts = LoadOptions::limit(Mode::Offline).or_fallback(vec![7u32]);
        assert_eq!(opts.mode, Some(Mode::Offline));
        assert_eq!(opts.fallback.resolve("x").unwrap(), vec![7]);
    }
}
