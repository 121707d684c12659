use std::{borrow::Cow, fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

/// Compile timestamp of a firmware build.
///
/// GL.iNet stamps every image with the Unix time it was compiled at. The build id is the only
/// key used to order builds on a channel; the human readable version string is never compared.
#[derive(
    Clone, Copy, Debug, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct BuildId(u64);

impl BuildId {
    /// The build id assumed when nothing was ever applied.
    pub const NONE: Self = Self(0);

    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// Renders the build id as a UTC compile time.
    ///
    /// # Examples
    ///
    /// ```
    /// use glinet_update_agent_core::BuildId;
    ///
    /// assert_eq!(
    ///     "2023-11-14 22:13:20 UTC",
    ///     BuildId::new(1_700_000_000).compile_time().to_string(),
    /// );
    /// ```
    pub fn compile_time(self) -> CompileTime {
        CompileTime(self.0)
    }
}

impl Display for BuildId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.0, f)
    }
}

impl From<u64> for BuildId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("`{value}` is not a non-negative integer build id")]
pub struct ParseBuildIdError {
    value: String,
}

impl ParseBuildIdError {
    pub fn value(&self) -> &str {
        &self.value
    }

    fn invalid<'a, T: Into<Cow<'a, str>>>(value: T) -> Self {
        Self {
            value: value.into().to_string(),
        }
    }
}

impl FromStr for BuildId {
    type Err = ParseBuildIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        // `u64::from_str` accepts a leading `+`, which never shows up in a timestamp.
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(ParseBuildIdError::invalid(s));
        }
        trimmed
            .parse::<u64>()
            .map(Self)
            .map_err(|_| ParseBuildIdError::invalid(s))
    }
}

/// Display adapter returned by [`BuildId::compile_time`].
#[derive(Clone, Copy, Debug)]
pub struct CompileTime(u64);

impl Display for CompileTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let time = i64::try_from(self.0)
            .ok()
            .and_then(|secs| chrono::DateTime::from_timestamp(secs, 0));
        match time {
            Some(time) => write!(f, "{}", time.format("%Y-%m-%d %H:%M:%S UTC")),
            None => f.write_str("Unknown"),
        }
    }
}

/// Returns `true` only if `remote` is strictly newer than `last_applied`.
///
/// A channel that republishes or rolls back its build id is not an update.
pub fn should_update(remote: BuildId, last_applied: BuildId) -> bool {
    remote > last_applied
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn newer_build_triggers_update() {
        assert!(should_update(BuildId::new(1_700_000_000), BuildId::NONE));
        assert!(should_update(BuildId::new(2), BuildId::new(1)));
    }

    #[test]
    fn equal_or_older_build_is_up_to_date() {
        for (remote, applied) in [(0, 0), (5, 5), (1_700_000_000, 1_700_000_000), (4, 5), (0, 1)]
        {
            assert!(
                !should_update(BuildId::new(remote), BuildId::new(applied)),
                "remote {remote} must not replace applied {applied}"
            );
        }
    }

    #[test]
    fn parses_decimal_build_ids() {
        assert_eq!(Ok(BuildId::new(1_700_000_000)), "1700000000".parse());
        assert_eq!(Ok(BuildId::new(42)), " 42\n".parse());
        assert_eq!(Ok(BuildId::NONE), "0".parse());
    }

    #[test]
    fn rejects_non_numeric_build_ids() {
        for bad in ["", "  ", "-1", "+5", "17e8", "abc", "1.5", "18446744073709551616"] {
            let err = bad.parse::<BuildId>().unwrap_err();
            assert_eq!(bad, err.value());
        }
    }

    #[test]
    fn compile_time_out_of_range_is_unknown() {
        assert_eq!("Unknown", BuildId::new(u64::MAX).compile_time().to_string());
        assert_eq!(
            "1970-01-01 00:00:00 UTC",
            BuildId::NONE.compile_time().to_string()
        );
    }
}
