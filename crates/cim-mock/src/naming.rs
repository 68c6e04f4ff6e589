//! Mock naming convention
//!
//! Mocked task labels, dataset types and storage classes carry a fixed
//! prefix so they can never collide with real ones.

/// Prefix marking a mocked name
pub const MOCK_PREFIX: &str = "_mock_";

/// Mocked form of `name`
#[must_use]
pub fn mock_name(name: &str) -> String {
    format!("{MOCK_PREFIX}{name}")
}

/// Name without the mock prefix; unmocked names pass through
#[must_use]
pub fn original_name(name: &str) -> &str {
    name.strip_prefix(MOCK_PREFIX).unwrap_or(name)
}

/// Whether `name` follows the mock convention
#[inline]
#[must_use]
pub fn is_mock_name(name: &str) -> bool {
    name.starts_with(MOCK_PREFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let mocked = mock_name("calexp");
        assert_eq!(mocked, "_mock_calexp");
        assert!(is_mock_name(&mocked));
        assert_eq!(original_name(&mocked), "calexp");
        assert_eq!(original_name("skyMap"), "skyMap");
        assert!(!is_mock_name("skyMap"));
    }
}
