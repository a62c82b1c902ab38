//! Child process environment construction.

use std::collections::BTreeMap;
use std::ffi::OsString;

/// Overlay per-workload overrides onto an inherited environment.
///
/// Overrides win on key collision; inherited keys without an override pass
/// through unchanged.
pub fn overlay_environment<I>(
    inherited: I,
    overrides: &BTreeMap<String, String>,
) -> BTreeMap<OsString, OsString>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    let mut env: BTreeMap<OsString, OsString> = inherited.into_iter().collect();
    for (key, value) in overrides {
        env.insert(OsString::from(key), OsString::from(value));
    }
    env
}

/// Overlay overrides onto the supervisor's own environment.
pub fn prepare_environment(overrides: &BTreeMap<String, String>) -> BTreeMap<OsString, OsString> {
    overlay_environment(std::env::vars_os(), overrides)
}
