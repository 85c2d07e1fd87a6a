//! Service Discovery: locates the managed service's installed
//! executable and the version string baked into it, without relying on
//! the watchdog's own bookkeeping. Used to corroborate (and recover
//! from drift against) the locally-recorded installed version.

use crate::error::ServiceControlError;

#[cfg(windows)]
mod windows;
#[cfg(not(windows))]
mod unix;

#[cfg(windows)]
pub use self::windows::WmiServiceDiscovery as PlatformServiceDiscovery;
#[cfg(not(windows))]
pub use self::unix::ExeMetadataServiceDiscovery as PlatformServiceDiscovery;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    pub path: String,
    pub version: String,
}

/// Platform-independent surface every Service Discovery backend
/// implements. Callers matching a name loosely (the original used a
/// SQL `LIKE '%name%'` clause) may get back more than one candidate;
/// per the decided Open Question, callers should try each in turn and
/// surface the last error if all fail.
pub trait ServiceDiscovery {
    fn find_services(&self, name_like: &str) -> Result<Vec<DiscoveredService>, ServiceControlError>;
}

/// Strips a Windows-style quoted or bare command-line path down to the
/// bare executable path, mirroring `StripPathName` in the original.
pub(crate) fn strip_path_name(full_name: &str) -> String {
    let first_word = full_name.split_whitespace().next().unwrap_or(full_name);
    if !first_word.contains('"') {
        return first_word.to_string();
    }
    full_name
        .split('"')
        .nth(1)
        .unwrap_or(first_word)
        .to_string()
}
