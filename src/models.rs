//! Wire types exchanged with the control plane, plus the local
//! Version value type and its ordering.

use serde::{Deserialize, Serialize};

/// A parsed SemVer-like version: major.minor.patch, all non-negative.
///
/// A missing or unparseable version is represented as `Version::zero()`,
/// which compares less than any version actually parsed from a string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub const fn zero() -> Self {
        Self {
            major: 0,
            minor: 0,
            patch: 0,
        }
    }

    /// Parses a dotted `major.minor.patch` string.
    ///
    /// Fails loudly on any non-numeric or missing component; callers on
    /// the "local installed version" side are expected to recover this
    /// with [`Version::zero`], while callers on the "remote descriptor"
    /// side should propagate the error.
    pub fn parse(raw: &str) -> Result<Self, VersionParseError> {
        let raw = raw.trim().trim_start_matches('v');
        let mut parts = raw.split('.');

        let mut next = |label: &'static str| -> Result<u64, VersionParseError> {
            let part = parts.next().ok_or(VersionParseError::MissingComponent(label))?;
            part.parse::<u64>()
                .map_err(|_| VersionParseError::NotNumeric(label, part.to_string()))
        };

        let major = next("major")?;
        let minor = next("minor")?;
        let patch = next("patch")?;

        Ok(Self { major, minor, patch })
    }

    /// Parses `raw`, recovering any failure as [`Version::zero`]. Used for
    /// the locally-installed version, per the spec's version-engine rule.
    pub fn parse_local_or_zero(raw: &str) -> Self {
        Version::parse(raw).unwrap_or_else(|_| Version::zero())
    }

    /// `true` iff `self` is strictly newer than `other`.
    pub fn is_newer_than(&self, other: &Version) -> bool {
        self > other
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VersionParseError {
    #[error("missing {0} component")]
    MissingComponent(&'static str),
    #[error("{0} component '{1}' is not numeric")]
    NotNumeric(&'static str, String),
}

/// Descriptor of the latest agent build published by the control plane.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpdateDescriptor {
    #[serde(rename = "Major")]
    pub major: u64,
    #[serde(rename = "Minor")]
    pub minor: u64,
    #[serde(rename = "Patch")]
    pub patch: u64,
    #[serde(rename = "Product")]
    pub product: String,
    #[serde(rename = "Md5")]
    pub md5: String,
    #[serde(rename = "Url")]
    pub url: String,
}

impl UpdateDescriptor {
    pub fn version(&self) -> Version {
        Version {
            major: self.major,
            minor: self.minor,
            patch: self.patch,
        }
    }

    /// `true` iff the MD5 digest is a well-formed 32-character lowercase hex string.
    pub fn has_valid_md5_shape(&self) -> bool {
        self.md5.len() == 32 && self.md5.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
    }
}

/// A remote command targeted at this host.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Command {
    #[serde(rename = "Ts")]
    pub ts: String,
    #[serde(rename = "Cmd")]
    pub cmd: CommandKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandKind {
    Start,
    Stop,
    GetConfig,
    PutConfig,
    Unknown(String),
}

impl std::fmt::Display for CommandKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandKind::Start => write!(f, "start"),
            CommandKind::Stop => write!(f, "stop"),
            CommandKind::GetConfig => write!(f, "GET-CONFIG"),
            CommandKind::PutConfig => write!(f, "PUT-CONFIG"),
            CommandKind::Unknown(s) => write!(f, "{s}"),
        }
    }
}

impl From<&str> for CommandKind {
    fn from(raw: &str) -> Self {
        match raw {
            "start" => CommandKind::Start,
            "stop" => CommandKind::Stop,
            "GET-CONFIG" => CommandKind::GetConfig,
            "PUT-CONFIG" => CommandKind::PutConfig,
            other => CommandKind::Unknown(other.to_string()),
        }
    }
}

impl Serialize for CommandKind {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for CommandKind {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        Ok(CommandKind::from(raw.as_str()))
    }
}

/// License validity as reported by the control plane.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LicenseData {
    #[serde(rename = "Valid")]
    pub valid: bool,
    #[serde(rename = "Owner", default)]
    pub owner: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_dotted_version() {
        assert_eq!(
            Version::parse("2.3.12").unwrap(),
            Version { major: 2, minor: 3, patch: 12 }
        );
    }

    #[test]
    fn parses_v_prefixed_version() {
        assert_eq!(
            Version::parse("v2.3.12").unwrap(),
            Version { major: 2, minor: 3, patch: 12 }
        );
    }

    #[test]
    fn rejects_non_numeric_component() {
        assert!(Version::parse("2.x.1").is_err());
    }

    #[test]
    fn rejects_missing_component() {
        assert!(Version::parse("2.3").is_err());
    }

    #[test]
    fn local_parse_failure_recovers_to_zero() {
        assert_eq!(Version::parse_local_or_zero("not-a-version"), Version::zero());
        assert_eq!(Version::parse_local_or_zero(""), Version::zero());
    }

    #[test]
    fn ordering_is_lexicographic_not_textual() {
        // "1.10" > "1.9" lexically as text, but is_newer_than must compare numerically.
        let a = Version { major: 1, minor: 10, patch: 0 };
        let b = Version { major: 1, minor: 9, patch: 0 };
        assert!(a.is_newer_than(&b));
        assert!(!b.is_newer_than(&a));
    }

    #[test]
    fn is_newer_than_is_irreflexive_and_antisymmetric() {
        let a = Version { major: 1, minor: 2, patch: 3 };
        let b = Version { major: 1, minor: 2, patch: 4 };
        assert!(!a.is_newer_than(&a));
        assert!(b.is_newer_than(&a));
        assert!(!a.is_newer_than(&b));
    }

    #[test]
    fn zero_is_less_than_any_parsed_version() {
        let parsed = Version::parse("0.0.1").unwrap();
        assert!(parsed.is_newer_than(&Version::zero()));
    }

    #[test]
    fn command_kind_round_trips_known_values() {
        for (raw, kind) in [
            ("start", CommandKind::Start),
            ("stop", CommandKind::Stop),
            ("GET-CONFIG", CommandKind::GetConfig),
            ("PUT-CONFIG", CommandKind::PutConfig),
        ] {
            assert_eq!(CommandKind::from(raw), kind);
            assert_eq!(kind.to_string(), raw);
        }
    }

    #[test]
    fn command_kind_preserves_unrecognized_values() {
        assert_eq!(CommandKind::from("reboot"), CommandKind::Unknown("reboot".into()));
    }

    #[test]
    fn md5_shape_validation() {
        let mut descriptor = UpdateDescriptor {
            major: 1,
            minor: 0,
            patch: 0,
            product: "agent".into(),
            md5: "d41d8cd98f00b204e9800998ecf8427e".into(),
            url: "/updates/agent".into(),
        };
        assert!(descriptor.has_valid_md5_shape());
        descriptor.md5 = "D41D8CD98F00B204E9800998ECF8427E".into();
        assert!(!descriptor.has_valid_md5_shape());
        descriptor.md5 = "tooshort".into();
        assert!(!descriptor.has_valid_md5_shape());
    }
}
