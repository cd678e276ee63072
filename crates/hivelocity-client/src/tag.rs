//! Device tag codec
//!
//! Device ownership is recorded as `"<key>=<value>"` strings in a device's tag
//! list. Keys in the `caphv-` namespace are managed by the controller
//! (ephemeral), except `caphv-permanent-error` and `caphv-use` which belong to
//! operators and survive machine deletion.
//!
//! A key maps to at most one well-formed value in a list; more than one is an
//! error, never resolved by taking the first.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Namespace prefix of all controller tags
pub const TAG_NAMESPACE_PREFIX: &str = "caphv-";

/// Prefix of tags that are interpreted as labels (`caphvlabel:<key>=<value>`)
pub const LABEL_TAG_PREFIX: &str = "caphvlabel:";

/// Value of the use tag that makes a device eligible
pub const USE_ALLOWED_VALUE: &str = "allow";

/// Errors from parsing device tags
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TagError {
    /// Not exactly one `=`
    #[error("invalid format of device tag")]
    InvalidFormat,

    /// Nothing before the `=`
    #[error("device tag has empty key")]
    EmptyKey,

    /// Nothing after the `=`
    #[error("device tag has empty value")]
    EmptyValue,

    /// Key is not one of [`DeviceTagKey::ALL`]
    #[error("invalid device tag key")]
    InvalidKey,

    /// More than one well-formed tag with the key
    #[error("found multiple device tags")]
    MultipleFound,

    /// No well-formed tag with the key
    #[error("no device tag found")]
    NotFound,
}

/// Known tag keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceTagKey {
    /// Name of the machine that claimed the device
    MachineName,
    /// Name of the cluster that claimed the device
    ClusterName,
    /// Device type requested by the machine
    DeviceType,
    /// `control_plane` or `worker`
    MachineType,
    /// Set when the device must be reset by an operator
    PermanentError,
    /// Operator opt-in; only `allow` makes a device eligible
    UseAllowed,
}

impl DeviceTagKey {
    /// Every known key
    pub const ALL: [Self; 6] = [
        Self::MachineName,
        Self::ClusterName,
        Self::DeviceType,
        Self::MachineType,
        Self::PermanentError,
        Self::UseAllowed,
    ];

    /// Key string as written in the tag list
    pub fn as_str(self) -> &'static str {
        match self {
            Self::MachineName => "caphv-machine-name",
            Self::ClusterName => "caphv-cluster-name",
            Self::DeviceType => "caphv-device-type",
            Self::MachineType => "caphv-machine-type",
            Self::PermanentError => "caphv-permanent-error",
            Self::UseAllowed => "caphv-use",
        }
    }

    /// `"<key>="`, the prefix every tag with this key starts with
    pub fn prefix(self) -> String {
        format!("{}=", self.as_str())
    }

    /// True for keys the controller may add and remove freely
    pub fn is_ephemeral(self) -> bool {
        !matches!(self, Self::PermanentError | Self::UseAllowed)
    }

    /// Find the unique well-formed tag with this key
    ///
    /// Malformed entries are skipped.
    ///
    /// # Errors
    ///
    /// `TagError::NotFound` if no entry matches, `TagError::MultipleFound` if
    /// more than one does.
    pub fn find_in(self, tags: &[String]) -> Result<DeviceTag, TagError> {
        let prefix = self.prefix();
        let mut found: Option<DeviceTag> = None;

        for tag in tags.iter().filter(|t| t.starts_with(&prefix)) {
            let Ok(parsed) = tag.parse::<DeviceTag>() else {
                continue;
            };
            if parsed.key != self {
                continue;
            }
            if found.is_some() {
                return Err(TagError::MultipleFound);
            }
            found = Some(parsed);
        }

        found.ok_or(TagError::NotFound)
    }

    /// True if any entry starts with this key's prefix, well-formed or not
    pub fn has_any(self, tags: &[String]) -> bool {
        let prefix = self.prefix();
        tags.iter().any(|t| t.starts_with(&prefix))
    }
}

impl fmt::Display for DeviceTagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceTagKey {
    type Err = TagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|key| key.as_str() == s)
            .ok_or(TagError::InvalidKey)
    }
}

/// A typed key/value tag
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceTag {
    /// Tag key
    pub key: DeviceTagKey,
    /// Non-empty value after the `=`
    pub value: String,
}

impl DeviceTag {
    /// Build a tag from a key and value
    pub fn new(key: DeviceTagKey, value: impl Into<String>) -> Self {
        Self { key, value: value.into() }
    }

    /// True if the exact string form of this tag is in the list
    pub fn is_in_list(&self, tags: &[String]) -> bool {
        let tag = self.to_string();
        tags.iter().any(|t| *t == tag)
    }

    /// Remove every exact occurrence of this tag.
    ///
    /// Returns the new list and whether anything was removed.
    pub fn remove_from_list(&self, tags: &[String]) -> (Vec<String>, bool) {
        let tag = self.to_string();
        let remaining: Vec<String> = tags.iter().filter(|t| **t != tag).cloned().collect();
        let changed = remaining.len() != tags.len();
        (remaining, changed)
    }
}

impl fmt::Display for DeviceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.key, self.value)
    }
}

/// Strict parse of a single tag string
impl FromStr for DeviceTag {
    type Err = TagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('=');
        let (Some(key), Some(value), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(TagError::InvalidFormat);
        };
        if key.is_empty() {
            return Err(TagError::EmptyKey);
        }
        if value.is_empty() {
            return Err(TagError::EmptyValue);
        }
        Ok(Self {
            key: key.parse()?,
            value: value.to_string(),
        })
    }
}

/// True if the tag string belongs to the controller's own namespace and is
/// not one of the operator-owned keys.
pub fn is_ephemeral(tag: &str) -> bool {
    if !tag.starts_with(TAG_NAMESPACE_PREFIX) {
        return false;
    }
    let key = tag.split('=').next().unwrap_or(tag);
    key != DeviceTagKey::PermanentError.as_str() && key != DeviceTagKey::UseAllowed.as_str()
}

/// Drop every ephemeral tag, keeping operator tags and foreign tags.
///
/// Returns the new list and whether anything was removed.
pub fn remove_ephemeral_tags(tags: &[String]) -> (Vec<String>, bool) {
    let remaining: Vec<String> = tags.iter().filter(|t| !is_ephemeral(t)).cloned().collect();
    let changed = remaining.len() != tags.len();
    (remaining, changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(tags: &[&str]) -> Vec<String> {
        tags.iter().map(|t| (*t).to_string()).collect()
    }

    #[test]
    fn test_format_and_parse_round_trip() {
        for key in DeviceTagKey::ALL {
            for value in ["c1", "my-machine", "control_plane", "reload-timeout-1700000000"] {
                let tag = DeviceTag::new(key, value);
                let tags = vec!["unrelated".to_string(), tag.to_string()];
                assert_eq!(key.find_in(&tags), Ok(tag.clone()));
                assert_eq!(tag.to_string().parse::<DeviceTag>(), Ok(tag));
            }
        }
    }

    #[test]
    fn test_strict_parse_errors() {
        assert_eq!("caphv-machine-name".parse::<DeviceTag>(), Err(TagError::InvalidFormat));
        assert_eq!("caphv-machine-name=a=b".parse::<DeviceTag>(), Err(TagError::InvalidFormat));
        assert_eq!("=value".parse::<DeviceTag>(), Err(TagError::EmptyKey));
        assert_eq!("caphv-machine-name=".parse::<DeviceTag>(), Err(TagError::EmptyValue));
        assert_eq!("caphv-unknown=value".parse::<DeviceTag>(), Err(TagError::InvalidKey));
    }

    #[test]
    fn test_find_in_not_found() {
        let tags = list(&["caphv-cluster-name=c1", "other-tag"]);
        assert_eq!(DeviceTagKey::MachineName.find_in(&tags), Err(TagError::NotFound));
        assert_eq!(DeviceTagKey::MachineName.find_in(&[]), Err(TagError::NotFound));
    }

    #[test]
    fn test_find_in_multiple_found() {
        let tags = list(&["caphv-machine-name=m1", "caphv-machine-name=m2"]);
        assert_eq!(DeviceTagKey::MachineName.find_in(&tags), Err(TagError::MultipleFound));

        // Same value twice is still ambiguous
        let tags = list(&["caphv-machine-name=m1", "caphv-machine-name=m1"]);
        assert_eq!(DeviceTagKey::MachineName.find_in(&tags), Err(TagError::MultipleFound));
    }

    #[test]
    fn test_find_in_skips_malformed() {
        let tags = list(&["caphv-machine-name=", "caphv-machine-name=a=b", "caphv-machine-name=m1"]);
        assert_eq!(
            DeviceTagKey::MachineName.find_in(&tags),
            Ok(DeviceTag::new(DeviceTagKey::MachineName, "m1"))
        );
        assert!(DeviceTagKey::MachineName.has_any(&tags));
    }

    #[test]
    fn test_remove_from_list_is_idempotent() {
        let tag = DeviceTag::new(DeviceTagKey::MachineName, "m1");
        let tags = list(&["caphv-cluster-name=c1", "other-tag"]);
        let (remaining, changed) = tag.remove_from_list(&tags);
        assert!(!changed);
        assert_eq!(remaining, tags);
    }

    #[test]
    fn test_remove_from_list_removes_all_occurrences() {
        let tag = DeviceTag::new(DeviceTagKey::MachineName, "m1");
        let tags = list(&["caphv-machine-name=m1", "keep", "caphv-machine-name=m1", "caphv-machine-name=m2"]);
        let (remaining, changed) = tag.remove_from_list(&tags);
        assert!(changed);
        assert_eq!(remaining, list(&["keep", "caphv-machine-name=m2"]));
        assert!(!tag.is_in_list(&remaining));
    }

    #[test]
    fn test_is_ephemeral() {
        assert!(is_ephemeral("caphv-cluster-name=c"));
        assert!(is_ephemeral("caphv-machine-name=m"));
        assert!(is_ephemeral("caphv-device-type=pool"));
        assert!(is_ephemeral("caphv-machine-type=worker"));
        assert!(!is_ephemeral("caphv-permanent-error=x"));
        assert!(!is_ephemeral("caphv-use=allow"));
        assert!(!is_ephemeral("caphvlabel:deviceType=pool"));
        assert!(!is_ephemeral("other-tag"));
    }

    #[test]
    fn test_remove_ephemeral_tags() {
        let tags = list(&[
            "caphv-permanent-error=x",
            "caphv-use=allow",
            "caphv-cluster-name=c",
            "other-tag",
        ]);
        let (remaining, changed) = remove_ephemeral_tags(&tags);
        assert!(changed);
        assert_eq!(remaining, list(&["caphv-permanent-error=x", "caphv-use=allow", "other-tag"]));

        let (again, changed) = remove_ephemeral_tags(&remaining);
        assert!(!changed);
        assert_eq!(again, remaining);
    }
}
