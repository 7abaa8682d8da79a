use std::fmt;

use uuid::Uuid;

/// Canonical, lower-cased device identifier (a v4 UUID in hyphenated form).
///
/// Devices generate this once at install time and present it on every
/// analysis request; it is the quota key, so anything that doesn't parse is
/// rejected before it can touch storage.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceId(String);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DeviceIdError {
    #[error("device id is empty")]
    Empty,
    #[error("device id is too long")]
    TooLong,
    #[error("device id is not a valid v4 identifier")]
    Malformed,
}

impl DeviceId {
    pub const MAX_LEN: usize = 50;

    pub fn parse(raw: &str) -> Result<Self, DeviceIdError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(DeviceIdError::Empty);
        }
        if trimmed.len() > Self::MAX_LEN {
            return Err(DeviceIdError::TooLong);
        }
        let uuid = Uuid::try_parse(trimmed).map_err(|_| DeviceIdError::Malformed)?;
        if uuid.get_version_num() != 4 {
            return Err(DeviceIdError::Malformed);
        }
        // Uuid re-renders in canonical hyphenated lower-case, which also
        // normalizes upper-case client renderings.
        Ok(Self(uuid.hyphenated().to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_canonical_lowercase_unchanged() {
        let raw = "3f2c1f4e-9d2a-4b7c-8a1e-0d9f6c5b4a3e";
        let id = DeviceId::parse(raw).unwrap();
        assert_eq!(id.as_str(), raw);
    }

    #[test]
    fn normalizes_uppercase_to_lowercase() {
        let id = DeviceId::parse("3F2C1F4E-9D2A-4B7C-8A1E-0D9F6C5B4A3E").unwrap();
        assert_eq!(id.as_str(), "3f2c1f4e-9d2a-4b7c-8a1e-0d9f6c5b4a3e");
    }

    #[test]
    fn rejects_garbage_and_wrong_versions() {
        assert_eq!(DeviceId::parse("not-a-uuid"), Err(DeviceIdError::Malformed));
        assert_eq!(DeviceId::parse(""), Err(DeviceIdError::Empty));
        assert_eq!(DeviceId::parse("   "), Err(DeviceIdError::Empty));
        // v1 identifier: right shape, wrong version nibble
        assert_eq!(
            DeviceId::parse("8a6e0804-2bd0-11ec-8d3d-0242ac130003"),
            Err(DeviceIdError::Malformed)
        );
        let long = "a".repeat(51);
        assert_eq!(DeviceId::parse(&long), Err(DeviceIdError::TooLong));
    }

    #[test]
    fn fresh_v4_ids_always_pass() {
        let id = Uuid::new_v4().to_string();
        assert!(DeviceId::parse(&id).is_ok());
    }
}
