//! Profile names and rules.
//!
//! A profile is an isolated instance of the whole entity store, selected
//! by name. The registry itself (creation, activation, deletion) lives on
//! the store; this module owns the naming rules and the errors.

use thiserror::Error;

/// The profile every store starts with. It cannot be renamed or deleted.
pub const DEFAULT_PROFILE: &str = "default";

/// Maximum profile name length.
pub const MAX_PROFILE_NAME_LEN: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProfileError {
  /// The name is empty, too long, or uses characters outside
  /// `[A-Za-z0-9_\- ]`.
  #[error("Invalid profile name {0:?}")]
  InvalidProfileName(String),

  /// A profile with this name already exists.
  #[error("Profile {0:?} already exists")]
  DuplicateProfile(String),

  /// No profile with this name exists.
  #[error("Profile {0:?} does not exist")]
  UnknownProfile(String),

  /// The default profile cannot be renamed or deleted, and the active
  /// profile cannot be deleted.
  #[error("Profile {0:?} is protected")]
  ProtectedProfile(String),
}

/// Check a candidate profile name against the naming rules.
pub fn validate_profile_name(name: &str) -> Result<(), ProfileError> {
  let ok_len = !name.is_empty() && name.chars().count() <= MAX_PROFILE_NAME_LEN;
  let ok_chars = name
    .chars()
    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | ' '));
  if ok_len && ok_chars {
    Ok(())
  } else {
    Err(ProfileError::InvalidProfileName(name.to_string()))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn accepts_the_documented_charset() {
    validate_profile_name("default").unwrap();
    validate_profile_name("Spring 2026_b-side").unwrap();
    validate_profile_name("A").unwrap();
    validate_profile_name(&"x".repeat(MAX_PROFILE_NAME_LEN)).unwrap();
  }

  #[test]
  fn rejects_empty_long_and_exotic_names() {
    assert!(validate_profile_name("").is_err());
    assert!(validate_profile_name(&"x".repeat(MAX_PROFILE_NAME_LEN + 1)).is_err());
    assert!(validate_profile_name("sea/son").is_err());
    assert!(validate_profile_name("tab\tname").is_err());
    assert!(validate_profile_name("émile").is_err());
  }
}
