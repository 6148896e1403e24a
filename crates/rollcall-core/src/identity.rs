//! Student identity: a name plus a register number.
//!
//! The pair is serialised as `name_regnum`, which is also the file stem used
//! for images in the registry directory. Register numbers never contain `_`,
//! so a key is split on its last underscore and names are free to use one.

use serde::Serialize;
use std::fmt;
use std::path::Path;
use thiserror::Error;

const KEY_SEPARATOR: char = '_';
/// Characters that would let a key escape the registry directory.
const PATH_CHARACTERS: [char; 3] = ['/', '\\', '\0'];

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("name is empty")]
    EmptyName,
    #[error("register number is empty")]
    EmptyRegisterNumber,
    #[error("register number {0:?} contains '_'")]
    SeparatorInRegisterNumber(String),
    #[error("{0:?} contains a path separator or NUL")]
    PathCharacter(String),
    #[error("{0:?} is not of the form name_regnum")]
    MalformedKey(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Identity {
    name: String,
    register_number: String,
}

impl Identity {
    /// Build an identity from its two fields, trimming surrounding whitespace.
    pub fn new(name: &str, register_number: &str) -> Result<Self, IdentityError> {
        let name = name.trim();
        let register_number = register_number.trim();

        if name.is_empty() {
            return Err(IdentityError::EmptyName);
        }
        if register_number.is_empty() {
            return Err(IdentityError::EmptyRegisterNumber);
        }
        for field in [name, register_number] {
            if field.contains(PATH_CHARACTERS) {
                return Err(IdentityError::PathCharacter(field.to_string()));
            }
        }
        if register_number.contains(KEY_SEPARATOR) {
            return Err(IdentityError::SeparatorInRegisterNumber(
                register_number.to_string(),
            ));
        }

        Ok(Self {
            name: name.to_string(),
            register_number: register_number.to_string(),
        })
    }

    /// Parse a `name_regnum` key.
    pub fn from_key(key: &str) -> Result<Self, IdentityError> {
        let (name, register_number) = key
            .rsplit_once(KEY_SEPARATOR)
            .ok_or_else(|| IdentityError::MalformedKey(key.to_string()))?;
        Self::new(name, register_number).map_err(|_| IdentityError::MalformedKey(key.to_string()))
    }

    /// Derive an identity from an image path named `name_regnum.ext`.
    pub fn from_path(path: &Path) -> Result<Self, IdentityError> {
        let stem = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| IdentityError::MalformedKey(path.display().to_string()))?;
        Self::from_key(stem)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn register_number(&self) -> &str {
        &self.register_number
    }

    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{KEY_SEPARATOR}{}", self.name, self.register_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_roundtrip() {
        let id = Identity::new("Alice", "101").unwrap();
        assert_eq!(id.key(), "Alice_101");
        assert_eq!(Identity::from_key("Alice_101").unwrap(), id);
    }

    #[test]
    fn test_name_with_underscore_splits_on_last() {
        let id = Identity::from_key("Mary_Jane_204").unwrap();
        assert_eq!(id.name(), "Mary_Jane");
        assert_eq!(id.register_number(), "204");
    }

    #[test]
    fn test_fields_are_trimmed() {
        let id = Identity::new("  Bob ", " 102\t").unwrap();
        assert_eq!(id.key(), "Bob_102");
    }

    #[test]
    fn test_rejects_missing_parts() {
        assert_eq!(Identity::new("", "1"), Err(IdentityError::EmptyName));
        assert_eq!(Identity::new("A", " "), Err(IdentityError::EmptyRegisterNumber));
        assert!(matches!(
            Identity::from_key("nounderscore"),
            Err(IdentityError::MalformedKey(_))
        ));
        assert!(matches!(
            Identity::from_key("trailing_"),
            Err(IdentityError::MalformedKey(_))
        ));
    }

    #[test]
    fn test_rejects_separator_in_register_number() {
        assert!(matches!(
            Identity::new("Alice", "10_1"),
            Err(IdentityError::SeparatorInRegisterNumber(_))
        ));
    }

    #[test]
    fn test_from_path_uses_stem() {
        let id = Identity::from_path(Path::new("/faces/Carol_303.JPG")).unwrap();
        assert_eq!(id.name(), "Carol");
        assert_eq!(id.register_number(), "303");
    }

    #[test]
    fn test_rejects_path_characters() {
        for (name, reg) in [("../escaped", "101"), ("A/B", "1"), ("C\\D", "2"), ("Eve", "3\0")] {
            assert!(
                matches!(Identity::new(name, reg), Err(IdentityError::PathCharacter(_))),
                "{name:?} {reg:?} accepted"
            );
        }
        // Dots alone are harmless once the register number is appended.
        assert_eq!(Identity::new("..", "101").unwrap().key(), ".._101");
    }
}
