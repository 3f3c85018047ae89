//! Unit representation with conversion factors

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::RESERVED_KEYS;

/// A single convertible unit inside one category.
///
/// The factor expresses how many of this unit fit in one of the category's
/// coarsest unit, so a larger magnitude means a finer unit. Conversion
/// between two units of a category is `value * target_factor / own_factor`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unit {
    /// Full display name (e.g., "Kilometer")
    pub name: String,
    /// The abbreviation equations use (e.g., "km")
    pub abbrev: String,
    /// Units per one coarsest unit of the category
    pub factor: f64,
    /// Index of the owning category
    pub category: usize,
    /// Position of the unit within its category section
    pub index: usize,
}

/// Failures while building units or the registry from catalog data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Display name has no "(abbrev)" part
    #[error("unit \"{0}\" has no abbreviation")]
    MissingAbbrev(String),
    /// Abbreviation collides with an operator/base/function key
    #[error("abbreviation \"{0}\" is a reserved key")]
    ReservedAbbrev(String),
    /// Abbreviation already registered
    #[error("abbreviation \"{0}\" is already defined")]
    DuplicateAbbrev(String),
    /// Conversion factor is absent or not a number
    #[error("unit \"{0}\" has a malformed factor \"{1}\"")]
    BadFactor(String, String),
    /// Conversion factor of zero cannot be converted through
    #[error("unit \"{0}\" has a zero factor")]
    ZeroFactor(String),
}

impl Unit {
    /// Parse a catalog entry of the form `"Name (Abbrev)"` plus a factor
    /// string into a unit at the given category/section position.
    pub fn parse(
        display: &str,
        value: &str,
        category: usize,
        index: usize,
    ) -> Result<Self, RegistryError> {
        let display = display.trim();
        let open = display
            .rfind('(')
            .ok_or_else(|| RegistryError::MissingAbbrev(display.to_string()))?;
        let close = display
            .rfind(')')
            .filter(|c| *c > open)
            .ok_or_else(|| RegistryError::MissingAbbrev(display.to_string()))?;
        let abbrev = display[open + 1..close].trim();
        if abbrev.is_empty() {
            return Err(RegistryError::MissingAbbrev(display.to_string()));
        }
        if RESERVED_KEYS.contains(abbrev) {
            return Err(RegistryError::ReservedAbbrev(abbrev.to_string()));
        }
        let factor: f64 = value
            .trim()
            .parse()
            .map_err(|_| RegistryError::BadFactor(display.to_string(), value.to_string()))?;
        if factor == 0.0 {
            return Err(RegistryError::ZeroFactor(display.to_string()));
        }
        Ok(Unit {
            name: display[..open].trim().to_string(),
            abbrev: abbrev.to_string(),
            factor,
            category,
            index,
        })
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.abbrev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_display_name() {
        let u = Unit::parse("Kilometer (km)", "1.609344", 0, 1).unwrap();
        assert_eq!(u.name, "Kilometer");
        assert_eq!(u.abbrev, "km");
        assert_eq!(u.factor, 1.609344);
        assert_eq!(u.to_string(), "Kilometer (km)");
    }

    #[test]
    fn test_missing_abbrev_rejected() {
        let err = Unit::parse("Kilometer", "1.609344", 0, 0).unwrap_err();
        assert_eq!(err, RegistryError::MissingAbbrev("Kilometer".to_string()));
    }

    #[test]
    fn test_reserved_key_rejected() {
        // "g" is the degrees sigil, "S" the sine key
        assert!(matches!(
            Unit::parse("Gram (g)", "907184.74", 0, 0),
            Err(RegistryError::ReservedAbbrev(_))
        ));
        assert!(matches!(
            Unit::parse("Siemens (S)", "1", 0, 0),
            Err(RegistryError::ReservedAbbrev(_))
        ));
    }

    #[test]
    fn test_bad_factor_rejected() {
        assert!(matches!(
            Unit::parse("Foot (ft)", "a lot", 0, 0),
            Err(RegistryError::BadFactor(_, _))
        ));
        assert!(matches!(
            Unit::parse("Foot (ft)", "0", 0, 0),
            Err(RegistryError::ZeroFactor(_))
        ));
    }
}
