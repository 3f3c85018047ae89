//! Catalog data model: the persisted form of units, constants and equations

use serde::{Deserialize, Serialize};

/// One named entry: a display string and its value text.
///
/// For units the display is `"Name (Abbrev)"` and the value is the
/// conversion factor; for constants and equations the value is spliced
/// verbatim into equations by the editing layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub display: String,
    pub value: String,
}

/// A named category holding an ordered list of entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogSection {
    pub category: String,
    pub entries: Vec<CatalogEntry>,
}

/// The whole user-editable data set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    pub units: Vec<CatalogSection>,
    pub constants: Vec<CatalogSection>,
    pub equations: Vec<CatalogSection>,
}

impl CatalogEntry {
    pub fn new(display: &str, value: &str) -> Self {
        CatalogEntry {
            display: display.to_string(),
            value: value.to_string(),
        }
    }
}

impl CatalogSection {
    pub fn new(category: &str, entries: &[(&str, &str)]) -> Self {
        CatalogSection {
            category: category.to_string(),
            entries: entries
                .iter()
                .map(|(d, v)| CatalogEntry::new(d, v))
                .collect(),
        }
    }
}

impl Catalog {
    /// The default data set shipped with the engine.
    ///
    /// Factors count units per one coarsest unit of the category, so the
    /// finest unit carries the largest factor.
    pub fn builtin() -> Self {
        Catalog {
            units: vec![
                CatalogSection::new(
                    "Length",
                    &[
                        ("Mile (mi)", "1"),
                        ("Kilometer (km)", "1.609344"),
                        ("Meter (mtr)", "1609.344"),
                        ("Yard (yd)", "1760"),
                        ("Foot (ft)", "5280"),
                        ("Inch (in)", "63360"),
                        ("Centimeter (cm)", "160934.4"),
                    ],
                ),
                CatalogSection::new(
                    "Time",
                    &[
                        ("Day (day)", "1"),
                        ("Hour (hr)", "24"),
                        ("Minute (min)", "1440"),
                        ("Second (sec)", "86400"),
                        ("Millisecond (ms)", "86400000"),
                    ],
                ),
                CatalogSection::new(
                    "Mass",
                    &[
                        ("Ton (ton)", "1"),
                        ("Kilogram (kg)", "907.18474"),
                        ("Pound (lb)", "2000"),
                        ("Ounce (oz)", "32000"),
                        ("Gram (gm)", "907184.74"),
                    ],
                ),
                CatalogSection::new(
                    "Data",
                    &[
                        ("Gigabyte (GB)", "1"),
                        ("Megabyte (MB)", "1024"),
                        ("Kilobyte (KB)", "1048576"),
                        ("Byte (B)", "1073741824"),
                        ("Bit (bit)", "8589934592"),
                    ],
                ),
            ],
            constants: vec![CatalogSection::new(
                "Math",
                &[
                    ("Pi (pi)", "3.14159265358979"),
                    ("Euler (eu)", "2.71828182845905"),
                    ("Light speed m/s (cls)", "299792458"),
                ],
            )],
            equations: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_has_unit_sections() {
        let cat = Catalog::builtin();
        let names: Vec<&str> = cat.units.iter().map(|s| s.category.as_str()).collect();
        assert_eq!(names, ["Length", "Time", "Mass", "Data"]);
        assert!(cat.equations.is_empty());
    }

    #[test]
    fn test_json_round_trip() {
        let cat = Catalog::builtin();
        let text = serde_json::to_string(&cat).unwrap();
        let back: Catalog = serde_json::from_str(&text).unwrap();
        assert_eq!(back, cat);
    }
}
