//! Abbreviation-sorted unit registry built from catalog data

use crate::{Catalog, RegistryError, Unit};

/// All registered units, sorted by abbreviation for binary-search lookup.
///
/// Rebuilt wholesale whenever the catalog changes; the engine never
/// mutates individual entries.
#[derive(Debug, Clone, Default)]
pub struct UnitRegistry {
    units: Vec<Unit>,
    categories: Vec<String>,
}

impl UnitRegistry {
    /// Build a registry from the catalog's unit sections.
    pub fn from_catalog(catalog: &Catalog) -> Result<Self, RegistryError> {
        let mut units = Vec::new();
        let mut categories = Vec::with_capacity(catalog.units.len());
        for (ci, section) in catalog.units.iter().enumerate() {
            categories.push(section.category.clone());
            for (ui, entry) in section.entries.iter().enumerate() {
                units.push(Unit::parse(&entry.display, &entry.value, ci, ui)?);
            }
        }
        units.sort_by(|a, b| a.abbrev.cmp(&b.abbrev));
        for pair in units.windows(2) {
            if pair[0].abbrev == pair[1].abbrev {
                return Err(RegistryError::DuplicateAbbrev(pair[0].abbrev.clone()));
            }
        }
        Ok(UnitRegistry { units, categories })
    }

    /// Exact-abbreviation lookup.
    pub fn lookup(&self, abbrev: &str) -> Option<&Unit> {
        self.units
            .binary_search_by(|u| u.abbrev.as_str().cmp(abbrev))
            .ok()
            .map(|i| &self.units[i])
    }

    /// Look up a unit by its (category, section index) coordinates.
    pub fn by_position(&self, category: usize, index: usize) -> Option<&Unit> {
        self.units
            .iter()
            .find(|u| u.category == category && u.index == index)
    }

    pub fn category_name(&self, category: usize) -> Option<&str> {
        self.categories.get(category).map(|c| c.as_str())
    }

    pub fn category_count(&self) -> usize {
        self.categories.len()
    }

    pub fn units(&self) -> &[Unit] {
        &self.units
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> UnitRegistry {
        UnitRegistry::from_catalog(&Catalog::builtin()).unwrap()
    }

    #[test]
    fn test_lookup_by_abbrev() {
        let reg = registry();
        let ft = reg.lookup("ft").unwrap();
        assert_eq!(ft.name, "Foot");
        assert_eq!(ft.factor, 5280.0);
        assert_eq!(reg.category_name(ft.category), Some("Length"));
        assert!(reg.lookup("furlong").is_none());
    }

    #[test]
    fn test_positions_follow_catalog_order() {
        let reg = registry();
        let mi = reg.lookup("mi").unwrap();
        let km = reg.lookup("km").unwrap();
        assert_eq!((mi.category, mi.index), (0, 0));
        assert_eq!((km.category, km.index), (0, 1));
        assert_eq!(reg.by_position(0, 4).unwrap().abbrev, "ft");
    }

    #[test]
    fn test_duplicate_abbrev_rejected() {
        let mut cat = Catalog::builtin();
        cat.units[1]
            .entries
            .push(crate::CatalogEntry::new("Micron (cm)", "1609344000"));
        assert_eq!(
            UnitRegistry::from_catalog(&cat).unwrap_err(),
            RegistryError::DuplicateAbbrev("cm".to_string())
        );
    }

    #[test]
    fn test_sorted_registry() {
        let reg = registry();
        let abbrevs: Vec<&str> = reg.units().iter().map(|u| u.abbrev.as_str()).collect();
        let mut sorted = abbrevs.clone();
        sorted.sort();
        assert_eq!(abbrevs, sorted);
    }
}
