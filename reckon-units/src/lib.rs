//! Reckon Units - unit catalog and registry
//!
//! Holds the user-editable catalog (units, constants, equations) and the
//! abbreviation-sorted registry the equation engine resolves unit suffixes
//! against. Conversion factors are relative to the coarsest unit of each
//! category: the finest unit has the largest factor.

mod catalog;
mod registry;
mod unit;

pub use catalog::{Catalog, CatalogEntry, CatalogSection};
pub use registry::UnitRegistry;
pub use unit::{RegistryError, Unit};

/// Characters with an operator, base-prefix or function meaning inside
/// equations. Unit abbreviations may not collide with any of them.
pub const RESERVED_KEYS: &str = "n(o)x+g-r*i/s%u^S&O|T#L!l\\d";
