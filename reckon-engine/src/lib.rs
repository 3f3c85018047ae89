//! Reckon Engine - unit-aware equation evaluation
//!
//! Evaluates equations strictly left to right, with no operator
//! precedence: `2+3*4` is 20. Operands may carry units, a numeric base
//! (binary, octal, hex, degrees, radians) or character encodings
//! (dotted decimal, ASCII, Unicode). Units of one category convert to
//! the finest unit in the equation before reduction; units of different
//! categories survive as compound terms (`10 ft / 2 sec`).
//!
//! The surface is [`Engine`]:
//! - `calculate` parses and reduces an equation
//! - `result` renders the answer, optionally converted through a
//!   [`ResultFormat`] list
//! - `show_work` reports each reduction step
//!
//! Every error is a [`CalcError`] and renders as a short `?? …` code.

mod engine;
mod error;
mod function;
mod operand;
mod parse;
mod reduce;
mod result;

pub use engine::{Engine, DEFAULT_PRECISION, MAX_PRECISION};
pub use error::CalcError;
pub use operand::{Base, Func, Op, Operand, UnitTag};
pub use result::ResultFormat;

pub use reckon_units::{
    Catalog, CatalogEntry, CatalogSection, RegistryError, Unit, UnitRegistry, RESERVED_KEYS,
};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{Base, CalcError, Catalog, Engine, ResultFormat};
}
