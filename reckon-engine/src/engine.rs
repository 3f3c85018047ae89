//! The calculation engine
//!
//! [`Engine`] owns the unit catalog, the reduced operand stack of the
//! last calculation and the caller-facing settings (precision,
//! scientific notation). One instance serves any number of sequential
//! calculations; every call to [`Engine::calculate`] starts clean.

use reckon_units::{Catalog, RegistryError, Unit, UnitRegistry};
use tracing::debug;

use crate::error::CalcError;
use crate::operand::{Op, Operand};
use crate::parse::{Group, Node, Parser};
use crate::reduce::{convert_units, display_stack, Reducer};
use crate::result::{render, result_units, ResultFormat};

/// Decimals shown when the caller never set a precision.
pub const DEFAULT_PRECISION: usize = 4;
/// Upper bound on the precision setting.
pub const MAX_PRECISION: usize = 10;

pub struct Engine {
    catalog: Catalog,
    registry: UnitRegistry,
    stack: Vec<Operand>,
    formats: Vec<ResultFormat>,
    work: String,
    error: String,
    precision: usize,
    scientific: bool,
}

impl Engine {
    pub fn new(catalog: Catalog) -> Result<Self, RegistryError> {
        let registry = UnitRegistry::from_catalog(&catalog)?;
        Ok(Engine {
            catalog,
            registry,
            stack: Vec::new(),
            formats: Vec::new(),
            work: String::new(),
            error: String::new(),
            precision: DEFAULT_PRECISION,
            scientific: false,
        })
    }

    /// Replace the whole catalog; the next calculation uses the new
    /// units.
    pub fn set_catalog(&mut self, catalog: Catalog) -> Result<(), RegistryError> {
        self.registry = UnitRegistry::from_catalog(&catalog)?;
        self.catalog = catalog;
        Ok(())
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Number of decimals in rendered results, clamped to
    /// [`MAX_PRECISION`]. Zero truncates to integers.
    pub fn set_precision(&mut self, precision: usize) {
        self.precision = precision.min(MAX_PRECISION);
    }

    pub fn set_scientific(&mut self, scientific: bool) {
        self.scientific = scientific;
    }

    /// Parse and reduce an equation, keeping the reduced stack for
    /// [`Engine::result`]. Returns the number of terms the equation
    /// reduced to. Character equations (quoted text, dotted decimal)
    /// skip reduction and keep their operands in source order.
    pub fn calculate(&mut self, equation: &str) -> Result<usize, CalcError> {
        self.stack.clear();
        self.formats.clear();
        self.work.clear();
        self.error.clear();
        debug!(equation, "calculate");
        match self.evaluate(equation) {
            Ok((stack, work)) => {
                self.work = format!("{equation}\n{work}");
                self.formats = result_units(&stack, self.registry.category_count());
                debug!(stack = %display_stack(&stack), "reduced");
                self.stack = stack;
                Ok(self.stack.len())
            }
            Err(err) => {
                self.error = err.to_string();
                Err(err)
            }
        }
    }

    fn evaluate(&self, equation: &str) -> Result<(Vec<Operand>, String), CalcError> {
        let parsed = Parser::new(equation, &self.registry).parse()?;
        if parsed.char_equation {
            let mut stack = Vec::new();
            flatten(parsed.root, &mut stack);
            return Ok((stack, String::new()));
        }
        let mut root = parsed.root;
        convert_units(&mut root, self.registry.category_count());
        let mut reducer = Reducer::new();
        let mut stack = reducer.reduce_tree(root)?;
        if stack.len() > 1 {
            reducer.reduce_final(&mut stack)?;
        }
        Ok((stack, reducer.work))
    }

    /// Text of the last calculation error, empty after a success.
    pub fn calc_error(&self) -> &str {
        &self.error
    }

    /// The default format list derived from the last calculation: its
    /// base, then one unit per category. Callers edit a copy of this to
    /// request conversions.
    pub fn result_units(&self) -> &[ResultFormat] {
        &self.formats
    }

    /// Render the last result, optionally through a caller-supplied
    /// format list. Conversion happens on a copy, so repeated calls
    /// with different formats all start from the reduced stack.
    pub fn result(&mut self, format: Option<&[ResultFormat]>) -> Result<String, CalcError> {
        let mut stack = self.stack.clone();
        let answer = render(
            &mut stack,
            format.unwrap_or(&self.formats),
            self.precision,
            self.scientific,
        )?;
        self.work.push_str(&answer);
        self.work.push('\n');
        Ok(answer)
    }

    /// The steps taken by the last calculation.
    pub fn show_work(&self) -> &str {
        &self.work
    }

    pub fn unit(&self, abbrev: &str) -> Option<&Unit> {
        self.registry.lookup(abbrev)
    }

    pub fn category_names(&self) -> Vec<&str> {
        (0..self.registry.category_count())
            .filter_map(|i| self.registry.category_name(i))
            .collect()
    }
}

/// Flatten a parse tree in source order for character equations.
fn flatten(group: Group, stack: &mut Vec<Operand>) {
    let op = group.op;
    let mut first = true;
    for child in group.children {
        match child {
            Node::Operand(mut o) => {
                if first && o.op == Op::None {
                    o.op = op;
                }
                stack.push(o);
                first = false;
            }
            Node::Group(g) => {
                flatten(g, stack);
                first = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> Engine {
        Engine::new(Catalog::builtin()).unwrap()
    }

    fn answer(eq: &str) -> String {
        let mut e = engine();
        e.set_precision(0);
        e.calculate(eq).unwrap();
        e.result(None).unwrap()
    }

    #[test]
    fn test_left_to_right_evaluation() {
        assert_eq!(answer("2+3*4"), "20");
        assert_eq!(answer("2 + 3 - 1"), "4");
        assert_eq!(answer("(2+3)*(4+6)"), "50");
        assert_eq!(answer("(2+3)^2*4"), "100");
        assert_eq!(answer("10 % 3"), "1");
    }

    #[test]
    fn test_division_folds_into_running_total() {
        assert_eq!(answer("10/2+3"), "8");
        assert_eq!(answer("10/2*4"), "20");
        let mut e = engine();
        assert_eq!(e.calculate("10/2/2"), Err(CalcError::ChainedDivide));
        assert_eq!(e.calc_error(), "?? (//)");
    }

    #[test]
    fn test_logic_with_one_united_side() {
        assert_eq!(answer("5 ft & 3"), "1 ft");
        assert_eq!(answer("3 & 5 ft"), "1 ft");
        let mut e = engine();
        assert_eq!(
            e.calculate("5 mi & 3 ft"),
            Err(CalcError::LogicUnits("mi".to_string(), '&', "ft".to_string()))
        );
    }

    #[test]
    fn test_unit_conversion_to_finest() {
        assert_eq!(answer("5 mi + 3 ft"), "26403 ft");
        assert_eq!(answer("12 in + 2 ft"), "36 in");
        assert_eq!(answer("1 hr + 30 min"), "90 min");
    }

    #[test]
    fn test_compound_units() {
        assert_eq!(answer("5 ft * 2 sec"), "10 ft*sec");
        assert_eq!(answer("10 ft / 2 sec"), "5 ft / 1 sec");
        assert_eq!(answer("(10 ft * 2 sec) / (2 sec)"), "10 ft");
    }

    #[test]
    fn test_result_converts_through_format() {
        let mut e = engine();
        e.calculate("5 mi + 3 ft").unwrap();
        let mut formats = e.result_units().to_vec();
        assert_eq!(formats[1].label, "ft");
        let mi = e.unit("mi").unwrap();
        formats[1] = ResultFormat::for_unit(mi);
        assert_eq!(e.result(Some(&formats)).unwrap(), "5.0006 mi");
        // rendering works on a copy of the stack
        e.set_precision(0);
        assert_eq!(e.result(None).unwrap(), "26403 ft");
        assert_eq!(e.result(None).unwrap(), "26403 ft");
    }

    #[test]
    fn test_base_rendering() {
        assert_eq!(answer("n1010 | n0101"), "n 1111");
        assert_eq!(answer("x1f + 1"), "x 20");
        assert_eq!(answer("o7 + 1"), "o 10");
    }

    #[test]
    fn test_character_equation_skips_reduction() {
        let mut e = engine();
        assert_eq!(e.calculate("i192.168.1.1").unwrap(), 1);
        assert_eq!(e.result(None).unwrap(), "192.168.1.1");
    }

    #[test]
    fn test_errors_keep_their_text() {
        let mut e = engine();
        assert_eq!(e.calculate("10 // 2"), Err(CalcError::ChainedDivide));
        assert_eq!(e.calc_error(), "?? (//)");
        assert_eq!(
            e.calculate("Tg90"),
            Err(CalcError::TangentSingularity(true))
        );
        assert_eq!(e.calc_error(), "?? 1/0");
        // a new calculation clears the error
        e.calculate("1+1").unwrap();
        assert_eq!(e.calc_error(), "");
    }

    #[test]
    fn test_precision_settings() {
        let mut e = engine();
        e.calculate("10 / 4").unwrap();
        e.set_precision(3);
        assert_eq!(e.result(None).unwrap(), "2.5");
        e.set_precision(0);
        assert_eq!(e.result(None).unwrap(), "2");
        e.set_precision(99);
        e.calculate("1 / 3").unwrap();
        assert_eq!(e.result(None).unwrap(), "0.3333333333");
    }

    #[test]
    fn test_scientific_notation() {
        let mut e = engine();
        e.set_scientific(true);
        e.set_precision(3);
        e.calculate("5000 * 5").unwrap();
        assert_eq!(e.result(None).unwrap(), "2.5E4");
    }

    #[test]
    fn test_show_work_records_steps() {
        let mut e = engine();
        e.calculate("(2+3)*(4+6)").unwrap();
        let _ = e.result(None).unwrap();
        let work = e.show_work();
        assert!(work.starts_with("(2+3)*(4+6)\n"));
        assert!(work.contains("50"));
    }

    #[test]
    fn test_catalog_surface() {
        let e = engine();
        assert_eq!(
            e.category_names(),
            vec!["Length", "Time", "Mass", "Data"]
        );
        let ft = e.unit("ft").unwrap();
        assert_eq!(ft.factor, 5280.0);
        assert!(e.unit("parsec").is_none());
    }

    #[test]
    fn test_custom_catalog() {
        use reckon_units::CatalogSection;

        let mut e = engine();
        let catalog = Catalog {
            units: vec![CatalogSection::new(
                "Currency",
                &[("Dollar (usd)", "1"), ("Cent (ct)", "100")],
            )],
            ..Catalog::default()
        };
        e.set_catalog(catalog).unwrap();
        e.set_precision(0);
        e.calculate("3 usd + 25 ct").unwrap();
        assert_eq!(e.result(None).unwrap(), "325 ct");
        assert!(e.unit("mi").is_none());
    }
}
