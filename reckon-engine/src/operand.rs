//! The operand model: values, bases, operators, functions and unit tags

use reckon_units::Unit;
use serde::{Deserialize, Serialize};

/// Operator linking an operand (or group) to everything reduced before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Op {
    /// First operand of a group; nothing to link to
    #[default]
    None,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    And,
    Or,
    Xor,
}

impl Op {
    pub(crate) fn from_char(c: char) -> Option<Op> {
        Some(match c {
            '+' => Op::Add,
            '-' => Op::Sub,
            '*' => Op::Mul,
            '/' => Op::Div,
            '%' => Op::Mod,
            '^' => Op::Pow,
            '&' => Op::And,
            '|' => Op::Or,
            '#' => Op::Xor,
            _ => return None,
        })
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Op::None => "",
            Op::Add => "+",
            Op::Sub => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Mod => "%",
            Op::Pow => "^",
            Op::And => "&",
            Op::Or => "|",
            Op::Xor => "#",
        }
    }

    pub(crate) fn symbol_char(self) -> char {
        self.symbol().chars().next().unwrap_or(' ')
    }

    pub fn is_addsub(self) -> bool {
        matches!(self, Op::Add | Op::Sub)
    }

    pub fn is_logic(self) -> bool {
        matches!(self, Op::And | Op::Or | Op::Xor)
    }

    /// `{+,-}` and `{&,|,#}` members may replace each other without an
    /// operand in between; everything else is an inconsistent pair.
    pub(crate) fn same_family(self, other: Op) -> bool {
        (self.is_addsub() && other.is_addsub()) || (self.is_logic() && other.is_logic())
    }
}

/// Numeric base (or character encoding) an operand was written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Base {
    Binary,
    Octal,
    #[default]
    Decimal,
    Hex,
    Degrees,
    Radians,
    Dotted,
    Ascii,
    Unicode,
}

impl Base {
    pub(crate) fn from_prefix(c: char) -> Option<Base> {
        Some(match c {
            'n' => Base::Binary,
            'o' => Base::Octal,
            'm' => Base::Decimal,
            'x' => Base::Hex,
            'g' => Base::Degrees,
            'r' => Base::Radians,
            'i' => Base::Dotted,
            _ => return None,
        })
    }

    /// Sigil rendered in front of results of this base.
    pub(crate) fn sigil(self) -> Option<char> {
        match self {
            Base::Binary => Some('n'),
            Base::Octal => Some('o'),
            Base::Hex => Some('x'),
            Base::Radians => Some('r'),
            Base::Dotted => Some('i'),
            _ => None,
        }
    }

    /// Characters that may continue a number of this base.
    pub(crate) fn digits(self) -> &'static str {
        match self {
            Base::Binary => "01",
            Base::Octal => "01234567",
            Base::Hex => "0123456789abcdefABCDEF",
            Base::Dotted => "0123456789.",
            _ => "0123456789.-",
        }
    }

    /// Maximum number of digits a literal of this base may carry.
    pub(crate) fn max_digits(self) -> usize {
        match self {
            Base::Binary => 32,
            Base::Octal => 10,
            Base::Hex => 8,
            Base::Dotted => 15,
            _ => 23,
        }
    }

    pub(crate) fn radix(self) -> Option<u32> {
        match self {
            Base::Binary => Some(2),
            Base::Octal => Some(8),
            Base::Hex => Some(16),
            _ => None,
        }
    }

    /// Character equations bypass reduction entirely.
    pub fn is_text(self) -> bool {
        matches!(self, Base::Dotted | Base::Ascii | Base::Unicode)
    }

    /// Bases a trigonometric argument may be written in.
    pub(crate) fn trig_ok(self) -> bool {
        matches!(self, Base::Decimal | Base::Degrees | Base::Radians)
    }

    pub(crate) fn label(self) -> &'static str {
        match self {
            Base::Binary => "Binary",
            Base::Octal => "Octal",
            Base::Decimal => "Decimal",
            Base::Hex => "Hexadecimal",
            Base::Degrees => "Degrees",
            Base::Radians => "Radians",
            Base::Dotted => "Dotted decimal",
            Base::Ascii => "ASCII",
            Base::Unicode => "Unicode",
        }
    }
}

/// Single-letter functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Sine,
    Cosine,
    Tangent,
    Log,
    Ln,
    Sqrt,
    Not,
}

impl Func {
    pub(crate) fn from_char(c: char) -> Option<Func> {
        Some(match c {
            'S' => Func::Sine,
            'O' => Func::Cosine,
            'T' => Func::Tangent,
            'L' => Func::Log,
            'l' => Func::Ln,
            '\\' => Func::Sqrt,
            '!' => Func::Not,
            _ => return None,
        })
    }

    pub(crate) fn code(self) -> char {
        match self {
            Func::Sine => 'S',
            Func::Cosine => 'O',
            Func::Tangent => 'T',
            Func::Log => 'L',
            Func::Ln => 'l',
            Func::Sqrt => '\\',
            Func::Not => '!',
        }
    }
}

/// The unit attached to an operand, denormalized from the registry so the
/// reducer never needs a lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitTag {
    pub abbrev: String,
    pub factor: f64,
    pub category: usize,
    pub index: usize,
    pub power: i32,
}

impl UnitTag {
    pub fn from_unit(unit: &Unit) -> Self {
        UnitTag {
            abbrev: unit.abbrev.clone(),
            factor: unit.factor,
            category: unit.category,
            index: unit.index,
            power: 1,
        }
    }
}

/// One reduced (or parsed) term.
///
/// A placeholder carries a unit dropped off another operand during
/// compound-unit arithmetic; its value stays 1 and it never counts as a
/// real term.
#[derive(Debug, Clone, PartialEq)]
pub struct Operand {
    pub value: f64,
    /// Retained source text of character equations (quotes, dotted decimal)
    pub text: Option<String>,
    pub base: Base,
    pub unit: Option<UnitTag>,
    pub op: Op,
    pub placeholder: bool,
}

impl Default for Operand {
    fn default() -> Self {
        Operand {
            value: 1.0,
            text: None,
            base: Base::Decimal,
            unit: None,
            op: Op::None,
            placeholder: false,
        }
    }
}

impl Operand {
    /// Category index, -1 when unitless. The sentinel keeps the category
    /// comparisons of the reducer readable.
    pub(crate) fn category(&self) -> i32 {
        self.unit.as_ref().map_or(-1, |u| u.category as i32)
    }

    pub(crate) fn unit_index(&self) -> i32 {
        self.unit.as_ref().map_or(-1, |u| u.index as i32)
    }

    pub(crate) fn power(&self) -> i32 {
        self.unit.as_ref().map_or(1, |u| u.power)
    }

    pub(crate) fn set_power(&mut self, power: i32) {
        if let Some(u) = self.unit.as_mut() {
            u.power = power;
        }
    }

    pub(crate) fn abbrev(&self) -> &str {
        self.unit.as_ref().map_or("", |u| u.abbrev.as_str())
    }

    pub(crate) fn factor(&self) -> f64 {
        self.unit.as_ref().map_or(0.0, |u| u.factor)
    }
}

/// Render a value the way results print whole numbers: no trailing ".0".
pub(crate) fn num_text(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_num_text() {
        assert_eq!(num_text(20.0), "20");
        assert_eq!(num_text(-1.0), "-1");
        assert_eq!(num_text(2.5), "2.5");
    }

    #[test]
    fn test_operator_families() {
        assert!(Op::Add.same_family(Op::Sub));
        assert!(Op::And.same_family(Op::Xor));
        assert!(!Op::Add.same_family(Op::Mul));
        assert!(!Op::Div.same_family(Op::Div));
    }

    #[test]
    fn test_default_operand_is_unitless_one() {
        let o = Operand::default();
        assert_eq!(o.value, 1.0);
        assert_eq!(o.category(), -1);
        assert_eq!(o.power(), 1);
        assert_eq!(o.abbrev(), "");
    }

    #[test]
    fn test_base_tables() {
        assert_eq!(Base::Binary.max_digits(), 32);
        assert_eq!(Base::Hex.max_digits(), 8);
        assert!(Base::Degrees.trig_ok());
        assert!(!Base::Hex.trig_ok());
        assert!(Base::Ascii.is_text());
    }
}
