//! Result formatting
//!
//! A reduced stack renders through a list of [`ResultFormat`] entries:
//! one base entry naming the output base, then one unit entry per
//! category present in the equation. Callers may pass their own list to
//! convert the answer to different units or another base.

use serde::{Deserialize, Serialize};

use reckon_units::Unit;

use crate::error::CalcError;
use crate::operand::{Base, Op, Operand};

/// One slot of the answer format: either the output base or the target
/// unit for one category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultFormat {
    /// True for the single base entry leading the list
    pub base_entry: bool,
    /// Base label or unit abbreviation
    pub label: String,
    pub factor: f64,
    pub base: Base,
    /// Category index, -1 on the base entry
    pub category: i32,
    pub unit_index: i32,
}

impl ResultFormat {
    pub fn for_base(base: Base) -> Self {
        ResultFormat {
            base_entry: true,
            label: base.label().to_string(),
            factor: 0.0,
            base,
            category: -1,
            unit_index: 0,
        }
    }

    pub fn for_unit(unit: &Unit) -> Self {
        ResultFormat {
            base_entry: false,
            label: unit.abbrev.clone(),
            factor: unit.factor,
            base: Base::Decimal,
            category: unit.category as i32,
            unit_index: unit.index as i32,
        }
    }
}

/// Derive the default format list from a reduced stack: the first
/// operand's base, then the first operand of each category in catalog
/// order.
pub(crate) fn result_units(stack: &[Operand], categories: usize) -> Vec<ResultFormat> {
    let base = stack.first().map_or(Base::Decimal, |o| o.base);
    let mut formats = vec![ResultFormat::for_base(base)];
    for category in 0..categories as i32 {
        if let Some(o) = stack.iter().find(|o| o.category() == category) {
            let u = o.unit.as_ref().unwrap();
            formats.push(ResultFormat {
                base_entry: false,
                label: u.abbrev.clone(),
                factor: u.factor,
                base: Base::Decimal,
                category,
                unit_index: u.index as i32,
            });
        }
    }
    formats
}

/// Render a reduced stack through a format list. The stack is consumed
/// by conversion, so callers hand in a clone when they want to render
/// more than once.
pub(crate) fn render(
    stack: &mut [Operand],
    format: &[ResultFormat],
    precision: usize,
    scientific: bool,
) -> Result<String, CalcError> {
    if stack.is_empty() {
        return Err(CalcError::Empty);
    }

    let mut res_base = Base::Decimal;
    let mut div_op = 1.0;
    for entry in format {
        if entry.base_entry {
            res_base = entry.base;
            continue;
        }
        for i in 0..stack.len() {
            if stack[i].category() != entry.category || stack[i].unit_index() == entry.unit_index {
                continue;
            }
            let power = stack[i].power();
            let (c1, c2) = if power > 1 {
                (entry.factor.powi(power), stack[i].factor().powi(power))
            } else {
                (entry.factor, stack[i].factor())
            };
            let d = stack[i].value * c1 / c2;
            if stack[i].op == Op::Div {
                div_op = d;
            }
            if stack[i].placeholder {
                // the converted scale lands on the owning real operand
                let Some(j) = (0..i).rev().find(|&j| !stack[j].placeholder) else {
                    return Err(CalcError::Internal);
                };
                stack[j].value *= d;
                if stack[j].op == Op::Div {
                    div_op *= d;
                }
            } else {
                stack[i].value = d;
            }
            if let Some(u) = stack[i].unit.as_mut() {
                u.abbrev = entry.label.clone();
                u.factor = entry.factor;
                u.index = entry.unit_index as usize;
            }
        }
    }
    if div_op != 1.0 {
        for o in stack.iter_mut() {
            if !o.placeholder {
                o.value /= div_op;
            }
        }
    }

    let mut answer = String::new();
    let mut deg2rad = false;
    let mut rad2deg = false;
    for (idx, o) in stack.iter().enumerate() {
        let unit_val = if o.unit.is_some() {
            if o.power() > 1 {
                format!("{}^{}", o.abbrev(), o.power())
            } else {
                o.abbrev().to_string()
            }
        } else {
            String::new()
        };
        match res_base {
            Base::Binary | Base::Octal | Base::Hex => {
                if idx == 0 {
                    answer.push(res_base.sigil().unwrap_or('?'));
                } else {
                    if !o.placeholder {
                        answer.push(' ');
                    }
                    answer.push_str(o.op.symbol());
                }
                if o.placeholder {
                    answer.push_str(&unit_val);
                } else {
                    let l = o.value as i64;
                    let digits = match res_base {
                        Base::Binary => format!("{l:b}"),
                        Base::Octal => format!("{l:o}"),
                        _ => format!("{l:x}"),
                    };
                    answer.push_str(&format!(" {digits} {unit_val}"));
                }
            }
            Base::Degrees | Base::Radians => {
                if idx == 0 {
                    if res_base == Base::Degrees {
                        answer.push('g');
                        rad2deg = matches!(o.base, Base::Radians | Base::Decimal);
                    } else {
                        answer.push('r');
                        deg2rad = o.base == Base::Degrees;
                    }
                } else {
                    if !o.placeholder {
                        answer.push(' ');
                    }
                    answer.push_str(o.op.symbol());
                }
                let d = if deg2rad {
                    o.value.to_radians()
                } else if rad2deg {
                    o.value.to_degrees()
                } else {
                    o.value
                };
                if o.placeholder {
                    answer.push_str(&unit_val);
                } else {
                    let dec_val = decimal_text(d, precision, scientific);
                    answer.push_str(&format!(" {dec_val} {unit_val}"));
                }
            }
            Base::Dotted => {
                if o.base == Base::Dotted && o.text.is_some() {
                    answer.push(' ');
                    answer.push_str(o.text.as_deref().unwrap_or(""));
                } else {
                    answer.push(' ');
                    answer.push_str(&dotted_text(o.value as i64));
                }
            }
            Base::Ascii => {
                if o.base == Base::Ascii && o.text.is_some() {
                    answer.push(' ');
                    answer.push_str(o.text.as_deref().unwrap_or(""));
                } else {
                    answer.push_str(&ascii_text(o.value as i64));
                }
            }
            Base::Unicode => {
                if o.base == Base::Unicode && o.text.is_some() {
                    answer.push(' ');
                    answer.push_str(o.text.as_deref().unwrap_or(""));
                } else {
                    answer.push_str(&unicode_text(o.value as i64));
                }
            }
            _ => {
                if idx > 0 {
                    if !o.placeholder {
                        answer.push(' ');
                    }
                    answer.push_str(o.op.symbol());
                }
                if o.placeholder {
                    answer.push_str(&unit_val);
                } else {
                    let dec_val = decimal_text(o.value, precision, scientific);
                    answer.push_str(&format!(" {dec_val} {unit_val}"));
                }
            }
        }
    }
    Ok(answer.trim().to_string())
}

/// Decimal rendering: precision 0 truncates to an integer, otherwise at
/// least one and at most `precision` decimals, trailing zeros trimmed.
fn decimal_text(v: f64, precision: usize, scientific: bool) -> String {
    if precision == 0 {
        return (v as i64).to_string();
    }
    if scientific {
        let s = format!("{:.*E}", precision - 1, v);
        let Some(e) = s.find('E') else { return s };
        let (mantissa, exponent) = s.split_at(e);
        let mut mantissa = mantissa.to_string();
        if mantissa.contains('.') {
            while mantissa.ends_with('0') {
                mantissa.pop();
            }
            if mantissa.ends_with('.') {
                mantissa.pop();
            }
        }
        return format!("{mantissa}{exponent}");
    }
    let mut s = format!("{v:.precision$}");
    if let Some(dot) = s.find('.') {
        let keep = dot + 2;
        while s.len() > keep && s.ends_with('0') {
            s.pop();
        }
    }
    s
}

fn dotted_text(l: i64) -> String {
    let mut l = l;
    let mut groups = [0i64; 4];
    for g in groups.iter_mut() {
        *g = l & 0xff;
        l >>= 8;
    }
    groups.reverse();
    groups.map(|g| g.to_string()).join(".")
}

/// Big-endian bytes as ASCII, zero bytes skipped.
fn ascii_text(l: i64) -> String {
    let mut l = l;
    let mut out = String::new();
    for _ in 0..4 {
        let b = (l & 0xff) as u8;
        if b != 0 {
            out.insert(0, b as char);
        }
        l >>= 8;
    }
    out
}

/// Big-endian 16-bit units as UTF-16 characters, zero units skipped.
fn unicode_text(l: i64) -> String {
    let mut l = l;
    let mut out = String::new();
    for _ in 0..2 {
        let u = (l & 0xffff) as u16;
        if u != 0 {
            let c = char::from_u32(u as u32).unwrap_or(char::REPLACEMENT_CHARACTER);
            out.insert(0, c);
        }
        l >>= 16;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::UnitTag;

    fn united(value: f64, abbrev: &str, factor: f64, category: usize, index: usize) -> Operand {
        Operand {
            value,
            unit: Some(UnitTag {
                abbrev: abbrev.into(),
                factor,
                category,
                index,
                power: 1,
            }),
            ..Operand::default()
        }
    }

    #[test]
    fn test_default_formats_lead_with_base() {
        let stack = vec![united(26403.0, "ft", 5280.0, 0, 4)];
        let formats = result_units(&stack, 4);
        assert_eq!(formats.len(), 2);
        assert!(formats[0].base_entry);
        assert_eq!(formats[0].label, "Decimal");
        assert_eq!(formats[1].label, "ft");
        assert_eq!(formats[1].category, 0);
    }

    #[test]
    fn test_render_plain_unit() {
        let mut stack = vec![united(26403.0, "ft", 5280.0, 0, 4)];
        let formats = result_units(&stack, 4);
        let s = render(&mut stack, &formats, 0, false).unwrap();
        assert_eq!(s, "26403 ft");
    }

    #[test]
    fn test_render_converts_to_requested_unit() {
        let mut stack = vec![united(26403.0, "ft", 5280.0, 0, 4)];
        let formats = vec![
            ResultFormat::for_base(Base::Decimal),
            ResultFormat {
                base_entry: false,
                label: "mi".into(),
                factor: 1.0,
                base: Base::Decimal,
                category: 0,
                unit_index: 0,
            },
        ];
        let s = render(&mut stack, &formats, 3, false).unwrap();
        assert_eq!(s, "5.001 mi");
    }

    #[test]
    fn test_render_denominator_conversion_rescales() {
        // 5 ft / 1 sec rendered per minute
        let mut den = united(1.0, "sec", 86400.0, 1, 3);
        den.op = Op::Div;
        let mut stack = vec![united(5.0, "ft", 5280.0, 0, 4), den];
        let formats = vec![
            ResultFormat::for_base(Base::Decimal),
            ResultFormat {
                base_entry: false,
                label: "ft".into(),
                factor: 5280.0,
                base: Base::Decimal,
                category: 0,
                unit_index: 4,
            },
            ResultFormat {
                base_entry: false,
                label: "min".into(),
                factor: 1440.0,
                base: Base::Decimal,
                category: 1,
                unit_index: 2,
            },
        ];
        let s = render(&mut stack, &formats, 0, false).unwrap();
        assert_eq!(s, "300 ft / 1 min");
    }

    #[test]
    fn test_render_binary() {
        let mut stack = vec![Operand {
            value: 15.0,
            base: Base::Binary,
            ..Operand::default()
        }];
        let formats = result_units(&stack, 4);
        let s = render(&mut stack, &formats, 0, false).unwrap();
        assert_eq!(s, "n 1111");
    }

    #[test]
    fn test_render_placeholder_glues_to_operand() {
        let mut tail = united(1.0, "sec", 86400.0, 1, 3);
        tail.op = Op::Mul;
        tail.placeholder = true;
        let mut stack = vec![united(10.0, "ft", 5280.0, 0, 4), tail];
        let formats = result_units(&stack, 4);
        let s = render(&mut stack, &formats, 0, false).unwrap();
        assert_eq!(s, "10 ft*sec");
    }

    #[test]
    fn test_decimal_text() {
        assert_eq!(decimal_text(2.5, 3, false), "2.5");
        assert_eq!(decimal_text(2.0, 3, false), "2.0");
        assert_eq!(decimal_text(2.5, 0, false), "2");
        assert_eq!(decimal_text(1.0 / 3.0, 4, false), "0.3333");
        assert_eq!(decimal_text(25000.0, 3, true), "2.5E4");
    }

    #[test]
    fn test_character_bases() {
        assert_eq!(dotted_text(3232235777), "192.168.1.1");
        assert_eq!(ascii_text(0x41424344), "ABCD");
        assert_eq!(ascii_text(0x4100), "A");
        assert_eq!(unicode_text(0x00480069), "Hi");
    }

    #[test]
    fn test_format_serde_round_trip() {
        let f = ResultFormat::for_base(Base::Binary);
        let text = serde_json::to_string(&f).unwrap();
        let back: ResultFormat = serde_json::from_str(&text).unwrap();
        assert_eq!(back, f);
    }

    #[test]
    fn test_render_empty_stack_is_null() {
        assert_eq!(
            render(&mut [], &[], 0, false).unwrap_err(),
            CalcError::Empty
        );
    }
}
