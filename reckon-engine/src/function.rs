//! Single-letter function evaluation

use crate::error::CalcError;
use crate::operand::{Base, Func, Operand};

const SINGULARITY_EPS: f64 = 1e-9;

/// Apply a function to one operand in place.
///
/// Degree arguments were already rewritten to radians while parsing, so
/// trigonometry only ever sees radians or plain decimal (taken as
/// radians). Trig and logarithms land in decimal base; `!` and `\` keep
/// the operand's base.
pub(crate) fn apply(f: Func, operand: &mut Operand) -> Result<(), CalcError> {
    if let Some(text) = &operand.text {
        return Err(CalcError::FunctionText(f.code(), text.clone()));
    }
    if operand.unit.is_some() && f != Func::Not {
        return Err(CalcError::FunctionUnit(
            f.code(),
            operand.abbrev().to_string(),
        ));
    }
    let v = operand.value;
    match f {
        Func::Sine | Func::Cosine | Func::Tangent => {
            if !operand.base.trig_ok() {
                let sigil = operand.base.sigil().unwrap_or('?');
                return Err(CalcError::FunctionBase(f.code(), sigil));
            }
            operand.value = match f {
                Func::Sine => v.sin(),
                Func::Cosine => v.cos(),
                Func::Tangent => {
                    let rem = v.rem_euclid(std::f64::consts::PI);
                    if (rem - std::f64::consts::FRAC_PI_2).abs() < SINGULARITY_EPS {
                        return Err(CalcError::TangentSingularity(v.sin() > 0.0));
                    }
                    v.tan()
                }
                _ => unreachable!(),
            };
            operand.base = Base::Decimal;
        }
        Func::Log | Func::Ln => {
            if v <= 0.0 {
                return Err(CalcError::LogDomain(v));
            }
            operand.value = if f == Func::Log { v.log10() } else { v.ln() };
            operand.base = Base::Decimal;
        }
        Func::Sqrt => {
            operand.value = v.sqrt();
        }
        Func::Not => {
            operand.value = !(v as i64) as f64;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operand::UnitTag;

    fn operand(value: f64, base: Base) -> Operand {
        Operand {
            value,
            base,
            ..Operand::default()
        }
    }

    #[test]
    fn test_sine_of_converted_degrees() {
        // g90 arrives as pi/2 radians
        let mut o = operand(std::f64::consts::FRAC_PI_2, Base::Radians);
        apply(Func::Sine, &mut o).unwrap();
        assert!((o.value - 1.0).abs() < 1e-12);
        assert_eq!(o.base, Base::Decimal);
    }

    #[test]
    fn test_tangent_singularity_signs() {
        let mut o = operand(std::f64::consts::FRAC_PI_2, Base::Radians);
        assert_eq!(
            apply(Func::Tangent, &mut o),
            Err(CalcError::TangentSingularity(true))
        );
        let mut o = operand(3.0 * std::f64::consts::FRAC_PI_2, Base::Radians);
        assert_eq!(
            apply(Func::Tangent, &mut o),
            Err(CalcError::TangentSingularity(false))
        );
    }

    #[test]
    fn test_trig_rejects_hex_base() {
        let mut o = operand(16.0, Base::Hex);
        assert_eq!(
            apply(Func::Sine, &mut o),
            Err(CalcError::FunctionBase('S', 'x'))
        );
    }

    #[test]
    fn test_log_and_ln() {
        let mut o = operand(100.0, Base::Decimal);
        apply(Func::Log, &mut o).unwrap();
        assert_eq!(o.value, 2.0);

        let mut o = operand(-1.0, Base::Decimal);
        assert_eq!(apply(Func::Ln, &mut o), Err(CalcError::LogDomain(-1.0)));
        assert_eq!(CalcError::LogDomain(-1.0).to_string(), "?? log -1");
    }

    #[test]
    fn test_sqrt_and_not() {
        let mut o = operand(25.0, Base::Decimal);
        apply(Func::Sqrt, &mut o).unwrap();
        assert_eq!(o.value, 5.0);

        let mut o = operand(0.0, Base::Decimal);
        apply(Func::Not, &mut o).unwrap();
        assert_eq!(o.value, -1.0);
    }

    #[test]
    fn test_unit_argument_rejected_except_not() {
        let mut o = operand(2.0, Base::Decimal);
        o.unit = Some(UnitTag {
            abbrev: "ft".into(),
            factor: 5280.0,
            category: 0,
            index: 4,
            power: 1,
        });
        assert_eq!(
            apply(Func::Sine, &mut o.clone()),
            Err(CalcError::FunctionUnit('S', "ft".into()))
        );
        apply(Func::Not, &mut o).unwrap();
        assert_eq!(o.value, -3.0);
        assert_eq!(o.abbrev(), "ft");
    }
}
