//! Calculation errors
//!
//! Every error renders as a short `?? …` code, the exact texts callers of
//! the legacy engine matched on. The engine also keeps the last rendered
//! text for its `calc_error()` surface.

/// Everything that can go wrong while parsing, reducing or formatting.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CalcError {
    /// Empty or missing equation text
    #[error("?? Null")]
    Empty,
    /// Unbalanced opening parenthesis or unterminated function argument
    #[error("?? (")]
    UnbalancedOpen,
    /// Closing parenthesis with no open group
    #[error("?? )")]
    UnbalancedClose,
    /// Nesting deeper than the engine supports
    #[error("?? Max ()")]
    MaxNesting,
    /// A token that cannot start or continue an operand
    #[error("?? {0}")]
    Token(String),
    /// Base prefix not followed by a digit of that base
    #[error("?? {0}{1}")]
    BadPrefix(char, char),
    /// More digits than the base allows
    #[error("?? {0}>{1}")]
    TooManyDigits(String, usize),
    /// Dotted-decimal group out of byte range
    #[error("?? dd>255")]
    DottedRange,
    /// Unit abbreviation not in the registry
    #[error("?? {0}")]
    UnknownUnit(String),
    /// Two division operators in a row
    #[error("?? (//)")]
    ChainedDivide,
    /// Two operators from incompatible families with no operand between
    #[error("?? !Op({0}{1})")]
    InconsistentOperator(char, char),
    /// `^` with no base operand to bind to
    #[error("?? ^{0}")]
    PowerOperand(String),
    /// Unit suffix directly on an inline exponent
    #[error("?? ^{0}")]
    PowerUnit(String),
    /// Division by zero
    #[error("?? /0")]
    DivideByZero,
    /// Tangent at an odd multiple of 90 degrees
    #[error("?? {}1/0", tangent_sign(.0))]
    TangentSingularity(bool),
    /// Logarithm of a non-positive value
    #[error("?? log {0}")]
    LogDomain(f64),
    /// Trig/log/sqrt applied to a united operand
    #[error("?? {0}({1})")]
    FunctionUnit(char, String),
    /// Function applied to a character-equation operand
    #[error("?? {0}({1})")]
    FunctionText(char, String),
    /// Function with no argument
    #[error("?? {0}()")]
    FunctionArg(char),
    /// Trig argument in a base other than degrees, radians or decimal
    #[error("?? {0}{1}")]
    FunctionBase(char, char),
    /// Adjacent groups with no operator linking them
    #[error("?? ()()")]
    GroupOperator,
    /// Group lead operator the combiner cannot dispatch on
    #[error("?? Op({0})")]
    UnexpectedOp(char),
    /// Group reduced to nothing
    #[error("?? Null Group")]
    NullGroup,
    /// Logic operation between two compound groups
    #[error("?? ()L()")]
    LogicGroups,
    /// Logic operation across unit categories at the group level
    #[error("?? {0} L {1}")]
    LogicCategory(String, String),
    /// Division with a missing side
    #[error("?? / Null")]
    DivideNull,
    /// Modulo where a side stays compound after reduction
    #[error("?? ()%()")]
    ModuloGroup,
    /// Modulo by a non-integer divisor
    #[error("?? N%{0}")]
    ModuloFraction(f64),
    /// Group modulo by a non-integer divisor
    #[error("?? ()%{0}")]
    ModuloGroupFraction(f64),
    /// Modulo between operands whose units do not agree
    #[error("?? Units%Units")]
    ModuloUnits,
    /// Power where a side stays compound after reduction
    #[error("?? ()^()")]
    PowerGroup,
    /// Group raised to a fractional exponent
    #[error("?? ()^i.d")]
    FractionalExponent,
    /// Group raised to a united exponent
    #[error("?? ()^{0}")]
    PowerGroupUnit(String),
    /// Logic operation across unit categories
    #[error("?? {0}{1}{2}")]
    LogicUnits(String, char, String),
    /// Reduction scan failed to converge
    #[error("?? Loop")]
    Loop,
    /// State the reducer should never reach
    #[error("?? Internal")]
    Internal,
}

fn tangent_sign(positive: &bool) -> &'static str {
    if *positive {
        ""
    } else {
        "-"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_render_legacy_texts() {
        assert_eq!(CalcError::ChainedDivide.to_string(), "?? (//)");
        assert_eq!(
            CalcError::InconsistentOperator('+', '*').to_string(),
            "?? !Op(+*)"
        );
        assert_eq!(CalcError::TangentSingularity(true).to_string(), "?? 1/0");
        assert_eq!(CalcError::TangentSingularity(false).to_string(), "?? -1/0");
        assert_eq!(
            CalcError::LogicUnits("mi".into(), '&', "ft".into()).to_string(),
            "?? mi&ft"
        );
        assert_eq!(CalcError::ModuloFraction(3.5).to_string(), "?? N%3.5");
        assert_eq!(CalcError::UnknownUnit("parsec".into()).to_string(), "?? parsec");
    }
}
