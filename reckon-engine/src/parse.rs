//! Equation parsing
//!
//! A hand-rolled left-to-right scan with one character of lookahead.
//! Parentheses recurse into child groups, so the output is an explicit
//! tree; function applications become groups of their own unless their
//! argument is a plain operand, in which case they fold on the spot.
//! The scan never backtracks: every decision is made from the pending
//! operator, the current base and the character under the cursor.

use reckon_units::UnitRegistry;
use tracing::trace;

use crate::error::CalcError;
use crate::function;
use crate::operand::{num_text, Base, Func, Op, Operand, UnitTag};

/// Hard cap on group depth.
pub(crate) const MAX_NEST: usize = 64;

/// Characters that terminate a unit abbreviation.
const STOP_CHARS: &str = " ()+-*/%^&|#!\\";

#[derive(Debug, Clone)]
pub(crate) enum Node {
    Operand(Operand),
    Group(Group),
}

#[derive(Debug, Clone)]
pub(crate) struct Group {
    /// Operator linking the group to what was reduced before it
    pub op: Op,
    pub kind: GroupKind,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum GroupKind {
    Paren,
    Function(Func),
}

/// Outcome of a successful parse.
#[derive(Debug)]
pub(crate) struct Parsed {
    pub root: Group,
    /// Dotted-decimal or quoted text was seen; reduction is bypassed
    pub char_equation: bool,
    /// Number of characters consumed
    pub consumed: usize,
}

/// All scan state lives here; the methods thread it so callers only ever
/// see [`Parser::parse`].
pub(crate) struct Parser<'r> {
    chars: Vec<char>,
    pos: usize,
    registry: &'r UnitRegistry,
    /// Operator waiting for its right-hand operand
    pending: Op,
    /// Base carried from the last prefix (or first digit) seen
    base: Option<Base>,
    /// A `^` was seen and has not bound yet
    power_pending: bool,
    /// Index of the closing quote while inside `s'…'`/`u'…'`
    quote_end: Option<usize>,
    char_equation: bool,
    /// Operands attached so far, across all groups
    operands: usize,
}

impl<'r> Parser<'r> {
    pub(crate) fn new(equation: &str, registry: &'r UnitRegistry) -> Self {
        Parser {
            chars: equation.chars().collect(),
            pos: 0,
            registry,
            pending: Op::None,
            base: None,
            power_pending: false,
            quote_end: None,
            char_equation: false,
            operands: 0,
        }
    }

    pub(crate) fn parse(mut self) -> Result<Parsed, CalcError> {
        if self.chars.iter().all(|c| *c == ' ') {
            return Err(CalcError::Empty);
        }
        let mut root = Group {
            op: Op::None,
            kind: GroupKind::Paren,
            children: Vec::new(),
        };
        self.parse_into(&mut root.children, 0)?;
        if root.children.is_empty() {
            return Err(CalcError::Empty);
        }
        trace!(operands = self.operands, char_equation = self.char_equation, "parsed");
        Ok(Parsed {
            root,
            char_equation: self.char_equation,
            consumed: self.pos,
        })
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, i: usize) -> Option<char> {
        self.chars.get(i).copied()
    }

    fn parse_into(&mut self, children: &mut Vec<Node>, depth: usize) -> Result<(), CalcError> {
        while self.pos < self.chars.len() {
            if let Some(end) = self.quote_end {
                if self.pos < end {
                    let oper = self.parse_value()?;
                    self.attach_operand(children, oper)?;
                    continue;
                }
            }
            let c = self.chars[self.pos];
            if c == ' ' {
                self.pos += 1;
            } else if c == '(' {
                self.pos += 1;
                if depth + 1 >= MAX_NEST {
                    return Err(CalcError::MaxNesting);
                }
                let powered = std::mem::take(&mut self.power_pending);
                let op = std::mem::take(&mut self.pending);
                let mut group = Group {
                    // an exponent group binds the whole left side at
                    // reduction time
                    op: if powered { Op::Pow } else { op },
                    kind: GroupKind::Paren,
                    children: Vec::new(),
                };
                self.parse_into(&mut group.children, depth + 1)?;
                children.push(Node::Group(group));
                self.operands += 1;
            } else if c == ')' {
                if depth == 0 {
                    return Err(CalcError::UnbalancedClose);
                }
                self.pos += 1;
                self.pending = Op::None;
                return Ok(());
            } else if c == '^' {
                self.pos += 1;
                self.power_pending = true;
            } else if let Some(f) = Func::from_char(c) {
                let node = self.parse_function(f, depth)?;
                match node {
                    Node::Operand(oper) => self.attach_operand(children, oper)?,
                    group => {
                        children.push(group);
                        self.operands += 1;
                    }
                }
            } else if let Some(op) = Op::from_char(c) {
                self.handle_operator(children, op)?;
            } else {
                let oper = self.parse_value()?;
                self.attach_operand(children, oper)?;
            }
        }
        if depth > 0 {
            return Err(CalcError::UnbalancedOpen);
        }
        Ok(())
    }

    fn handle_operator(&mut self, children: &mut Vec<Node>, op: Op) -> Result<(), CalcError> {
        let c = op.symbol_char();
        if self.operands == 0 {
            // only a sign can precede the first operand
            if op == Op::Sub {
                return self.parse_signed(children);
            }
            return Err(CalcError::Token(c.to_string()));
        }
        if children.is_empty() && op == Op::Sub && self.pending == Op::None {
            // minus right after an opening parenthesis is a sign
            return self.parse_signed(children);
        }
        if self.pending == Op::None {
            if op == Op::Div {
                // a `/` may not apply to an already-divided run
                if let Some(Node::Operand(prev)) = children.last() {
                    if prev.op == Op::Div {
                        return Err(CalcError::ChainedDivide);
                    }
                }
            }
            self.pending = op;
            self.pos += 1;
            return Ok(());
        }
        if op == Op::Sub {
            // "- " replaces the pending operator, "-N" signs the value
            match self.peek_at(self.pos + 1) {
                Some(' ') | None => {
                    self.pending = Op::Sub;
                    self.pos += 1;
                    Ok(())
                }
                Some(_) => self.parse_signed(children),
            }
        } else if op == Op::Div && self.pending == Op::Div {
            Err(CalcError::ChainedDivide)
        } else if op == self.pending {
            // a repeated operator is ignored
            self.pos += 1;
            Ok(())
        } else if self.pending.same_family(op) {
            self.pending = op;
            self.pos += 1;
            Ok(())
        } else {
            Err(CalcError::InconsistentOperator(
                self.pending.symbol_char(),
                c,
            ))
        }
    }

    fn parse_signed(&mut self, children: &mut Vec<Node>) -> Result<(), CalcError> {
        let oper = self.parse_value()?;
        self.attach_operand(children, oper)
    }

    /// Attach a parsed operand, resolving a pending `^` first.
    fn attach_operand(
        &mut self,
        children: &mut Vec<Node>,
        oper: Operand,
    ) -> Result<(), CalcError> {
        let mut oper = oper;
        if std::mem::take(&mut self.power_pending) {
            oper.op = Op::Pow;
            match children.last_mut() {
                Some(Node::Operand(prev)) if prev.text.is_none() => {
                    // plain base and plain exponent bind on the spot
                    if oper.unit.is_some() {
                        return Err(CalcError::PowerUnit(oper.abbrev().to_string()));
                    }
                    if prev.unit.is_some() {
                        if oper.value.fract() != 0.0 {
                            return Err(CalcError::FractionalExponent);
                        }
                        prev.set_power(oper.value as i32);
                    }
                    prev.value = prev.value.powf(oper.value);
                    return Ok(());
                }
                Some(Node::Group(_)) => {
                    // exponent of a reduced group; bound during reduction
                }
                _ => return Err(CalcError::PowerOperand(num_text(oper.value))),
            }
        }
        if oper.op.is_logic() && oper.unit.is_some() {
            if let Some(Node::Operand(prev)) = children.last() {
                if prev.unit.is_some() && prev.abbrev() != oper.abbrev() {
                    return Err(CalcError::LogicUnits(
                        prev.abbrev().to_string(),
                        oper.op.symbol_char(),
                        oper.abbrev().to_string(),
                    ));
                }
            }
        }
        children.push(Node::Operand(oper));
        self.operands += 1;
        Ok(())
    }

    fn parse_function(&mut self, f: Func, depth: usize) -> Result<Node, CalcError> {
        self.pos += 1;
        let op = std::mem::take(&mut self.pending);
        while self.peek() == Some(' ') {
            self.pos += 1;
        }
        match self.peek() {
            None => Err(CalcError::FunctionArg(f.code())),
            Some('(') => {
                self.pos += 1;
                if depth + 1 >= MAX_NEST {
                    return Err(CalcError::MaxNesting);
                }
                let mut group = Group {
                    op,
                    kind: GroupKind::Function(f),
                    children: Vec::new(),
                };
                self.parse_into(&mut group.children, depth + 1)?;
                Ok(Node::Group(group))
            }
            Some(c) if Func::from_char(c).is_some() => {
                let inner = self.parse_function(Func::from_char(c).unwrap_or(f), depth)?;
                match inner {
                    Node::Operand(mut o) => {
                        function::apply(f, &mut o)?;
                        o.op = op;
                        Ok(Node::Operand(o))
                    }
                    node => Ok(Node::Group(Group {
                        op,
                        kind: GroupKind::Function(f),
                        children: vec![node],
                    })),
                }
            }
            Some(_) => {
                let mut o = self.parse_value()?;
                function::apply(f, &mut o)?;
                o.op = op;
                Ok(Node::Operand(o))
            }
        }
    }

    /// Parse one value: optional base prefix or quote opener, digits,
    /// then an optional unit suffix.
    fn parse_value(&mut self) -> Result<Operand, CalcError> {
        let op = std::mem::take(&mut self.pending);
        let mut oper = Operand {
            op,
            ..Operand::default()
        };

        if let Some(end) = self.quote_end {
            if self.pos < end {
                let base = self.base.unwrap_or(Base::Ascii);
                return self.quote_chunk(base, oper);
            }
        }

        let first = self.peek().ok_or(CalcError::Empty)?;
        let mut base = self.base;
        if let Some(next) = self.peek_at(self.pos + 1) {
            if let Some(b) = Base::from_prefix(first) {
                if next == ' ' || b.digits().contains(next) {
                    base = Some(b);
                    self.base = Some(b);
                    self.pos += 1;
                    while self.peek() == Some(' ') {
                        self.pos += 1;
                    }
                }
            } else if (first == 's' || first == 'u') && next == '\'' {
                return self.quote_start(first, oper);
            }
        }

        let base = match base {
            Some(b) => b,
            None => {
                // the first operand of an equation must open with a digit
                if first.is_ascii_digit() || first == '-' {
                    self.base = Some(Base::Decimal);
                    Base::Decimal
                } else {
                    return Err(CalcError::Token(first.to_string()));
                }
            }
        };
        oper.base = base;

        if base == Base::Dotted {
            return self.parse_dotted(oper);
        }

        let digits = base.digits();
        let mut text = String::new();
        if self.peek() == Some('-') && digits.contains('-') {
            text.push('-');
            self.pos += 1;
        }
        while let Some(c) = self.peek() {
            // '-' in the digit table is only ever a leading sign
            if c != '-' && digits.contains(c) {
                text.push(c);
                self.pos += 1;
            } else {
                break;
            }
        }
        if text == "-" {
            return Err(CalcError::Token(text));
        }
        if text.len() > base.max_digits() {
            return Err(CalcError::TooManyDigits(text.clone(), base.max_digits()));
        }
        if !text.is_empty() {
            oper.value = match base.radix() {
                Some(radix) => i64::from_str_radix(&text, radix)
                    .map_err(|_| CalcError::Token(text.clone()))?
                    as f64,
                None => text
                    .parse()
                    .map_err(|_| CalcError::Token(text.clone()))?,
            };
        }
        if base == Base::Degrees {
            oper.value = (oper.value % 360.0).to_radians();
            oper.base = Base::Radians;
        }

        // optional unit suffix, possibly space-separated
        let mut probe = self.pos;
        while self.peek_at(probe) == Some(' ') {
            probe += 1;
        }
        let mut name = String::new();
        let mut len = 0;
        while let Some(c) = self.peek_at(probe + len) {
            if STOP_CHARS.contains(c) {
                break;
            }
            name.push(c);
            len += 1;
        }
        if !name.is_empty() {
            let unit = self
                .registry
                .lookup(&name)
                .ok_or_else(|| CalcError::UnknownUnit(name.clone()))?;
            oper.unit = Some(UnitTag::from_unit(unit));
            self.pos = probe + len;
        } else if text.is_empty() {
            return Err(CalcError::Token(first.to_string()));
        }
        Ok(oper)
    }

    fn parse_dotted(&mut self, mut oper: Operand) -> Result<Operand, CalcError> {
        self.char_equation = true;
        let mut packed: i64 = 0;
        let mut text = String::new();
        let mut group = String::new();
        let mut groups = 0;
        loop {
            match self.peek() {
                Some(c) if c.is_ascii_digit() => {
                    group.push(c);
                    self.pos += 1;
                }
                Some('.') if groups < 3 => {
                    packed = (packed << 8) | self.dotted_group(&group)? as i64;
                    text.push_str(&group);
                    text.push('.');
                    group.clear();
                    groups += 1;
                    self.pos += 1;
                }
                _ => break,
            }
        }
        packed = (packed << 8) | self.dotted_group(&group)? as i64;
        text.push_str(&group);
        oper.value = packed as f64;
        oper.text = Some(text);
        oper.base = Base::Dotted;
        Ok(oper)
    }

    fn dotted_group(&self, group: &str) -> Result<u8, CalcError> {
        let n: u32 = group
            .parse()
            .map_err(|_| CalcError::Token(format!("i{group}")))?;
        if n > 255 {
            return Err(CalcError::DottedRange);
        }
        Ok(n as u8)
    }

    fn quote_start(&mut self, sigil: char, oper: Operand) -> Result<Operand, CalcError> {
        let base = if sigil == 's' {
            Base::Ascii
        } else {
            Base::Unicode
        };
        self.base = Some(base);
        self.char_equation = true;
        let open = self.pos + 1;
        let end = (open + 1..self.chars.len())
            .find(|&i| self.chars[i] == '\'')
            .ok_or_else(|| CalcError::Token(format!("{sigil}'")))?;
        self.pos = open + 1;
        self.quote_end = Some(end);
        self.quote_chunk(base, oper)
    }

    /// Consume one operand's worth of quoted text: four ASCII bytes or
    /// two UTF-16 code units, packed big-endian.
    fn quote_chunk(&mut self, base: Base, mut oper: Operand) -> Result<Operand, CalcError> {
        let end = self.quote_end.unwrap_or(self.pos);
        let width = if base == Base::Ascii { 4 } else { 2 };
        let take = width.min(end - self.pos);
        let chunk: String = self.chars[self.pos..self.pos + take].iter().collect();
        self.pos += take;
        if self.pos >= end {
            self.pos = end + 1;
            self.quote_end = None;
        }
        let mut packed: i64 = 0;
        if base == Base::Ascii {
            for b in chunk.bytes() {
                packed = (packed << 8) | b as i64;
            }
        } else {
            for u in chunk.encode_utf16() {
                packed = (packed << 16) | u as i64;
            }
        }
        oper.value = packed as f64;
        oper.text = Some(chunk);
        oper.base = base;
        Ok(oper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reckon_units::{Catalog, UnitRegistry};

    fn registry() -> UnitRegistry {
        UnitRegistry::from_catalog(&Catalog::builtin()).unwrap()
    }

    fn parse(eq: &str) -> Result<Parsed, CalcError> {
        let reg = registry();
        Parser::new(eq, &reg).parse()
    }

    fn flat(eq: &str) -> Vec<Operand> {
        parse(eq)
            .unwrap()
            .root
            .children
            .into_iter()
            .map(|n| match n {
                Node::Operand(o) => o,
                Node::Group(_) => panic!("expected a flat equation"),
            })
            .collect()
    }

    #[test]
    fn test_operator_chain_left_to_right() {
        assert_eq!(parse("2+3*4").unwrap().consumed, 5);
        let ops = flat("2+3*4");
        assert_eq!(ops.len(), 3);
        assert_eq!(ops[0].op, Op::None);
        assert_eq!(ops[1].op, Op::Add);
        assert_eq!(ops[2].op, Op::Mul);
    }

    #[test]
    fn test_unit_suffix_lookup() {
        let ops = flat("5 mi + 3 ft");
        assert_eq!(ops[0].abbrev(), "mi");
        assert_eq!(ops[1].abbrev(), "ft");
        assert_eq!(ops[1].op, Op::Add);
        assert_eq!(
            parse("5 smoot").unwrap_err(),
            CalcError::UnknownUnit("smoot".to_string())
        );
    }

    #[test]
    fn test_bare_unit_operand_defaults_to_one() {
        let ops = flat("2 ft + ft");
        assert_eq!(ops[1].value, 1.0);
        assert_eq!(ops[1].abbrev(), "ft");
    }

    #[test]
    fn test_repeated_and_family_operators() {
        let ops = flat("2 + + 3");
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[1].op, Op::Add);
        // a family member replaces the pending operator
        let ops = flat("2 + - 3");
        assert_eq!(ops[1].op, Op::Sub);
        assert_eq!(
            parse("2 + * 3").unwrap_err(),
            CalcError::InconsistentOperator('+', '*')
        );
        assert_eq!(parse("2 // 3").unwrap_err(), CalcError::ChainedDivide);
        assert_eq!(parse("10/2/2").unwrap_err(), CalcError::ChainedDivide);
        assert_eq!(parse("10 / 2 / 2").unwrap_err(), CalcError::ChainedDivide);
    }

    #[test]
    fn test_minus_sign_binding() {
        let ops = flat("2+-3");
        assert_eq!(ops[1].value, -3.0);
        assert_eq!(ops[1].op, Op::Add);
        let ops = flat("-5 + 2");
        assert_eq!(ops[0].value, -5.0);
    }

    #[test]
    fn test_leading_operator_rejected() {
        assert_eq!(parse("+ 2").unwrap_err(), CalcError::Token("+".to_string()));
        assert_eq!(parse("q + 2").unwrap_err(), CalcError::Token("q".to_string()));
    }

    #[test]
    fn test_groups_nest() {
        let parsed = parse("2*((3+4)-1)").unwrap();
        assert_eq!(parsed.root.children.len(), 2);
        match &parsed.root.children[1] {
            Node::Group(g) => {
                assert_eq!(g.op, Op::Mul);
                assert!(matches!(g.children[0], Node::Group(_)));
            }
            _ => panic!("expected a group"),
        }
        assert_eq!(parse("(2+3").unwrap_err(), CalcError::UnbalancedOpen);
        assert_eq!(parse("2+3)").unwrap_err(), CalcError::UnbalancedClose);
    }

    #[test]
    fn test_inline_power_folds() {
        let ops = flat("2*3^2");
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[1].value, 9.0);
        // a united base keeps the exponent as its unit power
        let ops = flat("3 ft ^ 2");
        assert_eq!(ops[0].value, 9.0);
        assert_eq!(ops[0].power(), 2);
        assert_eq!(
            parse("2^2 ft").unwrap_err(),
            CalcError::PowerUnit("ft".to_string())
        );
    }

    #[test]
    fn test_power_group_stays_deferred() {
        let parsed = parse("2^(1+2)").unwrap();
        match &parsed.root.children[1] {
            Node::Group(g) => assert_eq!(g.op, Op::Pow),
            _ => panic!("expected an exponent group"),
        }
    }

    #[test]
    fn test_base_prefixes() {
        let ops = flat("n1010 + n0101");
        assert_eq!(ops[0].value, 10.0);
        assert_eq!(ops[1].value, 5.0);
        assert_eq!(ops[0].base, Base::Binary);
        let ops = flat("x ff + o 17");
        assert_eq!(ops[0].value, 255.0);
        assert_eq!(ops[1].value, 15.0);
    }

    #[test]
    fn test_degrees_rewritten_to_radians() {
        let ops = flat("g90");
        assert_eq!(ops[0].base, Base::Radians);
        assert!((ops[0].value - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
        // modulo 360 first
        let ops = flat("g450");
        assert!((ops[0].value - std::f64::consts::FRAC_PI_2).abs() < 1e-12);
    }

    #[test]
    fn test_digit_caps() {
        assert!(matches!(
            parse("x123456789").unwrap_err(),
            CalcError::TooManyDigits(_, 8)
        ));
    }

    #[test]
    fn test_dotted_decimal_packs_bytes() {
        let parsed = parse("i192.168.0.1").unwrap();
        assert!(parsed.char_equation);
        match &parsed.root.children[0] {
            Node::Operand(o) => {
                assert_eq!(o.value, 3232235521.0);
                assert_eq!(o.text.as_deref(), Some("192.168.0.1"));
            }
            _ => panic!("expected an operand"),
        }
        assert_eq!(parse("i300.1").unwrap_err(), CalcError::DottedRange);
    }

    #[test]
    fn test_quote_spans_chunk() {
        let parsed = parse("s'abcdef'").unwrap();
        assert!(parsed.char_equation);
        let texts: Vec<_> = parsed
            .root
            .children
            .iter()
            .map(|n| match n {
                Node::Operand(o) => o.text.clone().unwrap(),
                _ => panic!(),
            })
            .collect();
        assert_eq!(texts, ["abcd", "ef"]);
        let parsed = parse("u'abcd'").unwrap();
        assert_eq!(parsed.root.children.len(), 2);
    }

    #[test]
    fn test_function_folds_plain_argument() {
        let ops = flat("2+L100");
        assert_eq!(ops[1].value, 2.0);
        assert_eq!(ops[1].op, Op::Add);
        let ops = flat("\\25");
        assert_eq!(ops[0].value, 5.0);
    }

    #[test]
    fn test_function_group_deferred() {
        let parsed = parse("S(1+2)").unwrap();
        match &parsed.root.children[0] {
            Node::Group(g) => {
                assert_eq!(g.kind, GroupKind::Function(Func::Sine));
                assert_eq!(g.children.len(), 2);
            }
            _ => panic!("expected a function group"),
        }
    }

    #[test]
    fn test_logic_units_checked_at_parse() {
        assert_eq!(
            parse("5 mi & 3 ft").unwrap_err(),
            CalcError::LogicUnits("mi".to_string(), '&', "ft".to_string())
        );
        assert!(parse("5 ft & 3 ft").is_ok());
        assert!(parse("5 & 3").is_ok());
        // a unitless side passes; the reducer folds the unit through
        assert!(parse("5 ft & 3").is_ok());
        assert!(parse("5 & 3 ft").is_ok());
    }

    #[test]
    fn test_max_nesting() {
        let mut eq = String::new();
        for _ in 0..70 {
            eq.push('(');
        }
        eq.push('1');
        assert_eq!(parse(&eq).unwrap_err(), CalcError::MaxNesting);
    }

    #[test]
    fn test_empty_equation() {
        assert_eq!(parse("   ").unwrap_err(), CalcError::Empty);
    }
}
