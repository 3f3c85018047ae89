//! Flat-list reduction
//!
//! Every group of the parse tree reduces to a flat operand list: one
//! real operand per compound-unit term, followed by placeholder
//! operands carrying the units that would not consolidate. Reduced
//! child groups combine with what came before them through the
//! operator-specific group combinators, strictly left to right. A
//! fraction that cannot fold stays on the list as a `/`-led tail.

use tracing::trace;

use crate::error::CalcError;
use crate::function;
use crate::operand::{num_text, Func, Op, Operand};
use crate::parse::{Group, GroupKind, Node};

/// Overall shape of a reduced group, derived from its lead operator.
/// Multiplicative and logical groups count as plain because their
/// units were already consolidated onto the first operand.
#[derive(Debug, Clone, Copy, PartialEq)]
enum GroupShape {
    Plain,
    AddSub,
    Div,
}

/// Number of operands that are not unit placeholders.
pub(crate) fn true_size(stack: &[Operand]) -> usize {
    stack.iter().filter(|o| !o.placeholder).count()
}

/// Render a stack for the work trace.
pub(crate) fn display_stack(stack: &[Operand]) -> String {
    let mut out = String::new();
    for o in stack {
        if o.placeholder {
            out.push_str(o.op.symbol());
            out.push_str(o.abbrev());
            if o.power() > 1 {
                out.push_str(&format!("^{}", o.power()));
            }
            continue;
        }
        if !out.is_empty() {
            if o.op != Op::None {
                out.push(' ');
                out.push_str(o.op.symbol());
            }
            out.push(' ');
        }
        match &o.text {
            Some(t) => out.push_str(t),
            None => out.push_str(&num_text(o.value)),
        }
        if o.unit.is_some() {
            out.push(' ');
            out.push_str(o.abbrev());
            if o.power() > 1 {
                out.push_str(&format!("^{}", o.power()));
            }
        }
    }
    out
}

/// Convert every united leaf to the finest unit of its category, where
/// finest means the largest absolute conversion factor seen in the
/// equation. Powers scale the factor accordingly.
pub(crate) fn convert_units(root: &mut Group, categories: usize) {
    let mut finest: Vec<Option<(String, f64, usize)>> = vec![None; categories];
    scan_finest(root, &mut finest);
    apply_finest(root, &finest);
}

fn scan_finest(group: &Group, finest: &mut [Option<(String, f64, usize)>]) {
    for child in &group.children {
        match child {
            Node::Operand(o) => {
                if let Some(u) = &o.unit {
                    let better = match &finest[u.category] {
                        Some((_, factor, _)) => u.factor.abs() > factor.abs(),
                        None => true,
                    };
                    if better {
                        finest[u.category] = Some((u.abbrev.clone(), u.factor, u.index));
                    }
                }
            }
            Node::Group(g) => scan_finest(g, finest),
        }
    }
}

fn apply_finest(group: &mut Group, finest: &[Option<(String, f64, usize)>]) {
    for child in &mut group.children {
        match child {
            Node::Operand(o) => {
                if let Some(u) = o.unit.as_mut() {
                    if let Some((abbrev, factor, index)) = &finest[u.category] {
                        if u.index != *index {
                            let (c1, c2) = if u.power > 1 {
                                (factor.powi(u.power), u.factor.powi(u.power))
                            } else {
                                (*factor, u.factor)
                            };
                            o.value = o.value * c1 / c2;
                            u.abbrev = abbrev.clone();
                            u.factor = *factor;
                            u.index = *index;
                        }
                    }
                }
            }
            Node::Group(g) => apply_finest(g, finest),
        }
    }
}

/// True when the compound units starting at `sa` and `sb` (each a real
/// operand plus its trailing placeholders) carry the same unit set,
/// compared from the larger set.
fn same_group_units(a: &[Operand], sa: usize, b: &[Operand], sb: usize) -> bool {
    let mut end_a = sa + 1;
    while end_a < a.len() && a[end_a].placeholder {
        end_a += 1;
    }
    let mut end_b = sb + 1;
    while end_b < b.len() && b[end_b].placeholder {
        end_b += 1;
    }
    let matches = |x: &Operand, ys: &[Operand], s: usize, e: usize| {
        ys[s..e].iter().any(|y| {
            x.category() == y.category() && x.unit_index() == y.unit_index() && x.power() == y.power()
        })
    };
    if end_a - sa >= end_b - sb {
        a[sa..end_a].iter().all(|x| matches(x, b, sb, end_b))
    } else {
        b[sb..end_b].iter().all(|x| matches(x, a, sa, end_a))
    }
}

/// Sort each compound-unit run so categories appear in a consistent
/// order before consolidation. The head's value and operator stay on
/// whichever operand ends up first.
fn order_units(stack: &mut Vec<Operand>) {
    let mut idx = 0;
    while idx < stack.len() {
        if idx + 1 >= stack.len() || !stack[idx + 1].placeholder {
            idx += 1;
            continue;
        }
        let value = stack[idx].value;
        let op = stack[idx].op;
        stack[idx].value = 1.0;
        stack[idx].op = stack[idx + 1].op;
        stack[idx].placeholder = true;
        let mut end = idx + 1;
        while end < stack.len() && stack[end].placeholder {
            end += 1;
        }
        let run: Vec<Operand> = stack.drain(idx..end).collect();
        let mut ordered: Vec<Operand> = Vec::with_capacity(run.len());
        for o in run {
            let pos = ordered
                .iter()
                .position(|t| o.category() > t.category())
                .unwrap_or(ordered.len());
            ordered.insert(pos, o);
        }
        ordered.reverse();
        let next = idx + ordered.len();
        for (k, o) in ordered.into_iter().enumerate() {
            stack.insert(idx + k, o);
        }
        stack[idx].value = value;
        stack[idx].op = op;
        stack[idx].placeholder = false;
        idx = next;
    }
}

fn subtract_units(stack: &mut [Operand]) -> Result<(), CalcError> {
    if stack[0].op != Op::Sub {
        return Err(CalcError::Internal);
    }
    stack[0].value = -stack[0].value;
    stack[0].op = Op::Add;
    for o in &mut stack[1..] {
        match o.op {
            Op::Add => o.value = -o.value,
            Op::Sub => o.op = Op::Add,
            _ => return Err(CalcError::Internal),
        }
    }
    Ok(())
}

/// Fold a multiplicative group onto its head operand, shedding units
/// that do not consolidate into placeholders.
fn multiply_units(stack: &mut Vec<Operand>) {
    let mut head = 0;
    let mut idx = 1;
    while idx < stack.len() {
        if stack[idx].op != Op::Mul {
            head = idx;
            idx += 1;
            continue;
        }
        stack[head].value *= stack[idx].value;
        if stack[idx].unit.is_none() {
            stack.remove(idx);
        } else if stack[head].unit.is_some() {
            if stack[head].category() != stack[idx].category() {
                stack[idx].value = 1.0;
                stack[idx].placeholder = true;
                idx += 1;
            } else {
                let p = stack[head].power() + stack[idx].power();
                stack[head].set_power(p);
                stack.remove(idx);
            }
        } else {
            let unit = stack[idx].unit.take();
            stack[head].unit = unit;
            stack.remove(idx);
        }
    }
}

/// Logical counterpart of [`multiply_units`]; shed placeholders carry
/// value 0 because the fold already happened in integer space.
fn logic_units(stack: &mut Vec<Operand>) {
    let mut head = 0;
    let mut idx = 1;
    while idx < stack.len() {
        let op = stack[idx].op;
        if !op.is_logic() {
            head = idx;
            idx += 1;
            continue;
        }
        let l1 = stack[head].value as i64;
        let l2 = stack[idx].value as i64;
        stack[head].value = match op {
            Op::And => (l1 & l2) as f64,
            Op::Or => (l1 | l2) as f64,
            _ => (l1 ^ l2) as f64,
        };
        if stack[head].unit.is_some() {
            if stack[head].category() != stack[idx].category() {
                stack[idx].value = 0.0;
                stack[idx].placeholder = true;
                idx += 1;
            } else {
                stack.remove(idx);
            }
        } else {
            let unit = stack[idx].unit.take();
            stack[head].unit = unit;
            stack.remove(idx);
        }
    }
}

/// Reduces parse trees and flat operand runs, keeping a work trace of
/// each combination step.
pub(crate) struct Reducer {
    pub(crate) work: String,
}

impl Reducer {
    pub(crate) fn new() -> Self {
        Reducer {
            work: String::new(),
        }
    }

    fn note(&mut self, stage: &str, stack: &[Operand]) {
        self.work.push_str(stage);
        self.work.push_str(": ");
        self.work.push_str(&display_stack(stack));
        self.work.push('\n');
    }

    /// Reduce a parse-tree group to a flat operand list. Contiguous
    /// plain operands reduce as one run; child groups reduce
    /// recursively and then combine with the accumulated left side
    /// through their linking operator.
    pub(crate) fn reduce_tree(&mut self, group: Group) -> Result<Vec<Operand>, CalcError> {
        let kind = group.kind;
        let mut parts: Vec<Vec<Operand>> = Vec::new();
        let mut run: Vec<Operand> = Vec::new();
        for child in group.children {
            match child {
                Node::Operand(o) => {
                    // a deferred exponent binds the whole left side, so
                    // it combines as a part of its own
                    if o.op == Op::Pow {
                        if !run.is_empty() {
                            parts.push(std::mem::take(&mut run));
                        }
                        parts.push(vec![o]);
                    } else {
                        run.push(o);
                    }
                }
                Node::Group(g) => {
                    if !run.is_empty() {
                        parts.push(std::mem::take(&mut run));
                    }
                    let op = g.op;
                    let mut reduced = self.reduce_tree(g)?;
                    if let Some(first) = reduced.first_mut() {
                        first.op = op;
                    }
                    parts.push(reduced);
                }
            }
        }
        if !run.is_empty() {
            parts.push(run);
        }
        if parts.is_empty() {
            return Err(CalcError::NullGroup);
        }

        for part in &mut parts {
            if true_size(part) > 1 {
                self.reduce_equation(part)?;
            }
        }

        let mut parts = parts.into_iter();
        let mut acc = parts.next().unwrap_or_default();
        for part in parts {
            let lead = part.first().map_or(Op::None, |o| o.op);
            acc = match lead {
                Op::Add | Op::Sub => self.addsub_groups(acc, part)?,
                Op::Mul => self.multiply_groups(acc, part)?,
                Op::Div => self.divide_groups(acc, part)?,
                Op::Mod => self.modulo_group(acc, part)?,
                Op::Pow => self.power_group(acc, part)?,
                Op::And | Op::Or | Op::Xor => self.logical_groups(acc, part)?,
                Op::None => return Err(CalcError::GroupOperator),
            };
            self.note("combine", &acc);
        }
        if let GroupKind::Function(f) = kind {
            acc = self.function_group(f, acc)?;
        }
        if true_size(&acc) > 1 {
            self.reduce_equation(&mut acc)?;
        }
        Ok(acc)
    }

    /// Reduce one flat run left to right. Operands with differing units
    /// are skipped over and revisited; a division that does not end in
    /// a bare constant is left for [`Reducer::reduce_final`].
    pub(crate) fn reduce_equation(&mut self, stack: &mut Vec<Operand>) -> Result<(), CalcError> {
        order_units(stack);
        let mut passes = 0;
        let mut idx = 0;
        'outer: while idx < stack.len() {
            passes += 1;
            if passes > 10 {
                break;
            }
            if stack[idx].text.is_some() {
                idx += 1;
                continue;
            }
            let mut multi_unit = false;
            let mut next = idx + 1;
            let mut spins = 0;
            while next < stack.len() {
                spins += 1;
                if spins > 50 {
                    return Err(CalcError::Loop);
                }
                // differing units (or powers) only combine through
                // multiplication
                if stack[next].op != Op::Mul
                    && stack[idx].unit.is_some()
                    && stack[next].unit.is_some()
                    && (stack[idx].category() != stack[next].category()
                        || stack[idx].power() != stack[next].power())
                {
                    multi_unit = true;
                    next += 1;
                    continue;
                }
                if stack[idx].placeholder {
                    idx += 1;
                    continue 'outer;
                }
                match stack[next].op {
                    Op::Div => {
                        // a bare divisor folds into the running total so
                        // later operators see the quotient; a united
                        // denominator waits for the final pass
                        if stack[next].unit.is_none()
                            && (next + 1 >= stack.len() || !stack[next + 1].placeholder)
                        {
                            stack[idx].value /= stack[next].value;
                        } else {
                            idx = next;
                            continue 'outer;
                        }
                    }
                    Op::Add | Op::Sub => {
                        if stack[next].placeholder {
                            next += 1;
                            continue;
                        }
                        if same_group_units(stack, idx, stack, next) {
                            let v = stack[next].value;
                            if stack[next].op == Op::Add {
                                stack[idx].value += v;
                            } else {
                                stack[idx].value -= v;
                            }
                            while next + 1 < stack.len() && stack[next + 1].placeholder {
                                stack.remove(next + 1);
                            }
                        } else if !multi_unit {
                            idx += 1;
                            continue 'outer;
                        } else {
                            break;
                        }
                    }
                    Op::Mul => {
                        if stack[next].placeholder {
                            next += 1;
                            continue;
                        }
                        stack[idx].value *= stack[next].value;
                        if stack[idx].unit.is_none() {
                            let unit = stack[next].unit.clone();
                            stack[idx].unit = unit;
                        } else if stack[idx].category() == stack[next].category() {
                            let p = stack[idx].power() + stack[next].power();
                            stack[idx].set_power(p);
                        } else {
                            if stack[next].unit.is_none() {
                                stack.remove(next);
                                continue;
                            }
                            // merge into an earlier carrier of the same
                            // category when one exists
                            let mut i = idx + 1;
                            while i < next {
                                if stack[i].category() == stack[next].category() {
                                    let p = stack[i].power() + stack[next].power();
                                    stack[i].set_power(p);
                                    stack.remove(next);
                                    break;
                                }
                                i += 1;
                            }
                            if i == next {
                                stack[next].placeholder = true;
                                stack[next].value = 1.0;
                            }
                            next += 1;
                            continue;
                        }
                    }
                    Op::And | Op::Or | Op::Xor => {
                        if stack[next].placeholder {
                            next += 1;
                            continue;
                        }
                        let l1 = stack[next].value as i64;
                        let l2 = stack[idx].value as i64;
                        stack[idx].value = match stack[next].op {
                            Op::And => (l1 & l2) as f64,
                            Op::Or => (l1 | l2) as f64,
                            _ => (l1 ^ l2) as f64,
                        };
                        // hand the folded term's shed units to the left
                        // group where they fit
                        let i = next + 1;
                        while i < stack.len() && stack[i].placeholder {
                            let oper = stack.remove(i);
                            let mut j = idx;
                            while j < i {
                                if j > idx && !stack[j].placeholder {
                                    break;
                                }
                                if stack[j].unit.is_none() {
                                    stack[j].unit = oper.unit.clone();
                                    break;
                                } else if stack[j].category() == oper.category() {
                                    break;
                                }
                                j += 1;
                            }
                        }
                    }
                    Op::Mod => {
                        let mut count = usize::from(stack[next].unit.is_some());
                        let mut j = next + 1;
                        while j < stack.len() && stack[j].placeholder {
                            count += 1;
                            j += 1;
                        }
                        if count == 0 || same_group_units(stack, idx, stack, next) {
                            let dv = stack[next].value;
                            if dv.fract() != 0.0 {
                                return Err(CalcError::ModuloFraction(dv));
                            }
                            let l2 = dv as i64;
                            if l2 == 0 {
                                return Err(CalcError::DivideByZero);
                            }
                            let l1 = stack[idx].value as i64;
                            let d = stack[idx].value - l1 as f64;
                            stack[idx].value = (l1 % l2) as f64 + d;
                            while next + 1 < stack.len() && stack[next + 1].placeholder {
                                stack.remove(next + 1);
                            }
                        } else {
                            return Err(CalcError::ModuloUnits);
                        }
                    }
                    Op::Pow => {
                        if stack[next].unit.is_some() {
                            return Err(CalcError::PowerUnit(stack[next].abbrev().to_string()));
                        }
                        let e = stack[next].value;
                        stack[idx].value = stack[idx].value.powf(e);
                        if stack[idx].unit.is_some() {
                            stack[idx].set_power(e as i32);
                        }
                    }
                    Op::None => return Err(CalcError::GroupOperator),
                }
                // the folded operand hands its unit to the left side,
                // except across a division boundary
                if stack[idx].unit.is_none() && stack[next].op != Op::Div {
                    let unit = stack[next].unit.clone();
                    stack[idx].unit = unit;
                }
                stack.remove(next);
            }
            if multi_unit {
                idx += 1;
            } else if next == stack.len() {
                idx = next;
            }
        }
        trace!(stack = %display_stack(stack), "reduced run");
        Ok(())
    }

    /// Classify a reduced group by its lead operator, folding
    /// multiplicative and logical unit groups and rewriting subtracted
    /// groups to negated addition on the way.
    fn group_shape(&mut self, stack: &mut Vec<Operand>) -> Result<GroupShape, CalcError> {
        if stack.is_empty() {
            return Err(CalcError::NullGroup);
        }
        if stack.len() == 1 {
            return Ok(GroupShape::Plain);
        }
        let Some(lead) = (1..stack.len()).find(|&i| !stack[i].placeholder) else {
            return Ok(GroupShape::Plain);
        };

        // a fully reduced fraction can be led by the numerator's
        // addition or subtraction
        if stack[lead].op != Op::Div {
            let divs: Vec<usize> = (lead..stack.len())
                .filter(|&i| stack[i].op == Op::Div)
                .collect();
            if divs.len() > 1 {
                return Err(CalcError::ChainedDivide);
            }
            if divs.len() == 1 {
                let split = divs[0];
                let mut numerator = stack[lead..split].to_vec();
                self.group_shape(&mut numerator)?;
                let mut denominator = stack[split..].to_vec();
                self.group_shape(&mut denominator)?;
                return Ok(GroupShape::Div);
            }
        }

        match stack[lead].op {
            Op::Div => {
                let mut seen = Op::None;
                for i in lead..stack.len() {
                    if stack[i].placeholder {
                        continue;
                    }
                    if seen == Op::None {
                        seen = stack[i].op;
                        continue;
                    }
                    if stack[i].op == Op::Div {
                        return Err(CalcError::ChainedDivide);
                    }
                    let mut rest = stack[i..].to_vec();
                    if self.group_shape(&mut rest)? == GroupShape::Div {
                        return Err(CalcError::ChainedDivide);
                    }
                    return Ok(GroupShape::Div);
                }
                Ok(GroupShape::Div)
            }
            Op::Add | Op::Sub => {
                verify_ops(stack, lead)?;
                if stack[0].op == Op::Sub {
                    subtract_units(stack)?;
                }
                Ok(GroupShape::AddSub)
            }
            Op::Mul => {
                verify_ops(stack, lead)?;
                multiply_units(stack);
                Ok(GroupShape::Plain)
            }
            Op::And | Op::Or | Op::Xor => {
                verify_ops(stack, lead)?;
                logic_units(stack);
                Ok(GroupShape::Plain)
            }
            op => Err(CalcError::UnexpectedOp(op.symbol_char())),
        }
    }

    /// Add or subtract two reduced groups. Fractions go onto a common
    /// denominator first; everything else merges into one run.
    fn addsub_groups(
        &mut self,
        mut a: Vec<Operand>,
        b: Vec<Operand>,
    ) -> Result<Vec<Operand>, CalcError> {
        if a.len() == 1 && b.len() == 1 {
            a.extend(b);
            self.reduce_equation(&mut a)?;
            return Ok(a);
        }
        let mut a = a;
        let mut b = b;
        let shape_a = self.group_shape(&mut a)?;
        let shape_b = self.group_shape(&mut b)?;
        if shape_a != GroupShape::Div && shape_b != GroupShape::Div {
            a.extend(b);
            self.reduce_equation(&mut a)?;
            return Ok(a);
        }

        // cross-multiply onto a common denominator
        let ida = (1..a.len()).find(|&i| a[i].op == Op::Div).unwrap_or(a.len());
        let idb = (1..b.len()).find(|&i| b[i].op == Op::Div).unwrap_or(b.len());
        let mut den_a = a[ida..].to_vec();
        let mut den_b = b[idb..].to_vec();
        let ta = if den_a.is_empty() {
            GroupShape::Plain
        } else {
            self.group_shape(&mut den_a)?
        };
        let tb = if den_b.is_empty() {
            GroupShape::Plain
        } else {
            self.group_shape(&mut den_b)?
        };
        // denominator units cancel when both sides carry the same plain
        // unit set
        let units_cancel = ta == GroupShape::Plain
            && tb == GroupShape::Plain
            && !den_a.is_empty()
            && !den_b.is_empty()
            && same_group_units(&den_a, 0, &den_b, 0);
        let strip = |src: &[Operand], cancel: bool| -> Vec<Operand> {
            src.iter()
                .cloned()
                .map(|mut o| {
                    if cancel {
                        o.unit = None;
                    }
                    o
                })
                .collect()
        };

        // first numerator times second denominator
        let num_a = a[..ida].to_vec();
        let mut mult = strip(&b[idb..], units_cancel);
        if let Some(first) = mult.first_mut() {
            first.op = Op::Mul;
        }
        let mut new_stack = if mult.is_empty() {
            num_a
        } else {
            self.multiply_groups(num_a, mult)?
        };
        // second numerator times first denominator
        let num_b = b[..idb].to_vec();
        let mut mult = strip(&a[ida..], units_cancel);
        if let Some(first) = mult.first_mut() {
            first.op = Op::Mul;
        }
        let tail = if mult.is_empty() {
            num_b
        } else {
            self.multiply_groups(num_b, mult)?
        };
        new_stack.extend(tail);
        // combined denominator keeps its leading `/`
        let denominator = if ida < a.len() {
            let den = a[ida..].to_vec();
            let mut mult = strip(&b[idb..], units_cancel);
            if let Some(first) = mult.first_mut() {
                first.op = Op::Mul;
            }
            if mult.is_empty() {
                den
            } else {
                self.multiply_groups(den, mult)?
            }
        } else {
            b[idb..].to_vec()
        };
        new_stack.extend(denominator);
        Ok(new_stack)
    }

    /// Multiply two reduced groups. Additive groups distribute term by
    /// term; fractions multiply numerators and denominators apart.
    fn multiply_groups(
        &mut self,
        mut a: Vec<Operand>,
        mut b: Vec<Operand>,
    ) -> Result<Vec<Operand>, CalcError> {
        if a.len() == 1 && b.len() == 1 {
            let mut bo = b.pop().ok_or(CalcError::Internal)?;
            a[0].value *= bo.value;
            if bo.unit.is_some() {
                if a[0].unit.is_none() {
                    a[0].unit = bo.unit;
                } else if a[0].category() == bo.category() {
                    let p = a[0].power() + bo.power();
                    a[0].set_power(p);
                } else {
                    bo.value = 1.0;
                    bo.placeholder = true;
                    a.push(bo);
                }
            }
            return Ok(a);
        }
        let shape_a = self.group_shape(&mut a)?;
        let shape_b = self.group_shape(&mut b)?;

        let mut new_stack: Vec<Operand>;
        if shape_a != GroupShape::Div && shape_b != GroupShape::Div {
            // distribute each term of the first group over every term
            // of the second
            new_stack = Vec::new();
            let mut idx_a = 0;
            while idx_a < a.len() {
                let mut term_a = vec![a[idx_a].clone()];
                while idx_a + 1 < a.len() && a[idx_a + 1].placeholder {
                    idx_a += 1;
                    term_a.push(a[idx_a].clone());
                }
                let mut idx_b = 0;
                while idx_b < b.len() {
                    let sign = if b[idx_b].op == Op::Sub { -1.0 } else { 1.0 };
                    let mut term_b = vec![b[idx_b].clone()];
                    while idx_b + 1 < b.len() && b[idx_b + 1].placeholder {
                        idx_b += 1;
                        term_b.push(b[idx_b].clone());
                    }
                    let mut out: Vec<Operand> = Vec::with_capacity(term_a.len());
                    for (i, src) in term_a.iter().enumerate() {
                        let mut o = src.clone();
                        o.op = if i == 0 {
                            if src.op == Op::Sub {
                                Op::Sub
                            } else {
                                Op::Add
                            }
                        } else {
                            Op::Mul
                        };
                        out.push(o);
                    }
                    out[0].value *= term_b[0].value * sign;
                    // merge the multiplier's units into the duplicate
                    for o in out.iter_mut() {
                        let mut j = 0;
                        while j < term_b.len() {
                            if !o.placeholder && o.unit.is_none() {
                                o.unit = term_b.remove(j).unit;
                                break;
                            } else if o.unit.is_some() && o.abbrev() == term_b[j].abbrev() {
                                let p = term_b.remove(j).power();
                                o.set_power(o.power() + p);
                                break;
                            }
                            j += 1;
                        }
                    }
                    new_stack.extend(out);
                    // leftover multiplier units ride along as
                    // placeholders
                    for mut o in term_b {
                        if o.unit.is_some() {
                            o.placeholder = true;
                            o.value = 1.0;
                            o.op = Op::Mul;
                            new_stack.push(o);
                        }
                    }
                    idx_b += 1;
                }
                idx_a += 1;
            }
            if let Some(first) = new_stack.first_mut() {
                first.op = a[0].op;
            }
        } else if shape_a != GroupShape::AddSub && shape_b != GroupShape::AddSub {
            // numerators multiply numerators, denominators multiply
            // denominators
            let ida = (1..a.len()).find(|&i| a[i].op == Op::Div).unwrap_or(a.len());
            let idb = (1..b.len()).find(|&i| b[i].op == Op::Div).unwrap_or(b.len());
            new_stack = self.multiply_groups(a[..ida].to_vec(), b[..idb].to_vec())?;
            let denominator = if ida < a.len() {
                let den_a = a[ida..].to_vec();
                let mut den_b = b[idb..].to_vec();
                if let Some(first) = den_b.first_mut() {
                    if shape_a == GroupShape::Div {
                        first.op = Op::Mul;
                    }
                }
                if den_b.is_empty() {
                    den_a
                } else {
                    self.multiply_groups(den_a, den_b)?
                }
            } else {
                b[idb..].to_vec()
            };
            new_stack.extend(denominator);
        } else if shape_a == GroupShape::AddSub {
            // additive group times fraction: multiply by the numerator,
            // keep the denominator
            let idb = (1..b.len()).find(|&i| b[i].op == Op::Div).unwrap_or(b.len());
            let denominator = b.split_off(idb);
            new_stack = self.multiply_groups(a, b)?;
            new_stack.extend(denominator);
        } else {
            // fraction times additive group
            let ida = (1..a.len()).find(|&i| a[i].op == Op::Div).unwrap_or(a.len());
            let denominator = a.split_off(ida);
            new_stack = self.multiply_groups(a, b)?;
            new_stack.extend(denominator);
        }
        multiply_units(&mut new_stack);
        Ok(new_stack)
    }

    /// Divide two reduced groups. The divisor joins as (or multiplies
    /// into) the denominator; dividing by a fraction multiplies by its
    /// inverse.
    fn divide_groups(
        &mut self,
        mut a: Vec<Operand>,
        mut b: Vec<Operand>,
    ) -> Result<Vec<Operand>, CalcError> {
        if a.len() == 1 && b.len() == 1 {
            let mut bo = b.pop().ok_or(CalcError::Internal)?;
            if bo.unit.is_none() {
                a[0].value /= bo.value;
            } else if bo.category() == a[0].category() {
                a[0].value /= bo.value;
                if a[0].power() == bo.power() {
                    a[0].unit = None;
                } else if a[0].power() > bo.power() {
                    let p = a[0].power() - bo.power();
                    a[0].set_power(p);
                } else {
                    bo.set_power(bo.power() - a[0].power());
                    a[0].unit = None;
                    a.push(bo);
                }
            } else {
                a.push(bo);
            }
            self.reduce_equation(&mut a)?;
            return Ok(a);
        }
        let shape_a = self.group_shape(&mut a)?;
        let shape_b = self.group_shape(&mut b)?;

        let mut new_stack: Vec<Operand>;
        if shape_a != GroupShape::Div && shape_b == GroupShape::Plain && b.len() == 1 {
            // every term divides by the bare divisor, which stays as a
            // unit-carrying denominator when united
            for o in a.iter_mut() {
                if !o.placeholder {
                    o.value /= b[0].value;
                }
            }
            b[0].value = 1.0;
            new_stack = a;
            new_stack.extend(b);
        } else if shape_a != GroupShape::Div && shape_b == GroupShape::AddSub {
            new_stack = a;
            new_stack.extend(b);
        } else if shape_a != GroupShape::Div && shape_b == GroupShape::Plain {
            // both sides are consolidated unit products
            let cancels = a
                .iter()
                .all(|x| b.iter().any(|y| x.abbrev() == y.abbrev()));
            new_stack = a;
            if cancels {
                new_stack[0].value /= b[0].value;
            } else {
                new_stack.extend(b);
            }
        } else if shape_a == GroupShape::Div && shape_b != GroupShape::Div {
            // new divisor multiplies the existing denominator
            let ida = (1..a.len()).find(|&i| a[i].op == Op::Div).unwrap_or(a.len());
            let denominator = a.split_off(ida);
            if let Some(first) = b.first_mut() {
                first.op = Op::Mul;
            }
            new_stack = a;
            new_stack.extend(self.multiply_groups(denominator, b)?);
        } else if shape_a != GroupShape::Div {
            // dividing by a fraction multiplies by its numerator's
            // inverse
            let idb = (1..b.len()).find(|&i| b[i].op == Op::Div).unwrap_or(b.len());
            if idb == b.len() {
                return Err(CalcError::DivideNull);
            }
            let mut denominator = b.split_off(idb);
            if b.is_empty() {
                return Err(CalcError::DivideNull);
            }
            if let Some(first) = denominator.first_mut() {
                first.op = Op::Mul;
            }
            new_stack = self.multiply_groups(a, denominator)?;
            new_stack.extend(b);
        } else {
            // (a/b) / (c/d) == (a/b) * (d/c)
            let idb = (1..b.len()).find(|&i| b[i].op == Op::Div).unwrap_or(b.len());
            if idb == b.len() {
                return Err(CalcError::DivideNull);
            }
            let mut flipped: Vec<Operand> = b[idb..].to_vec();
            if let Some(first) = flipped.first_mut() {
                first.op = Op::Mul;
            }
            flipped.extend(b[..idb].iter().cloned());
            new_stack = self.multiply_groups(a, flipped)?;
        }
        Ok(new_stack)
    }

    /// Bitwise operation between two reduced groups; one side must be a
    /// single operand and all units must agree.
    fn logical_groups(
        &mut self,
        mut a: Vec<Operand>,
        mut b: Vec<Operand>,
    ) -> Result<Vec<Operand>, CalcError> {
        if a.len() > 1 && b.len() > 1 {
            return Err(CalcError::LogicGroups);
        }
        let mut category = -1;
        let mut first_unit = String::new();
        for o in a.iter().chain(b.iter()) {
            if o.category() != category {
                if category < 0 {
                    category = o.category();
                    first_unit = o.abbrev().to_string();
                } else {
                    return Err(CalcError::LogicCategory(
                        first_unit,
                        o.abbrev().to_string(),
                    ));
                }
            }
        }
        let op = b[0].op;
        let fold = |x: f64, y: f64| -> f64 {
            let l1 = x as i64;
            let l2 = y as i64;
            match op {
                Op::And => (l1 & l2) as f64,
                Op::Or => (l1 | l2) as f64,
                _ => (l1 ^ l2) as f64,
            }
        };
        if a.len() == 1 {
            self.group_shape(&mut b)?;
            let v = a[0].value;
            for o in b.iter_mut() {
                if !o.placeholder {
                    o.value = fold(v, o.value);
                }
            }
            Ok(b)
        } else {
            self.group_shape(&mut a)?;
            let v = b[0].value;
            for o in a.iter_mut() {
                if !o.placeholder {
                    o.value = fold(o.value, v);
                }
            }
            Ok(a)
        }
    }

    /// Modulo of a reduced group by a single integer divisor, applied
    /// to every numerator term.
    fn modulo_group(
        &mut self,
        mut a: Vec<Operand>,
        mut b: Vec<Operand>,
    ) -> Result<Vec<Operand>, CalcError> {
        if b.len() > 1 {
            let mut reduced = b.clone();
            self.reduce_equation(&mut reduced)?;
            if reduced.len() > 1 {
                return Err(CalcError::ModuloGroup);
            }
            b = reduced;
        }
        if b[0].value.fract() != 0.0 {
            return Err(CalcError::ModuloGroupFraction(b[0].value));
        }
        for o in &a {
            if b[0].unit.is_some() && o.category() != b[0].category() {
                return Err(CalcError::LogicUnits(
                    o.abbrev().to_string(),
                    '%',
                    b[0].abbrev().to_string(),
                ));
            }
        }
        if self.group_shape(&mut a)? == GroupShape::Div {
            a = self.fold_fraction(a)?;
        }
        let l2 = b[0].value as i64;
        if l2 == 0 {
            return Err(CalcError::DivideByZero);
        }
        for o in a.iter_mut() {
            if !o.placeholder {
                if o.op == Op::Div {
                    break;
                }
                let l1 = o.value as i64;
                let d = o.value - l1 as f64;
                o.value = (l1 % l2) as f64 + d;
            }
        }
        Ok(a)
    }

    /// Raise a reduced group to a single unitless power. Compound
    /// groups multiply out, so their exponent must be an integer.
    fn power_group(
        &mut self,
        mut a: Vec<Operand>,
        mut b: Vec<Operand>,
    ) -> Result<Vec<Operand>, CalcError> {
        if b.len() > 1 {
            let mut reduced = b.clone();
            self.reduce_equation(&mut reduced)?;
            if reduced.len() > 1 {
                return Err(CalcError::PowerGroup);
            }
            b = reduced;
        }
        if b[0].unit.is_some() {
            return Err(CalcError::PowerGroupUnit(b[0].abbrev().to_string()));
        }
        self.reduce_equation(&mut a)?;
        if self.group_shape(&mut a)? == GroupShape::Div {
            a = self.fold_fraction(a)?;
        }
        if a.len() == 1 {
            let e = b[0].value;
            a[0].value = a[0].value.powf(e);
            if a[0].unit.is_some() {
                a[0].set_power(e as i32);
            }
            return Ok(a);
        }
        if b[0].value.fract() != 0.0 {
            return Err(CalcError::FractionalExponent);
        }
        let base = a.clone();
        let mut acc = a;
        let mut i = 1;
        while (i as f64) < b[0].value {
            acc = self.multiply_groups(acc, base.clone())?;
            i += 1;
        }
        Ok(acc)
    }

    /// Fold a fraction before modulo or power: inline when numerator
    /// and denominator share one unit, otherwise through the division
    /// combinator.
    fn fold_fraction(&mut self, mut a: Vec<Operand>) -> Result<Vec<Operand>, CalcError> {
        if a.len() == 2 && a[0].abbrev() == a[1].abbrev() && a[0].power() == a[1].power() {
            a[0].value /= a[1].value;
            a.truncate(1);
            return Ok(a);
        }
        let split = (1..a.len()).find(|&i| a[i].op == Op::Div).unwrap_or(a.len());
        let denominator = a.split_off(split);
        self.divide_groups(a, denominator)
    }

    /// Apply a function group to its reduced argument. `!` negates
    /// every real term; everything else needs a single plain value.
    fn function_group(
        &mut self,
        f: Func,
        mut stack: Vec<Operand>,
    ) -> Result<Vec<Operand>, CalcError> {
        self.reduce_equation(&mut stack)?;
        if stack.is_empty() {
            return Err(CalcError::FunctionArg(f.code()));
        }
        match f {
            Func::Not => {
                for o in stack.iter_mut().skip(1) {
                    if !o.placeholder {
                        o.value = !(o.value as i64) as f64;
                    }
                }
            }
            Func::Sqrt => {
                for o in stack.iter().skip(1) {
                    if !o.placeholder {
                        let mut text = num_text(o.value);
                        text.push_str(o.abbrev());
                        if o.power() > 1 {
                            text.push_str(&format!("^{}", o.power()));
                        }
                        return Err(CalcError::FunctionUnit(f.code(), text));
                    }
                }
            }
            _ => {
                if true_size(&stack) > 1 {
                    return Err(CalcError::FunctionArg(f.code()));
                }
            }
        }
        function::apply(f, &mut stack[0])?;
        Ok(stack)
    }

    /// Final normalization: bring the denominator to its smallest
    /// value, cancel units across the division, promote placeholders
    /// left without an owner and re-check logic operands.
    pub(crate) fn reduce_final(&mut self, stack: &mut Vec<Operand>) -> Result<(), CalcError> {
        let categories = stack
            .iter()
            .map(|o| o.category() + 1)
            .max()
            .unwrap_or(0)
            .max(0) as usize;
        let mut id = stack
            .iter()
            .position(|o| o.op == Op::Div)
            .unwrap_or(stack.len());
        if id < stack.len() {
            // divide everything by the smallest denominator value
            let mut min_d = stack[id].value;
            for o in &stack[id + 1..] {
                if !o.placeholder && min_d > o.value {
                    min_d = o.value;
                }
            }
            stack[0].value /= min_d;
            for o in &mut stack[1..] {
                if !o.placeholder && matches!(o.op, Op::None | Op::Div | Op::Add | Op::Sub) {
                    o.value /= min_d;
                }
            }
            let mut power_diff = vec![0i32; categories];
            let mut den_count = 0;
            for o in &stack[id..] {
                if let Some(u) = &o.unit {
                    if power_diff[u.category] < u.power {
                        power_diff[u.category] = u.power;
                    }
                }
                if !o.placeholder {
                    den_count += 1;
                }
            }
            if den_count == 1 {
                let mut numerator_count = 0;
                for o in &stack[..id] {
                    if let Some(u) = &o.unit {
                        if power_diff[u.category] < u.power {
                            power_diff[u.category] = u.power;
                        }
                    }
                    if !o.placeholder {
                        numerator_count += 1;
                    }
                }
                let mut idx = id;
                let mut guard = 0;
                while idx < stack.len() {
                    guard += 1;
                    if guard > 50 {
                        break;
                    }
                    let cat = stack[idx].category();
                    let mut matches = 0;
                    for i in 0..id {
                        if cat >= 0 && cat == stack[i].category() {
                            let k = stack[i].power() - stack[idx].power();
                            if k < power_diff[cat as usize] {
                                power_diff[cat as usize] = k;
                            }
                            matches += 1;
                        }
                    }
                    if cat < 0 || matches != numerator_count {
                        idx += 1;
                        continue;
                    }
                    // cancel the denominator unit against every
                    // matching numerator unit
                    let diff = power_diff[cat as usize];
                    let mut i = 0;
                    while i < id {
                        if stack[i].category() == cat {
                            let p = if diff >= 0 {
                                stack[i].power() - stack[idx].power()
                            } else {
                                stack[i].power() + diff
                            };
                            stack[i].set_power(p);
                            if stack[i].power() == 0 {
                                if i + 1 == id {
                                    stack[i].unit = None;
                                } else if stack[i].placeholder {
                                    stack.remove(i);
                                    idx -= 1;
                                    id -= 1;
                                } else if stack[i + 1].placeholder {
                                    stack[i + 1].placeholder = false;
                                    stack[i + 1].value = stack[i].value;
                                    stack[i + 1].op = stack[i].op;
                                    stack.remove(i);
                                    idx -= 1;
                                    id -= 1;
                                } else {
                                    stack[i].unit = None;
                                }
                            }
                        }
                        i += 1;
                    }
                    if diff >= 0 {
                        if !stack[idx].placeholder && idx + 1 < stack.len() {
                            stack[idx + 1].placeholder = false;
                            stack[idx + 1].value = stack[idx].value;
                            stack[idx + 1].op = stack[idx].op;
                        }
                        stack.remove(idx);
                    } else {
                        let p = stack[idx].power() + diff;
                        stack[idx].set_power(p);
                    }
                }
            }
            // a denominator reduced to a bare 1 disappears
            if id == stack.len() - 1 && stack[id].unit.is_none() && stack[id].value == 1.0 {
                stack.remove(id);
            }
        }
        // the first operand of a compound-unit group must carry a unit
        let mut idx = 0;
        while idx + 1 < stack.len() {
            if stack[idx].unit.is_none() && stack[idx + 1].placeholder {
                if stack[idx + 1].op == Op::Mul {
                    stack[idx + 1].value *= stack[idx].value;
                } else {
                    let l1 = stack[idx].value as i64;
                    let l2 = stack[idx + 1].value as i64;
                    stack[idx + 1].value = match stack[idx + 1].op {
                        Op::And => (l1 & l2) as f64,
                        Op::Or => (l1 | l2) as f64,
                        Op::Xor => (l1 ^ l2) as f64,
                        _ => stack[idx + 1].value,
                    };
                }
                stack[idx + 1].op = stack[idx].op;
                stack[idx + 1].placeholder = false;
                stack.remove(idx);
            } else if stack[idx + 1].unit.is_none() && stack[idx + 1].placeholder {
                stack.remove(idx + 1);
            } else {
                idx += 1;
            }
        }
        self.reduce_equation(stack)?;
        // final consolidation of signs and trailing unit carriers
        let mut idx = 0;
        while idx < stack.len() {
            if !stack[idx].placeholder
                && !stack[idx].base.is_text()
                && stack[idx].op == Op::Add
                && stack[idx].value < 0.0
            {
                stack[idx].op = Op::Sub;
                stack[idx].value = -stack[idx].value;
            }
            let mut i = idx + 1;
            while i < stack.len() && stack[i].placeholder {
                if stack[idx].category() == stack[i].category() {
                    let p = stack[idx].power() + stack[i].power();
                    stack[idx].set_power(p);
                    stack.remove(i);
                } else {
                    i += 1;
                }
            }
            idx += 1;
        }
        // logic operations may not span unit categories
        let mut category = -1;
        let mut first_unit = String::new();
        for o in stack.iter() {
            if o.category() != category {
                if category < 0 {
                    category = o.category();
                    first_unit = o.abbrev().to_string();
                } else if o.op.is_logic() {
                    return Err(CalcError::LogicUnits(
                        first_unit,
                        o.op.symbol_char(),
                        o.abbrev().to_string(),
                    ));
                }
            }
        }
        self.note("final", stack);
        Ok(())
    }
}

fn verify_ops(stack: &[Operand], from: usize) -> Result<(), CalcError> {
    let mut seen = Op::None;
    for o in &stack[from..] {
        if o.placeholder {
            continue;
        }
        if seen == Op::None {
            seen = o.op;
        } else if o.op != seen && !o.op.same_family(seen) {
            return Err(CalcError::InconsistentOperator(
                seen.symbol_char(),
                o.op.symbol_char(),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::Parser;
    use reckon_units::{Catalog, UnitRegistry};

    fn registry() -> UnitRegistry {
        UnitRegistry::from_catalog(&Catalog::builtin()).unwrap()
    }

    fn eval(eq: &str) -> Result<Vec<Operand>, CalcError> {
        let reg = registry();
        let parsed = Parser::new(eq, &reg).parse()?;
        let mut root = parsed.root;
        convert_units(&mut root, reg.category_count());
        let mut reducer = Reducer::new();
        let mut stack = reducer.reduce_tree(root)?;
        if stack.len() > 1 {
            reducer.reduce_final(&mut stack)?;
        }
        Ok(stack)
    }

    fn single(eq: &str) -> Operand {
        let stack = eval(eq).unwrap();
        assert_eq!(stack.len(), 1, "expected a single result for {eq}");
        stack.into_iter().next().unwrap()
    }

    #[test]
    fn test_no_precedence_left_to_right() {
        assert_eq!(single("2+3*4").value, 20.0);
        assert_eq!(single("2 + 3 - 1").value, 4.0);
        assert_eq!(single("20 / 4").value, 5.0);
        // operators after a bare division apply to the quotient
        assert_eq!(single("10/2+3").value, 8.0);
        assert_eq!(single("10/2*4").value, 20.0);
        assert_eq!(single("10 / 2 - 1").value, 4.0);
    }

    #[test]
    fn test_units_convert_to_finest() {
        let o = single("5 mi + 3 ft");
        assert_eq!(o.value, 26403.0);
        assert_eq!(o.abbrev(), "ft");

        let o = single("12 in + 2 ft");
        assert_eq!(o.value, 36.0);
        assert_eq!(o.abbrev(), "in");
    }

    #[test]
    fn test_power_group_binds_left_side() {
        assert_eq!(single("(2+3)^2").value, 25.0);
        assert_eq!(single("2^(1+2)").value, 8.0);
        // the deferred exponent binds everything reduced so far
        assert_eq!(single("2*3^(1+2)").value, 216.0);
        // while an inline exponent binds only its neighbor
        assert_eq!(single("2*3^2").value, 18.0);
    }

    #[test]
    fn test_group_combination() {
        assert_eq!(single("(2+3)*(4+6)").value, 50.0);
        assert_eq!(single("2+(3*4)").value, 14.0);
        assert_eq!(single("10-(2+3)").value, 5.0);
        let o = single("(2 ft + 3 ft) * (1 + 4)");
        assert_eq!(o.value, 25.0);
        assert_eq!(o.abbrev(), "ft");
    }

    #[test]
    fn test_modulo() {
        assert_eq!(single("10 % 3").value, 1.0);
        assert_eq!(single("10.5 % 3").value, 1.5);
        assert_eq!(eval("10 % 3.5").unwrap_err(), CalcError::ModuloFraction(3.5));
        assert_eq!(single("(10+4) % 3").value, 2.0);
    }

    #[test]
    fn test_bitwise_chain() {
        assert_eq!(single("2 & 3 | 4").value, 6.0);
        assert_eq!(single("n1010 | n0101").value, 15.0);
        assert_eq!(single("(n1010 | n0101) & n1111").value, 15.0);
    }

    #[test]
    fn test_compound_unit_product() {
        let stack = eval("5 ft * 2 sec").unwrap();
        assert_eq!(display_stack(&stack), "10 ft*sec");
        assert_eq!(true_size(&stack), 1);
    }

    #[test]
    fn test_unreduced_fraction_normalizes() {
        let stack = eval("10 ft / 2 sec").unwrap();
        assert_eq!(display_stack(&stack), "5 ft / 1 sec");
    }

    #[test]
    fn test_fraction_units_cancel() {
        let o = single("(10 ft * 2 sec) / (2 sec)");
        assert_eq!(o.value, 10.0);
        assert_eq!(o.abbrev(), "ft");
    }

    #[test]
    fn test_function_groups() {
        assert!((single("S(1+2)").value - 3.0f64.sin()).abs() < 1e-12);
        assert_eq!(single("\\(20+5)").value, 5.0);
        assert_eq!(single("!(0)").value, -1.0);
        assert_eq!(
            eval("L(2 ft + 2 ft)").unwrap_err(),
            CalcError::FunctionUnit('L', "ft".to_string())
        );
    }

    #[test]
    fn test_same_group_units() {
        let a = eval("5 ft * 2 sec").unwrap();
        let b = eval("3 ft * 4 sec").unwrap();
        assert!(same_group_units(&a, 0, &b, 0));
        let c = eval("3 ft").unwrap();
        assert!(!same_group_units(&a, 0, &c, 0));
    }

    #[test]
    fn test_compound_unit_terms_add() {
        let stack = eval("(5 ft * 2 sec) + (3 ft * 4 sec)").unwrap();
        assert_eq!(true_size(&stack), 1);
        assert_eq!(stack[0].value, 22.0);
    }

    #[test]
    fn test_order_units_sorts_run_by_category() {
        let mut stack = eval("5 sec * 2 ft").unwrap();
        order_units(&mut stack);
        assert_eq!(stack.len(), 2);
        // value and operator stay on the new head
        assert_eq!(stack[0].value, 10.0);
        assert!(!stack[0].placeholder);
        assert!(stack[1].placeholder);
    }

    #[test]
    fn test_division_by_fraction_inverts() {
        assert_eq!(single("(3+3) / (3/4)").value, 8.0);
    }

    #[test]
    fn test_negative_results_render_subtracted() {
        let stack = eval("2 ft - 5 ft + 1 sec").unwrap();
        assert_eq!(display_stack(&stack), "-3 ft + 1 sec");
    }

    #[test]
    fn test_group_power_requires_integer_exponent() {
        assert_eq!(
            eval("(2 ft + 3 sec)^1.5").unwrap_err(),
            CalcError::FractionalExponent
        );
        assert_eq!(eval("(2+3)^2.5").unwrap().len(), 1);
    }

    #[test]
    fn test_logic_group_errors() {
        assert_eq!(
            eval("(2 ft + 3 sec) & (4 ft + 5 sec)").unwrap_err(),
            CalcError::LogicGroups
        );
    }
}
