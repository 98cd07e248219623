//! Reference interpreter for MIR graphs.
//!
//! Optimization tests run a graph before and after a pass on the same inputs and compare
//! the outcomes. Numeric and boolean values are carried as `f64`; `Int32` definitions that
//! are not truncated bail out when their exact result is not an int32, truncated ones wrap.

use std::collections::HashMap;

use crate::mir::{BlockId, Constant, DefId, Graph, MirOp, MirType};

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Array(Vec<f64>),
    Undefined,
}

impl Value {
    fn number(&self) -> f64 {
        match self {
            Value::Number(v) => *v,
            Value::Array(_) | Value::Undefined => f64::NAN,
        }
    }

    fn truthy(&self) -> bool {
        match self {
            Value::Number(v) => *v != 0.0 && !v.is_nan(),
            Value::Array(_) => true,
            Value::Undefined => false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Returned(Value),
    Bailout(DefId),
    AssertionFailed(DefId),
    /// A load read outside its array: an unsafe bounds check removal.
    OutOfBounds(DefId),
    OutOfFuel,
}

impl Outcome {
    /// Observable equivalence: NaN matches NaN and the two zeros are told apart.
    pub fn same_as(&self, other: &Outcome) -> bool {
        match (self, other) {
            (Outcome::Returned(Value::Number(a)), Outcome::Returned(Value::Number(b))) => {
                (a.is_nan() && b.is_nan()) || a.to_bits() == b.to_bits()
            }
            (Outcome::Returned(a), Outcome::Returned(b)) => a == b,
            (Outcome::Bailout(_), Outcome::Bailout(_)) | (Outcome::OutOfFuel, Outcome::OutOfFuel) => {
                true
            }
            _ => false,
        }
    }

    pub fn is_bailout(&self) -> bool {
        matches!(self, Outcome::Bailout(_))
    }
}

pub fn to_int32(v: f64) -> i32 {
    if !v.is_finite() {
        return 0;
    }
    let wrapped = v.trunc().rem_euclid(4_294_967_296.0);
    (wrapped as u64 as u32) as i32
}

pub fn to_uint32(v: f64) -> u32 {
    to_int32(v) as u32
}

fn exact_int32(v: f64) -> Option<f64> {
    if v.fract() == 0.0 && v >= f64::from(i32::MIN) && v <= f64::from(i32::MAX) {
        // -0 collapses to +0
        Some(v + 0.0)
    } else {
        None
    }
}

/// Evaluates a side-effect free operation. Returns `None` when the definition bails out.
pub fn eval_pure(op: &MirOp, ty: MirType, truncated: bool, args: &[f64]) -> Option<f64> {
    let x = args.first().copied().unwrap_or(f64::NAN);
    let y = args.get(1).copied().unwrap_or(f64::NAN);
    let shift = to_uint32(y) & 31;
    let raw = match op {
        MirOp::Constant(c) => c.to_number(),
        MirOp::Add => x + y,
        MirOp::Sub => x - y,
        MirOp::Mul => x * y,
        MirOp::Div => x / y,
        MirOp::Mod => x % y,
        MirOp::BitAnd => f64::from(to_int32(x) & to_int32(y)),
        MirOp::BitOr => f64::from(to_int32(x) | to_int32(y)),
        MirOp::BitXor => f64::from(to_int32(x) ^ to_int32(y)),
        MirOp::BitNot => f64::from(!to_int32(x)),
        MirOp::Lsh => f64::from(to_int32(x).wrapping_shl(shift)),
        MirOp::Rsh => f64::from(to_int32(x) >> shift),
        MirOp::Ursh => f64::from(to_uint32(x) >> shift),
        MirOp::Abs => x.abs(),
        MirOp::Min | MirOp::Max if x.is_nan() || y.is_nan() => f64::NAN,
        MirOp::Min => {
            if x < y || (x == y && x.is_sign_negative()) {
                x
            } else {
                y
            }
        }
        MirOp::Max => {
            if x > y || (x == y && y.is_sign_negative()) {
                x
            } else {
                y
            }
        }
        MirOp::Floor => x.floor(),
        MirOp::Ceil => x.ceil(),
        MirOp::Sqrt => x.sqrt(),
        MirOp::ToDouble => x,
        MirOp::ToInt32 => exact_int32(x)?,
        MirOp::TruncateToInt32 => f64::from(to_int32(x)),
        MirOp::Compare(cmp) => f64::from(u8::from(cmp.evaluate(x, y))),
        MirOp::Not => f64::from(u8::from(x == 0.0 || x.is_nan())),
        _ => return None,
    };
    if truncated {
        return Some(f64::from(to_int32(raw)));
    }
    match ty {
        MirType::Int32 => exact_int32(raw),
        _ => Some(raw),
    }
}

/// Runs `graph` from its entry block.
pub fn run(graph: &Graph, args: &[Value]) -> Outcome {
    Interpreter::new(graph, args, &[]).execute(graph.entry_block())
}

/// Runs `graph` from its OSR block with the given slot values.
pub fn run_osr(graph: &Graph, args: &[Value], osr_values: &[Value]) -> Outcome {
    Interpreter::new(graph, args, osr_values).execute(graph.osr_block())
}

struct Interpreter<'g> {
    graph: &'g Graph,
    args: &'g [Value],
    osr_values: &'g [Value],
    values: HashMap<DefId, Value>,
    fuel: usize,
}

impl<'g> Interpreter<'g> {
    fn new(graph: &'g Graph, args: &'g [Value], osr_values: &'g [Value]) -> Self {
        Interpreter {
            graph,
            args,
            osr_values,
            values: HashMap::new(),
            fuel: 100_000,
        }
    }

    fn get(&self, def: DefId) -> Value {
        self.values.get(&def).cloned().unwrap_or(Value::Undefined)
    }

    fn execute(mut self, start: Option<BlockId>) -> Outcome {
        let Some(mut block) = start else {
            return Outcome::OutOfFuel;
        };
        let graph = self.graph;
        let mut prev: Option<BlockId> = None;
        loop {
            if self.fuel == 0 {
                return Outcome::OutOfFuel;
            }
            self.fuel -= 1;

            let b = graph.block(block);
            if let Some(pred) = prev {
                let index = b
                    .predecessor_index(pred)
                    .unwrap_or_else(|| panic!("{pred} is not a predecessor of {block}"));
                let incoming: Vec<(DefId, Value)> = b
                    .phis()
                    .iter()
                    .map(|&phi| (phi, self.get(graph.def(phi).operand(index))))
                    .collect();
                self.values.extend(incoming);
            }

            for &ins in b.instructions() {
                let def = graph.def(ins);
                match def.op() {
                    MirOp::Goto(target) => {
                        prev = Some(block);
                        block = *target;
                    }
                    MirOp::Test { if_true, if_false } => {
                        prev = Some(block);
                        block = if self.get(def.operand(0)).truthy() {
                            *if_true
                        } else {
                            *if_false
                        };
                    }
                    MirOp::Return => return Outcome::Returned(self.get(def.operand(0))),
                    _ => {
                        if let Err(outcome) = self.step(ins) {
                            return outcome;
                        }
                    }
                }
            }
        }
    }

    fn guard_passes(&self, def: DefId, guard_index: usize) -> bool {
        let operands = self.graph.def(def).operands();
        operands
            .get(guard_index)
            .is_some_and(|&guard| !self.get(guard).truthy())
    }

    fn step(&mut self, ins: DefId) -> Result<(), Outcome> {
        let graph = self.graph;
        let def = graph.def(ins);
        let value = match def.op() {
            MirOp::Constant(Constant::Undefined) => Value::Undefined,
            MirOp::Parameter(n) => self.args.get(*n as usize).cloned().unwrap_or(Value::Undefined),
            MirOp::OsrValue(n) => self
                .osr_values
                .get(*n as usize)
                .cloned()
                .unwrap_or(Value::Undefined),
            MirOp::Beta(_) => self.get(def.operand(0)),
            MirOp::AssertRange(range) => {
                let v = self.get(def.operand(0)).number();
                if !range.contains(v) {
                    return Err(Outcome::AssertionFailed(ins));
                }
                Value::Number(v)
            }
            MirOp::ArrayLength => match self.get(def.operand(0)) {
                Value::Array(items) => Value::Number(items.len() as f64),
                _ => return Err(Outcome::Bailout(ins)),
            },
            MirOp::LoadElement => {
                let index = self.get(def.operand(1)).number();
                match self.get(def.operand(0)) {
                    Value::Array(items) if index >= 0.0 && (index as usize) < items.len() => {
                        Value::Number(items[index as usize])
                    }
                    _ => return Err(Outcome::OutOfBounds(ins)),
                }
            }
            MirOp::BoundsCheck => {
                let index = self.get(def.operand(0)).number();
                if !self.guard_passes(ins, 2) {
                    let length = self.get(def.operand(1)).number();
                    if !(index >= 0.0 && index < length) {
                        return Err(Outcome::Bailout(ins));
                    }
                }
                Value::Number(index)
            }
            MirOp::BoundsCheckLower { minimum } => {
                let index = self.get(def.operand(0)).number();
                if !self.guard_passes(ins, 1) && !(index >= f64::from(*minimum)) {
                    return Err(Outcome::Bailout(ins));
                }
                Value::Number(index)
            }
            op => {
                let args: Vec<f64> = def
                    .operands()
                    .iter()
                    .map(|&o| self.get(o).number())
                    .collect();
                match eval_pure(op, def.ty(), def.is_truncated(), &args) {
                    Some(v) => Value::Number(v),
                    None => return Err(Outcome::Bailout(ins)),
                }
            }
        };
        self.values.insert(ins, value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::{array_sum_loop, counted_loop};

    #[test]
    fn test_to_int32() {
        assert_eq!(to_int32(4_294_967_296.0 + 5.0), 5);
        assert_eq!(to_int32(2_147_483_648.0), i32::MIN);
        assert_eq!(to_int32(-1.5), -1);
        assert_eq!(to_int32(f64::NAN), 0);
        assert_eq!(to_uint32(-1.0), u32::MAX);
    }

    #[test]
    fn test_int32_overflow_bails_unless_truncated() {
        let big = f64::from(i32::MAX);
        assert_eq!(eval_pure(&MirOp::Add, MirType::Int32, false, &[big, 1.0]), None);
        assert_eq!(
            eval_pure(&MirOp::Add, MirType::Int32, true, &[big, 1.0]),
            Some(f64::from(i32::MIN))
        );
        assert_eq!(
            eval_pure(&MirOp::Add, MirType::Double, false, &[big, 1.0]),
            Some(big + 1.0)
        );
    }

    #[test]
    fn test_run_loops() -> crate::Result<()> {
        let counted = counted_loop(7)?;
        assert!(run(&counted.graph, &[]).same_as(&Outcome::Returned(Value::Number(7.0))));

        let sum = array_sum_loop()?;
        let args = [Value::Array(vec![1.0, 2.0, 3.0])];
        assert!(run(&sum.graph, &args).same_as(&Outcome::Returned(Value::Number(6.0))));
        Ok(())
    }
}
