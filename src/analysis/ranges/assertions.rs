//! Runtime assertions of inferred ranges.

use crate::{
    analysis::ranges::{Range, RangeAnalysis},
    mir::{DefId, MirOp},
    Result,
};

impl RangeAnalysis<'_> {
    /// Inserts an `AssertRange` after every definition whose range says more than its
    /// type, so that executing the graph checks the analysis.
    pub fn add_range_assertions(&mut self) -> Result<()> {
        let mut targets: Vec<(DefId, Range)> = Vec::new();
        for block in self.graph.reverse_postorder() {
            if self.graph.block(block).is_unreachable() {
                continue;
            }
            for def in self.graph.definitions(block) {
                let d = self.graph.def(def);
                if matches!(
                    d.op(),
                    MirOp::Constant(_) | MirOp::Beta(_) | MirOp::AssertRange(_)
                ) || d.is_control()
                {
                    continue;
                }
                let Some(&range) = d.range() else {
                    continue;
                };
                if Range::for_type(d.ty()) == Some(range) {
                    continue;
                }
                targets.push((def, range));
            }
        }

        for (def, range) in targets {
            let ty = self.graph.def(def).ty();
            let assertion = self
                .graph
                .insert_after(def, MirOp::AssertRange(range), ty, vec![def])?;
            self.graph.def_mut(assertion).range = Some(range);
            log::trace!("{assertion}: assert {def} in {range}");
            self.stats.assertions_inserted += 1;
        }
        log::debug!("inserted {} range assertions", self.stats.assertions_inserted);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::OptimizationConfig,
        mir::{verify_graph, CompareOp, Graph, MirType},
        test::{
            array_sum_loop, counted_loop,
            interp::{run, Outcome, Value},
            XorShift64,
        },
    };

    fn assert_ranges(graph: &mut Graph) -> Result<usize> {
        let config = OptimizationConfig::default().with_range_assertions(true);
        let stats = RangeAnalysis::new(graph, config).run()?;
        verify_graph(graph)?;
        Ok(stats.assertions_inserted)
    }

    const INT_OPS: [MirOp; 11] = [
        MirOp::Add,
        MirOp::Sub,
        MirOp::Mul,
        MirOp::Div,
        MirOp::Mod,
        MirOp::BitAnd,
        MirOp::BitOr,
        MirOp::BitXor,
        MirOp::Lsh,
        MirOp::Rsh,
        MirOp::Max,
    ];

    const DOUBLE_OPS: [MirOp; 8] = [
        MirOp::Add,
        MirOp::Sub,
        MirOp::Mul,
        MirOp::Div,
        MirOp::Mod,
        MirOp::Min,
        MirOp::Ursh,
        MirOp::Max,
    ];

    // Straight-line arithmetic over two int32 and one double parameter, followed by a
    // branch on one of the results and a join.
    fn random_program(rng: &mut XorShift64) -> Result<Graph> {
        let mut g = Graph::new();
        let entry = g.new_entry_block(1)?;
        let mut ints = vec![
            g.parameter(entry, 0, MirType::Int32)?,
            g.parameter(entry, 1, MirType::Int32)?,
            g.constant_i32(entry, rng.range_i32(-100, 100))?,
        ];
        let mut doubles = vec![
            g.parameter(entry, 2, MirType::Double)?,
            g.constant_f64(entry, 0.5)?,
        ];
        for _ in 0..12 {
            let lhs = *rng.pick(&ints);
            let rhs = *rng.pick(&ints);
            match rng.below(5) {
                0 | 1 => {
                    let op = rng.pick(&INT_OPS).clone();
                    ints.push(g.binary(entry, op, lhs, rhs, MirType::Int32)?);
                }
                2 => {
                    let x = *rng.pick(&doubles);
                    let op = rng.pick(&DOUBLE_OPS).clone();
                    doubles.push(g.binary(entry, op, x, lhs, MirType::Double)?);
                }
                3 => {
                    let x = *rng.pick(&doubles);
                    let op = rng.pick(&[MirOp::Floor, MirOp::Abs, MirOp::Sqrt, MirOp::Ceil]).clone();
                    doubles.push(g.unary(entry, op, x, MirType::Double)?);
                }
                _ => {
                    doubles.push(g.unary(entry, MirOp::ToDouble, lhs, MirType::Double)?);
                    ints.push(g.unary(entry, MirOp::BitNot, rhs, MirType::Int32)?);
                }
            }
        }

        let value = *rng.pick(&ints);
        let bound = g.constant_i32(entry, rng.range_i32(-50, 50))?;
        let op = *rng.pick(&[CompareOp::Lt, CompareOp::Le, CompareOp::Gt, CompareOp::Ge, CompareOp::Eq]);
        let cond = g.compare(entry, op, value, bound)?;
        let then_block = g.new_block(Some(entry))?;
        let else_block = g.new_block(Some(entry))?;
        g.test(entry, cond, then_block, else_block)?;

        let diff = g.binary(then_block, MirOp::Sub, value, bound, MirType::Int32)?;
        g.set_slot(then_block, 0, diff);
        let one = g.constant_i32(else_block, 1)?;
        let masked = g.binary(else_block, MirOp::BitAnd, value, one, MirType::Int32)?;
        g.set_slot(else_block, 0, masked);

        let join = g.new_block(Some(then_block))?;
        g.goto(then_block, join)?;
        g.goto(else_block, join)?;
        g.add_predecessor(join, else_block)?;
        let merged = g.slot(join, 0);
        let x = *rng.pick(&doubles);
        let result = g.binary(join, MirOp::Add, merged, x, MirType::Double)?;
        g.ret(join, result)?;
        Ok(g)
    }

    fn random_int(rng: &mut XorShift64) -> f64 {
        let edges = [i32::MIN, i32::MIN + 1, -1, 0, 1, 31, 32, i32::MAX];
        if rng.chance(1, 3) {
            f64::from(*rng.pick(&edges))
        } else {
            f64::from(rng.range_i32(-1000, 1000))
        }
    }

    fn random_double(rng: &mut XorShift64) -> f64 {
        let edges = [f64::NAN, f64::INFINITY, f64::NEG_INFINITY, -0.0, 0.5, -1.5, 1e300];
        if rng.chance(1, 3) {
            *rng.pick(&edges)
        } else {
            f64::from(rng.range_i32(-1000, 1000)) / 8.0
        }
    }

    #[test]
    fn test_assertions_hold_on_loops() -> Result<()> {
        let mut counted = counted_loop(10)?;
        assert!(assert_ranges(&mut counted.graph)? > 0);
        assert!(run(&counted.graph, &[]).same_as(&Outcome::Returned(Value::Number(10.0))));

        let mut sum = array_sum_loop()?;
        assert_ranges(&mut sum.graph)?;
        for n in [0usize, 1, 4] {
            let args = [Value::Array(vec![2.0; n])];
            let expected = Outcome::Returned(Value::Number(2.0 * n as f64));
            assert!(run(&sum.graph, &args).same_as(&expected));
        }
        Ok(())
    }

    #[test]
    fn test_inferred_ranges_hold_at_runtime() -> Result<()> {
        let mut rng = XorShift64::new(0x5eed);
        for round in 0..60 {
            let mut g = random_program(&mut rng)?;
            assert_ranges(&mut g)?;
            for _ in 0..40 {
                let args = [
                    Value::Number(random_int(&mut rng)),
                    Value::Number(random_int(&mut rng)),
                    Value::Number(random_double(&mut rng)),
                ];
                let outcome = run(&g, &args);
                assert!(
                    !matches!(outcome, Outcome::AssertionFailed(_)),
                    "round {round}: {outcome:?} for {args:?}"
                );
            }
        }
        Ok(())
    }
}
