#![no_main]

use jitmir::{
    mir::{verify_graph, BlockId, DefId, MirOp},
    CompareOp, Graph, MirType, OptimizationConfig, Pipeline, Result,
};
use libfuzzer_sys::fuzz_target;

const SLOTS: usize = 2;

struct Bytes<'a> {
    data: &'a [u8],
}

impl Bytes<'_> {
    fn next(&mut self) -> Option<u8> {
        let (&first, rest) = self.data.split_first()?;
        self.data = rest;
        Some(first)
    }

    fn int(&mut self) -> i32 {
        let bytes = [
            self.next().unwrap_or(0),
            self.next().unwrap_or(0),
            self.next().unwrap_or(0),
            self.next().unwrap_or(0),
        ];
        i32::from_le_bytes(bytes)
    }
}

const ARITHMETIC: [MirOp; 8] = [
    MirOp::Add,
    MirOp::Sub,
    MirOp::Mul,
    MirOp::BitAnd,
    MirOp::BitOr,
    MirOp::BitXor,
    MirOp::Lsh,
    MirOp::Rsh,
];

const COMPARISONS: [CompareOp; 4] = [CompareOp::Lt, CompareOp::Le, CompareOp::Gt, CompareOp::Ge];

/// Computes a new int32 value in `block` and stores it into a slot.
fn statement(graph: &mut Graph, block: BlockId, bytes: &mut Bytes<'_>) -> Result<()> {
    let choice = bytes.next().unwrap_or(0);
    let slot = usize::from(choice) % SLOTS;
    let lhs = graph.slot(block, slot);
    let rhs = graph.constant_i32(block, bytes.int())?;
    let op = ARITHMETIC[usize::from(choice >> 1) % ARITHMETIC.len()].clone();
    let value = graph.binary(block, op, lhs, rhs, MirType::Int32)?;
    graph.set_slot(block, slot, value);
    Ok(())
}

/// Condition for a branch: a constant, or a comparison of a slot against a constant.
fn condition(graph: &mut Graph, block: BlockId, bytes: &mut Bytes<'_>) -> Result<DefId> {
    let choice = bytes.next().unwrap_or(0);
    match choice % 4 {
        0 => graph.constant_bool(block, choice & 0x10 != 0),
        _ => {
            let slot = usize::from(choice >> 2) % SLOTS;
            let lhs = graph.slot(block, slot);
            let rhs = graph.constant_i32(block, bytes.int())?;
            let op = COMPARISONS[usize::from(choice >> 4) % COMPARISONS.len()];
            graph.compare(block, op, lhs, rhs)
        }
    }
}

/// Builds a structured function from the fuzzer input: straight-line code, diamonds and
/// counted loops, nested up to a small depth.
fn region(
    graph: &mut Graph,
    mut block: BlockId,
    bytes: &mut Bytes<'_>,
    depth: u32,
) -> Result<BlockId> {
    while let Some(kind) = bytes.next() {
        match kind % 5 {
            0 | 1 => statement(graph, block, bytes)?,
            2 if depth < 4 => {
                let cond = condition(graph, block, bytes)?;
                let left = graph.new_block(Some(block))?;
                let right = graph.new_block(Some(block))?;
                graph.test(block, cond, left, right)?;
                let left_end = region(graph, left, bytes, depth + 1)?;
                let right_end = region(graph, right, bytes, depth + 1)?;
                let join = graph.new_block(Some(left_end))?;
                graph.goto(left_end, join)?;
                graph.goto(right_end, join)?;
                graph.add_predecessor(join, right_end)?;
                block = join;
            }
            3 if depth < 4 => {
                let limit = graph.constant_i32(block, bytes.int() & 0xff)?;
                let zero = graph.constant_i32(block, 0)?;
                let one = graph.constant_i32(block, 1)?;
                graph.set_slot(block, 0, zero);
                let header = graph.new_pending_loop_header(block)?;
                graph.goto(block, header)?;
                let i = graph.slot(header, 0);
                let cond = graph.compare(header, CompareOp::Lt, i, limit)?;
                let body = graph.new_block(Some(header))?;
                let exit = graph.new_block(Some(header))?;
                graph.test(header, cond, body, exit)?;
                let body_end = region(graph, body, bytes, depth + 1)?;
                let i = graph.slot(body_end, 0);
                let next = graph.binary(body_end, MirOp::Add, i, one, MirType::Int32)?;
                graph.set_slot(body_end, 0, next);
                graph.goto(body_end, header)?;
                graph.set_backedge(header, body_end)?;
                block = exit;
            }
            _ => break,
        }
    }
    Ok(block)
}

fn build(bytes: &mut Bytes<'_>) -> Result<Graph> {
    let mut graph = Graph::new();
    let entry = graph.new_entry_block(SLOTS)?;
    for slot in 0..SLOTS {
        let index = u32::try_from(slot).unwrap_or(0);
        let parameter = graph.parameter(entry, index, MirType::Int32)?;
        graph.set_slot(entry, slot, parameter);
    }
    let last = region(&mut graph, entry, bytes, 0)?;
    let result = graph.slot(last, 0);
    graph.ret(last, result)?;
    Ok(graph)
}

fuzz_target!(|data: &[u8]| {
    let Some((&flags, rest)) = data.split_first() else {
        return;
    };
    let mut bytes = Bytes { data: rest };
    let Ok(mut graph) = build(&mut bytes) else {
        return;
    };
    verify_graph(&graph).expect("builder produced a malformed graph");

    let config = OptimizationConfig::default()
        .with_range_assertions(flags & 1 != 0)
        .with_asmjs_like_mode(flags & 2 != 0);
    if Pipeline::new(config).run(&mut graph).is_ok() {
        verify_graph(&graph).expect("pipeline produced a malformed graph");
    }
});
