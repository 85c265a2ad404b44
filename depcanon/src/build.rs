// build.rs — Construction API for the program model
//
// Thin helpers over `Program::push_op` that create ops together with their
// results, regions and block arguments in the shapes the analysis expects.
// Used by the driver's tests, the benchmark and every scenario test.
//
// Preconditions: operand ids passed in belong to the same program.
// Postconditions: loop, conditional and reduce bodies are left open; the
//   caller closes them with `yield_` / `reduce`. Hierarchy bodies and execute
//   bodies are closed automatically.
// Failure modes: none (construction is infallible; verification happens in
//   the passes).
// Side effects: none.

use crate::id::{BlockId, OpId, ValueId};
use crate::ir::{
    Block, ChannelDecl, HierarchyLevel, MemAccess, OpKind, Program, ValueDef, ValueType,
};

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl Program {
    /// Empty program with one top-level body block.
    pub fn new() -> Self {
        Self {
            values: Vec::new(),
            ops: Vec::new(),
            blocks: vec![Block::default()],
            body: BlockId(0),
            channels: Vec::new(),
        }
    }

    /// A function argument of the top-level body.
    pub fn add_input(&mut self, ty: ValueType) -> ValueId {
        self.add_block_arg(self.body, ty)
    }

    pub fn constant(&mut self, c: i64) -> ValueId {
        self.new_value(ValueType::Index, ValueDef::Constant(c))
    }

    pub fn declare_channel(
        &mut self,
        name: &str,
        size: Vec<i64>,
        broadcast_shape: Option<Vec<i64>>,
    ) {
        self.channels.push(ChannelDecl {
            name: name.to_string(),
            size,
            broadcast_shape,
        });
    }

    // ── Async events ───────────────────────────────────────────────────────

    pub fn dma(
        &mut self,
        block: BlockId,
        deps: Vec<ValueId>,
        dst: MemAccess,
        src: MemAccess,
    ) -> OpId {
        self.push_op(block, OpKind::Dma { dst, src }, deps, &[ValueType::Token])
    }

    pub fn channel_put(
        &mut self,
        block: BlockId,
        deps: Vec<ValueId>,
        channel: &str,
        src: MemAccess,
    ) -> OpId {
        let kind = OpKind::ChannelPut {
            channel: channel.to_string(),
            src,
        };
        self.push_op(block, kind, deps, &[ValueType::Token])
    }

    pub fn channel_get(
        &mut self,
        block: BlockId,
        deps: Vec<ValueId>,
        channel: &str,
        dst: MemAccess,
    ) -> OpId {
        let kind = OpKind::ChannelGet {
            channel: channel.to_string(),
            dst,
        };
        self.push_op(block, kind, deps, &[ValueType::Token])
    }

    pub fn wait_all(&mut self, block: BlockId, deps: Vec<ValueId>) -> OpId {
        self.push_op(block, OpKind::WaitAll, deps, &[ValueType::Token])
    }

    /// A blocking host-side wait with no result token.
    pub fn wait_all_sync(&mut self, block: BlockId, deps: Vec<ValueId>) -> OpId {
        self.push_op(block, OpKind::WaitAll, deps, &[])
    }

    /// A compute bundle. `body` receives the open execute block and returns
    /// the values for the execute terminator.
    pub fn execute(
        &mut self,
        block: BlockId,
        deps: Vec<ValueId>,
        value_ty: Option<ValueType>,
        body: impl FnOnce(&mut Program, BlockId) -> Vec<ValueId>,
    ) -> OpId {
        let mut tys = vec![ValueType::Token];
        tys.extend(value_ty);
        let exec = self.push_op(block, OpKind::Execute, deps, &tys);
        let inner = self.add_region(exec);
        let operands = body(self, inner);
        self.push_op(inner, OpKind::ExecuteTerminator { operands }, vec![], &[]);
        exec
    }

    // ── Execute primitives ─────────────────────────────────────────────────

    pub fn alloc(&mut self, block: BlockId, ty: ValueType) -> ValueId {
        let op = self.push_op(block, OpKind::Alloc, vec![], &[ty]);
        self.op(op).results[0]
    }

    pub fn dealloc(&mut self, block: BlockId, memref: ValueId) -> OpId {
        self.push_op(block, OpKind::Dealloc { memref }, vec![], &[])
    }

    pub fn copy(&mut self, block: BlockId, source: ValueId, target: ValueId) -> OpId {
        self.push_op(block, OpKind::Copy { source, target }, vec![], &[])
    }

    pub fn linalg(
        &mut self,
        block: BlockId,
        name: &str,
        inputs: Vec<ValueId>,
        outputs: Vec<ValueId>,
    ) -> OpId {
        let kind = OpKind::Linalg {
            name: name.to_string(),
            inputs,
            outputs,
        };
        self.push_op(block, kind, vec![], &[])
    }

    pub fn affine_apply(&mut self, block: BlockId, operands: Vec<ValueId>) -> ValueId {
        let op = self.push_op(block, OpKind::AffineApply { operands }, vec![], &[ValueType::Index]);
        self.op(op).results[0]
    }

    pub fn muli(&mut self, block: BlockId, lhs: ValueId, rhs: ValueId) -> ValueId {
        let op = self.push_op(block, OpKind::MulI { lhs, rhs }, vec![], &[ValueType::Index]);
        self.op(op).results[0]
    }

    pub fn addi(&mut self, block: BlockId, lhs: ValueId, rhs: ValueId) -> ValueId {
        let op = self.push_op(block, OpKind::AddI { lhs, rhs }, vec![], &[ValueType::Index]);
        self.op(op).results[0]
    }

    pub fn opaque(
        &mut self,
        block: BlockId,
        name: &str,
        operands: Vec<ValueId>,
        result_types: &[ValueType],
    ) -> OpId {
        let kind = OpKind::Opaque {
            name: name.to_string(),
            operands,
        };
        self.push_op(block, kind, vec![], result_types)
    }

    // ── Structured control ─────────────────────────────────────────────────

    /// A sequential loop. Results mirror the iteration operands; the body
    /// gets `[iv, iter args...]` and must be closed with `yield_`.
    pub fn scf_for(
        &mut self,
        block: BlockId,
        lower: ValueId,
        upper: ValueId,
        step: ValueId,
        iter_operands: Vec<ValueId>,
    ) -> (OpId, BlockId) {
        let tys: Vec<ValueType> = iter_operands.iter().map(|&v| self.value_type(v)).collect();
        let kind = OpKind::For {
            lower,
            upper,
            step,
            iter_operands,
        };
        let op = self.push_op(block, kind, vec![], &tys);
        let body = self.add_region(op);
        self.add_block_arg(body, ValueType::Index);
        for ty in tys {
            self.add_block_arg(body, ty);
        }
        (op, body)
    }

    pub fn scf_for_const(
        &mut self,
        block: BlockId,
        lower: i64,
        upper: i64,
        step: i64,
        iter_operands: Vec<ValueId>,
    ) -> (OpId, BlockId) {
        let lower = self.constant(lower);
        let upper = self.constant(upper);
        let step = self.constant(step);
        self.scf_for(block, lower, upper, step, iter_operands)
    }

    /// A parallel loop. The body gets one induction var per dimension and
    /// must be closed with `reduce` (or `reduce_with_join`).
    pub fn scf_parallel(
        &mut self,
        block: BlockId,
        lower: Vec<ValueId>,
        upper: Vec<ValueId>,
        step: Vec<ValueId>,
        init_vals: Vec<ValueId>,
    ) -> (OpId, BlockId) {
        let tys: Vec<ValueType> = init_vals.iter().map(|&v| self.value_type(v)).collect();
        let dims = lower.len();
        let kind = OpKind::Parallel {
            lower,
            upper,
            step,
            init_vals,
        };
        let op = self.push_op(block, kind, vec![], &tys);
        let body = self.add_region(op);
        for _ in 0..dims {
            self.add_block_arg(body, ValueType::Index);
        }
        (op, body)
    }

    pub fn yield_(&mut self, block: BlockId, operands: Vec<ValueId>) -> OpId {
        self.push_op(block, OpKind::Yield { operands }, vec![], &[])
    }

    pub fn reduce(&mut self, block: BlockId, operand: ValueId) -> OpId {
        self.push_op(block, OpKind::Reduce { operand }, vec![], &[])
    }

    /// A reduce whose combiner joins the two partial tokens with a wait_all.
    pub fn reduce_with_join(&mut self, block: BlockId, operand: ValueId) -> OpId {
        let red = self.reduce(block, operand);
        let combiner = self.add_region(red);
        let lhs = self.add_block_arg(combiner, ValueType::Token);
        let rhs = self.add_block_arg(combiner, ValueType::Token);
        let join = self.wait_all(combiner, vec![lhs, rhs]);
        let joined = self.op(join).results[0];
        self.push_op(combiner, OpKind::ReduceReturn { operand: joined }, vec![], &[]);
        red
    }

    /// A scope-opening hierarchy op. Body args are `[ids, size args, kernel
    /// args]`; the body is closed with its level's terminator.
    pub fn hierarchy(
        &mut self,
        block: BlockId,
        level: HierarchyLevel,
        deps: Vec<ValueId>,
        sizes: Vec<ValueId>,
        kernel_operands: Vec<ValueId>,
        is_async: bool,
    ) -> (OpId, BlockId) {
        let arg_tys: Vec<ValueType> = kernel_operands
            .iter()
            .map(|&v| self.value_type(v))
            .collect();
        let dims = sizes.len();
        let kind = OpKind::Hierarchy {
            level,
            sizes,
            kernel_operands,
        };
        let results: &[ValueType] = if is_async { &[ValueType::Token] } else { &[] };
        let op = self.push_op(block, kind, deps, results);
        let body = self.add_region(op);
        for _ in 0..2 * dims {
            self.add_block_arg(body, ValueType::Index);
        }
        for ty in arg_tys {
            self.add_block_arg(body, ty);
        }
        self.push_op(body, OpKind::HierarchyTerminator { level }, vec![], &[]);
        (op, body)
    }

    /// A conditional join with `then` and `else` blocks, both left open.
    pub fn affine_if(
        &mut self,
        block: BlockId,
        condition: Vec<ValueId>,
        result_types: &[ValueType],
    ) -> (OpId, BlockId, BlockId) {
        let op = self.push_op(block, OpKind::If { condition }, vec![], result_types);
        let then_block = self.add_region(op);
        let else_block = self.add_region(op);
        (op, then_block, else_block)
    }
}
