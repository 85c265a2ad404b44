// ir.rs — Program model: async events, tokens, buffers and nested blocks
//
// An arena-based SSA representation holding exactly what the dependency
// canonicalizer needs: event kinds with their dependency token lists,
// memref accesses with per-dimension offsets, loop and hierarchy regions,
// conditional joins and channel declarations.
//
// Preconditions: ops are created through `Program::push_op` (or the
//   builder in `build.rs`), which keeps `parent` links and block order
//   consistent.
// Postconditions: queries never mutate; mutations keep block order and
//   block-argument indices consistent.
// Failure modes: token-typed mutations on non-token values and list
//   mutations on non-async ops return `CanonError`.
// Side effects: none.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{CanonError, Result};
use crate::id::{BlockId, OpId, ValueId};

// ── Types ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemorySpace {
    L1,
    L2,
    L3,
}

impl fmt::Display for MemorySpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MemorySpace::L1 => "L1",
            MemorySpace::L2 => "L2",
            MemorySpace::L3 => "L3",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValueType {
    Token,
    Index,
    Memref { rank: u32, space: MemorySpace },
}

impl ValueType {
    pub fn is_token(self) -> bool {
        matches!(self, ValueType::Token)
    }

    pub fn is_index(self) -> bool {
        matches!(self, ValueType::Index)
    }

    pub fn is_memref(self) -> bool {
        matches!(self, ValueType::Memref { .. })
    }
}

/// Where an SSA value comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueDef {
    OpResult { op: OpId, index: u32 },
    BlockArg { block: BlockId, index: u32 },
    Constant(i64),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Value {
    pub ty: ValueType,
    pub def: ValueDef,
}

/// A memref operand with optional per-dimension offsets, sizes and strides.
///
/// Empty `offsets` means the whole buffer is accessed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemAccess {
    pub memref: ValueId,
    #[serde(default)]
    pub offsets: Vec<ValueId>,
    #[serde(default)]
    pub sizes: Vec<ValueId>,
    #[serde(default)]
    pub strides: Vec<ValueId>,
}

impl MemAccess {
    pub fn whole(memref: ValueId) -> Self {
        Self {
            memref,
            offsets: Vec::new(),
            sizes: Vec::new(),
            strides: Vec::new(),
        }
    }

    pub fn at(memref: ValueId, offsets: Vec<ValueId>) -> Self {
        Self {
            memref,
            offsets,
            sizes: Vec::new(),
            strides: Vec::new(),
        }
    }

    /// Offsets, then sizes, then strides.
    pub fn scalars(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.offsets
            .iter()
            .chain(&self.sizes)
            .chain(&self.strides)
            .copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HierarchyLevel {
    Launch,
    Partition,
    Herd,
}

impl HierarchyLevel {
    pub fn name(self) -> &'static str {
        match self {
            HierarchyLevel::Launch => "launch",
            HierarchyLevel::Partition => "partition",
            HierarchyLevel::Herd => "herd",
        }
    }

    pub fn op_name(self) -> &'static str {
        match self {
            HierarchyLevel::Launch => "LaunchOp",
            HierarchyLevel::Partition => "PartitionOp",
            HierarchyLevel::Herd => "HerdOp",
        }
    }

    pub fn terminator_name(self) -> &'static str {
        match self {
            HierarchyLevel::Launch => "LaunchTerminator",
            HierarchyLevel::Partition => "PartitionTerminator",
            HierarchyLevel::Herd => "HerdTerminator",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelDecl {
    pub name: String,
    #[serde(default)]
    pub size: Vec<i64>,
    #[serde(default)]
    pub broadcast_shape: Option<Vec<i64>>,
}

/// The closed set of operation kinds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OpKind {
    Dma {
        dst: MemAccess,
        src: MemAccess,
    },
    ChannelPut {
        channel: String,
        src: MemAccess,
    },
    ChannelGet {
        channel: String,
        dst: MemAccess,
    },
    /// Compute bundle; its single region holds primitives and an
    /// `ExecuteTerminator`. Results are `[token, value?]`.
    Execute,
    WaitAll,
    /// Body args are `[induction var, iteration args...]`.
    For {
        lower: ValueId,
        upper: ValueId,
        step: ValueId,
        iter_operands: Vec<ValueId>,
    },
    /// Body args are the induction vars.
    Parallel {
        lower: Vec<ValueId>,
        upper: Vec<ValueId>,
        step: Vec<ValueId>,
        init_vals: Vec<ValueId>,
    },
    /// Body args are `[ids..., size args..., kernel args...]`.
    Hierarchy {
        level: HierarchyLevel,
        sizes: Vec<ValueId>,
        kernel_operands: Vec<ValueId>,
    },
    HierarchyTerminator {
        level: HierarchyLevel,
    },
    Yield {
        operands: Vec<ValueId>,
    },
    /// Parallel loop terminator; an optional combiner region ends in
    /// `ReduceReturn`.
    Reduce {
        operand: ValueId,
    },
    ReduceReturn {
        operand: ValueId,
    },
    /// Conditional join; regions are `[then, else]`, each ending in `Yield`.
    If {
        condition: Vec<ValueId>,
    },
    ExecuteTerminator {
        operands: Vec<ValueId>,
    },
    Linalg {
        name: String,
        inputs: Vec<ValueId>,
        outputs: Vec<ValueId>,
    },
    Alloc,
    Dealloc {
        memref: ValueId,
    },
    Copy {
        source: ValueId,
        target: ValueId,
    },
    AffineApply {
        operands: Vec<ValueId>,
    },
    MulI {
        lhs: ValueId,
        rhs: ValueId,
    },
    AddI {
        lhs: ValueId,
        rhs: ValueId,
    },
    Opaque {
        name: String,
        operands: Vec<ValueId>,
    },
}

impl OpKind {
    pub fn mnemonic(&self) -> String {
        match self {
            OpKind::Dma { .. } => "dma_memcpy_nd".into(),
            OpKind::ChannelPut { channel, .. } => format!("channel.put @{channel}"),
            OpKind::ChannelGet { channel, .. } => format!("channel.get @{channel}"),
            OpKind::Execute => "execute".into(),
            OpKind::WaitAll => "wait_all".into(),
            OpKind::For { .. } => "scf.for".into(),
            OpKind::Parallel { .. } => "scf.parallel".into(),
            OpKind::Hierarchy { level, .. } => level.name().into(),
            OpKind::HierarchyTerminator { level } => format!("{}_terminator", level.name()),
            OpKind::Yield { .. } => "scf.yield".into(),
            OpKind::Reduce { .. } => "scf.reduce".into(),
            OpKind::ReduceReturn { .. } => "scf.reduce.return".into(),
            OpKind::If { .. } => "affine.if".into(),
            OpKind::ExecuteTerminator { .. } => "execute_terminator".into(),
            OpKind::Linalg { name, .. } => format!("linalg.{name}"),
            OpKind::Alloc => "memref.alloc".into(),
            OpKind::Dealloc { .. } => "memref.dealloc".into(),
            OpKind::Copy { .. } => "memref.copy".into(),
            OpKind::AffineApply { .. } => "affine.apply".into(),
            OpKind::MulI { .. } => "arith.muli".into(),
            OpKind::AddI { .. } => "arith.addi".into(),
            OpKind::Opaque { name, .. } => name.clone(),
        }
    }

    /// Kinds that own a dependency token list.
    pub fn is_async_kind(&self) -> bool {
        matches!(
            self,
            OpKind::Dma { .. }
                | OpKind::ChannelPut { .. }
                | OpKind::ChannelGet { .. }
                | OpKind::Execute
                | OpKind::WaitAll
                | OpKind::Hierarchy { .. }
        )
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            OpKind::HierarchyTerminator { .. }
                | OpKind::Yield { .. }
                | OpKind::Reduce { .. }
                | OpKind::ReduceReturn { .. }
                | OpKind::ExecuteTerminator { .. }
        )
    }
}

/// How an operand is used by its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UseRole {
    AsyncDep,
    DmaSrc,
    DmaDst,
    ChannelSrc,
    ChannelDst,
    /// Offsets, sizes, strides, loop bounds, hierarchy sizes, conditions.
    Index,
    IterOperand,
    InitVal,
    KernelOperand(u32),
    YieldOperand,
    ReduceOperand,
    LinalgInput,
    LinalgOutput,
    Operand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Use {
    pub owner: OpId,
    pub role: UseRole,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Op {
    pub kind: OpKind,
    #[serde(default)]
    pub async_deps: Vec<ValueId>,
    #[serde(default)]
    pub results: Vec<ValueId>,
    #[serde(default)]
    pub regions: Vec<BlockId>,
    pub parent: Option<BlockId>,
    #[serde(default)]
    pub id_tag: Option<u32>,
    #[serde(default)]
    pub erased: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Block {
    #[serde(default)]
    pub args: Vec<ValueId>,
    #[serde(default)]
    pub ops: Vec<OpId>,
    pub parent_op: Option<OpId>,
}

/// A whole program: one top-level body block plus the arenas.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Program {
    pub values: Vec<Value>,
    pub ops: Vec<Op>,
    pub blocks: Vec<Block>,
    pub body: BlockId,
    #[serde(default)]
    pub channels: Vec<ChannelDecl>,
}

// ── Operand visitation ───────────────────────────────────────────────────

macro_rules! visit_access {
    ($acc:expr, $role:expr, $f:ident) => {{
        let MemAccess {
            memref,
            offsets,
            sizes,
            strides,
        } = $acc;
        $f(memref, $role);
        for v in offsets {
            $f(v, UseRole::Index);
        }
        for v in sizes {
            $f(v, UseRole::Index);
        }
        for v in strides {
            $f(v, UseRole::Index);
        }
    }};
}

macro_rules! visit_kind_operands {
    ($kind:expr, $f:ident) => {
        match $kind {
            OpKind::Dma { dst, src } => {
                visit_access!(src, UseRole::DmaSrc, $f);
                visit_access!(dst, UseRole::DmaDst, $f);
            }
            OpKind::ChannelPut { src, .. } => visit_access!(src, UseRole::ChannelSrc, $f),
            OpKind::ChannelGet { dst, .. } => visit_access!(dst, UseRole::ChannelDst, $f),
            OpKind::Execute
            | OpKind::WaitAll
            | OpKind::Alloc
            | OpKind::HierarchyTerminator { .. } => {}
            OpKind::For {
                lower,
                upper,
                step,
                iter_operands,
            } => {
                $f(lower, UseRole::Index);
                $f(upper, UseRole::Index);
                $f(step, UseRole::Index);
                for v in iter_operands {
                    $f(v, UseRole::IterOperand);
                }
            }
            OpKind::Parallel {
                lower,
                upper,
                step,
                init_vals,
            } => {
                for v in lower {
                    $f(v, UseRole::Index);
                }
                for v in upper {
                    $f(v, UseRole::Index);
                }
                for v in step {
                    $f(v, UseRole::Index);
                }
                for v in init_vals {
                    $f(v, UseRole::InitVal);
                }
            }
            OpKind::Hierarchy {
                sizes,
                kernel_operands,
                ..
            } => {
                for v in sizes {
                    $f(v, UseRole::Index);
                }
                for (i, v) in kernel_operands.into_iter().enumerate() {
                    $f(v, UseRole::KernelOperand(i as u32));
                }
            }
            OpKind::Yield { operands } => {
                for v in operands {
                    $f(v, UseRole::YieldOperand);
                }
            }
            OpKind::Reduce { operand } => $f(operand, UseRole::ReduceOperand),
            OpKind::ReduceReturn { operand } => $f(operand, UseRole::Operand),
            OpKind::If { condition } => {
                for v in condition {
                    $f(v, UseRole::Index);
                }
            }
            OpKind::ExecuteTerminator { operands }
            | OpKind::AffineApply { operands }
            | OpKind::Opaque { operands, .. } => {
                for v in operands {
                    $f(v, UseRole::Operand);
                }
            }
            OpKind::Linalg {
                inputs, outputs, ..
            } => {
                for v in inputs {
                    $f(v, UseRole::LinalgInput);
                }
                for v in outputs {
                    $f(v, UseRole::LinalgOutput);
                }
            }
            OpKind::Dealloc { memref } => $f(memref, UseRole::Operand),
            OpKind::Copy { source, target } => {
                $f(source, UseRole::Operand);
                $f(target, UseRole::Operand);
            }
            OpKind::MulI { lhs, rhs } | OpKind::AddI { lhs, rhs } => {
                $f(lhs, UseRole::Operand);
                $f(rhs, UseRole::Operand);
            }
        }
    };
}

impl Op {
    /// Visit every operand: dependency tokens first, then kind operands.
    pub fn for_each_operand(&self, mut f: impl FnMut(&ValueId, UseRole)) {
        for v in &self.async_deps {
            f(v, UseRole::AsyncDep);
        }
        visit_kind_operands!(&self.kind, f);
    }

    pub fn for_each_operand_mut(&mut self, mut f: impl FnMut(&mut ValueId, UseRole)) {
        for v in &mut self.async_deps {
            f(v, UseRole::AsyncDep);
        }
        visit_kind_operands!(&mut self.kind, f);
    }

    pub fn operands(&self) -> Vec<(ValueId, UseRole)> {
        let mut out = Vec::new();
        self.for_each_operand(|v, role| out.push((*v, role)));
        out
    }
}

// ── Queries ──────────────────────────────────────────────────────────────

impl Program {
    pub fn op(&self, id: OpId) -> &Op {
        &self.ops[id.index()]
    }

    pub fn op_mut(&mut self, id: OpId) -> &mut Op {
        &mut self.ops[id.index()]
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.index()]
    }

    pub fn value(&self, id: ValueId) -> &Value {
        &self.values[id.index()]
    }

    pub fn value_type(&self, id: ValueId) -> ValueType {
        self.values[id.index()].ty
    }

    pub fn defining_op(&self, v: ValueId) -> Option<OpId> {
        match self.value(v).def {
            ValueDef::OpResult { op, .. } => Some(op),
            _ => None,
        }
    }

    pub fn constant_value(&self, v: ValueId) -> Option<i64> {
        match self.value(v).def {
            ValueDef::Constant(c) => Some(c),
            _ => None,
        }
    }

    /// The op owning the block `v` is an argument of, with the arg index.
    pub fn block_arg_owner(&self, v: ValueId) -> Option<(OpId, u32)> {
        match self.value(v).def {
            ValueDef::BlockArg { block, index } => {
                self.block(block).parent_op.map(|owner| (owner, index))
            }
            _ => None,
        }
    }

    pub fn parent_block(&self, op: OpId) -> Option<BlockId> {
        self.op(op).parent
    }

    pub fn parent_op(&self, op: OpId) -> Option<OpId> {
        self.op(op).parent.and_then(|b| self.block(b).parent_op)
    }

    /// Enclosing ops, innermost first.
    pub fn ancestors(&self, op: OpId) -> Vec<OpId> {
        let mut out = Vec::new();
        let mut cur = self.parent_op(op);
        while let Some(p) = cur {
            out.push(p);
            cur = self.parent_op(p);
        }
        out
    }

    /// Nearest enclosing op satisfying `pred`.
    pub fn enclosing(&self, op: OpId, pred: impl Fn(&OpKind) -> bool) -> Option<OpId> {
        self.ancestors(op)
            .into_iter()
            .find(|&a| pred(&self.op(a).kind))
    }

    /// True if `a` and `b` share a block and `a` comes first.
    pub fn is_before_in_block(&self, a: OpId, b: OpId) -> bool {
        let (Some(ba), Some(bb)) = (self.op(a).parent, self.op(b).parent) else {
            return false;
        };
        if ba != bb {
            return false;
        }
        let ops = &self.block(ba).ops;
        match (
            ops.iter().position(|&o| o == a),
            ops.iter().position(|&o| o == b),
        ) {
            (Some(pa), Some(pb)) => pa < pb,
            _ => false,
        }
    }

    pub fn is_async(&self, op: OpId) -> bool {
        let o = self.op(op);
        !o.erased && o.kind.is_async_kind()
    }

    /// The completion token of an async op, if it produces one.
    pub fn async_token(&self, op: OpId) -> Option<ValueId> {
        if !self.op(op).kind.is_async_kind() {
            return None;
        }
        self.op(op)
            .results
            .first()
            .copied()
            .filter(|&r| self.value_type(r).is_token())
    }

    /// Terminator of a block, if the block ends in one.
    pub fn terminator(&self, block: BlockId) -> Option<OpId> {
        self.block(block)
            .ops
            .last()
            .copied()
            .filter(|&o| self.op(o).kind.is_terminator())
    }

    /// Non-terminator ops of an execute body.
    pub fn execute_primitives(&self, exec: OpId) -> Vec<OpId> {
        let Some(&body) = self.op(exec).regions.first() else {
            return Vec::new();
        };
        self.block(body)
            .ops
            .iter()
            .copied()
            .filter(|&o| !self.op(o).kind.is_terminator())
            .collect()
    }

    /// All live ops in pre-order.
    pub fn walk(&self) -> Vec<OpId> {
        let mut out = Vec::new();
        self.walk_block_into(self.body, &mut out);
        out
    }

    /// Live ops nested in `block`, pre-order.
    pub fn walk_block(&self, block: BlockId) -> Vec<OpId> {
        let mut out = Vec::new();
        self.walk_block_into(block, &mut out);
        out
    }

    fn walk_block_into(&self, block: BlockId, out: &mut Vec<OpId>) {
        for &op in &self.block(block).ops {
            out.push(op);
            for &r in &self.op(op).regions {
                self.walk_block_into(r, out);
            }
        }
    }

    pub fn uses(&self, v: ValueId) -> Vec<Use> {
        let mut out = Vec::new();
        for op in self.walk() {
            self.op(op).for_each_operand(|u, role| {
                if *u == v {
                    out.push(Use { owner: op, role });
                }
            });
        }
        out
    }

    pub fn has_uses(&self, v: ValueId) -> bool {
        !self.uses(v).is_empty()
    }

    /// The `For` whose iteration argument `v` is.
    pub fn for_iter_args_owner(&self, v: ValueId) -> Option<OpId> {
        match self.block_arg_owner(v) {
            Some((owner, index)) if index >= 1 && matches!(self.op(owner).kind, OpKind::For { .. }) => {
                Some(owner)
            }
            _ => None,
        }
    }

    pub fn for_induction_var_owner(&self, v: ValueId) -> Option<OpId> {
        match self.block_arg_owner(v) {
            Some((owner, 0)) if matches!(self.op(owner).kind, OpKind::For { .. }) => Some(owner),
            _ => None,
        }
    }

    pub fn parallel_iv_owner(&self, v: ValueId) -> Option<OpId> {
        match self.block_arg_owner(v) {
            Some((owner, _)) if matches!(self.op(owner).kind, OpKind::Parallel { .. }) => {
                Some(owner)
            }
            _ => None,
        }
    }

    /// The nearest `Parallel` enclosing `op` whose init values contain `v`.
    pub fn parallel_init_vals_owner(&self, op: OpId, v: ValueId) -> Option<OpId> {
        let par = self.enclosing(op, |k| matches!(k, OpKind::Parallel { .. }))?;
        match &self.op(par).kind {
            OpKind::Parallel { init_vals, .. } if init_vals.contains(&v) => Some(par),
            _ => None,
        }
    }

    /// The hierarchy op whose tile id `v` is.
    pub fn hierarchy_id_owner(&self, v: ValueId) -> Option<OpId> {
        let (owner, index) = self.block_arg_owner(v)?;
        match &self.op(owner).kind {
            OpKind::Hierarchy { sizes, .. } if (index as usize) < sizes.len() => Some(owner),
            _ => None,
        }
    }

    /// Block argument bound to kernel operand `i` of a hierarchy op.
    pub fn kernel_argument(&self, hier: OpId, i: usize) -> Option<ValueId> {
        let op = self.op(hier);
        let OpKind::Hierarchy { sizes, .. } = &op.kind else {
            return None;
        };
        let body = *op.regions.first()?;
        self.block(body).args.get(2 * sizes.len() + i).copied()
    }

    /// Loop-carried token of a loop: the first iteration operand or body
    /// iteration argument of a `For`, or the first init value of a `Parallel`.
    pub fn loop_carried_token(&self, op: OpId, slot: LoopTokenSlot) -> Result<ValueId> {
        let o = self.op(op);
        let token = match (&o.kind, slot) {
            (OpKind::For { iter_operands, .. }, LoopTokenSlot::Operand) => {
                iter_operands.first().copied()
            }
            (OpKind::For { .. }, LoopTokenSlot::Argument) => o
                .regions
                .first()
                .and_then(|&b| self.block(b).args.get(1).copied()),
            (OpKind::Parallel { init_vals, .. }, _) => init_vals.first().copied(),
            _ => {
                return Err(CanonError::MalformedLoop {
                    op,
                    reason: "not a loop",
                })
            }
        };
        let token = token.ok_or(CanonError::MalformedLoop {
            op,
            reason: "loop carries no token",
        })?;
        if !self.value_type(token).is_token() {
            return Err(CanonError::NotAToken { value: token });
        }
        Ok(token)
    }
}

/// Which side of a `For` loop's carried token to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopTokenSlot {
    /// The value passed into the loop.
    Operand,
    /// The body block argument seen inside the loop.
    Argument,
}

// ── Mutation ─────────────────────────────────────────────────────────────

impl Program {
    pub(crate) fn new_value(&mut self, ty: ValueType, def: ValueDef) -> ValueId {
        let id = ValueId(self.values.len() as u32);
        self.values.push(Value { ty, def });
        id
    }

    pub(crate) fn new_block(&mut self, parent_op: Option<OpId>) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(Block {
            args: Vec::new(),
            ops: Vec::new(),
            parent_op,
        });
        id
    }

    pub(crate) fn add_block_arg(&mut self, block: BlockId, ty: ValueType) -> ValueId {
        let index = self.blocks[block.index()].args.len() as u32;
        let v = self.new_value(ty, ValueDef::BlockArg { block, index });
        self.blocks[block.index()].args.push(v);
        v
    }

    /// Append an op to `block` (before its terminator, if it has one) and
    /// create its results.
    pub fn push_op(
        &mut self,
        block: BlockId,
        kind: OpKind,
        async_deps: Vec<ValueId>,
        result_types: &[ValueType],
    ) -> OpId {
        let id = OpId(self.ops.len() as u32);
        self.ops.push(Op {
            kind,
            async_deps,
            results: Vec::new(),
            regions: Vec::new(),
            parent: Some(block),
            id_tag: None,
            erased: false,
        });
        for (i, &ty) in result_types.iter().enumerate() {
            let v = self.new_value(
                ty,
                ValueDef::OpResult {
                    op: id,
                    index: i as u32,
                },
            );
            self.ops[id.index()].results.push(v);
        }
        let insert_at = match self.terminator(block) {
            Some(_) if !self.ops[id.index()].kind.is_terminator() => {
                self.block(block).ops.len() - 1
            }
            _ => self.block(block).ops.len(),
        };
        self.blocks[block.index()].ops.insert(insert_at, id);
        id
    }

    pub(crate) fn add_region(&mut self, op: OpId) -> BlockId {
        let b = self.new_block(Some(op));
        self.ops[op.index()].regions.push(b);
        b
    }

    fn check_async_token(&self, op: OpId, token: ValueId) -> Result<()> {
        if !self.op(op).kind.is_async_kind() {
            return Err(CanonError::NotAsync { op });
        }
        if !self.value_type(token).is_token() {
            return Err(CanonError::NotAToken { value: token });
        }
        Ok(())
    }

    pub fn add_async_dependency(&mut self, op: OpId, token: ValueId) -> Result<()> {
        self.check_async_token(op, token)?;
        self.ops[op.index()].async_deps.push(token);
        Ok(())
    }

    /// Append `token` unless already present. Returns true if it was added.
    pub fn add_async_dependency_if_new(&mut self, op: OpId, token: ValueId) -> Result<bool> {
        self.check_async_token(op, token)?;
        let deps = &mut self.ops[op.index()].async_deps;
        if deps.contains(&token) {
            return Ok(false);
        }
        deps.push(token);
        Ok(true)
    }

    /// Remove every occurrence of `token` from the op's dependency list.
    pub fn erase_async_dependency(&mut self, op: OpId, token: ValueId) -> Result<()> {
        self.check_async_token(op, token)?;
        let deps = &mut self.ops[op.index()].async_deps;
        if deps.is_empty() {
            return Err(CanonError::MalformedDepList {
                op,
                reason: "dependency list is empty",
            });
        }
        deps.retain(|&d| d != token);
        Ok(())
    }

    pub fn clear_async_dependencies(&mut self, op: OpId) {
        self.ops[op.index()].async_deps.clear();
    }

    pub fn replace_all_uses_with(&mut self, from: ValueId, to: ValueId) {
        for op in self.walk() {
            self.ops[op.index()].for_each_operand_mut(|v, _| {
                if *v == from {
                    *v = to;
                }
            });
        }
    }

    /// Detach `op` from its block and mark it and everything nested erased.
    pub fn erase_op(&mut self, op: OpId) {
        if let Some(b) = self.ops[op.index()].parent {
            self.blocks[b.index()].ops.retain(|&o| o != op);
        }
        let mut stack = vec![op];
        while let Some(o) = stack.pop() {
            self.ops[o.index()].erased = true;
            for r in self.ops[o.index()].regions.clone() {
                stack.extend(self.blocks[r.index()].ops.iter().copied());
            }
        }
    }

    /// Remove kernel operand `i` and its block argument from a hierarchy op.
    pub fn erase_kernel_operand(&mut self, hier: OpId, i: usize) -> Result<()> {
        let arg_index = match &mut self.ops[hier.index()].kind {
            OpKind::Hierarchy {
                sizes,
                kernel_operands,
                ..
            } if i < kernel_operands.len() => {
                kernel_operands.remove(i);
                2 * sizes.len() + i
            }
            _ => {
                return Err(CanonError::UnknownKind {
                    op: hier,
                    kind: format!("kernel operand {i} of non-hierarchy"),
                })
            }
        };
        let Some(&body) = self.ops[hier.index()].regions.first() else {
            return Ok(());
        };
        let args = &mut self.blocks[body.index()].args;
        if arg_index < args.len() {
            args.remove(arg_index);
        }
        let shifted: Vec<ValueId> = args[arg_index.min(args.len())..].to_vec();
        for v in shifted {
            if let ValueDef::BlockArg { index, .. } = &mut self.values[v.index()].def {
                *index -= 1;
            }
        }
        Ok(())
    }
}

// ── Validation ───────────────────────────────────────────────────────────

fn check_id(owner: impl fmt::Display, kind: &'static str, index: u32, len: usize) -> Result<()> {
    if (index as usize) < len {
        return Ok(());
    }
    Err(CanonError::DanglingId {
        owner: owner.to_string(),
        kind,
        index,
    })
}

impl Program {
    /// Range-check every id stored in the arenas. A decoded program must
    /// pass this before any query runs on it.
    pub fn validate(&self) -> Result<()> {
        let (nv, no, nb) = (self.values.len(), self.ops.len(), self.blocks.len());
        check_id("program", "block", self.body.0, nb)?;
        for (i, value) in self.values.iter().enumerate() {
            let owner = ValueId(i as u32);
            match value.def {
                ValueDef::OpResult { op, .. } => check_id(owner, "op", op.0, no)?,
                ValueDef::BlockArg { block, .. } => check_id(owner, "block", block.0, nb)?,
                ValueDef::Constant(_) => {}
            }
        }
        for (i, op) in self.ops.iter().enumerate() {
            let owner = OpId(i as u32);
            let mut dangling = None;
            op.for_each_operand(|v, _| {
                if dangling.is_none() && v.index() >= nv {
                    dangling = Some(v.0);
                }
            });
            if let Some(index) = dangling {
                check_id(owner, "value", index, nv)?;
            }
            for v in &op.results {
                check_id(owner, "value", v.0, nv)?;
            }
            for b in op.regions.iter().chain(&op.parent) {
                check_id(owner, "block", b.0, nb)?;
            }
        }
        for (i, block) in self.blocks.iter().enumerate() {
            let owner = BlockId(i as u32);
            for v in &block.args {
                check_id(owner, "value", v.0, nv)?;
            }
            for o in block.ops.iter().chain(&block.parent_op) {
                check_id(owner, "op", o.0, no)?;
            }
        }
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn memref(p: &mut Program, rank: u32) -> ValueId {
        p.add_input(ValueType::Memref {
            rank,
            space: MemorySpace::L2,
        })
    }

    #[test]
    fn validate_rejects_dangling_dependency() {
        let mut p = Program::new();
        let w = p.wait_all(p.body, vec![]);
        assert!(p.validate().is_ok());
        p.op_mut(w).async_deps.push(ValueId(999));
        let err = p.validate().unwrap_err();
        assert!(matches!(err, CanonError::DanglingId { kind: "value", index: 999, .. }));
        assert_eq!(err.to_string(), "op0 refers to value 999, which does not exist");
    }

    #[test]
    fn validate_rejects_dangling_block_link() {
        let mut p = Program::new();
        let w = p.wait_all(p.body, vec![]);
        p.op_mut(w).parent = Some(BlockId(7));
        assert!(matches!(
            p.validate(),
            Err(CanonError::DanglingId { kind: "block", index: 7, .. })
        ));
    }

    #[test]
    fn push_op_inserts_before_terminator() {
        let mut p = Program::new();
        let (_, body) = p.scf_for_const(p.body, 0, 4, 1, vec![]);
        p.yield_(body, vec![]);
        let w = p.wait_all(body, vec![]);
        let ops = &p.block(body).ops;
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0], w);
        assert!(p.op(ops[1]).kind.is_terminator());
    }

    #[test]
    fn uses_report_roles() {
        let mut p = Program::new();
        let a = memref(&mut p, 1);
        let b = memref(&mut p, 1);
        let dma = p.dma(p.body, vec![], MemAccess::whole(b), MemAccess::whole(a));
        let uses = p.uses(a);
        assert_eq!(uses, vec![Use { owner: dma, role: UseRole::DmaSrc }]);
        let uses = p.uses(b);
        assert_eq!(uses[0].role, UseRole::DmaDst);
    }

    #[test]
    fn add_if_new_is_idempotent_and_checks_type() {
        let mut p = Program::new();
        let w0 = p.wait_all(p.body, vec![]);
        let t0 = p.async_token(w0).unwrap();
        let w1 = p.wait_all(p.body, vec![]);
        assert!(p.add_async_dependency_if_new(w1, t0).unwrap());
        assert!(!p.add_async_dependency_if_new(w1, t0).unwrap());
        assert_eq!(p.op(w1).async_deps, vec![t0]);

        let idx = p.constant(3);
        assert!(matches!(
            p.add_async_dependency_if_new(w1, idx),
            Err(CanonError::NotAToken { .. })
        ));
    }

    #[test]
    fn erase_from_empty_list_is_malformed() {
        let mut p = Program::new();
        let w0 = p.wait_all(p.body, vec![]);
        let t0 = p.async_token(w0).unwrap();
        let w1 = p.wait_all(p.body, vec![]);
        assert!(matches!(
            p.erase_async_dependency(w1, t0),
            Err(CanonError::MalformedDepList { .. })
        ));
    }

    #[test]
    fn replace_all_uses_rewrites_every_slot() {
        let mut p = Program::new();
        let w0 = p.wait_all(p.body, vec![]);
        let t0 = p.async_token(w0).unwrap();
        let w1 = p.wait_all(p.body, vec![]);
        let t1 = p.async_token(w1).unwrap();
        let w2 = p.wait_all(p.body, vec![t0]);
        let (f, body) = p.scf_for_const(p.body, 0, 2, 1, vec![t0]);
        p.yield_(body, vec![]);
        p.replace_all_uses_with(t0, t1);
        assert_eq!(p.op(w2).async_deps, vec![t1]);
        match &p.op(f).kind {
            OpKind::For { iter_operands, .. } => assert_eq!(iter_operands, &vec![t1]),
            _ => unreachable!(),
        }
        assert!(!p.has_uses(t0));
    }

    #[test]
    fn loop_owners_resolve_block_args() {
        let mut p = Program::new();
        let w = p.wait_all(p.body, vec![]);
        let t = p.async_token(w).unwrap();
        let (f, body) = p.scf_for_const(p.body, 0, 4, 1, vec![t]);
        let iv = p.block(body).args[0];
        let carried = p.block(body).args[1];
        p.yield_(body, vec![carried]);
        assert_eq!(p.for_induction_var_owner(iv), Some(f));
        assert_eq!(p.for_iter_args_owner(carried), Some(f));
        assert_eq!(p.for_iter_args_owner(iv), None);
        assert_eq!(p.loop_carried_token(f, LoopTokenSlot::Operand).unwrap(), t);
        assert_eq!(
            p.loop_carried_token(f, LoopTokenSlot::Argument).unwrap(),
            carried
        );
    }

    #[test]
    fn parallel_init_owner_uses_nearest_enclosing_parallel() {
        let mut p = Program::new();
        let w = p.wait_all(p.body, vec![]);
        let t = p.async_token(w).unwrap();
        let c0 = p.constant(0);
        let c2 = p.constant(2);
        let c1 = p.constant(1);
        let (par, body) = p.scf_parallel(p.body, vec![c0], vec![c2], vec![c1], vec![t]);
        let inner = p.wait_all(body, vec![t]);
        let inner_t = p.async_token(inner).unwrap();
        p.reduce(body, inner_t);
        assert_eq!(p.parallel_init_vals_owner(inner, t), Some(par));
        assert_eq!(p.parallel_init_vals_owner(w, t), None);
    }

    #[test]
    fn hierarchy_args_and_kernel_operand_erasure() {
        let mut p = Program::new();
        let a = memref(&mut p, 2);
        let b = memref(&mut p, 2);
        let c2 = p.constant(2);
        let (h, body) = p.hierarchy(
            p.body,
            HierarchyLevel::Herd,
            vec![],
            vec![c2, c2],
            vec![a, b],
            true,
        );
        let args = p.block(body).args.clone();
        assert_eq!(args.len(), 6);
        assert_eq!(p.hierarchy_id_owner(args[0]), Some(h));
        assert_eq!(p.hierarchy_id_owner(args[2]), None);
        assert_eq!(p.kernel_argument(h, 1), Some(args[5]));

        p.erase_kernel_operand(h, 0).unwrap();
        assert_eq!(p.kernel_argument(h, 0), Some(args[5]));
        match p.value(args[5]).def {
            ValueDef::BlockArg { index, .. } => assert_eq!(index, 4),
            _ => unreachable!(),
        }
        match &p.op(h).kind {
            OpKind::Hierarchy {
                kernel_operands, ..
            } => assert_eq!(kernel_operands, &vec![b]),
            _ => unreachable!(),
        }
    }

    #[test]
    fn erase_op_removes_nested_ops_from_walk() {
        let mut p = Program::new();
        let (f, body) = p.scf_for_const(p.body, 0, 4, 1, vec![]);
        let inner = p.wait_all(body, vec![]);
        p.yield_(body, vec![]);
        assert!(p.walk().contains(&inner));
        p.erase_op(f);
        assert!(p.walk().is_empty());
        assert!(p.op(inner).erased);
    }

    #[test]
    fn program_json_round_trip_preserves_structure() {
        let mut p = Program::new();
        let a = memref(&mut p, 1);
        let b = memref(&mut p, 1);
        let d = p.dma(p.body, vec![], MemAccess::whole(b), MemAccess::whole(a));
        let json = serde_json::to_string(&p).unwrap();
        let back: Program = serde_json::from_str(&json).unwrap();
        assert_eq!(back.op(d).kind, p.op(d).kind);
        assert_eq!(back.walk(), p.walk());
    }
}
