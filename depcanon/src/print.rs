// print.rs — Readable textual form of a program
//
// One op per line, regions indented by two spaces, constants printed as
// literals. Used by the `--emit text` driver output and snapshot tests.
//
// Preconditions: none.
// Postconditions: output depends only on live ops and their order.
// Failure modes: none.
// Side effects: none.

use std::fmt;

use crate::id::{BlockId, OpId, ValueId};
use crate::ir::{MemAccess, OpKind, Program, UseRole};

impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let args = self.block(self.body).args.clone();
        if !args.is_empty() {
            writeln!(f, "inputs({})", self.value_list(&args))?;
        }
        for ch in &self.channels {
            write!(f, "channel @{} {:?}", ch.name, ch.size)?;
            if let Some(shape) = &ch.broadcast_shape {
                write!(f, " broadcast {:?}", shape)?;
            }
            writeln!(f)?;
        }
        self.write_block(f, self.body, 0)
    }
}

impl Program {
    fn value_name(&self, v: ValueId) -> String {
        match self.constant_value(v) {
            Some(c) => c.to_string(),
            None => v.to_string(),
        }
    }

    fn value_list(&self, vs: &[ValueId]) -> String {
        vs.iter()
            .map(|&v| self.value_name(v))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn access(&self, acc: &MemAccess) -> String {
        if acc.offsets.is_empty() {
            self.value_name(acc.memref)
        } else {
            format!("{}[{}]", self.value_name(acc.memref), self.value_list(&acc.offsets))
        }
    }

    fn write_block(&self, f: &mut fmt::Formatter<'_>, block: BlockId, depth: usize) -> fmt::Result {
        for &op in &self.block(block).ops {
            self.write_op(f, op, depth)?;
        }
        Ok(())
    }

    fn write_op(&self, f: &mut fmt::Formatter<'_>, id: OpId, depth: usize) -> fmt::Result {
        let op = self.op(id);
        let indent = "  ".repeat(depth);
        write!(f, "{indent}")?;
        if !op.results.is_empty() {
            write!(f, "{} = ", self.value_list(&op.results))?;
        }
        write!(f, "{}", op.kind.mnemonic())?;
        if op.kind.is_async_kind() {
            write!(f, " [{}]", self.value_list(&op.async_deps))?;
        }
        match &op.kind {
            OpKind::Dma { dst, src } => {
                write!(f, " ({} <- {})", self.access(dst), self.access(src))?
            }
            OpKind::ChannelPut { src: acc, .. } | OpKind::ChannelGet { dst: acc, .. } => {
                write!(f, " ({})", self.access(acc))?
            }
            _ => {
                let mut operands = Vec::new();
                op.for_each_operand(|v, role| {
                    if role != UseRole::AsyncDep {
                        operands.push(*v);
                    }
                });
                if !operands.is_empty() {
                    write!(f, " ({})", self.value_list(&operands))?;
                }
            }
        }
        if let Some(tag) = op.id_tag {
            write!(f, " {{id={tag}}}")?;
        }
        writeln!(f)?;
        for &region in &op.regions {
            let args = &self.block(region).args;
            if args.is_empty() {
                writeln!(f, "{indent}  ^{}:", region.index())?;
            } else {
                writeln!(f, "{indent}  ^{}({}):", region.index(), self.value_list(args))?;
            }
            self.write_block(f, region, depth + 2)?;
        }
        Ok(())
    }
}
