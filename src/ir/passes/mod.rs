//! Transformations over [`IrMethod`], run in a fixed order by
//! [`crate::ir::pipeline::Pipeline`].

mod cleanup;
mod fold;
mod narrow;
mod type_infer;
mod unssa;

pub use cleanup::{CleanLabel, DeadCode, RemoveConstant, RemoveLocal};
pub use fold::{FillArray, MultiArray, NewObject, VoidInvoke};
pub use narrow::{Npe, Zero};
pub use type_infer::TypeInfer;
pub use unssa::UnSsa;

use std::collections::HashMap;

use crate::error::ConvertError;
use crate::ir::{BlockId, IrMethod, LocalId, Value};

pub trait Transformer {
    fn name(&self) -> &'static str;

    /// Rewrites the method in place, returning whether anything changed.
    fn transform(&self, method: &mut IrMethod) -> Result<bool, ConvertError>;
}

/// Follows a substitution chain to its end.
fn resolve(map: &HashMap<LocalId, Value>, value: &Value) -> Value {
    let mut current = value.clone();
    let mut steps = 0;
    while let Value::Local(l) = current {
        match map.get(&l) {
            Some(next) if steps <= map.len() => {
                current = next.clone();
                steps += 1;
            }
            _ => break,
        }
    }
    current
}

/// Whether `local` is read inside any handler that `blocks` may throw into.
fn used_in_handlers(method: &IrMethod, blocks: &[BlockId], local: LocalId) -> bool {
    blocks.iter().flat_map(|b| method.exceptional_successors(*b)).any(|h| {
        method.block(h).map_or(false, |block| {
            block.phis.iter().any(|p| p.operands.iter().any(|(_, v)| v.local() == Some(local)))
                || block.stmts.iter().any(|s| s.uses(local))
                || block.terminator.values().iter().any(|v| v.local() == Some(local))
        })
    })
}
