use crate::error::ConvertError;
use crate::ir::passes::Transformer;
use crate::ir::{Expr, IrMethod, Stmt, Terminator, Value};

/// Replaces phis by copies through a fresh variable per phi.
///
/// Every predecessor assigns its operand to the fresh variable and the
/// block head copies it into the phi's destination, so no interference
/// analysis is needed. On an exceptional edge the copy goes before the
/// statement that throws, since nothing after it runs on that path.
pub struct UnSsa;

impl Transformer for UnSsa {
    fn name(&self) -> &'static str {
        "unssa"
    }

    fn transform(&self, method: &mut IrMethod) -> Result<bool, ConvertError> {
        let mut changed = false;
        for id in method.layout.clone() {
            let phis = match method.block_mut(id) {
                Some(block) if !block.phis.is_empty() => std::mem::take(&mut block.phis),
                _ => continue,
            };
            let mut heads = Vec::with_capacity(phis.len());
            for phi in phis {
                let fresh = method.new_local();
                for (pred, value) in phi.operands {
                    let exceptional = method.exceptional_successors(pred).contains(&id);
                    let copy = Stmt::Assign { dst: fresh, expr: Expr::Value(value) };
                    let Some(block) = method.block_mut(pred) else {
                        continue;
                    };
                    if exceptional && !matches!(block.terminator, Terminator::Throw(_)) {
                        let at = block.stmts.iter().rposition(Stmt::can_throw).unwrap_or(block.stmts.len());
                        block.stmts.insert(at, copy);
                    } else {
                        block.stmts.push(copy);
                    }
                }
                heads.push(Stmt::Assign { dst: phi.dst, expr: Expr::Value(Value::Local(fresh)) });
            }
            if let Some(block) = method.block_mut(id) {
                let at = match block.stmts.first() {
                    Some(Stmt::Assign { expr: Expr::CaughtException, .. }) => 1,
                    _ => 0,
                };
                block.stmts.splice(at..at, heads);
            }
            changed = true;
        }
        Ok(changed)
    }
}
