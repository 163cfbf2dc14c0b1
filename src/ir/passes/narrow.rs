use crate::dex::instructions::InvokeKind;
use crate::dex::nodes::MethodRef;
use crate::error::ConvertError;
use crate::ir::passes::Transformer;
use crate::ir::typing::{def_types, for_each_typed_use_mut};
use crate::ir::{Constant, Expr, IrMethod, IrType, Stmt, Terminator, Value};

const NULL_POINTER_EXCEPTION: &str = "Ljava/lang/NullPointerException;";

fn is_zero(value: &Value) -> bool {
    matches!(value, Value::Const(Constant::Literal { bits: 0, .. }))
}

/// Turns a zero literal into `null` wherever the use needs a reference.
pub struct Zero;

impl Transformer for Zero {
    fn name(&self) -> &'static str {
        "zero"
    }

    fn transform(&self, method: &mut IrMethod) -> Result<bool, ConvertError> {
        let mut changed = false;
        for_each_typed_use_mut(method, |value, expected| {
            if matches!(expected, Some(IrType::Ref(_))) && is_zero(value) {
                *value = Value::Const(Constant::Null);
                changed = true;
            }
        });

        let defs = def_types(method);
        let is_ref = |value: &Value| match value {
            Value::Local(l) => defs.get(l).map_or(false, IrType::is_ref),
            Value::Const(Constant::Literal { .. }) => false,
            Value::Const(c) => crate::ir::typing::constant_type(c).is_ref(),
        };
        for block in method.blocks.values_mut() {
            for phi in &mut block.phis {
                if phi.operands.iter().any(|(_, v)| is_ref(v)) {
                    for (_, v) in &mut phi.operands {
                        if is_zero(v) {
                            *v = Value::Const(Constant::Null);
                            changed = true;
                        }
                    }
                }
            }
            if let Terminator::If { first, second: Some(second), .. } = &mut block.terminator {
                if is_ref(first) && is_zero(second) {
                    *second = Value::Const(Constant::Null);
                    changed = true;
                } else if is_ref(second) && is_zero(first) {
                    *first = Value::Const(Constant::Null);
                    changed = true;
                }
            }
        }
        Ok(changed)
    }
}

/// The value a statement dereferences, if any.
fn dereferenced(stmt: &Stmt) -> Option<&Value> {
    match stmt {
        Stmt::Assign { expr, .. } | Stmt::Effect(expr) => match expr {
            Expr::GetField { object, .. } => Some(object),
            Expr::ArrayLength(array) | Expr::ArrayLoad { array, .. } => Some(array),
            Expr::Invoke { kind, args, .. } if *kind != InvokeKind::Static => args.first(),
            Expr::InvokePolymorphic { args, .. } => args.first(),
            _ => None,
        },
        Stmt::ArrayStore { array, .. }
        | Stmt::FillArrayData { array, .. }
        | Stmt::MonitorEnter(array)
        | Stmt::MonitorExit(array) => Some(array),
        Stmt::PutField { object, .. } => Some(object),
        Stmt::PutStatic { .. } => None,
    }
}

/// Cuts a block at the first access through a constant null and makes it
/// throw the exception that access would raise.
pub struct Npe;

impl Transformer for Npe {
    fn name(&self) -> &'static str {
        "npe"
    }

    fn transform(&self, method: &mut IrMethod) -> Result<bool, ConvertError> {
        let mut changed = false;
        for id in method.layout.clone() {
            if method.is_covered(id) || !method.exceptional_successors(id).is_empty() {
                continue;
            }
            let position = method.block(id).and_then(|b| {
                b.stmts.iter().position(|s| dereferenced(s).map_or(false, |v| matches!(v, Value::Const(c) if c.is_zero_literal())))
            });
            let Some(position) = position else {
                continue;
            };
            let exception = method.new_local();
            if let Some(block) = method.block_mut(id) {
                block.stmts.truncate(position);
                block.stmts.push(Stmt::Assign {
                    dst: exception,
                    expr: Expr::NewObject {
                        class: NULL_POINTER_EXCEPTION.to_string(),
                        constructor: MethodRef::new(NULL_POINTER_EXCEPTION, "<init>", "()V"),
                        args: Vec::new(),
                    },
                });
                block.terminator = Terminator::Throw(Value::Local(exception));
                changed = true;
            }
        }
        if changed {
            method.remove_unreachable();
            method.prune_edges();
        }
        Ok(changed)
    }
}
