use crate::error::ConvertError;
use crate::ir::passes::Transformer;
use crate::ir::typing::{expr_type, for_each_typed_use_mut, stmt_expectations, terminator_expectations};
use crate::ir::{Constant, Expr, IrMethod, IrType, Stmt, Value, OBJECT_DESC};

/// Assigns a JVM type to every local and gives every raw literal a
/// concrete constant type.
///
/// Locals joined by copies share a type. A class takes the type of its
/// definitions first and of its uses second; `Object` from an untyped
/// reference use yields to anything more specific. Classes still unknown
/// afterwards are `int`, or `long` when a wide literal flows in.
pub struct TypeInfer;

struct Classes {
    parent: Vec<usize>,
}

impl Classes {
    fn new(size: usize) -> Self {
        Classes { parent: (0..size).collect() }
    }

    fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let (a, b) = (self.find(a), self.find(b));
        if a != b {
            self.parent[b] = a;
        }
    }
}

fn join(current: &IrType, incoming: &IrType) -> IrType {
    match (current, incoming) {
        (IrType::Unknown, t) | (t, IrType::Unknown) => t.clone(),
        (IrType::Ref(desc), t) if desc == OBJECT_DESC => t.clone(),
        (t, _) => t.clone(),
    }
}

fn typed_literal(bits: i64, wide: bool, expected: Option<&IrType>) -> Constant {
    match expected {
        Some(IrType::Int) => Constant::Int(bits as i32),
        Some(IrType::Long) => Constant::Long(bits),
        Some(IrType::Float) => Constant::Float(f32::from_bits(bits as u32)),
        Some(IrType::Double) => Constant::Double(f64::from_bits(bits as u64)),
        Some(IrType::Ref(_)) if bits == 0 => Constant::Null,
        _ if wide => Constant::Long(bits),
        _ => Constant::Int(bits as i32),
    }
}

const MAX_ROUNDS: usize = 8;

impl Transformer for TypeInfer {
    fn name(&self) -> &'static str {
        "type_infer"
    }

    fn transform(&self, method: &mut IrMethod) -> Result<bool, ConvertError> {
        let size = method.locals.len();
        let mut classes = Classes::new(size);
        let mut wide = vec![false; size];
        for block in method.blocks.values() {
            for phi in &block.phis {
                for (_, operand) in &phi.operands {
                    match operand {
                        Value::Local(src) => classes.union(phi.dst.0 as usize, src.0 as usize),
                        Value::Const(Constant::Literal { wide: true, .. }) => wide[phi.dst.0 as usize] = true,
                        Value::Const(_) => {}
                    }
                }
            }
            for stmt in &block.stmts {
                match stmt {
                    Stmt::Assign { dst, expr: Expr::Value(Value::Local(src)) } => {
                        classes.union(dst.0 as usize, src.0 as usize)
                    }
                    Stmt::Assign { dst, expr: Expr::Value(Value::Const(Constant::Literal { wide: true, .. })) } => {
                        wide[dst.0 as usize] = true
                    }
                    _ => {}
                }
            }
        }

        let before = method.locals.clone();
        let mut types = vec![IrType::Unknown; size];
        for _ in 0..MAX_ROUNDS {
            let mut next = vec![IrType::Unknown; size];
            for stmt in method.stmts() {
                if let Stmt::Assign { dst, expr } = stmt {
                    if let Some(t) = expr_type(method, expr).filter(IrType::is_known) {
                        let root = classes.find(dst.0 as usize);
                        next[root] = join(&next[root], &t);
                    }
                }
            }
            for id in &method.layout {
                let Some(block) = method.block(*id) else {
                    continue;
                };
                let mut uses: Vec<(Value, Option<IrType>)> = Vec::new();
                for stmt in &block.stmts {
                    uses.extend(stmt.values().into_iter().cloned().zip(stmt_expectations(method, stmt)));
                }
                uses.extend(
                    block.terminator.values().into_iter().cloned().zip(terminator_expectations(method, &block.terminator)),
                );
                for (value, expected) in uses {
                    if let (Value::Local(l), Some(t)) = (value, expected) {
                        let root = classes.find(l.0 as usize);
                        next[root] = join(&next[root], &t);
                    }
                }
            }
            let settled = next == types;
            types = next;
            for local in 0..size {
                method.locals[local] = types[classes.find(local)].clone();
            }
            if settled {
                break;
            }
        }

        let mut wide_roots = vec![false; size];
        for local in 0..size {
            if wide[local] {
                wide_roots[classes.find(local)] = true;
            }
        }
        for local in 0..size {
            if !method.locals[local].is_known() {
                method.locals[local] = if wide_roots[classes.find(local)] { IrType::Long } else { IrType::Int };
            }
        }
        let mut changed = before != method.locals;

        let locals = method.locals.clone();
        for block in method.blocks.values_mut() {
            for phi in &mut block.phis {
                let t = &locals[phi.dst.0 as usize];
                for (_, operand) in &mut phi.operands {
                    if let Value::Const(Constant::Literal { bits, wide }) = *operand {
                        *operand = Value::Const(typed_literal(bits, wide, Some(t)));
                        changed = true;
                    }
                }
            }
            for stmt in &mut block.stmts {
                if let Stmt::Assign { dst, expr: Expr::Value(value) } = stmt {
                    if let Value::Const(Constant::Literal { bits, wide }) = *value {
                        *value = Value::Const(typed_literal(bits, wide, Some(&locals[dst.0 as usize])));
                        changed = true;
                    }
                }
            }
        }
        for_each_typed_use_mut(method, |value, expected| {
            if let Value::Const(Constant::Literal { bits, wide }) = *value {
                *value = Value::Const(typed_literal(bits, wide, expected));
                changed = true;
            }
        });
        Ok(changed)
    }
}
