//! Folds multi-statement dex idioms into single JVM-shaped expressions.

use std::collections::HashMap;

use crate::dex::instructions::InvokeKind;
use crate::error::ConvertError;
use crate::ir::passes::{used_in_handlers, Transformer};
use crate::ir::typing::data_element;
use crate::ir::{BlockId, Constant, Expr, IrMethod, LocalId, Stmt, Terminator, Value};

/// Joins `new-instance` with the constructor call that initializes it.
pub struct NewObject;

impl Transformer for NewObject {
    fn name(&self) -> &'static str {
        "new_object"
    }

    fn transform(&self, method: &mut IrMethod) -> Result<bool, ConvertError> {
        let preds = method.predecessors();
        let mut changed = false;
        for id in method.layout.clone() {
            let mut i = 0;
            while let Some(stmt) = method.block(id).and_then(|b| b.stmts.get(i)) {
                let Stmt::Assign { dst, expr: Expr::NewInstance(class) } = stmt else {
                    i += 1;
                    continue;
                };
                let (local, class) = (*dst, class.clone());
                let Some((site, at)) = find_init(method, &preds, id, i, local) else {
                    i += 1;
                    continue;
                };
                let Some(Stmt::Effect(Expr::Invoke { method: constructor, args, .. })) =
                    method.block(site).and_then(|b| b.stmts.get(at)).cloned()
                else {
                    i += 1;
                    continue;
                };
                if let Some(block) = method.block_mut(site) {
                    block.stmts[at] = Stmt::Assign {
                        dst: local,
                        expr: Expr::NewObject { class, constructor, args: args[1..].to_vec() },
                    };
                }
                if let Some(block) = method.block_mut(id) {
                    block.stmts.remove(i);
                }
                changed = true;
            }
        }
        Ok(changed)
    }
}

/// Locates the constructor call for the allocation at `(start, index)`,
/// walking forward through single-predecessor `goto` chains.
fn find_init(
    method: &IrMethod,
    preds: &HashMap<BlockId, Vec<BlockId>>,
    start: BlockId,
    index: usize,
    local: LocalId,
) -> Option<(BlockId, usize)> {
    let object = Value::Local(local);
    let mut path = vec![start];
    let mut current = start;
    let mut from = index + 1;
    loop {
        let block = method.block(current)?;
        if block.phis.iter().any(|p| p.operands.iter().any(|(_, v)| *v == object)) {
            return None;
        }
        for (j, stmt) in block.stmts.iter().enumerate().skip(from) {
            if let Stmt::Effect(Expr::Invoke { kind: InvokeKind::Direct, method: callee, args }) = stmt {
                if callee.name == "<init>" && args.first() == Some(&object) {
                    if args[1..].contains(&object) || used_in_handlers(method, &path, local) {
                        return None;
                    }
                    return Some((current, j));
                }
            }
            if stmt.uses(local) {
                return None;
            }
        }
        if block.terminator.values().contains(&&object) {
            return None;
        }
        let Terminator::Goto(next) = block.terminator else {
            return None;
        };
        if path.contains(&next) || method.is_handler(next) {
            return None;
        }
        if preds.get(&next).map_or(true, |p| p.as_slice() != [current]) {
            return None;
        }
        path.push(next);
        current = next;
        from = 0;
    }
}

struct Rewrite {
    at: usize,
    stmt: Stmt,
    remove: Vec<usize>,
}

/// Turns a constant-size `new-array` followed by its complete
/// initialization into one array literal.
pub struct FillArray;

impl Transformer for FillArray {
    fn name(&self) -> &'static str {
        "fill_array"
    }

    fn transform(&self, method: &mut IrMethod) -> Result<bool, ConvertError> {
        let mut changed = false;
        for id in method.layout.clone() {
            while let Some(rewrite) = find_array_fill(method, id) {
                let Some(block) = method.block_mut(id) else {
                    break;
                };
                block.stmts[rewrite.at] = rewrite.stmt;
                let mut remove = rewrite.remove;
                remove.sort_unstable_by(|a, b| b.cmp(a));
                for index in remove {
                    block.stmts.remove(index);
                }
                changed = true;
            }
        }
        Ok(changed)
    }
}

fn find_array_fill(method: &IrMethod, id: BlockId) -> Option<Rewrite> {
    let block = method.block(id)?;
    for (i, stmt) in block.stmts.iter().enumerate() {
        let Stmt::Assign { dst, expr: Expr::NewArray { class, size: Value::Const(size) } } = stmt else {
            continue;
        };
        let Some(size) = size.as_int().filter(|n| *n > 0).map(|n| n as usize) else {
            continue;
        };
        if used_in_handlers(method, &[id], *dst) {
            continue;
        }
        let array = Value::Local(*dst);
        let element = &class[1..];
        let mut elements: Vec<Value> = Vec::new();
        let mut stores = Vec::new();
        for (j, later) in block.stmts.iter().enumerate().skip(i + 1) {
            match later {
                Stmt::FillArrayData { array: target, data } if *target == array && stores.is_empty() => {
                    if data.elements.len() != size {
                        break;
                    }
                    let Some(typed) = data
                        .elements
                        .iter()
                        .map(|bits| data_element(element, *bits).map(Value::Const))
                        .collect::<Option<Vec<_>>>()
                    else {
                        break;
                    };
                    return Some(Rewrite {
                        at: j,
                        stmt: Stmt::Assign { dst: *dst, expr: Expr::FilledArray { class: class.clone(), elements: typed } },
                        remove: vec![i],
                    });
                }
                Stmt::ArrayStore { array: target, index: Value::Const(index), value, .. }
                    if *target == array && *value != array && index.as_int() == Some(elements.len() as i32) =>
                {
                    elements.push(value.clone());
                    stores.push(j);
                    if elements.len() == size {
                        let mut remove = vec![i];
                        remove.extend(&stores[..stores.len() - 1]);
                        return Some(Rewrite {
                            at: j,
                            stmt: Stmt::Assign { dst: *dst, expr: Expr::FilledArray { class: class.clone(), elements } },
                            remove,
                        });
                    }
                }
                other if other.uses(*dst) => break,
                _ => {}
            }
        }
    }
    None
}

const REFLECT_ARRAY: &str = "Ljava/lang/reflect/Array;";
const NEW_INSTANCE_DESC: &str = "(Ljava/lang/Class;[I)Ljava/lang/Object;";

/// Primitive descriptor behind a box class's `TYPE` field.
fn primitive_of_box(owner: &str) -> Option<&'static str> {
    Some(match owner {
        "Ljava/lang/Boolean;" => "Z",
        "Ljava/lang/Byte;" => "B",
        "Ljava/lang/Character;" => "C",
        "Ljava/lang/Short;" => "S",
        "Ljava/lang/Integer;" => "I",
        "Ljava/lang/Long;" => "J",
        "Ljava/lang/Float;" => "F",
        "Ljava/lang/Double;" => "D",
        _ => return None,
    })
}

/// Rewrites `Array.newInstance(cls, new int[]{..})` into a direct
/// multi-dimensional allocation.
pub struct MultiArray;

impl Transformer for MultiArray {
    fn name(&self) -> &'static str {
        "multi_array"
    }

    fn transform(&self, method: &mut IrMethod) -> Result<bool, ConvertError> {
        let mut defs: HashMap<LocalId, Expr> = HashMap::new();
        for stmt in method.stmts() {
            if let Stmt::Assign { dst, expr } = stmt {
                defs.insert(*dst, expr.clone());
            }
        }
        let uses = method.use_counts();
        let mut dropped: Vec<LocalId> = Vec::new();
        let mut changed = false;

        for id in method.layout.clone() {
            let Some(block) = method.block_mut(id) else {
                continue;
            };
            for i in 0..block.stmts.len() {
                let Stmt::Assign { expr: Expr::Invoke { kind: InvokeKind::Static, method: callee, args }, .. } = &block.stmts[i]
                else {
                    continue;
                };
                if callee.owner != REFLECT_ARRAY || callee.name != "newInstance" || callee.descriptor != NEW_INSTANCE_DESC {
                    continue;
                }
                let (class_arg, dims_arg) = (args[0].clone(), args[1].clone());
                let (element, box_local) = match &class_arg {
                    Value::Const(Constant::Type(desc)) => (desc.clone(), None),
                    Value::Local(l) => match defs.get(l) {
                        Some(Expr::GetStatic { field }) if field.name == "TYPE" => match primitive_of_box(&field.owner) {
                            Some(p) => (p.to_string(), Some(*l)),
                            None => continue,
                        },
                        _ => continue,
                    },
                    Value::Const(_) => continue,
                };
                let Some(dims_local) = dims_arg.local() else {
                    continue;
                };
                let in_block = block.stmts[..i].iter().any(|s| s.def() == Some(dims_local));
                let Some(Expr::FilledArray { class, elements }) = defs.get(&dims_local) else {
                    continue;
                };
                if class != "[I" || elements.is_empty() || !in_block {
                    continue;
                }
                let class = format!("{}{}", "[".repeat(elements.len()), element);
                let folded = if elements.len() == 1 {
                    Expr::NewArray { class, size: elements[0].clone() }
                } else {
                    Expr::NewMultiArray { class, dims: elements.clone() }
                };
                if let Stmt::Assign { expr, .. } = &mut block.stmts[i] {
                    *expr = folded;
                }
                if uses.get(&dims_local) == Some(&1) {
                    dropped.push(dims_local);
                }
                if let Some(l) = box_local.filter(|l| uses.get(l) == Some(&1)) {
                    dropped.push(l);
                }
                changed = true;
            }
        }

        if !dropped.is_empty() {
            for block in method.blocks.values_mut() {
                block.stmts.retain(|s| s.def().map_or(true, |d| !dropped.contains(&d)));
            }
        }
        Ok(changed)
    }
}

/// Calls returning `void` cannot produce a value; any reader gets zero.
pub struct VoidInvoke;

impl Transformer for VoidInvoke {
    fn name(&self) -> &'static str {
        "void_invoke"
    }

    fn transform(&self, method: &mut IrMethod) -> Result<bool, ConvertError> {
        let uses = method.use_counts();
        let mut changed = false;
        for block in method.blocks.values_mut() {
            let stmts = std::mem::take(&mut block.stmts);
            for stmt in stmts {
                match stmt {
                    Stmt::Assign { dst, expr } if expr.invoke_return() == Some("V") => {
                        block.stmts.push(Stmt::Effect(expr));
                        if uses.get(&dst).map_or(false, |n| *n > 0) {
                            block.stmts.push(Stmt::Assign { dst, expr: Expr::Value(Value::literal(0, false)) });
                        }
                        changed = true;
                    }
                    other => block.stmts.push(other),
                }
            }
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::instructions::{ArrayData, ArrayOperation, DexInstruction, Label, MoveKind};
    use crate::dex::nodes::{FieldRef, MethodRef};
    use crate::ir::passes::{RemoveConstant, RemoveLocal};
    use crate::ir::testing::lift_static;

    fn new_instance(dest: u16) -> DexInstruction {
        DexInstruction::NewInstance { dest, class: "La/C;".to_string() }
    }

    fn init(args: Vec<u16>, descriptor: &str) -> DexInstruction {
        DexInstruction::Invoke { kind: InvokeKind::Direct, args, method: MethodRef::new("La/C;", "<init>", descriptor) }
    }

    fn all_stmts(m: &IrMethod) -> Vec<Stmt> {
        m.layout.iter().flat_map(|b| m.block(*b).unwrap().stmts.clone()).filter(|s| !matches!(s.expr(), Some(Expr::Param(_)))).collect()
    }

    #[test]
    fn allocation_and_constructor_merge() {
        let mut m = lift_static(
            "()La/C;",
            2,
            vec![
                new_instance(0),
                DexInstruction::Const { dest: 1, value: 5 },
                init(vec![0, 1], "(I)V"),
                DexInstruction::Return { kind: MoveKind::Object, src: 0 },
            ],
        );
        RemoveConstant.transform(&mut m).unwrap();
        assert!(NewObject.transform(&mut m).unwrap());
        let stmts = all_stmts(&m);
        assert_eq!(stmts.len(), 1);
        match &stmts[0] {
            Stmt::Assign { expr: Expr::NewObject { class, constructor, args }, .. } => {
                assert_eq!(class, "La/C;");
                assert_eq!(constructor.descriptor, "(I)V");
                assert_eq!(args, &vec![Value::literal(5, false)]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn constructor_after_a_goto() {
        let mut m = lift_static(
            "()La/C;",
            1,
            vec![
                new_instance(0),
                DexInstruction::Goto { target: Label::new("l") },
                DexInstruction::Label(Label::new("l")),
                init(vec![0], "()V"),
                DexInstruction::Return { kind: MoveKind::Object, src: 0 },
            ],
        );
        assert!(NewObject.transform(&mut m).unwrap());
        assert!(!all_stmts(&m).iter().any(|s| matches!(s.expr(), Some(Expr::NewInstance(_)))));
    }

    #[test]
    fn early_use_blocks_the_merge() {
        let mut m = lift_static(
            "()La/C;",
            1,
            vec![
                new_instance(0),
                DexInstruction::Invoke {
                    kind: InvokeKind::Static,
                    args: vec![0],
                    method: MethodRef::new("La/D;", "f", "(Ljava/lang/Object;)V"),
                },
                init(vec![0], "()V"),
                DexInstruction::Return { kind: MoveKind::Object, src: 0 },
            ],
        );
        assert!(!NewObject.transform(&mut m).unwrap());

        let mut m = lift_static(
            "()La/C;",
            1,
            vec![new_instance(0), init(vec![0, 0], "(La/C;)V"), DexInstruction::Return { kind: MoveKind::Object, src: 0 }],
        );
        assert!(!NewObject.transform(&mut m).unwrap());
    }

    #[test]
    fn fill_array_data_becomes_a_literal() {
        let mut m = lift_static(
            "()[I",
            2,
            vec![
                DexInstruction::Const { dest: 0, value: 3 },
                DexInstruction::NewArray { dest: 1, size: 0, class: "[I".to_string() },
                DexInstruction::FillArrayData { array: 1, data: ArrayData::new(4, &[1i32, 2, 3]) },
                DexInstruction::Return { kind: MoveKind::Object, src: 1 },
            ],
        );
        RemoveConstant.transform(&mut m).unwrap();
        assert!(FillArray.transform(&mut m).unwrap());
        let stmts = all_stmts(&m);
        assert_eq!(stmts.len(), 1);
        let expected: Vec<Value> = [1, 2, 3].iter().map(|v| Value::Const(Constant::Int(*v))).collect();
        assert!(matches!(&stmts[0], Stmt::Assign { expr: Expr::FilledArray { elements, .. }, .. } if *elements == expected));
    }

    #[test]
    fn ordered_stores_become_a_literal() {
        let put = |value, index| DexInstruction::Array { op: ArrayOperation::PutObject, value, array: 1, index };
        let mut m = lift_static(
            "()[Ljava/lang/String;",
            4,
            vec![
                DexInstruction::Const { dest: 0, value: 2 },
                DexInstruction::NewArray { dest: 1, size: 0, class: "[Ljava/lang/String;".to_string() },
                DexInstruction::Const { dest: 2, value: 0 },
                DexInstruction::ConstString { dest: 3, value: "a".to_string() },
                put(3, 2),
                DexInstruction::Const { dest: 2, value: 1 },
                DexInstruction::ConstString { dest: 3, value: "b".to_string() },
                put(3, 2),
                DexInstruction::Return { kind: MoveKind::Object, src: 1 },
            ],
        );
        RemoveLocal.transform(&mut m).unwrap();
        RemoveConstant.transform(&mut m).unwrap();
        assert!(FillArray.transform(&mut m).unwrap());
        let stmts = all_stmts(&m);
        assert_eq!(stmts.len(), 1);
        let expected = vec![
            Value::Const(Constant::String("a".to_string())),
            Value::Const(Constant::String("b".to_string())),
        ];
        assert!(matches!(&stmts[0], Stmt::Assign { expr: Expr::FilledArray { elements, .. }, .. } if *elements == expected));
    }

    #[test]
    fn out_of_order_stores_stay() {
        let put = |index| DexInstruction::Array { op: ArrayOperation::Put, value: 0, array: 1, index };
        let mut m = lift_static(
            "()[I",
            3,
            vec![
                DexInstruction::Const { dest: 0, value: 2 },
                DexInstruction::NewArray { dest: 1, size: 0, class: "[I".to_string() },
                DexInstruction::Const { dest: 2, value: 1 },
                put(2),
                DexInstruction::Const { dest: 2, value: 0 },
                put(2),
                DexInstruction::Return { kind: MoveKind::Object, src: 1 },
            ],
        );
        RemoveConstant.transform(&mut m).unwrap();
        assert!(!FillArray.transform(&mut m).unwrap());
    }

    #[test]
    fn reflective_allocation_becomes_multianewarray() {
        let mut m = lift_static(
            "()Ljava/lang/Object;",
            5,
            vec![
                DexInstruction::Const { dest: 0, value: 2 },
                DexInstruction::Const { dest: 1, value: 3 },
                DexInstruction::FilledNewArray { args: vec![0, 1], class: "[I".to_string() },
                DexInstruction::MoveResult { kind: MoveKind::Object, dest: 2 },
                DexInstruction::Static {
                    op: ArrayOperation::GetObject,
                    value: 3,
                    field: FieldRef::new("Ljava/lang/Integer;", "TYPE", "Ljava/lang/Class;"),
                },
                DexInstruction::Invoke {
                    kind: InvokeKind::Static,
                    args: vec![3, 2],
                    method: MethodRef::new(REFLECT_ARRAY, "newInstance", NEW_INSTANCE_DESC),
                },
                DexInstruction::MoveResult { kind: MoveKind::Object, dest: 4 },
                DexInstruction::Return { kind: MoveKind::Object, src: 4 },
            ],
        );
        RemoveConstant.transform(&mut m).unwrap();
        assert!(MultiArray.transform(&mut m).unwrap());
        let stmts = all_stmts(&m);
        assert_eq!(stmts.len(), 1);
        match &stmts[0] {
            Stmt::Assign { expr: Expr::NewMultiArray { class, dims }, .. } => {
                assert_eq!(class, "[[I");
                assert_eq!(dims, &vec![Value::literal(2, false), Value::literal(3, false)]);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn void_result_reads_as_zero() {
        let mut m = lift_static(
            "()I",
            1,
            vec![
                DexInstruction::Invoke { kind: InvokeKind::Static, args: vec![], method: MethodRef::new("La/D;", "g", "()V") },
                DexInstruction::MoveResult { kind: MoveKind::Single, dest: 0 },
                DexInstruction::Return { kind: MoveKind::Single, src: 0 },
            ],
        );
        assert!(VoidInvoke.transform(&mut m).unwrap());
        let stmts = all_stmts(&m);
        assert!(matches!(stmts[0], Stmt::Effect(Expr::Invoke { .. })));
        assert!(matches!(&stmts[1], Stmt::Assign { expr: Expr::Value(v), .. } if *v == Value::literal(0, false)));
        assert!(!VoidInvoke.transform(&mut m).unwrap());
    }
}
