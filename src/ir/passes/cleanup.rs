use std::collections::{HashMap, HashSet};

use crate::error::ConvertError;
use crate::ir::passes::{resolve, Transformer};
use crate::ir::{Block, Expr, IrMethod, LocalId, Stmt, Terminator, Value};

/// Removes blocks that only jump elsewhere and glues straight-line chains.
pub struct CleanLabel;

impl Transformer for CleanLabel {
    fn name(&self) -> &'static str {
        "clean_label"
    }

    fn transform(&self, method: &mut IrMethod) -> Result<bool, ConvertError> {
        let mut changed = false;
        while skip_empty_block(method) || merge_chain(method) {
            changed = true;
        }
        Ok(changed)
    }
}

fn skip_empty_block(method: &mut IrMethod) -> bool {
    let all_preds = method.predecessors();
    for id in method.layout.clone() {
        if id == method.entry || method.is_handler(id) {
            continue;
        }
        let Some(target) = method.block(id).and_then(Block::is_empty_goto) else {
            continue;
        };
        if target == id {
            continue;
        }
        let preds = method.normal_predecessors(id);
        if preds.is_empty() {
            continue;
        }
        let target_has_phis = method.block(target).map_or(false, |b| !b.phis.is_empty());
        let target_preds = all_preds.get(&target).cloned().unwrap_or_default();
        if target_has_phis && preds.iter().any(|p| target_preds.contains(p)) {
            continue;
        }

        for pred in &preds {
            if let Some(block) = method.block_mut(*pred) {
                block.terminator.retarget(id, target);
            }
        }
        if let Some(block) = method.block_mut(target) {
            for phi in &mut block.phis {
                if let Some(pos) = phi.operands.iter().position(|(b, _)| *b == id) {
                    let (_, value) = phi.operands.remove(pos);
                    phi.operands.extend(preds.iter().map(|p| (*p, value.clone())));
                }
            }
        }
        method.blocks.remove(&id);
        method.layout.retain(|b| *b != id);
        method.prune_edges();
        return true;
    }
    false
}

fn merge_chain(method: &mut IrMethod) -> bool {
    let preds = method.predecessors();
    for id in method.layout.clone() {
        let Some(Terminator::Goto(next)) = method.block(id).map(|b| b.terminator.clone()) else {
            continue;
        };
        if next == id || next == method.entry || method.is_handler(next) {
            continue;
        }
        if preds.get(&next).map_or(true, |p| p.len() != 1) {
            continue;
        }
        if method.is_covered(id) || method.is_covered(next) {
            continue;
        }
        if method.block(next).map_or(true, |b| !b.phis.is_empty()) {
            continue;
        }
        let Some(absorbed) = method.blocks.remove(&next) else {
            continue;
        };
        if let Some(block) = method.block_mut(id) {
            block.stmts.extend(absorbed.stmts);
            block.terminator = absorbed.terminator;
        }
        for block in method.blocks.values_mut() {
            for phi in &mut block.phis {
                for (pred, _) in &mut phi.operands {
                    if *pred == next {
                        *pred = id;
                    }
                }
            }
        }
        method.layout.retain(|b| *b != next);
        return true;
    }
    false
}

/// Drops unreachable blocks and definitions nobody reads.
pub struct DeadCode;

impl Transformer for DeadCode {
    fn name(&self) -> &'static str {
        "dead_code"
    }

    fn transform(&self, method: &mut IrMethod) -> Result<bool, ConvertError> {
        let mut changed = method.remove_unreachable();
        method.prune_edges();

        let mut deps: HashMap<LocalId, Vec<LocalId>> = HashMap::new();
        let mut work: Vec<LocalId> = Vec::new();
        for block in method.blocks.values() {
            for phi in &block.phis {
                deps.entry(phi.dst).or_default().extend(phi.operands.iter().filter_map(|(_, v)| v.local()));
            }
            for stmt in &block.stmts {
                match stmt {
                    Stmt::Assign { dst, expr } if expr.is_pure() => {
                        deps.entry(*dst).or_default().extend(expr.values().into_iter().filter_map(|v| v.local()));
                    }
                    other => work.extend(other.values().into_iter().filter_map(|v| v.local())),
                }
            }
            work.extend(block.terminator.values().into_iter().filter_map(|v| v.local()));
        }
        let mut live = HashSet::new();
        while let Some(local) = work.pop() {
            if live.insert(local) {
                if let Some(next) = deps.get(&local) {
                    work.extend(next.iter().copied());
                }
            }
        }

        for block in method.blocks.values_mut() {
            let phis = block.phis.len();
            block.phis.retain(|p| live.contains(&p.dst));
            changed |= phis != block.phis.len();

            let stmts = std::mem::take(&mut block.stmts);
            for stmt in stmts {
                match stmt {
                    Stmt::Assign { dst, expr } if !live.contains(&dst) => {
                        changed = true;
                        if !expr.is_pure() {
                            block.stmts.push(Stmt::Effect(expr));
                        }
                    }
                    Stmt::Effect(expr) if expr.is_pure() => changed = true,
                    other => block.stmts.push(other),
                }
            }
        }
        Ok(changed)
    }
}

/// Copy propagation between single-assignment locals, plus removal of phis
/// that merge one value.
pub struct RemoveLocal;

impl Transformer for RemoveLocal {
    fn name(&self) -> &'static str {
        "remove_local"
    }

    fn transform(&self, method: &mut IrMethod) -> Result<bool, ConvertError> {
        let defs = method.def_counts();
        let single = |l: &LocalId| defs.get(l) == Some(&1);
        let mut map: HashMap<LocalId, Value> = HashMap::new();

        for block in method.blocks.values_mut() {
            block.stmts.retain(|stmt| match stmt {
                Stmt::Assign { dst, expr: Expr::Value(Value::Local(src)) } if dst != src && single(dst) && single(src) => {
                    map.insert(*dst, Value::Local(*src));
                    false
                }
                _ => true,
            });
        }

        loop {
            let mut found = false;
            for block in method.blocks.values_mut() {
                block.phis.retain(|phi| {
                    let mut same: Option<Value> = None;
                    for (_, operand) in &phi.operands {
                        let operand = resolve(&map, operand);
                        if operand == Value::Local(phi.dst) || Some(&operand) == same.as_ref() {
                            continue;
                        }
                        if same.is_some() {
                            return true;
                        }
                        same = Some(operand);
                    }
                    match same {
                        Some(value) => {
                            map.insert(phi.dst, value);
                            found = true;
                            false
                        }
                        None => true,
                    }
                });
            }
            if !found {
                break;
            }
        }

        method.replace_locals(&map);
        Ok(!map.is_empty())
    }
}

/// Replaces single-assignment locals holding a constant by the constant.
pub struct RemoveConstant;

impl Transformer for RemoveConstant {
    fn name(&self) -> &'static str {
        "remove_constant"
    }

    fn transform(&self, method: &mut IrMethod) -> Result<bool, ConvertError> {
        let defs = method.def_counts();
        let mut map: HashMap<LocalId, Value> = HashMap::new();
        for block in method.blocks.values_mut() {
            block.stmts.retain(|stmt| match stmt {
                Stmt::Assign { dst, expr: Expr::Value(value @ Value::Const(_)) } if defs.get(dst) == Some(&1) => {
                    map.insert(*dst, value.clone());
                    false
                }
                _ => true,
            });
        }
        method.replace_locals(&map);
        Ok(!map.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::instructions::{BinaryOperation, DexInstruction, InvokeKind, Label, MoveKind, TestType};
    use crate::dex::nodes::MethodRef;
    use crate::ir::testing::lift_static;

    fn label(name: &str) -> DexInstruction {
        DexInstruction::Label(Label::new(name))
    }

    #[test]
    fn straight_line_gotos_collapse() {
        let mut m = lift_static(
            "()I",
            1,
            vec![
                DexInstruction::Const { dest: 0, value: 4 },
                DexInstruction::Goto { target: Label::new("a") },
                label("a"),
                DexInstruction::Goto { target: Label::new("b") },
                label("b"),
                DexInstruction::Return { kind: MoveKind::Single, src: 0 },
            ],
        );
        assert!(CleanLabel.transform(&mut m).unwrap());
        assert_eq!(m.layout.len(), 1);
        assert!(matches!(m.block(m.entry).unwrap().terminator, Terminator::Return(Some(_))));
        assert!(!CleanLabel.transform(&mut m).unwrap());
    }

    #[test]
    fn empty_block_before_a_join_keeps_phi_operands() {
        let mut m = lift_static(
            "(I)I",
            2,
            vec![
                DexInstruction::Const { dest: 0, value: 2 },
                DexInstruction::IfZ { test: TestType::Equal, src: 1, target: Label::new("skip") },
                DexInstruction::Const { dest: 0, value: 1 },
                DexInstruction::Goto { target: Label::new("join") },
                label("skip"),
                DexInstruction::Goto { target: Label::new("join") },
                label("join"),
                DexInstruction::Return { kind: MoveKind::Single, src: 0 },
            ],
        );
        let blocks = m.layout.len();
        assert!(CleanLabel.transform(&mut m).unwrap());
        assert!(m.layout.len() < blocks);
        let preds = m.predecessors();
        let (join, block) = m.blocks.iter().find(|(_, b)| !b.phis.is_empty()).unwrap();
        let phi = &block.phis[0];
        assert_eq!(phi.operands.len(), 2);
        for (pred, _) in &phi.operands {
            assert!(preds[join].contains(pred));
        }
    }

    #[test]
    fn dead_definitions_go_and_calls_stay() {
        let mut m = lift_static(
            "(II)V",
            4,
            vec![
                DexInstruction::Binary { op: BinaryOperation::AddInt, dest: 0, first: 2, second: 3 },
                DexInstruction::Binary { op: BinaryOperation::DivInt, dest: 1, first: 2, second: 3 },
                DexInstruction::Invoke {
                    kind: InvokeKind::Static,
                    args: vec![],
                    method: MethodRef::new("La/T;", "g", "()I"),
                },
                DexInstruction::MoveResult { kind: MoveKind::Single, dest: 0 },
                DexInstruction::ReturnVoid,
            ],
        );
        assert!(DeadCode.transform(&mut m).unwrap());
        let stmts: Vec<&Stmt> = m.stmts().filter(|s| !matches!(s.expr(), Some(Expr::Param(_)))).collect();
        assert_eq!(stmts.len(), 2);
        // the division may throw and survives for its effect
        assert!(matches!(stmts[0], Stmt::Effect(Expr::Binary { op: BinaryOperation::DivInt, .. })));
        assert!(matches!(stmts[1], Stmt::Effect(Expr::Invoke { .. })));
        assert!(!DeadCode.transform(&mut m).unwrap());
    }

    #[test]
    fn copies_and_constants_propagate() {
        let mut m = lift_static(
            "()I",
            2,
            vec![
                DexInstruction::Const { dest: 0, value: 9 },
                DexInstruction::Move { kind: MoveKind::Single, dest: 1, src: 0 },
                DexInstruction::Return { kind: MoveKind::Single, src: 1 },
            ],
        );
        assert!(RemoveLocal.transform(&mut m).unwrap());
        assert!(RemoveConstant.transform(&mut m).unwrap());
        assert_eq!(m.stmts().count(), 0);
        let body = m.block(m.layout[1]).unwrap();
        assert_eq!(body.terminator, Terminator::Return(Some(Value::literal(9, false))));
    }
}
