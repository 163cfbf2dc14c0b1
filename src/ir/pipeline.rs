//! Fixed ordering of the IR transformations.

use log::trace;

use crate::error::ConvertError;
use crate::ir::passes::{
    CleanLabel, DeadCode, FillArray, MultiArray, NewObject, Npe, RemoveConstant, RemoveLocal, Transformer, TypeInfer,
    UnSsa, VoidInvoke, Zero,
};
use crate::ir::IrMethod;

pub enum Stage {
    Pass(Box<dyn Transformer>),
    /// Runs `pass`, then runs `then` exactly once if `pass` changed the method.
    RerunOnChange { pass: Box<dyn Transformer>, then: Vec<Box<dyn Transformer>> },
}

pub struct Pipeline {
    stages: Vec<Stage>,
}

fn cleanup() -> Vec<Box<dyn Transformer>> {
    vec![Box::new(DeadCode), Box::new(RemoveLocal), Box::new(RemoveConstant)]
}

fn passes(list: Vec<Box<dyn Transformer>>) -> impl Iterator<Item = Stage> {
    list.into_iter().map(Stage::Pass)
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Self {
        Pipeline { stages }
    }

    /// The ordering every converted method body goes through.
    pub fn standard() -> Self {
        let mut stages = vec![Stage::Pass(Box::new(CleanLabel))];
        stages.extend(passes(cleanup()));
        stages.push(Stage::Pass(Box::new(Zero)));
        stages.push(Stage::RerunOnChange { pass: Box::new(Npe), then: cleanup() });
        stages.extend(passes(vec![
            Box::new(NewObject),
            Box::new(FillArray),
            Box::new(UnSsa),
            Box::new(MultiArray),
            Box::new(VoidInvoke),
        ]));
        stages.extend(passes(cleanup()));
        stages.push(Stage::Pass(Box::new(TypeInfer)));
        Pipeline::new(stages)
    }

    pub fn run(&self, method: &mut IrMethod) -> Result<(), ConvertError> {
        for stage in &self.stages {
            match stage {
                Stage::Pass(pass) => {
                    apply(pass.as_ref(), method)?;
                }
                Stage::RerunOnChange { pass, then } => {
                    if apply(pass.as_ref(), method)? {
                        for follow in then {
                            apply(follow.as_ref(), method)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Pass names in execution order; conditional follow-ups are listed
    /// as `pass?follow`.
    pub fn stage_names(&self) -> Vec<String> {
        let mut out = Vec::new();
        for stage in &self.stages {
            match stage {
                Stage::Pass(pass) => out.push(pass.name().to_string()),
                Stage::RerunOnChange { pass, then } => {
                    out.push(pass.name().to_string());
                    out.extend(then.iter().map(|f| format!("{}?{}", pass.name(), f.name())));
                }
            }
        }
        out
    }
}

fn apply(pass: &dyn Transformer, method: &mut IrMethod) -> Result<bool, ConvertError> {
    let changed = pass.transform(method).map_err(|e| e.in_stage(pass.name()))?;
    trace!("{}->{}: {} {}", method.owner, method.name, pass.name(), if changed { "changed" } else { "unchanged" });
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::instructions::{ArrayOperation, DexInstruction, MoveKind};
    use crate::dex::nodes::FieldRef;
    use crate::ir::testing::lift_static;
    use crate::ir::{Expr, Stmt, Terminator};
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn standard_order() {
        let names = Pipeline::standard().stage_names();
        assert_eq!(
            names,
            vec![
                "clean_label",
                "dead_code",
                "remove_local",
                "remove_constant",
                "zero",
                "npe",
                "npe?dead_code",
                "npe?remove_local",
                "npe?remove_constant",
                "new_object",
                "fill_array",
                "unssa",
                "multi_array",
                "void_invoke",
                "dead_code",
                "remove_local",
                "remove_constant",
                "type_infer",
            ]
        );
    }

    struct Counting {
        name: &'static str,
        changes: bool,
        runs: Rc<Cell<usize>>,
    }

    impl Transformer for Counting {
        fn name(&self) -> &'static str {
            self.name
        }

        fn transform(&self, _method: &mut IrMethod) -> Result<bool, ConvertError> {
            self.runs.set(self.runs.get() + 1);
            Ok(self.changes)
        }
    }

    fn counting(name: &'static str, changes: bool) -> (Box<dyn Transformer>, Rc<Cell<usize>>) {
        let runs = Rc::new(Cell::new(0));
        (Box::new(Counting { name, changes, runs: runs.clone() }), runs)
    }

    #[test]
    fn follow_ups_run_once_only_after_a_change() {
        let mut m = lift_static("()V", 0, vec![DexInstruction::ReturnVoid]);

        let (trigger, _) = counting("trigger", true);
        let (follow, follow_runs) = counting("follow", true);
        Pipeline::new(vec![Stage::RerunOnChange { pass: trigger, then: vec![follow] }]).run(&mut m).unwrap();
        assert_eq!(follow_runs.get(), 1);

        let (quiet, _) = counting("quiet", false);
        let (follow, follow_runs) = counting("follow", true);
        Pipeline::new(vec![Stage::RerunOnChange { pass: quiet, then: vec![follow] }]).run(&mut m).unwrap();
        assert_eq!(follow_runs.get(), 0);
    }

    #[test]
    fn null_read_ends_in_a_throw() {
        let mut m = lift_static(
            "()I",
            2,
            vec![
                DexInstruction::Const { dest: 0, value: 0 },
                DexInstruction::Instance {
                    op: ArrayOperation::Get,
                    value: 1,
                    object: 0,
                    field: FieldRef::new("La/T;", "f", "I"),
                },
                DexInstruction::Return { kind: MoveKind::Single, src: 1 },
            ],
        );
        Pipeline::standard().run(&mut m).unwrap();
        let throws: Vec<&Terminator> =
            m.blocks.values().map(|b| &b.terminator).filter(|t| matches!(t, Terminator::Throw(_))).collect();
        assert_eq!(throws.len(), 1);
        assert!(m.stmts().any(|s| matches!(s, Stmt::Assign { expr: Expr::NewObject { .. }, .. })));
        assert!(!m.stmts().any(|s| matches!(s.expr(), Some(Expr::GetField { .. }))));
    }
}
