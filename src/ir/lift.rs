//! Register code to SSA.
//!
//! Blocks are cut at every label that is jumped to, after every branch, at
//! try boundaries and, inside a try range, after every instruction that can
//! throw. Register values are tracked per block and merged on demand: a read
//! in a block whose predecessors are not all known yet produces a pending
//! phi that is completed once the block is sealed, and phis that turn out to
//! merge a single value are folded away immediately.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use log::debug;

use crate::dex::instructions::{DexInstruction, InvokeKind, Label, Reg};
use crate::dex::nodes::{DexCodeNode, DexMethodNode};
use crate::dex::ACC_STATIC;
use crate::error::ConvertError;
use crate::ir::{Block, BlockId, Constant, Expr, Handler, IrMethod, LocalId, Phi, Stmt, Terminator, Trap, Value};
use crate::types::parse_method_descriptor;
use crate::values::convert_handle;

/// Lifts one method body.
pub fn lift(method: &DexMethodNode, code: &DexCodeNode) -> Result<IrMethod, ConvertError> {
    let signature = method.method.signature()?;
    let is_static = method.access & ACC_STATIC != 0;
    let mut params = Vec::new();
    if !is_static {
        params.push(method.method.owner.clone());
    }
    params.extend(signature.args.iter().map(|a| a.to_jni()));
    let ir = IrMethod::new(
        &method.method.owner,
        &method.method.name,
        &method.method.descriptor,
        is_static,
        params,
        &signature.result.to_jni(),
    );

    let mut lifter = Lifter::new(ir, code)?;
    lifter.shape(code)?;
    lifter.run(code.registers)?;
    let ir = lifter.finish();
    debug!("lifted {}{} into {} blocks", ir.name, ir.descriptor, ir.layout.len());
    Ok(ir)
}

/// Whether the IR form of the instruction can raise. Class literals and
/// `instance-of` only fail on linkage problems and are treated as pure.
fn throws(insn: &DexInstruction) -> bool {
    insn.can_throw() && !matches!(insn, DexInstruction::ConstClass { .. } | DexInstruction::InstanceOf { .. })
}

/// Register written by a throwing instruction, for those that write one
/// directly rather than through `move-result`.
fn throwing_dest(insn: &DexInstruction) -> Option<Reg> {
    if !throws(insn) {
        return None;
    }
    match insn {
        DexInstruction::CheckCast { reg, .. } => Some(*reg),
        DexInstruction::ArrayLength { dest, .. }
        | DexInstruction::NewInstance { dest, .. }
        | DexInstruction::NewArray { dest, .. }
        | DexInstruction::Binary { dest, .. }
        | DexInstruction::BinaryLit { dest, .. } => Some(*dest),
        DexInstruction::Array { op, value, .. }
        | DexInstruction::Instance { op, value, .. }
        | DexInstruction::Static { op, value, .. }
            if op.is_get() =>
        {
            Some(*value)
        }
        _ => None,
    }
}

struct Shape {
    id: BlockId,
    start: usize,
    end: usize,
    /// Block that publishes the result of a throwing last instruction.
    landing: Option<BlockId>,
}

struct PendingPhi {
    block: BlockId,
    operands: Vec<(BlockId, Value)>,
}

struct Lifter<'a> {
    ir: IrMethod,
    insns: Vec<&'a DexInstruction>,
    labels: HashMap<&'a str, usize>,
    tries: Vec<(usize, usize)>,
    shapes: Vec<Shape>,
    block_at: HashMap<usize, BlockId>,
    preds: HashMap<BlockId, Vec<BlockId>>,
    defs: HashMap<(BlockId, Reg), Value>,
    filled: HashSet<BlockId>,
    sealed: HashSet<BlockId>,
    incomplete: HashMap<BlockId, Vec<(Reg, LocalId)>>,
    phis: BTreeMap<LocalId, PendingPhi>,
    constructing: HashSet<LocalId>,
    replaced: HashMap<LocalId, Value>,
    /// Call results keyed by the position of their `move-result`.
    results: HashMap<usize, LocalId>,
}

impl<'a> Lifter<'a> {
    fn new(ir: IrMethod, code: &'a DexCodeNode) -> Result<Self, ConvertError> {
        let mut insns = Vec::new();
        let mut labels = HashMap::new();
        for insn in &code.instructions {
            match insn {
                DexInstruction::Label(label) => {
                    labels.insert(label.0.as_str(), insns.len());
                }
                DexInstruction::Nop => {}
                other => insns.push(other),
            }
        }
        if insns.is_empty() {
            fail!("method body has no instructions");
        }
        Ok(Lifter {
            ir,
            insns,
            labels,
            tries: Vec::new(),
            shapes: Vec::new(),
            block_at: HashMap::new(),
            preds: HashMap::new(),
            defs: HashMap::new(),
            filled: HashSet::new(),
            sealed: HashSet::new(),
            incomplete: HashMap::new(),
            phis: BTreeMap::new(),
            constructing: HashSet::new(),
            replaced: HashMap::new(),
            results: HashMap::new(),
        })
    }

    fn position(&self, label: &Label) -> Result<usize, ConvertError> {
        match self.labels.get(label.0.as_str()) {
            Some(pos) => Ok(*pos),
            None => Err(err!("unknown label {}", label)),
        }
    }

    fn block_of(&self, label: &Label) -> Result<BlockId, ConvertError> {
        let pos = self.position(label)?;
        match self.block_at.get(&pos) {
            Some(id) => Ok(*id),
            None => Err(err!("label {} does not start an instruction", label)),
        }
    }

    fn in_try(&self, pos: usize) -> bool {
        self.tries.iter().any(|(start, end)| (*start..*end).contains(&pos))
    }

    /// Cuts the instruction list into blocks and computes every edge.
    fn shape(&mut self, code: &DexCodeNode) -> Result<(), ConvertError> {
        let len = self.insns.len();
        for tc in &code.try_catches {
            let range = (self.position(&tc.start)?, self.position(&tc.end)?);
            self.tries.push(range);
        }

        let mut leaders = BTreeSet::new();
        leaders.insert(0);
        for tc in &code.try_catches {
            leaders.insert(self.position(&tc.start)?);
            leaders.insert(self.position(&tc.end)?);
            for handler in &tc.handlers {
                leaders.insert(self.position(&handler.handler)?);
            }
        }
        for (pos, insn) in self.insns.iter().enumerate() {
            for target in insn.targets() {
                leaders.insert(self.position(target)?);
            }
            if insn.is_branch() || (throws(insn) && self.in_try(pos)) {
                leaders.insert(pos + 1);
            }
        }
        let leaders: Vec<usize> = leaders.into_iter().filter(|p| *p < len).collect();

        let entry = self.ir.new_block_id();
        self.ir.entry = entry;
        self.ir.layout.push(entry);
        for (i, start) in leaders.iter().enumerate() {
            let id = self.ir.new_block_id();
            self.block_at.insert(*start, id);
            let end = leaders.get(i + 1).copied().unwrap_or(len);
            self.shapes.push(Shape { id, start: *start, end, landing: None });
        }
        for i in 0..self.shapes.len() {
            let last = self.shapes[i].end - 1;
            if throwing_dest(self.insns[last]).is_some() && self.in_try(last) {
                self.shapes[i].landing = Some(self.ir.new_block_id());
            }
        }

        let mut edges: Vec<(BlockId, BlockId)> = vec![(entry, self.shapes[0].id)];
        for shape in &self.shapes {
            self.ir.layout.push(shape.id);
            let last = self.insns[shape.end - 1];
            let fall = self.block_at.get(&shape.end).copied();
            let mut succs = Vec::new();
            for target in last.targets() {
                succs.push(self.block_of(target)?);
            }
            if !last.ends_flow() {
                if let Some(landing) = shape.landing {
                    self.ir.layout.push(landing);
                    edges.push((shape.id, landing));
                    if let Some(fall) = fall {
                        edges.push((landing, fall));
                    }
                } else if let Some(fall) = fall {
                    succs.push(fall);
                }
            }
            edges.extend(succs.into_iter().map(|s| (shape.id, s)));
        }
        for (i, tc) in code.try_catches.iter().enumerate() {
            let (start, end) = self.tries[i];
            let covered: Vec<BlockId> = self
                .shapes
                .iter()
                .filter(|s| (start..end).contains(&s.start) && throws(self.insns[s.end - 1]))
                .map(|s| s.id)
                .collect();
            if covered.is_empty() {
                continue;
            }
            let mut handlers = Vec::new();
            for handler in &tc.handlers {
                handlers.push(Handler { catch_type: handler.catch_type.clone(), target: self.block_of(&handler.handler)? });
            }
            for block in &covered {
                edges.extend(handlers.iter().map(|h| (*block, h.target)));
            }
            self.ir.traps.push(Trap { covered, handlers });
        }

        for (from, to) in edges {
            let list = self.preds.entry(to).or_default();
            if !list.contains(&from) {
                list.push(from);
            }
        }
        Ok(())
    }

    fn run(&mut self, registers: u16) -> Result<(), ConvertError> {
        let entry = self.ir.entry;
        self.seal(entry);
        self.fill_entry(registers)?;
        for i in 0..self.shapes.len() {
            let id = self.shapes[i].id;
            self.try_seal(id);
            let landing_write = self.fill(i)?;
            self.seal_successors(id);
            if let Some(landing) = self.shapes[i].landing {
                self.try_seal(landing);
                let next = self.block_at.get(&self.shapes[i].end).copied();
                let Some(next) = next else {
                    fail!("execution falls off the end of the code");
                };
                if let Some((reg, local)) = landing_write {
                    self.write(landing, reg, Value::Local(local));
                }
                self.ir.insert_block(landing, Block::new(Terminator::Goto(next)));
                self.filled.insert(landing);
                self.seal_successors(landing);
            }
        }
        let unsealed: Vec<BlockId> = self.ir.layout.iter().copied().filter(|b| !self.sealed.contains(b)).collect();
        for block in unsealed {
            self.seal(block);
        }
        Ok(())
    }

    fn finish(mut self) -> IrMethod {
        let phis = std::mem::take(&mut self.phis);
        for (dst, pending) in phis {
            let operands = pending.operands.into_iter().map(|(b, v)| (b, self.resolve(v))).collect();
            if let Some(block) = self.ir.block_mut(pending.block) {
                block.phis.push(Phi { dst, operands });
            }
        }
        self.ir.replace_locals(&self.replaced);
        self.ir
    }

    fn fill_entry(&mut self, registers: u16) -> Result<(), ConvertError> {
        let entry = self.ir.entry;
        let widths: Vec<u16> = self.ir.params.iter().map(|p| if p == "J" || p == "D" { 2 } else { 1 }).collect();
        let ins: u16 = widths.iter().sum();
        if ins > registers {
            fail!("{} parameter registers do not fit in {} registers", ins, registers);
        }
        let mut block = Block::new(Terminator::Goto(self.shapes[0].id));
        let mut reg = registers - ins;
        for (i, width) in widths.iter().enumerate() {
            let local = self.ir.new_local();
            block.stmts.push(Stmt::Assign { dst: local, expr: Expr::Param(i as u16) });
            self.write(entry, reg, Value::Local(local));
            reg += width;
        }
        self.ir.insert_block(entry, block);
        self.filled.insert(entry);
        self.seal_successors(entry);
        Ok(())
    }

    /// Fills one block. Returns the register write deferred to the landing
    /// block, if any.
    fn fill(&mut self, index: usize) -> Result<Option<(Reg, LocalId)>, ConvertError> {
        let (b, start, end, has_landing) = {
            let s = &self.shapes[index];
            (s.id, s.start, s.end, s.landing.is_some())
        };
        let mut stmts = Vec::new();
        let mut terminator = None;
        let mut deferred = None;

        for pos in start..end {
            let insn = self.insns[pos];
            let defer = has_landing && pos + 1 == end;
            let mut define = |lifter: &mut Self, stmts: &mut Vec<Stmt>, dest: Reg, expr: Expr| {
                let local = lifter.ir.new_local();
                stmts.push(Stmt::Assign { dst: local, expr });
                if defer {
                    deferred = Some((dest, local));
                } else {
                    lifter.write(b, dest, Value::Local(local));
                }
            };
            match insn {
                DexInstruction::Label(_) | DexInstruction::Nop => {}
                DexInstruction::Move { dest, src, .. } => {
                    let v = self.read(b, *src);
                    define(self, &mut stmts, *dest, Expr::Value(v));
                }
                DexInstruction::MoveResult { dest, .. } => {
                    let Some(result) = self.results.get(&pos).copied() else {
                        fail!("move-result at {} does not follow a call", pos);
                    };
                    self.write(b, *dest, Value::Local(result));
                }
                DexInstruction::MoveException { dest } => define(self, &mut stmts, *dest, Expr::CaughtException),
                DexInstruction::ReturnVoid => terminator = Some(Terminator::Return(None)),
                DexInstruction::Return { src, .. } => {
                    terminator = Some(Terminator::Return(Some(self.read(b, *src))));
                }
                DexInstruction::Const { dest, value } => {
                    define(self, &mut stmts, *dest, Expr::Value(Value::literal(*value as i64, false)));
                }
                DexInstruction::ConstWide { dest, value } => {
                    define(self, &mut stmts, *dest, Expr::Value(Value::literal(*value, true)));
                }
                DexInstruction::ConstString { dest, value } => {
                    define(self, &mut stmts, *dest, Expr::Value(Value::Const(Constant::String(value.clone()))));
                }
                DexInstruction::ConstClass { dest, class } => {
                    define(self, &mut stmts, *dest, Expr::Value(Value::Const(Constant::Type(class.clone()))));
                }
                DexInstruction::ConstMethodHandle { dest, handle } => {
                    let handle = convert_handle(handle)?;
                    define(self, &mut stmts, *dest, Expr::Value(Value::Const(Constant::MethodHandle(handle))));
                }
                DexInstruction::ConstMethodType { dest, descriptor } => {
                    define(self, &mut stmts, *dest, Expr::Value(Value::Const(Constant::MethodType(descriptor.clone()))));
                }
                DexInstruction::MonitorEnter { src } => stmts.push(Stmt::MonitorEnter(self.read(b, *src))),
                DexInstruction::MonitorExit { src } => stmts.push(Stmt::MonitorExit(self.read(b, *src))),
                DexInstruction::CheckCast { reg, class } => {
                    let value = self.read(b, *reg);
                    define(self, &mut stmts, *reg, Expr::CheckCast { value, class: class.clone() });
                }
                DexInstruction::InstanceOf { dest, src, class } => {
                    let value = self.read(b, *src);
                    define(self, &mut stmts, *dest, Expr::InstanceOf { value, class: class.clone() });
                }
                DexInstruction::ArrayLength { dest, array } => {
                    let array = self.read(b, *array);
                    define(self, &mut stmts, *dest, Expr::ArrayLength(array));
                }
                DexInstruction::NewInstance { dest, class } => {
                    define(self, &mut stmts, *dest, Expr::NewInstance(class.clone()));
                }
                DexInstruction::NewArray { dest, size, class } => {
                    let size = self.read(b, *size);
                    define(self, &mut stmts, *dest, Expr::NewArray { class: class.clone(), size });
                }
                DexInstruction::FilledNewArray { args, class } => {
                    let elements = args.iter().map(|r| self.read(b, *r)).collect();
                    self.call(&mut stmts, pos, Expr::FilledArray { class: class.clone(), elements });
                }
                DexInstruction::FillArrayData { array, data } => {
                    let array = self.read(b, *array);
                    stmts.push(Stmt::FillArrayData { array, data: data.clone() });
                }
                DexInstruction::Throw { src } => terminator = Some(Terminator::Throw(self.read(b, *src))),
                DexInstruction::Goto { target } => terminator = Some(Terminator::Goto(self.block_of(target)?)),
                DexInstruction::PackedSwitch { src, first_key, targets } => {
                    let value = self.read(b, *src);
                    let mut cases = Vec::new();
                    for (i, target) in targets.iter().enumerate() {
                        cases.push((first_key.wrapping_add(i as i32), self.block_of(target)?));
                    }
                    terminator = Some(Terminator::Switch { value, cases, default: self.fall_through(end)? });
                }
                DexInstruction::SparseSwitch { src, cases } => {
                    let value = self.read(b, *src);
                    let mut out = Vec::new();
                    for (key, target) in cases {
                        out.push((*key, self.block_of(target)?));
                    }
                    terminator = Some(Terminator::Switch { value, cases: out, default: self.fall_through(end)? });
                }
                DexInstruction::Compare { kind, dest, first, second } => {
                    let first = self.read(b, *first);
                    let second = self.read(b, *second);
                    define(self, &mut stmts, *dest, Expr::Compare { kind: *kind, first, second });
                }
                DexInstruction::If { test, first, second, target } => {
                    let first = self.read(b, *first);
                    let second = self.read(b, *second);
                    terminator = Some(Terminator::If {
                        test: *test,
                        first,
                        second: Some(second),
                        then: self.block_of(target)?,
                        otherwise: self.fall_through(end)?,
                    });
                }
                DexInstruction::IfZ { test, src, target } => {
                    let first = self.read(b, *src);
                    terminator = Some(Terminator::If {
                        test: *test,
                        first,
                        second: None,
                        then: self.block_of(target)?,
                        otherwise: self.fall_through(end)?,
                    });
                }
                DexInstruction::Array { op, value, array, index } => {
                    let array = self.read(b, *array);
                    let index = self.read(b, *index);
                    if op.is_get() {
                        define(self, &mut stmts, *value, Expr::ArrayLoad { op: *op, array, index });
                    } else {
                        let value = self.read(b, *value);
                        stmts.push(Stmt::ArrayStore { op: *op, array, index, value });
                    }
                }
                DexInstruction::Instance { op, value, object, field } => {
                    let object = self.read(b, *object);
                    if op.is_get() {
                        define(self, &mut stmts, *value, Expr::GetField { field: field.clone(), object });
                    } else {
                        let value = self.read(b, *value);
                        stmts.push(Stmt::PutField { field: field.clone(), object, value });
                    }
                }
                DexInstruction::Static { op, value, field } => {
                    if op.is_get() {
                        define(self, &mut stmts, *value, Expr::GetStatic { field: field.clone() });
                    } else {
                        let value = self.read(b, *value);
                        stmts.push(Stmt::PutStatic { field: field.clone(), value });
                    }
                }
                DexInstruction::Invoke { kind, args, method } => {
                    let receiver = *kind != InvokeKind::Static;
                    let args = self.call_args(b, args, &method.descriptor, receiver)?;
                    self.call(&mut stmts, pos, Expr::Invoke { kind: *kind, method: method.clone(), args });
                }
                DexInstruction::InvokePolymorphic { args, method, proto } => {
                    let args = self.call_args(b, args, proto, true)?;
                    self.call(
                        &mut stmts,
                        pos,
                        Expr::InvokePolymorphic { method: method.clone(), proto: proto.clone(), args },
                    );
                }
                DexInstruction::InvokeCustom { args, call_site } => {
                    let args = self.call_args(b, args, &call_site.descriptor, false)?;
                    self.call(&mut stmts, pos, Expr::InvokeCustom { call_site: call_site.clone(), args });
                }
                DexInstruction::Unary { op, dest, src } => {
                    let value = self.read(b, *src);
                    define(self, &mut stmts, *dest, Expr::Unary { op: *op, value });
                }
                DexInstruction::Binary { op, dest, first, second } => {
                    let first = self.read(b, *first);
                    let second = self.read(b, *second);
                    define(self, &mut stmts, *dest, Expr::Binary { op: *op, first, second });
                }
                DexInstruction::BinaryLit { op, dest, src, literal, reverse } => {
                    let src = self.read(b, *src);
                    let literal = Value::literal(*literal as i64, false);
                    let (first, second) = if *reverse { (literal, src) } else { (src, literal) };
                    define(self, &mut stmts, *dest, Expr::Binary { op: *op, first, second });
                }
            }
        }

        let terminator = match terminator {
            Some(t) => t,
            None => match self.shapes[index].landing {
                Some(landing) => Terminator::Goto(landing),
                None => Terminator::Goto(self.fall_through(end)?),
            },
        };
        self.ir.insert_block(b, Block { phis: Vec::new(), stmts, terminator });
        self.filled.insert(b);
        Ok(deferred)
    }

    fn fall_through(&self, end: usize) -> Result<BlockId, ConvertError> {
        match self.block_at.get(&end) {
            Some(id) => Ok(*id),
            None => Err(err!("execution falls off the end of the code")),
        }
    }

    /// Calls keep their result in a fresh local when a `move-result`
    /// follows, otherwise they are evaluated for effect.
    fn call(&mut self, stmts: &mut Vec<Stmt>, pos: usize, expr: Expr) {
        if let Some(DexInstruction::MoveResult { .. }) = self.insns.get(pos + 1) {
            let local = self.ir.new_local();
            stmts.push(Stmt::Assign { dst: local, expr });
            self.results.insert(pos + 1, local);
        } else {
            stmts.push(Stmt::Effect(expr));
        }
    }

    fn call_args(&mut self, b: BlockId, regs: &[Reg], descriptor: &str, receiver: bool) -> Result<Vec<Value>, ConvertError> {
        let signature = parse_method_descriptor(descriptor)?;
        let mut out = Vec::new();
        let mut i = 0;
        if receiver {
            let Some(reg) = regs.first() else {
                fail!("call to {} has no receiver register", descriptor);
            };
            out.push(self.read(b, *reg));
            i = 1;
        }
        for arg in &signature.args {
            let Some(reg) = regs.get(i) else {
                fail!("call to {} passes too few registers", descriptor);
            };
            out.push(self.read(b, *reg));
            i += if arg.is_wide() { 2 } else { 1 };
        }
        Ok(out)
    }

    fn write(&mut self, block: BlockId, reg: Reg, value: Value) {
        self.defs.insert((block, reg), value);
    }

    fn read(&mut self, block: BlockId, reg: Reg) -> Value {
        let mut chain = Vec::new();
        let mut current = block;
        let value = loop {
            if let Some(v) = self.defs.get(&(current, reg)) {
                break self.resolve(v.clone());
            }
            if !self.sealed.contains(&current) {
                let phi = self.new_phi(current);
                self.incomplete.entry(current).or_default().push((reg, phi));
                break Value::Local(phi);
            }
            let preds = self.preds.get(&current).cloned().unwrap_or_default();
            match preds.as_slice() {
                [] => break Value::literal(0, false),
                [pred] if *pred != current && !chain.contains(pred) => {
                    chain.push(current);
                    current = *pred;
                }
                // single predecessor loop, never entered
                [_] => break Value::literal(0, false),
                _ => {
                    let phi = self.new_phi(current);
                    self.write(current, reg, Value::Local(phi));
                    break self.add_operands(phi, reg);
                }
            }
        };
        for visited in chain {
            self.write(visited, reg, value.clone());
        }
        self.write(current, reg, value.clone());
        value
    }

    fn new_phi(&mut self, block: BlockId) -> LocalId {
        let local = self.ir.new_local();
        self.phis.insert(local, PendingPhi { block, operands: Vec::new() });
        local
    }

    fn add_operands(&mut self, phi: LocalId, reg: Reg) -> Value {
        let Some(block) = self.phis.get(&phi).map(|p| p.block) else {
            return self.resolve(Value::Local(phi));
        };
        self.constructing.insert(phi);
        let preds = self.preds.get(&block).cloned().unwrap_or_default();
        for pred in preds {
            let value = self.read(pred, reg);
            if let Some(pending) = self.phis.get_mut(&phi) {
                pending.operands.push((pred, value));
            }
        }
        self.constructing.remove(&phi);
        self.try_remove_trivial(phi)
    }

    fn try_remove_trivial(&mut self, phi: LocalId) -> Value {
        let Some(pending) = self.phis.get(&phi) else {
            return self.resolve(Value::Local(phi));
        };
        let operands: Vec<Value> = pending.operands.iter().map(|(_, v)| v.clone()).collect();
        let mut same: Option<Value> = None;
        for op in operands {
            let op = self.resolve(op);
            if Some(&op) == same.as_ref() || op == Value::Local(phi) {
                continue;
            }
            if same.is_some() {
                return Value::Local(phi);
            }
            same = Some(op);
        }
        let same = same.unwrap_or_else(|| Value::literal(0, false));
        self.phis.remove(&phi);
        self.replaced.insert(phi, same.clone());

        let users: Vec<LocalId> = self
            .phis
            .iter()
            .filter(|(id, p)| !self.constructing.contains(id) && p.operands.iter().any(|(_, v)| *v == Value::Local(phi)))
            .map(|(id, _)| *id)
            .collect();
        for user in users {
            self.try_remove_trivial(user);
        }
        same
    }

    fn resolve(&self, mut value: Value) -> Value {
        let mut steps = 0;
        while let Value::Local(local) = value {
            match self.replaced.get(&local) {
                Some(next) if steps <= self.replaced.len() => {
                    value = next.clone();
                    steps += 1;
                }
                _ => break,
            }
        }
        value
    }

    fn all_preds_filled(&self, block: BlockId) -> bool {
        self.preds.get(&block).map_or(true, |ps| ps.iter().all(|p| self.filled.contains(p)))
    }

    fn try_seal(&mut self, block: BlockId) {
        if !self.sealed.contains(&block) && self.all_preds_filled(block) {
            self.seal(block);
        }
    }

    fn seal_successors(&mut self, block: BlockId) {
        let succs: Vec<BlockId> =
            self.preds.iter().filter(|(_, ps)| ps.contains(&block)).map(|(s, _)| *s).collect();
        for succ in succs {
            // only blocks already entered hold pending phis
            if self.filled.contains(&succ) || self.incomplete.contains_key(&succ) {
                self.try_seal(succ);
            }
        }
    }

    fn seal(&mut self, block: BlockId) {
        if !self.sealed.insert(block) {
            return;
        }
        for (reg, phi) in self.incomplete.remove(&block).unwrap_or_default() {
            self.add_operands(phi, reg);
        }
    }
}
