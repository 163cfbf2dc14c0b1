//! SSA intermediate representation of one method body.
//!
//! A method is a set of basic blocks with explicit terminators, a layout
//! order used when emitting, and a trap table describing which blocks may
//! throw into which handlers. Values are either locals or constants; a
//! local has one definition until phi resolution turns phi webs into plain
//! multi-assigned variables.

pub mod lift;
pub mod lower;
pub mod passes;
pub mod pipeline;
pub mod typing;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

use crate::dex::instructions::{
    ArrayData, ArrayOperation, BinaryOperation, CompareType, InvokeKind, TestType, UnaryOperation,
};
use crate::dex::nodes::{CallSite, FieldRef, MethodRef};
use crate::jvm::Handle;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LocalId(pub u32);

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a{}", self.0)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "B{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    /// Raw register bits whose type is only known from the uses.
    Literal { bits: i64, wide: bool },
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Null,
    String(String),
    /// Class literal, as a descriptor.
    Type(String),
    MethodType(String),
    MethodHandle(Handle),
}

impl Constant {
    pub fn is_zero_literal(&self) -> bool {
        matches!(self, Constant::Literal { bits: 0, .. } | Constant::Null)
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Constant::Literal { bits, wide: false } => Some(*bits as i32),
            Constant::Int(v) => Some(*v),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Local(LocalId),
    Const(Constant),
}

impl Value {
    pub fn local(&self) -> Option<LocalId> {
        match self {
            Value::Local(l) => Some(*l),
            Value::Const(_) => None,
        }
    }

    pub fn literal(bits: i64, wide: bool) -> Value {
        Value::Const(Constant::Literal { bits, wide })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Value(Value),
    /// Incoming argument, receiver first for instance methods.
    Param(u16),
    /// The exception object at handler entry.
    CaughtException,
    Unary { op: UnaryOperation, value: Value },
    Binary { op: BinaryOperation, first: Value, second: Value },
    Compare { kind: CompareType, first: Value, second: Value },
    ArrayLength(Value),
    ArrayLoad { op: ArrayOperation, array: Value, index: Value },
    InstanceOf { value: Value, class: String },
    CheckCast { value: Value, class: String },
    /// Allocation without the constructor call.
    NewInstance(String),
    NewArray { class: String, size: Value },
    FilledArray { class: String, elements: Vec<Value> },
    NewMultiArray { class: String, dims: Vec<Value> },
    GetField { field: FieldRef, object: Value },
    GetStatic { field: FieldRef },
    Invoke { kind: InvokeKind, method: MethodRef, args: Vec<Value> },
    InvokePolymorphic { method: MethodRef, proto: String, args: Vec<Value> },
    InvokeCustom { call_site: CallSite, args: Vec<Value> },
    /// Allocation and constructor call in one.
    NewObject { class: String, constructor: MethodRef, args: Vec<Value> },
}

impl Expr {
    pub fn values(&self) -> Vec<&Value> {
        match self {
            Expr::Value(v)
            | Expr::Unary { value: v, .. }
            | Expr::ArrayLength(v)
            | Expr::InstanceOf { value: v, .. }
            | Expr::CheckCast { value: v, .. }
            | Expr::NewArray { size: v, .. }
            | Expr::GetField { object: v, .. } => vec![v],
            Expr::Binary { first, second, .. } | Expr::Compare { first, second, .. } => vec![first, second],
            Expr::ArrayLoad { array, index, .. } => vec![array, index],
            Expr::FilledArray { elements: vs, .. }
            | Expr::NewMultiArray { dims: vs, .. }
            | Expr::Invoke { args: vs, .. }
            | Expr::InvokePolymorphic { args: vs, .. }
            | Expr::InvokeCustom { args: vs, .. }
            | Expr::NewObject { args: vs, .. } => vs.iter().collect(),
            Expr::Param(_) | Expr::CaughtException | Expr::NewInstance(_) | Expr::GetStatic { .. } => Vec::new(),
        }
    }

    pub fn values_mut(&mut self) -> Vec<&mut Value> {
        match self {
            Expr::Value(v)
            | Expr::Unary { value: v, .. }
            | Expr::ArrayLength(v)
            | Expr::InstanceOf { value: v, .. }
            | Expr::CheckCast { value: v, .. }
            | Expr::NewArray { size: v, .. }
            | Expr::GetField { object: v, .. } => vec![v],
            Expr::Binary { first, second, .. } | Expr::Compare { first, second, .. } => vec![first, second],
            Expr::ArrayLoad { array, index, .. } => vec![array, index],
            Expr::FilledArray { elements: vs, .. }
            | Expr::NewMultiArray { dims: vs, .. }
            | Expr::Invoke { args: vs, .. }
            | Expr::InvokePolymorphic { args: vs, .. }
            | Expr::InvokeCustom { args: vs, .. }
            | Expr::NewObject { args: vs, .. } => vs.iter_mut().collect(),
            Expr::Param(_) | Expr::CaughtException | Expr::NewInstance(_) | Expr::GetStatic { .. } => Vec::new(),
        }
    }

    /// No side effect and no exception: safe to drop when unused.
    pub fn is_pure(&self) -> bool {
        match self {
            Expr::Value(_)
            | Expr::Param(_)
            | Expr::CaughtException
            | Expr::Unary { .. }
            | Expr::Compare { .. }
            | Expr::InstanceOf { .. } => true,
            Expr::Binary { op, .. } => !op.is_integral_division(),
            _ => false,
        }
    }

    pub fn can_throw(&self) -> bool {
        match self {
            Expr::Value(_)
            | Expr::Param(_)
            | Expr::CaughtException
            | Expr::Unary { .. }
            | Expr::Compare { .. }
            | Expr::InstanceOf { .. } => false,
            Expr::Binary { op, .. } => op.is_integral_division(),
            _ => true,
        }
    }

    pub fn is_invoke(&self) -> bool {
        matches!(self, Expr::Invoke { .. } | Expr::InvokePolymorphic { .. } | Expr::InvokeCustom { .. })
    }

    /// Return descriptor of a call, `None` for anything else.
    pub fn invoke_return(&self) -> Option<&str> {
        let descriptor = match self {
            Expr::Invoke { method, .. } => &method.descriptor,
            Expr::InvokePolymorphic { proto, .. } => proto,
            Expr::InvokeCustom { call_site, .. } => &call_site.descriptor,
            _ => return None,
        };
        descriptor.rsplit(')').next()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assign { dst: LocalId, expr: Expr },
    /// Evaluated for its side effect, the result is dropped.
    Effect(Expr),
    ArrayStore { op: ArrayOperation, array: Value, index: Value, value: Value },
    PutField { field: FieldRef, object: Value, value: Value },
    PutStatic { field: FieldRef, value: Value },
    FillArrayData { array: Value, data: ArrayData },
    MonitorEnter(Value),
    MonitorExit(Value),
}

impl Stmt {
    pub fn def(&self) -> Option<LocalId> {
        match self {
            Stmt::Assign { dst, .. } => Some(*dst),
            _ => None,
        }
    }

    pub fn expr(&self) -> Option<&Expr> {
        match self {
            Stmt::Assign { expr, .. } | Stmt::Effect(expr) => Some(expr),
            _ => None,
        }
    }

    pub fn values(&self) -> Vec<&Value> {
        match self {
            Stmt::Assign { expr, .. } | Stmt::Effect(expr) => expr.values(),
            Stmt::ArrayStore { array, index, value, .. } => vec![array, index, value],
            Stmt::PutField { object, value, .. } => vec![object, value],
            Stmt::PutStatic { value, .. } => vec![value],
            Stmt::FillArrayData { array, .. } | Stmt::MonitorEnter(array) | Stmt::MonitorExit(array) => vec![array],
        }
    }

    pub fn values_mut(&mut self) -> Vec<&mut Value> {
        match self {
            Stmt::Assign { expr, .. } | Stmt::Effect(expr) => expr.values_mut(),
            Stmt::ArrayStore { array, index, value, .. } => vec![array, index, value],
            Stmt::PutField { object, value, .. } => vec![object, value],
            Stmt::PutStatic { value, .. } => vec![value],
            Stmt::FillArrayData { array, .. } | Stmt::MonitorEnter(array) | Stmt::MonitorExit(array) => vec![array],
        }
    }

    pub fn can_throw(&self) -> bool {
        match self {
            Stmt::Assign { expr, .. } | Stmt::Effect(expr) => expr.can_throw(),
            _ => true,
        }
    }

    pub fn uses(&self, local: LocalId) -> bool {
        self.values().into_iter().any(|v| v.local() == Some(local))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Terminator {
    Goto(BlockId),
    /// Compares against zero or null when `second` is absent.
    If { test: TestType, first: Value, second: Option<Value>, then: BlockId, otherwise: BlockId },
    Switch { value: Value, cases: Vec<(i32, BlockId)>, default: BlockId },
    Return(Option<Value>),
    Throw(Value),
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        let mut out = Vec::new();
        match self {
            Terminator::Goto(target) => out.push(*target),
            Terminator::If { then, otherwise, .. } => {
                out.push(*then);
                out.push(*otherwise);
            }
            Terminator::Switch { cases, default, .. } => {
                out.extend(cases.iter().map(|(_, b)| *b));
                out.push(*default);
            }
            Terminator::Return(_) | Terminator::Throw(_) => {}
        }
        let mut seen = HashSet::new();
        out.retain(|b| seen.insert(*b));
        out
    }

    pub fn values(&self) -> Vec<&Value> {
        match self {
            Terminator::Goto(_) | Terminator::Return(None) => Vec::new(),
            Terminator::If { first, second, .. } => {
                let mut out = vec![first];
                out.extend(second.iter());
                out
            }
            Terminator::Switch { value, .. } | Terminator::Return(Some(value)) | Terminator::Throw(value) => vec![value],
        }
    }

    pub fn values_mut(&mut self) -> Vec<&mut Value> {
        match self {
            Terminator::Goto(_) | Terminator::Return(None) => Vec::new(),
            Terminator::If { first, second, .. } => {
                let mut out = vec![first];
                out.extend(second.iter_mut());
                out
            }
            Terminator::Switch { value, .. } | Terminator::Return(Some(value)) | Terminator::Throw(value) => vec![value],
        }
    }

    pub fn retarget(&mut self, from: BlockId, to: BlockId) {
        let swap = |b: &mut BlockId| {
            if *b == from {
                *b = to;
            }
        };
        match self {
            Terminator::Goto(target) => swap(target),
            Terminator::If { then, otherwise, .. } => {
                swap(then);
                swap(otherwise);
            }
            Terminator::Switch { cases, default, .. } => {
                cases.iter_mut().for_each(|(_, b)| swap(b));
                swap(default);
            }
            Terminator::Return(_) | Terminator::Throw(_) => {}
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Phi {
    pub dst: LocalId,
    pub operands: Vec<(BlockId, Value)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Block {
    pub phis: Vec<Phi>,
    pub stmts: Vec<Stmt>,
    pub terminator: Terminator,
}

impl Block {
    pub fn new(terminator: Terminator) -> Self {
        Block { phis: Vec::new(), stmts: Vec::new(), terminator }
    }

    pub fn can_throw(&self) -> bool {
        self.stmts.iter().any(Stmt::can_throw) || matches!(self.terminator, Terminator::Throw(_))
    }

    pub fn is_empty_goto(&self) -> Option<BlockId> {
        match self.terminator {
            Terminator::Goto(target) if self.phis.is_empty() && self.stmts.is_empty() => Some(target),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Handler {
    /// Descriptor of the caught class, `None` catches everything.
    pub catch_type: Option<String>,
    pub target: BlockId,
}

/// Blocks that may throw into an ordered list of handlers.
#[derive(Debug, Clone, PartialEq)]
pub struct Trap {
    pub covered: Vec<BlockId>,
    pub handlers: Vec<Handler>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum IrType {
    Unknown,
    Int,
    Long,
    Float,
    Double,
    /// Reference, with its descriptor when known.
    Ref(String),
}

pub const OBJECT_DESC: &str = "Ljava/lang/Object;";

impl IrType {
    pub fn from_descriptor(desc: &str) -> IrType {
        match desc {
            "I" | "Z" | "B" | "C" | "S" => IrType::Int,
            "J" => IrType::Long,
            "F" => IrType::Float,
            "D" => IrType::Double,
            _ => IrType::Ref(desc.to_string()),
        }
    }

    pub fn is_wide(&self) -> bool {
        matches!(self, IrType::Long | IrType::Double)
    }

    pub fn is_ref(&self) -> bool {
        matches!(self, IrType::Ref(_))
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, IrType::Unknown)
    }

    /// Element type of an array reference.
    pub fn element(&self) -> Option<IrType> {
        match self {
            IrType::Ref(desc) => desc.strip_prefix('[').map(IrType::from_descriptor),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct IrMethod {
    /// Descriptor of the declaring class.
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub is_static: bool,
    /// Parameter descriptors, receiver included.
    pub params: Vec<String>,
    pub return_type: String,
    pub blocks: BTreeMap<BlockId, Block>,
    pub layout: Vec<BlockId>,
    pub entry: BlockId,
    pub traps: Vec<Trap>,
    pub locals: Vec<IrType>,
    next_block: u32,
}

impl IrMethod {
    pub fn new(owner: &str, name: &str, descriptor: &str, is_static: bool, params: Vec<String>, return_type: &str) -> Self {
        IrMethod {
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            is_static,
            params,
            return_type: return_type.to_string(),
            blocks: BTreeMap::new(),
            layout: Vec::new(),
            entry: BlockId(0),
            traps: Vec::new(),
            locals: Vec::new(),
            next_block: 0,
        }
    }

    pub fn new_local(&mut self) -> LocalId {
        self.locals.push(IrType::Unknown);
        LocalId(self.locals.len() as u32 - 1)
    }

    /// Reserves an id; the block is inserted with [`IrMethod::insert_block`].
    pub fn new_block_id(&mut self) -> BlockId {
        let id = BlockId(self.next_block);
        self.next_block += 1;
        id
    }

    pub fn insert_block(&mut self, id: BlockId, block: Block) {
        self.blocks.insert(id, block);
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.get(&id)
    }

    pub fn block_mut(&mut self, id: BlockId) -> Option<&mut Block> {
        self.blocks.get_mut(&id)
    }

    pub fn local_type(&self, local: LocalId) -> &IrType {
        self.locals.get(local.0 as usize).unwrap_or(&IrType::Unknown)
    }

    pub fn return_ir_type(&self) -> Option<IrType> {
        if self.return_type == "V" {
            None
        } else {
            Some(IrType::from_descriptor(&self.return_type))
        }
    }

    pub fn is_handler(&self, id: BlockId) -> bool {
        self.traps.iter().any(|t| t.handlers.iter().any(|h| h.target == id))
    }

    pub fn is_covered(&self, id: BlockId) -> bool {
        self.traps.iter().any(|t| t.covered.contains(&id))
    }

    /// Handlers a block can throw into, in priority order.
    pub fn exceptional_successors(&self, id: BlockId) -> Vec<BlockId> {
        let Some(block) = self.blocks.get(&id) else {
            return Vec::new();
        };
        if !block.can_throw() {
            return Vec::new();
        }
        let mut out = Vec::new();
        for trap in self.traps.iter().filter(|t| t.covered.contains(&id)) {
            for handler in &trap.handlers {
                if !out.contains(&handler.target) {
                    out.push(handler.target);
                }
            }
        }
        out
    }

    pub fn successors(&self, id: BlockId) -> Vec<BlockId> {
        self.blocks.get(&id).map(|b| b.terminator.successors()).unwrap_or_default()
    }

    pub fn all_successors(&self, id: BlockId) -> Vec<BlockId> {
        let mut out = self.successors(id);
        for s in self.exceptional_successors(id) {
            if !out.contains(&s) {
                out.push(s);
            }
        }
        out
    }

    /// Normal and exceptional predecessors of every block.
    pub fn predecessors(&self) -> HashMap<BlockId, Vec<BlockId>> {
        let mut preds: HashMap<BlockId, Vec<BlockId>> = HashMap::new();
        for id in self.blocks.keys() {
            preds.entry(*id).or_default();
        }
        for id in &self.layout {
            for s in self.all_successors(*id) {
                let list = preds.entry(s).or_default();
                if !list.contains(id) {
                    list.push(*id);
                }
            }
        }
        preds
    }

    /// Blocks with a normal edge into `id`.
    pub fn normal_predecessors(&self, id: BlockId) -> Vec<BlockId> {
        self.layout.iter().copied().filter(|b| self.successors(*b).contains(&id)).collect()
    }

    /// Drops blocks not reachable from the entry, along with their phi
    /// operands and trap entries. Returns whether anything was removed.
    pub fn remove_unreachable(&mut self) -> bool {
        let mut reachable = HashSet::new();
        let mut stack = vec![self.entry];
        while let Some(id) = stack.pop() {
            if !self.blocks.contains_key(&id) || !reachable.insert(id) {
                continue;
            }
            stack.extend(self.all_successors(id));
        }
        if reachable.len() == self.blocks.len() {
            return false;
        }
        self.blocks.retain(|id, _| reachable.contains(id));
        self.layout.retain(|id| reachable.contains(id));
        self.prune_edges();
        true
    }

    /// Re-syncs phi operands and traps with the current edges.
    pub fn prune_edges(&mut self) {
        let preds = self.predecessors();
        for (id, block) in self.blocks.iter_mut() {
            let incoming = preds.get(id).cloned().unwrap_or_default();
            for phi in &mut block.phis {
                phi.operands.retain(|(p, _)| incoming.contains(p));
            }
        }
        let live: HashSet<BlockId> = self.blocks.keys().copied().collect();
        for trap in &mut self.traps {
            trap.covered.retain(|b| live.contains(b));
            trap.handlers.retain(|h| live.contains(&h.target));
        }
        self.traps.retain(|t| !t.covered.is_empty() && !t.handlers.is_empty());
    }

    pub fn stmts(&self) -> impl Iterator<Item = &Stmt> {
        self.blocks.values().flat_map(|b| b.stmts.iter())
    }

    /// Number of definitions of every local, phis included.
    pub fn def_counts(&self) -> HashMap<LocalId, usize> {
        let mut counts = HashMap::new();
        for block in self.blocks.values() {
            for phi in &block.phis {
                *counts.entry(phi.dst).or_insert(0) += 1;
            }
            for stmt in &block.stmts {
                if let Some(dst) = stmt.def() {
                    *counts.entry(dst).or_insert(0) += 1;
                }
            }
        }
        counts
    }

    pub fn use_counts(&self) -> HashMap<LocalId, usize> {
        let mut counts = HashMap::new();
        let mut count = |v: &Value| {
            if let Value::Local(l) = v {
                *counts.entry(*l).or_insert(0) += 1;
            }
        };
        for block in self.blocks.values() {
            for phi in &block.phis {
                phi.operands.iter().for_each(|(_, v)| count(v));
            }
            for stmt in &block.stmts {
                stmt.values().into_iter().for_each(&mut count);
            }
            block.terminator.values().into_iter().for_each(&mut count);
        }
        counts
    }

    /// Every operand slot of the method, phis included.
    pub fn for_each_value_mut<F: FnMut(&mut Value)>(&mut self, mut f: F) {
        for block in self.blocks.values_mut() {
            for phi in &mut block.phis {
                phi.operands.iter_mut().for_each(|(_, v)| f(v));
            }
            for stmt in &mut block.stmts {
                stmt.values_mut().into_iter().for_each(&mut f);
            }
            block.terminator.values_mut().into_iter().for_each(&mut f);
        }
    }

    /// Substitutes locals according to `map`, following chains.
    pub fn replace_locals(&mut self, map: &HashMap<LocalId, Value>) {
        if map.is_empty() {
            return;
        }
        self.for_each_value_mut(|v| {
            let mut guard = 0;
            while let Value::Local(l) = v {
                match map.get(l) {
                    Some(replacement) if guard <= map.len() => {
                        *v = replacement.clone();
                        guard += 1;
                    }
                    _ => break,
                }
            }
        });
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Local(l) => write!(f, "{}", l),
            Value::Const(Constant::Literal { bits, wide }) => write!(f, "{}{}", bits, if *wide { "L" } else { "" }),
            Value::Const(Constant::String(s)) => write!(f, "{:?}", s),
            Value::Const(c) => write!(f, "{:?}", c),
        }
    }
}

impl fmt::Display for IrMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}->{}{}", self.owner, self.name, self.descriptor)?;
        for id in &self.layout {
            let Some(block) = self.blocks.get(id) else {
                continue;
            };
            writeln!(f, "{}:", id)?;
            for phi in &block.phis {
                let ops: Vec<String> = phi.operands.iter().map(|(b, v)| format!("{}: {}", b, v)).collect();
                writeln!(f, "    {} = phi({})", phi.dst, ops.join(", "))?;
            }
            for stmt in &block.stmts {
                writeln!(f, "    {:?}", stmt)?;
            }
            writeln!(f, "    {:?}", block.terminator)?;
        }
        Ok(())
    }
}


/// Lifting shortcuts for pass tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::IrMethod;
    use crate::dex::instructions::DexInstruction;
    use crate::dex::nodes::{DexCodeNode, DexMethodNode, MethodRef};
    use crate::dex::ACC_STATIC;

    pub fn lift_static(descriptor: &str, registers: u16, instructions: Vec<DexInstruction>) -> IrMethod {
        let method = DexMethodNode::new(ACC_STATIC, MethodRef::new("La/T;", "m", descriptor));
        super::lift::lift(&method, &DexCodeNode::new(registers, instructions)).unwrap()
    }

    pub fn lift_code(descriptor: &str, code: DexCodeNode) -> IrMethod {
        let method = DexMethodNode::new(ACC_STATIC, MethodRef::new("La/T;", "m", descriptor));
        super::lift::lift(&method, &code).unwrap()
    }
}
