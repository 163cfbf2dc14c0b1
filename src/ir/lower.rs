//! Lowering of a typed, phi-free [`IrMethod`] to stack-machine code.
//!
//! Locals are mapped to JVM slots by greedy coloring of an interference
//! graph built from liveness, with parameters pinned to their calling
//! convention slots. Every block gets a start and an end label; handler
//! blocks also get an exception entry label where the thrown object is
//! stored or dropped, so normal predecessors may jump past it. Trap
//! ranges only cover blocks that can still throw and open at the first
//! throwing instruction, after the copies feeding the handler. Adjacent
//! covered blocks share a range when nothing precedes that instruction.

use std::collections::{HashMap, HashSet};

use rangemap::RangeSet;

use crate::dex::instructions::{
    ArrayData, ArrayOperation, BinaryOperation, CompareType, InvokeKind, TestType, UnaryOperation,
};
use crate::error::ConvertError;
use crate::ir::typing::{array_element, data_element, expr_type, value_type};
use crate::ir::{BlockId, Constant, Expr, IrMethod, IrType, LocalId, Stmt, Terminator, Value};
use crate::jvm::insn::opcodes::*;
use crate::jvm::insn::{CodeBody, JvmInsn, JvmLabel, TryCatchBlock};
use crate::jvm::JvmValue;
use crate::types::internal_name;
use crate::values::{convert_constant, convert_handle};

/// Longest modified UTF-8 encoding a constant pool string may have.
pub const MAX_UTF8_LENGTH: usize = u16::MAX as usize;

pub fn lower(method: &IrMethod) -> Result<CodeBody, ConvertError> {
    let slots = assign_slots(method)?;
    let mut lowerer = Lowerer {
        method,
        slots,
        labels: HashMap::new(),
        covered: method.traps.iter().flat_map(|t| t.covered.iter().copied()).collect(),
        prefixed: HashSet::new(),
        code: CodeBody::default(),
    };
    let mut next = 0;
    for id in &method.layout {
        let labels = BlockLabels {
            start: JvmLabel(next),
            end: JvmLabel(next + 1),
            exception: JvmLabel(next + 2),
            throws: JvmLabel(next + 3),
        };
        next += 4;
        lowerer.labels.insert(*id, labels);
    }
    lowerer.blocks()?;
    lowerer.traps();
    Ok(lowerer.code)
}

fn width(t: &IrType) -> u16 {
    if t.is_wide() {
        2
    } else {
        1
    }
}

/// Slots of the incoming arguments in calling convention order.
fn param_offsets(method: &IrMethod) -> (Vec<u16>, u16) {
    let mut offsets = Vec::with_capacity(method.params.len());
    let mut next = 0;
    for param in &method.params {
        offsets.push(next);
        next += width(&IrType::from_descriptor(param));
    }
    (offsets, next)
}

/// Walks a block backwards from `live_out`, calling `on_def` with every
/// definition and the set live right after it. Returns the live-in set.
fn walk_block<F>(
    method: &IrMethod,
    id: BlockId,
    live_out: HashSet<LocalId>,
    exceptional: &HashSet<LocalId>,
    mut on_def: F,
) -> HashSet<LocalId>
where
    F: FnMut(LocalId, &HashSet<LocalId>),
{
    let mut live = live_out;
    let Some(block) = method.block(id) else {
        return live;
    };
    live.extend(block.terminator.values().into_iter().filter_map(Value::local));
    if matches!(block.terminator, Terminator::Throw(_)) {
        live.extend(exceptional.iter().copied());
    }
    for stmt in block.stmts.iter().rev() {
        if let Some(dst) = stmt.def() {
            on_def(dst, &live);
            live.remove(&dst);
        }
        live.extend(stmt.values().into_iter().filter_map(Value::local));
        if stmt.can_throw() {
            live.extend(exceptional.iter().copied());
        }
    }
    live
}

fn union_of(sets: &HashMap<BlockId, HashSet<LocalId>>, ids: Vec<BlockId>) -> HashSet<LocalId> {
    ids.iter().filter_map(|id| sets.get(id)).flatten().copied().collect()
}

fn live_in(method: &IrMethod) -> HashMap<BlockId, HashSet<LocalId>> {
    let mut live: HashMap<BlockId, HashSet<LocalId>> = HashMap::new();
    loop {
        let mut changed = false;
        for id in method.layout.iter().rev() {
            let out = union_of(&live, method.successors(*id));
            let exceptional = union_of(&live, method.exceptional_successors(*id));
            let entry = walk_block(method, *id, out, &exceptional, |_, _| {});
            if live.get(id) != Some(&entry) {
                live.insert(*id, entry);
                changed = true;
            }
        }
        if !changed {
            return live;
        }
    }
}

fn assign_slots(method: &IrMethod) -> Result<HashMap<LocalId, u16>, ConvertError> {
    let (offsets, first_free) = param_offsets(method);
    let mut slots: HashMap<LocalId, u16> = HashMap::new();
    let mut order: Vec<LocalId> = Vec::new();
    let mut seen = HashSet::new();
    for id in &method.layout {
        let Some(block) = method.block(*id) else {
            continue;
        };
        if !block.phis.is_empty() {
            fail!("block {} still has phis", id);
        }
        for stmt in &block.stmts {
            if let Stmt::Assign { dst, expr: Expr::Param(i) } = stmt {
                let Some(offset) = offsets.get(*i as usize) else {
                    fail!("parameter {} out of range", i);
                };
                slots.insert(*dst, *offset);
            }
            let locals = stmt.def().into_iter().chain(stmt.values().into_iter().filter_map(Value::local));
            order.extend(locals.filter(|l| seen.insert(*l)));
        }
        order.extend(block.terminator.values().into_iter().filter_map(Value::local).filter(|l| seen.insert(*l)));
    }

    let live = live_in(method);
    let mut graph: HashMap<LocalId, HashSet<LocalId>> = HashMap::new();
    for id in &method.layout {
        let out = union_of(&live, method.successors(*id));
        let exceptional = union_of(&live, method.exceptional_successors(*id));
        walk_block(method, *id, out, &exceptional, |dst, after| {
            for other in after.iter().filter(|l| **l != dst) {
                graph.entry(dst).or_default().insert(*other);
                graph.entry(*other).or_default().insert(dst);
            }
        });
    }

    let empty = HashSet::new();
    for local in order {
        if slots.contains_key(&local) {
            continue;
        }
        let w = width(method.local_type(local));
        let neighbours = graph.get(&local).unwrap_or(&empty);
        let mut slot = first_free;
        while neighbours.iter().any(|n| {
            slots.get(n).map_or(false, |&taken| {
                let taken_end = taken + width(method.local_type(*n));
                slot < taken_end && taken < slot + w
            })
        }) {
            slot += 1;
        }
        slots.insert(local, slot);
    }
    Ok(slots)
}

#[derive(Clone, Copy)]
struct BlockLabels {
    start: JvmLabel,
    end: JvmLabel,
    exception: JvmLabel,
    /// Opens the trap range of a covered block.
    throws: JvmLabel,
}

struct Lowerer<'a> {
    method: &'a IrMethod,
    slots: HashMap<LocalId, u16>,
    labels: HashMap<BlockId, BlockLabels>,
    covered: HashSet<BlockId>,
    /// Covered blocks with code between their start and throws labels.
    prefixed: HashSet<BlockId>,
    code: CodeBody,
}

fn load_opcode(t: &IrType) -> u8 {
    match t {
        IrType::Long => LLOAD,
        IrType::Float => FLOAD,
        IrType::Double => DLOAD,
        IrType::Ref(_) => ALOAD,
        IrType::Int | IrType::Unknown => ILOAD,
    }
}

fn store_opcode(t: &IrType) -> u8 {
    match t {
        IrType::Long => LSTORE,
        IrType::Float => FSTORE,
        IrType::Double => DSTORE,
        IrType::Ref(_) => ASTORE,
        IrType::Int | IrType::Unknown => ISTORE,
    }
}

fn return_opcode(descriptor: &str) -> u8 {
    match descriptor {
        "V" => RETURN,
        "I" | "Z" | "B" | "C" | "S" => IRETURN,
        "J" => LRETURN,
        "F" => FRETURN,
        "D" => DRETURN,
        _ => ARETURN,
    }
}

/// Owner of the `TYPE` field holding a primitive's class object.
fn box_of_primitive(descriptor: &str) -> Option<&'static str> {
    Some(match descriptor {
        "Z" => "java/lang/Boolean",
        "B" => "java/lang/Byte",
        "C" => "java/lang/Character",
        "S" => "java/lang/Short",
        "I" => "java/lang/Integer",
        "J" => "java/lang/Long",
        "F" => "java/lang/Float",
        "D" => "java/lang/Double",
        "V" => "java/lang/Void",
        _ => return None,
    })
}

fn unary_insns(op: UnaryOperation) -> Vec<JvmInsn> {
    use UnaryOperation::*;
    let opcode = match op {
        NotInt => return vec![JvmInsn::Insn(ICONST_M1), JvmInsn::Insn(IXOR)],
        NotLong => return vec![JvmInsn::push_long(-1), JvmInsn::Insn(LXOR)],
        NegateInt => INEG,
        NegateLong => LNEG,
        NegateFloat => FNEG,
        NegateDouble => DNEG,
        IntToLong => I2L,
        IntToFloat => I2F,
        IntToDouble => I2D,
        LongToInt => L2I,
        LongToFloat => L2F,
        LongToDouble => L2D,
        FloatToInt => F2I,
        FloatToLong => F2L,
        FloatToDouble => F2D,
        DoubleToInt => D2I,
        DoubleToLong => D2L,
        DoubleToFloat => D2F,
        IntToByte => I2B,
        IntToChar => I2C,
        IntToShort => I2S,
    };
    vec![JvmInsn::Insn(opcode)]
}

fn binary_opcode(op: BinaryOperation) -> u8 {
    use BinaryOperation::*;
    match op {
        AddInt => IADD,
        SubInt => ISUB,
        MulInt => IMUL,
        DivInt => IDIV,
        RemInt => IREM,
        AndInt => IAND,
        OrInt => IOR,
        XorInt => IXOR,
        ShlInt => ISHL,
        ShrInt => ISHR,
        UshrInt => IUSHR,
        AddLong => LADD,
        SubLong => LSUB,
        MulLong => LMUL,
        DivLong => LDIV,
        RemLong => LREM,
        AndLong => LAND,
        OrLong => LOR,
        XorLong => LXOR,
        ShlLong => LSHL,
        ShrLong => LSHR,
        UshrLong => LUSHR,
        AddFloat => FADD,
        SubFloat => FSUB,
        MulFloat => FMUL,
        DivFloat => FDIV,
        RemFloat => FREM,
        AddDouble => DADD,
        SubDouble => DSUB,
        MulDouble => DMUL,
        DivDouble => DDIV,
        RemDouble => DREM,
    }
}

fn compare_opcode(kind: CompareType) -> u8 {
    match kind {
        CompareType::LessThanFloat => FCMPL,
        CompareType::GreaterThanFloat => FCMPG,
        CompareType::LessThanDouble => DCMPL,
        CompareType::GreaterThanDouble => DCMPG,
        CompareType::Long => LCMP,
    }
}

fn array_opcode(op: ArrayOperation, array: &IrType) -> u8 {
    use ArrayOperation::*;
    let element = array_element(op, array);
    match op {
        Get => if element == IrType::Float { FALOAD } else { IALOAD },
        GetWide => if element == IrType::Double { DALOAD } else { LALOAD },
        GetObject => AALOAD,
        GetBoolean | GetByte => BALOAD,
        GetChar => CALOAD,
        GetShort => SALOAD,
        Put => if element == IrType::Float { FASTORE } else { IASTORE },
        PutWide => if element == IrType::Double { DASTORE } else { LASTORE },
        PutObject => AASTORE,
        PutBoolean | PutByte => BASTORE,
        PutChar => CASTORE,
        PutShort => SASTORE,
    }
}

/// Array store for an element descriptor.
fn element_store(descriptor: &str) -> u8 {
    match descriptor {
        "I" => IASTORE,
        "J" => LASTORE,
        "F" => FASTORE,
        "D" => DASTORE,
        "Z" | "B" => BASTORE,
        "C" => CASTORE,
        "S" => SASTORE,
        _ => AASTORE,
    }
}

fn newarray_code(descriptor: &str) -> Option<i32> {
    Some(match descriptor {
        "Z" => T_BOOLEAN,
        "C" => T_CHAR,
        "F" => T_FLOAT,
        "D" => T_DOUBLE,
        "B" => T_BYTE,
        "S" => T_SHORT,
        "I" => T_INT,
        "J" => T_LONG,
        _ => return None,
    })
}

fn if_opcode(test: TestType, against_zero: bool, reference: bool) -> Result<u8, ConvertError> {
    use TestType::*;
    let opcode = match (reference, against_zero, test) {
        (true, true, Equal) => IFNULL,
        (true, true, NotEqual) => IFNONNULL,
        (true, false, Equal) => IF_ACMPEQ,
        (true, false, NotEqual) => IF_ACMPNE,
        (true, _, other) => fail!("reference comparison with {}", other),
        (false, true, Equal) => IFEQ,
        (false, true, NotEqual) => IFNE,
        (false, true, LessThan) => IFLT,
        (false, true, GreaterThanOrEqual) => IFGE,
        (false, true, GreaterThan) => IFGT,
        (false, true, LessThanOrEqual) => IFLE,
        (false, false, Equal) => IF_ICMPEQ,
        (false, false, NotEqual) => IF_ICMPNE,
        (false, false, LessThan) => IF_ICMPLT,
        (false, false, GreaterThanOrEqual) => IF_ICMPGE,
        (false, false, GreaterThan) => IF_ICMPGT,
        (false, false, LessThanOrEqual) => IF_ICMPLE,
    };
    Ok(opcode)
}

/// Element descriptor of an array being filled, from its type or else the
/// payload's element width.
fn fill_element(array: &IrType, data: &ArrayData) -> String {
    if let IrType::Ref(desc) = array {
        if let Some(element) = desc.strip_prefix('[') {
            return element.to_string();
        }
    }
    match data.element_width {
        1 => "B",
        2 => "S",
        8 => "J",
        _ => "I",
    }
    .to_string()
}

impl<'a> Lowerer<'a> {
    fn push(&mut self, insn: JvmInsn) {
        self.code.push(insn);
    }

    fn labels(&self, id: BlockId) -> Result<BlockLabels, ConvertError> {
        match self.labels.get(&id) {
            Some(labels) => Ok(*labels),
            None => Err(err!("jump to unknown block {}", id)),
        }
    }

    fn slot(&self, local: LocalId) -> Result<u16, ConvertError> {
        match self.slots.get(&local) {
            Some(slot) => Ok(*slot),
            None => Err(err!("no slot for {}", local)),
        }
    }

    fn blocks(&mut self) -> Result<(), ConvertError> {
        let method = self.method;
        for (i, id) in method.layout.iter().enumerate() {
            let Some(block) = method.block(*id) else {
                fail!("block {} is in the layout but missing", id);
            };
            let labels = self.labels(*id)?;
            let next = method.layout.get(i + 1).copied();
            let mut stmts = block.stmts.as_slice();
            if method.is_handler(*id) {
                self.push(JvmInsn::Label(labels.exception));
                match stmts.first() {
                    Some(Stmt::Assign { dst, expr: Expr::CaughtException }) => {
                        self.store(*dst)?;
                        stmts = &stmts[1..];
                    }
                    _ => self.push(JvmInsn::Insn(POP)),
                }
            }
            self.push(JvmInsn::Label(labels.start));
            let head = self.code.instructions.len();
            let guarded = self.covered.contains(id) && block.can_throw();
            let first_throw = if guarded { stmts.iter().position(Stmt::can_throw) } else { None };
            for (at, stmt) in stmts.iter().enumerate() {
                if first_throw == Some(at) {
                    self.open_trap(*id, labels.throws, head);
                }
                self.stmt(stmt).map_err(|e| err!(e, "block {}", id))?;
            }
            if guarded && first_throw.is_none() {
                self.open_trap(*id, labels.throws, head);
            }
            self.terminator(&block.terminator, next).map_err(|e| err!(e, "block {}", id))?;
            self.push(JvmInsn::Label(labels.end));
        }
        Ok(())
    }

    fn open_trap(&mut self, id: BlockId, throws: JvmLabel, head: usize) {
        if self.code.instructions.len() > head {
            self.prefixed.insert(id);
        }
        self.push(JvmInsn::Label(throws));
    }

    fn traps(&mut self) {
        let method = self.method;
        let position: HashMap<BlockId, usize> = method.layout.iter().enumerate().map(|(i, id)| (*id, i)).collect();
        for trap in &method.traps {
            let mut ranges: RangeSet<usize> = RangeSet::new();
            for id in &trap.covered {
                let throws = method.block(*id).map_or(false, |b| b.can_throw());
                if let (true, Some(pos)) = (throws, position.get(id)) {
                    ranges.insert(*pos..*pos + 1);
                }
            }
            let mut spans: Vec<(JvmLabel, JvmLabel)> = Vec::new();
            for range in ranges.iter() {
                let mut open = false;
                for id in &method.layout[range.clone()] {
                    let Some(labels) = self.labels.get(id) else {
                        open = false;
                        continue;
                    };
                    match spans.last_mut() {
                        Some(span) if open && !self.prefixed.contains(id) => span.1 = labels.end,
                        _ => spans.push((labels.throws, labels.end)),
                    }
                    open = true;
                }
            }
            for (start, end) in spans {
                for handler in &trap.handlers {
                    let Some(target) = self.labels.get(&handler.target) else {
                        continue;
                    };
                    self.code.try_catch_blocks.push(TryCatchBlock {
                        start,
                        end,
                        handler: target.exception,
                        catch_type: handler.catch_type.as_deref().map(internal_name),
                    });
                }
            }
        }
    }

    fn load(&mut self, value: &Value) -> Result<(), ConvertError> {
        match value {
            Value::Local(local) => {
                let var = self.slot(*local)?;
                let opcode = load_opcode(self.method.local_type(*local));
                self.push(JvmInsn::Var { opcode, var });
                Ok(())
            }
            Value::Const(constant) => self.constant(constant),
        }
    }

    fn load_all(&mut self, values: &[Value]) -> Result<(), ConvertError> {
        values.iter().try_for_each(|v| self.load(v))
    }

    fn store(&mut self, local: LocalId) -> Result<(), ConvertError> {
        let var = self.slot(local)?;
        let opcode = store_opcode(self.method.local_type(local));
        self.push(JvmInsn::Var { opcode, var });
        Ok(())
    }

    fn constant(&mut self, constant: &Constant) -> Result<(), ConvertError> {
        let insn = match constant {
            Constant::Literal { bits, wide: true } | Constant::Long(bits) => JvmInsn::push_long(*bits),
            Constant::Literal { bits, wide: false } => JvmInsn::push_int(*bits as i32),
            Constant::Int(v) => JvmInsn::push_int(*v),
            Constant::Float(v) => JvmInsn::push_float(*v),
            Constant::Double(v) => JvmInsn::push_double(*v),
            Constant::Null => JvmInsn::Insn(ACONST_NULL),
            Constant::String(s) => {
                let encoded = cesu8::to_java_cesu8(s).len();
                if encoded > MAX_UTF8_LENGTH {
                    fail!("string constant of {} bytes exceeds the constant pool limit", encoded);
                }
                JvmInsn::Ldc(JvmValue::String(s.clone()))
            }
            Constant::Type(desc) => match box_of_primitive(desc) {
                Some(owner) => JvmInsn::Field {
                    opcode: GETSTATIC,
                    owner: owner.to_string(),
                    name: "TYPE".to_string(),
                    descriptor: "Ljava/lang/Class;".to_string(),
                },
                None => JvmInsn::Ldc(JvmValue::Type(desc.clone())),
            },
            Constant::MethodType(desc) => JvmInsn::Ldc(JvmValue::MethodType(desc.clone())),
            Constant::MethodHandle(handle) => JvmInsn::Ldc(JvmValue::Handle(handle.clone())),
        };
        self.push(insn);
        Ok(())
    }

    fn new_array(&mut self, class: &str) {
        let element = class.strip_prefix('[').unwrap_or(class);
        match newarray_code(element) {
            Some(code) => self.push(JvmInsn::Int { opcode: NEWARRAY, operand: code }),
            None => self.push(JvmInsn::Type { opcode: ANEWARRAY, type_name: internal_name(element) }),
        }
    }

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), ConvertError> {
        match stmt {
            Stmt::Assign { expr: Expr::Param(_), .. } => {}
            Stmt::Assign { expr: Expr::CaughtException, .. } => fail!("exception read outside a handler entry"),
            Stmt::Assign { dst, expr: Expr::Value(Value::Local(src)) }
                if self.slots.contains_key(dst) && self.slots.get(dst) == self.slots.get(src) => {}
            Stmt::Assign { dst, expr } => {
                self.expr(expr)?;
                self.store(*dst)?;
            }
            Stmt::Effect(expr) => {
                self.expr(expr)?;
                match expr_type(self.method, expr) {
                    Some(t) if t.is_wide() => self.push(JvmInsn::Insn(POP2)),
                    Some(_) => self.push(JvmInsn::Insn(POP)),
                    None => {}
                }
            }
            Stmt::ArrayStore { op, array, index, value } => {
                let array_type = value_type(self.method, array);
                self.load_all(&[array.clone(), index.clone(), value.clone()])?;
                self.push(JvmInsn::Insn(array_opcode(*op, &array_type)));
            }
            Stmt::PutField { field, object, value } => {
                self.load(object)?;
                self.load(value)?;
                self.push(JvmInsn::Field {
                    opcode: PUTFIELD,
                    owner: internal_name(&field.owner),
                    name: field.name.clone(),
                    descriptor: field.descriptor.clone(),
                });
            }
            Stmt::PutStatic { field, value } => {
                self.load(value)?;
                self.push(JvmInsn::Field {
                    opcode: PUTSTATIC,
                    owner: internal_name(&field.owner),
                    name: field.name.clone(),
                    descriptor: field.descriptor.clone(),
                });
            }
            Stmt::FillArrayData { array, data } => {
                let element = fill_element(&value_type(self.method, array), data);
                for (i, bits) in data.elements.iter().enumerate() {
                    let Some(constant) = data_element(&element, *bits) else {
                        fail!("cannot fill an array of {}", element);
                    };
                    self.load(array)?;
                    self.push(JvmInsn::push_int(i as i32));
                    self.constant(&constant)?;
                    self.push(JvmInsn::Insn(element_store(&element)));
                }
            }
            Stmt::MonitorEnter(value) => {
                self.load(value)?;
                self.push(JvmInsn::Insn(MONITORENTER));
            }
            Stmt::MonitorExit(value) => {
                self.load(value)?;
                self.push(JvmInsn::Insn(MONITOREXIT));
            }
        }
        Ok(())
    }

    fn expr(&mut self, expr: &Expr) -> Result<(), ConvertError> {
        match expr {
            Expr::Value(value) => self.load(value)?,
            Expr::Param(_) | Expr::CaughtException => fail!("{:?} cannot be evaluated here", expr),
            Expr::Unary { op, value } => {
                self.load(value)?;
                for insn in unary_insns(*op) {
                    self.push(insn);
                }
            }
            Expr::Binary { op, first, second } => {
                self.load(first)?;
                self.load(second)?;
                self.push(JvmInsn::Insn(binary_opcode(*op)));
            }
            Expr::Compare { kind, first, second } => {
                self.load(first)?;
                self.load(second)?;
                self.push(JvmInsn::Insn(compare_opcode(*kind)));
            }
            Expr::ArrayLength(array) => {
                self.load(array)?;
                self.push(JvmInsn::Insn(ARRAYLENGTH));
            }
            Expr::ArrayLoad { op, array, index } => {
                let array_type = value_type(self.method, array);
                self.load(array)?;
                self.load(index)?;
                self.push(JvmInsn::Insn(array_opcode(*op, &array_type)));
            }
            Expr::InstanceOf { value, class } => {
                self.load(value)?;
                self.push(JvmInsn::Type { opcode: INSTANCEOF, type_name: internal_name(class) });
            }
            Expr::CheckCast { value, class } => {
                self.load(value)?;
                self.push(JvmInsn::Type { opcode: CHECKCAST, type_name: internal_name(class) });
            }
            Expr::NewInstance(class) => self.push(JvmInsn::Type { opcode: NEW, type_name: internal_name(class) }),
            Expr::NewArray { class, size } => {
                self.load(size)?;
                self.new_array(class);
            }
            Expr::FilledArray { class, elements } => {
                let element = class.strip_prefix('[').unwrap_or(class);
                self.push(JvmInsn::push_int(elements.len() as i32));
                self.new_array(class);
                for (i, value) in elements.iter().enumerate() {
                    self.push(JvmInsn::Insn(DUP));
                    self.push(JvmInsn::push_int(i as i32));
                    self.load(value)?;
                    self.push(JvmInsn::Insn(element_store(element)));
                }
            }
            Expr::NewMultiArray { class, dims } => {
                self.load_all(dims)?;
                let Ok(dimensions) = u8::try_from(dims.len()) else {
                    fail!("{} dimensions for {}", dims.len(), class);
                };
                self.push(JvmInsn::MultiANewArray { descriptor: class.clone(), dimensions });
            }
            Expr::GetField { field, object } => {
                self.load(object)?;
                self.push(JvmInsn::Field {
                    opcode: GETFIELD,
                    owner: internal_name(&field.owner),
                    name: field.name.clone(),
                    descriptor: field.descriptor.clone(),
                });
            }
            Expr::GetStatic { field } => self.push(JvmInsn::Field {
                opcode: GETSTATIC,
                owner: internal_name(&field.owner),
                name: field.name.clone(),
                descriptor: field.descriptor.clone(),
            }),
            Expr::Invoke { kind, method, args } => {
                self.load_all(args)?;
                let opcode = match kind {
                    InvokeKind::Virtual => INVOKEVIRTUAL,
                    InvokeKind::Super | InvokeKind::Direct => INVOKESPECIAL,
                    InvokeKind::Static => INVOKESTATIC,
                    InvokeKind::Interface => INVOKEINTERFACE,
                };
                self.push(JvmInsn::Method {
                    opcode,
                    owner: internal_name(&method.owner),
                    name: method.name.clone(),
                    descriptor: method.descriptor.clone(),
                    is_interface: *kind == InvokeKind::Interface,
                });
            }
            Expr::InvokePolymorphic { method, proto, args } => {
                self.load_all(args)?;
                self.push(JvmInsn::Method {
                    opcode: INVOKEVIRTUAL,
                    owner: internal_name(&method.owner),
                    name: method.name.clone(),
                    descriptor: proto.clone(),
                    is_interface: false,
                });
            }
            Expr::InvokeCustom { call_site, args } => {
                self.load_all(args)?;
                let bootstrap = convert_handle(&call_site.bootstrap)?;
                let mut arguments = Vec::with_capacity(call_site.arguments.len());
                for argument in &call_site.arguments {
                    match convert_constant(argument) {
                        Some(value) => arguments.push(value),
                        None => fail!("unsupported bootstrap argument {:?}", argument),
                    }
                }
                self.push(JvmInsn::InvokeDynamic {
                    name: call_site.name.clone(),
                    descriptor: call_site.descriptor.clone(),
                    bootstrap,
                    arguments,
                });
            }
            Expr::NewObject { class, constructor, args } => {
                self.push(JvmInsn::Type { opcode: NEW, type_name: internal_name(class) });
                self.push(JvmInsn::Insn(DUP));
                self.load_all(args)?;
                self.push(JvmInsn::Method {
                    opcode: INVOKESPECIAL,
                    owner: internal_name(&constructor.owner),
                    name: constructor.name.clone(),
                    descriptor: constructor.descriptor.clone(),
                    is_interface: false,
                });
            }
        }
        Ok(())
    }

    fn jump(&mut self, target: BlockId, next: Option<BlockId>) -> Result<(), ConvertError> {
        if Some(target) != next {
            let label = self.labels(target)?.start;
            self.push(JvmInsn::Jump { opcode: GOTO, target: label });
        }
        Ok(())
    }

    fn terminator(&mut self, terminator: &Terminator, next: Option<BlockId>) -> Result<(), ConvertError> {
        match terminator {
            Terminator::Goto(target) => self.jump(*target, next)?,
            Terminator::If { test, first, second, then, otherwise } => {
                let reference = value_type(self.method, first).is_ref()
                    || second.as_ref().map_or(false, |s| value_type(self.method, s).is_ref());
                self.load(first)?;
                if let Some(second) = second {
                    self.load(second)?;
                }
                let opcode = if_opcode(*test, second.is_none(), reference)?;
                let target = self.labels(*then)?.start;
                self.push(JvmInsn::Jump { opcode, target });
                self.jump(*otherwise, next)?;
            }
            Terminator::Switch { value, cases, default } => {
                self.load(value)?;
                let default_label = self.labels(*default)?.start;
                let mut sorted: Vec<(i32, BlockId)> = Vec::with_capacity(cases.len());
                for (key, target) in cases {
                    if !sorted.iter().any(|(k, _)| k == key) {
                        sorted.push((*key, *target));
                    }
                }
                sorted.sort_by_key(|(key, _)| *key);
                let (Some((min, _)), Some((max, _))) = (sorted.first().copied(), sorted.last().copied()) else {
                    self.push(JvmInsn::Insn(POP));
                    return self.jump(*default, None);
                };
                let span = max as i64 - min as i64 + 1;
                if span <= 2 * sorted.len() as i64 + 10 {
                    let mut targets = Vec::with_capacity(span as usize);
                    for key in min..=max {
                        let label = match sorted.iter().find(|(k, _)| *k == key) {
                            Some((_, target)) => self.labels(*target)?.start,
                            None => default_label,
                        };
                        targets.push(label);
                    }
                    self.push(JvmInsn::TableSwitch { min, max, default: default_label, targets });
                } else {
                    let mut targets = Vec::with_capacity(sorted.len());
                    for (_, target) in &sorted {
                        targets.push(self.labels(*target)?.start);
                    }
                    let keys = sorted.iter().map(|(k, _)| *k).collect();
                    self.push(JvmInsn::LookupSwitch { default: default_label, keys, targets });
                }
            }
            Terminator::Return(None) => self.push(JvmInsn::Insn(RETURN)),
            Terminator::Return(Some(value)) => {
                let opcode = return_opcode(&self.method.return_type);
                if opcode == RETURN {
                    fail!("value returned from a void method");
                }
                self.load(value)?;
                self.push(JvmInsn::Insn(opcode));
            }
            Terminator::Throw(value) => {
                self.load(value)?;
                self.push(JvmInsn::Insn(ATHROW));
            }
        }
        Ok(())
    }
}
