//! Dalvik instructions in symbolic form.
//!
//! Register numbers are widened to `u16` and the `/16`, `/from16`, `/range`,
//! `/2addr` and `/lit` encodings are folded into one variant each; literal
//! payloads (`fill-array-data`, switch tables) are carried inline.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::dex::nodes::{CallSite, FieldRef, MethodHandle, MethodRef};

pub type Reg = u16;

/// A branch target or try boundary inside a method body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label(pub String);

impl Label {
    pub fn new(name: &str) -> Self {
        Label(name.to_string())
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, ":{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MoveKind {
    Single,
    Wide,
    Object,
}

/// `fill-array-data` payload. Signed elements are stored sign-extended,
/// unsigned ones zero-extended; 64-bit values keep their bit pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArrayData {
    pub element_width: u8,
    pub elements: Vec<i64>,
}

impl ArrayData {
    pub fn new<T>(element_width: u8, values: &[T]) -> Self
    where
        T: num_traits::PrimInt + num_traits::AsPrimitive<i64>,
    {
        ArrayData {
            element_width,
            elements: values.iter().map(|&v| v.as_()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DexInstruction {
    Label(Label),
    Nop,
    Move { kind: MoveKind, dest: Reg, src: Reg },
    MoveResult { kind: MoveKind, dest: Reg },
    MoveException { dest: Reg },
    ReturnVoid,
    Return { kind: MoveKind, src: Reg },
    Const { dest: Reg, value: i32 },
    ConstWide { dest: Reg, value: i64 },
    ConstString { dest: Reg, value: String },
    ConstClass { dest: Reg, class: String },
    ConstMethodHandle { dest: Reg, handle: MethodHandle },
    ConstMethodType { dest: Reg, descriptor: String },
    MonitorEnter { src: Reg },
    MonitorExit { src: Reg },
    CheckCast { reg: Reg, class: String },
    InstanceOf { dest: Reg, src: Reg, class: String },
    ArrayLength { dest: Reg, array: Reg },
    NewInstance { dest: Reg, class: String },
    NewArray { dest: Reg, size: Reg, class: String },
    FilledNewArray { args: Vec<Reg>, class: String },
    FillArrayData { array: Reg, data: ArrayData },
    Throw { src: Reg },
    Goto { target: Label },
    PackedSwitch { src: Reg, first_key: i32, targets: Vec<Label> },
    SparseSwitch { src: Reg, cases: Vec<(i32, Label)> },
    Compare { kind: CompareType, dest: Reg, first: Reg, second: Reg },
    If { test: TestType, first: Reg, second: Reg, target: Label },
    IfZ { test: TestType, src: Reg, target: Label },
    /// `aget*` when `op` is a get (`value` is the destination), `aput*` otherwise.
    Array { op: ArrayOperation, value: Reg, array: Reg, index: Reg },
    Instance { op: ArrayOperation, value: Reg, object: Reg, field: FieldRef },
    Static { op: ArrayOperation, value: Reg, field: FieldRef },
    Invoke { kind: InvokeKind, args: Vec<Reg>, method: MethodRef },
    InvokePolymorphic { args: Vec<Reg>, method: MethodRef, proto: String },
    InvokeCustom { args: Vec<Reg>, call_site: CallSite },
    Unary { op: UnaryOperation, dest: Reg, src: Reg },
    Binary { op: BinaryOperation, dest: Reg, first: Reg, second: Reg },
    /// `*-int/lit8` and `*-int/lit16`; `rsub-int` is `reverse`.
    BinaryLit { op: BinaryOperation, dest: Reg, src: Reg, literal: i32, reverse: bool },
}

impl DexInstruction {
    /// Whether the instruction may raise an exception at run time.
    pub fn can_throw(&self) -> bool {
        match self {
            DexInstruction::ConstClass { .. }
            | DexInstruction::MonitorEnter { .. }
            | DexInstruction::MonitorExit { .. }
            | DexInstruction::CheckCast { .. }
            | DexInstruction::InstanceOf { .. }
            | DexInstruction::ArrayLength { .. }
            | DexInstruction::NewInstance { .. }
            | DexInstruction::NewArray { .. }
            | DexInstruction::FilledNewArray { .. }
            | DexInstruction::FillArrayData { .. }
            | DexInstruction::Throw { .. }
            | DexInstruction::Array { .. }
            | DexInstruction::Instance { .. }
            | DexInstruction::Static { .. }
            | DexInstruction::Invoke { .. }
            | DexInstruction::InvokePolymorphic { .. }
            | DexInstruction::InvokeCustom { .. } => true,
            DexInstruction::Binary { op, .. } | DexInstruction::BinaryLit { op, .. } => op.is_integral_division(),
            _ => false,
        }
    }

    /// Whether control never falls through to the next instruction.
    pub fn ends_flow(&self) -> bool {
        matches!(
            self,
            DexInstruction::ReturnVoid
                | DexInstruction::Return { .. }
                | DexInstruction::Throw { .. }
                | DexInstruction::Goto { .. }
        )
    }

    pub fn is_branch(&self) -> bool {
        self.ends_flow()
            || matches!(
                self,
                DexInstruction::If { .. }
                    | DexInstruction::IfZ { .. }
                    | DexInstruction::PackedSwitch { .. }
                    | DexInstruction::SparseSwitch { .. }
            )
    }

    /// Explicit branch targets, not including the fall-through.
    pub fn targets(&self) -> Vec<&Label> {
        match self {
            DexInstruction::Goto { target } => vec![target],
            DexInstruction::If { target, .. } | DexInstruction::IfZ { target, .. } => vec![target],
            DexInstruction::PackedSwitch { targets, .. } => targets.iter().collect(),
            DexInstruction::SparseSwitch { cases, .. } => cases.iter().map(|(_, l)| l).collect(),
            _ => Vec::new(),
        }
    }

    /// Whether a `move-result*` may follow this instruction.
    pub fn has_result(&self) -> bool {
        matches!(
            self,
            DexInstruction::Invoke { .. }
                | DexInstruction::InvokePolymorphic { .. }
                | DexInstruction::InvokeCustom { .. }
                | DexInstruction::FilledNewArray { .. }
        )
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompareType {
    LessThanFloat,
    GreaterThanFloat,
    LessThanDouble,
    GreaterThanDouble,
    Long,
}

impl fmt::Display for CompareType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::LessThanFloat => "cmpl-float",
            Self::GreaterThanFloat => "cmpg-float",
            Self::LessThanDouble => "cmpl-double",
            Self::GreaterThanDouble => "cmpg-double",
            Self::Long => "cmp-long",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TestType {
    Equal,
    NotEqual,
    LessThan,
    GreaterThanOrEqual,
    GreaterThan,
    LessThanOrEqual,
}

impl fmt::Display for TestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Equal => "eq",
            Self::NotEqual => "ne",
            Self::LessThan => "lt",
            Self::GreaterThanOrEqual => "ge",
            Self::GreaterThan => "gt",
            Self::LessThanOrEqual => "le",
        };
        f.write_str(s)
    }
}

/// Shared by array, instance field and static field access.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ArrayOperation {
    Get,
    GetWide,
    GetObject,
    GetBoolean,
    GetByte,
    GetChar,
    GetShort,
    Put,
    PutWide,
    PutObject,
    PutBoolean,
    PutByte,
    PutChar,
    PutShort,
}

impl ArrayOperation {
    pub fn is_get(&self) -> bool {
        matches!(
            self,
            Self::Get | Self::GetWide | Self::GetObject | Self::GetBoolean | Self::GetByte | Self::GetChar | Self::GetShort
        )
    }

    pub fn is_wide(&self) -> bool {
        matches!(self, Self::GetWide | Self::PutWide)
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Self::GetObject | Self::PutObject)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvokeKind {
    Virtual,
    Super,
    Direct,
    Static,
    Interface,
}

impl fmt::Display for InvokeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Virtual => "invoke-virtual",
            Self::Super => "invoke-super",
            Self::Direct => "invoke-direct",
            Self::Static => "invoke-static",
            Self::Interface => "invoke-interface",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOperation {
    NegateInt,
    NotInt,
    NegateLong,
    NotLong,
    NegateFloat,
    NegateDouble,
    IntToLong,
    IntToFloat,
    IntToDouble,
    LongToInt,
    LongToFloat,
    LongToDouble,
    FloatToInt,
    FloatToLong,
    FloatToDouble,
    DoubleToInt,
    DoubleToLong,
    DoubleToFloat,
    IntToByte,
    IntToChar,
    IntToShort,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinaryOperation {
    AddInt,
    SubInt,
    MulInt,
    DivInt,
    RemInt,
    AndInt,
    OrInt,
    XorInt,
    ShlInt,
    ShrInt,
    UshrInt,
    AddLong,
    SubLong,
    MulLong,
    DivLong,
    RemLong,
    AndLong,
    OrLong,
    XorLong,
    ShlLong,
    ShrLong,
    UshrLong,
    AddFloat,
    SubFloat,
    MulFloat,
    DivFloat,
    RemFloat,
    AddDouble,
    SubDouble,
    MulDouble,
    DivDouble,
    RemDouble,
}

impl BinaryOperation {
    pub fn is_integral_division(&self) -> bool {
        matches!(self, Self::DivInt | Self::RemInt | Self::DivLong | Self::RemLong)
    }

    pub fn is_shift(&self) -> bool {
        matches!(
            self,
            Self::ShlInt | Self::ShrInt | Self::UshrInt | Self::ShlLong | Self::ShrLong | Self::UshrLong
        )
    }
}

impl fmt::Display for DexInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Label(label) => write!(f, "{}", label),
            Self::Nop => write!(f, "nop"),
            Self::Move { kind, dest, src } => write!(f, "move{} v{}, v{}", move_suffix(kind), dest, src),
            Self::MoveResult { kind, dest } => write!(f, "move-result{} v{}", move_suffix(kind), dest),
            Self::MoveException { dest } => write!(f, "move-exception v{}", dest),
            Self::ReturnVoid => write!(f, "return-void"),
            Self::Return { kind, src } => write!(f, "return{} v{}", move_suffix(kind), src),
            Self::Const { dest, value } => write!(f, "const v{}, #{}", dest, value),
            Self::ConstWide { dest, value } => write!(f, "const-wide v{}, #{}", dest, value),
            Self::ConstString { dest, value } => write!(f, "const-string v{}, {:?}", dest, value),
            Self::ConstClass { dest, class } => write!(f, "const-class v{}, {}", dest, class),
            Self::ConstMethodHandle { dest, handle } => write!(f, "const-method-handle v{}, {}", dest, handle.member),
            Self::ConstMethodType { dest, descriptor } => write!(f, "const-method-type v{}, {}", dest, descriptor),
            Self::MonitorEnter { src } => write!(f, "monitor-enter v{}", src),
            Self::MonitorExit { src } => write!(f, "monitor-exit v{}", src),
            Self::CheckCast { reg, class } => write!(f, "check-cast v{}, {}", reg, class),
            Self::InstanceOf { dest, src, class } => write!(f, "instance-of v{}, v{}, {}", dest, src, class),
            Self::ArrayLength { dest, array } => write!(f, "array-length v{}, v{}", dest, array),
            Self::NewInstance { dest, class } => write!(f, "new-instance v{}, {}", dest, class),
            Self::NewArray { dest, size, class } => write!(f, "new-array v{}, v{}, {}", dest, size, class),
            Self::FilledNewArray { args, class } => write!(f, "filled-new-array {{{}}}, {}", registers(args), class),
            Self::FillArrayData { array, data } => {
                write!(f, "fill-array-data v{}, {} x {}", array, data.elements.len(), data.element_width)
            }
            Self::Throw { src } => write!(f, "throw v{}", src),
            Self::Goto { target } => write!(f, "goto {}", target),
            Self::PackedSwitch { src, first_key, targets } => {
                write!(f, "packed-switch v{}, {} +{}", src, first_key, targets.len())
            }
            Self::SparseSwitch { src, cases } => write!(f, "sparse-switch v{}, {} cases", src, cases.len()),
            Self::Compare { kind, dest, first, second } => write!(f, "{} v{}, v{}, v{}", kind, dest, first, second),
            Self::If { test, first, second, target } => write!(f, "if-{} v{}, v{}, {}", test, first, second, target),
            Self::IfZ { test, src, target } => write!(f, "if-{}z v{}, {}", test, src, target),
            Self::Array { op, value, array, index } => write!(f, "a{:?} v{}, v{}, v{}", op, value, array, index),
            Self::Instance { op, value, object, field } => write!(f, "i{:?} v{}, v{}, {}", op, value, object, field),
            Self::Static { op, value, field } => write!(f, "s{:?} v{}, {}", op, value, field),
            Self::Invoke { kind, args, method } => write!(f, "{} {{{}}}, {}", kind, registers(args), method),
            Self::InvokePolymorphic { args, method, proto } => {
                write!(f, "invoke-polymorphic {{{}}}, {}, {}", registers(args), method, proto)
            }
            Self::InvokeCustom { args, call_site } => {
                write!(f, "invoke-custom {{{}}}, {}{}", registers(args), call_site.name, call_site.descriptor)
            }
            Self::Unary { op, dest, src } => write!(f, "{:?} v{}, v{}", op, dest, src),
            Self::Binary { op, dest, first, second } => write!(f, "{:?} v{}, v{}, v{}", op, dest, first, second),
            Self::BinaryLit { op, dest, src, literal, reverse } => {
                let prefix = if *reverse { "R" } else { "" };
                write!(f, "{}{:?}/lit v{}, v{}, #{}", prefix, op, dest, src, literal)
            }
        }
    }
}

fn move_suffix(kind: &MoveKind) -> &'static str {
    match kind {
        MoveKind::Single => "",
        MoveKind::Wide => "-wide",
        MoveKind::Object => "-object",
    }
}

fn registers(args: &[Reg]) -> String {
    args.iter().map(|r| format!("v{}", r)).collect::<Vec<_>>().join(", ")
}
