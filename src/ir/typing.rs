//! Operand and result types of IR operations.
//!
//! Expectations are returned in the same order as the `values()` visitors
//! of [`Stmt`], [`Expr`] and [`Terminator`], so callers can zip them with
//! `values_mut()`.

use std::collections::HashMap;

use crate::dex::instructions::{ArrayOperation, BinaryOperation, CompareType, InvokeKind, UnaryOperation};
use crate::ir::{Constant, Expr, IrMethod, IrType, LocalId, Stmt, Terminator, Value, OBJECT_DESC};
use crate::types::parse_method_descriptor;

pub const THROWABLE_DESC: &str = "Ljava/lang/Throwable;";

fn object() -> IrType {
    IrType::Ref(OBJECT_DESC.to_string())
}

/// Argument types of a method descriptor, empty when it does not parse.
pub fn argument_types(descriptor: &str) -> Vec<IrType> {
    parse_method_descriptor(descriptor)
        .map(|s| s.args.iter().map(|a| IrType::from_descriptor(&a.to_jni())).collect())
        .unwrap_or_default()
}

pub fn unary_types(op: UnaryOperation) -> (IrType, IrType) {
    use UnaryOperation::*;
    match op {
        NegateInt | NotInt | IntToByte | IntToChar | IntToShort => (IrType::Int, IrType::Int),
        NegateLong | NotLong => (IrType::Long, IrType::Long),
        NegateFloat => (IrType::Float, IrType::Float),
        NegateDouble => (IrType::Double, IrType::Double),
        IntToLong => (IrType::Int, IrType::Long),
        IntToFloat => (IrType::Int, IrType::Float),
        IntToDouble => (IrType::Int, IrType::Double),
        LongToInt => (IrType::Long, IrType::Int),
        LongToFloat => (IrType::Long, IrType::Float),
        LongToDouble => (IrType::Long, IrType::Double),
        FloatToInt => (IrType::Float, IrType::Int),
        FloatToLong => (IrType::Float, IrType::Long),
        FloatToDouble => (IrType::Float, IrType::Double),
        DoubleToInt => (IrType::Double, IrType::Int),
        DoubleToLong => (IrType::Double, IrType::Long),
        DoubleToFloat => (IrType::Double, IrType::Float),
    }
}

pub fn binary_type(op: BinaryOperation) -> IrType {
    use BinaryOperation::*;
    match op {
        AddInt | SubInt | MulInt | DivInt | RemInt | AndInt | OrInt | XorInt | ShlInt | ShrInt | UshrInt => IrType::Int,
        AddLong | SubLong | MulLong | DivLong | RemLong | AndLong | OrLong | XorLong | ShlLong | ShrLong | UshrLong => {
            IrType::Long
        }
        AddFloat | SubFloat | MulFloat | DivFloat | RemFloat => IrType::Float,
        AddDouble | SubDouble | MulDouble | DivDouble | RemDouble => IrType::Double,
    }
}

pub fn compare_type(kind: CompareType) -> IrType {
    match kind {
        CompareType::LessThanFloat | CompareType::GreaterThanFloat => IrType::Float,
        CompareType::LessThanDouble | CompareType::GreaterThanDouble => IrType::Double,
        CompareType::Long => IrType::Long,
    }
}

/// Element type moved by an array access, refined by the array's type when
/// the opcode alone is ambiguous (`aget` covers int and float).
pub fn array_element(op: ArrayOperation, array: &IrType) -> IrType {
    use ArrayOperation::*;
    let known = array.element();
    match op {
        GetObject | PutObject => match known {
            Some(t @ IrType::Ref(_)) => t,
            _ => object(),
        },
        GetWide | PutWide => match known {
            Some(IrType::Double) => IrType::Double,
            _ => IrType::Long,
        },
        Get | Put => match known {
            Some(IrType::Float) => IrType::Float,
            _ => IrType::Int,
        },
        GetBoolean | GetByte | GetChar | GetShort | PutBoolean | PutByte | PutChar | PutShort => IrType::Int,
    }
}

pub fn constant_type(constant: &Constant) -> IrType {
    match constant {
        Constant::Literal { .. } => IrType::Unknown,
        Constant::Int(_) => IrType::Int,
        Constant::Long(_) => IrType::Long,
        Constant::Float(_) => IrType::Float,
        Constant::Double(_) => IrType::Double,
        Constant::Null => object(),
        Constant::String(_) => IrType::Ref("Ljava/lang/String;".to_string()),
        Constant::Type(_) => IrType::Ref("Ljava/lang/Class;".to_string()),
        Constant::MethodType(_) => IrType::Ref("Ljava/lang/invoke/MethodType;".to_string()),
        Constant::MethodHandle(_) => IrType::Ref("Ljava/lang/invoke/MethodHandle;".to_string()),
    }
}

/// Typed constant for one `fill-array-data` element of an array with the
/// given element descriptor.
pub fn data_element(descriptor: &str, bits: i64) -> Option<Constant> {
    Some(match descriptor {
        "I" | "S" | "B" | "C" | "Z" => Constant::Int(bits as i32),
        "J" => Constant::Long(bits),
        "F" => Constant::Float(f32::from_bits(bits as u32)),
        "D" => Constant::Double(f64::from_bits(bits as u64)),
        _ => return None,
    })
}

pub fn value_type(method: &IrMethod, value: &Value) -> IrType {
    match value {
        Value::Local(l) => method.local_type(*l).clone(),
        Value::Const(c) => constant_type(c),
    }
}

/// Type produced by an expression, `None` for a void call.
pub fn expr_type(method: &IrMethod, expr: &Expr) -> Option<IrType> {
    let t = match expr {
        Expr::Value(v) => value_type(method, v),
        Expr::Param(i) => method.params.get(*i as usize).map(|d| IrType::from_descriptor(d)).unwrap_or(IrType::Unknown),
        Expr::CaughtException => IrType::Ref(THROWABLE_DESC.to_string()),
        Expr::Unary { op, .. } => unary_types(*op).1,
        Expr::Binary { op, .. } => binary_type(*op),
        Expr::Compare { .. } | Expr::ArrayLength(_) | Expr::InstanceOf { .. } => IrType::Int,
        Expr::ArrayLoad { op, array, .. } => array_element(*op, &value_type(method, array)),
        Expr::CheckCast { class, .. } => IrType::Ref(class.clone()),
        Expr::NewInstance(class)
        | Expr::NewArray { class, .. }
        | Expr::FilledArray { class, .. }
        | Expr::NewMultiArray { class, .. }
        | Expr::NewObject { class, .. } => IrType::Ref(class.clone()),
        Expr::GetField { field, .. } | Expr::GetStatic { field } => IrType::from_descriptor(&field.descriptor),
        Expr::Invoke { .. } | Expr::InvokePolymorphic { .. } | Expr::InvokeCustom { .. } => {
            match expr.invoke_return() {
                Some("V") | None => return None,
                Some(desc) => IrType::from_descriptor(desc),
            }
        }
    };
    Some(t)
}

fn padded(mut types: Vec<Option<IrType>>, len: usize) -> Vec<Option<IrType>> {
    types.resize(len, None);
    types
}

pub fn expr_expectations(method: &IrMethod, expr: &Expr) -> Vec<Option<IrType>> {
    let len = expr.values().len();
    let types = match expr {
        Expr::Value(_) => vec![None],
        Expr::Param(_) | Expr::CaughtException | Expr::NewInstance(_) | Expr::GetStatic { .. } => Vec::new(),
        Expr::Unary { op, .. } => vec![Some(unary_types(*op).0)],
        Expr::Binary { op, .. } => {
            let t = binary_type(*op);
            let second = if op.is_shift() { IrType::Int } else { t.clone() };
            vec![Some(t), Some(second)]
        }
        Expr::Compare { kind, .. } => vec![Some(compare_type(*kind)), Some(compare_type(*kind))],
        Expr::ArrayLength(_) | Expr::InstanceOf { .. } | Expr::CheckCast { .. } => vec![Some(object())],
        Expr::ArrayLoad { .. } => vec![Some(object()), Some(IrType::Int)],
        Expr::NewArray { .. } => vec![Some(IrType::Int)],
        Expr::FilledArray { class, elements } => {
            let element = IrType::Ref(class.clone()).element();
            vec![element; elements.len()]
        }
        Expr::NewMultiArray { dims, .. } => vec![Some(IrType::Int); dims.len()],
        Expr::GetField { field, .. } => vec![Some(IrType::Ref(field.owner.clone()))],
        Expr::Invoke { kind, method: callee, .. } => {
            let mut out = Vec::new();
            if *kind != InvokeKind::Static {
                out.push(Some(IrType::Ref(callee.owner.clone())));
            }
            out.extend(argument_types(&callee.descriptor).into_iter().map(Some));
            out
        }
        Expr::InvokePolymorphic { method: callee, proto, .. } => {
            let mut out = vec![Some(IrType::Ref(callee.owner.clone()))];
            out.extend(argument_types(proto).into_iter().map(Some));
            out
        }
        Expr::InvokeCustom { call_site, .. } => argument_types(&call_site.descriptor).into_iter().map(Some).collect(),
        Expr::NewObject { constructor, .. } => argument_types(&constructor.descriptor).into_iter().map(Some).collect(),
    };
    padded(types, len)
}

pub fn stmt_expectations(method: &IrMethod, stmt: &Stmt) -> Vec<Option<IrType>> {
    match stmt {
        Stmt::Assign { expr, .. } | Stmt::Effect(expr) => expr_expectations(method, expr),
        Stmt::ArrayStore { op, array, .. } => {
            let array_type = value_type(method, array);
            vec![Some(object()), Some(IrType::Int), Some(array_element(*op, &array_type))]
        }
        Stmt::PutField { field, .. } => {
            vec![Some(IrType::Ref(field.owner.clone())), Some(IrType::from_descriptor(&field.descriptor))]
        }
        Stmt::PutStatic { field, .. } => vec![Some(IrType::from_descriptor(&field.descriptor))],
        Stmt::FillArrayData { .. } | Stmt::MonitorEnter(_) | Stmt::MonitorExit(_) => vec![Some(object())],
    }
}

/// Conditional operands take the type of their partner.
pub fn terminator_expectations(method: &IrMethod, terminator: &Terminator) -> Vec<Option<IrType>> {
    match terminator {
        Terminator::Goto(_) | Terminator::Return(None) => Vec::new(),
        Terminator::If { first, second: Some(second), .. } => {
            let known = |t: IrType| if t.is_known() { Some(t) } else { None };
            vec![known(value_type(method, second)), known(value_type(method, first))]
        }
        Terminator::If { second: None, .. } => vec![None],
        Terminator::Switch { .. } => vec![Some(IrType::Int)],
        Terminator::Return(Some(_)) => vec![method.return_ir_type()],
        Terminator::Throw(_) => vec![Some(IrType::Ref(THROWABLE_DESC.to_string()))],
    }
}

/// Result type of every single-assignment local, from its definition.
pub fn def_types(method: &IrMethod) -> HashMap<LocalId, IrType> {
    let mut out = HashMap::new();
    for stmt in method.stmts() {
        if let Stmt::Assign { dst, expr } = stmt {
            if let Some(t) = expr_type(method, expr) {
                if t.is_known() {
                    out.insert(*dst, t);
                }
            }
        }
    }
    out
}

/// Visits every operand slot with the type its use expects.
pub fn for_each_typed_use_mut<F>(method: &mut IrMethod, mut f: F)
where
    F: FnMut(&mut Value, Option<&IrType>),
{
    let layout = method.layout.clone();
    for id in layout {
        let Some(block) = method.block(id) else {
            continue;
        };
        let stmt_types: Vec<Vec<Option<IrType>>> = block.stmts.iter().map(|s| stmt_expectations(method, s)).collect();
        let term_types = terminator_expectations(method, &block.terminator);
        let Some(block) = method.block_mut(id) else {
            continue;
        };
        for (stmt, types) in block.stmts.iter_mut().zip(stmt_types) {
            for (value, t) in stmt.values_mut().into_iter().zip(types) {
                f(value, t.as_ref());
            }
        }
        for (value, t) in block.terminator.values_mut().into_iter().zip(term_types) {
            f(value, t.as_ref());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::nodes::{FieldRef, MethodRef};

    fn method() -> IrMethod {
        IrMethod::new("La/B;", "f", "(J)V", false, vec!["La/B;".to_string(), "J".to_string()], "V")
    }

    #[test]
    fn expectations_follow_value_order() {
        let m = method();
        let call = Expr::Invoke {
            kind: InvokeKind::Virtual,
            method: MethodRef::new("La/C;", "g", "(IJLjava/lang/String;)V"),
            args: vec![Value::literal(0, false); 4],
        };
        assert_eq!(
            expr_expectations(&m, &call),
            vec![
                Some(IrType::Ref("La/C;".to_string())),
                Some(IrType::Int),
                Some(IrType::Long),
                Some(IrType::Ref("Ljava/lang/String;".to_string())),
            ]
        );
        let shift = Expr::Binary { op: BinaryOperation::ShlLong, first: Value::literal(1, true), second: Value::literal(3, false) };
        assert_eq!(expr_expectations(&m, &shift), vec![Some(IrType::Long), Some(IrType::Int)]);
        let put = Stmt::PutField {
            field: FieldRef::new("La/C;", "x", "D"),
            object: Value::literal(0, false),
            value: Value::literal(0, true),
        };
        assert_eq!(stmt_expectations(&m, &put)[1], Some(IrType::Double));
    }

    #[test]
    fn array_access_refines_by_array_type() {
        assert_eq!(array_element(ArrayOperation::Get, &IrType::Ref("[F".to_string())), IrType::Float);
        assert_eq!(array_element(ArrayOperation::Get, &IrType::Unknown), IrType::Int);
        assert_eq!(array_element(ArrayOperation::PutWide, &IrType::Ref("[D".to_string())), IrType::Double);
        assert_eq!(
            array_element(ArrayOperation::GetObject, &IrType::Ref("[[I".to_string())),
            IrType::Ref("[I".to_string())
        );
    }

    #[test]
    fn void_calls_have_no_type() {
        let m = method();
        let call = Expr::Invoke { kind: InvokeKind::Static, method: MethodRef::new("La/C;", "g", "()V"), args: vec![] };
        assert_eq!(expr_type(&m, &call), None);
        assert_eq!(expr_type(&m, &Expr::Param(1)), Some(IrType::Long));
    }
}
