//! Constant, annotation and method handle conversion.

use log::warn;

use crate::dex::nodes::{DexAnnotation, DexAnnotationNode, DexValue, MemberRef, MethodHandle, MethodHandleKind, Visibility};
use crate::error::ConvertError;
use crate::jvm::{
    AnnotationValue, Handle, JvmAnnotation, JvmValue, H_GETFIELD, H_GETSTATIC, H_INVOKEINTERFACE, H_INVOKESPECIAL,
    H_INVOKESTATIC, H_INVOKEVIRTUAL, H_NEWINVOKESPECIAL, H_PUTFIELD, H_PUTSTATIC,
};
use crate::types::internal_name;

fn handle_tag(kind: MethodHandleKind) -> u8 {
    match kind {
        MethodHandleKind::InstanceGet => H_GETFIELD,
        MethodHandleKind::InstancePut => H_PUTFIELD,
        MethodHandleKind::StaticGet => H_GETSTATIC,
        MethodHandleKind::StaticPut => H_PUTSTATIC,
        MethodHandleKind::InvokeInstance => H_INVOKEVIRTUAL,
        MethodHandleKind::InvokeStatic => H_INVOKESTATIC,
        MethodHandleKind::InvokeConstructor => H_NEWINVOKESPECIAL,
        MethodHandleKind::InvokeDirect => H_INVOKESPECIAL,
        MethodHandleKind::InvokeInterface => H_INVOKEINTERFACE,
    }
}

pub fn convert_handle(handle: &MethodHandle) -> Result<Handle, ConvertError> {
    let tag = handle_tag(handle.kind);
    match (&handle.member, handle.kind.is_field_access()) {
        (MemberRef::Field(field), true) => Ok(Handle {
            tag,
            owner: internal_name(&field.owner),
            name: field.name.clone(),
            descriptor: field.descriptor.clone(),
            is_interface: false,
        }),
        (MemberRef::Method(method), false) => Ok(Handle {
            tag,
            owner: internal_name(&method.owner),
            name: method.name.clone(),
            descriptor: method.descriptor.clone(),
            is_interface: handle.kind == MethodHandleKind::InvokeInterface,
        }),
        (member, _) => Err(err!("method handle {:?} cannot refer to {}", handle.kind, member)),
    }
}

/// A loadable constant, as used by `ldc` and bootstrap arguments.
pub fn convert_constant(value: &DexValue) -> Option<JvmValue> {
    let converted = match value {
        DexValue::Byte(v) => JvmValue::Byte(*v),
        DexValue::Short(v) => JvmValue::Short(*v),
        DexValue::Char(v) => JvmValue::Char(*v),
        DexValue::Int(v) => JvmValue::Int(*v),
        DexValue::Long(v) => JvmValue::Long(*v),
        DexValue::Float(v) => JvmValue::Float(*v),
        DexValue::Double(v) => JvmValue::Double(*v),
        DexValue::Boolean(v) => JvmValue::Boolean(*v),
        DexValue::String(s) => JvmValue::String(s.clone()),
        DexValue::Type(desc) => JvmValue::Type(desc.clone()),
        DexValue::MethodType(desc) => JvmValue::MethodType(desc.clone()),
        DexValue::MethodHandle(handle) => match convert_handle(handle) {
            Ok(handle) => JvmValue::Handle(handle),
            Err(e) => {
                warn!("dropping constant: {}", e);
                return None;
            }
        },
        other => {
            warn!("no class file constant for {:?}", other);
            return None;
        }
    };
    Some(converted)
}

/// Annotation element values convert structurally. Values with no class
/// file counterpart are dropped, inside arrays only the offending element.
pub fn convert_annotation_value(value: &DexValue, visible: bool) -> Option<AnnotationValue> {
    match value {
        DexValue::Enum(field) => Some(AnnotationValue::Enum {
            descriptor: field.descriptor.clone(),
            name: field.name.clone(),
        }),
        DexValue::Array(values) => Some(AnnotationValue::Array(
            values.iter().filter_map(|v| convert_annotation_value(v, visible)).collect(),
        )),
        DexValue::Annotation(annotation) => Some(AnnotationValue::Annotation(convert_annotation(annotation, visible))),
        DexValue::Method(method) => {
            warn!("dropping method reference {} from annotation", method);
            None
        }
        DexValue::Null | DexValue::Field(_) | DexValue::MethodType(_) | DexValue::MethodHandle(_) => {
            warn!("dropping annotation value {:?}", value);
            None
        }
        other => convert_constant(other).map(AnnotationValue::Const),
    }
}

pub fn convert_annotation(annotation: &DexAnnotation, visible: bool) -> JvmAnnotation {
    JvmAnnotation {
        descriptor: annotation.type_desc.clone(),
        visible,
        values: annotation
            .elements
            .iter()
            .filter_map(|e| convert_annotation_value(&e.value, visible).map(|v| (e.name.clone(), v)))
            .collect(),
    }
}

/// `Runtime` annotations become visible, `Build` ones invisible and
/// `System` ones are consumed elsewhere.
pub fn convert_annotations(annotations: &[DexAnnotationNode]) -> Vec<JvmAnnotation> {
    annotations
        .iter()
        .filter_map(|node| match node.visibility {
            Visibility::Runtime => Some(convert_annotation(&node.annotation, true)),
            Visibility::Build => Some(convert_annotation(&node.annotation, false)),
            Visibility::System => None,
        })
        .collect()
}

/// `ConstantValue` of a field: only primitives and strings qualify, coerced
/// to the declared field type.
pub fn convert_field_value(descriptor: &str, value: &DexValue) -> Option<JvmValue> {
    let int_like = match value {
        DexValue::Boolean(b) => Some(*b as i64),
        DexValue::Byte(v) => Some(*v as i64),
        DexValue::Short(v) => Some(*v as i64),
        DexValue::Char(v) => Some(*v as i64),
        DexValue::Int(v) => Some(*v as i64),
        DexValue::Long(v) => Some(*v),
        _ => None,
    };
    match (descriptor, value) {
        ("Z" | "B" | "S" | "C" | "I", _) => int_like.map(|v| JvmValue::Int(v as i32)),
        ("J", _) => int_like.map(JvmValue::Long),
        ("F", DexValue::Float(v)) => Some(JvmValue::Float(*v)),
        ("D", DexValue::Double(v)) => Some(JvmValue::Double(*v)),
        ("Ljava/lang/String;", DexValue::String(s)) => Some(JvmValue::String(s.clone())),
        (_, DexValue::Null) => None,
        (descriptor, value) => {
            warn!("ignoring initial value {:?} of {} field", value, descriptor);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::nodes::{FieldRef, MethodRef};
    use std::collections::HashSet;

    fn member_for(kind: MethodHandleKind) -> MethodHandle {
        if kind.is_field_access() {
            MethodHandle::field(kind, FieldRef::new("La/B;", "f", "I"))
        } else {
            MethodHandle::method(kind, MethodRef::new("La/B;", "m", "(I)V"))
        }
    }

    #[test]
    fn handle_table_is_a_bijection() {
        let mut tags = HashSet::new();
        for kind in MethodHandleKind::ALL {
            let handle = convert_handle(&member_for(kind)).unwrap();
            assert_eq!(handle.owner, "a/B");
            assert_eq!(handle.is_interface, kind == MethodHandleKind::InvokeInterface);
            tags.insert(handle.tag);
        }
        assert_eq!(tags.len(), 9);
        assert!(tags.iter().all(|t| (1..=9).contains(t)));
    }

    #[test]
    fn handle_exact_mapping() {
        let tag = |k| convert_handle(&member_for(k)).unwrap().tag;
        assert_eq!(tag(MethodHandleKind::InstanceGet), H_GETFIELD);
        assert_eq!(tag(MethodHandleKind::StaticPut), H_PUTSTATIC);
        assert_eq!(tag(MethodHandleKind::InvokeConstructor), H_NEWINVOKESPECIAL);
        assert_eq!(tag(MethodHandleKind::InvokeDirect), H_INVOKESPECIAL);
        assert_eq!(tag(MethodHandleKind::InvokeInstance), H_INVOKEVIRTUAL);
    }

    #[test]
    fn handle_errors() {
        let bad = MethodHandle::field(MethodHandleKind::InvokeStatic, FieldRef::new("La/B;", "f", "I"));
        assert!(convert_handle(&bad).is_err());
        let bad = MethodHandle::method(MethodHandleKind::StaticGet, MethodRef::new("La/B;", "m", "()V"));
        assert!(convert_handle(&bad).is_err());
        for code in 9u16..64 {
            assert!(MethodHandleKind::try_from(code).is_err());
        }
        for code in 0u16..9 {
            assert!(MethodHandleKind::try_from(code).is_ok());
        }
    }

    #[test]
    fn annotation_values_drop_method_refs() {
        let value = DexValue::Array(vec![
            DexValue::Type("La/B;".to_string()),
            DexValue::Method(MethodRef::new("La/B;", "m", "()V")),
            DexValue::Enum(FieldRef::new("La/E;", "ONE", "La/E;")),
        ]);
        assert_eq!(
            convert_annotation_value(&value, true),
            Some(AnnotationValue::Array(vec![
                AnnotationValue::Const(JvmValue::Type("La/B;".to_string())),
                AnnotationValue::Enum { descriptor: "La/E;".to_string(), name: "ONE".to_string() },
            ]))
        );
    }

    #[test]
    fn visibility_mapping() {
        let nodes = vec![
            DexAnnotationNode::new(Visibility::Runtime, DexAnnotation::new("La/R;")),
            DexAnnotationNode::new(Visibility::Build, DexAnnotation::new("La/B;")),
            DexAnnotationNode::system(DexAnnotation::new("Ldalvik/annotation/Signature;")),
        ];
        let converted = convert_annotations(&nodes);
        assert_eq!(converted.len(), 2);
        assert!(converted[0].visible);
        assert!(!converted[1].visible);
    }

    #[test]
    fn field_values() {
        assert_eq!(convert_field_value("Z", &DexValue::Boolean(true)), Some(JvmValue::Int(1)));
        assert_eq!(convert_field_value("J", &DexValue::Int(-1)), Some(JvmValue::Long(-1)));
        assert_eq!(convert_field_value("C", &DexValue::Char(65)), Some(JvmValue::Int(65)));
        assert_eq!(convert_field_value("Ljava/lang/String;", &DexValue::Null), None);
        assert_eq!(convert_field_value("La/B;", &DexValue::Type("La/B;".to_string())), None);
    }
}
