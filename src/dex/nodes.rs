//! In-memory model of the Android classes handed to the translator.
//!
//! Type names are kept in descriptor form (`Lcom/example/Foo;`) exactly as
//! they appear in a dex file; the translator converts them to JVM internal
//! names on the way out.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::dex::instructions::{DexInstruction, Label};
use crate::error::ConvertError;
use crate::types::{parse_method_descriptor, MethodSignature};

/// Reference to a field as stored in the dex field table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FieldRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

impl FieldRef {
    pub fn new(owner: &str, name: &str, descriptor: &str) -> Self {
        FieldRef {
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        }
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}:{}", self.owner, self.name, self.descriptor)
    }
}

/// Reference to a method as stored in the dex method table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodRef {
    pub owner: String,
    pub name: String,
    pub descriptor: String,
}

impl MethodRef {
    pub fn new(owner: &str, name: &str, descriptor: &str) -> Self {
        MethodRef {
            owner: owner.to_string(),
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        }
    }

    /// Parsed parameter and return types of the descriptor.
    pub fn signature(&self) -> Result<MethodSignature, ConvertError> {
        parse_method_descriptor(&self.descriptor)
    }
}

impl fmt::Display for MethodRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}{}", self.owner, self.name, self.descriptor)
    }
}

/// The nine method handle kinds defined by the dex format.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MethodHandleKind {
    StaticPut,
    StaticGet,
    InstancePut,
    InstanceGet,
    InvokeStatic,
    InvokeInstance,
    InvokeConstructor,
    InvokeDirect,
    InvokeInterface,
}

impl MethodHandleKind {
    pub const ALL: [MethodHandleKind; 9] = [
        MethodHandleKind::StaticPut,
        MethodHandleKind::StaticGet,
        MethodHandleKind::InstancePut,
        MethodHandleKind::InstanceGet,
        MethodHandleKind::InvokeStatic,
        MethodHandleKind::InvokeInstance,
        MethodHandleKind::InvokeConstructor,
        MethodHandleKind::InvokeDirect,
        MethodHandleKind::InvokeInterface,
    ];

    pub fn is_field_access(&self) -> bool {
        matches!(
            self,
            MethodHandleKind::StaticPut
                | MethodHandleKind::StaticGet
                | MethodHandleKind::InstancePut
                | MethodHandleKind::InstanceGet
        )
    }
}

/// Raw `method_handle_type` codes of `method_handle_item`.
impl TryFrom<u16> for MethodHandleKind {
    type Error = ConvertError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(MethodHandleKind::StaticPut),
            0x01 => Ok(MethodHandleKind::StaticGet),
            0x02 => Ok(MethodHandleKind::InstancePut),
            0x03 => Ok(MethodHandleKind::InstanceGet),
            0x04 => Ok(MethodHandleKind::InvokeStatic),
            0x05 => Ok(MethodHandleKind::InvokeInstance),
            0x06 => Ok(MethodHandleKind::InvokeConstructor),
            0x07 => Ok(MethodHandleKind::InvokeDirect),
            0x08 => Ok(MethodHandleKind::InvokeInterface),
            _ => Err(err!("unknown method handle type 0x{:02x}", value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberRef {
    Field(FieldRef),
    Method(MethodRef),
}

impl fmt::Display for MemberRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberRef::Field(field) => field.fmt(f),
            MemberRef::Method(method) => method.fmt(f),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodHandle {
    pub kind: MethodHandleKind,
    pub member: MemberRef,
}

impl MethodHandle {
    pub fn method(kind: MethodHandleKind, method: MethodRef) -> Self {
        MethodHandle { kind, member: MemberRef::Method(method) }
    }

    pub fn field(kind: MethodHandleKind, field: FieldRef) -> Self {
        MethodHandle { kind, member: MemberRef::Field(field) }
    }
}

/// Call site referenced by `invoke-custom`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSite {
    pub name: String,
    pub descriptor: String,
    pub bootstrap: MethodHandle,
    pub arguments: Vec<DexValue>,
}

/// An encoded value: annotation elements, static field initialisers and
/// bootstrap arguments all share this shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DexValue {
    Byte(i8),
    Short(i16),
    Char(u16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Boolean(bool),
    String(String),
    Type(String),
    Field(FieldRef),
    Method(MethodRef),
    Enum(FieldRef),
    MethodType(String),
    MethodHandle(MethodHandle),
    Array(Vec<DexValue>),
    Annotation(DexAnnotation),
    Null,
}

impl DexValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            DexValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_type(&self) -> Option<&str> {
        match self {
            DexValue::Type(t) => Some(t),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            DexValue::Int(i) => Some(*i),
            DexValue::Short(s) => Some(*s as i32),
            DexValue::Byte(b) => Some(*b as i32),
            DexValue::Char(c) => Some(*c as i32),
            _ => None,
        }
    }
}

/// Retention of an annotation in the dex encoding.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Visibility {
    Build,
    Runtime,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DexAnnotationElement {
    pub name: String,
    pub value: DexValue,
}

/// Annotation body: type plus named elements.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DexAnnotation {
    pub type_desc: String,
    pub elements: Vec<DexAnnotationElement>,
}

impl DexAnnotation {
    pub fn new(type_desc: &str) -> Self {
        DexAnnotation { type_desc: type_desc.to_string(), elements: Vec::new() }
    }

    pub fn with_element(mut self, name: &str, value: DexValue) -> Self {
        self.elements.push(DexAnnotationElement { name: name.to_string(), value });
        self
    }

    pub fn element(&self, name: &str) -> Option<&DexValue> {
        self.elements.iter().find(|e| e.name == name).map(|e| &e.value)
    }
}

/// An annotation attached to a class, field, method or parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DexAnnotationNode {
    pub visibility: Visibility,
    pub annotation: DexAnnotation,
}

impl DexAnnotationNode {
    pub fn new(visibility: Visibility, annotation: DexAnnotation) -> Self {
        DexAnnotationNode { visibility, annotation }
    }

    pub fn system(annotation: DexAnnotation) -> Self {
        DexAnnotationNode { visibility: Visibility::System, annotation }
    }

    pub fn type_desc(&self) -> &str {
        &self.annotation.type_desc
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DexCatchHandler {
    /// `None` catches everything.
    pub catch_type: Option<String>,
    pub handler: Label,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DexTryCatch {
    pub start: Label,
    pub end: Label,
    pub handlers: Vec<DexCatchHandler>,
}

/// A method body in register form.
///
/// `instructions` interleaves `DexInstruction::Label` markers with real
/// instructions; branch targets and try ranges refer to those markers.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DexCodeNode {
    pub registers: u16,
    pub instructions: Vec<DexInstruction>,
    pub try_catches: Vec<DexTryCatch>,
}

impl DexCodeNode {
    pub fn new(registers: u16, instructions: Vec<DexInstruction>) -> Self {
        DexCodeNode { registers, instructions, try_catches: Vec::new() }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DexFieldNode {
    pub access: u32,
    pub name: String,
    pub descriptor: String,
    pub initial_value: Option<DexValue>,
    pub annotations: Vec<DexAnnotationNode>,
}

impl DexFieldNode {
    pub fn new(access: u32, name: &str, descriptor: &str) -> Self {
        DexFieldNode {
            access,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
            initial_value: None,
            annotations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DexMethodNode {
    pub access: u32,
    pub method: MethodRef,
    pub annotations: Vec<DexAnnotationNode>,
    /// Positional, one list per declared parameter.
    pub parameter_annotations: Vec<Vec<DexAnnotationNode>>,
    pub code: Option<DexCodeNode>,
}

impl DexMethodNode {
    pub fn new(access: u32, method: MethodRef) -> Self {
        DexMethodNode {
            access,
            method,
            annotations: Vec::new(),
            parameter_annotations: Vec::new(),
            code: None,
        }
    }

    pub fn with_code(mut self, code: DexCodeNode) -> Self {
        self.code = Some(code);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DexClassNode {
    pub access: u32,
    pub name: String,
    pub super_class: Option<String>,
    pub interfaces: Vec<String>,
    pub source_file: Option<String>,
    pub annotations: Vec<DexAnnotationNode>,
    pub fields: Vec<DexFieldNode>,
    pub methods: Vec<DexMethodNode>,
}

impl DexClassNode {
    pub fn new(access: u32, name: &str, super_class: Option<&str>) -> Self {
        DexClassNode {
            access,
            name: name.to_string(),
            super_class: super_class.map(str::to_string),
            interfaces: Vec::new(),
            source_file: None,
            annotations: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
        }
    }

    pub fn system_annotation(&self, type_desc: &str) -> Option<&DexAnnotation> {
        self.annotations
            .iter()
            .find(|a| a.visibility == Visibility::System && a.type_desc() == type_desc)
            .map(|a| &a.annotation)
    }
}

/// A whole program: every class of one or more dex files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DexFileNode {
    /// Numeric dex format version, `35` for `dex\n035\0`.
    pub dex_version: u32,
    pub classes: Vec<DexClassNode>,
}

impl DexFileNode {
    pub fn new(dex_version: u32) -> Self {
        DexFileNode { dex_version, classes: Vec::new() }
    }

    pub fn with_classes(mut self, classes: Vec<DexClassNode>) -> Self {
        self.classes.extend(classes);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_kind_codes() {
        for (code, kind) in MethodHandleKind::ALL.iter().enumerate() {
            assert_eq!(MethodHandleKind::try_from(code as u16), Ok(*kind));
        }
        let e = MethodHandleKind::try_from(9).unwrap_err();
        assert_eq!(e.to_string(), "unknown method handle type 0x09");
    }

    #[test]
    fn system_annotation_lookup_ignores_runtime() {
        let mut class = DexClassNode::new(0x1, "La/B;", Some("Ljava/lang/Object;"));
        class.annotations.push(DexAnnotationNode::new(
            Visibility::Runtime,
            DexAnnotation::new("Ldalvik/annotation/Signature;"),
        ));
        assert!(class.system_annotation("Ldalvik/annotation/Signature;").is_none());
        class.annotations.push(DexAnnotationNode::system(
            DexAnnotation::new("Ldalvik/annotation/Signature;").with_element("value", DexValue::Null),
        ));
        let found = class.system_annotation("Ldalvik/annotation/Signature;").unwrap();
        assert_eq!(found.element("value"), Some(&DexValue::Null));
    }
}
