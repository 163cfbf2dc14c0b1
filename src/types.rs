/* Type descriptors and generic signatures. */
/* Both are stored in the JNI form e.g. Ljava/util/List<Ljava/lang/String;>; */

use nom::branch::alt;
use nom::bytes::complete::take_while1;
use nom::character::complete::{anychar, char};
use nom::combinator::{all_consuming, map, map_opt, opt, recognize, value};
use nom::multi::{many0, many1, separated_list1};
use nom::sequence::{delimited, pair, preceded};
use nom::IResult;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ConvertError;

/// Represents a Java class type with optional type arguments and inner
/// class suffixes
///
/// # Examples
///
/// ```
/// use dex2jvm::types::TypeSignature;
///
/// let t = TypeSignature::from_jni("Ljava/util/Map<TK;+Ljava/lang/Number;>.Entry;").unwrap();
/// assert_eq!(t.to_jni(), "Ljava/util/Map<TK;+Ljava/lang/Number;>.Entry;");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectIdentifier {
    pub class_name: String,
    pub type_arguments: Option<Vec<TypeArgument>>,
    pub suffix: Vec<InnerClassType>,
}

/// `.Inner<...>` part of a parameterized inner class type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InnerClassType {
    pub name: String,
    pub type_arguments: Option<Vec<TypeArgument>>,
}

impl ObjectIdentifier {
    pub fn from_java_type(t: &str) -> ObjectIdentifier {
        ObjectIdentifier {
            class_name: t.replace('.', "/"),
            type_arguments: None,
            suffix: Vec::new(),
        }
    }

    pub fn as_jni_type(&self) -> String {
        let mut s = "L".to_string();
        s.push_str(&self.class_name);
        push_type_arguments(&mut s, &self.type_arguments);
        for inner in &self.suffix {
            s.push('.');
            s.push_str(&inner.name);
            push_type_arguments(&mut s, &inner.type_arguments);
        }
        s.push(';');
        s
    }

    pub fn as_java_type(&self) -> String {
        self.class_name.replace('/', ".")
    }

    fn is_plain(&self) -> bool {
        self.type_arguments.is_none() && self.suffix.is_empty()
    }
}

impl fmt::Display for ObjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_jni_type())
    }
}

fn push_type_arguments(s: &mut String, args: &Option<Vec<TypeArgument>>) {
    if let Some(v) = args {
        s.push('<');
        for t in v {
            s.push_str(&t.to_jni());
        }
        s.push('>');
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeArgument {
    /// `*`
    Any,
    /// `+T`
    Extends(TypeSignature),
    /// `-T`
    Super(TypeSignature),
    Exact(TypeSignature),
}

impl TypeArgument {
    pub fn to_jni(&self) -> String {
        match self {
            TypeArgument::Any => "*".to_string(),
            TypeArgument::Extends(t) => format!("+{}", t.to_jni()),
            TypeArgument::Super(t) => format!("-{}", t.to_jni()),
            TypeArgument::Exact(t) => t.to_jni(),
        }
    }
}

/// Represents a Java type: array, object, type variable or primitive type
///
/// # Examples
///
/// ```
///  use dex2jvm::types::TypeSignature;
///
///  let t = TypeSignature::Bool;
///  assert_eq!(t.to_jni(), "Z");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TypeSignature {
    Array(Box<TypeSignature>),
    Object(ObjectIdentifier),
    Int,
    Bool,
    Byte,
    Char,
    Short,
    Long,
    Float,
    Double,
    Void,
    TypeVariableSignature(String),
}

impl fmt::Display for TypeSignature {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.to_jni())
    }
}

impl TypeSignature {
    pub fn from_jni(s: &str) -> Result<TypeSignature, ConvertError> {
        complete(s, java_type_or_void)
    }

    pub fn to_jni(&self) -> String {
        match self {
            TypeSignature::Array(a) => "[".to_string() + &a.to_jni(),
            TypeSignature::Bool => "Z".to_string(),
            TypeSignature::Byte => "B".to_string(),
            TypeSignature::Char => "C".to_string(),
            TypeSignature::Short => "S".to_string(),
            TypeSignature::Int => "I".to_string(),
            TypeSignature::Long => "J".to_string(),
            TypeSignature::Float => "F".to_string(),
            TypeSignature::Double => "D".to_string(),
            TypeSignature::Object(o) => o.as_jni_type(),
            TypeSignature::Void => "V".to_string(),
            TypeSignature::TypeVariableSignature(i) => format!("T{i};"),
        }
    }

    pub fn to_java(&self) -> String {
        match self {
            TypeSignature::Array(a) => format!("{}[]", a.to_java()),
            TypeSignature::Bool => "boolean".to_string(),
            TypeSignature::Byte => "byte".to_string(),
            TypeSignature::Char => "char".to_string(),
            TypeSignature::Short => "short".to_string(),
            TypeSignature::Int => "int".to_string(),
            TypeSignature::Long => "long".to_string(),
            TypeSignature::Float => "float".to_string(),
            TypeSignature::Double => "double".to_string(),
            TypeSignature::Object(o) => o.as_java_type(),
            TypeSignature::Void => "void".to_string(),
            TypeSignature::TypeVariableSignature(i) => i.clone(),
        }
    }

    /// Occupies two registers / local slots.
    pub fn is_wide(&self) -> bool {
        matches!(self, TypeSignature::Long | TypeSignature::Double)
    }

    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            TypeSignature::Array(_) | TypeSignature::Object(_) | TypeSignature::TypeVariableSignature(_)
        )
    }

    /// A plain descriptor carries no generic information.
    pub fn is_descriptor(&self) -> bool {
        match self {
            TypeSignature::Array(a) => a.is_descriptor(),
            TypeSignature::Object(o) => o.is_plain(),
            TypeSignature::TypeVariableSignature(_) => false,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeParameter {
    pub name: String,
    pub class_bound: Option<TypeSignature>,
    pub interface_bounds: Vec<TypeSignature>,
}

impl TypeParameter {
    pub fn to_jni(&self) -> String {
        let mut s = format!("{}:", self.name);
        if let Some(bound) = &self.class_bound {
            s.push_str(&bound.to_jni());
        }
        for bound in &self.interface_bounds {
            s.push(':');
            s.push_str(&bound.to_jni());
        }
        s
    }
}

fn push_type_parameters(s: &mut String, params: &[TypeParameter]) {
    if !params.is_empty() {
        s.push('<');
        for p in params {
            s.push_str(&p.to_jni());
        }
        s.push('>');
    }
}

/// Represents a Java method signature consisting of arguments and a return type
///
/// # Examples
///
/// ```
///  use dex2jvm::types::{MethodSignature, TypeSignature};
///
///  let m = MethodSignature::from_jni("([I)V").unwrap();
///  assert_eq!(m.result, TypeSignature::Void);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodSignature {
    pub type_parameters: Vec<TypeParameter>,
    pub args: Vec<TypeSignature>,
    pub result: TypeSignature,
    pub throws: Vec<TypeSignature>,
}

impl MethodSignature {
    pub fn from_jni(s: &str) -> Result<MethodSignature, ConvertError> {
        complete(s, method_signature)
    }

    pub fn to_jni(&self) -> String {
        let mut s = String::new();
        push_type_parameters(&mut s, &self.type_parameters);
        s.push('(');
        for t in &self.args {
            s.push_str(&t.to_jni());
        }
        s.push(')');
        s.push_str(&self.result.to_jni());
        for t in &self.throws {
            s.push('^');
            s.push_str(&t.to_jni());
        }
        s
    }

    /// Number of argument registers, receiver excluded.
    pub fn arg_slots(&self) -> usize {
        self.args.iter().map(|a| if a.is_wide() { 2 } else { 1 }).sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassSignature {
    pub type_parameters: Vec<TypeParameter>,
    pub superclass: ObjectIdentifier,
    pub interfaces: Vec<ObjectIdentifier>,
}

impl ClassSignature {
    pub fn from_jni(s: &str) -> Result<ClassSignature, ConvertError> {
        complete(s, class_signature)
    }

    pub fn to_jni(&self) -> String {
        let mut s = String::new();
        push_type_parameters(&mut s, &self.type_parameters);
        s.push_str(&self.superclass.as_jni_type());
        for i in &self.interfaces {
            s.push_str(&i.as_jni_type());
        }
        s
    }
}

/// Parses a `(...)R` descriptor, rejecting generic constructs.
pub fn parse_method_descriptor(s: &str) -> Result<MethodSignature, ConvertError> {
    let m = MethodSignature::from_jni(s)?;
    if !m.type_parameters.is_empty() || !m.throws.is_empty() || !m.args.iter().all(TypeSignature::is_descriptor) {
        fail!("not a method descriptor: {}", s);
    }
    if !m.result.is_descriptor() {
        fail!("not a method descriptor: {}", s);
    }
    Ok(m)
}

pub fn parse_type_descriptor(s: &str) -> Result<TypeSignature, ConvertError> {
    let t = TypeSignature::from_jni(s)?;
    if !t.is_descriptor() {
        fail!("not a type descriptor: {}", s);
    }
    Ok(t)
}

/// Validates a generic class signature: it must parse and print back unchanged.
pub fn is_valid_class_signature(s: &str) -> bool {
    ClassSignature::from_jni(s).map(|c| c.to_jni() == s).unwrap_or(false)
}

pub fn is_valid_method_signature(s: &str) -> bool {
    MethodSignature::from_jni(s).map(|m| m.to_jni() == s).unwrap_or(false)
}

pub fn is_valid_field_signature(s: &str) -> bool {
    complete(s, java_type).map(|t| t.to_jni() == s).unwrap_or(false)
}

/// `Lcom/a/B;` becomes `com/a/B`; array and primitive descriptors are kept.
pub fn internal_name(desc: &str) -> String {
    match desc.strip_prefix('L').and_then(|d| d.strip_suffix(';')) {
        Some(name) => name.to_string(),
        None => desc.to_string(),
    }
}

/// Inverse of [`internal_name`] for class names.
pub fn descriptor_of(internal: &str) -> String {
    if internal.starts_with('[') {
        internal.to_string()
    } else {
        format!("L{};", internal)
    }
}

fn complete<'a, T, F>(s: &'a str, parser: F) -> Result<T, ConvertError>
where
    F: FnMut(&'a str) -> IResult<&'a str, T>,
{
    match all_consuming(parser)(s) {
        Ok((_, t)) => Ok(t),
        Err(_) => Err(err!("malformed signature {:?}", s)),
    }
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| !matches!(c, '.' | ';' | '[' | '/' | '<' | '>' | ':'))(input)
}

fn type_arguments(input: &str) -> IResult<&str, Vec<TypeArgument>> {
    delimited(char('<'), many1(type_argument), char('>'))(input)
}

fn type_argument(input: &str) -> IResult<&str, TypeArgument> {
    alt((
        value(TypeArgument::Any, char('*')),
        map(preceded(char('+'), reference_type), TypeArgument::Extends),
        map(preceded(char('-'), reference_type), TypeArgument::Super),
        map(reference_type, TypeArgument::Exact),
    ))(input)
}

fn inner_class_type(input: &str) -> IResult<&str, InnerClassType> {
    map(preceded(char('.'), pair(identifier, opt(type_arguments))), |(name, type_arguments)| InnerClassType {
        name: name.to_string(),
        type_arguments,
    })(input)
}

fn class_type(input: &str) -> IResult<&str, ObjectIdentifier> {
    let (input, _) = char('L')(input)?;
    let (input, class_name) = recognize(separated_list1(char('/'), identifier))(input)?;
    let (input, type_arguments) = opt(type_arguments)(input)?;
    let (input, suffix) = many0(inner_class_type)(input)?;
    let (input, _) = char(';')(input)?;
    Ok((
        input,
        ObjectIdentifier {
            class_name: class_name.to_string(),
            type_arguments,
            suffix,
        },
    ))
}

fn type_variable(input: &str) -> IResult<&str, TypeSignature> {
    map(delimited(char('T'), identifier, char(';')), |name: &str| {
        TypeSignature::TypeVariableSignature(name.to_string())
    })(input)
}

fn array_type(input: &str) -> IResult<&str, TypeSignature> {
    map(preceded(char('['), java_type), |t| TypeSignature::Array(Box::new(t)))(input)
}

fn reference_type(input: &str) -> IResult<&str, TypeSignature> {
    alt((map(class_type, TypeSignature::Object), type_variable, array_type))(input)
}

fn base_type(input: &str) -> IResult<&str, TypeSignature> {
    map_opt(anychar, |c| match c {
        'Z' => Some(TypeSignature::Bool),
        'B' => Some(TypeSignature::Byte),
        'C' => Some(TypeSignature::Char),
        'S' => Some(TypeSignature::Short),
        'I' => Some(TypeSignature::Int),
        'J' => Some(TypeSignature::Long),
        'F' => Some(TypeSignature::Float),
        'D' => Some(TypeSignature::Double),
        _ => None,
    })(input)
}

fn java_type(input: &str) -> IResult<&str, TypeSignature> {
    alt((reference_type, base_type))(input)
}

fn java_type_or_void(input: &str) -> IResult<&str, TypeSignature> {
    alt((java_type, value(TypeSignature::Void, char('V'))))(input)
}

fn type_parameter(input: &str) -> IResult<&str, TypeParameter> {
    let (input, name) = identifier(input)?;
    let (input, _) = char(':')(input)?;
    let (input, class_bound) = opt(reference_type)(input)?;
    let (input, interface_bounds) = many0(preceded(char(':'), reference_type))(input)?;
    Ok((
        input,
        TypeParameter {
            name: name.to_string(),
            class_bound,
            interface_bounds,
        },
    ))
}

fn type_parameters(input: &str) -> IResult<&str, Vec<TypeParameter>> {
    map(opt(delimited(char('<'), many1(type_parameter), char('>'))), Option::unwrap_or_default)(input)
}

fn method_signature(input: &str) -> IResult<&str, MethodSignature> {
    let (input, type_parameters) = type_parameters(input)?;
    let (input, args) = delimited(char('('), many0(java_type), char(')'))(input)?;
    let (input, result) = java_type_or_void(input)?;
    let (input, throws) = many0(preceded(char('^'), alt((map(class_type, TypeSignature::Object), type_variable))))(input)?;
    Ok((
        input,
        MethodSignature {
            type_parameters,
            args,
            result,
            throws,
        },
    ))
}

fn class_signature(input: &str) -> IResult<&str, ClassSignature> {
    let (input, type_parameters) = type_parameters(input)?;
    let (input, superclass) = class_type(input)?;
    let (input, interfaces) = many0(class_type)(input)?;
    Ok((
        input,
        ClassSignature {
            type_parameters,
            superclass,
            interfaces,
        },
    ))
}
