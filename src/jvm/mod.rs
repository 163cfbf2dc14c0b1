//! Target side: class file values, instructions and the sink contract.

pub mod insn;
pub mod nodes;
pub mod sink;

use once_cell::sync::Lazy;
use rangemap::RangeInclusiveMap;
use serde::{Deserialize, Serialize};

use crate::dex::{DEX_035, DEX_036, DEX_037, DEX_041};

pub const V1_6: u32 = 50;
pub const V1_8: u32 = 52;

// Method handle reference kinds (JVMS 4.4.8)
pub const H_GETFIELD: u8 = 1;
pub const H_GETSTATIC: u8 = 2;
pub const H_PUTFIELD: u8 = 3;
pub const H_PUTSTATIC: u8 = 4;
pub const H_INVOKEVIRTUAL: u8 = 5;
pub const H_INVOKESTATIC: u8 = 6;
pub const H_INVOKESPECIAL: u8 = 7;
pub const H_NEWINVOKESPECIAL: u8 = 8;
pub const H_INVOKEINTERFACE: u8 = 9;

/// Dex versions up to 036 predate default methods and `invoke-custom`;
/// everything from 037 on needs a Java 8 class file.
static CLASS_VERSIONS: Lazy<RangeInclusiveMap<u32, u32>> = Lazy::new(|| {
    let mut map = RangeInclusiveMap::new();
    map.insert(DEX_035..=DEX_036, V1_6);
    map.insert(DEX_037..=DEX_041, V1_8);
    map
});

/// Class file major version for a dex format version.
pub fn class_version_for(dex_version: u32) -> u32 {
    if let Some(version) = CLASS_VERSIONS.get(&dex_version) {
        return *version;
    }
    if dex_version < DEX_035 {
        V1_6
    } else {
        V1_8
    }
}

/// A `CONSTANT_MethodHandle`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Handle {
    pub tag: u8,
    /// Internal name.
    pub owner: String,
    pub name: String,
    pub descriptor: String,
    pub is_interface: bool,
}

/// A loadable constant or annotation primitive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum JvmValue {
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Char(u16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    /// A class literal, in descriptor form.
    Type(String),
    MethodType(String),
    Handle(Handle),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnnotationValue {
    Const(JvmValue),
    Enum { descriptor: String, name: String },
    Annotation(JvmAnnotation),
    Array(Vec<AnnotationValue>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JvmAnnotation {
    pub descriptor: String,
    pub visible: bool,
    pub values: Vec<(String, AnnotationValue)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pinned_versions() {
        assert_eq!(class_version_for(35), V1_6);
        assert_eq!(class_version_for(36), V1_6);
        assert_eq!(class_version_for(37), V1_8);
        assert_eq!(class_version_for(39), V1_8);
        assert_eq!(class_version_for(41), V1_8);
        assert_eq!(class_version_for(13), V1_6);
        assert_eq!(class_version_for(99), V1_8);
    }
}
