//! Source side: the Android class model consumed by the translator.

pub mod annotations;
pub mod instructions;
pub mod nodes;

pub use nodes::*;

// Access flags as used in dex class, field and method definitions
pub const ACC_PUBLIC: u32 = 0x1;
pub const ACC_PRIVATE: u32 = 0x2;
pub const ACC_PROTECTED: u32 = 0x4;
pub const ACC_STATIC: u32 = 0x8;
pub const ACC_FINAL: u32 = 0x10;
pub const ACC_SYNCHRONIZED: u32 = 0x20;
pub const ACC_VOLATILE: u32 = 0x40;
pub const ACC_BRIDGE: u32 = 0x40;
pub const ACC_TRANSIENT: u32 = 0x80;
pub const ACC_VARARGS: u32 = 0x80;
pub const ACC_NATIVE: u32 = 0x100;
pub const ACC_INTERFACE: u32 = 0x200;
pub const ACC_ABSTRACT: u32 = 0x400;
pub const ACC_STRICT: u32 = 0x800;
pub const ACC_SYNTHETIC: u32 = 0x1000;
pub const ACC_ANNOTATION: u32 = 0x2000;
pub const ACC_ENUM: u32 = 0x4000;
pub const ACC_CONSTRUCTOR: u32 = 0x10000;
pub const ACC_DECLARED_SYNCHRONIZED: u32 = 0x20000;

// Dex format versions
pub const DEX_035: u32 = 35;
pub const DEX_036: u32 = 36;
pub const DEX_037: u32 = 37;
pub const DEX_038: u32 = 38;
pub const DEX_039: u32 = 39;
pub const DEX_040: u32 = 40;
pub const DEX_041: u32 = 41;

// System annotations
pub const ANNOTATION_DEFAULT: &str = "Ldalvik/annotation/AnnotationDefault;";
pub const ANNOTATION_ENCLOSING_CLASS: &str = "Ldalvik/annotation/EnclosingClass;";
pub const ANNOTATION_ENCLOSING_METHOD: &str = "Ldalvik/annotation/EnclosingMethod;";
pub const ANNOTATION_INNER_CLASS: &str = "Ldalvik/annotation/InnerClass;";
pub const ANNOTATION_MEMBER_CLASSES: &str = "Ldalvik/annotation/MemberClasses;";
pub const ANNOTATION_SIGNATURE: &str = "Ldalvik/annotation/Signature;";
pub const ANNOTATION_THROWS: &str = "Ldalvik/annotation/Throws;";
