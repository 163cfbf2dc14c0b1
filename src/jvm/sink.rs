//! The output boundary. The translator only talks to these traits; turning
//! the calls into class file bytes is left to the implementor.

use serde::{Deserialize, Serialize};

use crate::jvm::insn::{CodeBody, JvmInsn, TryCatchBlock};
use crate::jvm::{AnnotationValue, JvmAnnotation, JvmValue};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassHeader {
    pub version: u32,
    pub access: u32,
    /// Internal name.
    pub name: String,
    pub signature: Option<String>,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub source_file: Option<String>,
}

/// One entry of the `InnerClasses` attribute.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InnerClassRecord {
    pub name: String,
    pub outer_name: Option<String>,
    pub inner_name: Option<String>,
    pub access: u32,
}

/// The `EnclosingMethod` attribute.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OuterClassRef {
    pub owner: String,
    pub method_name: Option<String>,
    pub method_descriptor: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDecl {
    pub access: u32,
    pub name: String,
    pub descriptor: String,
    pub signature: Option<String>,
    pub value: Option<JvmValue>,
    pub annotations: Vec<JvmAnnotation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodHeader {
    pub access: u32,
    pub name: String,
    pub descriptor: String,
    pub signature: Option<String>,
    /// Internal names of declared exceptions.
    pub exceptions: Vec<String>,
}

pub trait ClassSink {
    fn open(&mut self, header: ClassHeader);
    fn add_inner_class(&mut self, record: InnerClassRecord);
    fn add_outer_class(&mut self, outer: OuterClassRef);
    fn add_annotation(&mut self, annotation: JvmAnnotation);
    fn add_field(&mut self, field: FieldDecl);
    /// `None` skips the method.
    fn add_method(&mut self, header: MethodHeader) -> Option<Box<dyn MethodSink + '_>>;
    fn close(&mut self);
}

pub trait MethodSink {
    fn add_annotation_default(&mut self, value: AnnotationValue);
    fn add_annotation(&mut self, annotation: JvmAnnotation);
    fn add_parameter_annotation(&mut self, parameter: usize, annotation: JvmAnnotation);

    fn begin_code(&mut self);
    /// Called for every handler before any of its labels is emitted.
    fn add_try_catch(&mut self, block: TryCatchBlock);
    fn add_insn(&mut self, insn: JvmInsn);
    /// Stack and local sizes are computed by the sink.
    fn end_code(&mut self);

    fn add_code(&mut self, code: CodeBody) {
        self.begin_code();
        for block in code.try_catch_blocks {
            self.add_try_catch(block);
        }
        for insn in code.instructions {
            self.add_insn(insn);
        }
        self.end_code();
    }

    fn close(&mut self);
}

/// Maps a class's internal name to the sink receiving it, `None` skips it.
pub trait ClassSinkFactory {
    fn create(&mut self, name: &str) -> Option<Box<dyn ClassSink + '_>>;
}

impl<T: ClassSink + ?Sized> ClassSink for &mut T {
    fn open(&mut self, header: ClassHeader) {
        (**self).open(header)
    }

    fn add_inner_class(&mut self, record: InnerClassRecord) {
        (**self).add_inner_class(record)
    }

    fn add_outer_class(&mut self, outer: OuterClassRef) {
        (**self).add_outer_class(outer)
    }

    fn add_annotation(&mut self, annotation: JvmAnnotation) {
        (**self).add_annotation(annotation)
    }

    fn add_field(&mut self, field: FieldDecl) {
        (**self).add_field(field)
    }

    fn add_method(&mut self, header: MethodHeader) -> Option<Box<dyn MethodSink + '_>> {
        (**self).add_method(header)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

impl<T: MethodSink + ?Sized> MethodSink for &mut T {
    fn add_annotation_default(&mut self, value: AnnotationValue) {
        (**self).add_annotation_default(value)
    }

    fn add_annotation(&mut self, annotation: JvmAnnotation) {
        (**self).add_annotation(annotation)
    }

    fn add_parameter_annotation(&mut self, parameter: usize, annotation: JvmAnnotation) {
        (**self).add_parameter_annotation(parameter, annotation)
    }

    fn begin_code(&mut self) {
        (**self).begin_code()
    }

    fn add_try_catch(&mut self, block: TryCatchBlock) {
        (**self).add_try_catch(block)
    }

    fn add_insn(&mut self, insn: JvmInsn) {
        (**self).add_insn(insn)
    }

    fn end_code(&mut self) {
        (**self).end_code()
    }

    fn close(&mut self) {
        (**self).close()
    }
}
