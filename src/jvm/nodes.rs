//! In-memory sinks that record everything they receive.
//!
//! Useful for callers that post-process classes before writing them out, and
//! for asserting on translator output.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::jvm::insn::{CodeBody, JvmInsn, TryCatchBlock};
use crate::jvm::sink::{
    ClassHeader, ClassSink, ClassSinkFactory, FieldDecl, InnerClassRecord, MethodHeader, MethodSink, OuterClassRef,
};
use crate::jvm::{AnnotationValue, JvmAnnotation};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassNode {
    pub header: Option<ClassHeader>,
    pub inner_classes: Vec<InnerClassRecord>,
    pub outer_class: Option<OuterClassRef>,
    pub annotations: Vec<JvmAnnotation>,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<MethodNode>,
    pub closed: bool,
}

impl ClassNode {
    pub fn name(&self) -> Option<&str> {
        self.header.as_ref().map(|h| h.name.as_str())
    }

    pub fn field(&self, name: &str) -> Option<&FieldDecl> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn method(&self, name: &str) -> Option<&MethodNode> {
        self.methods.iter().find(|m| m.header.name == name)
    }

    pub fn inner_class(&self, name: &str) -> Option<&InnerClassRecord> {
        self.inner_classes.iter().find(|r| r.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodNode {
    pub header: MethodHeader,
    pub annotation_default: Option<AnnotationValue>,
    pub annotations: Vec<JvmAnnotation>,
    pub parameter_annotations: Vec<(usize, JvmAnnotation)>,
    pub code: Option<CodeBody>,
    pub closed: bool,
}

impl MethodNode {
    pub fn new(header: MethodHeader) -> Self {
        MethodNode {
            header,
            annotation_default: None,
            annotations: Vec::new(),
            parameter_annotations: Vec::new(),
            code: None,
            closed: false,
        }
    }

    /// Opcodes of the body with labels left out.
    pub fn opcodes(&self) -> Vec<u8> {
        self.code.as_ref().map(|c| c.opcodes()).unwrap_or_default()
    }
}

impl ClassSink for ClassNode {
    fn open(&mut self, header: ClassHeader) {
        self.header = Some(header);
    }

    fn add_inner_class(&mut self, record: InnerClassRecord) {
        self.inner_classes.push(record);
    }

    fn add_outer_class(&mut self, outer: OuterClassRef) {
        self.outer_class = Some(outer);
    }

    fn add_annotation(&mut self, annotation: JvmAnnotation) {
        self.annotations.push(annotation);
    }

    fn add_field(&mut self, field: FieldDecl) {
        self.fields.push(field);
    }

    fn add_method(&mut self, header: MethodHeader) -> Option<Box<dyn MethodSink + '_>> {
        self.methods.push(MethodNode::new(header));
        let method = self.methods.last_mut()?;
        Some(Box::new(method))
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

impl MethodSink for MethodNode {
    fn add_annotation_default(&mut self, value: AnnotationValue) {
        self.annotation_default = Some(value);
    }

    fn add_annotation(&mut self, annotation: JvmAnnotation) {
        self.annotations.push(annotation);
    }

    fn add_parameter_annotation(&mut self, parameter: usize, annotation: JvmAnnotation) {
        self.parameter_annotations.push((parameter, annotation));
    }

    fn begin_code(&mut self) {
        self.code = Some(CodeBody::default());
    }

    fn add_try_catch(&mut self, block: TryCatchBlock) {
        self.code.get_or_insert_with(CodeBody::default).try_catch_blocks.push(block);
    }

    fn add_insn(&mut self, insn: JvmInsn) {
        self.code.get_or_insert_with(CodeBody::default).instructions.push(insn);
    }

    fn end_code(&mut self) {}

    fn close(&mut self) {
        self.closed = true;
    }
}

/// Factory that keeps every class it hands out, in request order.
#[derive(Debug, Default)]
pub struct ClassNodeCollector {
    pub classes: Vec<ClassNode>,
    skip: HashSet<String>,
}

impl ClassNodeCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classes named here are refused.
    pub fn skipping<I: IntoIterator<Item = S>, S: Into<String>>(names: I) -> Self {
        ClassNodeCollector {
            classes: Vec::new(),
            skip: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ClassNode> {
        self.classes.iter().find(|c| c.name() == Some(name))
    }
}

impl ClassSinkFactory for ClassNodeCollector {
    fn create(&mut self, name: &str) -> Option<Box<dyn ClassSink + '_>> {
        if self.skip.contains(name) {
            return None;
        }
        self.classes.push(ClassNode::default());
        let class = self.classes.last_mut()?;
        Some(Box::new(class))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jvm::insn::opcodes::RETURN;

    fn header(name: &str) -> MethodHeader {
        MethodHeader {
            access: 1,
            name: name.to_string(),
            descriptor: "()V".to_string(),
            signature: None,
            exceptions: vec![],
        }
    }

    #[test]
    fn records_through_boxed_sinks() {
        let mut collector = ClassNodeCollector::skipping(["a/Skipped"]);
        assert!(collector.create("a/Skipped").is_none());
        {
            let mut class = collector.create("a/Kept").unwrap();
            class.open(ClassHeader {
                version: 50,
                access: 0x21,
                name: "a/Kept".to_string(),
                signature: None,
                super_name: Some("java/lang/Object".to_string()),
                interfaces: vec![],
                source_file: None,
            });
            {
                let mut method = class.add_method(header("run")).unwrap();
                method.add_code(CodeBody {
                    instructions: vec![JvmInsn::Insn(RETURN)],
                    try_catch_blocks: vec![],
                });
                method.close();
            }
            class.close();
        }
        let class = collector.get("a/Kept").unwrap();
        assert!(class.closed);
        let run = class.method("run").unwrap();
        assert!(run.closed);
        assert_eq!(run.opcodes(), vec![RETURN]);
        assert_eq!(collector.classes.len(), 1);
    }
}
