//! One class: header, nesting attributes, annotations, fields, methods.

use std::collections::HashSet;

use log::{debug, warn};

use crate::access::{clear_class_access, clear_field_access};
use crate::dex::annotations::signature;
use crate::dex::instructions::DexInstruction;
use crate::dex::nodes::{DexClassNode, DexFieldNode};
use crate::dex::{ACC_FINAL, ACC_STATIC};
use crate::inner_class::InnerClassTreeBuilder;
use crate::ir::pipeline::Pipeline;
use crate::jvm::class_version_for;
use crate::jvm::sink::{ClassHeader, ClassSink, FieldDecl};
use crate::jvm::JvmValue;
use crate::method_emitter::MethodEmitter;
use crate::relation::RelationMap;
use crate::types::{internal_name, is_valid_class_signature, is_valid_field_signature};
use crate::values::{convert_annotations, convert_field_value};
use crate::workaround::{ClassContext, TemplateProvider};
use crate::{ConvertOptions, MemberFailure};

pub struct ClassEmitter<'a> {
    relations: &'a RelationMap,
    options: &'a ConvertOptions,
    pipeline: &'a Pipeline,
    templates: &'a dyn TemplateProvider,
    dex_version: u32,
}

/// Zero value the JVM gives an uninitialised field, `None` for references.
fn zero_value(descriptor: &str) -> Option<JvmValue> {
    match descriptor {
        "Z" | "B" | "S" | "C" | "I" => Some(JvmValue::Int(0)),
        "J" => Some(JvmValue::Long(0)),
        "F" => Some(JvmValue::Float(0.0)),
        "D" => Some(JvmValue::Double(0.0)),
        _ => None,
    }
}

/// Names of the class's own static fields written by `<clinit>`.
fn assigned_in_clinit(class: &DexClassNode) -> HashSet<&str> {
    let mut assigned = HashSet::new();
    let clinit = class.methods.iter().find(|m| m.method.name == "<clinit>");
    let Some(code) = clinit.and_then(|m| m.code.as_ref()) else {
        return assigned;
    };
    for insn in &code.instructions {
        if let DexInstruction::Static { op, field, .. } = insn {
            if !op.is_get() && field.owner == class.name {
                assigned.insert(field.name.as_str());
            }
        }
    }
    assigned
}

impl<'a> ClassEmitter<'a> {
    pub fn new(
        relations: &'a RelationMap,
        options: &'a ConvertOptions,
        pipeline: &'a Pipeline,
        templates: &'a dyn TemplateProvider,
        dex_version: u32,
    ) -> Self {
        ClassEmitter { relations, options, pipeline, templates, dex_version }
    }

    pub fn header(&self, class: &DexClassNode) -> ClassHeader {
        let is_inner = self.relations.lookup(&class.name).map_or(false, |n| n.is_inner());
        let signature = signature(&class.annotations).filter(|sig| {
            let valid = is_valid_class_signature(sig);
            if !valid {
                warn!("dropping invalid signature {} of class {}", sig, class.name);
            }
            valid
        });
        ClassHeader {
            version: class_version_for(self.dex_version),
            access: clear_class_access(is_inner, class.access),
            name: internal_name(&class.name),
            signature,
            super_name: class.super_class.as_deref().map(internal_name),
            interfaces: class.interfaces.iter().map(|i| internal_name(i)).collect(),
            source_file: class.source_file.clone(),
        }
    }

    fn field(&self, field: &DexFieldNode, clinit_writes: &HashSet<&str>) -> FieldDecl {
        let signature = signature(&field.annotations).filter(|sig| {
            let valid = is_valid_field_signature(sig);
            if !valid {
                warn!("dropping invalid signature {} of field {}", sig, field.name);
            }
            valid
        });
        let mut value = field.initial_value.as_ref().and_then(|v| convert_field_value(&field.descriptor, v));
        let static_final = field.access & (ACC_STATIC | ACC_FINAL) == ACC_STATIC | ACC_FINAL;
        if value.is_none() && static_final && self.options.fix_static_final_values && !clinit_writes.contains(field.name.as_str())
        {
            value = zero_value(&field.descriptor);
        }
        FieldDecl {
            access: clear_field_access(&field.name, field.access),
            name: field.name.clone(),
            descriptor: field.descriptor.clone(),
            signature,
            value,
            annotations: convert_annotations(&field.annotations),
        }
    }

    /// Streams `class` into `sink`. Methods whose bodies failed are
    /// returned; everything else in the class is emitted regardless.
    pub fn emit(&self, class: &DexClassNode, sink: &mut dyn ClassSink) -> Vec<MemberFailure> {
        let header = self.header(class);
        let name = header.name.clone();
        sink.open(header);

        let nesting = InnerClassTreeBuilder::new(self.relations).build(class);
        if let Some(outer) = nesting.outer {
            sink.add_outer_class(outer);
        }
        for record in nesting.records {
            sink.add_inner_class(record);
        }
        for annotation in convert_annotations(&class.annotations) {
            sink.add_annotation(annotation);
        }

        let clinit_writes = assigned_in_clinit(class);
        for field in &class.fields {
            sink.add_field(self.field(field, &clinit_writes));
        }

        let mut failures = Vec::new();
        let mut context = ClassContext::new(&name, self.templates);
        let methods = MethodEmitter::new(class, self.options, self.pipeline);
        for method in &class.methods {
            if let Err(error) = methods.emit(method, sink, &mut context) {
                failures.push(MemberFailure {
                    class: class.name.clone(),
                    member: format!("{}{}", method.method.name, method.method.descriptor),
                    error,
                });
            }
        }
        for (header, code) in context.helper_methods() {
            debug!("adding {} to {}", header.name, name);
            if let Some(mut out) = sink.add_method(header) {
                out.add_code(code);
                out.close();
            }
        }

        sink.close();
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::instructions::{ArrayOperation, MoveKind};
    use crate::dex::nodes::{DexAnnotation, DexAnnotationNode, DexCodeNode, DexFileNode, DexMethodNode, DexValue, FieldRef, MethodRef};
    use crate::dex::{ACC_PRIVATE, ACC_PUBLIC, ACC_SYNTHETIC, ANNOTATION_SIGNATURE};
    use crate::jvm::nodes::ClassNode;
    use crate::jvm::V1_8;
    use crate::workaround::BuiltinTemplates;

    fn emit(file: &DexFileNode, options: &ConvertOptions) -> (ClassNode, Vec<MemberFailure>) {
        let relations = RelationMap::build(file);
        let pipeline = Pipeline::standard();
        let emitter = ClassEmitter::new(&relations, options, &pipeline, &BuiltinTemplates, file.dex_version);
        let mut node = ClassNode::default();
        let failures = emitter.emit(&file.classes[0], &mut node);
        (node, failures)
    }

    fn returning_string(name: &str, value: &str) -> DexMethodNode {
        DexMethodNode::new(ACC_PUBLIC | ACC_STATIC, MethodRef::new("La/T;", name, "()Ljava/lang/String;")).with_code(
            DexCodeNode::new(
                1,
                vec![
                    DexInstruction::ConstString { dest: 0, value: value.to_string() },
                    DexInstruction::Return { kind: MoveKind::Object, src: 0 },
                ],
            ),
        )
    }

    #[test]
    fn header_names_and_version() {
        let mut class = DexClassNode::new(ACC_PUBLIC | ACC_FINAL | ACC_SYNTHETIC, "La/T;", Some("La/Base;"));
        class.interfaces.push("Ljava/lang/Runnable;".to_string());
        class.source_file = Some("T.java".to_string());
        class.annotations.push(DexAnnotationNode::system(
            DexAnnotation::new(ANNOTATION_SIGNATURE).with_element("value", DexValue::String("not a signature".to_string())),
        ));
        let (node, failures) = emit(&DexFileNode::new(38).with_classes(vec![class]), &ConvertOptions::default());
        assert!(failures.is_empty());
        let header = node.header.clone().unwrap();
        assert_eq!(header.version, V1_8);
        assert_eq!(header.access, ACC_PUBLIC | 0x20);
        assert_eq!(header.name, "a/T");
        assert_eq!(header.super_name.as_deref(), Some("a/Base"));
        assert_eq!(header.interfaces, vec!["java/lang/Runnable".to_string()]);
        assert_eq!(header.signature, None);
        assert_eq!(header.source_file.as_deref(), Some("T.java"));
        assert!(node.closed);
    }

    #[test]
    fn static_final_fields_get_zero_values() {
        let mut class = DexClassNode::new(ACC_PUBLIC, "La/T;", Some("Ljava/lang/Object;"));
        let constant = ACC_PUBLIC | ACC_STATIC | ACC_FINAL;
        class.fields.push(DexFieldNode::new(constant, "ZERO", "I"));
        class.fields.push(DexFieldNode::new(constant, "RATE", "D"));
        class.fields.push(DexFieldNode::new(constant, "NAME", "Ljava/lang/String;"));
        class.fields.push(DexFieldNode::new(constant, "COMPUTED", "J"));
        class.fields.push(DexFieldNode::new(ACC_PRIVATE | ACC_STATIC, "counter", "I"));
        let mut seven = DexFieldNode::new(constant, "SEVEN", "I");
        seven.initial_value = Some(DexValue::Int(7));
        class.fields.push(seven);
        class.methods.push(
            DexMethodNode::new(ACC_STATIC | 0x10000, MethodRef::new("La/T;", "<clinit>", "()V")).with_code(
                DexCodeNode::new(
                    2,
                    vec![
                        DexInstruction::ConstWide { dest: 0, value: 42 },
                        DexInstruction::Static {
                            op: ArrayOperation::PutWide,
                            value: 0,
                            field: FieldRef::new("La/T;", "COMPUTED", "J"),
                        },
                        DexInstruction::ReturnVoid,
                    ],
                ),
            ),
        );
        let (node, failures) = emit(&DexFileNode::new(35).with_classes(vec![class]), &ConvertOptions::default());
        assert!(failures.is_empty());
        assert_eq!(node.field("ZERO").unwrap().value, Some(JvmValue::Int(0)));
        assert_eq!(node.field("RATE").unwrap().value, Some(JvmValue::Double(0.0)));
        assert_eq!(node.field("NAME").unwrap().value, None);
        assert_eq!(node.field("COMPUTED").unwrap().value, None);
        assert_eq!(node.field("counter").unwrap().value, None);
        assert_eq!(node.field("SEVEN").unwrap().value, Some(JvmValue::Int(7)));
    }

    #[test]
    fn zero_values_can_be_turned_off() {
        let mut class = DexClassNode::new(ACC_PUBLIC, "La/T;", Some("Ljava/lang/Object;"));
        class.fields.push(DexFieldNode::new(ACC_STATIC | ACC_FINAL, "ZERO", "I"));
        let options = ConvertOptions { fix_static_final_values: false, ..ConvertOptions::default() };
        let (node, _) = emit(&DexFileNode::new(35).with_classes(vec![class]), &options);
        assert_eq!(node.field("ZERO").unwrap().value, None);
    }

    #[test]
    fn decoder_is_added_once_per_class() {
        let mut class = DexClassNode::new(ACC_PUBLIC, "La/T;", Some("Ljava/lang/Object;"));
        let long = "\u{4e2d}".repeat(30_000);
        class.methods.push(returning_string("first", &long));
        class.methods.push(returning_string("second", &long));
        class.methods.push(returning_string("short", "fine"));
        let (node, failures) = emit(&DexFileNode::new(35).with_classes(vec![class]), &ConvertOptions::default());
        assert!(failures.is_empty());
        let helpers: Vec<&str> =
            node.methods.iter().map(|m| m.header.name.as_str()).filter(|n| n.starts_with("$dexjvm$hex$")).collect();
        assert_eq!(helpers.len(), 2);
        assert!(helpers[0].ends_with("$decode_S"));
        assert!(helpers[1].ends_with("$decode_C"));
        assert_eq!(node.methods.len(), 5);
        assert_eq!(node.methods[3].header.access, ACC_PRIVATE | ACC_STATIC);
    }

    #[test]
    fn failed_method_leaves_siblings_alone() {
        let mut class = DexClassNode::new(ACC_PUBLIC, "La/T;", Some("Ljava/lang/Object;"));
        class.methods.push(returning_string("broken", &"x".repeat(70_000)));
        class.methods.push(returning_string("fine", "ok"));
        let options = ConvertOptions { string_workaround: false, ..ConvertOptions::default() };
        let (node, failures) = emit(&DexFileNode::new(35).with_classes(vec![class]), &options);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].class, "La/T;");
        assert_eq!(failures[0].member, "broken()Ljava/lang/String;");
        assert!(node.method("fine").unwrap().code.is_some());
        assert!(node.method("broken").unwrap().code.is_some());
    }
}
