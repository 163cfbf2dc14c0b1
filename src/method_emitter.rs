//! Declaration and body of one method.

use log::{debug, error, warn};

use crate::access::clear_method_access;
use crate::dex::annotations::{annotation_default, signature, throws};
use crate::dex::nodes::{DexClassNode, DexCodeNode, DexMethodNode};
use crate::dex::ACC_ANNOTATION;
use crate::error::ConvertError;
use crate::ir::lift::lift;
use crate::ir::lower::lower;
use crate::ir::pipeline::Pipeline;
use crate::jvm::insn::opcodes::{ATHROW, DUP, INVOKESPECIAL, NEW};
use crate::jvm::insn::{CodeBody, JvmInsn};
use crate::jvm::sink::{ClassSink, MethodHeader};
use crate::jvm::JvmValue;
use crate::types::is_valid_method_signature;
use crate::values::{convert_annotation_value, convert_annotations};
use crate::workaround::ClassContext;
use crate::ConvertOptions;

const RUNTIME_EXCEPTION: &str = "java/lang/RuntimeException";

pub struct MethodEmitter<'a> {
    class: &'a DexClassNode,
    options: &'a ConvertOptions,
    pipeline: &'a Pipeline,
}

impl<'a> MethodEmitter<'a> {
    pub fn new(class: &'a DexClassNode, options: &'a ConvertOptions, pipeline: &'a Pipeline) -> Self {
        MethodEmitter { class, options, pipeline }
    }

    pub fn header(&self, method: &DexMethodNode) -> MethodHeader {
        let signature = signature(&method.annotations).filter(|sig| {
            let valid = is_valid_method_signature(sig);
            if !valid {
                warn!("dropping invalid signature {} of {}", sig, method.method);
            }
            valid
        });
        MethodHeader {
            access: clear_method_access(method.access),
            name: method.method.name.clone(),
            descriptor: method.method.descriptor.clone(),
            signature,
            exceptions: throws(&method.annotations),
        }
    }

    /// Sends the method to `sink`. An `Err` means the body could not be
    /// translated; the declaration was still emitted, with a stub body that
    /// throws when `stub_failed_methods` is set.
    pub fn emit(
        &self,
        method: &DexMethodNode,
        sink: &mut dyn ClassSink,
        context: &mut ClassContext,
    ) -> Result<(), ConvertError> {
        let Some(mut out) = sink.add_method(self.header(method)) else {
            debug!("sink skipped {}", method.method);
            return Ok(());
        };

        if self.class.access & ACC_ANNOTATION != 0 {
            if let Some(value) = annotation_default(self.class, &method.method.name) {
                if let Some(value) = convert_annotation_value(value, true) {
                    out.add_annotation_default(value);
                }
            }
        }
        for annotation in convert_annotations(&method.annotations) {
            out.add_annotation(annotation);
        }
        for (parameter, annotations) in method.parameter_annotations.iter().enumerate() {
            for annotation in convert_annotations(annotations) {
                out.add_parameter_annotation(parameter, annotation);
            }
        }

        let mut result = Ok(());
        if let Some(code) = &method.code {
            match self.translate(method, code, context) {
                Ok(body) => out.add_code(body),
                Err(e) => {
                    error!("{}", e);
                    if self.options.stub_failed_methods {
                        out.add_code(failure_stub(&e));
                    }
                    result = Err(e);
                }
            }
        }
        out.close();
        result
    }

    /// Lift, normalise, rewrite oversized strings, lower.
    pub fn translate(
        &self,
        method: &DexMethodNode,
        code: &DexCodeNode,
        context: &mut ClassContext,
    ) -> Result<CodeBody, ConvertError> {
        let mut body = || -> Result<CodeBody, ConvertError> {
            let mut ir = lift(method, code).map_err(|e| e.in_stage("lift"))?;
            self.pipeline.run(&mut ir)?;
            if self.options.string_workaround {
                context
                    .rewrite_long_strings(&mut ir, self.options.max_string_length)
                    .map_err(|e| e.in_stage("workaround"))?;
            }
            lower(&ir).map_err(|e| e.in_stage("lower"))
        };
        body().map_err(|e| err!(e, "method {}", method.method))
    }
}

/// `throw new RuntimeException(<message>)`
pub fn failure_stub(e: &ConvertError) -> CodeBody {
    CodeBody {
        instructions: vec![
            JvmInsn::Type { opcode: NEW, type_name: RUNTIME_EXCEPTION.to_string() },
            JvmInsn::Insn(DUP),
            JvmInsn::Ldc(JvmValue::String(e.to_string())),
            JvmInsn::Method {
                opcode: INVOKESPECIAL,
                owner: RUNTIME_EXCEPTION.to_string(),
                name: "<init>".to_string(),
                descriptor: "(Ljava/lang/String;)V".to_string(),
                is_interface: false,
            },
            JvmInsn::Insn(ATHROW),
        ],
        try_catch_blocks: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::instructions::{DexInstruction, MoveKind};
    use crate::dex::nodes::{DexAnnotation, DexAnnotationNode, DexValue, MethodRef, Visibility};
    use crate::dex::{
        ACC_ABSTRACT, ACC_CONSTRUCTOR, ACC_INTERFACE, ACC_PUBLIC, ACC_STATIC, ANNOTATION_DEFAULT, ANNOTATION_SIGNATURE,
        ANNOTATION_THROWS,
    };
    use crate::jvm::insn::opcodes::{ARETURN, LDC, RETURN};
    use crate::jvm::nodes::ClassNode;
    use crate::jvm::AnnotationValue;
    use crate::workaround::BuiltinTemplates;

    fn class() -> DexClassNode {
        DexClassNode::new(ACC_PUBLIC, "La/T;", Some("Ljava/lang/Object;"))
    }

    fn emit_one(class: &DexClassNode, options: &ConvertOptions, method: &DexMethodNode) -> (ClassNode, Result<(), ConvertError>) {
        let pipeline = Pipeline::standard();
        let emitter = MethodEmitter::new(class, options, &pipeline);
        let mut context = ClassContext::new("a/T", &BuiltinTemplates);
        let mut node = ClassNode::default();
        let result = emitter.emit(method, &mut node, &mut context);
        (node, result)
    }

    fn string_method(value: &str) -> DexMethodNode {
        DexMethodNode::new(ACC_PUBLIC | ACC_STATIC, MethodRef::new("La/T;", "s", "()Ljava/lang/String;")).with_code(
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
    fn header_from_system_annotations() {
        let mut method = DexMethodNode::new(
            ACC_PUBLIC | ACC_CONSTRUCTOR,
            MethodRef::new("La/T;", "<init>", "(Ljava/util/List;)V"),
        );
        method.annotations.push(DexAnnotationNode::system(DexAnnotation::new(ANNOTATION_SIGNATURE).with_element(
            "value",
            DexValue::Array(vec![
                DexValue::String("(Ljava/util/List<".to_string()),
                DexValue::String("Ljava/lang/String;>;)V".to_string()),
            ]),
        )));
        method.annotations.push(DexAnnotationNode::system(DexAnnotation::new(ANNOTATION_THROWS).with_element(
            "value",
            DexValue::Array(vec![DexValue::Type("Ljava/io/IOException;".to_string())]),
        )));
        let options = ConvertOptions::default();
        let pipeline = Pipeline::standard();
        let header = MethodEmitter::new(&class(), &options, &pipeline).header(&method);
        assert_eq!(header.access, ACC_PUBLIC);
        assert_eq!(header.signature.as_deref(), Some("(Ljava/util/List<Ljava/lang/String;>;)V"));
        assert_eq!(header.exceptions, vec!["java/io/IOException".to_string()]);
    }

    #[test]
    fn invalid_signature_is_dropped() {
        let mut method = DexMethodNode::new(ACC_PUBLIC, MethodRef::new("La/T;", "m", "()V"));
        method.annotations.push(DexAnnotationNode::system(
            DexAnnotation::new(ANNOTATION_SIGNATURE).with_element("value", DexValue::String("(Lnot a signature".to_string())),
        ));
        let options = ConvertOptions::default();
        let pipeline = Pipeline::standard();
        let header = MethodEmitter::new(&class(), &options, &pipeline).header(&method);
        assert_eq!(header.signature, None);
    }

    #[test]
    fn annotations_by_visibility() {
        let mut method = DexMethodNode::new(ACC_PUBLIC, MethodRef::new("La/T;", "m", "(I)V"))
            .with_code(DexCodeNode::new(2, vec![DexInstruction::ReturnVoid]));
        method.annotations.push(DexAnnotationNode::new(Visibility::Runtime, DexAnnotation::new("La/Seen;")));
        method.annotations.push(DexAnnotationNode::new(Visibility::Build, DexAnnotation::new("La/Kept;")));
        method.annotations.push(DexAnnotationNode::system(DexAnnotation::new(ANNOTATION_THROWS)));
        method.parameter_annotations = vec![vec![DexAnnotationNode::new(Visibility::Runtime, DexAnnotation::new("La/P;"))]];

        let (node, result) = emit_one(&class(), &ConvertOptions::default(), &method);
        result.unwrap();
        let m = node.method("m").unwrap();
        let seen: Vec<(&str, bool)> = m.annotations.iter().map(|a| (a.descriptor.as_str(), a.visible)).collect();
        assert_eq!(seen, vec![("La/Seen;", true), ("La/Kept;", false)]);
        assert_eq!(m.parameter_annotations.len(), 1);
        assert_eq!(m.parameter_annotations[0].0, 0);
        assert_eq!(m.opcodes(), vec![RETURN]);
        assert!(m.closed);
    }

    #[test]
    fn annotation_type_defaults() {
        let mut class = DexClassNode::new(ACC_PUBLIC | ACC_INTERFACE | ACC_ABSTRACT | ACC_ANNOTATION, "La/T;", None);
        class.annotations.push(DexAnnotationNode::system(DexAnnotation::new(ANNOTATION_DEFAULT).with_element(
            "value",
            DexValue::Annotation(DexAnnotation::new("La/T;").with_element("level", DexValue::Int(3))),
        )));
        let method = DexMethodNode::new(ACC_PUBLIC | ACC_ABSTRACT, MethodRef::new("La/T;", "level", "()I"));
        let (node, result) = emit_one(&class, &ConvertOptions::default(), &method);
        result.unwrap();
        let level = node.method("level").unwrap();
        assert_eq!(level.annotation_default, Some(AnnotationValue::Const(JvmValue::Int(3))));
        assert!(level.code.is_none());
    }

    #[test]
    fn failed_body_gets_a_throwing_stub() {
        let options = ConvertOptions { string_workaround: false, ..ConvertOptions::default() };
        let method = string_method(&"x".repeat(70_000));
        let (node, result) = emit_one(&class(), &options, &method);
        let e = result.unwrap_err();
        assert!(e.to_string().contains("constant pool"));
        assert!(e.to_string().contains("method La/T;->s()Ljava/lang/String;"));
        assert_eq!(e.stage(), Some("lower"));
        let stub = node.method("s").unwrap();
        assert_eq!(stub.opcodes(), vec![NEW, DUP, LDC, INVOKESPECIAL, ATHROW]);
        assert!(stub.closed);
    }

    #[test]
    fn stubs_can_be_turned_off() {
        let options = ConvertOptions { string_workaround: false, stub_failed_methods: false, ..ConvertOptions::default() };
        let (node, result) = emit_one(&class(), &options, &string_method(&"x".repeat(70_000)));
        assert!(result.is_err());
        assert!(node.method("s").unwrap().code.is_none());
    }

    #[test]
    fn oversized_string_goes_through_the_decoder() {
        let (node, result) = emit_one(&class(), &ConvertOptions::default(), &string_method(&"x".repeat(70_000)));
        result.unwrap();
        let code = node.method("s").unwrap().code.clone().unwrap();
        assert_eq!(code.opcodes().last(), Some(&ARETURN));
        assert!(code.instructions.iter().any(|i| matches!(
            i,
            JvmInsn::Method { owner, name, .. } if owner == "a/T" && name.ends_with("$decode_S")
        )));
    }
}
