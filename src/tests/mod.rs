//! Whole-program tests: dex model in, recorded class nodes out.

mod nesting;

use crate::dex::nodes::{DexAnnotation, DexAnnotationNode, DexClassNode, DexFileNode, DexValue, MethodRef};
use crate::dex::{
    ACC_PUBLIC, ANNOTATION_ENCLOSING_CLASS, ANNOTATION_ENCLOSING_METHOD, ANNOTATION_INNER_CLASS,
    ANNOTATION_MEMBER_CLASSES,
};
use crate::jvm::nodes::ClassNodeCollector;
use crate::{ConvertOptions, ConvertReport, Dex2Jvm};

fn class(name: &str) -> DexClassNode {
    DexClassNode::new(ACC_PUBLIC, name, Some("Ljava/lang/Object;"))
}

fn system(class: &mut DexClassNode, annotation: DexAnnotation) {
    class.annotations.push(DexAnnotationNode::system(annotation));
}

fn inner_item(class: &mut DexClassNode, name: Option<&str>, access: i32) {
    let name = name.map_or(DexValue::Null, |n| DexValue::String(n.to_string()));
    system(
        class,
        DexAnnotation::new(ANNOTATION_INNER_CLASS)
            .with_element("accessFlags", DexValue::Int(access))
            .with_element("name", name),
    );
}

fn enclosing_class(class: &mut DexClassNode, outer: &str) {
    system(class, DexAnnotation::new(ANNOTATION_ENCLOSING_CLASS).with_element("value", DexValue::Type(outer.to_string())));
}

fn enclosing_method(class: &mut DexClassNode, method: MethodRef) {
    system(class, DexAnnotation::new(ANNOTATION_ENCLOSING_METHOD).with_element("value", DexValue::Method(method)));
}

fn member_classes(class: &mut DexClassNode, members: &[&str]) {
    let members = members.iter().map(|m| DexValue::Type(m.to_string())).collect();
    system(class, DexAnnotation::new(ANNOTATION_MEMBER_CLASSES).with_element("value", DexValue::Array(members)));
}

fn convert(classes: Vec<DexClassNode>) -> (ClassNodeCollector, ConvertReport) {
    convert_with(classes, ConvertOptions::default())
}

fn convert_with(classes: Vec<DexClassNode>, options: ConvertOptions) -> (ClassNodeCollector, ConvertReport) {
    let file = DexFileNode::new(35).with_classes(classes);
    let mut out = ClassNodeCollector::new();
    let report = Dex2Jvm::new(options).convert_program(&file, &mut out);
    (out, report)
}
