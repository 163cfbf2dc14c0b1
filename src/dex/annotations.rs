//! Readers for the `dalvik.annotation.*` system annotations.
//!
//! Dex stores class metadata that the JVM keeps in attributes (generic
//! signatures, throws clauses, nesting) as annotations with `System`
//! visibility. Malformed elements are reported with `warn!` and skipped.

use log::warn;

use crate::dex::nodes::{DexAnnotation, DexAnnotationNode, DexClassNode, DexValue, MethodRef, Visibility};
use crate::dex::{
    ANNOTATION_DEFAULT, ANNOTATION_ENCLOSING_CLASS, ANNOTATION_ENCLOSING_METHOD, ANNOTATION_INNER_CLASS,
    ANNOTATION_MEMBER_CLASSES, ANNOTATION_SIGNATURE, ANNOTATION_THROWS,
};
use crate::types::internal_name;

/// Contents of an `InnerClass` annotation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerClassItem {
    /// `None` for anonymous classes.
    pub name: Option<String>,
    pub access: u32,
}

pub fn find_system<'a>(annotations: &'a [DexAnnotationNode], type_desc: &str) -> Option<&'a DexAnnotation> {
    annotations
        .iter()
        .find(|a| a.visibility == Visibility::System && a.type_desc() == type_desc)
        .map(|a| &a.annotation)
}

/// Generic signature split over a string array, joined back together.
pub fn signature(annotations: &[DexAnnotationNode]) -> Option<String> {
    let ann = find_system(annotations, ANNOTATION_SIGNATURE)?;
    match ann.element("value") {
        Some(DexValue::Array(parts)) => {
            let mut sig = String::new();
            for part in parts {
                match part {
                    DexValue::String(s) => sig.push_str(s),
                    other => {
                        warn!("ignoring non-string signature fragment {:?}", other);
                        return None;
                    }
                }
            }
            Some(sig)
        }
        Some(DexValue::String(s)) => Some(s.clone()),
        other => {
            warn!("malformed Signature annotation value {:?}", other);
            None
        }
    }
}

/// Declared exceptions as JVM internal names.
pub fn throws(annotations: &[DexAnnotationNode]) -> Vec<String> {
    let Some(ann) = find_system(annotations, ANNOTATION_THROWS) else {
        return Vec::new();
    };
    match ann.element("value") {
        Some(DexValue::Array(types)) => types
            .iter()
            .filter_map(|t| match t {
                DexValue::Type(desc) => Some(internal_name(desc)),
                other => {
                    warn!("ignoring non-type throws entry {:?}", other);
                    None
                }
            })
            .collect(),
        other => {
            warn!("malformed Throws annotation value {:?}", other);
            Vec::new()
        }
    }
}

pub fn enclosing_class(class: &DexClassNode) -> Option<&str> {
    let ann = class.system_annotation(ANNOTATION_ENCLOSING_CLASS)?;
    match ann.element("value") {
        Some(DexValue::Type(desc)) => Some(desc),
        other => {
            warn!("malformed EnclosingClass annotation on {}: {:?}", class.name, other);
            None
        }
    }
}

pub fn enclosing_method(class: &DexClassNode) -> Option<&MethodRef> {
    let ann = class.system_annotation(ANNOTATION_ENCLOSING_METHOD)?;
    match ann.element("value") {
        Some(DexValue::Method(method)) => Some(method),
        // class initialisers and field initialisers have no enclosing method
        Some(DexValue::Null) => None,
        other => {
            warn!("malformed EnclosingMethod annotation on {}: {:?}", class.name, other);
            None
        }
    }
}

pub fn inner_class(class: &DexClassNode) -> Option<InnerClassItem> {
    let ann = class.system_annotation(ANNOTATION_INNER_CLASS)?;
    let access = match ann.element("accessFlags").and_then(DexValue::as_int) {
        Some(flags) => flags as u32,
        None => {
            warn!("InnerClass annotation on {} without accessFlags", class.name);
            0
        }
    };
    let name = match ann.element("name") {
        Some(DexValue::String(s)) => Some(s.clone()),
        Some(DexValue::Null) | None => None,
        Some(other) => {
            warn!("malformed InnerClass name on {}: {:?}", class.name, other);
            None
        }
    };
    Some(InnerClassItem { name, access })
}

pub fn member_classes(class: &DexClassNode) -> Vec<&str> {
    let Some(ann) = class.system_annotation(ANNOTATION_MEMBER_CLASSES) else {
        return Vec::new();
    };
    match ann.element("value") {
        Some(DexValue::Array(types)) => types.iter().filter_map(DexValue::as_type).collect(),
        other => {
            warn!("malformed MemberClasses annotation on {}: {:?}", class.name, other);
            Vec::new()
        }
    }
}

/// Default value of an annotation type element, looked up on the
/// declaring annotation type.
pub fn annotation_default<'a>(class: &'a DexClassNode, element: &str) -> Option<&'a DexValue> {
    let ann = class.system_annotation(ANNOTATION_DEFAULT)?;
    match ann.element("value") {
        Some(DexValue::Annotation(defaults)) => defaults.element(element),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::nodes::DexAnnotation;

    fn class_with(annotation: DexAnnotation) -> DexClassNode {
        let mut class = DexClassNode::new(0x1, "La/Outer$Inner;", Some("Ljava/lang/Object;"));
        class.annotations.push(DexAnnotationNode::system(annotation));
        class
    }

    #[test]
    fn signature_fragments_are_joined() {
        let node = DexAnnotationNode::system(DexAnnotation::new(ANNOTATION_SIGNATURE).with_element(
            "value",
            DexValue::Array(vec![
                DexValue::String("Ljava/util/List<".to_string()),
                DexValue::String("Ljava/lang/String;".to_string()),
                DexValue::String(">;".to_string()),
            ]),
        ));
        assert_eq!(signature(&[node]).as_deref(), Some("Ljava/util/List<Ljava/lang/String;>;"));
    }

    #[test]
    fn throws_become_internal_names() {
        let node = DexAnnotationNode::system(DexAnnotation::new(ANNOTATION_THROWS).with_element(
            "value",
            DexValue::Array(vec![DexValue::Type("Ljava/io/IOException;".to_string())]),
        ));
        assert_eq!(throws(&[node]), vec!["java/io/IOException".to_string()]);
        assert!(throws(&[]).is_empty());
    }

    #[test]
    fn inner_class_item() {
        let class = class_with(
            DexAnnotation::new(ANNOTATION_INNER_CLASS)
                .with_element("accessFlags", DexValue::Int(0x19))
                .with_element("name", DexValue::String("Inner".to_string())),
        );
        assert_eq!(inner_class(&class), Some(InnerClassItem { name: Some("Inner".to_string()), access: 0x19 }));

        let anonymous = class_with(
            DexAnnotation::new(ANNOTATION_INNER_CLASS)
                .with_element("accessFlags", DexValue::Int(0))
                .with_element("name", DexValue::Null),
        );
        assert_eq!(inner_class(&anonymous).unwrap().name, None);
    }

    #[test]
    fn enclosing_method_null_means_none() {
        let class = class_with(DexAnnotation::new(ANNOTATION_ENCLOSING_METHOD).with_element("value", DexValue::Null));
        assert!(enclosing_method(&class).is_none());
    }
}
