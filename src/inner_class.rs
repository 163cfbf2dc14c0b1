//! `InnerClasses` and `EnclosingMethod` attributes for one class.
//!
//! The JVM wants every class to list the nesting of all classes it mentions:
//! its ancestors, its descendants, and nested classes reached through its
//! super types. All of that is read off the [`RelationMap`].

use std::collections::HashSet;

use log::warn;

use crate::access::clear_inner_access;
use crate::dex::nodes::DexClassNode;
use crate::jvm::sink::{InnerClassRecord, OuterClassRef};
use crate::relation::{RelationId, RelationMap};
use crate::types::internal_name;

const OBJECT: &str = "Ljava/lang/Object;";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InnerClasses {
    /// Unique by name, ascending.
    pub records: Vec<InnerClassRecord>,
    pub outer: Option<OuterClassRef>,
}

pub struct InnerClassTreeBuilder<'a> {
    relations: &'a RelationMap,
}

impl<'a> InnerClassTreeBuilder<'a> {
    pub fn new(relations: &'a RelationMap) -> Self {
        InnerClassTreeBuilder { relations }
    }

    pub fn build(&self, class: &DexClassNode) -> InnerClasses {
        let mut records = Vec::new();
        let mut outer = None;

        if let Some(id) = self.relations.get(&class.name) {
            let node = self.relations.node(id);
            // a class inside a method body without any InnerClass item is a
            // compiler-generated closure; it stays a top level class
            let closure = node.enclosing_method.is_some() && !node.has_inner_class_item;
            if !closure {
                self.search_inner(id, &mut records);
                if node.is_inner() {
                    if node.inner_name.is_none() {
                        outer = self.outer_class_ref(id);
                    }
                    self.search_enclosing(id, &mut records);
                }
            }
        }

        if let Some(super_class) = class.super_class.as_deref() {
            if super_class != OBJECT && super_class != class.name {
                self.probe(super_class, false, &mut records);
            }
        }
        for interface in &class.interfaces {
            if *interface != class.name {
                self.probe(interface, true, &mut records);
            }
        }

        let mut seen = HashSet::new();
        records.retain(|r| seen.insert(r.name.clone()));
        records.sort_by(|a, b| a.name.cmp(&b.name));
        for record in &mut records {
            if let Some(name) = &record.inner_name {
                if !is_java_identifier(name) {
                    warn!("invalid inner class name {:?} for {}, treating it as anonymous", name, record.name);
                    record.inner_name = None;
                    record.outer_name = None;
                }
            }
        }

        InnerClasses { records, outer }
    }

    fn record(&self, id: RelationId, outer: RelationId) -> InnerClassRecord {
        let node = self.relations.node(id);
        let access = clear_inner_access(node.access);
        match &node.inner_name {
            Some(inner_name) => InnerClassRecord {
                name: internal_name(&node.name),
                outer_name: Some(internal_name(&self.relations.node(outer).name)),
                inner_name: Some(inner_name.clone()),
                access,
            },
            None => InnerClassRecord {
                name: internal_name(&node.name),
                outer_name: None,
                inner_name: None,
                access,
            },
        }
    }

    fn outer_class_ref(&self, id: RelationId) -> Option<OuterClassRef> {
        let node = self.relations.node(id);
        if let Some(method) = &node.enclosing_method {
            return Some(OuterClassRef {
                owner: internal_name(&method.owner),
                method_name: Some(method.name.clone()),
                method_descriptor: Some(method.descriptor.clone()),
            });
        }
        node.enclosing_class.map(|outer| OuterClassRef {
            owner: internal_name(&self.relations.node(outer).name),
            method_name: None,
            method_descriptor: None,
        })
    }

    /// The class itself and every class enclosing it.
    fn search_enclosing(&self, start: RelationId, records: &mut Vec<InnerClassRecord>) {
        let mut visited = HashSet::new();
        let mut current = start;
        while visited.insert(current) {
            let Some(outer) = self.relations.node(current).enclosing_class else {
                break;
            };
            if outer == start {
                break;
            }
            records.push(self.record(current, outer));
            current = outer;
        }
    }

    /// Every class nested, at any depth, inside `start`.
    fn search_inner(&self, start: RelationId, records: &mut Vec<InnerClassRecord>) {
        let mut visited = HashSet::new();
        let mut stack = vec![start];
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            for &inner in &self.relations.node(id).inners {
                if inner != start {
                    records.push(self.record(inner, id));
                }
                stack.push(inner);
            }
        }
    }

    /// Nesting of a super type, from the program if it is known, otherwise
    /// guessed from a `$` in its name.
    fn probe(&self, desc: &str, is_interface: bool, records: &mut Vec<InnerClassRecord>) {
        if let Some(id) = self.relations.get(desc) {
            if let Some(outer) = self.relations.node(id).enclosing_class {
                records.push(self.record(id, outer));
            }
            return;
        }
        let name = internal_name(desc);
        if let Some(index) = name.rfind('$') {
            let mut access = 0x1 | 0x8 | 0x400;
            if is_interface {
                access |= 0x200;
            }
            records.push(InnerClassRecord {
                outer_name: Some(name[..index].to_string()),
                inner_name: Some(name[index + 1..].to_string()),
                name,
                access,
            });
        }
    }
}

/// Digits are allowed in first position, kotlinc emits such names.
fn is_java_identifier(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }
    name.chars().skip(1).all(|c| c.is_alphanumeric() || c == '$' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::nodes::{DexAnnotation, DexAnnotationNode, DexFileNode, DexValue, MethodRef};
    use crate::dex::{ANNOTATION_ENCLOSING_CLASS, ANNOTATION_ENCLOSING_METHOD, ANNOTATION_INNER_CLASS, ANNOTATION_MEMBER_CLASSES};

    fn class(name: &str, annotations: Vec<DexAnnotation>) -> DexClassNode {
        let mut class = DexClassNode::new(0x1, name, Some(OBJECT));
        class.annotations = annotations.into_iter().map(DexAnnotationNode::system).collect();
        class
    }

    fn enclosed_by(outer: &str) -> DexAnnotation {
        DexAnnotation::new(ANNOTATION_ENCLOSING_CLASS).with_element("value", DexValue::Type(outer.to_string()))
    }

    fn inner_item(name: Option<&str>, access: i32) -> DexAnnotation {
        DexAnnotation::new(ANNOTATION_INNER_CLASS)
            .with_element("accessFlags", DexValue::Int(access))
            .with_element("name", name.map(|n| DexValue::String(n.to_string())).unwrap_or(DexValue::Null))
    }

    fn names(records: &[InnerClassRecord]) -> Vec<&str> {
        records.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn descendants_and_ancestors() {
        let file = DexFileNode::new(35).with_classes(vec![
            class("La/A;", vec![]),
            class("La/A$B;", vec![enclosed_by("La/A;"), inner_item(Some("B"), 0x1)]),
            class("La/A$B$C;", vec![enclosed_by("La/A$B;"), inner_item(Some("C"), 0x9)]),
        ]);
        let map = RelationMap::build(&file);
        let builder = InnerClassTreeBuilder::new(&map);

        let top = builder.build(&file.classes[0]);
        assert_eq!(names(&top.records), vec!["a/A$B", "a/A$B$C"]);
        assert_eq!(top.records[1].outer_name.as_deref(), Some("a/A$B"));
        assert!(top.outer.is_none());

        let leaf = builder.build(&file.classes[2]);
        assert_eq!(names(&leaf.records), vec!["a/A$B", "a/A$B$C"]);
        assert_eq!(leaf.records[1].access, 0x9);
        // named member classes carry no enclosing method reference
        assert!(leaf.outer.is_none());
    }

    #[test]
    fn cycles_terminate() {
        let file = DexFileNode::new(35).with_classes(vec![
            class("La/X;", vec![enclosed_by("La/Y;"), inner_item(Some("X"), 0x1)]),
            class("La/Y;", vec![enclosed_by("La/X;"), inner_item(Some("Y"), 0x1)]),
            class("La/Z;", vec![enclosed_by("La/Z;"), inner_item(Some("Z"), 0x1)]),
        ]);
        let map = RelationMap::build(&file);
        let builder = InnerClassTreeBuilder::new(&map);
        let x = builder.build(&file.classes[0]);
        assert_eq!(names(&x.records), vec!["a/X", "a/Y"]);
        let z = builder.build(&file.classes[2]);
        assert!(z.records.is_empty());
    }

    #[test]
    fn closure_stays_unassociated() {
        let method = MethodRef::new("La/Outer;", "run", "()V");
        let file = DexFileNode::new(35).with_classes(vec![
            class("La/Outer;", vec![]),
            class(
                "La/Outer$run$1;",
                vec![DexAnnotation::new(ANNOTATION_ENCLOSING_METHOD).with_element("value", DexValue::Method(method))],
            ),
        ]);
        let map = RelationMap::build(&file);
        let closure = InnerClassTreeBuilder::new(&map).build(&file.classes[1]);
        assert!(closure.records.is_empty());
        assert!(closure.outer.is_none());
    }

    #[test]
    fn super_types_are_probed() {
        let mut sub = class("La/Sub;", vec![]);
        sub.super_class = Some("Lb/Base$Impl;".to_string());
        sub.interfaces = vec!["Lb/Api$Listener;".to_string(), "Lb/Plain;".to_string()];
        let file = DexFileNode::new(35).with_classes(vec![sub]);
        let map = RelationMap::build(&file);
        let built = InnerClassTreeBuilder::new(&map).build(&file.classes[0]);
        assert_eq!(built.records.len(), 2);
        assert_eq!(
            built.records[0],
            InnerClassRecord {
                name: "b/Api$Listener".to_string(),
                outer_name: Some("b/Api".to_string()),
                inner_name: Some("Listener".to_string()),
                access: 0x609,
            }
        );
        assert_eq!(built.records[1].name, "b/Base$Impl");
        assert_eq!(built.records[1].access, 0x409);
    }

    #[test]
    fn invalid_names_become_anonymous() {
        let file = DexFileNode::new(35).with_classes(vec![
            class(
                "La/O;",
                vec![DexAnnotation::new(ANNOTATION_MEMBER_CLASSES).with_element(
                    "value",
                    DexValue::Array(vec![DexValue::Type("La/O$1x;".to_string()), DexValue::Type("La/O$bad;".to_string())]),
                )],
            ),
            class("La/O$1x;", vec![inner_item(Some("1x"), 0x1)]),
            class("La/O$bad;", vec![inner_item(Some("b-d"), 0x1)]),
        ]);
        let map = RelationMap::build(&file);
        let built = InnerClassTreeBuilder::new(&map).build(&file.classes[0]);
        assert_eq!(built.records[0].inner_name.as_deref(), Some("1x"));
        assert_eq!(built.records[1].inner_name, None);
        assert_eq!(built.records[1].outer_name, None);
    }

    #[test]
    fn identifiers() {
        assert!(is_java_identifier("Inner"));
        assert!(is_java_identifier("1"));
        assert!(is_java_identifier("a$b_c"));
        assert!(is_java_identifier("Größe"));
        assert!(is_java_identifier("内部类"));
        assert!(!is_java_identifier(""));
        assert!(!is_java_identifier("a.b"));
    }
}
