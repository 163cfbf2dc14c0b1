//! Whole-program nesting relations recovered from system annotations.
//!
//! Nodes live in an arena and refer to each other by [`RelationId`], so
//! cycles produced by obfuscators are representable without shared
//! ownership. Anything walking the graph keeps a visited set.

use std::collections::{BTreeSet, HashMap};

use log::{debug, warn};

use crate::access::AccessFlags;
use crate::dex::annotations;
use crate::dex::nodes::{DexClassNode, DexFileNode, MethodRef};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationId(usize);

#[derive(Debug, Clone)]
pub struct RelationNode {
    /// Class descriptor, `Lpkg/Name;`.
    pub name: String,
    pub access: u32,
    pub enclosing_class: Option<RelationId>,
    pub enclosing_method: Option<MethodRef>,
    /// Simple name from the `InnerClass` annotation, `None` when anonymous.
    pub inner_name: Option<String>,
    pub has_inner_class_item: bool,
    pub inners: BTreeSet<RelationId>,
}

impl RelationNode {
    fn new(name: &str) -> Self {
        RelationNode {
            name: name.to_string(),
            access: 0,
            enclosing_class: None,
            enclosing_method: None,
            inner_name: None,
            has_inner_class_item: false,
            inners: BTreeSet::new(),
        }
    }

    /// Declared inside another class or a method body.
    pub fn is_inner(&self) -> bool {
        self.enclosing_class.is_some() || self.enclosing_method.is_some()
    }
}

/// Read-only after [`RelationMap::build`].
#[derive(Debug, Clone, Default)]
pub struct RelationMap {
    nodes: Vec<RelationNode>,
    index: HashMap<String, RelationId>,
}

impl RelationMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn build(file: &DexFileNode) -> RelationMap {
        let mut map = RelationMap::new();
        for class in &file.classes {
            map.add_class(class);
        }
        debug!("relation map holds {} classes", map.nodes.len());
        map
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<RelationId> {
        self.index.get(name).copied()
    }

    pub fn node(&self, id: RelationId) -> &RelationNode {
        &self.nodes[id.0]
    }

    pub fn lookup(&self, name: &str) -> Option<&RelationNode> {
        self.get(name).map(|id| self.node(id))
    }

    fn resolve(&mut self, name: &str) -> RelationId {
        if let Some(id) = self.index.get(name) {
            return *id;
        }
        let id = RelationId(self.nodes.len());
        self.nodes.push(RelationNode::new(name));
        self.index.insert(name.to_string(), id);
        id
    }

    fn link(&mut self, inner: RelationId, outer: RelationId) -> bool {
        if inner == outer {
            warn!("{} declares itself as its own enclosing class, ignored", self.nodes[inner.0].name);
            return false;
        }
        self.nodes[inner.0].enclosing_class = Some(outer);
        self.nodes[outer.0].inners.insert(inner);
        true
    }

    fn add_class(&mut self, class: &DexClassNode) {
        let id = self.resolve(&class.name);
        let type_bits = (AccessFlags::INTERFACE | AccessFlags::ABSTRACT).bits();
        {
            let node = &mut self.nodes[id.0];
            node.access = (node.access & !type_bits) | class.access;
        }

        if let Some(outer) = annotations::enclosing_class(class) {
            let outer = self.resolve(outer);
            self.link(id, outer);
        }
        if let Some(method) = annotations::enclosing_method(class) {
            let outer = self.resolve(&method.owner);
            if self.link(id, outer) {
                self.nodes[id.0].enclosing_method = Some(method.clone());
            }
        }
        if let Some(item) = annotations::inner_class(class) {
            let node = &mut self.nodes[id.0];
            node.access |= item.access & !type_bits;
            node.inner_name = item.name;
            node.has_inner_class_item = true;
        }
        for member in annotations::member_classes(class) {
            let inner = self.resolve(member);
            self.link(inner, id);
        }
    }
}
