//! # dex2jvm
//!
//! Retargets Android classes into JVM class structures. Register-based
//! Dalvik bytecode is lifted into an SSA IR, normalised, and lowered to
//! stack instructions; class metadata kept in dex system annotations
//! (nesting, signatures, throws clauses) becomes class file attributes.
//!
//! Reading `.dex` and writing `.class` files are left to the caller: the
//! input is the [`dex::nodes`] model and the output goes to a
//! [`jvm::sink::ClassSinkFactory`].
//!
//! ```
//! use dex2jvm::dex::nodes::{DexClassNode, DexFileNode};
//! use dex2jvm::jvm::nodes::ClassNodeCollector;
//! use dex2jvm::{ConvertOptions, Dex2Jvm};
//!
//! let file = DexFileNode::new(35).with_classes(vec![DexClassNode::new(1, "Lcom/a/Main;", Some("Ljava/lang/Object;"))]);
//! let mut out = ClassNodeCollector::new();
//! let report = Dex2Jvm::new(ConvertOptions::default()).convert_program(&file, &mut out);
//! assert!(report.is_clean());
//! assert!(out.get("com/a/Main").is_some());
//! ```

#[macro_use]
mod error;

pub mod access;
pub mod class_emitter;
pub mod dex;
pub mod inner_class;
pub mod ir;
pub mod jvm;
pub mod method_emitter;
pub mod relation;
pub mod types;
pub mod values;
pub mod workaround;
#[cfg(test)]
mod tests;

use log::{info, warn};
use serde::{Deserialize, Serialize};

pub use crate::error::ConvertError;

use crate::class_emitter::ClassEmitter;
use crate::dex::nodes::{DexClassNode, DexFileNode};
use crate::ir::pipeline::Pipeline;
use crate::jvm::sink::{ClassSink, ClassSinkFactory};
use crate::relation::RelationMap;
use crate::types::internal_name;
use crate::workaround::{BuiltinTemplates, TemplateProvider};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConvertOptions {
    /// Split string constants too long for the constant pool and rebuild
    /// them at run time.
    pub string_workaround: bool,
    /// Longest modified UTF-8 encoding kept as a plain constant.
    pub max_string_length: usize,
    /// Give `static final` primitive fields that dex left without an initial
    /// value their zero value.
    pub fix_static_final_values: bool,
    /// Replace untranslatable bodies with `throw new RuntimeException(..)`.
    pub stub_failed_methods: bool,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        ConvertOptions {
            string_workaround: true,
            max_string_length: ir::lower::MAX_UTF8_LENGTH,
            fix_static_final_values: true,
            stub_failed_methods: true,
        }
    }
}

/// A method whose body could not be translated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberFailure {
    /// Descriptor of the declaring class.
    pub class: String,
    /// Name followed by descriptor.
    pub member: String,
    pub error: ConvertError,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvertReport {
    pub classes: usize,
    /// Classes the factory declined.
    pub skipped: usize,
    pub failures: Vec<MemberFailure>,
}

impl ConvertReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

pub struct Dex2Jvm {
    options: ConvertOptions,
    pipeline: Pipeline,
    templates: Box<dyn TemplateProvider>,
}

impl Dex2Jvm {
    pub fn new(options: ConvertOptions) -> Self {
        Dex2Jvm {
            options,
            pipeline: Pipeline::standard(),
            templates: Box::new(BuiltinTemplates),
        }
    }

    pub fn with_templates<T: TemplateProvider + 'static>(mut self, templates: T) -> Self {
        self.templates = Box::new(templates);
        self
    }

    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    /// Converts every class of `file`, in order.
    pub fn convert_program(&self, file: &DexFileNode, factory: &mut dyn ClassSinkFactory) -> ConvertReport {
        let relations = RelationMap::build(file);
        let mut report = ConvertReport::default();
        for class in &file.classes {
            let Some(mut sink) = factory.create(&internal_name(&class.name)) else {
                report.skipped += 1;
                continue;
            };
            report.failures.extend(self.convert_class(file.dex_version, class, &relations, sink.as_mut()));
            report.classes += 1;
        }
        if report.is_clean() {
            info!("converted {} classes", report.classes);
        } else {
            warn!("converted {} classes, {} methods failed", report.classes, report.failures.len());
        }
        report
    }

    /// Converts one class against a relation map built for its whole program.
    pub fn convert_class(
        &self,
        dex_version: u32,
        class: &DexClassNode,
        relations: &RelationMap,
        sink: &mut dyn ClassSink,
    ) -> Vec<MemberFailure> {
        ClassEmitter::new(relations, &self.options, &self.pipeline, self.templates.as_ref(), dex_version).emit(class, sink)
    }
}
