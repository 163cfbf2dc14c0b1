//! Oversized string constants.
//!
//! A constant pool UTF-8 entry holds at most 65535 bytes of modified UTF-8.
//! Obfuscators happily exceed that in dex files, which have no such limit.
//! Such a string is hex encoded, split into chunks that each fit, and
//! rebuilt at run time by a small decoder copied into the class.

use log::{debug, warn};
use rand::Rng;

use crate::dex::nodes::MethodRef;
use crate::dex::{ACC_PRIVATE, ACC_STATIC};
use crate::dex::instructions::InvokeKind;
use crate::error::ConvertError;
use crate::ir::{Constant, Expr, IrMethod, IrType, Stmt, Value};
use crate::jvm::insn::opcodes::*;
use crate::jvm::insn::{CodeBody, JvmInsn, JvmLabel};
use crate::jvm::sink::MethodHeader;

pub const HEX_TEMPLATE: &str = "res/Hex";
const DECODE_STRING: &str = "decode_S";
const DECODE_STRING_DESC: &str = "([Ljava/lang/String;)Ljava/lang/String;";
const DECODE_CHAR: &str = "decode_C";
const DECODE_CHAR_DESC: &str = "(Ljava/lang/String;I)C";
const STRING_ARRAY: &str = "[Ljava/lang/String;";

#[derive(Debug, Clone, PartialEq)]
pub struct TemplateMethod {
    pub name: String,
    pub descriptor: String,
    pub code: CodeBody,
}

/// Helper methods owned by a placeholder class, copied into the classes
/// that need them.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    /// Internal name of the placeholder owner.
    pub owner: String,
    pub methods: Vec<TemplateMethod>,
}

pub trait TemplateProvider {
    fn template(&self, name: &str) -> Option<Template>;
}

/// Ships the hex decoder.
#[derive(Debug, Default, Clone, Copy)]
pub struct BuiltinTemplates;

impl TemplateProvider for BuiltinTemplates {
    fn template(&self, name: &str) -> Option<Template> {
        if name != HEX_TEMPLATE {
            return None;
        }
        Some(Template {
            owner: HEX_TEMPLATE.to_string(),
            methods: vec![
                TemplateMethod {
                    name: DECODE_STRING.to_string(),
                    descriptor: DECODE_STRING_DESC.to_string(),
                    code: decode_string_body(),
                },
                TemplateMethod {
                    name: DECODE_CHAR.to_string(),
                    descriptor: DECODE_CHAR_DESC.to_string(),
                    code: decode_char_body(),
                },
            ],
        })
    }
}

fn invoke(opcode: u8, owner: &str, name: &str, descriptor: &str) -> JvmInsn {
    JvmInsn::Method {
        opcode,
        owner: owner.to_string(),
        name: name.to_string(),
        descriptor: descriptor.to_string(),
        is_interface: false,
    }
}

fn var(opcode: u8, var: u16) -> JvmInsn {
    JvmInsn::Var { opcode, var }
}

// static String decode_S(String[] parts): appends decode_C(part, i) for
// every four digits of every part.
fn decode_string_body() -> CodeBody {
    let (outer, inner, next, done) = (JvmLabel(0), JvmLabel(1), JvmLabel(2), JvmLabel(3));
    let builder = "java/lang/StringBuilder";
    CodeBody {
        instructions: vec![
            JvmInsn::Type { opcode: NEW, type_name: builder.to_string() },
            JvmInsn::Insn(DUP),
            invoke(INVOKESPECIAL, builder, "<init>", "()V"),
            var(ASTORE, 1),
            JvmInsn::Insn(ICONST_0),
            var(ISTORE, 2),
            JvmInsn::Label(outer),
            var(ILOAD, 2),
            var(ALOAD, 0),
            JvmInsn::Insn(ARRAYLENGTH),
            JvmInsn::Jump { opcode: IF_ICMPGE, target: done },
            var(ALOAD, 0),
            var(ILOAD, 2),
            JvmInsn::Insn(AALOAD),
            var(ASTORE, 3),
            JvmInsn::Insn(ICONST_0),
            var(ISTORE, 4),
            JvmInsn::Label(inner),
            var(ILOAD, 4),
            var(ALOAD, 3),
            invoke(INVOKEVIRTUAL, "java/lang/String", "length", "()I"),
            JvmInsn::Jump { opcode: IF_ICMPGE, target: next },
            var(ALOAD, 1),
            var(ALOAD, 3),
            var(ILOAD, 4),
            invoke(INVOKESTATIC, HEX_TEMPLATE, DECODE_CHAR, DECODE_CHAR_DESC),
            invoke(INVOKEVIRTUAL, builder, "append", "(C)Ljava/lang/StringBuilder;"),
            JvmInsn::Insn(POP),
            JvmInsn::Iinc { var: 4, increment: 4 },
            JvmInsn::Jump { opcode: GOTO, target: inner },
            JvmInsn::Label(next),
            JvmInsn::Iinc { var: 2, increment: 1 },
            JvmInsn::Jump { opcode: GOTO, target: outer },
            JvmInsn::Label(done),
            var(ALOAD, 1),
            invoke(INVOKEVIRTUAL, builder, "toString", "()Ljava/lang/String;"),
            JvmInsn::Insn(ARETURN),
        ],
        try_catch_blocks: Vec::new(),
    }
}

// static char decode_C(String s, int i): (char) parseInt(s.substring(i, i + 4), 16)
fn decode_char_body() -> CodeBody {
    CodeBody {
        instructions: vec![
            var(ALOAD, 0),
            var(ILOAD, 1),
            var(ILOAD, 1),
            JvmInsn::Insn(ICONST_4),
            JvmInsn::Insn(IADD),
            invoke(INVOKEVIRTUAL, "java/lang/String", "substring", "(II)Ljava/lang/String;"),
            JvmInsn::push_int(16),
            invoke(INVOKESTATIC, "java/lang/Integer", "parseInt", "(Ljava/lang/String;I)I"),
            JvmInsn::Insn(I2C),
            JvmInsn::Insn(IRETURN),
        ],
        try_catch_blocks: Vec::new(),
    }
}

/// Length of `s` once encoded for the constant pool.
pub fn utf8_length(s: &str) -> usize {
    cesu8::to_java_cesu8(s).len()
}

/// Four lowercase hex digits per UTF-16 unit, split into chunks of at most
/// `max_length` characters.
pub fn hex_chunks(s: &str, max_length: usize) -> Vec<String> {
    let per_chunk = (max_length / 4).max(1);
    let units: Vec<u16> = s.encode_utf16().collect();
    units
        .chunks(per_chunk)
        .map(|chunk| chunk.iter().map(|u| format!("{:04x}", u)).collect())
        .collect()
}

/// Per-class state: the random prefix naming the copied helpers, and
/// whether any method needed them.
pub struct ClassContext {
    /// Internal name of the class being emitted.
    class_name: String,
    template: Option<Template>,
    prefix: Option<String>,
    used: bool,
}

impl ClassContext {
    pub fn new(class_name: &str, provider: &dyn TemplateProvider) -> Self {
        let template = provider.template(HEX_TEMPLATE);
        ClassContext {
            class_name: class_name.to_string(),
            template,
            prefix: None,
            used: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.template.is_some()
    }

    pub fn used(&self) -> bool {
        self.used
    }

    /// Generated once per class and reused for every helper.
    pub fn prefix(&mut self) -> &str {
        self.prefix.get_or_insert_with(|| format!("$dexjvm$hex${:08x}", rand::thread_rng().gen::<u32>()))
    }

    fn helper_name(&mut self, name: &str) -> String {
        format!("{}${}", self.prefix(), name)
    }

    /// Replaces every string operand too long for the constant pool by a
    /// call to the class's copy of the decoder. Returns whether anything was
    /// rewritten.
    pub fn rewrite_long_strings(&mut self, method: &mut IrMethod, max_length: usize) -> Result<bool, ConvertError> {
        let long = |v: &Value| matches!(v, Value::Const(Constant::String(s)) if utf8_length(s) > max_length);
        let has_long = method.blocks.values().any(|b| {
            b.stmts.iter().any(|s| s.values().into_iter().any(long)) || b.terminator.values().into_iter().any(long)
        });
        if !has_long {
            return Ok(false);
        }
        if !self.is_enabled() {
            warn!("no {} template, long strings in {}->{} stay as they are", HEX_TEMPLATE, method.owner, method.name);
            return Ok(false);
        }
        let decoder = MethodRef::new(&method.owner, &self.helper_name(DECODE_STRING), DECODE_STRING_DESC);

        for id in method.layout.clone() {
            let Some(block) = method.block(id) else {
                continue;
            };
            let mut stmts = Vec::with_capacity(block.stmts.len());
            let mut terminator = block.terminator.clone();
            let original = block.stmts.clone();
            for mut stmt in original {
                for value in stmt.values_mut() {
                    self.replace(method, &mut stmts, value, &decoder, max_length);
                }
                stmts.push(stmt);
            }
            for value in terminator.values_mut() {
                self.replace(method, &mut stmts, value, &decoder, max_length);
            }
            if let Some(block) = method.block_mut(id) {
                block.stmts = stmts;
                block.terminator = terminator;
            }
        }
        self.used = true;
        Ok(true)
    }

    fn replace(&self, method: &mut IrMethod, out: &mut Vec<Stmt>, value: &mut Value, decoder: &MethodRef, max_length: usize) {
        let Value::Const(Constant::String(s)) = value else {
            return;
        };
        if utf8_length(s) <= max_length {
            return;
        }
        let chunks = hex_chunks(s, max_length);
        debug!("{}->{}: {} byte string split into {} chunks", method.owner, method.name, utf8_length(s), chunks.len());
        let parts = method.new_local();
        method.locals[parts.0 as usize] = IrType::Ref(STRING_ARRAY.to_string());
        let decoded = method.new_local();
        method.locals[decoded.0 as usize] = IrType::Ref("Ljava/lang/String;".to_string());
        out.push(Stmt::Assign {
            dst: parts,
            expr: Expr::FilledArray {
                class: STRING_ARRAY.to_string(),
                elements: chunks.into_iter().map(|c| Value::Const(Constant::String(c))).collect(),
            },
        });
        out.push(Stmt::Assign {
            dst: decoded,
            expr: Expr::Invoke { kind: InvokeKind::Static, method: decoder.clone(), args: vec![Value::Local(parts)] },
        });
        *value = Value::Local(decoded);
    }

    /// The helpers to append to the class, renamed and calling each other
    /// through the class. Empty when nothing was rewritten.
    pub fn helper_methods(&mut self) -> Vec<(MethodHeader, CodeBody)> {
        if !self.used {
            return Vec::new();
        }
        let Some(template) = self.template.clone() else {
            return Vec::new();
        };
        let names: Vec<String> = template.methods.iter().map(|m| m.name.clone()).collect();
        let mut out = Vec::new();
        for method in template.methods {
            let mut code = method.code;
            for insn in &mut code.instructions {
                if let JvmInsn::Method { owner, name, .. } = insn {
                    if *owner == template.owner {
                        *owner = self.class_name.clone();
                        if names.contains(name) {
                            *name = self.helper_name(name);
                        }
                    }
                }
            }
            let header = MethodHeader {
                access: ACC_PRIVATE | ACC_STATIC,
                name: self.helper_name(&method.name),
                descriptor: method.descriptor,
                signature: None,
                exceptions: Vec::new(),
            };
            out.push((header, code));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::instructions::{DexInstruction, MoveKind};
    use crate::ir::testing::lift_static;

    struct NoTemplates;

    impl TemplateProvider for NoTemplates {
        fn template(&self, _name: &str) -> Option<Template> {
            None
        }
    }

    fn returning(value: &str) -> IrMethod {
        lift_static(
            "()Ljava/lang/String;",
            1,
            vec![
                DexInstruction::ConstString { dest: 0, value: value.to_string() },
                DexInstruction::Return { kind: MoveKind::Object, src: 0 },
            ],
        )
    }

    #[test]
    fn hex_digits_per_utf16_unit() {
        assert_eq!(hex_chunks("A\u{20ac}", 100), vec!["004120ac".to_string()]);
        assert_eq!(hex_chunks("\u{1f600}", 100), vec!["d83dde00".to_string()]);
        let chunks = hex_chunks(&"x".repeat(10), 10);
        assert_eq!(chunks.len(), 5);
        assert!(chunks.iter().all(|c| c.len() <= 10));
    }

    fn decode(chunks: &[String]) -> String {
        let digits: String = chunks.concat();
        let units: Vec<u16> = (0..digits.len())
            .step_by(4)
            .map(|i| u16::from_str_radix(&digits[i..i + 4], 16).unwrap())
            .collect();
        String::from_utf16(&units).unwrap()
    }

    #[test]
    fn chunks_decode_to_the_input() {
        // two units per chunk, the pair of U+1F600 lands on both sides of a boundary
        let text = "a\u{1f600}";
        let chunks = hex_chunks(text, 10);
        assert_eq!(chunks, vec!["0061d83d".to_string(), "de00".to_string()]);
        assert_eq!(decode(&chunks), text);

        let text = "Grüße, \u{4e16}\u{754c} \u{1f30d}\u{1f30e}\u{1f30f}!".repeat(7);
        for max in [4, 7, 10, 13, 65535] {
            let chunks = hex_chunks(&text, max);
            assert!(chunks.iter().all(|c| c.len() <= max.max(4) && c.len() % 4 == 0));
            assert_eq!(decode(&chunks), text, "max {}", max);
        }
    }

    #[test]
    fn prefix_is_stable_per_class() {
        let mut context = ClassContext::new("a/B", &BuiltinTemplates);
        let first = context.prefix().to_string();
        assert!(first.starts_with("$dexjvm$hex$"));
        assert_eq!(first.len(), "$dexjvm$hex$".len() + 8);
        assert_eq!(context.prefix(), first);
    }

    #[test]
    fn long_strings_call_the_class_decoder() {
        let mut m = returning(&"z".repeat(40));
        let mut context = ClassContext::new("a/T", &BuiltinTemplates);
        assert!(context.rewrite_long_strings(&mut m, 16).unwrap());
        let prefix = context.prefix().to_string();
        let call = m
            .stmts()
            .find_map(|s| match s.expr() {
                Some(Expr::Invoke { method, .. }) => Some(method.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(call.owner, "La/T;");
        assert_eq!(call.name, format!("{}$decode_S", prefix));
        let parts = m
            .stmts()
            .find_map(|s| match s.expr() {
                Some(Expr::FilledArray { elements, .. }) => Some(elements.len()),
                _ => None,
            })
            .unwrap();
        assert_eq!(parts, 10);

        let helpers = context.helper_methods();
        assert_eq!(helpers.len(), 2);
        let (header, code) = &helpers[0];
        assert_eq!(header.access, ACC_PRIVATE | ACC_STATIC);
        assert!(code.instructions.iter().any(|i| matches!(
            i,
            JvmInsn::Method { owner, name, .. } if owner == "a/T" && *name == format!("{}$decode_C", prefix)
        )));
    }

    #[test]
    fn short_strings_and_missing_templates_are_left_alone() {
        let mut m = returning("short");
        let mut context = ClassContext::new("a/T", &BuiltinTemplates);
        assert!(!context.rewrite_long_strings(&mut m, 16).unwrap());
        assert!(context.helper_methods().is_empty());

        let mut m = returning(&"z".repeat(40));
        let mut context = ClassContext::new("a/T", &NoTemplates);
        assert!(!context.rewrite_long_strings(&mut m, 16).unwrap());
        assert!(!context.used());
    }
}
