use super::*;
use crate::dex::{ACC_FINAL, ACC_INTERFACE, ACC_PRIVATE, ACC_STATIC, ACC_SYNCHRONIZED};
use crate::jvm::sink::{InnerClassRecord, OuterClassRef};

fn record(name: &str, outer: Option<&str>, inner: Option<&str>, access: u32) -> InnerClassRecord {
    InnerClassRecord {
        name: name.to_string(),
        outer_name: outer.map(str::to_string),
        inner_name: inner.map(str::to_string),
        access,
    }
}

fn program() -> Vec<DexClassNode> {
    let mut outer = class("La/Outer;");
    member_classes(&mut outer, &["La/Outer$Inner;"]);

    let mut inner = class("La/Outer$Inner;");
    inner.access = ACC_PUBLIC | ACC_STATIC | ACC_FINAL;
    enclosing_class(&mut inner, "La/Outer;");
    inner_item(&mut inner, Some("Inner"), (ACC_PUBLIC | ACC_STATIC | ACC_FINAL) as i32);

    let mut anonymous = class("La/Outer$1;");
    enclosing_method(&mut anonymous, MethodRef::new("La/Outer;", "run", "()V"));
    inner_item(&mut anonymous, None, 0);

    vec![outer, inner, anonymous]
}

#[test]
fn member_and_anonymous_classes() {
    let (out, report) = convert(program());
    assert!(report.is_clean());
    assert_eq!(report.classes, 3);

    let outer = out.get("a/Outer").unwrap();
    assert_eq!(
        outer.inner_classes,
        vec![
            record("a/Outer$1", None, None, ACC_PUBLIC),
            record("a/Outer$Inner", Some("a/Outer"), Some("Inner"), ACC_PUBLIC | ACC_STATIC | ACC_FINAL),
        ]
    );
    assert!(outer.outer_class.is_none());

    let inner = out.get("a/Outer$Inner").unwrap();
    assert_eq!(inner.inner_classes.len(), 1);
    assert_eq!(inner.inner_classes[0].outer_name.as_deref(), Some("a/Outer"));
    assert!(inner.outer_class.is_none());
    // the header drops STATIC and FINAL and gains SUPER, which shares its bit with SYNCHRONIZED
    assert_eq!(inner.header.as_ref().unwrap().access, ACC_PUBLIC | ACC_SYNCHRONIZED);

    let anonymous = out.get("a/Outer$1").unwrap();
    assert_eq!(anonymous.inner_classes, vec![record("a/Outer$1", None, None, ACC_PUBLIC)]);
    assert_eq!(
        anonymous.outer_class,
        Some(OuterClassRef {
            owner: "a/Outer".to_string(),
            method_name: Some("run".to_string()),
            method_descriptor: Some("()V".to_string()),
        })
    );
}

#[test]
fn anonymous_class_in_a_field_initialiser_names_its_class() {
    let outer = class("La/Holder;");
    let mut anonymous = class("La/Holder$1;");
    enclosing_class(&mut anonymous, "La/Holder;");
    inner_item(&mut anonymous, None, 0);
    let (out, _) = convert(vec![outer, anonymous]);
    let anonymous = out.get("a/Holder$1").unwrap();
    assert_eq!(
        anonymous.outer_class,
        Some(OuterClassRef { owner: "a/Holder".to_string(), method_name: None, method_descriptor: None })
    );
}

#[test]
fn kotlin_closure_is_left_top_level() {
    let outer = class("La/Main;");
    let mut closure = class("La/Main$main$1;");
    enclosing_method(&mut closure, MethodRef::new("La/Main;", "main", "()V"));
    let (out, _) = convert(vec![outer, closure]);
    let closure = out.get("a/Main$main$1").unwrap();
    assert!(closure.inner_classes.is_empty());
    assert!(closure.outer_class.is_none());
    // the enclosing class still lists it
    let main = out.get("a/Main").unwrap();
    assert_eq!(main.inner_classes, vec![record("a/Main$main$1", None, None, ACC_PUBLIC)]);
}

#[test]
fn self_enclosing_class_is_plain() {
    let mut odd = class("La/Odd;");
    enclosing_class(&mut odd, "La/Odd;");
    member_classes(&mut odd, &["La/Odd;"]);
    let (out, report) = convert(vec![odd]);
    assert!(report.is_clean());
    let odd = out.get("a/Odd").unwrap();
    assert!(odd.inner_classes.is_empty());
    assert!(odd.outer_class.is_none());
}

#[test]
fn nested_super_types_are_recorded() {
    let mut base = class("La/Api$Base;");
    base.access = ACC_PUBLIC | ACC_STATIC;
    enclosing_class(&mut base, "La/Api;");
    inner_item(&mut base, Some("Base"), (ACC_PUBLIC | ACC_STATIC) as i32);

    let mut user = DexClassNode::new(ACC_PUBLIC, "Lb/User;", Some("La/Api$Base;"));
    user.interfaces.push("Lext/Lib$Callback;".to_string());
    let (out, _) = convert(vec![class("La/Api;"), base, user]);

    let user = out.get("b/User").unwrap();
    assert_eq!(
        user.inner_classes,
        vec![
            record("a/Api$Base", Some("a/Api"), Some("Base"), ACC_PUBLIC | ACC_STATIC),
            record("ext/Lib$Callback", Some("ext/Lib"), Some("Callback"), 0x1 | 0x8 | 0x400 | ACC_INTERFACE),
        ]
    );
}

#[test]
fn records_are_sorted_and_unique() {
    let mut top = class("La/Top;");
    member_classes(&mut top, &["La/Top$Z;", "La/Top$A;", "La/Top$Z;"]);
    let mut classes = vec![top];
    for name in ["Z", "A"] {
        let mut inner = class(&format!("La/Top${};", name));
        enclosing_class(&mut inner, "La/Top;");
        inner_item(&mut inner, Some(name), ACC_PRIVATE as i32);
        classes.push(inner);
    }
    let (out, _) = convert(classes);
    let top = out.get("a/Top").unwrap();
    let names: Vec<&str> = top.inner_classes.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["a/Top$A", "a/Top$Z"]);
    assert!(top.inner_classes.iter().all(|r| r.access == ACC_PRIVATE));
}
