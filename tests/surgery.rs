use std::io::Cursor;

use classknife::attribute_info::{
    AttributeInfo, CodeAttribute, ExceptionEntry, StackMapFrame, StackMapFrameInner,
    StackMapTableAttribute,
};
use classknife::code_attribute::{encode_instructions, parse_instructions, Instruction};
use classknife::constant_info::{ConstantInfo, FieldRefConstant};
use classknife::jar_utils::JarFile;
use classknife::method_info::{MethodAccessFlags, MethodInfo};
use classknife::{ClassAccessFlags, ClassFile, RuleSet, Surgeon};

// --- Helpers ---

/// Builds small but verifiable classes directly in memory, so the tests need
/// no JDK on the machine that runs them.
struct ClassAssembler {
    class: ClassFile,
}

impl ClassAssembler {
    fn new(internal_name: &str) -> ClassAssembler {
        let mut class = ClassFile {
            minor_version: 0,
            major_version: 52,
            const_pool_size: 1,
            const_pool: Vec::new(),
            access_flags: ClassAccessFlags::PUBLIC | ClassAccessFlags::SUPER,
            this_class: 0,
            super_class: 0,
            interfaces_count: 0,
            interfaces: Vec::new(),
            fields_count: 0,
            fields: Vec::new(),
            methods_count: 0,
            methods: Vec::new(),
            attributes_count: 0,
            attributes: Vec::new(),
        };
        class.this_class = class.get_or_add_class(internal_name);
        class.super_class = class.get_or_add_class("java/lang/Object");
        ClassAssembler { class }
    }

    fn method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        self.class.get_or_add_method_ref(owner, name, descriptor)
    }

    fn field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.class.get_or_add_class(owner);
        let name_and_type_index = self.class.get_or_add_name_and_type(name, descriptor);
        self.class
            .const_pool
            .push(ConstantInfo::FieldRef(FieldRefConstant {
                class_index,
                name_and_type_index,
            }));
        self.class.const_pool.len() as u16
    }

    fn class_ref(&mut self, name: &str) -> u16 {
        self.class.get_or_add_class(name)
    }

    fn add_method(
        &mut self,
        access_flags: MethodAccessFlags,
        name: &str,
        descriptor: &str,
        max_stack: u16,
        max_locals: u16,
        code: Vec<Instruction>,
        exception_table: Vec<ExceptionEntry>,
    ) {
        self.add_method_with_frames(
            access_flags,
            name,
            descriptor,
            max_stack,
            max_locals,
            code,
            exception_table,
            None,
        );
    }

    fn add_method_with_frames(
        &mut self,
        access_flags: MethodAccessFlags,
        name: &str,
        descriptor: &str,
        max_stack: u16,
        max_locals: u16,
        code: Vec<Instruction>,
        exception_table: Vec<ExceptionEntry>,
        stack_map: Option<StackMapTableAttribute>,
    ) {
        let mut attributes = Vec::new();
        if let Some(table) = stack_map {
            let table_name = self.class.get_or_add_utf8("StackMapTable");
            attributes.push(AttributeInfo::new(table_name, table.encode()));
        }
        let code_attr = CodeAttribute {
            max_stack,
            max_locals,
            code: encode_instructions(&code).unwrap(),
            exception_table,
            attributes,
        };
        let code_name = self.class.get_or_add_utf8("Code");
        let name_index = self.class.get_or_add_utf8(name);
        let descriptor_index = self.class.get_or_add_utf8(descriptor);
        self.class.methods.push(MethodInfo {
            access_flags,
            name_index,
            descriptor_index,
            attributes_count: 1,
            attributes: vec![AttributeInfo::new(code_name, code_attr.encode())],
        });
    }

    fn finish(mut self) -> Vec<u8> {
        self.class.to_bytes().unwrap()
    }
}

fn surgeon(rules: &[&str]) -> Surgeon {
    let _ = env_logger::builder().is_test(true).try_init();
    Surgeon::new(RuleSet::parse(rules.iter().copied()).unwrap())
}

fn method_code(bytes: &[u8], method_name: &str) -> (ClassFile, CodeAttribute) {
    let class = ClassFile::from_bytes(bytes).unwrap();
    let method = class.find_method(method_name).unwrap();
    let code_info = method
        .attributes
        .iter()
        .find(|a| class.get_utf8(a.attribute_name_index).as_deref() == Some("Code"))
        .unwrap()
        .info
        .clone();
    let code = CodeAttribute::parse(&code_info).unwrap();
    (class, code)
}

fn instructions(code: &CodeAttribute) -> Vec<Instruction> {
    parse_instructions(&code.code)
        .unwrap()
        .into_iter()
        .map(|(_, insn)| insn)
        .collect()
}

// --- Selection ---

#[test]
fn untargeted_class_is_left_alone() {
    let mut asm = ClassAssembler::new("fixture/Subject");
    asm.add_method(
        MethodAccessFlags::PUBLIC,
        "work",
        "()V",
        0,
        1,
        vec![Instruction::Return],
        Vec::new(),
    );
    let bytes = asm.finish();

    let surgeon = surgeon(&["com.other.Cls#work#*"]);
    assert!(surgeon.rewrite_class("fixture.Subject", &bytes).unwrap().is_none());
}

#[test]
fn descriptor_must_match_unless_wildcard() {
    let mut asm = ClassAssembler::new("fixture/Subject");
    asm.add_method(
        MethodAccessFlags::PUBLIC,
        "work",
        "(J)V",
        0,
        3,
        vec![Instruction::Return],
        Vec::new(),
    );
    let bytes = asm.finish();

    let mismatch = surgeon(&["fixture.Subject#work#(I)V"]);
    assert!(mismatch.rewrite_class("fixture.Subject", &bytes).unwrap().is_none());

    let wildcard = surgeon(&["fixture.Subject#work#*"]);
    assert!(wildcard.rewrite_class("fixture.Subject", &bytes).unwrap().is_some());
}

#[test]
fn wildcard_method_rule_hits_every_method() {
    let mut asm = ClassAssembler::new("fixture/Subject");
    for name in ["first", "second"] {
        asm.add_method(
            MethodAccessFlags::PUBLIC,
            name,
            "()V",
            0,
            1,
            vec![Instruction::Return],
            Vec::new(),
        );
    }
    let bytes = asm.finish();

    let surgeon = surgeon(&["fixture.Subject#*#*=>trace"]);
    let patched = surgeon.rewrite_class("fixture.Subject", &bytes).unwrap().unwrap();
    for name in ["first", "second"] {
        let (_, code) = method_code(&patched, name);
        assert!(matches!(
            instructions(&code).first(),
            Some(Instruction::Ldc(_) | Instruction::LdcW(_))
        ));
    }
}

#[test]
fn legacy_question_mark_method_rule_hits_every_method() {
    let mut asm = ClassAssembler::new("fixture/Subject");
    asm.add_method(
        MethodAccessFlags::PUBLIC,
        "work",
        "()V",
        0,
        1,
        vec![Instruction::Return],
        Vec::new(),
    );
    let bytes = asm.finish();

    let surgeon = surgeon(&["fixture.Subject#?#*=>trace"]);
    let patched = surgeon.rewrite_class("fixture.Subject", &bytes).unwrap().unwrap();
    let (_, code) = method_code(&patched, "work");
    assert!(matches!(
        instructions(&code).first(),
        Some(Instruction::Ldc(_) | Instruction::LdcW(_))
    ));
}

#[test]
fn descriptor_wildcard_matches_every_overload() {
    let mut asm = ClassAssembler::new("fixture/Subject");
    for descriptor in ["(I)V", "(J)V"] {
        asm.add_method(
            MethodAccessFlags::PUBLIC,
            "m",
            descriptor,
            0,
            3,
            vec![Instruction::Return],
            Vec::new(),
        );
    }
    let bytes = asm.finish();

    let surgeon = surgeon(&["fixture.Subject#m#*=>trace"]);
    let patched = surgeon.rewrite_class("fixture.Subject", &bytes).unwrap().unwrap();
    let class = ClassFile::from_bytes(&patched).unwrap();
    let mut rewritten = 0;
    for method in &class.methods {
        let info = method
            .attributes
            .iter()
            .find(|a| class.get_utf8(a.attribute_name_index).as_deref() == Some("Code"))
            .unwrap()
            .info
            .clone();
        let code = CodeAttribute::parse(&info).unwrap();
        if matches!(
            instructions(&code).first(),
            Some(Instruction::Ldc(_) | Instruction::LdcW(_))
        ) {
            rewritten += 1;
        }
    }
    assert_eq!(rewritten, 2);
}

// --- EmptyBody ---

#[test]
fn empty_body_returns_default_long() {
    let mut asm = ClassAssembler::new("fixture/Subject");
    asm.add_method(
        MethodAccessFlags::PUBLIC,
        "work",
        "(I)J",
        4,
        6,
        vec![
            Instruction::Iload1,
            Instruction::I2l,
            Instruction::Lreturn,
        ],
        vec![ExceptionEntry {
            start_pc: 0,
            end_pc: 2,
            handler_pc: 2,
            catch_type: 0,
        }],
    );
    let bytes = asm.finish();

    let surgeon = surgeon(&["fixture.Subject#work#*"]);
    let patched = surgeon.rewrite_class("fixture.Subject", &bytes).unwrap().unwrap();
    let (_, code) = method_code(&patched, "work");

    assert_eq!(
        instructions(&code),
        vec![Instruction::Lconst0, Instruction::Lreturn]
    );
    assert!(code.exception_table.is_empty());
    assert_eq!(code.max_stack, 2);
    // receiver + one int parameter
    assert_eq!(code.max_locals, 2);
}

#[test]
fn empty_body_string_returns_interned_empty() {
    let mut asm = ClassAssembler::new("fixture/Subject");
    asm.add_method(
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        "label",
        "()Ljava/lang/String;",
        1,
        0,
        vec![Instruction::Aconstnull, Instruction::Areturn],
        Vec::new(),
    );
    let bytes = asm.finish();

    let surgeon = surgeon(&["fixture.Subject#label#*=>empty"]);
    let patched = surgeon.rewrite_class("fixture.Subject", &bytes).unwrap().unwrap();
    let (class, code) = method_code(&patched, "label");

    let insns = instructions(&code);
    assert_eq!(insns.len(), 2);
    let string_index = match insns[0] {
        Instruction::Ldc(index) => index as u16,
        Instruction::LdcW(index) => index,
        ref other => panic!("expected ldc, got {other:?}"),
    };
    match class.constant(string_index).unwrap() {
        ConstantInfo::String(s) => {
            assert_eq!(class.get_utf8(s.string_index).unwrap(), "");
        }
        other => panic!("expected String constant, got {other:?}"),
    }
    assert_eq!(insns[1], Instruction::Areturn);
}

#[test]
fn empty_init_keeps_super_call_and_singleton_store() {
    let mut asm = ClassAssembler::new("fixture/Subject");
    let ctor = asm.method_ref("fixture/Subject", "<init>", "()V");
    let instance = asm.field_ref("fixture/Subject", "INSTANCE", "Lfixture/Subject;");
    let other = asm.field_ref("fixture/Subject", "OTHER", "I");
    let this_class = asm.class_ref("fixture/Subject");
    asm.add_method(
        MethodAccessFlags::STATIC,
        "<clinit>",
        "()V",
        2,
        0,
        vec![
            Instruction::New(this_class),
            Instruction::Dup,
            Instruction::Invokespecial(ctor),
            Instruction::Putstatic(instance),
            Instruction::Iconst5,
            Instruction::Putstatic(other),
            Instruction::Return,
        ],
        Vec::new(),
    );
    let bytes = asm.finish();

    let surgeon = surgeon(&["fixture.Subject#<clinit>#*"]);
    let patched = surgeon.rewrite_class("fixture.Subject", &bytes).unwrap().unwrap();
    let (class, code) = method_code(&patched, "<clinit>");

    let insns = instructions(&code);
    assert_eq!(insns.len(), 5);
    assert!(matches!(insns[0], Instruction::New(_)));
    assert_eq!(insns[1], Instruction::Dup);
    assert!(matches!(insns[2], Instruction::Invokespecial(_)));
    match insns[3] {
        Instruction::Putstatic(index) => {
            assert_eq!(class.field_ref_name(index).unwrap(), "INSTANCE");
        }
        ref other => panic!("expected putstatic, got {other:?}"),
    }
    assert_eq!(insns[4], Instruction::Return);
    // original frame sizes survive
    assert_eq!(code.max_stack, 2);
    assert_eq!(code.max_locals, 0);
}

#[test]
fn empty_init_keeps_exactly_one_super_call() {
    let mut asm = ClassAssembler::new("fixture/Subject");
    let super_ctor = asm.method_ref("java/lang/Object", "<init>", "()V");
    let helper = asm.method_ref("fixture/Subject", "setup", "()V");
    asm.add_method(
        MethodAccessFlags::PUBLIC,
        "<init>",
        "()V",
        2,
        1,
        vec![
            Instruction::Aload0,
            Instruction::Invokespecial(super_ctor),
            Instruction::Aload0,
            Instruction::Invokevirtual(helper),
            Instruction::Return,
        ],
        Vec::new(),
    );
    let bytes = asm.finish();

    let surgeon = surgeon(&["fixture.Subject#<init>#*"]);
    let patched = surgeon.rewrite_class("fixture.Subject", &bytes).unwrap().unwrap();
    let (_, code) = method_code(&patched, "<init>");

    let insns = instructions(&code);
    let super_calls = insns
        .iter()
        .filter(|insn| matches!(insn, Instruction::Invokespecial(_)))
        .count();
    assert_eq!(super_calls, 1);
    assert!(!insns
        .iter()
        .any(|insn| matches!(insn, Instruction::Invokevirtual(_))));
    assert_eq!(insns.last(), Some(&Instruction::Return));
}

// --- RemoveInvoke ---

#[test]
fn remove_invoke_balances_the_stack() {
    let mut asm = ClassAssembler::new("fixture/Subject");
    let sleep = asm.method_ref("java/lang/Thread", "sleep", "(J)V");
    asm.add_method(
        MethodAccessFlags::PUBLIC,
        "caller",
        "()V",
        3,
        1,
        vec![
            Instruction::Aconstnull,
            Instruction::Lconst0,
            Instruction::Invokevirtual(sleep),
            Instruction::Return,
        ],
        Vec::new(),
    );
    let bytes = asm.finish();

    let surgeon = surgeon(&["fixture.Subject#caller#*=>java.lang.Thread#sleep#(J)V"]);
    let patched = surgeon.rewrite_class("fixture.Subject", &bytes).unwrap().unwrap();
    let (_, code) = method_code(&patched, "caller");

    assert_eq!(
        instructions(&code),
        vec![
            Instruction::Aconstnull,
            Instruction::Lconst0,
            Instruction::Pop2,
            Instruction::Pop,
            Instruction::Return,
        ]
    );
}

#[test]
fn remove_invoke_retargets_branches_over_the_gap() {
    let mut asm = ClassAssembler::new("fixture/Subject");
    let log = asm.method_ref("util/Log", "d", "()V");
    // 0: iconst_0, 1: ifeq -> 7, 4: invokestatic d()V, 7: return
    asm.add_method(
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        "caller",
        "()V",
        1,
        0,
        vec![
            Instruction::Iconst0,
            Instruction::Ifeq(6),
            Instruction::Invokestatic(log),
            Instruction::Return,
        ],
        Vec::new(),
    );
    let bytes = asm.finish();

    let surgeon = surgeon(&["fixture.Subject#caller#*=>util.Log#d#*"]);
    let patched = surgeon.rewrite_class("fixture.Subject", &bytes).unwrap().unwrap();
    let (_, code) = method_code(&patched, "caller");

    // no-arg static call vanishes without pops; the branch tightens to the
    // surviving return
    assert_eq!(
        instructions(&code),
        vec![
            Instruction::Iconst0,
            Instruction::Ifeq(3),
            Instruction::Return,
        ]
    );
}

#[test]
fn remove_invoke_keeps_frame_at_branch_target() {
    let mut asm = ClassAssembler::new("fixture/Subject");
    let log = asm.method_ref("util/Log", "d", "()V");
    // 0: iconst_0, 1: ifeq -> 4, 4: invokestatic d()V, 7: return,
    // frame at the branch target 4
    asm.add_method_with_frames(
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        "caller",
        "()V",
        1,
        0,
        vec![
            Instruction::Iconst0,
            Instruction::Ifeq(3),
            Instruction::Invokestatic(log),
            Instruction::Return,
        ],
        Vec::new(),
        Some(StackMapTableAttribute {
            entries: vec![StackMapFrame {
                frame_type: 4,
                inner: StackMapFrameInner::SameFrame,
            }],
        }),
    );
    let bytes = asm.finish();

    let surgeon = surgeon(&["fixture.Subject#caller#*=>util.Log#d#*"]);
    let patched = surgeon.rewrite_class("fixture.Subject", &bytes).unwrap().unwrap();
    let (class, code) = method_code(&patched, "caller");

    // the call vanishes and the branch tightens to the return
    assert_eq!(
        instructions(&code),
        vec![
            Instruction::Iconst0,
            Instruction::Ifeq(3),
            Instruction::Return,
        ]
    );

    // the deleted target's frame moves with the branch to the return at 4
    let stack_map = code
        .attributes
        .iter()
        .find(|a| class.get_utf8(a.attribute_name_index).as_deref() == Some("StackMapTable"))
        .unwrap();
    let table = StackMapTableAttribute::parse(&stack_map.info).unwrap();
    assert_eq!(table.entries.len(), 1);
    assert_eq!(table.entries[0].frame_type, 4);
}

// --- ChangeInvoke ---

#[test]
fn change_invoke_redirects_to_static_with_receiver_param() {
    let mut asm = ClassAssembler::new("fixture/Subject");
    let target = asm.method_ref("a/B", "m", "(I)V");
    asm.add_method(
        MethodAccessFlags::PUBLIC,
        "caller",
        "()V",
        2,
        1,
        vec![
            Instruction::Aconstnull,
            Instruction::Iconst0,
            Instruction::Invokevirtual(target),
            Instruction::Return,
        ],
        Vec::new(),
    );
    let bytes = asm.finish();

    let surgeon = surgeon(&["fixture.Subject#caller#*=>a.B#m#(I)V->x.Y"]);
    let patched = surgeon.rewrite_class("fixture.Subject", &bytes).unwrap().unwrap();
    let (class, code) = method_code(&patched, "caller");

    let insns = instructions(&code);
    match insns[2] {
        Instruction::Invokestatic(index) => {
            let (owner, name, descriptor) = class.method_ref_parts(index).unwrap();
            assert_eq!(owner, "x/Y");
            assert_eq!(name, "m");
            assert_eq!(descriptor, "(La/B;I)V");
        }
        ref other => panic!("expected invokestatic, got {other:?}"),
    }
}

#[test]
fn change_invoke_static_keeps_descriptor() {
    let mut asm = ClassAssembler::new("fixture/Subject");
    let target = asm.method_ref("a/B", "m", "(I)V");
    asm.add_method(
        MethodAccessFlags::PUBLIC | MethodAccessFlags::STATIC,
        "caller",
        "()V",
        1,
        0,
        vec![
            Instruction::Iconst0,
            Instruction::Invokestatic(target),
            Instruction::Return,
        ],
        Vec::new(),
    );
    let bytes = asm.finish();

    let surgeon = surgeon(&["fixture.Subject#caller#*=>a.B#m#*->x.Y"]);
    let patched = surgeon.rewrite_class("fixture.Subject", &bytes).unwrap().unwrap();
    let (class, code) = method_code(&patched, "caller");

    match instructions(&code)[1] {
        Instruction::Invokestatic(index) => {
            let (owner, _, descriptor) = class.method_ref_parts(index).unwrap();
            assert_eq!(owner, "x/Y");
            assert_eq!(descriptor, "(I)V");
        }
        ref other => panic!("expected invokestatic, got {other:?}"),
    }
}

#[test]
fn change_invoke_with_fully_wildcarded_inner_signature() {
    let mut asm = ClassAssembler::new("fixture/Subject");
    let log_a = asm.method_ref("any/Owner", "log", "(Ljava/lang/String;)V");
    let log_b = asm.method_ref("other/Owner", "log", "(I)I");
    asm.add_method(
        MethodAccessFlags::PUBLIC,
        "caller",
        "(I)V",
        2,
        2,
        vec![
            Instruction::Aconstnull,
            Instruction::Aconstnull,
            Instruction::Invokevirtual(log_a),
            Instruction::Aconstnull,
            Instruction::Iconst0,
            Instruction::Invokevirtual(log_b),
            Instruction::Pop,
            Instruction::Return,
        ],
        Vec::new(),
    );
    let bytes = asm.finish();

    let surgeon = surgeon(&["fixture.Subject#caller#(I)V=>*#log#*->redirect.Logger"]);
    let patched = surgeon.rewrite_class("fixture.Subject", &bytes).unwrap().unwrap();
    let (class, code) = method_code(&patched, "caller");

    let redirected: Vec<(String, String, String)> = instructions(&code)
        .iter()
        .filter_map(|insn| match insn {
            Instruction::Invokestatic(index) => class.method_ref_parts(*index),
            _ => None,
        })
        .collect();
    assert_eq!(redirected.len(), 2);
    assert_eq!(redirected[0].0, "redirect/Logger");
    assert_eq!(redirected[0].2, "(Lany/Owner;Ljava/lang/String;)V");
    assert_eq!(redirected[1].0, "redirect/Logger");
    assert_eq!(redirected[1].2, "(Lother/Owner;I)I");
}

// --- TryCatchBody ---

#[test]
fn try_catch_wraps_body_with_catch_all_handler() {
    let mut asm = ClassAssembler::new("fixture/Subject");
    asm.add_method(
        MethodAccessFlags::PUBLIC,
        "risky",
        "()I",
        1,
        1,
        vec![Instruction::Iconst0, Instruction::Ireturn],
        Vec::new(),
    );
    let bytes = asm.finish();

    let surgeon = surgeon(&["fixture.Subject#risky#*=>trycatch"]);
    let patched = surgeon.rewrite_class("fixture.Subject", &bytes).unwrap().unwrap();
    let (class, code) = method_code(&patched, "risky");

    let insns = instructions(&code);
    assert_eq!(insns[0], Instruction::Iconst0);
    assert_eq!(insns[1], Instruction::Ireturn);
    // handler: store past original locals, reload, print, default-return
    assert_eq!(insns[2], Instruction::Astore1);
    assert_eq!(insns[3], Instruction::Aload1);
    match insns[4] {
        Instruction::Invokevirtual(index) => {
            let (owner, name, _) = class.method_ref_parts(index).unwrap();
            assert_eq!(owner, "java/lang/Throwable");
            assert_eq!(name, "printStackTrace");
        }
        ref other => panic!("expected invokevirtual, got {other:?}"),
    }
    assert_eq!(insns[5], Instruction::Iconst0);
    assert_eq!(insns[6], Instruction::Ireturn);

    assert_eq!(code.exception_table.len(), 1);
    let entry = &code.exception_table[0];
    assert_eq!(entry.start_pc, 0);
    assert_eq!(entry.end_pc, 2);
    assert_eq!(entry.handler_pc, 2);
    match class.constant(entry.catch_type).unwrap() {
        ConstantInfo::Class(c) => {
            assert_eq!(class.get_utf8(c.name_index).unwrap(), "java/lang/Throwable");
        }
        other => panic!("expected Class constant, got {other:?}"),
    }

    assert_eq!(code.max_stack, 2);
    assert_eq!(code.max_locals, 2);

    // handler frame: same_locals_1_stack_item at bci 2
    let stack_map = code
        .attributes
        .iter()
        .find(|a| class.get_utf8(a.attribute_name_index).as_deref() == Some("StackMapTable"))
        .unwrap();
    let table = StackMapTableAttribute::parse(&stack_map.info).unwrap();
    assert_eq!(table.entries.len(), 1);
    assert_eq!(table.entries[0].frame_type, 64 + 2);
}

// --- TraceBody ---

#[test]
fn trace_brackets_every_exit() {
    let mut asm = ClassAssembler::new("fixture/Subject");
    // 0: iconst_0, 1: ifeq -> 5, 4: return, 5: return
    asm.add_method(
        MethodAccessFlags::PUBLIC,
        "work",
        "()V",
        1,
        1,
        vec![
            Instruction::Iconst0,
            Instruction::Ifeq(4),
            Instruction::Return,
            Instruction::Return,
        ],
        Vec::new(),
    );
    let bytes = asm.finish();

    let surgeon = surgeon(&["fixture.Subject#work#*=>trace"]);
    let patched = surgeon.rewrite_class("fixture.Subject", &bytes).unwrap().unwrap();
    let (class, code) = method_code(&patched, "work");

    let located = parse_instructions(&code.code).unwrap();
    let insns: Vec<&Instruction> = located.iter().map(|(_, i)| i).collect();

    // section name pushed, then beginSection
    let section_index = match insns[0] {
        Instruction::Ldc(index) => *index as u16,
        Instruction::LdcW(index) => *index,
        other => panic!("expected ldc, got {other:?}"),
    };
    match class.constant(section_index).unwrap() {
        ConstantInfo::String(s) => {
            assert_eq!(
                class.get_utf8(s.string_index).unwrap(),
                "fixture/Subject#work"
            );
        }
        other => panic!("expected String constant, got {other:?}"),
    }
    let called = |insn: &Instruction| -> Option<String> {
        match insn {
            Instruction::Invokestatic(index) => {
                class.method_ref_parts(*index).map(|(_, name, _)| name)
            }
            _ => None,
        }
    };
    assert_eq!(called(insns[1]).as_deref(), Some("beginSection"));

    // every return is preceded by endSection
    for (position, insn) in insns.iter().enumerate() {
        if insn.is_return() {
            assert_eq!(called(insns[position - 1]).as_deref(), Some("endSection"));
        }
    }

    // the branch lands on the endSection in front of its original target,
    // not past it
    let (branch_address, branch) = located
        .iter()
        .find(|(_, insn)| matches!(insn, Instruction::Ifeq(_)))
        .unwrap();
    let Instruction::Ifeq(offset) = branch else {
        unreachable!()
    };
    let target = (*branch_address as i64 + *offset as i64) as u32;
    let (_, landed) = located.iter().find(|(addr, _)| *addr == target).unwrap();
    assert_eq!(called(landed).as_deref(), Some("endSection"));

    assert_eq!(code.max_stack, 2);
}

// --- Pass combination ---

#[test]
fn empty_body_supersedes_other_actions() {
    let mut asm = ClassAssembler::new("fixture/Subject");
    asm.add_method(
        MethodAccessFlags::PUBLIC,
        "work",
        "()V",
        0,
        1,
        vec![Instruction::Return],
        Vec::new(),
    );
    let bytes = asm.finish();

    let surgeon = surgeon(&[
        "fixture.Subject#work#*=>trace",
        "fixture.Subject#work#*=>empty",
    ]);
    let patched = surgeon.rewrite_class("fixture.Subject", &bytes).unwrap().unwrap();
    let (_, code) = method_code(&patched, "work");
    assert_eq!(instructions(&code), vec![Instruction::Return]);
}

#[test]
fn trace_and_remove_compose() {
    let mut asm = ClassAssembler::new("fixture/Subject");
    let call = asm.method_ref("a/B", "call", "()V");
    asm.add_method(
        MethodAccessFlags::PUBLIC,
        "work",
        "()V",
        1,
        1,
        vec![
            Instruction::Aload0,
            Instruction::Invokevirtual(call),
            Instruction::Return,
        ],
        Vec::new(),
    );
    let bytes = asm.finish();

    let surgeon = surgeon(&[
        "fixture.Subject#work#*=>a.B#call#*",
        "fixture.Subject#work#*=>trace",
    ]);
    let patched = surgeon.rewrite_class("fixture.Subject", &bytes).unwrap().unwrap();
    let (class, code) = method_code(&patched, "work");

    let insns = instructions(&code);
    let name_of = |insn: &Instruction| -> Option<String> {
        match insn {
            Instruction::Invokestatic(index) | Instruction::Invokevirtual(index) => {
                class.method_ref_parts(*index).map(|(_, name, _)| name)
            }
            _ => None,
        }
    };

    // the removed call is gone entirely
    assert!(!insns
        .iter()
        .any(|insn| name_of(insn).as_deref() == Some("call")));
    // one begin right after the section-name push, one end per return
    assert_eq!(name_of(&insns[1]).as_deref(), Some("beginSection"));
    let begins = insns
        .iter()
        .filter(|i| name_of(i).as_deref() == Some("beginSection"))
        .count();
    let ends = insns
        .iter()
        .filter(|i| name_of(i).as_deref() == Some("endSection"))
        .count();
    let returns = insns.iter().filter(|i| i.is_return()).count();
    assert_eq!(begins, 1);
    assert_eq!(ends, returns);
}

#[test]
fn trace_wraps_outside_try_catch() {
    let mut asm = ClassAssembler::new("fixture/Subject");
    asm.add_method(
        MethodAccessFlags::PUBLIC,
        "work",
        "()V",
        0,
        1,
        vec![Instruction::Return],
        Vec::new(),
    );
    let bytes = asm.finish();

    let surgeon = surgeon(&[
        "fixture.Subject#work#*=>trycatch",
        "fixture.Subject#work#*=>trace",
    ]);
    let patched = surgeon.rewrite_class("fixture.Subject", &bytes).unwrap().unwrap();
    let (class, code) = method_code(&patched, "work");

    // the catch-all region starts after the beginSection prologue
    assert_eq!(code.exception_table.len(), 1);
    let entry = &code.exception_table[0];
    let located = parse_instructions(&code.code).unwrap();
    assert!(matches!(
        located[0].1,
        Instruction::Ldc(_) | Instruction::LdcW(_)
    ));
    assert_eq!(entry.start_pc as u32, located[2].0);

    // handler's default return is also traced
    let handler_tail: Vec<&Instruction> = located
        .iter()
        .filter(|(addr, _)| *addr >= entry.handler_pc as u32)
        .map(|(_, insn)| insn)
        .collect();
    assert!(handler_tail.iter().any(|insn| matches!(
        insn,
        Instruction::Invokestatic(index)
            if matches!(class.method_ref_parts(*index), Some((_, ref n, _)) if n == "endSection")
    )));
}

// --- Jars ---

#[test]
fn rewrite_jar_touches_only_targeted_classes() {
    let mut asm = ClassAssembler::new("fixture/Subject");
    asm.add_method(
        MethodAccessFlags::PUBLIC,
        "work",
        "()V",
        0,
        1,
        vec![Instruction::Return],
        Vec::new(),
    );
    let subject = asm.finish();

    let mut other = ClassAssembler::new("fixture/Other");
    other.add_method(
        MethodAccessFlags::PUBLIC,
        "work",
        "()V",
        0,
        1,
        vec![Instruction::Return],
        Vec::new(),
    );
    let other = other.finish();

    let mut jar = JarFile::new();
    jar.set_entry("fixture/Subject.class", subject.clone());
    jar.set_entry("fixture/Other.class", other.clone());
    jar.set_entry("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n".to_vec());

    let surgeon = surgeon(&["fixture.Subject#work#*=>trace"]);
    let rewritten = surgeon.rewrite_jar(&mut jar).unwrap();
    assert_eq!(rewritten, 1);

    assert_ne!(jar.entry("fixture/Subject.class").unwrap(), &subject[..]);
    assert_eq!(jar.entry("fixture/Other.class").unwrap(), &other[..]);
    assert_eq!(
        jar.entry("META-INF/MANIFEST.MF").unwrap(),
        b"Manifest-Version: 1.0\n"
    );

    // round trip through the archive codec
    let mut buffer = Cursor::new(Vec::new());
    jar.to_writer(&mut buffer).unwrap();
    buffer.set_position(0);
    let reloaded = JarFile::from_reader(buffer).unwrap();
    assert_eq!(reloaded.len(), 3);
}
