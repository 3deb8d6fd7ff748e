//! The method-level rewriting passes.
//!
//! Each pass edits a planned unit list in place. They run in fixed order
//! (remove, change, try/catch wrap, trace wrap), so call-site edits settle
//! before the body wrappers measure their region, and the trace bracket ends
//! up outside the catch-all region.

use log::info;

use crate::code_attribute::{ldc, Instruction};
use crate::rules::matcher::matches_call_site;
use crate::rules::MethodSignature;
use crate::types::ClassFile;

use super::default_value::emit_default_return;
use super::layout::{CodeUnit, Mark, SyntheticHandler};
use super::size::parameter_slots;
use super::SurgeryError;

const THROWABLE_CLASS: &str = "java/lang/Throwable";
const TRACE_CLASS: &str = "android/os/Trace";
/// `Trace.beginSection` rejects names longer than 127; keep the tail, which
/// carries the method name.
const TRACE_SECTION_MAX: usize = 126;

/// Identity of the method being rewritten, for pool lookups and logging.
pub struct MethodContext {
    /// Internal (slash) name of the enclosing class.
    pub class_name: String,
    pub method_name: String,
    pub descriptor: String,
    pub is_static: bool,
    /// `max_locals` of the original code attribute.
    pub max_locals: u16,
}

impl MethodContext {
    pub fn qualified_name(&self) -> String {
        format!("{}#{}", self.class_name, self.method_name)
    }
}

/// Delete every call instruction matching one of `targets`, replacing it
/// with pops that discard the operands it would have consumed. Returns
/// whether anything matched.
pub fn apply_remove_invoke(
    class: &ClassFile,
    ctx: &MethodContext,
    units: &mut Vec<CodeUnit>,
    targets: &[&MethodSignature],
) -> Result<bool, SurgeryError> {
    let mut changed = false;
    let mut index = 0;
    while index < units.len() {
        let unit = &units[index];
        let Some((owner, name, descriptor)) = resolve_call(class, unit) else {
            index += 1;
            continue;
        };
        if !targets
            .iter()
            .any(|t| matches_call_site(t, &owner, &name, &descriptor))
        {
            index += 1;
            continue;
        }

        info!(
            "remove invoke {owner}#{name}{descriptor} from {}",
            ctx.qualified_name()
        );
        let mut pops = operand_pops(&unit.insn, &descriptor)?;
        // The call's offset lives on in the first pop, so branches and
        // frames aimed at the call still resolve here.
        if let Some(first) = pops.first_mut() {
            first.origin = units[index].origin;
            first.mark = units[index].mark;
        }
        let count = pops.len();
        units.splice(index..=index, pops);
        index += count;
        changed = true;
    }
    Ok(changed)
}

/// Redirect every call matching a target signature to a static method of
/// the paired class. Instance calls carry their receiver as a new leading
/// parameter. Returns whether anything matched.
pub fn apply_change_invoke(
    class: &mut ClassFile,
    ctx: &MethodContext,
    units: &mut [CodeUnit],
    targets: &[(&MethodSignature, &str)],
) -> Result<bool, SurgeryError> {
    let mut changed = false;
    for index in 0..units.len() {
        let Some((owner, name, descriptor)) = resolve_call(class, &units[index]) else {
            continue;
        };
        let Some((_, to_class)) = targets
            .iter()
            .find(|(t, _)| matches_call_site(t, &owner, &name, &descriptor))
        else {
            continue;
        };

        let new_descriptor = if matches!(units[index].insn, Instruction::Invokestatic(_)) {
            descriptor.clone()
        } else {
            format!("(L{owner};{}", &descriptor[1..])
        };
        info!(
            "change invoke {owner}#{name}{descriptor} to {to_class}#{name}{new_descriptor} in {}",
            ctx.qualified_name()
        );
        let target_ref = class.get_or_add_method_ref(to_class, &name, &new_descriptor);
        units[index].insn = Instruction::Invokestatic(target_ref);
        changed = true;
    }
    Ok(changed)
}

/// Wrap the whole body in a catch-all handler. The handler stores the
/// exception in a fresh local past the original frame, prints its stack
/// trace and returns the method's default value. The caller materializes
/// the region and handler frame from the returned [`SyntheticHandler`]
/// during relayout.
pub fn apply_try_catch(
    class: &mut ClassFile,
    ctx: &MethodContext,
    units: &mut Vec<CodeUnit>,
) -> Result<SyntheticHandler, SurgeryError> {
    info!("wrap try/catch around {}", ctx.qualified_name());
    if let Some(first) = units.first_mut() {
        first.mark = Some(Mark::TryStart);
    }

    let exception_slot = ctx.max_locals;
    let print_stack_trace =
        class.get_or_add_method_ref(THROWABLE_CLASS, "printStackTrace", "()V");
    let (default_return, _) = emit_default_return(class, &ctx.descriptor)?;

    let mut handler = vec![
        CodeUnit::synthetic(store_reference(exception_slot)),
        CodeUnit::synthetic(load_reference(exception_slot)),
        CodeUnit::synthetic(Instruction::Invokevirtual(print_stack_trace)),
    ];
    handler.extend(default_return.into_iter().map(CodeUnit::synthetic));
    handler[0].mark = Some(Mark::HandlerStart);
    units.extend(handler);

    Ok(SyntheticHandler {
        catch_class: class.get_or_add_class(THROWABLE_CLASS),
    })
}

/// Bracket the body with `Trace.beginSection`/`endSection`. The end call is
/// planted before every method exit, sharing the exit's offset so jumps to
/// a shared return still pass through it.
pub fn apply_trace(
    class: &mut ClassFile,
    ctx: &MethodContext,
    units: &mut Vec<CodeUnit>,
) -> Result<(), SurgeryError> {
    let qualified = ctx.qualified_name();
    info!("wrap trace section around {qualified}");
    let section_string = class.get_or_add_string(section_name(&qualified));
    let begin =
        class.get_or_add_method_ref(TRACE_CLASS, "beginSection", "(Ljava/lang/String;)V");
    let end = class.get_or_add_method_ref(TRACE_CLASS, "endSection", "()V");

    let mut index = 0;
    while index < units.len() {
        if units[index].insn.is_method_exit() {
            let mut end_unit = CodeUnit::synthetic(Instruction::Invokestatic(end));
            end_unit.origin = units[index].origin;
            // A mark on the exit belongs to this position, not to the exit
            // instruction; the catch-all region keeps starting here.
            end_unit.mark = units[index].mark.take();
            units.insert(index, end_unit);
            index += 1;
        }
        index += 1;
    }

    units.insert(0, CodeUnit::synthetic(ldc(section_string)));
    units.insert(1, CodeUnit::synthetic(Instruction::Invokestatic(begin)));
    Ok(())
}

/// Empty a constructor while keeping it verifiable: everything up to and
/// including the superclass `<init>` call stays, and from the rest only
/// singleton `INSTANCE` field stores and returns survive.
pub fn apply_empty_init(
    class: &ClassFile,
    ctx: &MethodContext,
    units: &mut Vec<CodeUnit>,
) -> bool {
    let Some(super_init) = units.iter().position(|unit| {
        matches!(unit.insn, Instruction::Invokespecial(index)
            if matches!(class.method_ref_parts(index), Some((_, ref name, _)) if name == "<init>"))
    }) else {
        return false;
    };

    info!("empty constructor body of {}", ctx.qualified_name());
    let mut kept: Vec<CodeUnit> = units.drain(..=super_init).collect();
    for unit in units.drain(..) {
        let keep = match unit.insn {
            Instruction::Putstatic(index) => {
                matches!(class.field_ref_name(index), Some(ref name) if name == "INSTANCE")
            }
            ref insn => insn.is_return(),
        };
        if keep {
            kept.push(unit);
        }
    }
    *units = kept;
    true
}

fn resolve_call(class: &ClassFile, unit: &CodeUnit) -> Option<(String, String, String)> {
    class.method_ref_parts(unit.insn.invoke_target()?)
}

/// Pops that discard a call's receiver and arguments, top of stack first.
fn operand_pops(
    call: &Instruction,
    descriptor: &str,
) -> Result<Vec<CodeUnit>, SurgeryError> {
    let has_receiver = matches!(
        call,
        Instruction::Invokevirtual(_)
            | Instruction::Invokespecial(_)
            | Instruction::Invokeinterface { .. }
    );
    let widths = parameter_slots(descriptor)?;
    let mut pops = Vec::with_capacity(widths.len() + 1);
    for width in widths.iter().rev() {
        pops.push(CodeUnit::synthetic(if *width == 2 {
            Instruction::Pop2
        } else {
            Instruction::Pop
        }));
    }
    if has_receiver {
        pops.push(CodeUnit::synthetic(Instruction::Pop));
    }
    Ok(pops)
}

fn store_reference(slot: u16) -> Instruction {
    match slot {
        0 => Instruction::Astore0,
        1 => Instruction::Astore1,
        2 => Instruction::Astore2,
        3 => Instruction::Astore3,
        4..=255 => Instruction::Astore(slot as u8),
        _ => Instruction::AstoreWide(slot),
    }
}

fn load_reference(slot: u16) -> Instruction {
    match slot {
        0 => Instruction::Aload0,
        1 => Instruction::Aload1,
        2 => Instruction::Aload2,
        3 => Instruction::Aload3,
        4..=255 => Instruction::Aload(slot as u8),
        _ => Instruction::AloadWide(slot),
    }
}

/// Tail of the qualified name that fits the tracing limit, cut on a char
/// boundary.
fn section_name(qualified: &str) -> &str {
    if qualified.len() <= TRACE_SECTION_MAX {
        return qualified;
    }
    let mut cut = qualified.len() - TRACE_SECTION_MAX;
    while !qualified.is_char_boundary(cut) {
        cut += 1;
    }
    &qualified[cut..]
}
