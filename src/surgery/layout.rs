//! Planned code layout.
//!
//! Rewriters never splice raw bytes. A method body is decoded into
//! [`CodeUnit`]s whose branch targets are held as absolute offsets into the
//! *original* code array; passes insert, delete and replace units freely,
//! and a final [`relayout`] assigns fresh addresses, re-resolves every
//! branch, and carries the exception table and `StackMapTable` across.
//!
//! A target whose instruction was deleted resolves to the next surviving
//! original instruction, which preserves fall-through semantics for jumps
//! into a removed region.

use std::collections::BTreeMap;

use crate::attribute_info::{
    ExceptionEntry, StackMapFrame, StackMapFrameInner, StackMapTableAttribute,
    VerificationTypeInfo,
};
use crate::code_attribute::{encode_instructions, instruction_size, parse_instructions, Instruction};

use super::SurgeryError;

/// Position of interest inside a unit list, attached by the try/catch
/// rewriter and resolved to real pcs during relayout.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mark {
    TryStart,
    HandlerStart,
}

/// One instruction in the planned layout.
#[derive(Clone, Debug)]
pub struct CodeUnit {
    /// Offset this instruction had in the original code array, `None` for
    /// synthesized instructions.
    pub origin: Option<u32>,
    pub insn: Instruction,
    /// Absolute original offsets of every branch target, in the order the
    /// instruction's offset operands appear.
    pub targets: Vec<u32>,
    pub mark: Option<Mark>,
}

impl CodeUnit {
    pub fn synthetic(insn: Instruction) -> CodeUnit {
        CodeUnit {
            origin: None,
            insn,
            targets: Vec::new(),
            mark: None,
        }
    }
}

/// Decode a code array into units with resolved absolute branch targets.
pub fn decode_units(code: &[u8]) -> Result<Vec<CodeUnit>, SurgeryError> {
    let units = parse_instructions(code)?
        .into_iter()
        .map(|(address, insn)| CodeUnit {
            origin: Some(address),
            targets: branch_targets(address, &insn),
            insn,
            mark: None,
        })
        .collect();
    Ok(units)
}

fn branch_targets(address: u32, insn: &Instruction) -> Vec<u32> {
    let abs16 = |offset: &i16| (address as i64 + *offset as i64) as u32;
    let abs32 = |offset: &i32| (address as i64 + *offset as i64) as u32;
    match insn {
        Instruction::Ifeq(o)
        | Instruction::Ifne(o)
        | Instruction::Iflt(o)
        | Instruction::Ifge(o)
        | Instruction::Ifgt(o)
        | Instruction::Ifle(o)
        | Instruction::IfIcmpeq(o)
        | Instruction::IfIcmpne(o)
        | Instruction::IfIcmplt(o)
        | Instruction::IfIcmpge(o)
        | Instruction::IfIcmpgt(o)
        | Instruction::IfIcmple(o)
        | Instruction::IfAcmpeq(o)
        | Instruction::IfAcmpne(o)
        | Instruction::Ifnull(o)
        | Instruction::Ifnonnull(o)
        | Instruction::Goto(o)
        | Instruction::Jsr(o) => vec![abs16(o)],
        Instruction::GotoW(o) | Instruction::JsrW(o) => vec![abs32(o)],
        Instruction::Tableswitch {
            default, offsets, ..
        } => {
            let mut targets = Vec::with_capacity(offsets.len() + 1);
            targets.push(abs32(default));
            targets.extend(offsets.iter().map(abs32));
            targets
        }
        Instruction::Lookupswitch { default, pairs, .. } => {
            let mut targets = Vec::with_capacity(pairs.len() + 1);
            targets.push(abs32(default));
            targets.extend(pairs.iter().map(|(_, offset)| abs32(offset)));
            targets
        }
        _ => Vec::new(),
    }
}

/// Catch-all region to materialize from the units' [`Mark`]s.
#[derive(Copy, Clone, Debug)]
pub struct SyntheticHandler {
    /// Constant pool index of the exception class caught, also used as the
    /// handler frame's stack item.
    pub catch_class: u16,
}

pub struct RelayoutInput<'a> {
    pub exception_table: &'a [ExceptionEntry],
    pub stack_map: Option<&'a StackMapTableAttribute>,
    pub synthetic_handler: Option<SyntheticHandler>,
}

pub struct RelayoutOutput {
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionEntry>,
    pub stack_map: Option<StackMapTableAttribute>,
}

/// Assign final addresses, re-resolve branches, remap the exception table
/// and stack map frames, and encode the code array.
pub fn relayout(
    units: &[CodeUnit],
    input: RelayoutInput<'_>,
    method_id: &str,
) -> Result<RelayoutOutput, SurgeryError> {
    // Pass one: addresses. Instruction sizes depend only on the address
    // (switch padding), never on the final offset values, so one pass
    // settles the layout.
    let mut addresses = Vec::with_capacity(units.len());
    let mut cursor: u32 = 0;
    for unit in units {
        addresses.push(cursor);
        cursor += instruction_size(&unit.insn, cursor)?;
    }
    let code_len = cursor;
    if code_len > u16::MAX as u32 {
        return Err(SurgeryError::MethodTooLarge {
            method: method_id.to_string(),
        });
    }

    // Surviving originals, ascending by origin since passes keep order.
    let survivors: Vec<(u32, u32)> = units
        .iter()
        .zip(&addresses)
        .filter_map(|(unit, &address)| unit.origin.map(|origin| (origin, address)))
        .collect();
    let map_offset = |original: u32| -> u32 {
        let at = survivors.partition_point(|&(origin, _)| origin < original);
        survivors.get(at).map_or(code_len, |&(_, address)| address)
    };

    // Pass two: branches.
    let mut retargeted = Vec::with_capacity(units.len());
    for (unit, &address) in units.iter().zip(&addresses) {
        retargeted.push(reresolve(unit, address, &map_offset, method_id)?);
    }
    let code = encode_instructions(&retargeted)?;

    let mut exception_table = Vec::with_capacity(input.exception_table.len() + 1);
    for entry in input.exception_table {
        let start_pc = map_offset(entry.start_pc as u32);
        let end_pc = map_offset(entry.end_pc as u32);
        if start_pc >= end_pc {
            // Region collapsed away entirely.
            continue;
        }
        exception_table.push(ExceptionEntry {
            start_pc: start_pc as u16,
            end_pc: end_pc as u16,
            handler_pc: map_offset(entry.handler_pc as u32) as u16,
            catch_type: entry.catch_type,
        });
    }

    let mut frames = remap_frames(units, input.stack_map, &map_offset, code_len);

    if let Some(handler) = input.synthetic_handler {
        let find_mark = |mark: Mark| {
            units
                .iter()
                .zip(&addresses)
                .find(|(unit, _)| unit.mark == Some(mark))
                .map(|(_, &address)| address)
        };
        if let (Some(try_start), Some(handler_start)) =
            (find_mark(Mark::TryStart), find_mark(Mark::HandlerStart))
        {
            // Appended last so handlers already inside the body keep
            // precedence over the catch-all.
            exception_table.push(ExceptionEntry {
                start_pc: try_start as u16,
                end_pc: handler_start as u16,
                handler_pc: handler_start as u16,
                catch_type: handler.catch_class,
            });
            frames.push((
                handler_start,
                StackMapFrame {
                    frame_type: 64,
                    inner: StackMapFrameInner::SameLocals1StackItemFrame {
                        stack: VerificationTypeInfo::Object {
                            class: handler.catch_class,
                        },
                    },
                },
            ));
        }
    }

    Ok(RelayoutOutput {
        code,
        exception_table,
        stack_map: encode_frames(frames),
    })
}

fn reresolve(
    unit: &CodeUnit,
    address: u32,
    map_offset: &impl Fn(u32) -> u32,
    method_id: &str,
) -> Result<Instruction, SurgeryError> {
    if unit.targets.is_empty() {
        return Ok(unit.insn.clone());
    }

    let narrow = |target: u32| -> Result<i16, SurgeryError> {
        let relative = map_offset(target) as i64 - address as i64;
        i16::try_from(relative).map_err(|_| SurgeryError::BranchOutOfRange {
            method: method_id.to_string(),
        })
    };
    let wide = |target: u32| (map_offset(target) as i64 - address as i64) as i32;

    let insn = match &unit.insn {
        Instruction::Ifeq(_) => Instruction::Ifeq(narrow(unit.targets[0])?),
        Instruction::Ifne(_) => Instruction::Ifne(narrow(unit.targets[0])?),
        Instruction::Iflt(_) => Instruction::Iflt(narrow(unit.targets[0])?),
        Instruction::Ifge(_) => Instruction::Ifge(narrow(unit.targets[0])?),
        Instruction::Ifgt(_) => Instruction::Ifgt(narrow(unit.targets[0])?),
        Instruction::Ifle(_) => Instruction::Ifle(narrow(unit.targets[0])?),
        Instruction::IfIcmpeq(_) => Instruction::IfIcmpeq(narrow(unit.targets[0])?),
        Instruction::IfIcmpne(_) => Instruction::IfIcmpne(narrow(unit.targets[0])?),
        Instruction::IfIcmplt(_) => Instruction::IfIcmplt(narrow(unit.targets[0])?),
        Instruction::IfIcmpge(_) => Instruction::IfIcmpge(narrow(unit.targets[0])?),
        Instruction::IfIcmpgt(_) => Instruction::IfIcmpgt(narrow(unit.targets[0])?),
        Instruction::IfIcmple(_) => Instruction::IfIcmple(narrow(unit.targets[0])?),
        Instruction::IfAcmpeq(_) => Instruction::IfAcmpeq(narrow(unit.targets[0])?),
        Instruction::IfAcmpne(_) => Instruction::IfAcmpne(narrow(unit.targets[0])?),
        Instruction::Ifnull(_) => Instruction::Ifnull(narrow(unit.targets[0])?),
        Instruction::Ifnonnull(_) => Instruction::Ifnonnull(narrow(unit.targets[0])?),
        Instruction::Goto(_) => Instruction::Goto(narrow(unit.targets[0])?),
        Instruction::Jsr(_) => Instruction::Jsr(narrow(unit.targets[0])?),
        Instruction::GotoW(_) => Instruction::GotoW(wide(unit.targets[0])),
        Instruction::JsrW(_) => Instruction::JsrW(wide(unit.targets[0])),
        Instruction::Tableswitch { low, high, .. } => Instruction::Tableswitch {
            default: wide(unit.targets[0]),
            low: *low,
            high: *high,
            offsets: unit.targets[1..].iter().map(|&t| wide(t)).collect(),
        },
        Instruction::Lookupswitch { npairs, pairs, .. } => Instruction::Lookupswitch {
            default: wide(unit.targets[0]),
            npairs: *npairs,
            pairs: pairs
                .iter()
                .zip(&unit.targets[1..])
                .map(|(&(key, _), &t)| (key, wide(t)))
                .collect(),
        },
        other => other.clone(),
    };
    Ok(insn)
}

/// Frames paired with their new absolute offsets. A frame whose instruction
/// was deleted moves to the next surviving original instruction, the same
/// place branches into the removed region resolve to; a frame with no
/// survivor after it falls off the end and is dropped.
fn remap_frames(
    units: &[CodeUnit],
    stack_map: Option<&StackMapTableAttribute>,
    map_offset: &impl Fn(u32) -> u32,
    code_len: u32,
) -> Vec<(u32, StackMapFrame)> {
    let Some(table) = stack_map else {
        return Vec::new();
    };

    let survives = |origin: u32| {
        units
            .iter()
            .any(|unit| unit.origin == Some(origin))
    };

    let mut frames = Vec::new();
    let mut bci: i64 = -1;
    for frame in &table.entries {
        bci += frame.offset_delta() as i64 + 1;
        let offset = map_offset(bci as u32);
        if offset >= code_len {
            continue;
        }
        let mut kept = frame.clone();
        remap_uninitialized(&mut kept, &survives, map_offset);
        frames.push((offset, kept));
    }
    frames
}

/// `Uninitialized` verification types point at the `new` instruction's pc;
/// follow it if that instruction survived.
fn remap_uninitialized(
    frame: &mut StackMapFrame,
    survives: &impl Fn(u32) -> bool,
    map_offset: &impl Fn(u32) -> u32,
) {
    let fix = |types: &mut Vec<VerificationTypeInfo>| {
        for vtype in types {
            if let VerificationTypeInfo::Uninitialized { offset } = vtype {
                if survives(*offset as u32) {
                    *offset = map_offset(*offset as u32) as u16;
                }
            }
        }
    };
    match &mut frame.inner {
        StackMapFrameInner::SameLocals1StackItemFrame { stack }
        | StackMapFrameInner::SameLocals1StackItemFrameExtended { stack, .. } => {
            if let VerificationTypeInfo::Uninitialized { offset } = stack {
                if survives(*offset as u32) {
                    *offset = map_offset(*offset as u32) as u16;
                }
            }
        }
        StackMapFrameInner::AppendFrame { locals, .. } => fix(locals),
        StackMapFrameInner::FullFrame { locals, stack, .. } => {
            fix(locals);
            fix(stack);
        }
        _ => {}
    }
}

/// Sort frames by offset and re-encode deltas. When two frames land on one
/// offset the later one wins; its original bci is the instruction actually
/// sitting there. Returns `None` when nothing survived; the attribute is
/// then omitted entirely.
fn encode_frames(frames: Vec<(u32, StackMapFrame)>) -> Option<StackMapTableAttribute> {
    if frames.is_empty() {
        return None;
    }
    let mut by_offset = BTreeMap::new();
    for (offset, frame) in frames {
        by_offset.insert(offset, frame);
    }
    let mut entries = Vec::with_capacity(by_offset.len());
    let mut previous: i64 = -1;
    for (offset, frame) in by_offset {
        let delta = offset as i64 - previous - 1;
        entries.push(frame.with_offset_delta(delta as u16));
        previous = offset as i64;
    }
    Some(StackMapTableAttribute { entries })
}
