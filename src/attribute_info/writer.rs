//! Big-endian encoders mirroring [`super::parser`].

use super::{
    CodeAttribute, StackMapFrame, StackMapFrameInner, StackMapTableAttribute,
    VerificationTypeInfo,
};

fn push_u16(out: &mut Vec<u8>, value: u16) {
    out.extend_from_slice(&value.to_be_bytes());
}

fn push_u32(out: &mut Vec<u8>, value: u32) {
    out.extend_from_slice(&value.to_be_bytes());
}

pub fn write_code_attribute(code: &CodeAttribute) -> Vec<u8> {
    let mut out = Vec::with_capacity(code.code.len() + 64);
    push_u16(&mut out, code.max_stack);
    push_u16(&mut out, code.max_locals);
    push_u32(&mut out, code.code.len() as u32);
    out.extend_from_slice(&code.code);
    push_u16(&mut out, code.exception_table.len() as u16);
    for entry in &code.exception_table {
        push_u16(&mut out, entry.start_pc);
        push_u16(&mut out, entry.end_pc);
        push_u16(&mut out, entry.handler_pc);
        push_u16(&mut out, entry.catch_type);
    }
    push_u16(&mut out, code.attributes.len() as u16);
    for attr in &code.attributes {
        push_u16(&mut out, attr.attribute_name_index);
        push_u32(&mut out, attr.info.len() as u32);
        out.extend_from_slice(&attr.info);
    }
    out
}

fn write_verification_type(out: &mut Vec<u8>, vtype: &VerificationTypeInfo) {
    match vtype {
        VerificationTypeInfo::Top => out.push(0),
        VerificationTypeInfo::Integer => out.push(1),
        VerificationTypeInfo::Float => out.push(2),
        VerificationTypeInfo::Double => out.push(3),
        VerificationTypeInfo::Long => out.push(4),
        VerificationTypeInfo::Null => out.push(5),
        VerificationTypeInfo::UninitializedThis => out.push(6),
        VerificationTypeInfo::Object { class } => {
            out.push(7);
            push_u16(out, *class);
        }
        VerificationTypeInfo::Uninitialized { offset } => {
            out.push(8);
            push_u16(out, *offset);
        }
    }
}

fn write_stack_map_frame(out: &mut Vec<u8>, frame: &StackMapFrame) {
    out.push(frame.frame_type);
    match &frame.inner {
        StackMapFrameInner::SameFrame => {}
        StackMapFrameInner::SameLocals1StackItemFrame { stack } => {
            write_verification_type(out, stack);
        }
        StackMapFrameInner::SameLocals1StackItemFrameExtended {
            offset_delta,
            stack,
        } => {
            push_u16(out, *offset_delta);
            write_verification_type(out, stack);
        }
        StackMapFrameInner::ChopFrame { offset_delta }
        | StackMapFrameInner::SameFrameExtended { offset_delta } => {
            push_u16(out, *offset_delta);
        }
        StackMapFrameInner::AppendFrame {
            offset_delta,
            locals,
        } => {
            push_u16(out, *offset_delta);
            for local in locals {
                write_verification_type(out, local);
            }
        }
        StackMapFrameInner::FullFrame {
            offset_delta,
            locals,
            stack,
        } => {
            push_u16(out, *offset_delta);
            push_u16(out, locals.len() as u16);
            for local in locals {
                write_verification_type(out, local);
            }
            push_u16(out, stack.len() as u16);
            for item in stack {
                write_verification_type(out, item);
            }
        }
    }
}

pub fn write_stack_map_table(table: &StackMapTableAttribute) -> Vec<u8> {
    let mut out = Vec::new();
    push_u16(&mut out, table.entries.len() as u16);
    for frame in &table.entries {
        write_stack_map_frame(&mut out, frame);
    }
    out
}
