//! Stack and local-slot accounting for synthesized code.
//!
//! The engine never recomputes frames or stack depth from scratch; at
//! build-instrumentation scale that costs too much across thousands of
//! classes. Instead every synthetic sequence has a known, fixed contribution,
//! and the driver adds those to the method's original `max_stack` /
//! `max_locals`.

use super::default_value::ReturnKind;
use super::SurgeryError;

/// Slot widths (1 or 2) of each parameter in a method descriptor, in order.
pub fn parameter_slots(descriptor: &str) -> Result<Vec<u8>, SurgeryError> {
    let inner = descriptor
        .strip_prefix('(')
        .and_then(|rest| rest.split_once(')'))
        .map(|(params, _)| params)
        .ok_or_else(|| SurgeryError::BadDescriptor {
            descriptor: descriptor.to_string(),
        })?;

    let mut slots = Vec::new();
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        match c {
            'B' | 'C' | 'F' | 'I' | 'S' | 'Z' => slots.push(1),
            'J' | 'D' => slots.push(2),
            'L' => {
                // Object type: consume through the ';'
                if !chars.by_ref().any(|c| c == ';') {
                    return Err(SurgeryError::BadDescriptor {
                        descriptor: descriptor.to_string(),
                    });
                }
                slots.push(1);
            }
            '[' => {
                // Array: skip further dimensions, then the element type.
                let mut elem = chars.next();
                while elem == Some('[') {
                    elem = chars.next();
                }
                match elem {
                    Some('L') => {
                        if !chars.by_ref().any(|c| c == ';') {
                            return Err(SurgeryError::BadDescriptor {
                                descriptor: descriptor.to_string(),
                            });
                        }
                    }
                    Some('B' | 'C' | 'F' | 'I' | 'S' | 'Z' | 'J' | 'D') => {}
                    _ => {
                        return Err(SurgeryError::BadDescriptor {
                            descriptor: descriptor.to_string(),
                        })
                    }
                }
                slots.push(1);
            }
            _ => {
                return Err(SurgeryError::BadDescriptor {
                    descriptor: descriptor.to_string(),
                })
            }
        }
    }
    Ok(slots)
}

/// Minimum local-variable slots a method needs for its receiver and
/// parameters: one per category-1 parameter, two per `long`/`double`, plus
/// the implicit `this` slot unless static.
pub fn required_locals(is_static: bool, descriptor: &str) -> Result<u16, SurgeryError> {
    let mut locals: u16 = if is_static { 0 } else { 1 };
    for width in parameter_slots(descriptor)? {
        locals += width as u16;
    }
    Ok(locals)
}

/// The synthetic instruction sequences this engine can inject, with their
/// exact operand-stack and local-slot contributions (derived from the JVMS
/// push/pop arity of each instruction involved).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SyntheticOp {
    /// Push a type-appropriate default and return it.
    DefaultReturn(ReturnKind),
    /// `ldc tag; ldc msg; invokestatic Log.i; pop`: peak depth two strings.
    LogCall,
    /// `ldc section-name; invokestatic Trace.beginSection`: peak one.
    TraceBegin,
    /// `invokestatic Trace.endSection`: touches nothing.
    TraceEnd,
    /// `astore slot; aload slot; invokevirtual printStackTrace` on the
    /// caught exception: peak one (the exception itself), one extra local.
    PrintStackTrace,
}

impl SyntheticOp {
    /// Additional operand-stack depth the sequence needs on top of an empty
    /// stack.
    pub fn stack_delta(&self) -> u16 {
        match self {
            SyntheticOp::DefaultReturn(kind) => kind.stack_slots(),
            SyntheticOp::LogCall => 2,
            SyntheticOp::TraceBegin => 1,
            SyntheticOp::TraceEnd => 0,
            SyntheticOp::PrintStackTrace => 1,
        }
    }

    /// Additional local-variable slots the sequence consumes.
    pub fn locals_delta(&self) -> u16 {
        match self {
            SyntheticOp::PrintStackTrace => 1,
            _ => 0,
        }
    }
}
