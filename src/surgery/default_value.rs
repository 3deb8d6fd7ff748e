//! Default-value return sequences.
//!
//! When a body is emptied or a catch-all handler needs to bail out, the
//! method must still return something its descriptor allows. Primitives get
//! their zero, `String` gets `""`, `java.util.List` / `java.util.Map` get the
//! immutable `Collections` empties, and any other reference type gets `null`.

use crate::code_attribute::{ldc, Instruction};
use crate::types::ClassFile;

use super::SurgeryError;

const COLLECTIONS_CLASS: &str = "java/util/Collections";

/// Category of a method's return type, as far as default synthesis cares.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ReturnKind {
    Void,
    /// `boolean`, `byte`, `char`, `short` and `int` all return through
    /// `ireturn`.
    Int,
    Float,
    Long,
    Double,
    StringRef,
    ListRef,
    MapRef,
    /// Any other object or array type.
    Reference,
}

impl ReturnKind {
    /// Operand-stack slots the default value occupies right before the
    /// return.
    pub fn stack_slots(&self) -> u16 {
        match self {
            ReturnKind::Void => 0,
            ReturnKind::Long | ReturnKind::Double => 2,
            _ => 1,
        }
    }
}

/// Classify the return type of a method descriptor.
pub fn return_kind(descriptor: &str) -> Result<ReturnKind, SurgeryError> {
    let ret = descriptor
        .split_once(')')
        .map(|(_, ret)| ret)
        .filter(|ret| !ret.is_empty())
        .ok_or_else(|| SurgeryError::BadDescriptor {
            descriptor: descriptor.to_string(),
        })?;

    let kind = match ret {
        "V" => ReturnKind::Void,
        "Z" | "B" | "C" | "S" | "I" => ReturnKind::Int,
        "F" => ReturnKind::Float,
        "J" => ReturnKind::Long,
        "D" => ReturnKind::Double,
        "Ljava/lang/String;" => ReturnKind::StringRef,
        "Ljava/util/List;" => ReturnKind::ListRef,
        "Ljava/util/Map;" => ReturnKind::MapRef,
        other if other.starts_with('L') && other.ends_with(';') => ReturnKind::Reference,
        other if other.starts_with('[') => ReturnKind::Reference,
        _ => {
            return Err(SurgeryError::UnsupportedReturnType {
                descriptor: descriptor.to_string(),
            })
        }
    };
    Ok(kind)
}

/// Instructions that push the default value for `descriptor`'s return type
/// and return it, plus the stack depth the sequence needs. Interns into the
/// pool as needed; repeated calls with the same descriptor reuse the same
/// entries and produce identical bytes.
pub fn emit_default_return(
    class: &mut ClassFile,
    descriptor: &str,
) -> Result<(Vec<Instruction>, u16), SurgeryError> {
    let kind = return_kind(descriptor)?;
    let instructions = match kind {
        ReturnKind::Void => vec![Instruction::Return],
        ReturnKind::Int => vec![Instruction::Iconst0, Instruction::Ireturn],
        ReturnKind::Float => vec![Instruction::Fconst0, Instruction::Freturn],
        ReturnKind::Long => vec![Instruction::Lconst0, Instruction::Lreturn],
        ReturnKind::Double => vec![Instruction::Dconst0, Instruction::Dreturn],
        ReturnKind::StringRef => {
            let empty = class.get_or_add_string("");
            vec![ldc(empty), Instruction::Areturn]
        }
        ReturnKind::ListRef => {
            let empty_list =
                class.get_or_add_method_ref(COLLECTIONS_CLASS, "emptyList", "()Ljava/util/List;");
            vec![Instruction::Invokestatic(empty_list), Instruction::Areturn]
        }
        ReturnKind::MapRef => {
            let empty_map =
                class.get_or_add_method_ref(COLLECTIONS_CLASS, "emptyMap", "()Ljava/util/Map;");
            vec![Instruction::Invokestatic(empty_map), Instruction::Areturn]
        }
        ReturnKind::Reference => vec![Instruction::Aconstnull, Instruction::Areturn],
    };
    Ok((instructions, kind.stack_slots()))
}
