//! Attribute model. The outer [`AttributeInfo`] is carried as raw bytes by the
//! binrw classfile codec; the payloads this crate actually rewrites (`Code`,
//! `StackMapTable`) have parsed forms produced by [`parser`] and re-encoded by
//! [`writer`].

pub mod parser;
pub mod writer;

use std::fmt;

use binrw::binrw;

#[derive(Clone, Debug)]
#[binrw]
#[brw(big)]
pub struct AttributeInfo {
    pub attribute_name_index: u16,
    pub attribute_length: u32,
    #[br(count = attribute_length)]
    pub info: Vec<u8>,
}

impl AttributeInfo {
    pub fn new(attribute_name_index: u16, info: Vec<u8>) -> Self {
        AttributeInfo {
            attribute_name_index,
            attribute_length: info.len() as u32,
            info,
        }
    }
}

#[derive(Debug)]
pub enum AttributeError {
    Malformed(&'static str),
}

impl fmt::Display for AttributeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeError::Malformed(what) => write!(f, "malformed {what} attribute"),
        }
    }
}

impl std::error::Error for AttributeError {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExceptionEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    pub catch_type: u16,
}

#[derive(Clone, Debug)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exception_table: Vec<ExceptionEntry>,
    pub attributes: Vec<AttributeInfo>,
}

impl CodeAttribute {
    pub fn parse(info: &[u8]) -> Result<CodeAttribute, AttributeError> {
        match parser::code_attribute_parser(info) {
            Ok((_, code)) => Ok(code),
            Err(_) => Err(AttributeError::Malformed("Code")),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        writer::write_code_attribute(self)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerificationTypeInfo {
    Top,
    Integer,
    Float,
    Double,
    Long,
    Null,
    UninitializedThis,
    Object {
        /// Constant pool index of the object's class.
        class: u16,
    },
    Uninitialized {
        /// Code offset of the `new` instruction that created the value.
        offset: u16,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackMapFrame {
    pub frame_type: u8,
    pub inner: StackMapFrameInner,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StackMapFrameInner {
    SameFrame,
    SameLocals1StackItemFrame {
        stack: VerificationTypeInfo,
    },
    SameLocals1StackItemFrameExtended {
        offset_delta: u16,
        stack: VerificationTypeInfo,
    },
    ChopFrame {
        offset_delta: u16,
    },
    SameFrameExtended {
        offset_delta: u16,
    },
    AppendFrame {
        offset_delta: u16,
        locals: Vec<VerificationTypeInfo>,
    },
    FullFrame {
        offset_delta: u16,
        locals: Vec<VerificationTypeInfo>,
        stack: Vec<VerificationTypeInfo>,
    },
}

impl StackMapFrame {
    /// The delta encoded by this frame, regardless of representation.
    pub fn offset_delta(&self) -> u16 {
        match &self.inner {
            StackMapFrameInner::SameFrame => self.frame_type as u16,
            StackMapFrameInner::SameLocals1StackItemFrame { .. } => self.frame_type as u16 - 64,
            StackMapFrameInner::SameLocals1StackItemFrameExtended { offset_delta, .. }
            | StackMapFrameInner::ChopFrame { offset_delta }
            | StackMapFrameInner::SameFrameExtended { offset_delta }
            | StackMapFrameInner::AppendFrame { offset_delta, .. }
            | StackMapFrameInner::FullFrame { offset_delta, .. } => *offset_delta,
        }
    }

    /// Re-encode this frame's payload with a different delta, picking the
    /// compact form when it still fits.
    pub fn with_offset_delta(&self, delta: u16) -> StackMapFrame {
        match &self.inner {
            StackMapFrameInner::SameFrame | StackMapFrameInner::SameFrameExtended { .. } => {
                if delta <= 63 {
                    StackMapFrame {
                        frame_type: delta as u8,
                        inner: StackMapFrameInner::SameFrame,
                    }
                } else {
                    StackMapFrame {
                        frame_type: 251,
                        inner: StackMapFrameInner::SameFrameExtended {
                            offset_delta: delta,
                        },
                    }
                }
            }
            StackMapFrameInner::SameLocals1StackItemFrame { stack }
            | StackMapFrameInner::SameLocals1StackItemFrameExtended { stack, .. } => {
                if delta <= 63 {
                    StackMapFrame {
                        frame_type: 64 + delta as u8,
                        inner: StackMapFrameInner::SameLocals1StackItemFrame {
                            stack: stack.clone(),
                        },
                    }
                } else {
                    StackMapFrame {
                        frame_type: 247,
                        inner: StackMapFrameInner::SameLocals1StackItemFrameExtended {
                            offset_delta: delta,
                            stack: stack.clone(),
                        },
                    }
                }
            }
            StackMapFrameInner::ChopFrame { .. } => StackMapFrame {
                frame_type: self.frame_type,
                inner: StackMapFrameInner::ChopFrame {
                    offset_delta: delta,
                },
            },
            StackMapFrameInner::AppendFrame { locals, .. } => StackMapFrame {
                frame_type: self.frame_type,
                inner: StackMapFrameInner::AppendFrame {
                    offset_delta: delta,
                    locals: locals.clone(),
                },
            },
            StackMapFrameInner::FullFrame { locals, stack, .. } => StackMapFrame {
                frame_type: 255,
                inner: StackMapFrameInner::FullFrame {
                    offset_delta: delta,
                    locals: locals.clone(),
                    stack: stack.clone(),
                },
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StackMapTableAttribute {
    pub entries: Vec<StackMapFrame>,
}

impl StackMapTableAttribute {
    pub fn parse(info: &[u8]) -> Result<StackMapTableAttribute, AttributeError> {
        match parser::stack_map_table_parser(info) {
            Ok((_, table)) => Ok(table),
            Err(_) => Err(AttributeError::Malformed("StackMapTable")),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        writer::write_stack_map_table(self)
    }
}
