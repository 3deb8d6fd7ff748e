//! nom parsers for the attribute payloads the surgery engine reads back.

use nom::bytes::complete::take;
use nom::error::{Error, ErrorKind};
use nom::multi::count;
use nom::number::complete::{be_u16, be_u32, be_u8};
use nom::IResult;

use super::{
    AttributeInfo, CodeAttribute, ExceptionEntry, StackMapFrame, StackMapFrameInner,
    StackMapTableAttribute, VerificationTypeInfo,
};

fn attribute_parser(input: &[u8]) -> IResult<&[u8], AttributeInfo> {
    let (input, attribute_name_index) = be_u16(input)?;
    let (input, attribute_length) = be_u32(input)?;
    let (input, info) = take(attribute_length)(input)?;
    Ok((
        input,
        AttributeInfo {
            attribute_name_index,
            attribute_length,
            info: info.to_vec(),
        },
    ))
}

fn exception_entry_parser(input: &[u8]) -> IResult<&[u8], ExceptionEntry> {
    let (input, start_pc) = be_u16(input)?;
    let (input, end_pc) = be_u16(input)?;
    let (input, handler_pc) = be_u16(input)?;
    let (input, catch_type) = be_u16(input)?;
    Ok((
        input,
        ExceptionEntry {
            start_pc,
            end_pc,
            handler_pc,
            catch_type,
        },
    ))
}

pub fn code_attribute_parser(input: &[u8]) -> IResult<&[u8], CodeAttribute> {
    let (input, max_stack) = be_u16(input)?;
    let (input, max_locals) = be_u16(input)?;
    let (input, code_length) = be_u32(input)?;
    let (input, code) = take(code_length)(input)?;
    let (input, exception_table_length) = be_u16(input)?;
    let (input, exception_table) =
        count(exception_entry_parser, exception_table_length as usize)(input)?;
    let (input, attributes_count) = be_u16(input)?;
    let (input, attributes) = count(attribute_parser, attributes_count as usize)(input)?;
    Ok((
        input,
        CodeAttribute {
            max_stack,
            max_locals,
            code: code.to_vec(),
            exception_table,
            attributes,
        },
    ))
}

fn verification_type_parser(input: &[u8]) -> IResult<&[u8], VerificationTypeInfo> {
    let (input, tag) = be_u8(input)?;
    match tag {
        0 => Ok((input, VerificationTypeInfo::Top)),
        1 => Ok((input, VerificationTypeInfo::Integer)),
        2 => Ok((input, VerificationTypeInfo::Float)),
        3 => Ok((input, VerificationTypeInfo::Double)),
        4 => Ok((input, VerificationTypeInfo::Long)),
        5 => Ok((input, VerificationTypeInfo::Null)),
        6 => Ok((input, VerificationTypeInfo::UninitializedThis)),
        7 => {
            let (input, class) = be_u16(input)?;
            Ok((input, VerificationTypeInfo::Object { class }))
        }
        8 => {
            let (input, offset) = be_u16(input)?;
            Ok((input, VerificationTypeInfo::Uninitialized { offset }))
        }
        _ => Err(nom::Err::Error(Error::new(input, ErrorKind::Tag))),
    }
}

fn stack_map_frame_parser(input: &[u8]) -> IResult<&[u8], StackMapFrame> {
    let (input, frame_type) = be_u8(input)?;
    let (input, inner) = match frame_type {
        0..=63 => (input, StackMapFrameInner::SameFrame),
        64..=127 => {
            let (input, stack) = verification_type_parser(input)?;
            (input, StackMapFrameInner::SameLocals1StackItemFrame { stack })
        }
        247 => {
            let (input, offset_delta) = be_u16(input)?;
            let (input, stack) = verification_type_parser(input)?;
            (
                input,
                StackMapFrameInner::SameLocals1StackItemFrameExtended {
                    offset_delta,
                    stack,
                },
            )
        }
        248..=250 => {
            let (input, offset_delta) = be_u16(input)?;
            (input, StackMapFrameInner::ChopFrame { offset_delta })
        }
        251 => {
            let (input, offset_delta) = be_u16(input)?;
            (input, StackMapFrameInner::SameFrameExtended { offset_delta })
        }
        252..=254 => {
            let (input, offset_delta) = be_u16(input)?;
            let (input, locals) =
                count(verification_type_parser, (frame_type - 251) as usize)(input)?;
            (
                input,
                StackMapFrameInner::AppendFrame {
                    offset_delta,
                    locals,
                },
            )
        }
        255 => {
            let (input, offset_delta) = be_u16(input)?;
            let (input, number_of_locals) = be_u16(input)?;
            let (input, locals) = count(verification_type_parser, number_of_locals as usize)(input)?;
            let (input, number_of_stack_items) = be_u16(input)?;
            let (input, stack) =
                count(verification_type_parser, number_of_stack_items as usize)(input)?;
            (
                input,
                StackMapFrameInner::FullFrame {
                    offset_delta,
                    locals,
                    stack,
                },
            )
        }
        // 128..=246 are reserved
        _ => return Err(nom::Err::Error(Error::new(input, ErrorKind::Tag))),
    };
    Ok((input, StackMapFrame { frame_type, inner }))
}

pub fn stack_map_table_parser(input: &[u8]) -> IResult<&[u8], StackMapTableAttribute> {
    let (input, number_of_entries) = be_u16(input)?;
    let (input, entries) = count(stack_map_frame_parser, number_of_entries as usize)(input)?;
    Ok((input, StackMapTableAttribute { entries }))
}
