//! Constant pool entries, [JVMS §4.4](https://docs.oracle.com/javase/specs/jvms/se17/html/jvms-4.html#jvms-4.4).

use std::borrow::Cow;
use std::io::{Read, Seek, Write};

use binrw::{binrw, BinResult, BinWrite, Endian};

/// One constant pool entry, tagged by its JVMS tag byte.
///
/// `Long` and `Double` occupy two pool slots; the pool-level parser inserts an
/// `Unusable` placeholder after each so that vector index `n` always maps to
/// pool index `n + 1`.
#[derive(Clone, Debug, PartialEq)]
#[binrw]
#[brw(big)]
pub enum ConstantInfo {
    #[brw(magic = 1u8)]
    Utf8(Utf8Constant),
    #[brw(magic = 3u8)]
    Integer(IntegerConstant),
    #[brw(magic = 4u8)]
    Float(FloatConstant),
    #[brw(magic = 5u8)]
    Long(LongConstant),
    #[brw(magic = 6u8)]
    Double(DoubleConstant),
    #[brw(magic = 7u8)]
    Class(ClassConstant),
    #[brw(magic = 8u8)]
    String(StringConstant),
    #[brw(magic = 9u8)]
    FieldRef(FieldRefConstant),
    #[brw(magic = 10u8)]
    MethodRef(MethodRefConstant),
    #[brw(magic = 11u8)]
    InterfaceMethodRef(InterfaceMethodRefConstant),
    #[brw(magic = 12u8)]
    NameAndType(NameAndTypeConstant),
    #[brw(magic = 15u8)]
    MethodHandle(MethodHandleConstant),
    #[brw(magic = 16u8)]
    MethodType(MethodTypeConstant),
    #[brw(magic = 17u8)]
    Dynamic(DynamicConstant),
    #[brw(magic = 18u8)]
    InvokeDynamic(InvokeDynamicConstant),
    #[brw(magic = 19u8)]
    Module(ModuleConstant),
    #[brw(magic = 20u8)]
    Package(PackageConstant),
    // Tag 0 never appears in a valid classfile; the pool writer skips these.
    #[brw(magic = 0u8)]
    Unusable,
}

// The attribute macro must expand before the derives so they never see the
// stripped length field.
#[binrw]
#[brw(big)]
#[derive(Clone, Debug, PartialEq)]
pub struct Utf8Constant {
    #[br(temp)]
    #[bw(calc = bytes.len() as u16)]
    length: u16,
    #[br(count = length)]
    pub bytes: Vec<u8>,
}

impl Utf8Constant {
    pub fn new(s: &str) -> Self {
        Utf8Constant {
            bytes: s.as_bytes().to_vec(),
        }
    }

    pub fn as_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

#[derive(Clone, Debug, PartialEq)]
#[binrw]
#[brw(big)]
pub struct IntegerConstant {
    pub value: i32,
}

#[derive(Clone, Debug, PartialEq)]
#[binrw]
#[brw(big)]
pub struct FloatConstant {
    pub value: f32,
}

#[derive(Clone, Debug, PartialEq)]
#[binrw]
#[brw(big)]
pub struct LongConstant {
    pub value: i64,
}

#[derive(Clone, Debug, PartialEq)]
#[binrw]
#[brw(big)]
pub struct DoubleConstant {
    pub value: f64,
}

#[derive(Clone, Debug, PartialEq)]
#[binrw]
#[brw(big)]
pub struct ClassConstant {
    pub name_index: u16,
}

#[derive(Clone, Debug, PartialEq)]
#[binrw]
#[brw(big)]
pub struct StringConstant {
    pub string_index: u16,
}

#[derive(Clone, Debug, PartialEq)]
#[binrw]
#[brw(big)]
pub struct FieldRefConstant {
    pub class_index: u16,
    pub name_and_type_index: u16,
}

#[derive(Clone, Debug, PartialEq)]
#[binrw]
#[brw(big)]
pub struct MethodRefConstant {
    pub class_index: u16,
    pub name_and_type_index: u16,
}

#[derive(Clone, Debug, PartialEq)]
#[binrw]
#[brw(big)]
pub struct InterfaceMethodRefConstant {
    pub class_index: u16,
    pub name_and_type_index: u16,
}

#[derive(Clone, Debug, PartialEq)]
#[binrw]
#[brw(big)]
pub struct NameAndTypeConstant {
    pub name_index: u16,
    pub descriptor_index: u16,
}

#[derive(Clone, Debug, PartialEq)]
#[binrw]
#[brw(big)]
pub struct MethodHandleConstant {
    pub reference_kind: u8,
    pub reference_index: u16,
}

#[derive(Clone, Debug, PartialEq)]
#[binrw]
#[brw(big)]
pub struct MethodTypeConstant {
    pub descriptor_index: u16,
}

#[derive(Clone, Debug, PartialEq)]
#[binrw]
#[brw(big)]
pub struct DynamicConstant {
    pub bootstrap_method_attr_index: u16,
    pub name_and_type_index: u16,
}

#[derive(Clone, Debug, PartialEq)]
#[binrw]
#[brw(big)]
pub struct InvokeDynamicConstant {
    pub bootstrap_method_attr_index: u16,
    pub name_and_type_index: u16,
}

#[derive(Clone, Debug, PartialEq)]
#[binrw]
#[brw(big)]
pub struct ModuleConstant {
    pub name_index: u16,
}

#[derive(Clone, Debug, PartialEq)]
#[binrw]
#[brw(big)]
pub struct PackageConstant {
    pub name_index: u16,
}

/// Read `pool_size - 1` logical slots, padding two-slot entries with
/// `Unusable` so vector indices stay aligned with pool indices.
pub fn parse_constant_pool<R: Read + Seek>(
    reader: &mut R,
    endian: Endian,
    (pool_size,): (u16,),
) -> BinResult<Vec<ConstantInfo>> {
    use binrw::BinRead;

    let slots = pool_size.saturating_sub(1) as usize;
    let mut entries = Vec::with_capacity(slots);
    while entries.len() < slots {
        let entry = ConstantInfo::read_options(reader, endian, ())?;
        let two_slot = matches!(entry, ConstantInfo::Long(_) | ConstantInfo::Double(_));
        entries.push(entry);
        if two_slot && entries.len() < slots {
            entries.push(ConstantInfo::Unusable);
        }
    }
    Ok(entries)
}

pub fn write_constant_pool<W: Write + Seek>(
    pool: &Vec<ConstantInfo>,
    writer: &mut W,
    endian: Endian,
    _args: (),
) -> BinResult<()> {
    for entry in pool {
        if !matches!(entry, ConstantInfo::Unusable) {
            entry.write_options(writer, endian, ())?;
        }
    }
    Ok(())
}
