use std::borrow::Cow;
use std::io::Cursor;

use binrw::{binrw, BinRead, BinWrite};

use crate::attribute_info::AttributeInfo;
use crate::constant_info::{
    parse_constant_pool, write_constant_pool, ClassConstant, ConstantInfo, MethodRefConstant,
    NameAndTypeConstant, StringConstant, Utf8Constant,
};
use crate::field_info::FieldInfo;
use crate::method_info::MethodInfo;

#[derive(Clone, Debug)]
#[binrw]
#[brw(big, magic = b"\xca\xfe\xba\xbe")]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub const_pool_size: u16,
    #[br(parse_with = parse_constant_pool, args(const_pool_size))]
    #[bw(write_with = write_constant_pool)]
    pub const_pool: Vec<ConstantInfo>,
    pub access_flags: ClassAccessFlags,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces_count: u16,
    #[br(count = interfaces_count)]
    pub interfaces: Vec<u16>,
    pub fields_count: u16,
    #[br(count = fields_count)]
    pub fields: Vec<FieldInfo>,
    pub methods_count: u16,
    #[br(count = methods_count)]
    pub methods: Vec<MethodInfo>,
    pub attributes_count: u16,
    #[br(count = attributes_count)]
    pub attributes: Vec<AttributeInfo>,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[binrw]
pub struct ClassAccessFlags(u16);

bitflags! {
    impl ClassAccessFlags: u16 {
        const PUBLIC = 0x0001;     //	Declared public; may be accessed from outside its package.
        const FINAL = 0x0010;      //	Declared final; no subclasses allowed.
        const SUPER = 0x0020;      //	Treat superclass methods specially when invoked by the invokespecial instruction.
        const INTERFACE = 0x0200;  //	Is an interface, not a class.
        const ABSTRACT = 0x0400;   //	Declared abstract; must not be instantiated.
        const SYNTHETIC = 0x1000;  //	Declared synthetic; not present in the source code.
        const ANNOTATION = 0x2000; //	Declared as an annotation type.
        const ENUM = 0x4000;       //	Declared as an enum type.
        const MODULE = 0x8000;     //	Declared as a module type.
    }
}

impl ClassFile {
    /// Parse a class from raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<ClassFile, binrw::Error> {
        ClassFile::read(&mut Cursor::new(bytes))
    }

    /// Serialize the class back to bytes. Counts are synced first so callers
    /// can freely mutate the pool and member lists beforehand.
    pub fn to_bytes(&mut self) -> Result<Vec<u8>, binrw::Error> {
        self.sync_counts();
        let mut out = Cursor::new(Vec::new());
        self.write(&mut out)?;
        Ok(out.into_inner())
    }

    /// Pool entry at a 1-based constant pool index.
    pub fn constant(&self, index: u16) -> Option<&ConstantInfo> {
        if index == 0 {
            return None;
        }
        self.const_pool.get((index - 1) as usize)
    }

    pub fn get_utf8(&self, index: u16) -> Option<Cow<'_, str>> {
        match self.constant(index)? {
            ConstantInfo::Utf8(u) => Some(u.as_str()),
            _ => None,
        }
    }

    /// Internal (slash-form) name of this class.
    pub fn this_class_name(&self) -> Option<Cow<'_, str>> {
        match self.constant(self.this_class)? {
            ConstantInfo::Class(c) => self.get_utf8(c.name_index),
            _ => None,
        }
    }

    /// Resolve a Fieldref entry's simple field name.
    pub fn field_ref_name(&self, index: u16) -> Option<Cow<'_, str>> {
        let nat = match self.constant(index)? {
            ConstantInfo::FieldRef(f) => f.name_and_type_index,
            _ => return None,
        };
        match self.constant(nat)? {
            ConstantInfo::NameAndType(nt) => self.get_utf8(nt.name_index),
            _ => None,
        }
    }

    /// Resolve a Methodref / InterfaceMethodref entry into
    /// `(owner, name, descriptor)`, owner in slash form.
    pub fn method_ref_parts(&self, index: u16) -> Option<(String, String, String)> {
        let (class_index, nat_index) = match self.constant(index)? {
            ConstantInfo::MethodRef(m) => (m.class_index, m.name_and_type_index),
            ConstantInfo::InterfaceMethodRef(m) => (m.class_index, m.name_and_type_index),
            _ => return None,
        };
        let owner = match self.constant(class_index)? {
            ConstantInfo::Class(c) => self.get_utf8(c.name_index)?.into_owned(),
            _ => return None,
        };
        let (name_index, descriptor_index) = match self.constant(nat_index)? {
            ConstantInfo::NameAndType(nt) => (nt.name_index, nt.descriptor_index),
            _ => return None,
        };
        Some((
            owner,
            self.get_utf8(name_index)?.into_owned(),
            self.get_utf8(descriptor_index)?.into_owned(),
        ))
    }

    fn push_constant(&mut self, entry: ConstantInfo) -> u16 {
        self.const_pool.push(entry);
        self.const_pool_size = self.const_pool.len() as u16 + 1;
        self.const_pool.len() as u16
    }

    pub fn get_or_add_utf8(&mut self, value: &str) -> u16 {
        for (i, entry) in self.const_pool.iter().enumerate() {
            if let ConstantInfo::Utf8(u) = entry {
                if u.bytes == value.as_bytes() {
                    return i as u16 + 1;
                }
            }
        }
        self.push_constant(ConstantInfo::Utf8(Utf8Constant::new(value)))
    }

    pub fn get_or_add_class(&mut self, name: &str) -> u16 {
        let name_index = self.get_or_add_utf8(name);
        for (i, entry) in self.const_pool.iter().enumerate() {
            if let ConstantInfo::Class(c) = entry {
                if c.name_index == name_index {
                    return i as u16 + 1;
                }
            }
        }
        self.push_constant(ConstantInfo::Class(ClassConstant { name_index }))
    }

    pub fn get_or_add_string(&mut self, value: &str) -> u16 {
        let string_index = self.get_or_add_utf8(value);
        for (i, entry) in self.const_pool.iter().enumerate() {
            if let ConstantInfo::String(s) = entry {
                if s.string_index == string_index {
                    return i as u16 + 1;
                }
            }
        }
        self.push_constant(ConstantInfo::String(StringConstant { string_index }))
    }

    pub fn get_or_add_name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name_index = self.get_or_add_utf8(name);
        let descriptor_index = self.get_or_add_utf8(descriptor);
        for (i, entry) in self.const_pool.iter().enumerate() {
            if let ConstantInfo::NameAndType(nt) = entry {
                if nt.name_index == name_index && nt.descriptor_index == descriptor_index {
                    return i as u16 + 1;
                }
            }
        }
        self.push_constant(ConstantInfo::NameAndType(NameAndTypeConstant {
            name_index,
            descriptor_index,
        }))
    }

    pub fn get_or_add_method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> u16 {
        let class_index = self.get_or_add_class(owner);
        let name_and_type_index = self.get_or_add_name_and_type(name, descriptor);
        for (i, entry) in self.const_pool.iter().enumerate() {
            if let ConstantInfo::MethodRef(m) = entry {
                if m.class_index == class_index && m.name_and_type_index == name_and_type_index {
                    return i as u16 + 1;
                }
            }
        }
        self.push_constant(ConstantInfo::MethodRef(MethodRefConstant {
            class_index,
            name_and_type_index,
        }))
    }

    /// Find a method by name (first match).
    pub fn find_method(&self, name: &str) -> Option<&MethodInfo> {
        self.methods
            .iter()
            .find(|m| matches!(self.get_utf8(m.name_index), Some(n) if n == name))
    }

    /// Bring every redundant count field back in line with its list.
    pub fn sync_counts(&mut self) {
        self.const_pool_size = self.const_pool.len() as u16 + 1;
        self.interfaces_count = self.interfaces.len() as u16;
        self.fields_count = self.fields.len() as u16;
        self.methods_count = self.methods.len() as u16;
        self.attributes_count = self.attributes.len() as u16;
        for field in &mut self.fields {
            field.attributes_count = field.attributes.len() as u16;
        }
        for method in &mut self.methods {
            method.attributes_count = method.attributes.len() as u16;
        }
    }
}
