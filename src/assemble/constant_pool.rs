use std::collections::HashMap;
use std::io::Cursor;

use binrw::{binrw, BinRead, BinWrite};

use super::AssembleError;

/// One constant pool entry in its class file encoding.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
#[binrw]
#[brw(big)]
pub enum PoolEntry {
    /// Modified UTF-8 bytes.
    #[brw(magic = 1u8)]
    Utf8 {
        length: u16,
        #[br(count = length)]
        bytes: Vec<u8>,
    },
    #[brw(magic = 3u8)]
    Integer(i32),
    /// Raw IEEE 754 bits, so that `-0.0` and NaN payloads stay distinct.
    #[brw(magic = 4u8)]
    Float(u32),
    #[brw(magic = 5u8)]
    Long(i64),
    #[brw(magic = 6u8)]
    Double(u64),
    #[brw(magic = 7u8)]
    Class { name_index: u16 },
    #[brw(magic = 8u8)]
    String { string_index: u16 },
    #[brw(magic = 9u8)]
    FieldRef { class_index: u16, name_and_type_index: u16 },
    #[brw(magic = 10u8)]
    MethodRef { class_index: u16, name_and_type_index: u16 },
    #[brw(magic = 11u8)]
    InterfaceMethodRef { class_index: u16, name_and_type_index: u16 },
    #[brw(magic = 12u8)]
    NameAndType { name_index: u16, descriptor_index: u16 },
}

impl PoolEntry {
    /// `long` and `double` entries take two indices.
    pub fn width(&self) -> u16 {
        match self {
            PoolEntry::Long(_) | PoolEntry::Double(_) => 2,
            _ => 1,
        }
    }
}

/// An interning constant pool. Equal entries share one index.
#[derive(Clone, Debug, PartialEq)]
pub struct ConstantPool {
    /// Indexed by pool index; index 0 and the upper half of wide entries are `None`.
    slots: Vec<Option<PoolEntry>>,
    index: HashMap<PoolEntry, u16>,
}

impl Default for ConstantPool {
    fn default() -> Self {
        ConstantPool {
            slots: vec![None],
            index: HashMap::new(),
        }
    }
}

type Result<T> = std::result::Result<T, AssembleError>;

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// The `constant_pool_count` of a class file: one more than the highest index.
    pub fn count(&self) -> u16 {
        self.slots.len() as u16
    }

    pub fn get(&self, index: u16) -> Option<&PoolEntry> {
        self.slots.get(usize::from(index))?.as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u16, &PoolEntry)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|entry| (i as u16, entry)))
    }

    fn intern(&mut self, entry: PoolEntry) -> Result<u16> {
        if let Some(&index) = self.index.get(&entry) {
            return Ok(index);
        }
        let index = self.slots.len();
        if index + usize::from(entry.width()) > usize::from(u16::MAX) {
            return Err(AssembleError::PoolOverflow);
        }
        let index = index as u16;
        let wide = entry.width() == 2;
        self.index.insert(entry.clone(), index);
        self.slots.push(Some(entry));
        if wide {
            self.slots.push(None);
        }
        Ok(index)
    }

    pub fn utf8(&mut self, value: &str) -> Result<u16> {
        let bytes = modified_utf8(value);
        let length = u16::try_from(bytes.len()).map_err(|_| AssembleError::Utf8TooLong { length: bytes.len() })?;
        self.intern(PoolEntry::Utf8 { length, bytes })
    }

    pub fn integer(&mut self, value: i32) -> Result<u16> {
        self.intern(PoolEntry::Integer(value))
    }

    pub fn float(&mut self, value: f32) -> Result<u16> {
        self.intern(PoolEntry::Float(value.to_bits()))
    }

    pub fn long(&mut self, value: i64) -> Result<u16> {
        self.intern(PoolEntry::Long(value))
    }

    pub fn double(&mut self, value: f64) -> Result<u16> {
        self.intern(PoolEntry::Double(value.to_bits()))
    }

    /// A class by internal name (`java/lang/String`, or a descriptor for arrays).
    pub fn class(&mut self, internal_name: &str) -> Result<u16> {
        let name_index = self.utf8(internal_name)?;
        self.intern(PoolEntry::Class { name_index })
    }

    pub fn string(&mut self, value: &str) -> Result<u16> {
        let string_index = self.utf8(value)?;
        self.intern(PoolEntry::String { string_index })
    }

    pub fn name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16> {
        let name_index = self.utf8(name)?;
        let descriptor_index = self.utf8(descriptor)?;
        self.intern(PoolEntry::NameAndType {
            name_index,
            descriptor_index,
        })
    }

    pub fn field_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16> {
        let class_index = self.class(owner)?;
        let name_and_type_index = self.name_and_type(name, descriptor)?;
        self.intern(PoolEntry::FieldRef {
            class_index,
            name_and_type_index,
        })
    }

    pub fn method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16> {
        let class_index = self.class(owner)?;
        let name_and_type_index = self.name_and_type(name, descriptor)?;
        self.intern(PoolEntry::MethodRef {
            class_index,
            name_and_type_index,
        })
    }

    pub fn interface_method_ref(&mut self, owner: &str, name: &str, descriptor: &str) -> Result<u16> {
        let class_index = self.class(owner)?;
        let name_and_type_index = self.name_and_type(name, descriptor)?;
        self.intern(PoolEntry::InterfaceMethodRef {
            class_index,
            name_and_type_index,
        })
    }

    /// `constant_pool_count` followed by the entries.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf = Cursor::new(Vec::new());
        self.count().write_be(&mut buf)?;
        for (_, entry) in self.iter() {
            entry.write(&mut buf)?;
        }
        Ok(buf.into_inner())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        let count = u16::read_be(&mut cursor)?;
        let mut pool = ConstantPool::new();
        while pool.slots.len() < usize::from(count) {
            let entry = PoolEntry::read(&mut cursor)?;
            let index = pool.slots.len() as u16;
            let wide = entry.width() == 2;
            pool.index.entry(entry.clone()).or_insert(index);
            pool.slots.push(Some(entry));
            if wide {
                pool.slots.push(None);
            }
        }
        Ok(pool)
    }
}

/// The class file string encoding: NUL as two bytes, supplementary
/// characters as a surrogate pair of three-byte sequences.
pub fn modified_utf8(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\0' => out.extend_from_slice(&[0xc0, 0x80]),
            c if (c as u32) < 0x10000 => {
                let mut buf = [0; 3];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
            c => {
                let mut units = [0; 2];
                for unit in c.encode_utf16(&mut units) {
                    out.push(0xe0 | (*unit >> 12) as u8);
                    out.push(0x80 | ((*unit >> 6) & 0x3f) as u8);
                    out.push(0x80 | (*unit & 0x3f) as u8);
                }
            }
        }
    }
    out
}
