use binrw::{binrw, binwrite};

/// The body of a `Code` attribute, without the attribute name and length header.
#[derive(Clone, Debug, PartialEq, Eq)]
#[binrw]
#[brw(big)]
pub struct CodeAttribute {
    pub max_stack: u16,
    pub max_locals: u16,
    pub code_length: u32,
    #[br(count = code_length)]
    pub code: Vec<u8>,
    pub exception_table_length: u16,
    #[br(count = exception_table_length)]
    pub exception_table: Vec<ExceptionEntry>,
    pub attributes_count: u16,
    #[br(count = attributes_count)]
    pub attributes: Vec<AttributeInfo>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
#[binrw]
#[brw(big)]
pub struct ExceptionEntry {
    pub start_pc: u16,
    pub end_pc: u16,
    pub handler_pc: u16,
    /// Constant pool index of the caught class; 0 catches everything.
    pub catch_type: u16,
}

/// A nested attribute kept as raw bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
#[binrw]
#[brw(big)]
pub struct AttributeInfo {
    pub attribute_name_index: u16,
    pub attribute_length: u32,
    #[br(count = attribute_length)]
    pub info: Vec<u8>,
}

/// One encoded instruction, grouped by operand layout. Branch and switch
/// offsets are already resolved relative to the instruction's own address.
#[derive(Clone, Debug, PartialEq, Eq)]
#[binwrite]
#[bw(import { address: u32 })]
#[bw(big)]
pub enum Instruction {
    Op(u8),
    /// Local index or `ldc` pool index.
    OpU8(u8, u8),
    /// `bipush`.
    OpI8(u8, i8),
    /// `sipush` and 16-bit branches.
    OpI16(u8, i16),
    /// Constant pool references.
    OpU16(u8, u16),
    #[bw(magic = 0x84u8)]
    Iinc { index: u8, value: i8 },
    #[bw(magic = 0xb9u8)]
    InvokeInterface {
        index: u16,
        #[bw(pad_after = 1)]
        count: u8,
    },
    /// A load or store with a 16-bit local index.
    #[bw(magic = 0xc4u8)]
    Wide(u8, u16),
    #[bw(magic = b"\xc4\x84")]
    WideIinc { index: u16, value: i16 },
    #[bw(magic = 0xaau8)]
    Tableswitch {
        #[bw(pad_before = ((4 - (address + 1) % 4) % 4))]
        default: i32,
        low: i32,
        high: i32,
        offsets: Vec<i32>,
    },
    #[bw(magic = 0xabu8)]
    Lookupswitch {
        #[bw(pad_before = ((4 - (address + 1) % 4) % 4))]
        default: i32,
        npairs: u32,
        pairs: Vec<(i32, i32)>,
    },
}

/// Bytes between a switch opcode at `address` and its first 4-byte operand.
pub(crate) fn switch_padding(address: u32) -> u32 {
    (4 - (address + 1) % 4) % 4
}

impl Instruction {
    /// Encoded length in bytes when placed at `address`.
    pub fn byte_size(&self, address: u32) -> u32 {
        match self {
            Instruction::Op(_) => 1,
            Instruction::OpU8(..) | Instruction::OpI8(..) => 2,
            Instruction::OpI16(..) | Instruction::OpU16(..) | Instruction::Iinc { .. } => 3,
            Instruction::Wide(..) => 4,
            Instruction::InvokeInterface { .. } => 5,
            Instruction::WideIinc { .. } => 6,
            Instruction::Tableswitch { offsets, .. } => 1 + switch_padding(address) + 12 + 4 * offsets.len() as u32,
            Instruction::Lookupswitch { pairs, .. } => 1 + switch_padding(address) + 8 + 8 * pairs.len() as u32,
        }
    }
}
