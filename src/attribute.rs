/*!
    SERCOS attribute words.

    Every SERCOS IDN comes with a 32 bit attribute describing how its value is encoded: data type, data length, position of the decimal point, write protections. This module decodes it into [AttributeWord], and exposes the element mask used to choose which parts of an IDN are read.
*/

use bilge::prelude::*;
use core::fmt;


/**
    SERCOS IDN attribute word

    fields are given from least significant bit to most significant bit
*/
#[bitsize(32)]
#[derive(FromBits, DebugBits, Copy, Clone, Eq, PartialEq)]
pub struct AttributeWord {
    /// factor to apply to the raw value for display, ignored by this library
    pub conversion_factor: u16,
    /// code of the data length, see [DataLength]
    pub datalength: u3,
    /// true if the IDN is a procedure command
    pub function: bool,
    /// display format of the value
    pub datatype: DataType,
    reserved1: u1,
    /// number of decimal places of the value
    pub decimalpoint: u4,
    /// write protected in communication phase 2
    pub wp_cp2: bool,
    /// write protected in communication phase 3
    pub wp_cp3: bool,
    /// write protected in communication phase 4
    pub wp_cp4: bool,
    reserved2: u1,
}

/// display format of an IDN value
#[bitsize(3)]
#[derive(FromBits, Debug, Copy, Clone, Eq, PartialEq)]
pub enum DataType {
    Number = 0,
    UnsignedDecimal = 1,
    SignedDecimal = 2,
    UnsignedHex = 3,
    ExtCharset = 4,
    Unsigned = 5,
    Float = 6,
    Reserved = 7,
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Number => "Number",
            Self::UnsignedDecimal => "Unsigned Decimal",
            Self::SignedDecimal => "Signed Decimal",
            Self::UnsignedHex => "Unsigned Hex",
            Self::ExtCharset => "Extcharset",
            Self::Unsigned => "Unsigned",
            Self::Float => "Float",
            Self::Reserved => "Reserved",
        })
    }
}

/// data length code of an IDN value
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DataLength {
    NotAvailable,
    Fixed2,
    Fixed4,
    Var1,
    Var2,
    Var4,
    /// codes not used by the devices handled here
    Reserved(u8),
}

impl DataLength {
    pub fn from_code(code: u8) -> Self {
        match code {
            0 => Self::NotAvailable,
            1 => Self::Fixed2,
            2 => Self::Fixed4,
            4 => Self::Var1,
            5 => Self::Var2,
            6 => Self::Var4,
            other => Self::Reserved(other),
        }
    }
    /// true for lists and strings, which are transmitted with a length prefix
    pub fn is_variable(&self) -> bool {
        matches!(self, Self::Var1 | Self::Var2 | Self::Var4)
    }
    /**
        byte size used when the value is transferred in process data

        1-byte variable items are transferred in 2 bytes, unknown codes default to 4 bytes.
    */
    pub fn bytes(&self) -> usize {
        match self {
            Self::Fixed2 | Self::Var1 | Self::Var2 => 2,
            Self::Fixed4 | Self::Var4 => 4,
            Self::NotAvailable | Self::Reserved(_) => 4,
        }
    }
}

impl fmt::Display for DataLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAvailable => f.write_str("not available"),
            Self::Fixed2 => f.write_str("2-Byte-fix"),
            Self::Fixed4 => f.write_str("4-Byte-fix"),
            Self::Var1 => f.write_str("1-Byte-var"),
            Self::Var2 => f.write_str("2-Byte-var"),
            Self::Var4 => f.write_str("4-Byte-var"),
            Self::Reserved(code) => write!(f, "reserved ({})", code),
        }
    }
}

/// the fields of an attribute word that matter for decoding a value
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct AttributeFields {
    pub datatype: DataType,
    pub datalength_code: u8,
    pub decimalpoint: u8,
}

impl AttributeFields {
    /// pack the fields into an attribute word, other bits are left to zero
    pub fn encode(&self) -> u32 {
        let mut word = AttributeWord::from(0u32);
        word.set_datatype(self.datatype);
        word.set_datalength(u3::new(self.datalength_code & 0b111));
        word.set_decimalpoint(u4::new(self.decimalpoint & 0b1111));
        u32::from(word)
    }
    pub fn datalength(&self) -> DataLength {
        DataLength::from_code(self.datalength_code)
    }
}

/// extract the value related fields from a raw attribute word
pub fn decode(word: u32) -> AttributeFields {
    AttributeWord::from(word).fields()
}

impl AttributeWord {
    pub fn fields(&self) -> AttributeFields {
        AttributeFields {
            datatype: self.datatype(),
            datalength_code: self.datalength().value(),
            decimalpoint: self.decimalpoint().value(),
        }
    }
    /// decoded data length code
    pub fn length(&self) -> DataLength {
        DataLength::from_code(self.datalength().value())
    }
    /// byte size of the value in process data
    pub fn datalength_bytes(&self) -> usize {
        self.length().bytes()
    }
    /// factor to multiply the raw integer with to get the engineering value
    pub fn scale(&self) -> f64 {
        10f64.powi(-i32::from(self.decimalpoint().value()))
    }
}


/**
    selection of the parts of an IDN to transfer with a read or write request

    the raw byte is `0x8c` for name, attribute and value, `0xfe` for everything.
*/
#[bitsize(8)]
#[derive(FromBits, DebugBits, Copy, Clone, Eq, PartialEq)]
pub struct Elements {
    reserved: bool,
    pub structure: bool,
    pub name: bool,
    pub attribute: bool,
    pub unit: bool,
    pub min_value: bool,
    pub max_value: bool,
    pub value: bool,
}

impl Elements {
    /// only the value
    pub fn value_only() -> Self {Self::from(0x80u8)}
    /// only the name
    pub fn name_only() -> Self {Self::from(0x04u8)}
    /// what is needed to cache an IDN: name, attribute and value
    pub fn cached() -> Self {Self::from(0x8cu8)}
    /// every element
    pub fn all() -> Self {Self::from(0xfeu8)}
}
