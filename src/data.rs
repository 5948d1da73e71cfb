//! Traits and impls used to read/write typed values in the byte buffers exchanged with a device.

use core::{
	marker::PhantomData,
	fmt,
	};

/**
	trait for data types that can be unpacked from a process image or any other buffer returned by a device

	Every value on the bus is little endian.
*/
pub trait BusData: Sized {
    /// byte size of the packed value
    const SIZE: usize;

    fn unpack(src: &[u8]) -> PackingResult<Self>;
}

/// error raised when a buffer does not fit the value to unpack
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum PackingError {
    BadSize(usize, &'static str),
}

pub type PackingResult<T> = Result<T, PackingError>;

/// macro implementing [BusData] for numeric types
macro_rules! num_busdata {
	($t: ty) => { impl crate::data::BusData for $t {
			const SIZE: usize = core::mem::size_of::<$t>();

			fn unpack(src: &[u8]) -> crate::data::PackingResult<Self> {
                if src.len() < Self::SIZE
                    {return Err(crate::data::PackingError::BadSize(src.len(), "not enough bytes for number"))}
                let mut bytes = [0; core::mem::size_of::<$t>()];
                bytes.copy_from_slice(&src[.. Self::SIZE]);
				Ok(Self::from_le_bytes(bytes))
			}
		}};
}

num_busdata!(u16);
num_busdata!(i16);
num_busdata!(i32);

/**
	locate some data in a buffer by its byte position and length, which must be extracted to type `T` to be processed in rust

	It acts like a getter of a value in a byte sequence. It does not point to the data but only holds its offset in the byte sequence, along with its length to dynamically check memory bounds.
*/
#[derive(Default, Eq, Hash)]
pub struct Field<T: BusData> {
    /// this is only here to mark that T is actually used
	extracted: PhantomData<T>,
	/// start byte index of the object
	pub byte: usize,
	/// byte length of the object
	pub len: usize,
}
impl<T: BusData> Field<T>
{
	/// build a Field from its byte offset and byte length
	pub const fn new(byte: usize, len: usize) -> Self {
		Self{extracted: PhantomData, byte, len}
	}

	/// extract the value pointed by the field in the given byte array
	pub fn get(&self, data: &[u8]) -> PackingResult<T> {
        let end = self.byte + self.len;
        if data.len() < end
            {return Err(PackingError::BadSize(data.len(), "buffer too short for field"))}
		T::unpack(&data[self.byte .. end])
	}
}
impl<T: BusData> fmt::Debug for Field<T> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Field{{0x{:x}, {}}}", self.byte, self.len)
	}
}
// [Clone] and [Copy] must be implemented manually to allow copying a field pointing to a type which does not implement this operation
impl<T: BusData> Clone for Field<T> {
    fn clone(&self) -> Self   {Self::new(self.byte, self.len)}
}
impl<T: BusData> Copy for Field<T> {}
impl<T: BusData> PartialEq for Field<T> {
    fn eq(&self, other: &Self) -> bool {
        self.byte == other.byte && self.len == other.len
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_little_endian() {
        let buffer = [0x34, 0x12, 0xfe, 0xff, 0xff, 0xff];
        assert_eq!(Field::<i32>::new(2, 4).get(&buffer).unwrap(), -2);
        assert_eq!(Field::<i16>::new(4, 2).get(&buffer).unwrap(), -1);
        assert_eq!(Field::<u16>::new(0, 2).get(&buffer).unwrap(), 0x1234);
    }

    #[test]
    fn field_out_of_bounds() {
        let buffer = [0u8; 3];
        assert!(Field::<i32>::new(0, 4).get(&buffer).is_err());
        assert!(Field::<u16>::new(2, 2).get(&buffer).is_err());
        // a field shorter than its type
        assert!(Field::<i32>::new(0, 2).get(&buffer).is_err());
    }
}
