/*!
    Intel-HEX firmware images.

    Firmware of SERCOS drives is exchanged as Intel-HEX text holding 16 bit words. This module decodes such text into a sparse [HexImage] and encodes it back using data records and extended linear address records.

    Words are stored big-endian in records (4 hex digits each), addresses are byte addresses, so consecutive words are 2 addresses apart.
*/

use crate::{
    config::ChecksumPolicy,
    error::{DictError, DictResult},
    };
use std::{
    collections::BTreeMap,
    fmt::Write as _,
    path::Path,
    };


/// record terminating a file
pub const EOF_RECORD: &str = ":00000001FF";
/// maximum number of words in an encoded data record
pub const RECORD_WORDS: usize = 32;

/// the kinds of Intel-HEX records
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RecordType {
    Data = 0x00,
    EndOfFile = 0x01,
    ExtendedSegmentAddress = 0x02,
    StartSegmentAddress = 0x03,
    ExtendedLinearAddress = 0x04,
    StartLinearAddress = 0x05,
}

impl TryFrom<u8> for RecordType {
    type Error = u8;
    fn try_from(code: u8) -> Result<Self, u8> {
        Ok(match code {
            0x00 => Self::Data,
            0x01 => Self::EndOfFile,
            0x02 => Self::ExtendedSegmentAddress,
            0x03 => Self::StartSegmentAddress,
            0x04 => Self::ExtendedLinearAddress,
            0x05 => Self::StartLinearAddress,
            other => return Err(other),
        })
    }
}

/// checksum to append to `bytes` so that the sum of all is 0 modulo 256
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter()
        .fold(0u8, |sum, byte| sum.wrapping_add(*byte))
        .wrapping_neg()
}

/**
    check the checksum of a record line

    returns whether the record is valid and the checksum computed from its payload. Lines must start with the `:` marker.
*/
pub fn check_record(line: &str) -> DictResult<(bool, u8)> {
    let bytes = record_bytes(line.trim(), 0)?;
    let (payload, stored) = split_checksum(&bytes, 0)?;
    let computed = checksum(payload);
    Ok((computed == stored, computed))
}

fn record_bytes(line: &str, number: usize) -> DictResult<Vec<u8>> {
    let digits = line.strip_prefix(':')
        .ok_or(DictError::Format {line: number, message: "missing record marker"})?;
    if digits.len() % 2 != 0
        {return Err(DictError::Format {line: number, message: "odd number of hex digits"})}
    (0 .. digits.len()).step_by(2)
        .map(|i| digits.get(i .. i+2)
            .and_then(|pair| u8::from_str_radix(pair, 16).ok())
            .ok_or(DictError::Format {line: number, message: "invalid hex digit"}))
        .collect()
}

fn split_checksum(bytes: &[u8], number: usize) -> DictResult<(&[u8], u8)> {
    match bytes.split_last() {
        Some((&stored, payload)) if payload.len() >= 4 => Ok((payload, stored)),
        _ => Err(DictError::Format {line: number, message: "record too short"}),
    }
}


/// a word of an image differing from the one read back from a device
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Mismatch {
    pub address: u32,
    pub expected: u16,
    pub found: u16,
}

/// a fixed size block of words, ready to be written to flash
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FlashBlock {
    /// byte address of the first word
    pub address: u32,
    /// words of the block, padded with `0xffff`
    pub data: Vec<u16>,
    /// true for the final block of the image
    pub last: bool,
}

/**
    sparse firmware image, mapping byte addresses to 16 bit words

    ```
    # use sercodict::hex::HexImage;
    let mut image = HexImage::new();
    image.put_data(0x2462, &[0x464c, 0x4f57]);
    let text = image.to_records();
    assert_eq!(HexImage::parse(&text, Default::default()).unwrap(), image);
    ```
*/
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct HexImage {
    words: BTreeMap<u32, u16>,
}

impl HexImage {
    pub fn new() -> Self {Self::default()}

    pub fn len(&self) -> usize {self.words.len()}
    pub fn is_empty(&self) -> bool {self.words.is_empty()}

    pub fn get(&self, address: u32) -> Option<u16> {
        self.words.get(&address).copied()
    }
    pub fn insert(&mut self, address: u32, word: u16) {
        self.words.insert(address, word);
    }
    /// store consecutive words starting at the given byte address
    pub fn put_data(&mut self, address: u32, words: &[u16]) {
        for (i, &word) in words.iter().enumerate() {
            self.words.insert(address.wrapping_add(2 * i as u32), word);
        }
    }
    /// words in ascending address order
    pub fn iter(&self) -> impl Iterator<Item=(u32, u16)> + '_ {
        self.words.iter().map(|(&address, &word)| (address, word))
    }
    /// lowest and highest addresses holding a word
    pub fn bounds(&self) -> Option<(u32, u32)> {
        let first = self.words.keys().next()?;
        let last = self.words.keys().next_back()?;
        Some((*first, *last))
    }

    /// decode Intel-HEX text
    pub fn parse(text: &str, policy: ChecksumPolicy) -> DictResult<Self> {
        let mut image = Self::new();
        let mut base = 0u32;
        for (index, line) in text.lines().enumerate() {
            let number = index + 1;
            let line = line.trim();
            if ! line.starts_with(':')
                {continue}

            let bytes = record_bytes(line, number)?;
            let (content, stored) = split_checksum(&bytes, number)?;
            let computed = checksum(content);
            if computed != stored {
                match policy {
                    ChecksumPolicy::Strict => return Err(DictError::Checksum {line: number, expected: computed, found: stored}),
                    ChecksumPolicy::Lenient => log::warn!("checksum mismatch line {}: computed {:02X}, stored {:02X}",
                                                    number, computed, stored),
                }
            }

            let length = usize::from(content[0]);
            let offset = u16::from_be_bytes([content[1], content[2]]);
            let data = &content[4..];
            if data.len() != length
                {return Err(DictError::Format {line: number, message: "record length does not match its data"})}

            match RecordType::try_from(content[3]) {
                Ok(RecordType::Data) => {
                    let mut address = base.wrapping_add(u32::from(offset));
                    for chunk in data.chunks(2) {
                        // a trailing odd byte is kept as the low byte of a word
                        let word = match *chunk {
                            [high, low] => u16::from_be_bytes([high, low]),
                            _ => u16::from(chunk[0]),
                        };
                        image.words.insert(address, word);
                        address = address.wrapping_add(2);
                    }
                },
                Ok(RecordType::ExtendedLinearAddress) => {
                    let upper: [u8; 2] = data.try_into()
                        .map_err(|_| DictError::Format {line: number, message: "extended address must be 2 bytes"})?;
                    base = u32::from(u16::from_be_bytes(upper)) << 16;
                },
                Ok(other) => log::trace!("ignoring {:?} record line {}", other, number),
                Err(code) => log::debug!("ignoring unknown record type {:02X} line {}", code, number),
            }
        }
        Ok(image)
    }

    /// read and decode an Intel-HEX file
    pub fn load(path: impl AsRef<Path>, policy: ChecksumPolicy) -> DictResult<Self> {
        let path = path.as_ref();
        let image = Self::parse(&std::fs::read_to_string(path)?, policy)?;
        log::info!("loaded {} words from {}", image.len(), path.display());
        Ok(image)
    }

    /// encode the image as records, without the final EOF record
    pub fn to_records(&self) -> String {
        let mut text = String::new();
        let mut emitted_base = 0u32;
        let mut run = heapless::Vec::<u16, RECORD_WORDS>::new();
        let mut start = 0u32;

        for (&address, &word) in &self.words {
            let contiguous = ! run.is_empty()
                && u64::from(address) == u64::from(start) + 2 * run.len() as u64
                && address >> 16 == start >> 16;
            if ! contiguous || run.is_full() {
                if ! run.is_empty()
                    {push_data(&mut text, start, &run);}
                run.clear();
                start = address;
                if start >> 16 != emitted_base {
                    emitted_base = start >> 16;
                    push_record(&mut text, 0, RecordType::ExtendedLinearAddress, &(emitted_base as u16).to_be_bytes());
                }
            }
            // the run has just been flushed if it was full
            let _ = run.push(word);
        }
        if ! run.is_empty()
            {push_data(&mut text, start, &run);}
        text
    }

    /// write the records of the image to a stream, without the final EOF record
    pub fn write_records(&self, mut dst: impl std::io::Write) -> DictResult {
        dst.write_all(self.to_records().as_bytes())?;
        Ok(())
    }

    /// write the image to a complete Intel-HEX file, replacing the destination at once
    pub fn save(&self, path: impl AsRef<Path>) -> DictResult {
        let mut text = self.to_records();
        text.push_str(EOF_RECORD);
        text.push('\n');
        crate::file::write_atomic(path.as_ref(), text.as_bytes())
    }

    /**
        split the image in blocks of `words` words, in ascending address order

        each block starts at the address of its first word and is padded with `0xffff`. Gaps inside a block are not represented, so the image is expected to be contiguous.
    */
    pub fn blocks(&self, words: usize) -> Vec<FlashBlock> {
        let words = words.max(1);
        let addresses: Vec<(u32, u16)> = self.iter().collect();
        let count = addresses.len().div_ceil(words);
        addresses.chunks(words)
            .enumerate()
            .map(|(i, chunk)| {
                let address = chunk[0].0;
                if chunk.iter().enumerate().any(|(j, (a, _))| u64::from(*a) != u64::from(address) + 2*j as u64)
                    {log::warn!("flash block at 0x{:x} is not contiguous", address);}
                let mut data: Vec<u16> = chunk.iter().map(|(_, word)| *word).collect();
                data.resize(words, 0xffff);
                FlashBlock {address, data, last: i+1 == count}
            })
            .collect()
    }

    /// compare words read from a device starting at `address` against the image, addresses absent from the image are skipped
    pub fn compare(&self, address: u32, words: &[u16]) -> Vec<Mismatch> {
        words.iter().enumerate()
            .filter_map(|(i, &found)| {
                let address = address.wrapping_add(2 * i as u32);
                let expected = self.get(address)?;
                (expected != found).then_some(Mismatch {address, expected, found})
            })
            .collect()
    }
}

fn push_data(text: &mut String, address: u32, words: &[u16]) {
    let data: Vec<u8> = words.iter().flat_map(|word| word.to_be_bytes()).collect();
    push_record(text, address as u16, RecordType::Data, &data);
}

fn push_record(text: &mut String, offset: u16, kind: RecordType, data: &[u8]) {
    let mut bytes = Vec::with_capacity(data.len() + 4);
    bytes.push(data.len() as u8);
    bytes.extend_from_slice(&offset.to_be_bytes());
    bytes.push(kind as u8);
    bytes.extend_from_slice(data);
    text.push(':');
    for byte in &bytes {
        let _ = write!(text, "{:02X}", byte);
    }
    let _ = writeln!(text, "{:02X}", checksum(&bytes));
}
