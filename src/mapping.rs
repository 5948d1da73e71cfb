/*!
    Layout of the cyclic process data of SERCOS drives.

    A drive declares which IDNs it exchanges cyclically in two configuration lists: IDN 16 for the data it sends (AT telegram, inputs of the master) and IDN 24 for the data it receives (MDT telegram, outputs of the master). The process image starts with a 16 bit status or control word, then holds the values of the listed IDNs in order, each taking the size given by its attribute word.

    ## Example

    ```ignore
    let mut map = device.process_data_map(Direction::Input).await?;
    while ! device.resolve_map(&mut map) {
        tokio::time::sleep(interval).await;
    }
    let image = device.process_data(Direction::Input).await?;
    let position = map.value(51, &image)?;
    ```
*/

use crate::{
    attribute::AttributeWord,
    data::Field,
    error::{DictError, DictResult, Target},
    registry::ServiceKey,
    sercos::SercosDevice,
    transport::Request,
    value::Value,
    };
use bilge::prelude::*;


/// offset of the first mapped value, after the status or control word
pub const FIRST_OFFSET: usize = 2;

/// direction of cyclic data, seen from the master
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Direction {
    /// sent by the drive (AT)
    Input,
    /// received by the drive (MDT)
    Output,
}

impl Direction {
    /// IDN listing the content of the process data in this direction
    pub fn config_idn(self) -> u16 {
        match self {
            Self::Input => 16,
            Self::Output => 24,
        }
    }
    fn service(self) -> ServiceKey {
        match self {
            Self::Input => ServiceKey::ProcessDataIn,
            Self::Output => ServiceKey::ProcessDataOut,
        }
    }
}

/**
    status word at the start of the input process image of a drive

    fields are given from least significant bit to most significant bit
*/
#[bitsize(16)]
#[derive(FromBits, DebugBits, Copy, Clone, Eq, PartialEq)]
pub struct StatusWord {
    reserved: u6,
    /// state of the emergency stop input, not reported by every drive
    pub emergency: u2,
    pub controller: ControllerMode,
    pub class3_warning: bool,
    /// warnings are detailed in IDN 12
    pub class2_warning: bool,
    /// error stopping the drive, detailed by the diagnosis IDN 95 and cleared by the command IDN 99
    pub class1_error: bool,
    pub power: PowerState,
}

/// loop currently closed by the drive controller
#[bitsize(3)]
#[derive(FromBits, Debug, Copy, Clone, Eq, PartialEq)]
pub enum ControllerMode {
    Position = 0,
    Torque = 1,
    Speed = 2,
    NoControl = 3,
    StateFeedback = 4,
    #[fallback]
    Reserved,
}

/// readiness of the drive power stage
#[bitsize(2)]
#[derive(FromBits, Debug, Copy, Clone, Eq, PartialEq)]
pub enum PowerState {
    NotReady = 0,
    /// logic is powered but the emergency stop is pressed
    LogicReady = 1,
    ReadyPowerOff = 2,
    ReadyPowerOn = 3,
}

impl StatusWord {
    /// true if the drive reports neither error nor warning
    pub fn is_ok(&self) -> bool {
        ! (self.class1_error() || self.class2_warning() || self.class3_warning())
    }
}

/// location of an IDN value in the process image
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct MappedIdn {
    pub idn: u16,
    /// byte offset in the process image
    pub offset: usize,
    /// byte size, 2 or 4
    pub length: usize,
    pub decimalpoint: u8,
}

impl MappedIdn {
    /// engineering value of this IDN in the given process image
    pub fn value(&self, image: &[u8]) -> DictResult<f64> {
        let target = Target::Idn(self.idn);
        let raw = match self.length {
            2 => Field::<i16>::new(self.offset, 2).get(image).map(f64::from),
            _ => Field::<i32>::new(self.offset, 4).get(image).map(f64::from),
        }.map_err(|_| DictError::Malformed(target, "process image too short"))?;
        Ok(raw * 10f64.powi(-i32::from(self.decimalpoint)))
    }
}

/// the layout of the process image in one direction
#[derive(Clone, Debug, PartialEq)]
pub struct ProcessDataMap {
    direction: Direction,
    idns: Vec<u16>,
    resolved: Option<Vec<MappedIdn>>,
}

impl ProcessDataMap {
    /// unresolved layout of the given IDNs
    pub fn new(direction: Direction, idns: Vec<u16>) -> Self {
        Self {direction, idns, resolved: None}
    }
    pub fn direction(&self) -> Direction {self.direction}
    pub fn idns(&self) -> &[u16] {&self.idns}
    pub fn is_resolved(&self) -> bool {self.resolved.is_some()}
    /// offsets of the mapped IDNs, available once resolved
    pub fn entries(&self) -> Option<&[MappedIdn]> {self.resolved.as_deref()}

    /**
        compute the offsets of all IDNs from their attribute words

        `lookup` gives the attribute word of an IDN if it is valid. If any is missing, the map stays unresolved and false is returned.
    */
    pub fn resolve(&mut self, lookup: impl Fn(u16) -> Option<AttributeWord>) -> bool {
        let mut offset = FIRST_OFFSET;
        let mut entries = Vec::with_capacity(self.idns.len());
        for &idn in &self.idns {
            let Some(attr) = lookup(idn)
                else {return false};
            let length = attr.datalength_bytes();
            entries.push(MappedIdn {
                idn,
                offset,
                length,
                decimalpoint: attr.decimalpoint().value(),
            });
            offset += length;
        }
        self.resolved = Some(entries);
        true
    }

    /// byte size of the process image, once resolved
    pub fn size(&self) -> Option<usize> {
        let entries = self.resolved.as_ref()?;
        Some(entries.last().map_or(FIRST_OFFSET, |last| last.offset + last.length))
    }

    pub fn get(&self, idn: u16) -> DictResult<&MappedIdn> {
        self.resolved.as_ref()
            .ok_or(DictError::Client("process data map is not resolved"))?
            .iter()
            .find(|entry| entry.idn == idn)
            .ok_or(DictError::Client("IDN is not mapped in process data"))
    }
    /// engineering value of an IDN in the given process image
    pub fn value(&self, idn: u16, image: &[u8]) -> DictResult<f64> {
        self.get(idn)?.value(image)
    }
    /// status word of an input image, or control word of an output image
    pub fn status_word(image: &[u8]) -> DictResult<u16> {
        Field::<u16>::new(0, 2).get(image)
            .map_err(|_| DictError::Malformed(Target::Service(ServiceKey::ProcessDataIn), "process image too short"))
    }
    /// decoded status word of an input image
    pub fn status(image: &[u8]) -> DictResult<StatusWord> {
        Self::status_word(image).map(StatusWord::from)
    }
}


impl SercosDevice {
    /// read the configuration list of the given direction and return its unresolved map
    pub async fn process_data_map(&self, direction: Direction) -> DictResult<ProcessDataMap> {
        let idn = direction.config_idn();
        let list = self.fetch(idn, false).await?.value;
        let idns = list.as_ref()
            .and_then(Value::as_list)
            .ok_or(DictError::Malformed(Target::Idn(idn), "expected a list of IDNs"))?
            .iter()
            .map(|&item| u16::try_from(item).map_err(|_| DictError::Malformed(Target::Idn(idn), "IDN out of range")))
            .collect::<DictResult<Vec<u16>>>()?;
        log::debug!("{}: {:?} process data maps {:?}", self.module(), direction, idns);
        Ok(ProcessDataMap::new(direction, idns))
    }

    /**
        try to resolve a map with the cached attribute words

        reads are requested for the mapped IDNs not read yet, so a later call can succeed
    */
    pub fn resolve_map(&self, map: &mut ProcessDataMap) -> bool {
        map.resolve(|idn| {
            let snapshot = self.get(idn, false);
            if snapshot.is_valid() {snapshot.attribute()} else {None}
        })
    }

    /// current process image in the given direction
    pub async fn process_data(&self, direction: Direction) -> DictResult<Vec<u8>> {
        let key = direction.service();
        let target = Target::Service(key);
        self.channel().call(key, Request::ProcessData, target).await?
            .into_bytes(target)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribute::{AttributeFields, DataType};

    fn attr(datalength_code: u8, decimalpoint: u8) -> AttributeWord {
        AttributeWord::from(AttributeFields {datatype: DataType::SignedDecimal, datalength_code, decimalpoint}.encode())
    }

    #[test]
    fn offsets_follow_lengths() {
        let mut map = ProcessDataMap::new(Direction::Input, vec![51, 40, 84]);
        let lengths = |idn: u16| match idn {
            51 => Some(attr(2, 4)),
            40 => Some(attr(1, 0)),
            84 => Some(attr(6, 1)),
            _ => None,
        };
        assert!(map.resolve(lengths));
        let offsets: Vec<_> = map.entries().unwrap().iter().map(|entry| (entry.offset, entry.length)).collect();
        assert_eq!(offsets, vec![(2, 4), (6, 2), (8, 4)]);
        assert_eq!(map.size(), Some(12));

        let mut image = vec![0u8; 12];
        image[0 .. 2].copy_from_slice(&0x1234u16.to_le_bytes());
        image[2 .. 6].copy_from_slice(&(-123_456i32).to_le_bytes());
        image[6 .. 8].copy_from_slice(&(-7i16).to_le_bytes());
        assert!((map.value(51, &image).unwrap() + 12.3456).abs() < 1e-9);
        assert_eq!(map.value(40, &image).unwrap(), -7.);
        assert_eq!(ProcessDataMap::status_word(&image).unwrap(), 0x1234);
        assert!(map.value(17, &image).is_err());
        assert!(map.value(84, &image[.. 10]).is_err());
    }

    #[test]
    fn status_word_fields() {
        let status = StatusWord::from(0xC000);
        assert_eq!(status.power(), PowerState::ReadyPowerOn);
        assert_eq!(status.controller(), ControllerMode::Position);
        assert!(status.is_ok());

        let status = ProcessDataMap::status(&[0x40, 0x23]).unwrap();
        assert!(status.class1_error());
        assert!(! status.class2_warning());
        assert_eq!(status.controller(), ControllerMode::NoControl);
        assert_eq!(status.power(), PowerState::NotReady);
        assert_eq!(status.emergency().value(), 1);
        assert!(! status.is_ok());

        assert!(StatusWord::from(0x1000).class2_warning());
        assert!(StatusWord::from(0x0800).class3_warning());
        assert_eq!(StatusWord::from(0x8200).controller(), ControllerMode::Speed);
        assert_eq!(StatusWord::from(0x8200).power(), PowerState::ReadyPowerOff);
        assert_eq!(StatusWord::from(0x0600).controller(), ControllerMode::Reserved);
        assert!(ProcessDataMap::status(&[0]).is_err());
    }

    #[test]
    fn missing_attribute_leaves_unresolved() {
        let mut map = ProcessDataMap::new(Direction::Output, vec![47, 36]);
        assert!(! map.resolve(|idn| (idn == 47).then(|| attr(2, 0))));
        assert!(! map.is_resolved());
        assert!(map.value(47, &[0; 8]).is_err());
        assert_eq!(Direction::Output.config_idn(), 24);
    }
}
