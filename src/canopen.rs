/*!
    CANopen object dictionaries of EtherCAT slaves.

    Objects are identified by their index and hold a number of sub-elements. Reading an object gives its name and its highest sub-index, reading a sub-element gives its name and raw content. Both kinds of reads go through the same [Cache], so they share the single request slot of the device.
*/

use crate::{
    cache::{Cache, Dictionary, Reading, Snapshot},
    config::ClientConfig,
    error::{DictError, DictResult, Target},
    registry::{Registry, ServiceKey},
    transport::{Channel, Request, Response, Transport},
    value::{decode_latin1, Value},
    };
use std::sync::Arc;
use tokio::sync::OnceCell;


/// entry of a CANopen dictionary
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum CanKey {
    /// an object as a whole, by index
    Object(u16),
    /// a sub-element of an object, by index and sub-index
    Element(u16, u8),
}

/// reads of CANopen objects and sub-elements
#[derive(Copy, Clone, Debug, Default)]
pub struct CanopenDictionary;

impl Dictionary for CanopenDictionary {
    type Key = CanKey;

    fn target(&self, key: CanKey) -> Target {
        match key {
            CanKey::Object(index) => Target::Object(index),
            CanKey::Element(index, sub) => Target::Element(index, sub),
        }
    }

    fn request(&self, key: CanKey) -> (ServiceKey, Request) {
        match key {
            CanKey::Object(index) => (ServiceKey::ReadObject, Request::ReadObject {index}),
            CanKey::Element(index, sub) => (ServiceKey::ReadElement, Request::ReadElement {index, sub}),
        }
    }

    fn decode(&self, key: CanKey, response: Response) -> DictResult<Reading> {
        let target = self.target(key);
        Ok(match key {
            CanKey::Object(_) => {
                let reply = response.into_object(target)?;
                Reading {
                    name: Some(decode_latin1(&reply.name)),
                    attr: None,
                    value: Some(Value::Integer(reply.max_subindices.into())),
                }
            },
            CanKey::Element(..) => {
                let reply = response.into_element(target)?;
                Reading {
                    name: Some(decode_latin1(&reply.name)),
                    attr: None,
                    value: Some(Value::Bytes(reply.value)),
                }
            },
        })
    }
}


/// client of the object dictionary of a CANopen slave
pub struct CanopenDevice {
    module: String,
    cache: Cache<CanopenDictionary>,
    indices: OnceCell<Vec<u16>>,
}

impl CanopenDevice {
    /// bind to the services of the given kernel module
    pub fn new(transport: Arc<dyn Transport>, module: &str, config: ClientConfig) -> Self {
        let channel = Channel::new(transport, Registry::canopen(module), config.read_timeout());
        Self {
            module: module.to_owned(),
            cache: Cache::new(CanopenDictionary, channel, config),
            indices: OnceCell::new(),
        }
    }

    pub fn module(&self) -> &str {&self.module}
    pub fn cache(&self) -> &Cache<CanopenDictionary> {&self.cache}

    /// indices of all objects of the dictionary, the list is read from the device on first call only
    pub async fn list_dictionary(&self) -> DictResult<Vec<u16>> {
        let indices = self.indices.get_or_try_init(|| async {
            let target = Target::Service(ServiceKey::ObjectDictionaryList);
            let indices = self.cache.channel()
                .call(ServiceKey::ObjectDictionaryList, Request::ObjectDictionaryList, target).await?
                .into_indices(target)?;
            for &index in &indices
                {self.cache.register(CanKey::Object(index));}
            log::debug!("{}: {} objects in dictionary", self.module, indices.len());
            DictResult::Ok(indices)
        }).await?;
        Ok(indices.clone())
    }

    /// cached name and highest sub-index of an object, see [Cache::get]
    pub fn get_object(&self, index: u16, force: bool) -> Snapshot {
        self.cache.get(CanKey::Object(index), force)
    }
    pub async fn fetch_object(&self, index: u16, force: bool) -> DictResult<Snapshot> {
        self.cache.fetch(CanKey::Object(index), force).await
    }
    /// cached name and raw content of a sub-element, see [Cache::get]
    pub fn get_element(&self, index: u16, sub: u8, force: bool) -> Snapshot {
        self.cache.get(CanKey::Element(index, sub), force)
    }
    pub async fn fetch_element(&self, index: u16, sub: u8, force: bool) -> DictResult<Snapshot> {
        self.cache.fetch(CanKey::Element(index, sub), force).await
    }

    /**
        sub-indices of an object, from 0 to its highest sub-index

        empty until the object has been read
    */
    pub fn subindices(&self, index: u16) -> Vec<u8> {
        let Some(snapshot) = self.cache.snapshot(CanKey::Object(index))
            else {return Vec::new()};
        match snapshot.value.as_ref().and_then(Value::as_i64) {
            Some(max) if snapshot.is_valid() => (0 ..= max.clamp(0, 255) as u8).collect(),
            _ => Vec::new(),
        }
    }

    /// read an object and create the entries of its sub-elements
    pub async fn fetch_subindices(&self, index: u16) -> DictResult<Vec<u8>> {
        let snapshot = self.fetch_object(index, false).await?;
        let max = snapshot.value.as_ref()
            .and_then(Value::as_i64)
            .and_then(|max| u8::try_from(max).ok())
            .ok_or(DictError::Malformed(Target::Object(index), "invalid number of sub-indices"))?;
        for sub in 0 ..= max
            {self.cache.register(CanKey::Element(index, sub));}
        Ok((0 ..= max).collect())
    }
}
