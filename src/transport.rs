/*!
    This module provides the trait [Transport], through which every remote call of this library is issued.

    The remote procedure call middleware itself is not part of this library: the user implements [Transport] on top of its client. Requests and responses are plain data, the service to call is given by the [Service] bound in the device [Registry].
*/

use crate::{
    attribute::Elements,
    error::{DictError, DictResult, Target},
    registry::{Registry, Service, ServiceKey},
    };
use futures::future::BoxFuture;
use core::time::Duration;
use std::sync::Arc;


/**
    trait implementing remote calls to device services

    Each call produces one response. Calls must be idempotent for reads, since they are reissued when a previous attempt failed.
    The error is the message reported by the middleware, it is wrapped with the failing item before reaching the user.
*/
pub trait Transport: Send + Sync {
    fn call<'a>(&'a self, service: &'a Service, request: Request) -> BoxFuture<'a, Result<Response, String>>;
}

/// request sent to a device service
#[derive(Clone, Debug, PartialEq)]
pub enum Request {
    ReadId {idn: u16, elements: Elements},
    WriteId {idn: u16, elements: Elements, value: String},
    SetCommand {idn: u16},
    GetConfig,
    ProcessData,
    ObjectDictionaryList,
    ReadObject {index: u16},
    ReadElement {index: u16, sub: u8},
    GetState {module: String},
    SetState {module: String, state: i32},
    GetPhase,
    SetPhase {phase: i32, at_address: u8},
    /// write flash words starting at the given byte offset, `last` marks the final block
    Phase5Write {offset: u32, data: Vec<u16>, last: bool},
    /// read the flash words available from the given byte offset
    Phase6Read {offset: u32},
}

/// response of a device service
#[derive(Clone, Debug, PartialEq)]
pub enum Response {
    /// parts of a SERCOS IDN, as selected in the request [Elements]
    Id(IdReply),
    /// write or command accepted
    Done,
    /// status code returned by a state or phase change, or current state
    Status(i32),
    Text(String),
    Bytes(Vec<u8>),
    Words(Vec<u16>),
    Indices(Vec<u16>),
    Object(ObjectReply),
    Element(ElementReply),
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct IdReply {
    /// name in code page 437
    pub name: Vec<u8>,
    /// raw attribute word
    pub attr: u32,
    /// textual representation of the value, in code page 437
    pub value: Vec<u8>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ObjectReply {
    /// name in latin-1
    pub name: Vec<u8>,
    /// highest sub-index of the object
    pub max_subindices: u8,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ElementReply {
    /// name in latin-1
    pub name: Vec<u8>,
    /// raw content of the element
    pub value: Vec<u8>,
}


/**
    a transport bound to the services of one device

    It resolves service keys through the registry, bounds every call with a timeout and attaches the failing item to errors.
*/
#[derive(Clone)]
pub struct Channel {
    transport: Arc<dyn Transport>,
    registry: Arc<Registry>,
    timeout: Duration,
}

impl Channel {
    pub fn new(transport: Arc<dyn Transport>, registry: Registry, timeout: Duration) -> Self {
        Self {transport, registry: Arc::new(registry), timeout}
    }
    pub fn registry(&self) -> &Registry {&self.registry}

    /// issue a remote call and wait for its response
    pub async fn call(&self, key: ServiceKey, request: Request, target: Target) -> DictResult<Response> {
        let service = self.registry.get(key)?;
        log::trace!("calling {} for {}: {:?}", service.name, target, request);
        match tokio::time::timeout(self.timeout, self.transport.call(service, request)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(message)) => Err(DictError::Remote(target, message)),
            Err(_) => Err(DictError::Timeout(target)),
        }
    }
}

impl Response {
    pub fn into_id(self, target: Target) -> DictResult<IdReply> {
        match self {
            Self::Id(reply) => Ok(reply),
            _ => Err(DictError::Malformed(target, "expected an IDN reply")),
        }
    }
    pub fn into_object(self, target: Target) -> DictResult<ObjectReply> {
        match self {
            Self::Object(reply) => Ok(reply),
            _ => Err(DictError::Malformed(target, "expected an object reply")),
        }
    }
    pub fn into_element(self, target: Target) -> DictResult<ElementReply> {
        match self {
            Self::Element(reply) => Ok(reply),
            _ => Err(DictError::Malformed(target, "expected an element reply")),
        }
    }
    pub fn into_status(self, target: Target) -> DictResult<i32> {
        match self {
            Self::Status(status) => Ok(status),
            _ => Err(DictError::Malformed(target, "expected a status code")),
        }
    }
    pub fn into_text(self, target: Target) -> DictResult<String> {
        match self {
            Self::Text(text) => Ok(text),
            _ => Err(DictError::Malformed(target, "expected text")),
        }
    }
    pub fn into_bytes(self, target: Target) -> DictResult<Vec<u8>> {
        match self {
            Self::Bytes(bytes) => Ok(bytes),
            _ => Err(DictError::Malformed(target, "expected a byte buffer")),
        }
    }
    pub fn into_words(self, target: Target) -> DictResult<Vec<u16>> {
        match self {
            Self::Words(words) => Ok(words),
            _ => Err(DictError::Malformed(target, "expected flash words")),
        }
    }
    pub fn into_indices(self, target: Target) -> DictResult<Vec<u16>> {
        match self {
            Self::Indices(indices) => Ok(indices),
            _ => Err(DictError::Malformed(target, "expected a list of indices")),
        }
    }
    /// accept any response that is not carrying data
    pub fn into_done(self, target: Target) -> DictResult {
        match self {
            Self::Done => Ok(()),
            Self::Status(status) if status >= 0 => Ok(()),
            Self::Status(_) => Err(DictError::Remote(target, "device refused the request".into())),
            _ => Err(DictError::Malformed(target, "unexpected data in acknowledge")),
        }
    }
}
