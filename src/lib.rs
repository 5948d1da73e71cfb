/*!
    Client for the device dictionaries of SERCOS drives and CANopen slaves, reached through a remote procedure call middleware.

    - [SercosDevice] caches the IDNs of a drive, hosts its [parameter] sets and [mapping] of process data
    - [CanopenDevice] caches the objects and sub-elements of a CANopen dictionary
    - [Flasher] reads and programs the firmware of a drive, exchanged as [HexImage]

    The middleware itself is provided by implementing [Transport].
    Reads are asynchronous and serialized per device by a [cache::Cache], so this library must be used within a tokio runtime.
*/

mod file;
pub mod data;
pub mod error;
pub mod attribute;
pub mod value;
pub mod hex;
pub mod registry;
pub mod transport;
pub mod config;
pub mod cache;
pub mod sercos;
pub mod parameter;
pub mod mapping;
pub mod canopen;
pub mod backup;
pub mod flash;

pub use crate::error::{DictError, DictResult, Target};
pub use crate::attribute::{AttributeWord, AttributeFields, DataType, DataLength, Elements};
pub use crate::value::Value;
pub use crate::hex::HexImage;
pub use crate::registry::{Registry, ServiceKey};
pub use crate::transport::{Transport, Request, Response, Channel};
pub use crate::config::{ClientConfig, ChecksumPolicy};
pub use crate::cache::{EntryState, Snapshot};
pub use crate::sercos::SercosDevice;
pub use crate::parameter::{ParameterSet, SetProgress, SetSelection};
pub use crate::mapping::{Direction, ProcessDataMap, StatusWord};
pub use crate::canopen::{CanopenDevice, CanKey};
pub use crate::flash::Flasher;
