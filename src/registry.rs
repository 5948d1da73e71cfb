/*!
    Explicit binding of the remote services a device uses.

    Each device instance builds its [Registry] at construction: every [ServiceKey] it may call is bound to the name of the remote service (prefixed with the module name of the device) and to the interface the service implements. Calls then look the service up by key.
*/

use crate::error::{DictError, DictResult};
use std::collections::HashMap;


/// the operations a device may request from the middleware
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum ServiceKey {
    // SERCOS service channel
    ReadId,
    WriteId,
    SetCommand,
    // module inspection
    GetConfig,
    ProcessDataIn,
    ProcessDataOut,
    // CANopen object dictionary
    ObjectDictionaryList,
    ReadObject,
    ReadElement,
    // firmware flashing
    GetState,
    SetState,
    GetPhase,
    SetPhase,
    Phase5Write,
    Phase6Read,
}

/// a remote service bound to a device
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Service {
    /// full name of the service as published by the middleware
    pub name: String,
    /// interface definition implemented by the service
    pub interface: &'static str,
}

/// the set of services a device is bound to
#[derive(Clone, Debug, Default)]
pub struct Registry {
    services: HashMap<ServiceKey, Service>,
}

impl Registry {
    pub fn new() -> Self {Self::default()}

    /// bind a key to the service `name` implementing `interface`
    pub fn bind(&mut self, key: ServiceKey, name: String, interface: &'static str) -> &mut Self {
        self.services.insert(key, Service {name, interface});
        self
    }
    /// service bound to the given key
    pub fn get(&self, key: ServiceKey) -> DictResult<&Service> {
        self.services.get(&key)
            .ok_or(DictError::Client("service not available on this device"))
    }
    pub fn contains(&self, key: ServiceKey) -> bool {
        self.services.contains_key(&key)
    }

    /// services of a SERCOS device module
    pub fn sercos(module: &str) -> Self {
        let mut registry = Self::new();
        registry
            .bind(ServiceKey::ReadId,
                format!("{}.sercos_protocol.read_id", module),
                "robotkernel/sercos_protocol/read_id")
            .bind(ServiceKey::WriteId,
                format!("{}.sercos_protocol.write_id", module),
                "robotkernel/sercos_protocol/write_id")
            .bind(ServiceKey::SetCommand,
                format!("{}.sercos_protocol.set_command", module),
                "robotkernel/sercos_protocol/set_command")
            .bind(ServiceKey::GetConfig,
                format!("{}.get_config", module),
                "robotkernel/module/get_config")
            .bind(ServiceKey::ProcessDataIn,
                format!("{}.process_data_inspection.in", module),
                "robotkernel/process_data_inspection")
            .bind(ServiceKey::ProcessDataOut,
                format!("{}.process_data_inspection.out", module),
                "robotkernel/process_data_inspection");
        registry
    }

    /// services of a CANopen device module
    pub fn canopen(module: &str) -> Self {
        let mut registry = Self::new();
        registry
            .bind(ServiceKey::ObjectDictionaryList,
                format!("{}.canopen_protocol.object_dictionary_list", module),
                "robotkernel/canopen_protocol/object_dictionary_list")
            .bind(ServiceKey::ReadObject,
                format!("{}.canopen_protocol.read_object", module),
                "robotkernel/canopen_protocol/read_object")
            .bind(ServiceKey::ReadElement,
                format!("{}.canopen_protocol.read_element", module),
                "robotkernel/canopen_protocol/read_element");
        registry
    }

    /**
        services used to flash a SERCOS drive

        `name` is `kernel.module`: module states are services of the kernel, phases and flash accesses are services of the module.
    */
    pub fn flasher(name: &str) -> DictResult<Self> {
        let (kernel, module) = name.split_once('.')
            .ok_or(DictError::Client("flasher name must be kernel.module"))?;
        let mut registry = Self::new();
        registry
            .bind(ServiceKey::GetState,
                format!("{}.get_state", kernel),
                "robotkernel/get_state")
            .bind(ServiceKey::SetState,
                format!("{}.set_state", kernel),
                "robotkernel/set_state")
            .bind(ServiceKey::GetPhase,
                format!("{}.{}.get_phase", kernel, module),
                "sercos/get_phase")
            .bind(ServiceKey::SetPhase,
                format!("{}.{}.set_phase", kernel, module),
                "sercos/set_phase")
            .bind(ServiceKey::Phase5Write,
                format!("{}.{}.phase5_write", kernel, module),
                "sercos/phase5_write")
            .bind(ServiceKey::Phase6Read,
                format!("{}.{}.phase6_read", kernel, module),
                "sercos/phase6_read");
        Ok(registry)
    }
}
