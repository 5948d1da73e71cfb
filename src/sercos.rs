/*!
    SERCOS drives reached through the service channel of their kernel module.

    A [SercosDevice] gives cached access to the IDNs of one drive, and hosts the parameter sets ([crate::parameter]) and process data layouts ([crate::mapping]) built on top of them.
*/

use crate::{
    attribute::{self, Elements},
    cache::{Cache, Dictionary, Reading, Snapshot},
    config::ClientConfig,
    error::{DictError, DictResult, Target},
    mapping::StatusWord,
    parameter::ParameterSet,
    registry::{Registry, ServiceKey},
    transport::{Channel, Request, Response, Transport},
    value::{self, Value},
    };
use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex, PoisonError},
    };
use tokio::sync::OnceCell;


/// IDN holding the list of every IDN of the drive
pub const IDN_LIST: u16 = 17;
/// IDN holding the list of procedure commands of the drive
pub const IDN_COMMAND_LIST: u16 = 25;
/// IDN holding the name of the drive
pub const IDN_DEVICE_NAME: u16 = 30;
/// IDN holding the diagnosis message of the drive
pub const IDN_DIAGNOSIS: u16 = 95;
/// command clearing the class 1 errors of the drive
pub const IDN_RESET_CLASS1: u16 = 99;


/// reads of SERCOS IDNs, requesting name, attribute and value at once
#[derive(Copy, Clone, Debug, Default)]
pub struct SercosDictionary;

impl Dictionary for SercosDictionary {
    type Key = u16;

    fn target(&self, idn: u16) -> Target {Target::Idn(idn)}

    fn request(&self, idn: u16) -> (ServiceKey, Request) {
        (ServiceKey::ReadId, Request::ReadId {idn, elements: Elements::cached()})
    }

    fn decode(&self, idn: u16, response: Response) -> DictResult<Reading> {
        let target = Target::Idn(idn);
        let reply = response.into_id(target)?;
        let fields = attribute::decode(reply.attr);
        let text = value::decode_cp437(&reply.value);
        let value = value::decode_value(&text, Some(fields))
            .map_err(|message| DictError::Malformed(target, message))?;
        Ok(Reading {
            name: Some(value::decode_cp437(&reply.name).trim().to_owned()),
            attr: Some(reply.attr),
            value: Some(value),
        })
    }
}


/// client of the dictionary of a SERCOS drive
pub struct SercosDevice {
    module: String,
    cache: Cache<SercosDictionary>,
    pub(crate) sets: Mutex<BTreeMap<u16, ParameterSet>>,
    /// status word the current diagnosis was read for
    status: Mutex<Option<u16>>,
    commands: OnceCell<Vec<(u16, String)>>,
}

impl SercosDevice {
    /// bind to the services of the given kernel module
    pub fn new(transport: Arc<dyn Transport>, module: &str, config: ClientConfig) -> Self {
        let channel = Channel::new(transport, Registry::sercos(module), config.read_timeout());
        Self {
            module: module.to_owned(),
            cache: Cache::new(SercosDictionary, channel, config),
            sets: Mutex::new(BTreeMap::new()),
            status: Mutex::new(None),
            commands: OnceCell::new(),
        }
    }

    pub fn module(&self) -> &str {&self.module}
    pub fn cache(&self) -> &Cache<SercosDictionary> {&self.cache}
    pub fn config(&self) -> &ClientConfig {self.cache.config()}
    pub(crate) fn channel(&self) -> &Channel {self.cache.channel()}

    /// cached content of an IDN, scheduling a read if needed. See [Cache::get]
    pub fn get(&self, idn: u16, force: bool) -> Snapshot {
        self.cache.get(idn, force)
    }
    /// wait for the content of an IDN. See [Cache::fetch]
    pub async fn fetch(&self, idn: u16, force: bool) -> DictResult<Snapshot> {
        self.cache.fetch(idn, force).await
    }
    /// wait for the value of an IDN
    pub async fn value(&self, idn: u16) -> DictResult<Value> {
        self.fetch(idn, false).await?
            .value
            .ok_or(DictError::Malformed(Target::Idn(idn), "no value"))
    }

    /// write the value of an IDN, its cached content is then outdated
    pub async fn write(&self, idn: u16, value: &Value) -> DictResult {
        log::debug!("{}: writing IDN {} = {}", self.module, idn, value);
        self.cache.write(idn, ServiceKey::WriteId, Request::WriteId {
            idn,
            elements: Elements::value_only(),
            value: value.to_string(),
            }).await
    }

    /// start a procedure command
    pub async fn set_command(&self, idn: u16) -> DictResult {
        log::debug!("{}: command IDN {}", self.module, idn);
        let target = Target::Idn(idn);
        self.channel().call(ServiceKey::SetCommand, Request::SetCommand {idn}, target).await?
            .into_done(target)
    }

    /**
        list every IDN of the drive and create their cache entries

        the list itself is read only once, as any other IDN
    */
    pub async fn list_ids(&self) -> DictResult<Vec<u16>> {
        let target = Target::Idn(IDN_LIST);
        let list = self.fetch(IDN_LIST, false).await?.value;
        let ids = list.as_ref()
            .and_then(Value::as_list)
            .ok_or(DictError::Malformed(target, "expected a list of IDNs"))?
            .iter()
            .map(|&idn| u16::try_from(idn).map_err(|_| DictError::Malformed(target, "IDN out of range")))
            .collect::<DictResult<Vec<u16>>>()?;
        let new = ids.iter().filter(|&&idn| self.cache.register(idn)).count();
        log::debug!("{}: {} IDNs listed, {} new", self.module, ids.len(), new);
        Ok(ids)
    }

    /// name reported by the drive
    pub async fn device_name(&self) -> DictResult<String> {
        Ok(match self.value(IDN_DEVICE_NAME).await? {
            Value::Text(text) => text,
            other => other.to_string(),
        })
    }

    /**
        diagnosis message of the drive for the given status word

        The message is read again only when the status word differs from the one of the previous call.
    */
    pub async fn diagnosis(&self, status: StatusWord) -> DictResult<String> {
        let status = u16::from(status);
        let changed = self.status.lock().unwrap_or_else(PoisonError::into_inner)
            .replace(status) != Some(status);
        if changed
            {log::debug!("{}: status word changed to {:04X}h", self.module, status);}
        Ok(match self.fetch(IDN_DIAGNOSIS, changed).await?.value {
            Some(Value::Text(text)) => text,
            Some(other) => other.to_string(),
            None => String::new(),
        })
    }

    /// IDN and name of every procedure command of the drive, read once
    pub async fn commands(&self) -> DictResult<&[(u16, String)]> {
        let commands = self.commands.get_or_try_init(|| async {
            let target = Target::Idn(IDN_COMMAND_LIST);
            let list = self.fetch(IDN_COMMAND_LIST, false).await?.value;
            let ids = list.as_ref()
                .and_then(Value::as_list)
                .ok_or(DictError::Malformed(target, "expected a list of IDNs"))?
                .to_vec();
            let mut commands = Vec::with_capacity(ids.len());
            for idn in ids {
                let idn = u16::try_from(idn).map_err(|_| DictError::Malformed(target, "IDN out of range"))?;
                commands.push((idn, self.name(idn).await?));
            }
            log::debug!("{}: {} commands", self.module, commands.len());
            DictResult::Ok(commands)
        }).await?;
        Ok(commands.as_slice())
    }

    /// read only the name of an IDN, bypassing the cache
    async fn name(&self, idn: u16) -> DictResult<String> {
        let target = Target::Idn(idn);
        let request = Request::ReadId {idn, elements: Elements::name_only()};
        let reply = self.channel().call(ServiceKey::ReadId, request, target).await?
            .into_id(target)?;
        Ok(value::decode_cp437(&reply.name).trim().to_owned())
    }

    /// clear the class 1 errors of the drive
    pub async fn reset_errors(&self) -> DictResult {
        log::info!("{}: resetting class 1 errors", self.module);
        self.set_command(IDN_RESET_CLASS1).await
    }

    /// configuration of the kernel module driving this device
    pub async fn get_config(&self) -> DictResult<String> {
        let target = Target::Service(ServiceKey::GetConfig);
        self.channel().call(ServiceKey::GetConfig, Request::GetConfig, target).await?
            .into_text(target)
    }
}
