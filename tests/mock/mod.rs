//! scripted in-memory devices answering the requests of the library
#![allow(dead_code)]

use futures::future::{BoxFuture, FutureExt};
use sercodict::{
    attribute::{AttributeFields, DataType},
    registry::Service,
    transport::{Transport, Request, Response, IdReply, ObjectReply, ElementReply},
    };
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Mutex, atomic::{AtomicUsize, Ordering}},
    time::Duration,
    };
use tokio::sync::Semaphore;


pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn attr(datatype: DataType, datalength_code: u8, decimalpoint: u8) -> u32 {
    AttributeFields {datatype, datalength_code, decimalpoint}.encode()
}

#[derive(Clone, Debug)]
pub struct Idn {
    pub name: String,
    pub attr: u32,
    pub value: String,
}

/// a SERCOS drive with parameter sets and process data
pub struct MockDrive {
    pub ids: Mutex<BTreeMap<u16, Idn>>,
    /// values of parameter IDNs, by selected set
    pub sets: Mutex<HashMap<(u16, u16), String>>,
    pub active_set: Mutex<u16>,
    pub calls: Mutex<Vec<(String, Request)>>,
    pub failing: Mutex<HashSet<u16>>,
    pub process_in: Mutex<Vec<u8>>,
    /// when set, reads wait for a permit
    pub gate: Option<Semaphore>,
    pub delay: Duration,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl MockDrive {
    pub fn new() -> Self {
        let mut ids = BTreeMap::new();
        let mut insert = |idn: u16, name: &str, attr: u32, value: &str| {
            ids.insert(idn, Idn {name: name.into(), attr, value: value.into()});
        };
        insert(16, "AT configuration list", attr(DataType::UnsignedDecimal, 6, 0), "[51, 40, 84]");
        insert(17, "IDN-list of all operation data", attr(DataType::UnsignedDecimal, 6, 0), "[16, 17, 30, 51, 40, 84, 104]");
        insert(24, "MDT configuration list", attr(DataType::UnsignedDecimal, 6, 0), "[47]");
        insert(25, "IDN-list of all procedure commands", attr(DataType::UnsignedDecimal, 6, 0), "[99, 216, 264]");
        insert(30, "Manufacturer version", attr(DataType::ExtCharset, 4, 0), "'DRIVE 1.2'");
        insert(40, "Velocity feedback value 1", attr(DataType::SignedDecimal, 1, 0), "0");
        insert(47, "Position command value", attr(DataType::SignedDecimal, 2, 4), "0");
        insert(51, "Position feedback value 1", attr(DataType::SignedDecimal, 2, 4), "123456");
        insert(84, "Torque feedback value", attr(DataType::SignedDecimal, 2, 1), "-15");
        insert(95, "Diagnostic message", attr(DataType::ExtCharset, 4, 0), "'A0013 Ready for power on'");
        insert(99, " Reset class 1 diagnostic ", attr(DataType::Unsigned, 1, 0), "0");
        insert(104, "Position loop Kv-factor", attr(DataType::UnsignedDecimal, 1, 2), "250");
        insert(216, "Switch parameter set", attr(DataType::Unsigned, 1, 0), "0");
        insert(217, "Parameter set preselection", attr(DataType::UnsignedDecimal, 1, 0), "0");
        insert(264, "Apply parameters", attr(DataType::Unsigned, 1, 0), "0");
        Self {
            ids: Mutex::new(ids),
            sets: Mutex::new(HashMap::new()),
            active_set: Mutex::new(0),
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            process_in: Mutex::new(Vec::new()),
            gate: None,
            delay: Duration::from_millis(1),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
    /// a drive whose reads wait for [Self::open]
    pub fn gated() -> Self {
        Self {gate: Some(Semaphore::new(0)), ..Self::new()}
    }
    /// a drive taking the given time to answer each read
    pub fn slow(delay: Duration) -> Self {
        Self {delay, ..Self::new()}
    }
    /// add `count` IDNs from `first` and list them in IDN 17
    pub fn extend(&self, first: u16, count: u16) {
        let mut ids = self.ids.lock().unwrap();
        for idn in first .. first + count {
            ids.insert(idn, Idn {
                name: format!("manufacturer parameter {}", idn),
                attr: attr(DataType::SignedDecimal, 2, 0),
                value: idn.to_string(),
            });
        }
        let list: Vec<String> = ids.keys().map(u16::to_string).collect();
        ids.get_mut(&17).unwrap().value = format!("[{}]", list.join(", "));
    }
    /// give every parameter of a set the same value
    pub fn fill_set(&self, set: u16, mantissa: &str) {
        let mut sets = self.sets.lock().unwrap();
        for slot in 0 .. 10 {
            sets.insert((set, 33034 + slot), mantissa.into());
            sets.insert((set, 33053 + slot), "0".into());
        }
    }
    pub fn open(&self) {
        if let Some(gate) = &self.gate
            {gate.add_permits(1_000_000);}
    }

    pub fn set_value(&self, idn: u16, value: &str) {
        if let Some(id) = self.ids.lock().unwrap().get_mut(&idn)
            {id.value = value.into();}
    }
    pub fn value(&self, idn: u16) -> Option<String> {
        self.ids.lock().unwrap().get(&idn).map(|id| id.value.clone())
    }
    /// number of calls matching a predicate
    pub fn count(&self, predicate: impl Fn(&Request) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|(_, request)| predicate(request)).count()
    }
    pub fn commands(&self, idn: u16) -> usize {
        self.count(|request| matches!(request, Request::SetCommand {idn: i} if *i == idn))
    }
    pub fn reads(&self, idn: u16) -> usize {
        self.count(|request| matches!(request, Request::ReadId {idn: i, ..} if *i == idn))
    }

    fn parameter(idn: u16) -> Option<u16> {
        match idn {
            33034 ..= 33043 | 33053 ..= 33062 => Some(idn),
            _ => None,
        }
    }

    async fn read_id(&self, idn: u16) -> Result<Response, String> {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.map_err(|e| e.to_string())?.forget();
        }
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if self.failing.lock().unwrap().contains(&idn)
            {return Err(format!("drive refused to read IDN {}", idn))}
        if let Some(idn) = Self::parameter(idn) {
            let set = *self.active_set.lock().unwrap();
            let value = self.sets.lock().unwrap().get(&(set, idn)).cloned().unwrap_or_else(|| "0".into());
            let length = if idn >= 33053 {1} else {2};
            return Ok(Response::Id(IdReply {
                name: format!("parameter {}", idn).into_bytes(),
                attr: attr(DataType::SignedDecimal, length, 0),
                value: value.into_bytes(),
            }))
        }
        let ids = self.ids.lock().unwrap();
        let id = ids.get(&idn).ok_or_else(|| format!("IDN {} does not exist", idn))?;
        Ok(Response::Id(IdReply {
            name: id.name.clone().into_bytes(),
            attr: id.attr,
            value: id.value.clone().into_bytes(),
        }))
    }

    fn write_id(&self, idn: u16, value: String) -> Result<Response, String> {
        if let Some(idn) = Self::parameter(idn) {
            let set = *self.active_set.lock().unwrap();
            self.sets.lock().unwrap().insert((set, idn), value);
            return Ok(Response::Done)
        }
        let mut ids = self.ids.lock().unwrap();
        let id = ids.get_mut(&idn).ok_or_else(|| format!("IDN {} does not exist", idn))?;
        id.value = value;
        Ok(Response::Done)
    }

    fn set_command(&self, idn: u16) -> Result<Response, String> {
        if idn == 216 {
            let selected = self.value(217).unwrap_or_default();
            *self.active_set.lock().unwrap() = selected.trim().parse().map_err(|_| "bad set number".to_string())?;
        }
        Ok(Response::Done)
    }
}

impl Transport for MockDrive {
    fn call<'a>(&'a self, service: &'a Service, request: Request) -> BoxFuture<'a, Result<Response, String>> {
        self.calls.lock().unwrap().push((service.name.clone(), request.clone()));
        async move {
            match request {
                Request::ReadId {idn, ..} => self.read_id(idn).await,
                Request::WriteId {idn, value, ..} => self.write_id(idn, value),
                Request::SetCommand {idn} => self.set_command(idn),
                Request::GetConfig => Ok(Response::Text("devices:\n- drive_1\n".into())),
                Request::ProcessData => Ok(Response::Bytes(self.process_in.lock().unwrap().clone())),
                other => Err(format!("unsupported request {:?}", other)),
            }
        }.boxed()
    }
}


/// a CANopen slave
pub struct MockSlave {
    pub objects: BTreeMap<u16, (&'static str, u8)>,
    pub calls: Mutex<Vec<Request>>,
}

impl MockSlave {
    pub fn new() -> Self {
        Self {
            objects: BTreeMap::from([
                (0x1000, ("Device type", 0)),
                (0x1008, ("Manufacturer device name", 0)),
                (0x1018, ("Identity object", 4)),
                ]),
            calls: Mutex::new(Vec::new()),
        }
    }
    pub fn count(&self, predicate: impl Fn(&Request) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|request| predicate(request)).count()
    }
}

impl Transport for MockSlave {
    fn call<'a>(&'a self, _service: &'a Service, request: Request) -> BoxFuture<'a, Result<Response, String>> {
        self.calls.lock().unwrap().push(request.clone());
        async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            match request {
                Request::ObjectDictionaryList => Ok(Response::Indices(self.objects.keys().copied().collect())),
                Request::ReadObject {index} => {
                    let (name, max) = self.objects.get(&index).ok_or("no such object")?;
                    Ok(Response::Object(ObjectReply {name: name.as_bytes().to_vec(), max_subindices: *max}))
                },
                Request::ReadElement {index, sub} => {
                    let (name, max) = self.objects.get(&index).ok_or("no such object")?;
                    if sub > *max
                        {return Err("no such sub-index".to_string())}
                    let name = if sub == 0 {name.to_string()} else {format!("{} \u{e9}l\u{e9}ment {}", name, sub)};
                    Ok(Response::Element(ElementReply {
                        name: name.chars().map(|c| c as u8).collect(),
                        value: vec![sub, 0, 0, 0],
                    }))
                },
                other => Err(format!("unsupported request {:?}", other)),
            }
        }.boxed()
    }
}


/// the flash memory of a drive behind its kernel module
pub struct MockFlash {
    pub state: Mutex<i32>,
    pub phase: Mutex<i32>,
    pub memory: Mutex<BTreeMap<u32, u16>>,
    pub calls: Mutex<Vec<(String, Request)>>,
    /// number of words returned by a read
    pub read_words: usize,
    /// phases the drive refuses to enter
    pub refused_phases: Vec<i32>,
}

impl MockFlash {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(2),
            phase: Mutex::new(4),
            memory: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            read_words: 64,
            refused_phases: Vec::new(),
        }
    }
    pub fn count(&self, predicate: impl Fn(&Request) -> bool) -> usize {
        self.calls.lock().unwrap().iter().filter(|(_, request)| predicate(request)).count()
    }
}

impl Transport for MockFlash {
    fn call<'a>(&'a self, service: &'a Service, request: Request) -> BoxFuture<'a, Result<Response, String>> {
        self.calls.lock().unwrap().push((service.name.clone(), request.clone()));
        async move {
            match request {
                Request::GetState {..} => Ok(Response::Status(*self.state.lock().unwrap())),
                Request::SetState {state, ..} => {
                    *self.state.lock().unwrap() = state;
                    Ok(Response::Status(0))
                },
                Request::GetPhase => Ok(Response::Status(*self.phase.lock().unwrap())),
                Request::SetPhase {phase, ..} => {
                    if self.refused_phases.contains(&phase)
                        {return Ok(Response::Status(-1))}
                    *self.phase.lock().unwrap() = phase;
                    Ok(Response::Status(0))
                },
                Request::Phase5Write {offset, data, ..} => {
                    if *self.phase.lock().unwrap() != 5
                        {return Err("not in phase 5".into())}
                    let mut memory = self.memory.lock().unwrap();
                    for (i, word) in data.into_iter().enumerate() {
                        memory.insert(offset + 2*i as u32, word);
                    }
                    Ok(Response::Done)
                },
                Request::Phase6Read {offset} => {
                    if *self.phase.lock().unwrap() != 6
                        {return Err("not in phase 6".into())}
                    let memory = self.memory.lock().unwrap();
                    Ok(Response::Words((0 .. self.read_words as u32)
                        .map(|i| memory.get(&(offset + 2*i)).copied().unwrap_or(0xffff))
                        .collect()))
                },
                other => Err(format!("unsupported request {:?}", other)),
            }
        }.boxed()
    }
}
