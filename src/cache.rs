/*!
    Lazy cache of the entries of a device dictionary, serializing the remote reads of the device.

    Devices answer one service channel request at a time, so a [Cache] never has more than one read in flight per device: a read requested while another entry is being read is postponed and polled again every [ClientConfig::retry_interval](crate::config::ClientConfig::retry_interval).

    The cache itself is independent from the kind of dictionary, the [Dictionary] trait tells it how to build read requests and how to decode their responses. It is implemented for SERCOS IDNs in [crate::sercos] and CANopen objects in [crate::canopen].

    ## Example

    ```ignore
    // returns immediately, possibly with an outdated or missing value
    let snapshot = device.cache().get(30, false);
    // waits until the value is read
    let snapshot = device.cache().fetch(30, false).await?;
    ```
*/

use crate::{
    attribute::{AttributeWord, AttributeFields},
    config::ClientConfig,
    error::{DictError, DictResult, Target},
    registry::ServiceKey,
    transport::{Channel, Request, Response},
    value::Value,
    };
use core::{
    fmt::Debug,
    hash::Hash,
    };
use std::{
    collections::HashMap,
    sync::{Arc, Weak, Mutex, MutexGuard, PoisonError, RwLock},
    };
use tokio::{
    sync::Notify,
    task::JoinHandle,
    };


/// how to read the entries of a particular kind of device dictionary
pub trait Dictionary: Send + Sync + 'static {
    /// identifier of an entry in the dictionary
    type Key: Copy + Eq + Hash + Debug + Send + Sync + 'static;

    /// remote item corresponding to a key, used to report errors
    fn target(&self, key: Self::Key) -> Target;
    /// service and request reading the given entry
    fn request(&self, key: Self::Key) -> (ServiceKey, Request);
    /// decode the response to [Self::request]
    fn decode(&self, key: Self::Key, response: Response) -> DictResult<Reading>;
}

/// content extracted from a read response, fields left to `None` are not updated in the cache
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Reading {
    pub name: Option<String>,
    pub attr: Option<u32>,
    pub value: Option<Value>,
}

/// state of a cache entry
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum EntryState {
    /// never read or invalidated, a read may be scheduled
    #[default]
    Unset,
    /// a remote read is in flight, this entry owns the request slot of the device
    Pending,
    /// the last read succeeded and nothing invalidated it since
    Valid,
    /// too many reads failed, only a forced [Cache::get] reads it again
    Failed,
}

/// copy of a cache entry at some point in time
#[derive(Clone, Debug)]
pub struct Snapshot {
    pub name: Option<String>,
    pub raw_attr: Option<u32>,
    /// last value read, it may be outdated if the entry is not valid
    pub value: Option<Value>,
    pub state: EntryState,
    /// last failure of a read of this entry, cleared by a successful read
    pub error: Option<DictError>,
}

impl Snapshot {
    pub fn is_valid(&self) -> bool {self.state == EntryState::Valid}
    pub fn attribute(&self) -> Option<AttributeWord> {
        self.raw_attr.map(AttributeWord::from)
    }
    pub fn fields(&self) -> Option<AttributeFields> {
        self.attribute().map(|attr| attr.fields())
    }
}

#[derive(Default)]
struct Entry {
    name: Option<String>,
    raw_attr: Option<u32>,
    value: Option<Value>,
    state: EntryState,
    /// set when invalidated while a read is in flight
    outdated: bool,
    /// polls postponed because the device was busy, since the device last completed a read
    retries: u32,
    /// consecutive failed reads
    failures: u32,
    error: Option<DictError>,
    retry: Option<JoinHandle<()>>,
}

impl Entry {
    fn snapshot(&self) -> Snapshot {
        Snapshot {
            name: self.name.clone(),
            raw_attr: self.raw_attr,
            value: self.value.clone(),
            state: self.state,
            error: self.error.clone(),
        }
    }
    fn retry_scheduled(&self) -> bool {
        self.retry.as_ref().map_or(false, |handle| ! handle.is_finished())
    }
    fn cancel_retry(&mut self) {
        if let Some(handle) = self.retry.take()
            {handle.abort();}
    }
}


/**
    the pieces of state a device needs to serialize its requests

    - at most one entry read is in flight
    - at most one parameter set is selected for update
*/
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct DeviceRequestState<K> {
    pending: Option<K>,
    parameter_update: Option<u16>,
}

impl<K> Default for DeviceRequestState<K> {
    fn default() -> Self {
        Self {pending: None, parameter_update: None}
    }
}

impl<K: Copy + Eq> DeviceRequestState<K> {
    /// key of the read in flight
    pub fn pending(&self) -> Option<K> {self.pending}
    /// parameter set currently selected for update
    pub fn selected_set(&self) -> Option<u16> {self.parameter_update}

    /// take the request slot for `key`, return false if it is already taken
    pub fn try_acquire(&mut self, key: K) -> bool {
        if self.pending.is_some()
            {return false}
        self.pending = Some(key);
        true
    }
    /// free the request slot if owned by `key`
    pub fn release(&mut self, key: K) {
        if self.pending == Some(key)
            {self.pending = None;}
    }
    /// select a parameter set for update, return false if another set is selected
    pub fn try_select_set(&mut self, set: u16) -> bool {
        match self.parameter_update {
            Some(selected) => selected == set,
            None => {
                self.parameter_update = Some(set);
                true
            },
        }
    }
    /// end the update of a parameter set if selected
    pub fn release_set(&mut self, set: u16) {
        if self.parameter_update == Some(set)
            {self.parameter_update = None;}
    }
}

struct State<K> {
    entries: HashMap<K, Entry>,
    device: DeviceRequestState<K>,
}

/// callback called with the key of each entry whose read completed
pub type Observer<K> = Arc<dyn Fn(K) + Send + Sync>;

struct Shared<D: Dictionary> {
    dictionary: D,
    channel: Channel,
    config: ClientConfig,
    state: Mutex<State<D::Key>>,
    /// notified each time a read completes
    changed: Notify,
    observer: RwLock<Option<Observer<D::Key>>>,
}

/**
    cache of the entries of one device dictionary

    This struct is cheap to clone, clones share the same entries. Methods spawning reads must be called from within a tokio runtime.
*/
pub struct Cache<D: Dictionary> {
    shared: Arc<Shared<D>>,
}

impl<D: Dictionary> Clone for Cache<D> {
    fn clone(&self) -> Self {
        Self {shared: self.shared.clone()}
    }
}

impl<D: Dictionary> Cache<D> {
    pub fn new(dictionary: D, channel: Channel, config: ClientConfig) -> Self {
        Self {shared: Arc::new(Shared {
            dictionary,
            channel,
            config,
            state: Mutex::new(State {
                entries: HashMap::new(),
                device: DeviceRequestState::default(),
            }),
            changed: Notify::new(),
            observer: RwLock::new(None),
        })}
    }

    pub fn dictionary(&self) -> &D {&self.shared.dictionary}
    pub fn channel(&self) -> &Channel {&self.shared.channel}
    pub fn config(&self) -> &ClientConfig {&self.shared.config}

    /// set the function called after each completed read, replacing the previous one
    pub fn set_observer(&self, observer: impl Fn(D::Key) + Send + Sync + 'static) {
        *self.shared.observer.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(observer));
    }

    fn lock(&self) -> MutexGuard<'_, State<D::Key>> {
        self.shared.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// create an entry without reading it, return false if it already existed
    pub fn register(&self, key: D::Key) -> bool {
        let mut state = self.lock();
        if state.entries.contains_key(&key)
            {return false}
        state.entries.insert(key, Entry::default());
        true
    }
    /// keys of the entries created so far
    pub fn keys(&self) -> Vec<D::Key> {
        self.lock().entries.keys().copied().collect()
    }
    /// current content of an entry, without triggering any read
    pub fn snapshot(&self, key: D::Key) -> Option<Snapshot> {
        self.lock().entries.get(&key).map(Entry::snapshot)
    }
    pub fn state(&self, key: D::Key) -> EntryState {
        self.lock().entries.get(&key).map_or(EntryState::Unset, |entry| entry.state)
    }
    /// entries currently in the [EntryState::Pending] state
    pub fn pending(&self) -> Vec<D::Key> {
        self.lock().entries.iter()
            .filter(|(_, entry)| entry.state == EntryState::Pending)
            .map(|(key, _)| *key)
            .collect()
    }
    /// copy of the request state of the device
    pub fn request_state(&self) -> DeviceRequestState<D::Key> {
        self.lock().device
    }

    /**
        get the cached content of an entry, scheduling a read if it is not valid

        This function does not wait for the read. With `force`, a valid or failed entry is read again, keeping its outdated value meanwhile.
    */
    pub fn get(&self, key: D::Key, force: bool) -> Snapshot {
        let mut state = self.lock();
        let State {entries, device} = &mut *state;
        let entry = entries.entry(key).or_default();

        if force {
            entry.retries = 0;
            entry.failures = 0;
        }
        match entry.state {
            EntryState::Pending => return entry.snapshot(),
            EntryState::Valid | EntryState::Failed if ! force => return entry.snapshot(),
            EntryState::Unset if ! force && entry.retry_scheduled() => return entry.snapshot(),
            _ => {},
        }
        entry.state = EntryState::Unset;
        let gave_up = self.attempt(entry, device, key);
        let snapshot = entry.snapshot();
        drop(state);
        if gave_up
            {self.shared.changed.notify_waiters();}
        snapshot
    }

    /// poll triggered by a scheduled retry
    fn retry(&self, key: D::Key) {
        let mut state = self.lock();
        let State {entries, device} = &mut *state;
        let Some(entry) = entries.get_mut(&key)
            else {return};
        entry.retry = None;
        if entry.state != EntryState::Unset
            {return}
        let gave_up = self.attempt(entry, device, key);
        drop(state);
        if gave_up
            {self.shared.changed.notify_waiters();}
    }

    /// start a read if the device is available, or postpone it. Return true if the entry gave up
    fn attempt(&self, entry: &mut Entry, device: &mut DeviceRequestState<D::Key>, key: D::Key) -> bool {
        if device.try_acquire(key) {
            entry.state = EntryState::Pending;
            entry.retries = 0;
            entry.outdated = false;
            entry.cancel_retry();
            log::trace!("reading {:?}", key);
            tokio::spawn(self.clone().read(key));
            false
        }
        else if entry.retries >= self.shared.config.max_retries {
            let target = self.shared.dictionary.target(key);
            log::error!("giving up reading {}, the device stayed busy", target);
            entry.state = EntryState::Failed;
            entry.error = Some(DictError::Timeout(target));
            entry.cancel_retry();
            true
        }
        else {
            entry.retries += 1;
            self.schedule_retry(entry, key);
            false
        }
    }

    fn schedule_retry(&self, entry: &mut Entry, key: D::Key) {
        let shared = Arc::downgrade(&self.shared);
        let interval = self.shared.config.retry_interval();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            if let Some(shared) = Weak::upgrade(&shared)
                {Cache {shared}.retry(key);}
        });
        if let Some(previous) = entry.retry.replace(handle)
            {previous.abort();}
    }

    async fn read(self, key: D::Key) {
        let shared = &self.shared;
        let target = shared.dictionary.target(key);
        let (service, request) = shared.dictionary.request(key);
        let result = match shared.channel.call(service, request, target).await {
            Ok(response) => shared.dictionary.decode(key, response),
            Err(error) => Err(error),
        };

        {
            let mut state = self.lock();
            let State {entries, device} = &mut *state;
            device.release(key);
            // the device made progress, waiters start counting again
            for waiting in entries.values_mut() {
                if waiting.state == EntryState::Unset
                    {waiting.retries = 0;}
            }
            let entry = entries.entry(key).or_default();
            match result {
                Ok(reading) => {
                    if let Some(name) = reading.name   {entry.name = Some(name);}
                    if let Some(attr) = reading.attr   {entry.raw_attr = Some(attr);}
                    if let Some(value) = reading.value   {entry.value = Some(value);}
                    entry.failures = 0;
                    entry.error = None;
                    entry.state = if entry.outdated {EntryState::Unset} else {EntryState::Valid};
                    entry.outdated = false;
                    log::trace!("read {}", target);
                },
                Err(error) => {
                    log::error!("reading {} failed: {}", target, error);
                    entry.failures += 1;
                    entry.error = Some(error);
                    entry.outdated = false;
                    if entry.failures >= shared.config.max_failures {
                        log::error!("giving up reading {} after {} failures", target, entry.failures);
                        entry.state = EntryState::Failed;
                    }
                    else {
                        entry.state = EntryState::Unset;
                        self.schedule_retry(entry, key);
                    }
                },
            }
        }
        shared.changed.notify_waiters();

        let observer = shared.observer.read().unwrap_or_else(PoisonError::into_inner).clone();
        if let Some(observer) = observer
            {observer(key);}
    }

    /**
        wait for an entry to be valid, reading it if necessary

        fails with the last read error if the entry gave up
    */
    pub async fn fetch(&self, key: D::Key, force: bool) -> DictResult<Snapshot> {
        let mut force = force;
        loop {
            let changed = self.shared.changed.notified();
            let snapshot = self.get(key, force);
            force = false;
            match snapshot.state {
                EntryState::Valid => return Ok(snapshot),
                EntryState::Failed => return Err(snapshot.error
                    .unwrap_or(DictError::Timeout(self.shared.dictionary.target(key)))),
                _ => changed.await,
            }
        }
    }

    /**
        mark an entry as outdated so that its next [Self::get] reads it again

        A failed entry is reset, a read in flight completes without making its entry valid.
    */
    pub fn invalidate(&self, key: D::Key) {
        let mut state = self.lock();
        let entry = state.entries.entry(key).or_default();
        match entry.state {
            EntryState::Pending => entry.outdated = true,
            _ => {
                entry.state = EntryState::Unset;
                entry.retries = 0;
                entry.failures = 0;
            },
        }
    }

    /// send a write request for an entry, then invalidate it. Writes do not wait for the request slot of the device
    pub async fn write(&self, key: D::Key, service: ServiceKey, request: Request) -> DictResult {
        let target = self.shared.dictionary.target(key);
        let result = self.shared.channel.call(service, request, target).await
            .and_then(|response| response.into_done(target));
        self.invalidate(key);
        result
    }

    /// select a parameter set for update, see [DeviceRequestState::try_select_set]
    pub fn try_select_set(&self, set: u16) -> bool {
        self.lock().device.try_select_set(set)
    }
    /// like [Self::try_select_set], but tells whether the set was already selected: `Some(true)` if this call took the selection
    pub fn claim_set(&self, set: u16) -> Option<bool> {
        let mut state = self.lock();
        let held = state.device.selected_set() == Some(set);
        state.device.try_select_set(set).then_some(! held)
    }
    pub fn release_set(&self, set: u16) {
        self.lock().device.release_set(set)
    }
    pub fn selected_set(&self) -> Option<u16> {
        self.lock().device.selected_set()
    }
}
