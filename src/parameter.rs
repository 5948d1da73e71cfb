/*!
    Parameter sets of SERCOS drives.

    A drive exposes 10 parameters at once, each as a pair of IDNs holding a mantissa and a decimal exponent. Which set of parameters these IDNs refer to is chosen by writing the set number to IDN 217 and starting the command IDN 216. Once written, the parameters are applied by the command IDN 264.

    Only one set can be selected on a drive at a time, so a [SercosDevice] updates one set at a time and other sets have to wait.
*/

use crate::{
    cache::EntryState,
    error::{DictError, DictResult, Target},
    sercos::SercosDevice,
    value::Value,
    };
use serde::{Serialize, Deserialize};
use std::{
    collections::BTreeMap,
    path::Path,
    sync::{MutexGuard, PoisonError},
    };


/// number of parameters in a set
pub const PARAMETERS: usize = 10;
/// IDN of the mantissa of the first parameter
pub const MANTISSA_BASE: u16 = 33034;
/// IDN of the exponent of the first parameter
pub const EXPONENT_BASE: u16 = 33053;
/// IDN receiving the number of the set to select
pub const IDN_SET_NUMBER: u16 = 217;
/// command selecting the set written to [IDN_SET_NUMBER]
pub const IDN_SELECT_COMMAND: u16 = 216;
/// command applying the parameters written
pub const IDN_APPLY_COMMAND: u16 = 264;

pub fn mantissa_idn(slot: usize) -> u16 {MANTISSA_BASE + slot as u16}
pub fn exponent_idn(slot: usize) -> u16 {EXPONENT_BASE + slot as u16}

/**
    split a value into a mantissa and a decimal exponent such that `value ~= mantissa * 10^exponent`

    The value is scaled by 10 as long as it has a fractional part, down to an exponent of -6. The mantissa is then divided back until it fits an `i32`, and truncated.
    Infinite and NaN values have no such decomposition.
*/
pub fn frexp10(value: f64) -> DictResult<(i32, i32)> {
    if ! value.is_finite()
        {return Err(DictError::Client("parameter value is not a finite number"))}
    let mut mantissa = value;
    let mut exponent = 0;
    while mantissa.fract() != 0. && exponent > -6 {
        exponent -= 1;
        mantissa *= 10.;
    }
    while mantissa.abs() > f64::from(i32::MAX) {
        exponent += 1;
        mantissa /= 10.;
    }
    Ok((mantissa.trunc() as i32, exponent))
}

/// inverse of [frexp10]
pub fn ldexp10(mantissa: f64, exponent: f64) -> f64 {
    mantissa * 10f64.powf(exponent)
}


/// one parameter of a set
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Parameter {
    pub name: String,
    /// last engineering value read or written
    pub value: f64,
    /// false until both the mantissa and the exponent are read since the last selection of the set
    pub valid: bool,
}

/// a set of parameters as known by the client
#[derive(Clone, Debug, PartialEq)]
pub struct ParameterSet {
    pub number: u16,
    pub name: String,
    pub parameters: [Parameter; PARAMETERS],
}

impl ParameterSet {
    pub fn new(number: u16, name: String) -> Self {
        Self {number, name, parameters: Default::default()}
    }
    pub fn is_valid(&self) -> bool {
        self.parameters.iter().all(|parameter| parameter.valid)
    }
    fn invalidate(&mut self) {
        for parameter in &mut self.parameters
            {parameter.valid = false;}
    }
    /// the file representation of this set
    pub fn record(&self) -> SetRecord {
        SetRecord {
            set: self.name.clone(),
            parameters: self.parameters.iter()
                .map(|parameter| BTreeMap::from([(parameter.name.clone(), parameter.value)]))
                .collect(),
        }
    }
}

/**
    parameter set as stored in definition and backup files

    ```yaml
    - set: position controller
      parameters:
      - kp: 12.5
      - ki: 0.02
    ```

    Sets are numbered by their position in the file, parameters by their position in their set.
*/
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SetRecord {
    pub set: String,
    /// each item maps the parameter name to its value
    pub parameters: Vec<BTreeMap<String, f64>>,
}

impl SetRecord {
    /// parameter name and value, for items with exactly one pair
    pub fn pairs(&self) -> impl Iterator<Item=Option<(&str, f64)>> + '_ {
        self.parameters.iter().map(|item| {
            let mut pairs = item.iter();
            match (pairs.next(), pairs.next()) {
                (Some((name, value)), None) => Some((name.as_str(), *value)),
                _ => None,
            }
        })
    }
}

/**
    selection of a parameter set for update, held by [SercosDevice::select_for_update]

    Other sets cannot be selected as long as it exists, the selection is released when it is dropped.
*/
pub struct SetSelection<'a> {
    device: &'a SercosDevice,
    number: u16,
    /// false if the set was already selected by someone else, who will release it
    owned: bool,
}

impl Drop for SetSelection<'_> {
    fn drop(&mut self) {
        if self.owned
            {self.device.cache().release_set(self.number);}
    }
}

/// progress of the update of a parameter set
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SetProgress {
    /// every parameter of the set is valid
    Ready,
    /// another set is being updated
    Busy,
    /// some parameters are still being read
    Pending,
}


impl SercosDevice {
    fn lock_sets(&self) -> MutexGuard<'_, BTreeMap<u16, ParameterSet>> {
        self.sets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// replace the known parameter sets by the given definitions
    pub fn define_parametersets(&self, definitions: &[SetRecord]) {
        let mut sets = self.lock_sets();
        sets.clear();
        for (number, definition) in definitions.iter().enumerate() {
            let mut set = ParameterSet::new(number as u16, definition.set.clone());
            for (parameter, pair) in set.parameters.iter_mut().zip(definition.pairs()) {
                if let Some((name, value)) = pair {
                    parameter.name = name.to_owned();
                    parameter.value = value;
                }
            }
            if definition.parameters.len() > PARAMETERS
                {log::warn!("set {} defines more than {} parameters", definition.set, PARAMETERS);}
            sets.insert(set.number, set);
        }
    }
    /// read parameter set definitions from a YAML file
    pub fn load_parameter_definitions(&self, path: impl AsRef<Path>) -> DictResult {
        let definitions: Vec<SetRecord> = serde_yaml::from_str(&std::fs::read_to_string(path)?)?;
        self.define_parametersets(&definitions);
        Ok(())
    }

    /// numbers of the known parameter sets
    pub fn parametersets(&self) -> Vec<u16> {
        self.lock_sets().keys().copied().collect()
    }
    /// current state of a parameter set, sets never used are reported with unnamed parameters
    pub fn parameterset(&self, number: u16) -> ParameterSet {
        self.lock_sets()
            .get(&number)
            .cloned()
            .unwrap_or_else(|| ParameterSet::new(number, String::new()))
    }
    fn with_set<T>(&self, number: u16, edit: impl FnOnce(&mut ParameterSet) -> T) -> T {
        let mut sets = self.lock_sets();
        edit(sets.entry(number).or_insert_with(|| ParameterSet::new(number, String::new())))
    }

    /// select a parameter set on the drive, outdating the cached parameters
    pub async fn select_parameterset(&self, number: u16) -> DictResult {
        self.write(IDN_SET_NUMBER, &Value::from(i64::from(number))).await?;
        self.set_command(IDN_SELECT_COMMAND).await?;
        for slot in 0 .. PARAMETERS {
            self.cache().invalidate(mantissa_idn(slot));
            self.cache().invalidate(exponent_idn(slot));
        }
        self.with_set(number, ParameterSet::invalidate);
        Ok(())
    }

    /// error returned when the selection of a parameter set stays taken by another set
    fn selection_busy() -> DictError {
        DictError::Timeout(Target::Idn(IDN_SET_NUMBER))
    }

    /**
        wait until no other parameter set is being updated, then select the given set on the drive

        The wait is bounded like the reads of the cache, by [max_retries](crate::config::ClientConfig::max_retries) polls every [retry_interval](crate::config::ClientConfig::retry_interval).
    */
    pub async fn select_for_update(&self, number: u16) -> DictResult<SetSelection<'_>> {
        let mut busy = 0;
        let owned = loop {
            if let Some(owned) = self.cache().claim_set(number)
                {break owned}
            busy += 1;
            if busy > self.config().max_retries {
                log::error!("{}: parameter set {} stayed busy, cannot select set {}",
                    self.module(), self.cache().selected_set().unwrap_or_default(), number);
                return Err(Self::selection_busy())
            }
            tokio::time::sleep(self.config().retry_interval()).await;
        };
        let selection = SetSelection {device: self, number, owned};
        self.select_parameterset(number).await?;
        Ok(selection)
    }

    /**
        make one step in the update of a parameter set

        The set is selected on the drive if not already, then every parameter not valid yet is requested. This function does not wait for the reads, call it again until it returns [SetProgress::Ready].
        With `force`, every parameter is read again.

        The set stays selected until it is ready or a read fails. A caller giving up before has to release it with [Cache::release_set](crate::cache::Cache::release_set).
    */
    pub async fn poll_parameters(&self, number: u16, force: bool) -> DictResult<SetProgress> {
        if force {
            self.with_set(number, ParameterSet::invalidate);
        }
        else if self.with_set(number, |set| set.is_valid()) {
            return Ok(SetProgress::Ready)
        }

        let selected = self.cache().selected_set() == Some(number);
        if ! self.cache().try_select_set(number)
            {return Ok(SetProgress::Busy)}
        if ! selected {
            log::debug!("{}: updating parameter set {}", self.module(), number);
            if let Err(error) = self.select_parameterset(number).await {
                self.cache().release_set(number);
                return Err(error)
            }
        }

        for slot in 0 .. PARAMETERS {
            if self.with_set(number, |set| set.parameters[slot].valid)
                {continue}
            let mantissa = self.get(mantissa_idn(slot), force);
            let exponent = self.get(exponent_idn(slot), force);
            for snapshot in [&mantissa, &exponent] {
                if snapshot.state == EntryState::Failed {
                    self.cache().release_set(number);
                    return Err(snapshot.error.clone()
                        .unwrap_or(DictError::Client("parameter read gave up")))
                }
            }
            if ! (mantissa.is_valid() && exponent.is_valid())
                {continue}
            let value = match (mantissa.value.as_ref().and_then(Value::as_f64),
                               exponent.value.as_ref().and_then(Value::as_f64)) {
                (Some(mantissa), Some(exponent)) => ldexp10(mantissa, exponent),
                _ => {
                    self.cache().release_set(number);
                    return Err(DictError::Malformed(Target::Idn(mantissa_idn(slot)), "parameter is not a number"))
                },
            };
            self.with_set(number, |set| {
                set.parameters[slot].value = value;
                set.parameters[slot].valid = true;
            });
        }

        if self.with_set(number, |set| set.is_valid()) {
            self.cache().release_set(number);
            log::debug!("{}: parameter set {} up to date", self.module(), number);
            Ok(SetProgress::Ready)
        }
        else {
            Ok(SetProgress::Pending)
        }
    }

    /**
        update a parameter set and wait until all its parameters are read

        Fails if another set keeps the drive busy for longer than the cache waits for a read. The selection is released if the returned future is dropped before completion.
    */
    pub async fn fetch_parameters(&self, number: u16, force: bool) -> DictResult<ParameterSet> {
        let _selection = SetSelection {device: self, number, owned: true};
        let mut force = force;
        let mut busy = 0;
        loop {
            match self.poll_parameters(number, force).await? {
                SetProgress::Ready => return Ok(self.parameterset(number)),
                SetProgress::Pending => busy = 0,
                SetProgress::Busy => {
                    busy += 1;
                    if busy > self.config().max_retries
                        {return Err(Self::selection_busy())}
                },
            }
            force = false;
            tokio::time::sleep(self.config().retry_interval()).await;
        }
    }

    /**
        write one parameter of a set

        - `select` selects the set on the drive first, waiting for the update of any other set to finish. Otherwise the currently selected set is written
        - `enable` applies the parameters once written
    */
    pub async fn set_parameter(&self, number: u16, slot: usize, value: f64, select: bool, enable: bool) -> DictResult {
        if slot >= PARAMETERS
            {return Err(DictError::Client("parameter slot out of range"))}
        let (mantissa, exponent) = frexp10(value)?;
        let _selection = match select {
            true => Some(self.select_for_update(number).await?),
            false => None,
        };
        log::debug!("{}: parameter {}:{} = {} ({}e{})", self.module(), number, slot, value, mantissa, exponent);
        self.write(mantissa_idn(slot), &Value::from(mantissa)).await?;
        self.write(exponent_idn(slot), &Value::from(exponent)).await?;
        self.with_set(number, |set| {
            set.parameters[slot].value = value;
            set.parameters[slot].valid = false;
        });
        if enable {
            self.set_command(IDN_APPLY_COMMAND).await?;
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frexp10_examples() {
        assert_eq!(frexp10(12.345).unwrap(), (12345, -3));
        assert_eq!(frexp10(-2.5).unwrap(), (-25, -1));
        assert_eq!(frexp10(1e6).unwrap(), (1_000_000, 0));
        assert_eq!(frexp10(0.).unwrap(), (0, 0));
        assert_eq!(frexp10(1e12).unwrap(), (1_000_000_000, 3));
        assert_eq!(frexp10(-1e12).unwrap(), (-1_000_000_000, 3));
    }

    #[test]
    fn frexp10_rejects_non_finite() {
        for value in [f64::INFINITY, f64::NEG_INFINITY, f64::NAN] {
            assert!(matches!(frexp10(value), Err(DictError::Client(_))), "{}", value);
        }
    }

    #[test]
    fn frexp10_resolution() {
        let mut value = 0.0001;
        while value <= 1e6 {
            for value in [value, -value, value * 3.7, -value * 1.234_567] {
                let (mantissa, exponent) = frexp10(value).unwrap();
                let decoded = ldexp10(mantissa.into(), exponent.into());
                let resolution = 10f64.powi(exponent);
                assert!((decoded - value).abs() <= resolution * 1.001,
                    "{} decoded as {}e{}", value, mantissa, exponent);
            }
            value *= 10.;
        }
    }

    #[test]
    fn set_records() {
        let records: Vec<SetRecord> = serde_yaml::from_str("
            - set: position
              parameters:
              - kp: 12
              - ki: 0.25
            ").unwrap();
        let pairs: Vec<_> = records[0].pairs().collect();
        assert_eq!(pairs, vec![Some(("kp", 12.)), Some(("ki", 0.25))]);

        let mut set = ParameterSet::new(0, "position".into());
        set.parameters[0] = Parameter {name: "kp".into(), value: 12., valid: true};
        set.parameters[1] = Parameter {name: "ki".into(), value: 0.25, valid: true};
        assert_eq!(set.record().parameters[..2], records[0].parameters[..]);
    }
}
