/*!
    Backup and restoration of the configuration of SERCOS drives in YAML files.

    Two formats are used:

    - IDN backups, a list of IDNs with their name and value, in any order

        ```yaml
        - idn: 30
          name: Manufacturer version
          value: DRIVE 1.2
        ```

    - parameter set backups, the list of [SetRecord] in set order

    Files are replaced at once when written, so an interrupted backup never leaves a truncated file.
*/

use crate::{
    error::{DictError, DictResult},
    file::write_atomic,
    parameter::{SetRecord, IDN_APPLY_COMMAND},
    sercos::SercosDevice,
    value::Value,
    };
use futures_concurrency::future::Join;
use serde::{Serialize, Deserialize};
use std::path::Path;


/// an IDN as stored in backups
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IdRecord {
    pub idn: u16,
    #[serde(default)]
    pub name: String,
    pub value: Value,
}

pub fn parse_ids(text: &str) -> DictResult<Vec<IdRecord>> {
    Ok(serde_yaml::from_str(text)?)
}
pub fn dump_ids(records: &[IdRecord]) -> DictResult<String> {
    Ok(serde_yaml::to_string(records)?)
}
pub fn parse_parametersets(text: &str) -> DictResult<Vec<SetRecord>> {
    Ok(serde_yaml::from_str(text)?)
}
pub fn dump_parametersets(records: &[SetRecord]) -> DictResult<String> {
    Ok(serde_yaml::to_string(records)?)
}


impl SercosDevice {
    /**
        read every IDN of the drive and save them to a file

        IDNs are read again even if cached. IDNs that cannot be read are reported in the log and left out of the backup. Return the number of IDNs saved.
    */
    pub async fn backup_ids(&self, path: impl AsRef<Path>) -> DictResult<usize> {
        let path = path.as_ref();
        let ids = self.list_ids().await?;
        let results = ids.iter()
            .map(|&idn| async move { (idn, self.fetch(idn, true).await) })
            .collect::<Vec<_>>()
            .join().await;

        let mut records = Vec::with_capacity(results.len());
        for (idn, result) in results {
            match result {
                Ok(snapshot) => records.push(IdRecord {
                    idn,
                    name: snapshot.name.unwrap_or_default(),
                    value: snapshot.value.unwrap_or(Value::Text(String::new())),
                    }),
                Err(error) => log::warn!("{}: IDN {} left out of backup: {}", self.module(), idn, error),
            }
        }
        records.sort_by_key(|record| record.idn);
        write_atomic(path, dump_ids(&records)?.as_bytes())?;
        log::info!("{}: dumped {} IDNs to {}", self.module(), records.len(), path.display());
        Ok(records.len())
    }

    /**
        write to the drive the IDNs saved in a file

        blank text values are skipped. Return the number of IDNs written.
    */
    pub async fn load_ids(&self, path: impl AsRef<Path>) -> DictResult<usize> {
        let records = parse_ids(&std::fs::read_to_string(path)?)?;
        let mut written = 0;
        for record in records {
            if record.value.is_blank()
                {continue}
            log::info!("{}: writing IDN {} = {}", self.module(), record.idn, record.value);
            self.write(record.idn, &record.value).await?;
            written += 1;
        }
        Ok(written)
    }

    /// read all known parameter sets from the drive and save them to a file
    pub async fn backup_parametersets(&self, path: impl AsRef<Path>) -> DictResult {
        let path = path.as_ref();
        let mut records = Vec::new();
        for number in self.parametersets() {
            records.push(self.fetch_parameters(number, true).await?.record());
        }
        write_atomic(path, dump_parametersets(&records)?.as_bytes())?;
        log::info!("{}: dumped {} parameter sets to {}", self.module(), records.len(), path.display());
        Ok(())
    }

    /**
        write to the drive the parameter sets saved in a file

        sets are numbered by their order in the file. Each set is selected, its parameters written, then applied. Nothing is written if the file holds a parameter that cannot be written.
    */
    pub async fn load_parametersets(&self, path: impl AsRef<Path>) -> DictResult {
        let records = parse_parametersets(&std::fs::read_to_string(path)?)?;
        u16::try_from(records.len())
            .map_err(|_| DictError::Backup("too many parameter sets".into()))?;
        for record in &records {
            for (slot, pair) in record.pairs().enumerate() {
                let (name, value) = pair.ok_or_else(|| DictError::Backup(format!(
                    "parameter {} of set {} must have exactly one name", slot, record.set)))?;
                if ! value.is_finite()
                    {return Err(DictError::Backup(format!("parameter {} of set {} is not a finite number", name, record.set)))}
            }
        }

        for (number, record) in (0u16 ..).zip(&records) {
            let _selection = self.select_for_update(number).await?;
            for (slot, (name, value)) in record.pairs().flatten().enumerate() {
                log::info!("{}: writing parameter {} {} ({}) = {}", self.module(), number, slot, name, value);
                self.set_parameter(number, slot, value, false, false).await?;
            }
            self.set_command(IDN_APPLY_COMMAND).await?;
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_records() {
        let records = parse_ids("
            - idn: 30
              name: Manufacturer version
              value: DRIVE 1.2
            - idn: 104
              name: Position loop gain
              value: 2.5
            - idn: 17
              value: [1, 17, 30]
            ").unwrap();
        assert_eq!(records[0].value, Value::Text("DRIVE 1.2".into()));
        assert_eq!(records[1].value, Value::Float(2.5));
        assert_eq!(records[2].value, Value::List(vec![1, 17, 30]));
        assert_eq!(records[2].name, "");
        assert_eq!(parse_ids(&dump_ids(&records).unwrap()).unwrap(), records);
    }

    #[test]
    fn malformed_backup() {
        assert!(matches!(parse_ids("- idn: many"), Err(DictError::Backup(_))));
    }
}
