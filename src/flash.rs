/*!
    Reading and programming the firmware flash of SERCOS drives.

    Flash accesses require the kernel module to be in its boot state, and the SERCOS ring to be switched from phase 0 to a special phase addressing a single drive: phase 5 to write the flash, phase 6 to read it back.
    Firmware images are exchanged as [HexImage].
*/

use crate::{
    config::ClientConfig,
    error::{DictError, DictResult, Target},
    hex::{HexImage, Mismatch},
    registry::{Registry, ServiceKey},
    transport::{Channel, Request, Transport},
    };
use std::{
    path::Path,
    sync::Arc,
    };


/// state of the kernel module allowing flash accesses
pub const BOOT_STATE: i32 = 5;
/// default range of flash addresses read by [Flasher::dump]
pub const FLASH_RANGE: (u32, u32) = (0x41_0000, 0x43_0000);
/// number of words in a flash write
pub const BLOCK_WORDS: usize = 128;

/// SERCOS phases giving access to the flash
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum FlashPhase {
    Write = 5,
    Read = 6,
}

/// firmware access to one drive of a SERCOS ring
pub struct Flasher {
    module: String,
    channel: Channel,
    /// address of the drive on the ring
    at_address: u8,
}

impl Flasher {
    /// bind to the services of `kernel.module`, for the drive at the given ring address
    pub fn new(transport: Arc<dyn Transport>, name: &str, at_address: u8, config: &ClientConfig) -> DictResult<Self> {
        let registry = Registry::flasher(name)?;
        let module = name.split_once('.').map_or(name, |(_, module)| module).to_owned();
        Ok(Self {
            module,
            channel: Channel::new(transport, registry, config.read_timeout()),
            at_address,
        })
    }

    pub async fn get_state(&self) -> DictResult<i32> {
        let target = Target::Service(ServiceKey::GetState);
        self.channel.call(ServiceKey::GetState, Request::GetState {module: self.module.clone()}, target).await?
            .into_status(target)
    }
    pub async fn set_state(&self, state: i32) -> DictResult {
        let target = Target::Service(ServiceKey::SetState);
        self.channel.call(ServiceKey::SetState, Request::SetState {module: self.module.clone(), state}, target).await?
            .into_done(target)
    }
    pub async fn get_phase(&self) -> DictResult<i32> {
        let target = Target::Service(ServiceKey::GetPhase);
        self.channel.call(ServiceKey::GetPhase, Request::GetPhase, target).await?
            .into_status(target)
    }
    pub async fn set_phase(&self, phase: i32, at_address: u8) -> DictResult {
        let target = Target::Service(ServiceKey::SetPhase);
        self.channel.call(ServiceKey::SetPhase, Request::SetPhase {phase, at_address}, target).await?
            .into_done(target)
    }

    /// bring the module to boot state and the drive to the given flash phase
    pub async fn enter(&self, phase: FlashPhase) -> DictResult {
        if self.get_state().await? != BOOT_STATE {
            log::info!("switching module {} to boot state", self.module);
            self.set_state(BOOT_STATE).await?;
        }
        log::info!("switching sercos to phase 0");
        self.set_phase(0, 0).await?;
        log::info!("switching sercos to phase {} for drive {}", phase as i32, self.at_address);
        self.set_phase(phase as i32, self.at_address).await
            .map_err(|error| {
                log::error!("phase {} not reached, the drive may need a power cycle", phase as i32);
                error
            })
    }

    async fn read_words(&self, address: u32) -> DictResult<Vec<u16>> {
        let target = Target::Service(ServiceKey::Phase6Read);
        let words = self.channel.call(ServiceKey::Phase6Read, Request::Phase6Read {offset: address}, target).await?
            .into_words(target)?;
        if words.is_empty()
            {return Err(DictError::Malformed(target, "no flash data"))}
        Ok(words)
    }

    /// read the flash words between `lower` and `upper`
    pub async fn dump(&self, lower: u32, upper: u32) -> DictResult<HexImage> {
        self.enter(FlashPhase::Read).await?;
        let mut image = HexImage::new();
        let mut address = lower;
        while address < upper {
            log_progress("reading flash", address, lower, upper);
            let words = self.read_words(address).await?;
            image.put_data(address, &words);
            address = address.saturating_add(2 * words.len() as u32);
        }
        log::info!("flash reading done, {} words", image.len());
        Ok(image)
    }

    /// read the default flash range and save it to an Intel-HEX file
    pub async fn dump_to(&self, path: impl AsRef<Path>) -> DictResult<HexImage> {
        let image = self.dump(FLASH_RANGE.0, FLASH_RANGE.1).await?;
        image.save(path)?;
        Ok(image)
    }

    /// compare the flash content to an image, return the differing words
    pub async fn verify(&self, image: &HexImage) -> DictResult<Vec<Mismatch>> {
        let Some((lower, upper)) = image.bounds()
            else {return Ok(Vec::new())};
        self.enter(FlashPhase::Read).await?;
        let mut mismatches = Vec::new();
        let mut address = lower;
        while address <= upper {
            log_progress("verifying flash", address, lower, upper);
            let words = self.read_words(address).await?;
            for mismatch in image.compare(address, &words) {
                log::warn!("mismatch at 0x{:X}: read {:04X}h, expected {:04X}h",
                    mismatch.address, mismatch.found, mismatch.expected);
                mismatches.push(mismatch);
            }
            address = address.saturating_add(2 * words.len() as u32);
        }
        log::info!("flash verification done, {} mismatches", mismatches.len());
        Ok(mismatches)
    }

    /**
        write an image to flash, in blocks of [BLOCK_WORDS] words

        with `verify`, the flash is read back and the differing words are returned
    */
    pub async fn program(&self, image: &HexImage, verify: bool) -> DictResult<Vec<Mismatch>> {
        let Some((lower, upper)) = image.bounds()
            else {return Err(DictError::Client("cannot flash an empty image"))};
        self.enter(FlashPhase::Write).await?;
        let target = Target::Service(ServiceKey::Phase5Write);
        log::info!("writing flash of drive {}", self.at_address);
        for block in image.blocks(BLOCK_WORDS) {
            log_progress("writing flash", block.address, lower, upper);
            self.channel.call(ServiceKey::Phase5Write, Request::Phase5Write {
                    offset: block.address,
                    data: block.data,
                    last: block.last,
                    }, target).await?
                .into_done(target)?;
        }
        log::info!("flash written");
        if verify
            {self.verify(image).await}
        else
            {Ok(Vec::new())}
    }
}

fn log_progress(action: &str, address: u32, lower: u32, upper: u32) {
    let span = upper.saturating_sub(lower).max(1);
    log::info!("{} ... {}%", action, u64::from(address.saturating_sub(lower)) * 100 / u64::from(span));
}
