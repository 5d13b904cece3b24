//! Era-aware conversion between absolute slots, `(epoch, slot)` pairs and
//! wall-clock time.
//!
//! A network's history is an ordered list of eras. Each era is active from
//! its `start_epoch` until the next era's `start_epoch`; the last era is
//! open-ended. Every conversion walks the era boundaries in order,
//! consuming whole eras until the target falls inside one, then finishes
//! with that era's slots-per-epoch and slot duration.
//!
//! Only the first era carries the genesis timestamp. Later eras may omit
//! slot parameters, in which case they inherit them from the previous era.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::EraError;

/// One protocol-era record as supplied by network configuration.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct EraConfig {
    /// First epoch governed by this era.
    pub start_epoch: u64,
    #[serde(default)]
    pub slots_per_epoch: Option<u64>,
    #[serde(default)]
    pub slot_duration_secs: Option<u64>,
    /// Genesis timestamp; only valid on the first record.
    #[serde(default)]
    pub genesis: Option<DateTime<Utc>>,
}

impl EraConfig {
    /// Record for the first era of a network.
    pub fn genesis(slots_per_epoch: u64, slot_duration_secs: u64, genesis: DateTime<Utc>) -> Self {
        Self {
            start_epoch: 0,
            slots_per_epoch: Some(slots_per_epoch),
            slot_duration_secs: Some(slot_duration_secs),
            genesis: Some(genesis),
        }
    }

    /// Record for a hard fork at `start_epoch`.
    pub fn fork(start_epoch: u64, slots_per_epoch: u64, slot_duration_secs: u64) -> Self {
        Self {
            start_epoch,
            slots_per_epoch: Some(slots_per_epoch),
            slot_duration_secs: Some(slot_duration_secs),
            genesis: None,
        }
    }
}

/// A resolved era with all parameters present.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Era {
    pub start_epoch: u64,
    pub slots_per_epoch: u64,
    pub slot_duration_secs: u64,
}

impl Era {
    fn slot_ms(&self) -> Result<u64, EraError> {
        self.slot_duration_secs.checked_mul(1000).ok_or(EraError::Overflow)
    }
}

/// An `(epoch, slot-within-epoch)` pair.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelativeSlot {
    pub epoch: u64,
    pub slot: u64,
}

/// Where an absolute slot lands in the era table.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SlotLocation {
    /// Index of the governing era.
    pub era_index: usize,
    pub epoch: u64,
    pub slot: u64,
    /// The slot is the very first slot of its era.
    pub is_era_start: bool,
}

impl SlotLocation {
    pub fn relative(&self) -> RelativeSlot {
        RelativeSlot { epoch: self.epoch, slot: self.slot }
    }
}

/// Result of mapping a wall-clock time onto the slot grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TimeInSlot {
    pub slot: u64,
    pub ms_into_slot: u64,
}

/// Validated, sorted, gap-free era table with its genesis time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EraTimeline {
    eras: Vec<Era>,
    genesis: DateTime<Utc>,
}

impl EraTimeline {
    /// Resolve and validate an ordered list of era records.
    pub fn new(records: &[EraConfig]) -> Result<Self, EraError> {
        let first = records.first().ok_or(EraError::Empty)?;
        if first.start_epoch != 0 {
            return Err(EraError::FirstEraNotAtGenesis(first.start_epoch));
        }
        let genesis = first
            .genesis
            .ok_or(EraError::MissingGenesisParameter("genesis timestamp"))?;
        let mut slots_per_epoch = first
            .slots_per_epoch
            .ok_or(EraError::MissingGenesisParameter("slots per epoch"))?;
        let mut slot_duration_secs = first
            .slot_duration_secs
            .ok_or(EraError::MissingGenesisParameter("slot duration"))?;

        let mut eras: Vec<Era> = Vec::with_capacity(records.len());
        for (index, record) in records.iter().enumerate() {
            if index > 0 {
                if record.genesis.is_some() {
                    return Err(EraError::GenesisOnLaterEra(index));
                }
                let previous = eras[index - 1].start_epoch;
                if record.start_epoch <= previous {
                    return Err(EraError::Unsorted { index, previous, current: record.start_epoch });
                }
                slots_per_epoch = record.slots_per_epoch.unwrap_or(slots_per_epoch);
                slot_duration_secs = record.slot_duration_secs.unwrap_or(slot_duration_secs);
            }
            if slots_per_epoch == 0 {
                return Err(EraError::ZeroParameter { index, field: "slots per epoch" });
            }
            if slot_duration_secs == 0 {
                return Err(EraError::ZeroParameter { index, field: "slot duration" });
            }
            eras.push(Era { start_epoch: record.start_epoch, slots_per_epoch, slot_duration_secs });
        }

        Ok(Self { eras, genesis })
    }

    pub fn eras(&self) -> &[Era] {
        &self.eras
    }

    pub fn genesis(&self) -> DateTime<Utc> {
        self.genesis
    }

    /// Number of slots in the closed era `index` (None for the last, open-ended era).
    fn era_span_slots(&self, index: usize) -> Result<Option<u64>, EraError> {
        match self.eras.get(index + 1) {
            Some(next) => {
                let era = &self.eras[index];
                let num_epochs = next.start_epoch - era.start_epoch;
                num_epochs
                    .checked_mul(era.slots_per_epoch)
                    .map(Some)
                    .ok_or(EraError::Overflow)
            }
            None => Ok(None),
        }
    }

    /// Locate an absolute slot in the era table.
    pub fn locate(&self, absolute_slot: u64) -> Result<SlotLocation, EraError> {
        let mut remaining = absolute_slot;
        for (era_index, era) in self.eras.iter().enumerate() {
            if let Some(span) = self.era_span_slots(era_index)? {
                if remaining >= span {
                    remaining -= span;
                    continue;
                }
            }
            return Ok(SlotLocation {
                era_index,
                epoch: era.start_epoch + remaining / era.slots_per_epoch,
                slot: remaining % era.slots_per_epoch,
                is_era_start: remaining == 0,
            });
        }
        unreachable!("last era is open-ended")
    }

    /// Absolute slot → `(epoch, slot)`.
    pub fn to_relative_slot(&self, absolute_slot: u64) -> Result<RelativeSlot, EraError> {
        Ok(self.locate(absolute_slot)?.relative())
    }

    /// `(epoch, slot)` → absolute slot.
    pub fn to_absolute_slot(&self, relative: RelativeSlot) -> Result<u64, EraError> {
        let mut absolute: u64 = 0;
        for (index, era) in self.eras.iter().enumerate() {
            if let Some(next) = self.eras.get(index + 1) {
                if relative.epoch >= next.start_epoch {
                    let span = self.era_span_slots(index)?.unwrap_or(0);
                    absolute = absolute.checked_add(span).ok_or(EraError::Overflow)?;
                    continue;
                }
            }
            if relative.slot >= era.slots_per_epoch {
                return Err(EraError::SlotOutOfRange {
                    epoch: relative.epoch,
                    slot: relative.slot,
                    slots_per_epoch: era.slots_per_epoch,
                });
            }
            let into_era = (relative.epoch - era.start_epoch)
                .checked_mul(era.slots_per_epoch)
                .and_then(|s| s.checked_add(relative.slot))
                .ok_or(EraError::Overflow)?;
            return absolute.checked_add(into_era).ok_or(EraError::Overflow);
        }
        unreachable!("last era is open-ended")
    }

    /// Elapsed time between genesis and the start of `absolute_slot`.
    pub fn time_since_genesis(&self, absolute_slot: u64) -> Result<Duration, EraError> {
        let mut remaining = absolute_slot;
        let mut elapsed_ms: u64 = 0;
        for (index, era) in self.eras.iter().enumerate() {
            let slots_here = match self.era_span_slots(index)? {
                Some(span) if remaining >= span => span,
                _ => remaining,
            };
            let ms = slots_here.checked_mul(era.slot_ms()?).ok_or(EraError::Overflow)?;
            elapsed_ms = elapsed_ms.checked_add(ms).ok_or(EraError::Overflow)?;
            remaining -= slots_here;
            if remaining == 0 {
                break;
            }
        }
        Ok(Duration::from_millis(elapsed_ms))
    }

    /// Wall-clock start time of `absolute_slot`.
    pub fn slot_to_time(&self, absolute_slot: u64) -> Result<DateTime<Utc>, EraError> {
        let elapsed = self.time_since_genesis(absolute_slot)?;
        let delta = chrono::Duration::from_std(elapsed).map_err(|_| EraError::Overflow)?;
        self.genesis.checked_add_signed(delta).ok_or(EraError::Overflow)
    }

    /// Wall-clock time → absolute slot plus the offset into that slot.
    pub fn time_to_slot(&self, time: DateTime<Utc>) -> Result<TimeInSlot, EraError> {
        let elapsed = time.signed_duration_since(self.genesis);
        if elapsed < chrono::Duration::zero() {
            return Err(EraError::BeforeGenesis);
        }
        let mut remaining_ms =
            u64::try_from(elapsed.num_milliseconds()).map_err(|_| EraError::Overflow)?;
        let mut slot: u64 = 0;
        for (index, era) in self.eras.iter().enumerate() {
            let slot_ms = era.slot_ms()?;
            if let Some(span) = self.era_span_slots(index)? {
                let span_ms = span.checked_mul(slot_ms).ok_or(EraError::Overflow)?;
                if remaining_ms >= span_ms {
                    slot = slot.checked_add(span).ok_or(EraError::Overflow)?;
                    remaining_ms -= span_ms;
                    continue;
                }
            }
            slot = slot.checked_add(remaining_ms / slot_ms).ok_or(EraError::Overflow)?;
            return Ok(TimeInSlot { slot, ms_into_slot: remaining_ms % slot_ms });
        }
        unreachable!("last era is open-ended")
    }

    /// First absolute slot of `epoch`.
    pub fn epoch_start_slot(&self, epoch: u64) -> Result<u64, EraError> {
        self.to_absolute_slot(RelativeSlot { epoch, slot: 0 })
    }

    /// Wall-clock start time of `epoch`.
    pub fn epoch_start_time(&self, epoch: u64) -> Result<DateTime<Utc>, EraError> {
        self.slot_to_time(self.epoch_start_slot(epoch)?)
    }

    /// Era governing `epoch`.
    pub fn era_for_epoch(&self, epoch: u64) -> (usize, &Era) {
        let index = self
            .eras
            .iter()
            .rposition(|era| era.start_epoch <= epoch)
            .unwrap_or(0);
        (index, &self.eras[index])
    }

    /// Slots in the epoch containing `absolute_slot`.
    pub fn current_epoch_length(&self, absolute_slot: u64) -> Result<u64, EraError> {
        let loc = self.locate(absolute_slot)?;
        Ok(self.eras[loc.era_index].slots_per_epoch)
    }

    /// Duration of the slot `absolute_slot`.
    pub fn current_slot_duration(&self, absolute_slot: u64) -> Result<Duration, EraError> {
        let loc = self.locate(absolute_slot)?;
        Ok(Duration::from_secs(self.eras[loc.era_index].slot_duration_secs))
    }
}
