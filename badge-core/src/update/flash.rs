//! Two-slot firmware storage

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::FlashError;

/// Firmware image slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    pub fn other(self) -> Slot {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Slot::A => 0,
            Slot::B => 1,
        }
    }
}

/// Which slot the boot loader starts next, and the image length held in each slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootRecord {
    pub slot: Slot,
    pub image_lens: [usize; 2],
}

impl Default for BootRecord {
    fn default() -> Self {
        Self { slot: Slot::A, image_lens: [0, 0] }
    }
}

impl BootRecord {
    pub fn image_len(&self, slot: Slot) -> usize {
        self.image_lens[slot.index()]
    }

    /// Select `slot`, which now holds `image_len` bytes; the other slot keeps its length
    pub fn select(mut self, slot: Slot, image_len: usize) -> Self {
        self.slot = slot;
        self.image_lens[slot.index()] = image_len;
        self
    }
}

/// Flash holding two image slots and a boot selector.
///
/// Implementations refuse writes to the slot the badge is running from, so
/// a failed update can never damage the bootable image.
pub trait FlashStore: Send {
    /// Size of one slot in bytes
    fn capacity(&self) -> usize;

    /// Slot the current firmware was started from
    fn running_slot(&self) -> Slot;

    /// Current boot selector
    fn boot_record(&self) -> BootRecord;

    /// Erase a whole slot
    fn erase(&mut self, slot: Slot) -> Result<(), FlashError>;

    /// Write `data` at `offset` inside `slot`
    fn write(&mut self, slot: Slot, offset: usize, data: &[u8]) -> Result<(), FlashError>;

    /// Fill `buf` from `offset` inside `slot`
    fn read(&self, slot: Slot, offset: usize, buf: &mut [u8]) -> Result<(), FlashError>;

    /// Point the boot selector at `slot`. Must be atomic.
    fn set_boot_slot(&mut self, slot: Slot, image_len: usize) -> Result<(), FlashError>;

    /// Slot an update is written to
    fn update_slot(&self) -> Slot {
        self.running_slot().other()
    }
}

/// Bounds check shared by flash backends
pub fn check_range(offset: usize, len: usize, capacity: usize) -> Result<(), FlashError> {
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(FlashError::OutOfBounds { offset, len, capacity }),
    }
}

struct MemoryFlashInner {
    slots: [Vec<u8>; 2],
    running: Slot,
    boot: BootRecord,
    writes: [usize; 2],
}

/// RAM-backed flash. Clones share the same storage, so a test can keep a
/// handle after giving one to the update manager.
#[derive(Clone)]
pub struct MemoryFlash {
    inner: Arc<Mutex<MemoryFlashInner>>,
    capacity: usize,
}

impl MemoryFlash {
    /// Flash running from slot A, which holds `image`
    pub fn new(capacity: usize, image: &[u8]) -> Self {
        let mut running = vec![0xFF; capacity];
        let len = image.len().min(capacity);
        running[..len].copy_from_slice(&image[..len]);
        Self {
            inner: Arc::new(Mutex::new(MemoryFlashInner {
                slots: [running, vec![0xFF; capacity]],
                running: Slot::A,
                boot: BootRecord::default().select(Slot::A, len),
                writes: [0, 0],
            })),
            capacity,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryFlashInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of write calls that reached `slot`
    pub fn write_count(&self, slot: Slot) -> usize {
        self.lock().writes[slot.index()]
    }

    /// Image bytes the boot selector currently points at
    pub fn boot_image(&self) -> Vec<u8> {
        let inner = self.lock();
        let slot = inner.boot.slot;
        inner.slots[slot.index()][..inner.boot.image_len(slot)].to_vec()
    }

    /// Simulate a restart into whatever the selector points at
    pub fn reboot(&self) {
        let mut inner = self.lock();
        inner.running = inner.boot.slot;
    }
}

impl FlashStore for MemoryFlash {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn running_slot(&self) -> Slot {
        self.lock().running
    }

    fn boot_record(&self) -> BootRecord {
        self.lock().boot
    }

    fn erase(&mut self, slot: Slot) -> Result<(), FlashError> {
        let mut inner = self.lock();
        if slot == inner.running {
            return Err(FlashError::RunningSlot(slot));
        }
        inner.slots[slot.index()].fill(0xFF);
        Ok(())
    }

    fn write(&mut self, slot: Slot, offset: usize, data: &[u8]) -> Result<(), FlashError> {
        check_range(offset, data.len(), self.capacity)?;
        let mut inner = self.lock();
        if slot == inner.running {
            return Err(FlashError::RunningSlot(slot));
        }
        inner.slots[slot.index()][offset..offset + data.len()].copy_from_slice(data);
        inner.writes[slot.index()] += 1;
        Ok(())
    }

    fn read(&self, slot: Slot, offset: usize, buf: &mut [u8]) -> Result<(), FlashError> {
        check_range(offset, buf.len(), self.capacity)?;
        let inner = self.lock();
        buf.copy_from_slice(&inner.slots[slot.index()][offset..offset + buf.len()]);
        Ok(())
    }

    fn set_boot_slot(&mut self, slot: Slot, image_len: usize) -> Result<(), FlashError> {
        check_range(0, image_len, self.capacity)?;
        let mut inner = self.lock();
        inner.boot = inner.boot.select(slot, image_len);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_slot_is_write_protected() {
        let mut flash = MemoryFlash::new(16, b"old");
        assert!(matches!(flash.write(Slot::A, 0, b"x"), Err(FlashError::RunningSlot(Slot::A))));
        assert!(flash.erase(Slot::A).is_err());
        assert_eq!(flash.update_slot(), Slot::B);

        flash.write(Slot::B, 0, b"new").unwrap();
        assert_eq!(flash.write_count(Slot::B), 1);
        assert_eq!(flash.boot_image(), b"old");
    }

    #[test]
    fn writes_stay_inside_the_slot() {
        let mut flash = MemoryFlash::new(8, b"");
        assert!(matches!(
            flash.write(Slot::B, 6, b"abc"),
            Err(FlashError::OutOfBounds { offset: 6, len: 3, capacity: 8 })
        ));
        assert!(check_range(usize::MAX, 2, 8).is_err());
    }

    #[test]
    fn selector_flip_changes_next_boot() {
        let mut flash = MemoryFlash::new(8, b"old");
        flash.write(Slot::B, 0, b"newer").unwrap();
        flash.set_boot_slot(Slot::B, 5).unwrap();
        assert_eq!(flash.boot_image(), b"newer");
        assert_eq!(flash.running_slot(), Slot::A);

        flash.reboot();
        assert_eq!(flash.running_slot(), Slot::B);
        assert_eq!(flash.update_slot(), Slot::A);
    }

    #[test]
    fn shadow_image_keeps_its_length_after_the_flip() {
        let mut flash = MemoryFlash::new(8, b"old");
        flash.write(Slot::B, 0, b"newer").unwrap();
        flash.set_boot_slot(Slot::B, 5).unwrap();

        let boot = flash.boot_record();
        assert_eq!(boot.slot, Slot::B);
        assert_eq!(boot.image_len(Slot::B), 5);
        assert_eq!(boot.image_len(Slot::A), 3);
    }
}
