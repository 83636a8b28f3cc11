//! File-backed flash: one file per slot plus a JSON boot selector

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use badge_core::update::check_range;
use badge_core::{BootRecord, FlashError, FlashStore, Slot};

const BOOT_FILE: &str = "boot.json";

pub struct FileFlash {
    dir: PathBuf,
    capacity: usize,
    running: Slot,
    boot: BootRecord,
}

fn slot_file(dir: &Path, slot: Slot) -> PathBuf {
    match slot {
        Slot::A => dir.join("slot_a.bin"),
        Slot::B => dir.join("slot_b.bin"),
    }
}

impl FileFlash {
    /// Open (or format) the flash directory and "boot" from the selected slot
    pub fn open(dir: &Path, capacity: usize) -> Result<Self, FlashError> {
        fs::create_dir_all(dir)?;
        for slot in [Slot::A, Slot::B] {
            let path = slot_file(dir, slot);
            if !path.exists() {
                File::create(&path)?.set_len(capacity as u64)?;
            }
        }

        let boot_path = dir.join(BOOT_FILE);
        let boot = if boot_path.exists() {
            serde_json::from_str(&fs::read_to_string(&boot_path)?)?
        } else {
            BootRecord::default()
        };

        Ok(Self { dir: dir.to_path_buf(), capacity, running: boot.slot, boot })
    }

    /// Image bytes of the running slot
    pub fn running_image(&self) -> Result<Vec<u8>, FlashError> {
        let mut image = vec![0u8; self.boot.image_len(self.running)];
        self.read(self.running, 0, &mut image)?;
        Ok(image)
    }

    /// Seed a slot directly, for installing a first image
    pub fn install(&mut self, slot: Slot, image: &[u8]) -> Result<(), FlashError> {
        check_range(0, image.len(), self.capacity)?;
        let mut file = OpenOptions::new().write(true).open(slot_file(&self.dir, slot))?;
        file.write_all(image)?;
        file.sync_all()?;
        self.set_boot_slot(slot, image.len())?;
        self.running = slot;
        Ok(())
    }

    fn writable(&self, slot: Slot) -> Result<(), FlashError> {
        if slot == self.running {
            return Err(FlashError::RunningSlot(slot));
        }
        Ok(())
    }
}

impl FlashStore for FileFlash {
    fn capacity(&self) -> usize {
        self.capacity
    }

    fn running_slot(&self) -> Slot {
        self.running
    }

    fn boot_record(&self) -> BootRecord {
        self.boot
    }

    fn erase(&mut self, slot: Slot) -> Result<(), FlashError> {
        self.writable(slot)?;
        let file = OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(slot_file(&self.dir, slot))?;
        file.set_len(self.capacity as u64)?;
        Ok(())
    }

    fn write(&mut self, slot: Slot, offset: usize, data: &[u8]) -> Result<(), FlashError> {
        check_range(offset, data.len(), self.capacity)?;
        self.writable(slot)?;
        let mut file = OpenOptions::new().write(true).open(slot_file(&self.dir, slot))?;
        file.seek(SeekFrom::Start(offset as u64))?;
        file.write_all(data)?;
        Ok(())
    }

    fn read(&self, slot: Slot, offset: usize, buf: &mut [u8]) -> Result<(), FlashError> {
        check_range(offset, buf.len(), self.capacity)?;
        let mut file = File::open(slot_file(&self.dir, slot))?;
        file.seek(SeekFrom::Start(offset as u64))?;
        file.read_exact(buf)?;
        Ok(())
    }

    fn set_boot_slot(&mut self, slot: Slot, image_len: usize) -> Result<(), FlashError> {
        check_range(0, image_len, self.capacity)?;
        let record = self.boot.select(slot, image_len);
        let path = self.dir.join(BOOT_FILE);
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(serde_json::to_string_pretty(&record)?.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, &path)?;
        self.boot = record;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_flash_boots_slot_a() {
        let dir = tempfile::tempdir().unwrap();
        let flash = FileFlash::open(dir.path(), 1024).unwrap();
        assert_eq!(flash.running_slot(), Slot::A);
        assert_eq!(flash.boot_record(), BootRecord::default());
        assert!(flash.running_image().unwrap().is_empty());
        assert_eq!(fs::metadata(dir.path().join("slot_b.bin")).unwrap().len(), 1024);
    }

    #[test]
    fn update_slot_write_then_flip_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let mut flash = FileFlash::open(dir.path(), 64).unwrap();
        flash.install(Slot::A, b"v1").unwrap();

        assert!(matches!(flash.write(Slot::A, 0, b"x"), Err(FlashError::RunningSlot(Slot::A))));
        flash.erase(Slot::B).unwrap();
        flash.write(Slot::B, 0, b"v2-").unwrap();
        flash.write(Slot::B, 3, b"image").unwrap();
        flash.set_boot_slot(Slot::B, 8).unwrap();
        assert_eq!(flash.running_image().unwrap(), b"v1");

        let rebooted = FileFlash::open(dir.path(), 64).unwrap();
        assert_eq!(rebooted.running_slot(), Slot::B);
        assert_eq!(rebooted.running_image().unwrap(), b"v2-image");
        assert_eq!(rebooted.update_slot(), Slot::A);
    }

    #[test]
    fn out_of_range_access_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let mut flash = FileFlash::open(dir.path(), 16).unwrap();
        assert!(matches!(
            flash.write(Slot::B, 10, &[0u8; 7]),
            Err(FlashError::OutOfBounds { .. })
        ));
        let mut buf = [0u8; 4];
        assert!(flash.read(Slot::B, 14, &mut buf).is_err());
        assert!(flash.set_boot_slot(Slot::B, 17).is_err());
    }
}
