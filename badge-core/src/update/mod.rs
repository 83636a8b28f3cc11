//! Firmware update pipeline
//!
//! A validated request moves the manager from `Idle` (or `Failed`) to
//! `Downloading` and hands the image source to a background worker, which
//! runs Download, Verify and Apply in order:
//!
//! - Download streams `size` bytes into the slot that is not running, one
//!   fixed buffer reused per chunk, each read bounded by the chunk timeout.
//! - Verify re-reads the slot, recomputes SHA-256 and compares it with the
//!   header, then checks the Ed25519 signature over that checksum.
//! - Apply flips the boot selector. The old image stays on flash.
//!
//! Any error ends the attempt in `Failed` with the running image untouched.
//! There is no retry; the peer may send a new request.

mod flash;
mod progress;

pub use flash::{check_range, BootRecord, FlashStore, MemoryFlash, Slot};
pub use progress::{percent, Progress, ProgressCell};

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use badge_proto::{ErrorKind, UpdateHeader, UpdateStage, UpdateState, UpdateStatusReport, UPDATE_MAGIC};
use ed25519_dalek::{Signature, VerifyingKey};
use log::*;
use sha2::{Digest, Sha256};

use crate::error::{UpdateFailure, UpdateRejected};
use crate::transport::ByteSource;

/// What an update is checked against
#[derive(Debug, Clone)]
pub struct UpdatePolicy {
    /// Hardware tag images must carry
    pub hardware: String,
    /// Key update signatures are checked with
    pub key: Option<VerifyingKey>,
    pub chunk_size: usize,
    pub chunk_timeout: Duration,
}

/// Terminal result of an attempt, handed to the main loop once
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateOutcome {
    pub state: UpdateState,
    pub status: ErrorKind,
    /// Stage the attempt ended in
    pub stage: UpdateStage,
}

impl UpdateOutcome {
    /// Failed before the whole image was read, so part of it may still be
    /// in flight on the link
    pub fn left_image_unread(&self) -> bool {
        self.state == UpdateState::Failed && self.stage == UpdateStage::Download
    }
}

#[derive(Debug)]
struct Shared {
    state: AtomicU8,
    progress: ProgressCell,
    last_status: AtomicU32,
    /// Terminal state of the last attempt, published before `state`
    outcome: AtomicU8,
    unreported: AtomicBool,
}

impl Shared {
    fn state(&self) -> UpdateState {
        UpdateState::try_from(self.state.load(Ordering::Acquire)).unwrap_or(UpdateState::Failed)
    }

    fn set_state(&self, state: UpdateState) {
        self.state.store(state as u8, Ordering::Release);
    }
}

type SharedFlash = Arc<Mutex<Box<dyn FlashStore>>>;

fn lock_flash(flash: &SharedFlash) -> MutexGuard<'_, Box<dyn FlashStore>> {
    flash.lock().unwrap_or_else(|e| e.into_inner())
}

pub struct UpdateManager {
    shared: Arc<Shared>,
    flash: SharedFlash,
    policy: Arc<UpdatePolicy>,
    capacity: usize,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl UpdateManager {
    pub fn new(flash: Box<dyn FlashStore>, policy: UpdatePolicy) -> Self {
        let capacity = flash.capacity();
        info!(
            "update manager ready: running slot {:?}, {} byte slots",
            flash.running_slot(),
            capacity
        );
        Self {
            shared: Arc::new(Shared {
                state: AtomicU8::new(UpdateState::Idle as u8),
                progress: ProgressCell::default(),
                last_status: AtomicU32::new(ErrorKind::NoError as u32),
                outcome: AtomicU8::new(UpdateState::Idle as u8),
                unreported: AtomicBool::new(false),
            }),
            flash: Arc::new(Mutex::new(flash)),
            policy: Arc::new(policy),
            capacity,
            worker: Mutex::new(None),
        }
    }

    /// Validate `header` and start the background stages.
    ///
    /// Returns once the worker is running; nothing on flash has changed when
    /// this returns an error.
    pub fn request_update(
        &self,
        header: &UpdateHeader,
        source: Box<dyn ByteSource>,
    ) -> Result<(), UpdateRejected> {
        self.check_header(header)?;
        let previous = self.claim()?;
        self.shared.progress.set(UpdateStage::Download, 0);
        self.reap();

        info!("starting update: {} bytes for {}", header.size, header.compat_hw_str());

        let shared = self.shared.clone();
        let flash = self.flash.clone();
        let policy = self.policy.clone();
        let header = header.clone();
        let spawned = thread::Builder::new()
            .name("update".to_string())
            .spawn(move || run(shared, flash, policy, header, source));

        match spawned {
            Ok(handle) => {
                *self.worker.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
                Ok(())
            }
            Err(e) => {
                error!("could not start update worker: {}", e);
                self.shared.set_state(previous);
                Err(UpdateRejected::Spawn(e))
            }
        }
    }

    fn check_header(&self, header: &UpdateHeader) -> Result<(), UpdateRejected> {
        if header.magic != UPDATE_MAGIC {
            return Err(UpdateRejected::BadMagic(header.magic));
        }
        let size = header.size as usize;
        if size == 0 {
            return Err(UpdateRejected::EmptyImage);
        }
        if size > self.capacity {
            return Err(UpdateRejected::TooLarge { size, capacity: self.capacity });
        }
        if header.compat_hw_str() != self.policy.hardware {
            return Err(UpdateRejected::HardwareMismatch {
                expected: self.policy.hardware.clone(),
                got: header.compat_hw_str().to_string(),
            });
        }
        if self.policy.key.is_none() {
            return Err(UpdateRejected::NoKey);
        }
        Ok(())
    }

    /// Move to `Downloading` if no attempt is in flight
    fn claim(&self) -> Result<UpdateState, UpdateRejected> {
        let current = self.shared.state();
        if !current.accepts_request() {
            return Err(UpdateRejected::Busy);
        }
        self.shared
            .state
            .compare_exchange(
                current as u8,
                UpdateState::Downloading as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .map_err(|_| UpdateRejected::Busy)?;
        Ok(current)
    }

    fn reap(&self) {
        let finished = self.worker.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = finished {
            if handle.join().is_err() {
                warn!("previous update worker panicked");
            }
        }
    }

    pub fn state(&self) -> UpdateState {
        self.shared.state()
    }

    pub fn progress(&self) -> Progress {
        self.shared.progress.get()
    }

    pub fn is_busy(&self) -> bool {
        !self.state().accepts_request() && !self.state().is_terminal()
    }

    /// Status code of the last finished attempt
    pub fn last_status(&self) -> u32 {
        self.shared.last_status.load(Ordering::Acquire)
    }

    /// Terminal outcome not yet handed out, if any.
    ///
    /// Available as soon as the worker stops touching the image source, which
    /// may be just before `state()` turns terminal.
    pub fn take_outcome(&self) -> Option<UpdateOutcome> {
        if !self.shared.unreported.swap(false, Ordering::AcqRel) {
            return None;
        }
        let status = ErrorKind::try_from(self.last_status()).unwrap_or(ErrorKind::ActionFailed);
        let state = UpdateState::try_from(self.shared.outcome.load(Ordering::Acquire))
            .unwrap_or(UpdateState::Failed);
        Some(UpdateOutcome { state, status, stage: self.progress().stage })
    }

    pub fn report(&self) -> UpdateStatusReport {
        let state = self.state();
        let progress = self.progress();
        UpdateStatusReport {
            state,
            stage: progress.stage,
            percent: progress.percent,
            overall: progress.overall(state),
            last_status: self.last_status(),
        }
    }

    /// Poll until the current attempt settles or `timeout` passes.
    pub fn wait_settled(&self, timeout: Duration) -> UpdateState {
        let deadline = Instant::now() + timeout;
        loop {
            let state = self.state();
            if !self.is_busy() || Instant::now() >= deadline {
                return state;
            }
            thread::sleep(Duration::from_millis(2));
        }
    }
}

fn run(
    shared: Arc<Shared>,
    flash: SharedFlash,
    policy: Arc<UpdatePolicy>,
    header: UpdateHeader,
    mut source: Box<dyn ByteSource>,
) {
    let mut worker = Worker {
        shared: &shared,
        flash: &flash,
        policy: &policy,
        header: &header,
        buffer: vec![0u8; policy.chunk_size.max(1)].into_boxed_slice(),
    };

    let (state, status) = match worker.run(source.as_mut()) {
        Ok(()) => {
            info!("update committed, restart pending");
            (UpdateState::Committed, ErrorKind::NoError)
        }
        Err(e) => {
            error!("update failed: {}", e);
            (UpdateState::Failed, e.kind())
        }
    };

    shared.last_status.store(status as u32, Ordering::Release);
    shared.outcome.store(state as u8, Ordering::Release);
    shared.unreported.store(true, Ordering::Release);
    shared.set_state(state);
}

struct Worker<'a> {
    shared: &'a Shared,
    flash: &'a SharedFlash,
    policy: &'a UpdatePolicy,
    header: &'a UpdateHeader,
    buffer: Box<[u8]>,
}

impl Worker<'_> {
    fn run(&mut self, source: &mut dyn ByteSource) -> Result<(), UpdateFailure> {
        let slot = lock_flash(self.flash).update_slot();
        self.download(slot, source)?;

        self.shared.set_state(UpdateState::Verifying);
        self.verify(slot)?;

        self.shared.set_state(UpdateState::Applying);
        self.apply(slot)
    }

    fn download(&mut self, slot: Slot, source: &mut dyn ByteSource) -> Result<(), UpdateFailure> {
        let size = self.header.size as usize;
        lock_flash(self.flash).erase(slot)?;

        let mut written = 0;
        while written < size {
            let want = (size - written).min(self.buffer.len());
            let n = source.read_bytes(&mut self.buffer[..want], self.policy.chunk_timeout)?;
            lock_flash(self.flash).write(slot, written, &self.buffer[..n])?;
            written += n;
            self.shared.progress.set(UpdateStage::Download, percent(written, size));
        }

        debug!("downloaded {} bytes into slot {:?}", written, slot);
        Ok(())
    }

    fn verify(&mut self, slot: Slot) -> Result<(), UpdateFailure> {
        self.shared.progress.set(UpdateStage::Verify, 0);
        let size = self.header.size as usize;

        let mut hasher = Sha256::new();
        let mut read = 0;
        while read < size {
            let n = (size - read).min(self.buffer.len());
            lock_flash(self.flash).read(slot, read, &mut self.buffer[..n])?;
            hasher.update(&self.buffer[..n]);
            read += n;
            // last percent is reserved for the signature check
            self.shared.progress.set(UpdateStage::Verify, percent(read, size).min(99));
        }

        let digest: [u8; 32] = hasher.finalize().into();
        if digest != self.header.checksum {
            return Err(UpdateFailure::ChecksumMismatch);
        }

        let key = self.policy.key.as_ref().ok_or(UpdateFailure::BadSignature)?;
        let signature = self
            .header
            .ed25519_signature()
            .ok_or(UpdateFailure::BadSignature)?;
        key.verify_strict(&self.header.checksum, &Signature::from_bytes(&signature))
            .map_err(|_| UpdateFailure::BadSignature)?;

        self.shared.progress.set(UpdateStage::Verify, 100);
        Ok(())
    }

    fn apply(&mut self, slot: Slot) -> Result<(), UpdateFailure> {
        self.shared.progress.set(UpdateStage::Apply, 0);
        lock_flash(self.flash).set_boot_slot(slot, self.header.size as usize)?;
        self.shared.progress.set(UpdateStage::Apply, 100);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::FlashError;
    use crate::transport::{memory_pair, MemoryLink, Transport};
    use ed25519_dalek::{Signer, SigningKey};
    use std::sync::mpsc;

    pub(crate) const HW: &str = "ECB_V1";

    pub(crate) fn signing_key() -> SigningKey {
        SigningKey::from_bytes(&[7u8; 32])
    }

    pub(crate) fn signed_header(image: &[u8], key: &SigningKey) -> UpdateHeader {
        let checksum: [u8; 32] = Sha256::digest(image).into();
        let mut header = UpdateHeader::new(image.len() as u32, checksum, HW).unwrap();
        header.set_ed25519_signature(&key.sign(&checksum).to_bytes());
        header
    }

    pub(crate) fn policy(chunk_timeout: Duration) -> UpdatePolicy {
        UpdatePolicy {
            hardware: HW.to_string(),
            key: Some(signing_key().verifying_key()),
            chunk_size: 64,
            chunk_timeout,
        }
    }

    fn image(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 31 % 251) as u8).collect()
    }

    fn setup(capacity: usize) -> (UpdateManager, MemoryFlash, MemoryLink, MemoryLink) {
        let flash = MemoryFlash::new(capacity, b"running image");
        let manager = UpdateManager::new(Box::new(flash.clone()), policy(Duration::from_millis(200)));
        let (peer, badge) = memory_pair();
        (manager, flash, peer, badge)
    }

    #[test]
    fn valid_image_is_committed_to_the_other_slot() {
        let (manager, flash, mut peer, mut badge) = setup(4096);
        let image = image(1000);
        peer.write_all(&image).unwrap();

        manager
            .request_update(&signed_header(&image, &signing_key()), badge.data_channel().unwrap())
            .unwrap();
        assert_eq!(manager.wait_settled(Duration::from_secs(5)), UpdateState::Committed);

        let boot = flash.boot_record();
        assert_eq!(boot.slot, Slot::B);
        assert_eq!(boot.image_len(Slot::B), 1000);
        assert_eq!(boot.image_len(Slot::A), b"running image".len());
        assert_eq!(flash.boot_image(), image);
        assert_eq!(flash.running_slot(), Slot::A);
        assert_eq!(
            manager.take_outcome(),
            Some(UpdateOutcome {
                state: UpdateState::Committed,
                status: ErrorKind::NoError,
                stage: UpdateStage::Apply,
            })
        );
        assert_eq!(manager.take_outcome(), None);
        assert_eq!(manager.report().overall, 100);
    }

    #[test]
    fn wrong_magic_is_rejected_before_any_write() {
        let (manager, flash, _peer, mut badge) = setup(4096);
        let mut header = signed_header(&image(10), &signing_key());
        header.magic = 0xDEAD_BEEF;

        let err = manager.request_update(&header, badge.data_channel().unwrap()).unwrap_err();
        assert!(matches!(err, UpdateRejected::BadMagic(0xDEAD_BEEF)));
        assert_eq!(err.kind(), ErrorKind::InvalidParam);
        assert_eq!(manager.state(), UpdateState::Idle);
        assert_eq!(flash.write_count(Slot::B), 0);
    }

    #[test]
    fn oversize_image_never_starts_download() {
        let (manager, flash, _peer, mut badge) = setup(256);
        let header = signed_header(&image(257), &signing_key());

        let err = manager.request_update(&header, badge.data_channel().unwrap()).unwrap_err();
        assert!(matches!(err, UpdateRejected::TooLarge { size: 257, capacity: 256 }));
        assert_eq!(err.kind(), ErrorKind::DataTooLong);
        assert_eq!(manager.state(), UpdateState::Idle);
        assert_eq!(flash.write_count(Slot::B), 0);
    }

    #[test]
    fn static_checks_cover_hardware_size_and_key() {
        let (manager, _flash, _peer, mut badge) = setup(4096);
        let mut header = signed_header(&image(10), &signing_key());
        header.compat_hw = badge_proto::update::hw_tag("ECB_V2").unwrap();
        assert!(matches!(
            manager.request_update(&header, badge.data_channel().unwrap()),
            Err(UpdateRejected::HardwareMismatch { .. })
        ));

        let mut empty = signed_header(&image(10), &signing_key());
        empty.size = 0;
        assert!(matches!(
            manager.request_update(&empty, badge.data_channel().unwrap()),
            Err(UpdateRejected::EmptyImage)
        ));

        let keyless = UpdateManager::new(
            Box::new(MemoryFlash::new(4096, b"")),
            UpdatePolicy { key: None, ..policy(Duration::from_millis(10)) },
        );
        let err = keyless
            .request_update(&signed_header(&image(10), &signing_key()), badge.data_channel().unwrap())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotInitialized);
    }

    #[test]
    fn checksum_mismatch_fails_and_keeps_old_image() {
        let (manager, flash, mut peer, mut badge) = setup(4096);
        let image = image(500);
        let header = signed_header(&image, &signing_key());
        let mut tampered = image.clone();
        tampered[100] ^= 0xFF;
        peer.write_all(&tampered).unwrap();

        manager.request_update(&header, badge.data_channel().unwrap()).unwrap();
        assert_eq!(manager.wait_settled(Duration::from_secs(5)), UpdateState::Failed);

        assert_eq!(flash.boot_record().slot, Slot::A);
        assert_eq!(flash.boot_image(), b"running image");
        assert_eq!(manager.last_status(), ErrorKind::CorruptedData as u32);
        assert!(manager.take_outcome().is_some_and(|o| !o.left_image_unread()));
    }

    #[test]
    fn bad_signature_never_reaches_apply() {
        let (manager, flash, mut peer, mut badge) = setup(4096);
        let image = image(300);
        let forged = signed_header(&image, &SigningKey::from_bytes(&[9u8; 32]));
        peer.write_all(&image).unwrap();

        manager.request_update(&forged, badge.data_channel().unwrap()).unwrap();
        assert_eq!(manager.wait_settled(Duration::from_secs(5)), UpdateState::Failed);

        assert_eq!(manager.progress().stage, UpdateStage::Verify);
        assert_eq!(flash.boot_record().slot, Slot::A);
        assert_eq!(
            manager.take_outcome(),
            Some(UpdateOutcome {
                state: UpdateState::Failed,
                status: ErrorKind::ActionFailed,
                stage: UpdateStage::Verify,
            })
        );
    }

    #[test]
    fn full_width_signature_field_is_refused() {
        let (manager, flash, mut peer, mut badge) = setup(4096);
        let image = image(300);
        let mut header = signed_header(&image, &signing_key());
        // a 2048-bit PKCS#1 signature fills all 256 bytes
        header.signature = [0x5C; badge_proto::update::SIGNATURE_FIELD_SIZE];
        peer.write_all(&image).unwrap();

        manager.request_update(&header, badge.data_channel().unwrap()).unwrap();
        assert_eq!(manager.wait_settled(Duration::from_secs(5)), UpdateState::Failed);
        assert_eq!(manager.last_status(), ErrorKind::ActionFailed as u32);
        assert_eq!(manager.progress().stage, UpdateStage::Verify);
        assert_eq!(flash.boot_record().slot, Slot::A);
    }

    #[test]
    fn second_request_while_in_flight_is_rejected() {
        let (manager, flash, mut peer, mut badge) = setup(4096);
        let image = image(200);
        let header = signed_header(&image, &signing_key());

        manager.request_update(&header, badge.data_channel().unwrap()).unwrap();
        let err = manager.request_update(&header, badge.data_channel().unwrap()).unwrap_err();
        assert!(matches!(err, UpdateRejected::Busy));
        assert_eq!(err.kind(), ErrorKind::ActionFailed);

        peer.write_all(&image).unwrap();
        assert_eq!(manager.wait_settled(Duration::from_secs(5)), UpdateState::Committed);
        assert_eq!(flash.boot_image(), image);
    }

    #[test]
    fn stalled_download_times_out() {
        let flash = MemoryFlash::new(4096, b"running image");
        let manager = UpdateManager::new(Box::new(flash.clone()), policy(Duration::from_millis(30)));
        let (mut peer, mut badge) = memory_pair();
        let image = image(400);
        peer.write_all(&image[..100]).unwrap();

        manager
            .request_update(&signed_header(&image, &signing_key()), badge.data_channel().unwrap())
            .unwrap();
        assert_eq!(manager.wait_settled(Duration::from_secs(5)), UpdateState::Failed);
        assert_eq!(manager.last_status(), ErrorKind::NoConnection as u32);
        assert_eq!(flash.boot_record().slot, Slot::A);
        assert!(manager.take_outcome().is_some_and(|o| o.left_image_unread()));
        drop(peer);
    }

    #[test]
    fn failed_attempt_admits_a_new_request() {
        let (manager, flash, mut peer, mut badge) = setup(4096);
        let image = image(128);
        let mut header = signed_header(&image, &signing_key());
        header.checksum[0] ^= 1;
        peer.write_all(&image).unwrap();
        manager.request_update(&header, badge.data_channel().unwrap()).unwrap();
        assert_eq!(manager.wait_settled(Duration::from_secs(5)), UpdateState::Failed);

        peer.write_all(&image).unwrap();
        manager
            .request_update(&signed_header(&image, &signing_key()), badge.data_channel().unwrap())
            .unwrap();
        assert_eq!(manager.wait_settled(Duration::from_secs(5)), UpdateState::Committed);
        assert_eq!(flash.boot_image(), image);
    }

    /// Parks the worker where each stage first touches flash
    struct GatedFlash {
        inner: MemoryFlash,
        reached: mpsc::Sender<UpdateStage>,
        proceed: mpsc::Receiver<()>,
        verify_seen: AtomicBool,
    }

    impl GatedFlash {
        fn gate(&self, stage: UpdateStage) {
            let _ = self.reached.send(stage);
            let _ = self.proceed.recv();
        }
    }

    impl FlashStore for GatedFlash {
        fn capacity(&self) -> usize {
            self.inner.capacity()
        }

        fn running_slot(&self) -> Slot {
            self.inner.running_slot()
        }

        fn boot_record(&self) -> BootRecord {
            self.inner.boot_record()
        }

        fn erase(&mut self, slot: Slot) -> Result<(), FlashError> {
            self.gate(UpdateStage::Download);
            self.inner.erase(slot)
        }

        fn write(&mut self, slot: Slot, offset: usize, data: &[u8]) -> Result<(), FlashError> {
            self.inner.write(slot, offset, data)
        }

        fn read(&self, slot: Slot, offset: usize, buf: &mut [u8]) -> Result<(), FlashError> {
            if !self.verify_seen.swap(true, Ordering::SeqCst) {
                self.gate(UpdateStage::Verify);
            }
            self.inner.read(slot, offset, buf)
        }

        fn set_boot_slot(&mut self, slot: Slot, image_len: usize) -> Result<(), FlashError> {
            self.gate(UpdateStage::Apply);
            self.inner.set_boot_slot(slot, image_len)
        }
    }

    #[test]
    fn every_stage_starts_from_zero() {
        let (reached_tx, reached) = mpsc::channel();
        let (proceed, proceed_rx) = mpsc::channel();
        let flash = GatedFlash {
            inner: MemoryFlash::new(4096, b"running image"),
            reached: reached_tx,
            proceed: proceed_rx,
            verify_seen: AtomicBool::new(false),
        };
        let manager = UpdateManager::new(Box::new(flash), policy(Duration::from_millis(500)));
        let (mut peer, mut badge) = memory_pair();
        let image = image(1000);
        peer.write_all(&image).unwrap();
        manager
            .request_update(&signed_header(&image, &signing_key()), badge.data_channel().unwrap())
            .unwrap();

        for (stage, state) in [
            (UpdateStage::Download, UpdateState::Downloading),
            (UpdateStage::Verify, UpdateState::Verifying),
            (UpdateStage::Apply, UpdateState::Applying),
        ] {
            assert_eq!(reached.recv_timeout(Duration::from_secs(5)).unwrap(), stage);
            assert_eq!(manager.state(), state);
            assert_eq!(manager.progress(), Progress { stage, percent: 0 });
            proceed.send(()).unwrap();
        }

        assert_eq!(manager.wait_settled(Duration::from_secs(5)), UpdateState::Committed);
        assert_eq!(manager.progress(), Progress { stage: UpdateStage::Apply, percent: 100 });
    }

    #[test]
    fn new_attempt_restarts_progress_from_download() {
        let (manager, _flash, mut peer, mut badge) = setup(4096);
        let image = image(256);
        let forged = signed_header(&image, &SigningKey::from_bytes(&[9u8; 32]));
        peer.write_all(&image).unwrap();
        manager.request_update(&forged, badge.data_channel().unwrap()).unwrap();
        assert_eq!(manager.wait_settled(Duration::from_secs(5)), UpdateState::Failed);
        assert_eq!(manager.progress().stage, UpdateStage::Verify);

        // nothing streamed yet, so the worker is still waiting on its first chunk
        manager
            .request_update(&signed_header(&image, &signing_key()), badge.data_channel().unwrap())
            .unwrap();
        assert_eq!(manager.progress(), Progress { stage: UpdateStage::Download, percent: 0 });
        peer.write_all(&image).unwrap();
        assert_eq!(manager.wait_settled(Duration::from_secs(5)), UpdateState::Committed);
    }

    #[test]
    fn progress_never_goes_backwards_within_a_stage() {
        let (manager, _flash, mut peer, mut badge) = setup(8192);
        let image = image(6000);
        manager
            .request_update(&signed_header(&image, &signing_key()), badge.data_channel().unwrap())
            .unwrap();

        let feeder = std::thread::spawn(move || {
            for piece in image.chunks(500) {
                peer.write_all(piece).unwrap();
                std::thread::sleep(Duration::from_millis(2));
            }
            peer
        });

        let mut last = manager.progress();
        let deadline = Instant::now() + Duration::from_secs(5);
        while manager.is_busy() && Instant::now() < deadline {
            let now = manager.progress();
            assert!(now.stage >= last.stage);
            if now.stage == last.stage {
                assert!(now.percent >= last.percent);
            }
            last = now;
        }
        let _peer = feeder.join().unwrap();
        assert_eq!(manager.state(), UpdateState::Committed);
    }
}
