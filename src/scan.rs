use log::{debug, info, trace};

use crate::clock::Clock;
use crate::com::Com;
use crate::mfrc522::MFRC522;
use crate::picc::Uid;
use crate::presence::{Debouncer, Detection};

/// One step of a polling loop: find a card, let the caller talk to it, put
/// it to sleep and report it unless it was reported just before.
pub struct Scanner<C, T> {
    reader: MFRC522<C, T>,
    debouncer: Debouncer,
}

impl<C: Com, T: Clock> Scanner<C, T> {
    /// Debounces with the reader's `Config::debounce_ms`.
    pub fn new(reader: MFRC522<C, T>) -> Self {
        let debouncer = Debouncer::new(reader.config().debounce_ms);
        Scanner { reader, debouncer }
    }

    pub fn scan(&mut self) -> Option<Detection> {
        self.scan_with(|_, _| {})
    }

    /// Like [`scan`](Self::scan) but runs `f` on the selected card before it
    /// is halted, e.g. to authenticate and read a block.
    pub fn scan_with<F>(&mut self, f: F) -> Option<Detection>
    where
        F: FnOnce(&mut MFRC522<C, T>, &Uid),
    {
        let uid = self.reader.poll_for_card()?;
        f(&mut self.reader, &uid);
        if let Err(e) = self.reader.halt() {
            debug!("halt of {} failed: {}", uid, e);
        }

        let now = self.reader.clock().now_ms();
        if !self.debouncer.observe(&uid, now) {
            trace!("{} seen again", uid);
            return None;
        }
        info!("card {} ({}) detected", uid, uid.picc_type().name());
        self.debouncer.last().cloned()
    }

    pub fn reader(&self) -> &MFRC522<C, T> {
        &self.reader
    }

    pub fn reader_mut(&mut self) -> &mut MFRC522<C, T> {
        &mut self.reader
    }

    pub fn debouncer(&self) -> &Debouncer {
        &self.debouncer
    }

    pub fn into_reader(self) -> MFRC522<C, T> {
        self.reader
    }
}
