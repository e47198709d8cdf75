//! ISO/IEC 14443-3 Type A: wake up, cascade anticollision, SELECT and HLTA.

use log::{debug, trace, warn};

use crate::clock::Clock;
use crate::com::Com;
use crate::mfrc522::{Command as PcdCommand, MFRC522};
use crate::picc::{Command, Uid, SAK_CASCADE};
use crate::register::*;
use crate::{Error, Result};

/// UID bits of one cascade level resolved so far: four UID bytes plus BCC,
/// `count` of the 32 UID bits are known.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct LevelBits {
    bytes: [u8; 5],
    count: u8,
}

impl LevelBits {
    fn known(uid: [u8; 4]) -> Self {
        let mut bytes = [0u8; 5];
        bytes[..4].copy_from_slice(&uid);
        bytes[4] = bcc(&uid);
        LevelBits { bytes, count: 32 }
    }

    fn is_complete(&self) -> bool {
        self.count >= 32
    }

    fn uid(&self) -> [u8; 4] {
        [self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3]]
    }
}

fn bcc(uid: &[u8]) -> u8 {
    uid.iter().fold(0, |acc, b| acc ^ b)
}

const MAX_CASCADE_LEVELS: usize = 3;

fn select_command(level: usize) -> Result<Command> {
    match level {
        1 => Ok(Command::SelCl1),
        2 => Ok(Command::SelCl2),
        3 => Ok(Command::SelCl3),
        _ => Err(Error::InternalError),
    }
}

impl<C: Com, T: Clock> MFRC522<C, T> {
    /// Transmits REQA, Type A. Invites PICCs in state IDLE to go to READY.
    /// Returns the ATQA.
    pub fn request_a(&mut self) -> Result<[u8; 2]> {
        self.request_a_or_wakeup_a(Command::REQA)
    }

    /// Transmits WUPA, Type A. Invites PICCs in state IDLE and HALT to go to
    /// READY. Returns the ATQA.
    pub fn wakeup_a(&mut self) -> Result<[u8; 2]> {
        self.request_a_or_wakeup_a(Command::WUPA)
    }

    fn request_a_or_wakeup_a(&mut self, command: Command) -> Result<[u8; 2]> {
        // ValuesAfterColl=1 => Bits received after collision are cleared.
        self.clear_register_bitmask(Register::CollReg, VALUES_AFTER_COLL)?;
        // For REQA and WUPA we need the short frame format - transmit only 7 bits of the last (and only) byte.
        let response = self.transceive_data(&[command as u8], 2, 7, 0, false)?;
        let atqa = response.data();
        if atqa.len() != 2 || response.valid_bits() != 0 {
            // ATQA must be exactly 16 bits.
            return Err(Error::Communication);
        }
        trace!("ATQA {:02x?}", atqa);
        Ok([atqa[0], atqa[1]])
    }

    /// Runs the cascade anticollision loop and selects the one card in the
    /// field. When two cards collide the branch with the colliding bit set to
    /// 1 is followed.
    pub fn select(&mut self) -> Result<Uid> {
        self.select_levels(|_| Ok(None))
    }

    /// Selects a card whose UID is already known, skipping anticollision.
    pub fn select_known(&mut self, uid: &Uid) -> Result<Uid> {
        let bytes = uid.bytes();
        let levels = uid.cascade_levels();
        self.select_levels(|level| {
            if level > levels {
                // The card wants more levels than the UID has.
                return Err(Error::Invalid);
            }
            // 4 UID bytes at the last level, cascade tag + 3 before it.
            let start = (level - 1) * 3;
            let known = if level < levels {
                [Command::CT as u8, bytes[start], bytes[start + 1], bytes[start + 2]]
            } else {
                [bytes[start], bytes[start + 1], bytes[start + 2], bytes[start + 3]]
            };
            Ok(Some(LevelBits::known(known)))
        })
    }

    fn select_levels(
        &mut self,
        mut known: impl FnMut(usize) -> Result<Option<LevelBits>>,
    ) -> Result<Uid> {
        // ValuesAfterColl=1 => Bits received after collision are cleared.
        self.clear_register_bitmask(Register::CollReg, VALUES_AFTER_COLL)?;

        let mut uid: heapless::Vec<u8, 10> = heapless::Vec::new();
        let mut level = 1;
        loop {
            let sel = select_command(level)?;
            let mut bits = known(level)?.unwrap_or_default();
            while !bits.is_complete() {
                bits = self.anticollision(sel, bits)?;
            }
            let sak = self.select_level(sel, &bits)?;
            debug!("cascade level {} SAK {:#04x}", level, sak);

            let level_uid = bits.uid();
            let tagged = level_uid[0] == Command::CT as u8;
            if sak & SAK_CASCADE != 0 {
                if !tagged || level == MAX_CASCADE_LEVELS {
                    warn!("SAK asks for a cascade level after level {}", level);
                    return Err(Error::Invalid);
                }
                uid.extend_from_slice(&level_uid[1..]).map_err(|_| Error::InternalError)?;
                level += 1;
            } else {
                if tagged {
                    // The tag is never part of a UID.
                    warn!("cascade tag at complete level {}", level);
                    return Err(Error::Invalid);
                }
                uid.extend_from_slice(&level_uid).map_err(|_| Error::InternalError)?;
                let uid = Uid::new(&uid, sak)?;
                debug!("selected {}", uid);
                return Ok(uid);
            }
        }
    }

    /// One ANTICOLLISION frame with the `count` known bits of `bits` as
    /// prefix. Returns the bits known afterwards: all 32 when the card
    /// answered without a collision, one more than the collision position
    /// otherwise.
    pub(crate) fn anticollision(&mut self, sel: Command, bits: LevelBits) -> Result<LevelBits> {
        let mut bits = bits;
        let whole = (bits.count / 8) as usize;
        let tx_last_bits = bits.count % 8;
        // Number of bytes in the frame, the partial one included.
        let known_len = whole + usize::from(tx_last_bits != 0);

        let mut frame = [0u8; 7];
        frame[0] = sel as u8;
        // NVB: whole bytes in the upper nibble, extra bits in the lower.
        frame[1] = (((2 + whole) as u8) << 4) | tx_last_bits;
        frame[2..2 + known_len].copy_from_slice(&bits.bytes[..known_len]);
        // The answer continues the partial byte where the prefix stopped.
        let rx_align = tx_last_bits;
        trace!("anticollision {:?} with {} known bits", sel, bits.count);

        let response = self.communicate_raw(
            PcdCommand::Transceive,
            RX_IRQ | IDLE_IRQ,
            &frame[..2 + known_len],
            5 - whole,
            tx_last_bits,
            rx_align,
            false,
        )?;

        for (i, &b) in response.data().iter().enumerate() {
            let at = whole + i;
            if at >= bits.bytes.len() {
                break;
            }
            bits.bytes[at] = if i == 0 && rx_align != 0 {
                (bits.bytes[at] & !(0xFF << rx_align)) | b
            } else {
                b
            };
        }

        if response.collision {
            // CollReg[7..0] bits are: ValuesAfterColl reserved CollPosNotValid CollPos[4:0]
            let coll = self.read_register(Register::CollReg)?;
            if coll & COLL_POS_NOT_VALID != 0 {
                // Without a valid collision position we cannot continue
                return Err(Error::Collision);
            }
            let pos = match coll & COLL_POS_MASK {
                0 => 32,
                p => p,
            };
            if pos <= bits.count {
                // The decoder reported a bit we already resolved.
                return Err(Error::InternalError);
            }
            debug!("collision at bit {}", pos);
            let bit = pos - 1;
            bits.bytes[(bit / 8) as usize] |= 1 << (bit % 8);
            bits.count = pos;
            return Ok(bits);
        }

        if response.data().len() < 5 - whole || response.valid_bits() != 0 {
            return Err(Error::Communication);
        }
        if bcc(&bits.bytes[..4]) != bits.bytes[4] {
            warn!("BCC mismatch in {:02x?}", bits.bytes);
            return Err(Error::Invalid);
        }
        bits.count = 32;
        Ok(bits)
    }

    /// SELECT with all 32 bits of the level known. Returns the SAK.
    fn select_level(&mut self, sel: Command, bits: &LevelBits) -> Result<u8> {
        let mut frame = [0u8; 9];
        frame[0] = sel as u8;
        frame[1] = 0x70; // NVB - Number of Valid Bits: Seven whole bytes
        frame[2..6].copy_from_slice(&bits.bytes[..4]);
        // Recomputed, the last collision may have cleared the received BCC.
        frame[6] = bcc(&bits.bytes[..4]);
        let crc = self.crc_bytes(&frame[..7])?;
        frame[7..].copy_from_slice(&crc);

        let response = self.transceive_data(&frame, 3, 0, 0, true)?;
        // SAK must be exactly 24 bits (1 byte + CRC_A).
        if response.data().len() != 3 || response.valid_bits() != 0 {
            return Err(Error::Communication);
        }
        Ok(response.data()[0])
    }

    /// Instructs an ACTIVE PICC to go to state HALT.
    pub fn halt_a(&mut self) -> Result<()> {
        let mut buffer = [Command::HLTA as u8, 0, 0, 0];
        let crc = self.crc_bytes(&buffer[..2])?;
        buffer[2..].copy_from_slice(&crc);

        // A halted card stays silent. Any answer counts as a refusal.
        match self.transceive_data(&buffer, 0, 0, 0, false) {
            Err(Error::Timeout) => Ok(()),
            Ok(_) => Err(Error::Communication),
            Err(e) => Err(e),
        }
    }

    /// Returns true if a PICC responds to REQA. Only "new" cards in state
    /// IDLE are invited, sleeping ones in state HALT are ignored.
    pub fn is_new_card_present(&mut self) -> Result<bool> {
        // Reset baud rates
        self.write_register(Register::TxModeReg, 0x00)?;
        self.write_register(Register::RxModeReg, 0x00)?;
        // Reset ModWidthReg
        self.write_register(Register::ModWidthReg, 0x26)?;

        match self.request_a() {
            Ok(_) | Err(Error::Collision) => Ok(true),
            Err(Error::InternalError) => Err(Error::InternalError),
            Err(_) => Ok(false),
        }
    }

    /// Selects the card invited by [`is_new_card_present`](Self::is_new_card_present)
    /// and remembers its UID for later authentication.
    pub fn read_card_serial(&mut self) -> Result<Uid> {
        self.uid = None;
        let uid = self.select()?;
        self.uid = Some(uid.clone());
        Ok(uid)
    }

    /// Checks for a new card and reads its UID when there is one.
    pub fn poll_for_card(&mut self) -> Option<Uid> {
        match self.is_new_card_present() {
            Ok(true) => {}
            Ok(false) => return None,
            Err(e) => {
                warn!("card presence check failed: {}", e);
                return None;
            }
        }
        match self.read_card_serial() {
            Ok(uid) => Some(uid),
            Err(e) => {
                debug!("card present but not selected: {}", e);
                None
            }
        }
    }
}
