//! MIFARE Classic session: Crypto1 authentication, block and value access.
//!
//! Once [`authenticate`](MFRC522::authenticate) succeeds the chip encrypts
//! all further FIFO traffic itself. [`stop_crypto1`](MFRC522::stop_crypto1)
//! must be called before talking to another card.

use log::{debug, trace};

use crate::clock::Clock;
use crate::com::Com;
use crate::mfrc522::Command as PcdCommand;
use crate::mfrc522::MFRC522;
use crate::picc::{Command, Key, KeyType, Uid, MF_ACK};
use crate::register::*;
use crate::{Error, Result};

/// Size of a MIFARE Classic block.
pub const BLOCK_SIZE: usize = 16;

/// Packs `value` into the value block format: the value, its inverse and
/// the value again, followed by the address byte as addr, !addr, addr, !addr.
pub fn encode_value_block(value: i32, addr: u8) -> [u8; BLOCK_SIZE] {
    let v = value.to_le_bytes();
    let inv = (!value).to_le_bytes();
    let mut block = [0u8; BLOCK_SIZE];
    block[0..4].copy_from_slice(&v);
    block[4..8].copy_from_slice(&inv);
    block[8..12].copy_from_slice(&v);
    block[12..].copy_from_slice(&[addr, !addr, addr, !addr]);
    block
}

/// Unpacks a value block. Returns the value and the address byte, or
/// [`Error::Invalid`] when the redundant copies disagree.
pub fn decode_value_block(block: &[u8; BLOCK_SIZE]) -> Result<(i32, u8)> {
    let word = |at: usize| i32::from_le_bytes([block[at], block[at + 1], block[at + 2], block[at + 3]]);
    let value = word(0);
    if word(4) != !value || word(8) != value {
        return Err(Error::Invalid);
    }
    let addr = block[12];
    if block[13] != !addr || block[14] != addr || block[15] != !addr {
        return Err(Error::Invalid);
    }
    Ok((value, addr))
}

/// Access bits of a sector trailer (bytes 6..9) from the 3 bit access
/// conditions `g0..g2` of the data blocks and `g3` of the trailer.
pub fn set_access_bits(g0: u8, g1: u8, g2: u8, g3: u8) -> [u8; 3] {
    let c1 = ((g3 & 4) << 1) | (g2 & 4) | ((g1 & 4) >> 1) | ((g0 & 4) >> 2);
    let c2 = ((g3 & 2) << 2) | ((g2 & 2) << 1) | (g1 & 2) | ((g0 & 2) >> 1);
    let c3 = ((g3 & 1) << 3) | ((g2 & 1) << 2) | ((g1 & 1) << 1) | (g0 & 1);
    [
        ((!c2 & 0x0F) << 4) | (!c1 & 0x0F),
        (c1 << 4) | (!c3 & 0x0F),
        (c3 << 4) | c2,
    ]
}

impl<C: Com, T: Clock> MFRC522<C, T> {
    /// Executes MFAuthent for the sector holding `block`. Uses the last four
    /// bytes of `uid`.
    pub fn authenticate(&mut self, key_type: KeyType, block: u8, key: &Key, uid: &Uid) -> Result<()> {
        let mut send_data = [0u8; 12];
        send_data[0] = key_type.command() as u8;
        send_data[1] = block;
        send_data[2..8].copy_from_slice(key.as_bytes());
        send_data[8..].copy_from_slice(&uid.auth_bytes());

        match self.communicate_with_picc(PcdCommand::MFAuthent, IDLE_IRQ, &send_data, 0, 0, 0, false) {
            Ok(_) => {}
            Err(Error::Timeout) => return Err(Error::MifareNack),
            Err(e) => return Err(e),
        }
        // MFCrypto1On only goes high once the three pass handshake succeeded.
        if self.read_register(Register::Status2Reg)? & MF_CRYPTO1_ON == 0 {
            debug!("authentication for block {} refused", block);
            return Err(Error::MifareNack);
        }
        trace!("authenticated block {} with key {:?}", block, key_type);
        Ok(())
    }

    /// Leaves the authenticated state. Safe to call at any time.
    pub fn stop_crypto1(&mut self) -> Result<()> {
        self.clear_register_bitmask(Register::Status2Reg, MF_CRYPTO1_ON)
    }

    /// Authenticates, runs `f` and stops Crypto1 again whatever `f` returned.
    pub fn with_authentication<R>(
        &mut self,
        key_type: KeyType,
        block: u8,
        key: &Key,
        uid: &Uid,
        f: impl FnOnce(&mut Self) -> Result<R>,
    ) -> Result<R> {
        let result = match self.authenticate(key_type, block, key, uid) {
            Ok(()) => f(self),
            Err(e) => Err(e),
        };
        self.stop_crypto1()?;
        result
    }

    /// Reads one 16 byte block from the authenticated sector.
    pub fn mifare_read(&mut self, block: u8) -> Result<[u8; BLOCK_SIZE]> {
        let mut buffer = [Command::MfRead as u8, block, 0, 0];
        let crc = self.crc_bytes(&buffer[..2])?;
        buffer[2..].copy_from_slice(&crc);

        // 16 data bytes and the CRC_A, checked by the executor.
        let response = self.transceive_data(&buffer, BLOCK_SIZE + 2, 0, 0, true)?;
        let data = response.data();
        if data.len() != BLOCK_SIZE + 2 {
            return Err(Error::CrcWrong);
        }
        let mut block_data = [0u8; BLOCK_SIZE];
        block_data.copy_from_slice(&data[..BLOCK_SIZE]);
        Ok(block_data)
    }

    /// Sends `send_data` with a CRC_A and expects the 4 bit ACK. With
    /// `accept_timeout` a silent card counts as success.
    pub fn mifare_transceive(&mut self, send_data: &[u8], accept_timeout: bool) -> Result<()> {
        if send_data.len() > BLOCK_SIZE {
            return Err(Error::Invalid);
        }
        let mut buffer = [0u8; BLOCK_SIZE + 2];
        let len = send_data.len();
        buffer[..len].copy_from_slice(send_data);
        let crc = self.crc_bytes(&buffer[..len])?;
        buffer[len..len + 2].copy_from_slice(&crc);

        let response = match self.transceive_data(&buffer[..len + 2], BLOCK_SIZE + 2, 0, 0, false) {
            Err(Error::Timeout) if accept_timeout => return Ok(()),
            other => other?,
        };
        // Anything but 0xA in four bits is a NAK.
        if response.data().len() != 1 || response.valid_bits() != 4 {
            return Err(Error::Communication);
        }
        let ack = response.data()[0] & 0x0F;
        if ack != MF_ACK {
            debug!("NAK {:#03x}", ack);
            return Err(Error::MifareNack);
        }
        Ok(())
    }

    /// Writes one 16 byte block to the authenticated sector.
    pub fn mifare_write(&mut self, block: u8, data: &[u8; BLOCK_SIZE]) -> Result<()> {
        // Command and address first, the data once the card ACKed.
        self.mifare_transceive(&[Command::MfWrite as u8, block], false)?;
        self.mifare_transceive(data, false)
    }

    /// Writes one 4 byte page of a MIFARE Ultralight.
    pub fn ultralight_write(&mut self, page: u8, data: &[u8; 4]) -> Result<()> {
        let mut cmd = [0u8; 6];
        cmd[0] = Command::UlWrite as u8;
        cmd[1] = page;
        cmd[2..].copy_from_slice(data);
        self.mifare_transceive(&cmd, false)
    }

    /// Subtracts `delta` from the value block and keeps the result in the
    /// card's data register. Needs a [`transfer`](Self::transfer) to store it.
    pub fn decrement(&mut self, block: u8, delta: i32) -> Result<()> {
        self.two_step(Command::MfDecrement, block, delta)
    }

    /// Adds `delta` to the value block and keeps the result in the card's
    /// data register.
    pub fn increment(&mut self, block: u8, delta: i32) -> Result<()> {
        self.two_step(Command::MfIncrement, block, delta)
    }

    /// Copies the value block into the card's data register.
    pub fn restore(&mut self, block: u8) -> Result<()> {
        // Restore has no operand but the card still waits for a data step.
        self.two_step(Command::MfRestore, block, 0)
    }

    fn two_step(&mut self, command: Command, block: u8, data: i32) -> Result<()> {
        self.mifare_transceive(&[command as u8, block], false)?;
        // The card does not answer the data step.
        self.mifare_transceive(&data.to_le_bytes(), true)
    }

    /// Writes the card's data register to `block`.
    pub fn transfer(&mut self, block: u8) -> Result<()> {
        self.mifare_transceive(&[Command::MfTransfer as u8, block], false)
    }

    pub fn get_value(&mut self, block: u8) -> Result<i32> {
        let data = self.mifare_read(block)?;
        let (value, _) = decode_value_block(&data)?;
        Ok(value)
    }

    /// Formats `block` as a value block holding `value`.
    pub fn set_value(&mut self, block: u8, value: i32) -> Result<()> {
        self.mifare_write(block, &encode_value_block(value, block))
    }

    fn selected(&self) -> Result<Uid> {
        self.uid.clone().ok_or(Error::Invalid)
    }

    /// Reads `block` of the selected card with key A.
    pub fn authenticate_and_read(&mut self, block: u8, key: &Key) -> Result<[u8; BLOCK_SIZE]> {
        let uid = self.selected()?;
        self.with_authentication(KeyType::A, block, key, &uid, |mfrc| mfrc.mifare_read(block))
    }

    /// Writes `block` of the selected card with key A.
    pub fn authenticate_and_write(&mut self, block: u8, key: &Key, data: &[u8; BLOCK_SIZE]) -> Result<()> {
        let uid = self.selected()?;
        self.with_authentication(KeyType::A, block, key, &uid, |mfrc| mfrc.mifare_write(block, data))
    }

    /// Puts the selected card to sleep and ends its session.
    pub fn halt(&mut self) -> Result<()> {
        let halted = self.halt_a();
        self.stop_crypto1()?;
        self.uid = None;
        halted
    }
}
