use core::fmt;

use crate::{Error, Result};

#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    REQA = 0x26, // REQuest command, Type A. Invites PICCs in state IDLE to go to READY and prepare for anticollision or selection. 7 bit frame.
    WUPA = 0x52, // Wake-UP command, Type A. Invites PICCs in state IDLE and HALT to go to READY(*) and prepare for anticollision or selection. 7 bit frame.
    CT = 0x88,   // Cascade Tag. Not really a command, but used during anti collision.
    SelCl1 = 0x93, // Anti collision/Select, Cascade Level 1
    SelCl2 = 0x95, // Anti collision/Select, Cascade Level 2
    SelCl3 = 0x97, // Anti collision/Select, Cascade Level 3
    HLTA = 0x50, // HaLT command, Type A. Instructs an ACTIVE PICC to go to state HALT.
    // MIFARE Classic (MF1S503x, section 9). Authenticate with PCD MFAuthent first.
    MfAuthKeyA = 0x60,  // Perform authentication with Key A
    MfAuthKeyB = 0x61,  // Perform authentication with Key B
    MfRead = 0x30,      // Reads one 16 byte block from the authenticated sector of the PICC.
    MfWrite = 0xA0,     // Writes one 16 byte block to the authenticated sector of the PICC.
    MfDecrement = 0xC0, // Decrements the contents of a block and stores the result in the internal data register.
    MfIncrement = 0xC1, // Increments the contents of a block and stores the result in the internal data register.
    MfRestore = 0xC2,   // Reads the contents of a block into the internal data register.
    MfTransfer = 0xB0,  // Writes the contents of the internal data register to a block.
    // MIFARE Ultralight (MF0ICU1, section 8.6)
    UlWrite = 0xA2, // Writes one 4 byte page to the PICC.
}

/// The 4 bit ACK of MIFARE Classic. Every other value is a NAK.
pub const MF_ACK: u8 = 0xA;

/// SAK bit set while the UID is not complete yet.
pub const SAK_CASCADE: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PiccType {
    Unknown,
    Iso14443_4,  // PICC compliant with ISO/IEC 14443-4
    Iso18092,    // PICC compliant with ISO/IEC 18092 (NFC)
    MifareMini,  // MIFARE Classic protocol, 320 bytes
    Mifare1k,    // MIFARE Classic protocol, 1KB
    Mifare4k,    // MIFARE Classic protocol, 4KB
    MifareUL,    // MIFARE Ultralight or Ultralight C
    MifarePlus,  // MIFARE Plus
    TNP3XXX,     // Only mentioned in NXP AN 10833 MIFARE Type Identification Procedure
    NotComplete, // SAK indicates UID is not complete.
}

impl PiccType {
    pub fn from_sak(sak: u8) -> Self {
        // http://www.nxp.com/documents/application_note/AN10833.pdf
        // 3.2 Coding of Select Acknowledge (SAK)
        // ignore 8-bit (iso14443 starts with LSBit = bit 1)
        // fixes wrong type for manufacturer Infineon (http://nfc-tools.org/index.php?title=ISO14443A)
        match sak & 0x7F {
            0x04 => PiccType::NotComplete,
            0x09 => PiccType::MifareMini,
            0x08 => PiccType::Mifare1k,
            0x18 => PiccType::Mifare4k,
            0x00 => PiccType::MifareUL,
            0x10 | 0x11 => PiccType::MifarePlus,
            0x01 => PiccType::TNP3XXX,
            0x20 => PiccType::Iso14443_4,
            0x40 => PiccType::Iso18092,
            _ => PiccType::Unknown,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PiccType::Iso14443_4 => "PICC compliant with ISO/IEC 14443-4",
            PiccType::Iso18092 => "PICC compliant with ISO/IEC 18092 (NFC)",
            PiccType::MifareMini => "MIFARE Mini, 320 bytes",
            PiccType::Mifare1k => "MIFARE 1KB",
            PiccType::Mifare4k => "MIFARE 4KB",
            PiccType::MifareUL => "MIFARE Ultralight or Ultralight C",
            PiccType::MifarePlus => "MIFARE Plus",
            PiccType::TNP3XXX => "MIFARE TNP3XXX",
            PiccType::NotComplete => "SAK indicates UID is not complete.",
            PiccType::Unknown => "Unknown type",
        }
    }

    pub fn is_mifare_classic(self) -> bool {
        matches!(
            self,
            PiccType::MifareMini | PiccType::Mifare1k | PiccType::Mifare4k
        )
    }
}

/// UID of a selected PICC, cascade tags stripped.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Uid {
    bytes: heapless::Vec<u8, 10>, // The UID can have 4, 7 or 10 bytes.
    sak: u8,                      // The SAK (Select acknowledge) byte returned from the PICC after successful selection.
}

impl Uid {
    pub fn new(bytes: &[u8], sak: u8) -> Result<Self> {
        if !matches!(bytes.len(), 4 | 7 | 10) {
            return Err(Error::Invalid);
        }
        let bytes = heapless::Vec::from_slice(bytes).map_err(|_| Error::Invalid)?;
        Ok(Self { bytes, sak })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn sak(&self) -> u8 {
        self.sak
    }

    pub fn picc_type(&self) -> PiccType {
        PiccType::from_sak(self.sak)
    }

    /// Number of cascade levels this UID size takes to select.
    pub fn cascade_levels(&self) -> usize {
        match self.bytes.len() {
            4 => 1,
            7 => 2,
            _ => 3,
        }
    }

    /// The four bytes MFAuthent binds the session to: the last ones of the UID.
    pub(crate) fn auth_bytes(&self) -> [u8; 4] {
        let mut out = [0u8; 4];
        out.copy_from_slice(&self.bytes[self.bytes.len() - 4..]);
        out
    }
}

/// Upper-case hex, no separators, e.g. `DEADBEEF`.
impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.bytes.iter() {
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    A,
    B,
}

impl KeyType {
    pub(crate) fn command(self) -> Command {
        match self {
            KeyType::A => Command::MfAuthKeyA,
            KeyType::B => Command::MfAuthKeyB,
        }
    }
}

/// MIFARE Crypto1 key.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Key([u8; 6]);

impl Key {
    pub const fn new(bytes: [u8; 6]) -> Self {
        Key(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 6] {
        &self.0
    }
}

/// Factory key of a blank card.
impl Default for Key {
    fn default() -> Self {
        Key([0xFF; 6])
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Key(..)")
    }
}
