//! MFRC522 contactless reader driver.
//!
//! The reader speaks ISO/IEC 14443-3 Type A to the card (REQA/WUPA, cascade
//! anticollision, SELECT, HLTA) and MIFARE Classic on top of it
//! (authentication, block and value access). The chip itself is reached over
//! a byte oriented register interface, see [`com::Com`].
#![cfg_attr(not(test), no_std)]

pub mod clock;
pub mod com;
pub mod com_spi;
pub mod config;
pub mod mfrc522;
pub mod mifare;
pub mod picc;
pub mod presence;
pub mod register;
pub mod scan;
pub mod select;

#[cfg(test)]
mod testutils;

pub use crate::clock::Clock;
pub use crate::com::Com;
pub use crate::com_spi::ComSpi;
pub use crate::config::{Config, RxGain};
pub use crate::mfrc522::MFRC522;
pub use crate::picc::{Key, KeyType, PiccType, Uid};
pub use crate::presence::{Debouncer, Detection};
pub use crate::scan::Scanner;

/// Status of a reader operation. `Ok` is the success status, every failure is
/// one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// Error in communication
    #[error("error in communication")]
    Communication,
    #[error("collision detected")]
    Collision,
    #[error("timeout in communication")]
    Timeout,
    /// A buffer is not big enough.
    #[error("a buffer is not big enough")]
    NoRoom,
    /// Internal error in the code, or the bus to the chip failed. Should not happen.
    #[error("internal error")]
    InternalError,
    #[error("invalid argument")]
    Invalid,
    #[error("the CRC_A does not match")]
    CrcWrong,
    /// A MIFARE PICC responded with NAK.
    #[error("a MIFARE PICC responded with NAK")]
    MifareNack,
}

pub type Result<T> = core::result::Result<T, Error>;
