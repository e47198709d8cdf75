use log::{debug, error, trace, warn};

use crate::clock::{Clock, Deadline};
use crate::com::Com;
use crate::config::{Config, RxGain};
use crate::picc::Uid;
use crate::register::*;
use crate::{Error, Result};

/// Size of the MFRC522 FIFO buffer.
pub const FIFO_SIZE: usize = 64;

/// FIFO content after the digital self test of a version 2.0 chip
/// (datasheet 16.1.1).
pub const SELF_TEST_REFERENCE: [u8; FIFO_SIZE] = [
    0x00, 0xEB, 0x66, 0xBA, 0x57, 0xBF, 0x23, 0x95,
    0xD0, 0xE3, 0x0D, 0x3D, 0x27, 0x89, 0x5C, 0xDE,
    0x9D, 0x3B, 0xA7, 0x00, 0x21, 0x5B, 0x89, 0x82,
    0x51, 0x3A, 0xEB, 0x02, 0x0C, 0xA5, 0x00, 0x49,
    0x7C, 0x84, 0x4D, 0xB3, 0xCC, 0xD2, 0x1B, 0x81,
    0x5D, 0x48, 0x76, 0xD5, 0x71, 0x61, 0x21, 0xA9,
    0x86, 0x96, 0x83, 0x38, 0xCF, 0x9D, 0x5B, 0x6D,
    0xDC, 0x15, 0xBA, 0x3E, 0x7D, 0x95, 0x3B, 0x2F,
];

const SELF_TEST_ENABLE: u8 = 0x09;

#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Idle = 0b0000,
    Mem = 0b0001,
    GenerateRandomId = 0b0010,
    CalcCRC = 0b0011,
    Transmit = 0b0100,
    NoCmdChange = 0b0111,
    Receive = 0b1000,
    Transceive = 0b1100,
    MFAuthent = 0b1110,
    SoftReset = 0b1111,
}

/// Data read back from the FIFO after a command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Response {
    pub(crate) data: heapless::Vec<u8, FIFO_SIZE>,
    pub(crate) valid_bits: u8,
    pub(crate) collision: bool,
}

impl Response {
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Valid bits in the last byte, 0 when the whole byte is valid.
    pub fn valid_bits(&self) -> u8 {
        self.valid_bits
    }
}

/// One MFRC522 behind a transport. Not reentrant: every operation runs to
/// completion on the caller's thread.
pub struct MFRC522<C, T> {
    com: C,
    clock: T,
    config: Config,
    pub(crate) uid: Option<Uid>,
}

impl<C: Com, T: Clock> MFRC522<C, T> {
    /// Soft resets and initializes the chip.
    pub fn new(com: C, clock: T, config: Config) -> Result<Self> {
        let mut mfrc = MFRC522 {
            com,
            clock,
            config,
            uid: None,
        };
        mfrc.init()?;
        Ok(mfrc)
    }

    pub fn release(self) -> (C, T) {
        (self.com, self.clock)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn clock(&self) -> &T {
        &self.clock
    }

    pub fn com_mut(&mut self) -> &mut C {
        &mut self.com
    }

    /// UID of the card picked by the last successful select.
    pub fn selected_uid(&self) -> Option<&Uid> {
        self.uid.as_ref()
    }

    fn exchange(&mut self, buf: &mut [u8]) -> Result<()> {
        let address = buf.first().copied().unwrap_or_default();
        self.com.exchange(buf).map_err(|_| {
            error!("transport failed, address byte {:#04x}", address);
            Error::InternalError
        })
    }

    pub fn read_register(&mut self, reg: Register) -> Result<u8> {
        let mut buf = [reg.read_address(), 0];
        self.exchange(&mut buf)?;
        trace!("read {:#04x} from {:?}", buf[1], reg);
        Ok(buf[1])
    }

    /// Reads `values.len()` bytes from `reg`. With `rx_align` > 0 only bits
    /// `rx_align..8` of the first byte are replaced, the low ones are kept.
    pub fn read_registers(&mut self, reg: Register, values: &mut [u8], rx_align: u8) -> Result<()> {
        let count = values.len();
        if count == 0 {
            return Ok(());
        }
        if count > FIFO_SIZE || rx_align > 7 {
            return Err(Error::Invalid);
        }
        // One address byte per value, the final zero clocks out the last one.
        let mut buf = [0u8; FIFO_SIZE + 1];
        buf[..count].fill(reg.read_address());
        buf[count] = 0;
        self.exchange(&mut buf[..=count])?;

        for (i, value) in values.iter_mut().enumerate() {
            let read = buf[i + 1];
            *value = if i == 0 && rx_align != 0 {
                let mask = 0xFFu8 << rx_align;
                (*value & !mask) | (read & mask)
            } else {
                read
            };
        }
        trace!("read {:02x?} from {:?}", values, reg);
        Ok(())
    }

    pub fn write_register(&mut self, reg: Register, value: u8) -> Result<()> {
        let mut buf = [reg.write_address(), value];
        trace!("write {:#04x} to {:?}", value, reg);
        self.exchange(&mut buf)
    }

    pub fn write_registers(&mut self, reg: Register, values: &[u8]) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        if values.len() > FIFO_SIZE {
            return Err(Error::Invalid);
        }
        let mut buf = [0u8; FIFO_SIZE + 1];
        buf[0] = reg.write_address();
        buf[1..=values.len()].copy_from_slice(values);
        trace!("write {:02x?} to {:?}", values, reg);
        self.exchange(&mut buf[..=values.len()])
    }

    pub fn set_register_bitmask(&mut self, reg: Register, mask: u8) -> Result<()> {
        let tmp = self.read_register(reg)?;
        self.write_register(reg, tmp | mask)
    }

    pub fn clear_register_bitmask(&mut self, reg: Register, mask: u8) -> Result<()> {
        let tmp = self.read_register(reg)?;
        self.write_register(reg, tmp & !mask)
    }

    pub fn command(&mut self, command: Command) -> Result<()> {
        self.write_register(Register::CommandReg, command as u8)
    }

    /// Polls until `poll` yields a value or `timeout_ms` have passed. This is
    /// the only place the driver waits on the chip.
    pub(crate) fn wait_for<R>(
        &mut self,
        timeout_ms: u64,
        mut poll: impl FnMut(&mut Self) -> Result<Option<R>>,
    ) -> Result<R> {
        let deadline = Deadline::start(&self.clock, timeout_ms);
        loop {
            if let Some(done) = poll(self)? {
                return Ok(done);
            }
            if deadline.expired(&self.clock) {
                return Err(Error::Timeout);
            }
        }
    }

    pub fn init(&mut self) -> Result<()> {
        if !self.config.prescaler_fits() {
            return Err(Error::Invalid);
        }
        self.reset()?;

        // Back to 106 kBd, a previous session may have changed it.
        self.write_register(Register::TxModeReg, 0x00)?;
        self.write_register(Register::RxModeReg, 0x00)?;
        // Reset ModWidthReg
        self.write_register(Register::ModWidthReg, 0x26)?;

        // f_timer = 13.56 MHz / (2*TPreScaler+1) where TPreScaler = [TPrescaler_Hi:TPrescaler_Lo].
        // TPrescaler_Hi are the four low bits in TModeReg. TPrescaler_Lo is TPrescalerReg.
        // TAuto=1; timer starts automatically at the end of the transmission.
        let [prescaler_hi, prescaler_lo] = self.config.timer_prescaler.to_be_bytes();
        self.write_register(Register::TModeReg, 0x80 | (prescaler_hi & 0x0F))?;
        self.write_register(Register::TPrescalerReg, prescaler_lo)?;
        let [reload_hi, reload_lo] = self.config.timer_reload.to_be_bytes();
        self.write_register(Register::TReloadRegHigh, reload_hi)?;
        self.write_register(Register::TReloadRegLow, reload_lo)?;

        self.write_register(Register::TxASKReg, 0x40)?; // Force a 100 % ASK modulation independent of the ModGsPReg register setting
        self.write_register(Register::ModeReg, 0x3D)?; // CRC coprocessor preset 0x6363 (ISO 14443-3 part 6.2.4)

        if let Some(gain) = self.config.antenna_gain {
            self.set_antenna_gain(gain)?;
        }
        self.antenna_on()
    }

    pub fn reset(&mut self) -> Result<()> {
        self.command(Command::SoftReset)?;
        let timeout = self.config.reset_timeout_ms;
        // PowerDown stays set until the oscillator is up again.
        self.wait_for(timeout, |mfrc| {
            let cmd = mfrc.read_register(Register::CommandReg)?;
            Ok((cmd & POWER_DOWN == 0).then_some(()))
        })
    }

    pub fn antenna_on(&mut self) -> Result<()> {
        let control_reg = self.read_register(Register::TxControlReg)?;
        if (control_reg & TX_RF_EN) != TX_RF_EN {
            self.write_register(Register::TxControlReg, control_reg | TX_RF_EN)?;
        }
        Ok(())
    }

    pub fn antenna_off(&mut self) -> Result<()> {
        self.clear_register_bitmask(Register::TxControlReg, TX_RF_EN)
    }

    pub fn antenna_gain(&mut self) -> Result<RxGain> {
        Ok(RxGain::from_bits(self.read_register(Register::RFCfgReg)?))
    }

    pub fn set_antenna_gain(&mut self, gain: RxGain) -> Result<()> {
        if self.antenna_gain()? != gain {
            self.clear_register_bitmask(Register::RFCfgReg, RX_GAIN_MASK)?;
            self.set_register_bitmask(Register::RFCfgReg, gain.bits() & RX_GAIN_MASK)?;
        }
        Ok(())
    }

    /// VersionReg: 0x91 for version 1.0, 0x92 for version 2.0.
    pub fn version(&mut self) -> Result<u8> {
        self.read_register(Register::VersionReg)
    }

    /// Logs the chip's registers at debug level.
    pub fn dump_registers(&mut self) -> Result<()> {
        for &reg in [
            Register::CommandReg,
            Register::ComlEnReg,
            Register::DivlEnReg,
            Register::ComIrqReg,
            Register::DivIrqReg,
            Register::ErrorReg,
            Register::Status1Reg,
            Register::Status2Reg,
            Register::FIFOLevelReg,
            Register::WaterLevelReg,
            Register::ControlReg,
            Register::BitFramingReg,
            Register::CollReg,
            Register::ModeReg,
            Register::TxModeReg,
            Register::RxModeReg,
            Register::TxControlReg,
            Register::TxASKReg,
            Register::RFCfgReg,
            Register::TModeReg,
            Register::TPrescalerReg,
            Register::TReloadRegHigh,
            Register::TReloadRegLow,
            Register::VersionReg,
        ]
        .iter()
        {
            let value = self.read_register(reg)?;
            debug!("{:?}: {:02x?}", reg, value);
        }
        Ok(())
    }

    /// Digital self test, datasheet section 16.1.1. The chip is initialized
    /// again afterwards. `Ok(false)` means the FIFO did not match the
    /// reference output.
    pub fn self_test(&mut self) -> Result<bool> {
        self.reset()?;

        // 25 zero bytes wipe the internal buffer.
        let zeros = [0u8; 25];
        self.write_register(Register::FIFOLevelReg, FLUSH_BUFFER)?;
        self.write_registers(Register::FIFODataReg, &zeros)?;
        self.command(Command::Mem)?;

        self.write_register(Register::AutoTestReg, SELF_TEST_ENABLE)?;
        self.write_register(Register::FIFODataReg, 0x00)?;
        self.command(Command::CalcCRC)?;

        let timeout = self.config.crc_timeout_ms;
        let filled = match self.wait_for(timeout, |mfrc| {
            let level = mfrc.read_register(Register::FIFOLevelReg)? & FIFO_LEVEL_MASK;
            Ok((level as usize >= FIFO_SIZE).then_some(()))
        }) {
            Ok(()) => true,
            Err(Error::Timeout) => false,
            Err(e) => return Err(e),
        };
        self.command(Command::Idle)?;
        let mut result = [0u8; FIFO_SIZE];
        if filled {
            self.read_registers(Register::FIFODataReg, &mut result, 0)?;
        }
        self.write_register(Register::AutoTestReg, 0x00)?;

        let version = self.version()?;
        if version != 0x92 {
            warn!("self test reference is for version 0x92, chip reports {:#04x}", version);
        }
        let passed = filled && result == SELF_TEST_REFERENCE;
        if !passed {
            warn!("self test failed");
        }

        self.init()?;
        Ok(passed)
    }

    /// CRC_A of `data` from the coprocessor, little endian as transmitted.
    pub fn calculate_crc(&mut self, data: &[u8]) -> Result<u16> {
        self.command(Command::Idle)?;
        self.write_register(Register::DivIrqReg, CRC_IRQ)?; // Clear the CRCIRq interrupt request bit
        self.write_register(Register::FIFOLevelReg, FLUSH_BUFFER)?;
        self.write_registers(Register::FIFODataReg, data)?;
        self.command(Command::CalcCRC)?;

        let timeout = self.config.crc_timeout_ms;
        let done = self.wait_for(timeout, |mfrc| {
            let n = mfrc.read_register(Register::DivIrqReg)?;
            Ok((n & CRC_IRQ != 0).then_some(()))
        });
        if let Err(e) = done {
            // The coprocessor does not stall on valid input.
            error!("CRC coprocessor did not finish");
            self.command(Command::Idle)?;
            return Err(match e {
                Error::Timeout => Error::InternalError,
                other => other,
            });
        }

        self.command(Command::Idle)?;
        let low = self.read_register(Register::CRCResultRegLow)?;
        let high = self.read_register(Register::CRCResultRegHigh)?;
        Ok(u16::from_le_bytes([low, high]))
    }

    pub(crate) fn crc_bytes(&mut self, data: &[u8]) -> Result<[u8; 2]> {
        Ok(self.calculate_crc(data)?.to_le_bytes())
    }

    /// Runs `command` on `send_data` and collects the answer. A collision is
    /// reported through [`Response::collision`] with the bits received so far,
    /// the CRC is not checked in that case.
    pub(crate) fn communicate_raw(
        &mut self,
        command: Command, // The command to execute.
        wait_irq: u8,     // The bits in the ComIrqReg register that signals successful completion of the command.
        send_data: &[u8], // The data to transfer to the FIFO.
        back_len: usize,  // Max number of bytes that should be returned, 0 for none.
        valid_bits: u8,   // The number of valid bits in the last byte. 0 for 8 valid bits.
        rx_align: u8,     // Defines the bit position for the first bit received. Default 0.
        check_crc: bool,
    ) -> Result<Response> {
        if send_data.len() > FIFO_SIZE || back_len > FIFO_SIZE || valid_bits > 7 || rx_align > 7 {
            return Err(Error::Invalid);
        }
        // RxAlign = BitFramingReg[6..4]. TxLastBits = BitFramingReg[2..0]
        let bit_framing = (rx_align << 4) | valid_bits;

        self.command(Command::Idle)?; // Stop any active command.
        self.write_register(Register::ComIrqReg, ALL_IRQ)?; // Clear all seven interrupt request bits.
        self.write_register(Register::FIFOLevelReg, FLUSH_BUFFER)?;
        self.write_registers(Register::FIFODataReg, send_data)?;
        self.write_register(Register::BitFramingReg, bit_framing)?;
        self.command(command)?;
        if command == Command::Transceive {
            self.set_register_bitmask(Register::BitFramingReg, START_SEND)?;
        }

        // TAuto makes the chip's own timer start when transmission ends; its
        // TimerIRq is the card's "nothing received". The host deadline covers
        // a chip that stopped responding altogether.
        let timeout = self.config.command_timeout_ms;
        let waited = self.wait_for(timeout, |mfrc| {
            let n = mfrc.read_register(Register::ComIrqReg)?;
            if n & wait_irq != 0 {
                return Ok(Some(()));
            }
            if n & TIMER_IRQ != 0 {
                return Err(Error::Timeout);
            }
            Ok(None)
        });
        if let Err(e) = waited {
            if e == Error::Timeout {
                trace!("{:?} timed out", command);
                self.command(Command::Idle)?;
            }
            return Err(e);
        }

        // ErrorReg[7..0] bits are: WrErr TempErr reserved BufferOvfl CollErr CRCErr ParityErr ProtocolErr
        let error_reg_value = self.read_register(Register::ErrorReg)?;
        if error_reg_value & BUFFER_OVFL != 0 {
            return Err(Error::NoRoom);
        }
        if error_reg_value & (PARITY_ERR | PROTOCOL_ERR) != 0 {
            debug!("ErrorReg {:#04x}", error_reg_value);
            return Err(Error::Communication);
        }

        let mut response = Response::default();
        if back_len != 0 {
            let n = (self.read_register(Register::FIFOLevelReg)? & FIFO_LEVEL_MASK) as usize;
            if n > back_len {
                return Err(Error::NoRoom);
            }
            response.data.resize(n, 0).map_err(|_| Error::NoRoom)?;
            self.read_registers(Register::FIFODataReg, &mut response.data, rx_align)?;
            // RxLastBits[2:0] indicates the number of valid bits in the last received byte.
            // If this value is 0b000, the whole byte is valid.
            response.valid_bits = self.read_register(Register::ControlReg)? & RX_LAST_BITS_MASK;
        }

        if error_reg_value & COLL_ERR != 0 {
            response.collision = true;
            return Ok(response);
        }

        if back_len != 0 && check_crc {
            let data = &response.data;
            // In this case a MIFARE Classic NAK is not OK.
            if data.len() == 1 && response.valid_bits == 4 {
                return Err(Error::MifareNack);
            }
            // CRC_A needs two whole trailing bytes.
            if data.len() < 2 || response.valid_bits != 0 {
                return Err(Error::CrcWrong);
            }
            let split = data.len() - 2;
            let received = [data[split], data[split + 1]];
            if self.crc_bytes(&response.data[..split])? != received {
                return Err(Error::CrcWrong);
            }
        }

        Ok(response)
    }

    /// Transfers `send_data` to the FIFO, runs `command` and waits for it to
    /// complete. Returns the FIFO content the command left behind.
    pub fn communicate_with_picc(
        &mut self,
        command: Command,
        wait_irq: u8,
        send_data: &[u8],
        back_len: usize,
        valid_bits: u8,
        rx_align: u8,
        check_crc: bool,
    ) -> Result<Response> {
        let response = self.communicate_raw(
            command, wait_irq, send_data, back_len, valid_bits, rx_align, check_crc,
        )?;
        if response.collision {
            return Err(Error::Collision);
        }
        Ok(response)
    }

    pub fn transceive_data(
        &mut self,
        send_data: &[u8],
        back_len: usize,
        valid_bits: u8,
        rx_align: u8,
        check_crc: bool,
    ) -> Result<Response> {
        self.communicate_with_picc(
            Command::Transceive,
            RX_IRQ | IDLE_IRQ,
            send_data,
            back_len,
            valid_bits,
            rx_align,
            check_crc,
        )
    }
}
