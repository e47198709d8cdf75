use crate::register::RX_GAIN_MASK;

/// Receiver voltage gain, RFCfgReg RxGain[2:0] (datasheet table 98).
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxGain {
    Db18 = 0x00,
    Db23 = 0x01,
    Db18Alt = 0x02, // same as 000b
    Db23Alt = 0x03, // same as 001b
    Db33 = 0x04,    // chip default
    Db38 = 0x05,
    Db43 = 0x06,
    Db48 = 0x07,
}

impl RxGain {
    pub const MIN: RxGain = RxGain::Db18;
    pub const AVG: RxGain = RxGain::Db33;
    pub const MAX: RxGain = RxGain::Db48;

    /// The value as it sits in RFCfgReg.
    pub fn bits(self) -> u8 {
        (self as u8) << 4
    }

    pub fn from_bits(rf_cfg: u8) -> Self {
        match (rf_cfg & RX_GAIN_MASK) >> 4 {
            0x00 => RxGain::Db18,
            0x01 => RxGain::Db23,
            0x02 => RxGain::Db18Alt,
            0x03 => RxGain::Db23Alt,
            0x04 => RxGain::Db33,
            0x05 => RxGain::Db38,
            0x06 => RxGain::Db43,
            _ => RxGain::Db48,
        }
    }
}

/// Reader settings applied by [`MFRC522::init`](crate::MFRC522::init).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// 12 bit TPrescaler. f_timer = 13.56 MHz / (2 * TPrescaler + 1).
    pub timer_prescaler: u16,
    /// Timer reload value, in timer ticks.
    pub timer_reload: u16,
    /// Host side deadline for one FIFO command.
    pub command_timeout_ms: u64,
    /// Host side deadline for the CRC coprocessor.
    pub crc_timeout_ms: u64,
    /// Host side deadline for the soft reset to finish.
    pub reset_timeout_ms: u64,
    /// `None` keeps whatever gain the chip comes up with.
    pub antenna_gain: Option<RxGain>,
    /// Repeat reports of the same UID are suppressed for this long.
    pub debounce_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // 0x0A9 = 169 => f_timer = 40 kHz, a timer period of 25 us.
            timer_prescaler: 0x0A9,
            // 0x3E8 = 1000 ticks, 25 ms before the chip raises TimerIRq.
            timer_reload: 0x03E8,
            command_timeout_ms: 36,
            crc_timeout_ms: 89,
            reset_timeout_ms: 150,
            antenna_gain: None,
            debounce_ms: 3000,
        }
    }
}

impl Config {
    pub fn with_timer(mut self, prescaler: u16, reload: u16) -> Self {
        self.timer_prescaler = prescaler;
        self.timer_reload = reload;
        self
    }

    pub fn with_command_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.command_timeout_ms = timeout_ms;
        self
    }

    pub fn with_crc_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.crc_timeout_ms = timeout_ms;
        self
    }

    pub fn with_antenna_gain(mut self, gain: RxGain) -> Self {
        self.antenna_gain = Some(gain);
        self
    }

    pub fn with_debounce_ms(mut self, debounce_ms: u64) -> Self {
        self.debounce_ms = debounce_ms;
        self
    }

    /// TPrescaler only has 12 bits; the upper four live in TModeReg.
    pub(crate) fn prescaler_fits(&self) -> bool {
        self.timer_prescaler <= 0x0FFF
    }
}
