//! MFRC522 register map (datasheet chapter 9) and the bits the driver uses.

#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    // Page 0: command and status
    CommandReg = 0x01,
    ComlEnReg = 0x02,
    DivlEnReg = 0x03,
    ComIrqReg = 0x04,
    DivIrqReg = 0x05,
    ErrorReg = 0x06,
    Status1Reg = 0x07,
    Status2Reg = 0x08,
    FIFODataReg = 0x09,
    FIFOLevelReg = 0x0A,
    WaterLevelReg = 0x0B,
    ControlReg = 0x0C,
    BitFramingReg = 0x0D,
    CollReg = 0x0E,
    // Page 1: command
    ModeReg = 0x11,
    TxModeReg = 0x12,
    RxModeReg = 0x13,
    TxControlReg = 0x14,
    TxASKReg = 0x15,
    TxSelReg = 0x16,
    RxSelReg = 0x17,
    RxThresholdReg = 0x18,
    DemodReg = 0x19,
    MfTxReg = 0x1C,
    MfRxReg = 0x1D,
    SerialSpeedReg = 0x1F,
    // Page 2: configuration
    CRCResultRegHigh = 0x21,
    CRCResultRegLow = 0x22,
    ModWidthReg = 0x24,
    RFCfgReg = 0x26,
    GsNReg = 0x27,
    CWGsPReg = 0x28,
    ModGsPReg = 0x29,
    TModeReg = 0x2A,
    TPrescalerReg = 0x2B,
    TReloadRegHigh = 0x2C,
    TReloadRegLow = 0x2D,
    TCounterValRegHigh = 0x2E,
    TCounterValRegLow = 0x2F,
    // Page 3: test
    TestSel1Reg = 0x31,
    TestSel2Reg = 0x32,
    TestPinEnReg = 0x33,
    TestPinValueReg = 0x34,
    TestBusReg = 0x35,
    AutoTestReg = 0x36,
    VersionReg = 0x37,
    AnalogTestReg = 0x38,
    TestDAC1Reg = 0x39,
    TestDAC2Reg = 0x3A,
    TestADCReg = 0x3B,
}

const READ: u8 = 0b1000_0000;

impl Register {
    /// Address byte of a read transaction: address in bits 6..1, MSB set.
    pub fn read_address(self) -> u8 {
        ((self as u8) << 1) | READ
    }

    /// Address byte of a write transaction: address in bits 6..1, MSB clear.
    pub fn write_address(self) -> u8 {
        ((self as u8) << 1) & 0b0111_1110
    }
}

// CommandReg
pub const POWER_DOWN: u8 = 1 << 4;

// ComIrqReg / DivIrqReg
pub const IRQ_SET1: u8 = 1 << 7;
pub const TIMER_IRQ: u8 = 1 << 0;
pub const IDLE_IRQ: u8 = 1 << 4;
pub const RX_IRQ: u8 = 1 << 5;
pub const ALL_IRQ: u8 = 0x7F;
pub const CRC_IRQ: u8 = 1 << 2;

// ErrorReg
pub const PROTOCOL_ERR: u8 = 1 << 0;
pub const PARITY_ERR: u8 = 1 << 1;
pub const COLL_ERR: u8 = 1 << 3;
pub const BUFFER_OVFL: u8 = 1 << 4;

// Status2Reg
pub const MF_CRYPTO1_ON: u8 = 1 << 3;

// FIFOLevelReg
pub const FLUSH_BUFFER: u8 = 1 << 7;
pub const FIFO_LEVEL_MASK: u8 = 0x7F;

// ControlReg
pub const RX_LAST_BITS_MASK: u8 = 0x07;

// BitFramingReg
pub const START_SEND: u8 = 1 << 7;

// CollReg
pub const VALUES_AFTER_COLL: u8 = 1 << 7;
pub const COLL_POS_NOT_VALID: u8 = 1 << 5;
pub const COLL_POS_MASK: u8 = 0x1F;

// TxControlReg
pub const TX_RF_EN: u8 = 0x03;

// RFCfgReg
pub const RX_GAIN_MASK: u8 = 0x70;
