//! A simulated MFRC522 with one card in front of it.

use core::cell::Cell;
use std::collections::VecDeque;

use crc::{Crc, CRC_16_ISO_IEC_14443_3_A};

use crate::clock::Clock;
use crate::com::Com;
use crate::config::Config;
use crate::mfrc522::{Command as PcdCommand, FIFO_SIZE, MFRC522, SELF_TEST_REFERENCE};
use crate::mifare::{decode_value_block, encode_value_block};
use crate::picc::{Command, MF_ACK};
use crate::register::*;

const CRC_A: Crc<u16> = Crc::<u16>::new(&CRC_16_ISO_IEC_14443_3_A);

/// CRC_A as transmitted, low byte first.
pub fn crc_a(data: &[u8]) -> [u8; 2] {
    CRC_A.checksum(data).to_le_bytes()
}

fn bcc(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// Reader on a simulated chip with `card` in the field.
pub fn sim_reader(card: SimCard, clock: &ManualClock) -> MFRC522<SimChip, &ManualClock> {
    MFRC522::new(SimChip::with_card(card), clock, Config::default()).unwrap()
}

/// Millisecond clock that moves one tick on every read.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: Cell<u64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// The current time without the tick.
    pub fn peek(&self) -> u64 {
        self.now.get()
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        let now = self.now.get();
        self.now.set(now + 1);
        now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusFault;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CardState {
    Idle,
    Ready(usize),
    Active,
    Halt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pending {
    Write(u8),
    Value(Command, u8),
}

/// What the card sends back to one frame.
struct Reply {
    data: Vec<u8>,
    last_bits: u8,
    coll: Option<u8>,
}

impl Reply {
    fn bytes(data: Vec<u8>) -> Option<Reply> {
        Some(Reply {
            data,
            last_bits: 0,
            coll: None,
        })
    }

    fn with_crc(mut data: Vec<u8>) -> Option<Reply> {
        let crc = crc_a(&data);
        data.extend_from_slice(&crc);
        Reply::bytes(data)
    }

    fn ack(nibble: u8) -> Option<Reply> {
        Some(Reply {
            data: vec![nibble],
            last_bits: 4,
            coll: None,
        })
    }
}

/// A MIFARE Classic 1K style card. Crypto1 is not modelled, traffic after
/// authentication stays in the clear.
pub struct SimCard {
    uid: Vec<u8>,
    sak: u8,
    pub state: CardState,
    pub in_field: bool,
    collisions: Vec<(usize, u8)>,
    pub corrupt_bcc: bool,
    pub invalid_collision_pos: bool,
    pub stale_collision: bool,
    pub answer_halt: bool,
    pub corrupt_read_crc: bool,
    pub short_read: bool,
    /// ACK nibbles to send instead of 0xA, front first.
    pub acks: VecDeque<u8>,
    pub blocks: [[u8; 16]; 64],
    keys_a: [[u8; 6]; 16],
    keys_b: [[u8; 6]; 16],
    auth_sector: Option<u8>,
    pending: Option<Pending>,
    value: i32,
    value_addr: u8,
    pub pages: [[u8; 4]; 16],
    /// Known bit count of every anticollision frame received.
    pub known_bits_seen: Vec<u8>,
    /// Cascade level of every SELECT accepted.
    pub select_frames: Vec<usize>,
}

impl SimCard {
    pub fn new(uid: &[u8]) -> Self {
        assert!(matches!(uid.len(), 4 | 7 | 10));
        let mut blocks = [[0u8; 16]; 64];
        blocks[0][..4].copy_from_slice(&uid[..4]);
        for sector in 0..16 {
            // Transport configuration: key A FF.., access FF 07 80 69, key B FF..
            blocks[sector * 4 + 3] = [
                0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x07, 0x80, 0x69, 0xFF, 0xFF, 0xFF, 0xFF,
                0xFF, 0xFF,
            ];
        }
        SimCard {
            uid: uid.to_vec(),
            sak: 0x08,
            state: CardState::Idle,
            in_field: true,
            collisions: Vec::new(),
            corrupt_bcc: false,
            invalid_collision_pos: false,
            stale_collision: false,
            answer_halt: false,
            corrupt_read_crc: false,
            short_read: false,
            acks: VecDeque::new(),
            blocks,
            keys_a: [[0xFF; 6]; 16],
            keys_b: [[0xFF; 6]; 16],
            auth_sector: None,
            pending: None,
            value: 0,
            value_addr: 0,
            pages: [[0u8; 4]; 16],
            known_bits_seen: Vec::new(),
            select_frames: Vec::new(),
        }
    }

    pub fn with_sak(mut self, sak: u8) -> Self {
        self.sak = sak;
        self
    }

    /// A second card that differs at `bit` of cascade level `level`. The
    /// driver must follow the 1 branch, so that bit of this card's UID has to
    /// be set.
    pub fn with_collision(mut self, level: usize, bit: u8) -> Self {
        let bytes = self.level_bytes(level);
        assert!(bytes[(bit / 8) as usize] & (1 << (bit % 8)) != 0);
        self.collisions.push((level, bit));
        self
    }

    pub fn with_key_a(mut self, sector: usize, key: [u8; 6]) -> Self {
        self.keys_a[sector] = key;
        self
    }

    /// The card left the field and came back.
    pub fn enter_field(&mut self) {
        self.in_field = true;
        self.state = CardState::Idle;
        self.auth_sector = None;
        self.pending = None;
    }

    fn levels(&self) -> usize {
        match self.uid.len() {
            4 => 1,
            7 => 2,
            _ => 3,
        }
    }

    fn level_bytes(&self, level: usize) -> [u8; 4] {
        let start = (level - 1) * 3;
        if level < self.levels() {
            [Command::CT as u8, self.uid[start], self.uid[start + 1], self.uid[start + 2]]
        } else {
            [self.uid[start], self.uid[start + 1], self.uid[start + 2], self.uid[start + 3]]
        }
    }

    fn atqa(&self) -> Vec<u8> {
        match self.uid.len() {
            4 => vec![0x04, 0x00],
            7 => vec![0x44, 0x00],
            _ => vec![0x84, 0x00],
        }
    }

    fn next_ack(&mut self) -> u8 {
        self.acks.pop_front().unwrap_or(MF_ACK)
    }

    fn authenticated(&self, block: u8) -> bool {
        self.auth_sector == Some(block / 4)
    }

    fn authenticate(&mut self, data: &[u8]) -> bool {
        self.auth_sector = None;
        if !self.in_field || self.state != CardState::Active || data.len() != 12 {
            return false;
        }
        let sector = (data[1] / 4) as usize;
        if sector >= 16 || data[8..12] != self.uid[self.uid.len() - 4..] {
            return false;
        }
        let key = match data[0] {
            0x60 => &self.keys_a[sector],
            0x61 => &self.keys_b[sector],
            _ => return false,
        };
        if data[2..8] != key[..] {
            return false;
        }
        self.auth_sector = Some(sector as u8);
        true
    }

    fn handle(&mut self, frame: &[u8], tx_last_bits: u8) -> Option<Reply> {
        if !self.in_field || frame.is_empty() {
            return None;
        }
        if tx_last_bits == 7 && frame.len() == 1 {
            let wakes = match frame[0] {
                0x26 => self.state == CardState::Idle,
                0x52 => matches!(self.state, CardState::Idle | CardState::Halt),
                _ => false,
            };
            if !wakes {
                return None;
            }
            self.state = CardState::Ready(1);
            return Reply::bytes(self.atqa());
        }
        match (self.state, frame[0]) {
            (CardState::Ready(level), 0x93 | 0x95 | 0x97) => {
                let sel = [0x93, 0x95, 0x97][level - 1];
                if frame[0] != sel || frame.len() < 2 {
                    self.state = CardState::Idle;
                    return None;
                }
                if frame[1] == 0x70 {
                    self.select(level, frame)
                } else {
                    self.anticollision(level, frame)
                }
            }
            (CardState::Active, _) => self.handle_active(frame),
            _ => None,
        }
    }

    fn select(&mut self, level: usize, frame: &[u8]) -> Option<Reply> {
        let bytes = self.level_bytes(level);
        if frame.len() != 9 || crc_a(&frame[..7]) != frame[7..] || frame[2..6] != bytes || frame[6] != bcc(&bytes) {
            self.state = CardState::Idle;
            return None;
        }
        self.select_frames.push(level);
        let sak = if level < self.levels() {
            self.state = CardState::Ready(level + 1);
            0x04
        } else {
            self.state = CardState::Active;
            self.sak
        };
        Reply::with_crc(vec![sak])
    }

    fn anticollision(&mut self, level: usize, frame: &[u8]) -> Option<Reply> {
        let whole = ((frame[1] >> 4) as usize).checked_sub(2)?;
        let extra = frame[1] & 0x07;
        let known = (whole * 8) as u8 + extra;
        self.known_bits_seen.push(known);

        let bytes = self.level_bytes(level);
        for bit in 0..known {
            let at = (bit / 8) as usize;
            let mask = 1 << (bit % 8);
            if frame.get(2 + at)? & mask != bytes[at] & mask {
                return None;
            }
        }

        let mut level_bits = [0u8; 5];
        level_bits[..4].copy_from_slice(&bytes);
        level_bits[4] = bcc(&bytes);
        if self.corrupt_bcc {
            level_bits[4] ^= 0x01;
        }

        let collision = if self.stale_collision && known > 0 {
            Some(known)
        } else {
            self.collisions
                .iter()
                .filter(|&&(l, bit)| l == level && bit >= known)
                .map(|&(_, bit)| bit)
                .min()
                .map(|bit| bit + 1)
        };

        let coll = collision.map(|pos| {
            // Bits from the colliding one onwards are cleared.
            let first = pos - 1;
            for bit in first..40 {
                level_bits[(bit / 8) as usize] &= !(1 << (bit % 8));
            }
            let mut coll = pos & COLL_POS_MASK;
            if self.invalid_collision_pos {
                coll |= COLL_POS_NOT_VALID;
            }
            coll
        });

        Some(Reply {
            data: level_bits[whole..].to_vec(),
            last_bits: 0,
            coll,
        })
    }

    fn handle_active(&mut self, frame: &[u8]) -> Option<Reply> {
        if frame.len() < 3 || crc_a(&frame[..frame.len() - 2]) != frame[frame.len() - 2..] {
            return None;
        }
        let payload = &frame[..frame.len() - 2];

        if let Some(pending) = self.pending.take() {
            match (pending, payload.len()) {
                (Pending::Write(block), 16) => {
                    let ack = self.next_ack();
                    if ack == MF_ACK {
                        self.blocks[block as usize].copy_from_slice(payload);
                    }
                    return Reply::ack(ack);
                }
                (Pending::Value(cmd, block), 4) => {
                    let operand = i32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
                    if let Ok((value, addr)) = decode_value_block(&self.blocks[block as usize]) {
                        self.value = match cmd {
                            Command::MfIncrement => value.wrapping_add(operand),
                            Command::MfDecrement => value.wrapping_sub(operand),
                            _ => value,
                        };
                        self.value_addr = addr;
                    }
                    // Silent unless a reply was scripted.
                    return self.acks.pop_front().and_then(Reply::ack);
                }
                _ => {}
            }
        }

        let nak = 0x4;
        match (payload[0], payload.len()) {
            (0x50, 2) => {
                self.state = CardState::Halt;
                self.auth_sector = None;
                if self.answer_halt {
                    Reply::ack(nak)
                } else {
                    None
                }
            }
            (0x30, 2) => {
                let block = payload[1];
                if !self.authenticated(block) {
                    return Reply::ack(nak);
                }
                let mut data = self.blocks[block as usize].to_vec();
                if self.short_read {
                    data.pop();
                }
                let mut reply = Reply::with_crc(data)?;
                if self.corrupt_read_crc {
                    if let Some(last) = reply.data.last_mut() {
                        *last ^= 0xFF;
                    }
                }
                Some(reply)
            }
            (0xA0, 2) => {
                let block = payload[1];
                if !self.authenticated(block) {
                    return Reply::ack(nak);
                }
                let ack = self.next_ack();
                if ack == MF_ACK {
                    self.pending = Some(Pending::Write(block));
                }
                Reply::ack(ack)
            }
            (cmd @ (0xC0 | 0xC1 | 0xC2), 2) => {
                let block = payload[1];
                if !self.authenticated(block) || decode_value_block(&self.blocks[block as usize]).is_err() {
                    return Reply::ack(nak);
                }
                let cmd = match cmd {
                    0xC0 => Command::MfDecrement,
                    0xC1 => Command::MfIncrement,
                    _ => Command::MfRestore,
                };
                let ack = self.next_ack();
                if ack == MF_ACK {
                    self.pending = Some(Pending::Value(cmd, block));
                }
                Reply::ack(ack)
            }
            (0xB0, 2) => {
                let block = payload[1];
                if !self.authenticated(block) {
                    return Reply::ack(nak);
                }
                let ack = self.next_ack();
                if ack == MF_ACK {
                    self.blocks[block as usize] = encode_value_block(self.value, self.value_addr);
                }
                Reply::ack(ack)
            }
            (0xA2, 6) => {
                let page = payload[1] as usize;
                if page >= self.pages.len() {
                    return Reply::ack(nak);
                }
                self.pages[page].copy_from_slice(&payload[2..]);
                Reply::ack(self.next_ack())
            }
            _ => None,
        }
    }
}

/// FIFO content after the digital self test, MFRC522 datasheet 16.1.1.
const DATASHEET_SELF_TEST: [u8; 64] = [
    0x00, 0xEB, 0x66, 0xBA, 0x57, 0xBF, 0x23, 0x95,
    0xD0, 0xE3, 0x0D, 0x3D, 0x27, 0x89, 0x5C, 0xDE,
    0x9D, 0x3B, 0xA7, 0x00, 0x21, 0x5B, 0x89, 0x82,
    0x51, 0x3A, 0xEB, 0x02, 0x0C, 0xA5, 0x00, 0x49,
    0x7C, 0x84, 0x4D, 0xB3, 0xCC, 0xD2, 0x1B, 0x81,
    0x5D, 0x48, 0x76, 0xD5, 0x71, 0x61, 0x21, 0xA9,
    0x86, 0x96, 0x83, 0x38, 0xCF, 0x9D, 0x5B, 0x6D,
    0xDC, 0x15, 0xBA, 0x3E, 0x7D, 0x95, 0x3B, 0x2F,
];

/// Register file, FIFO and command engine of an MFRC522.
pub struct SimChip {
    regs: [u8; 64],
    fifo: VecDeque<u8>,
    card: Option<SimCard>,
    pub fail_bus: bool,
    pub crc_stuck: bool,
    /// The chip never raises an interrupt for Transceive or MFAuthent.
    pub stall: bool,
    pub self_test_glitch: bool,
    /// ErrorReg bits raised together with the card's next answer.
    pub rx_error: u8,
    /// A refused MFAuthent ends with IdleIRq instead of TimerIRq.
    pub auth_idles_on_reject: bool,
}

impl SimChip {
    pub fn new() -> Self {
        let mut chip = SimChip {
            regs: [0; 64],
            fifo: VecDeque::new(),
            card: None,
            fail_bus: false,
            crc_stuck: false,
            stall: false,
            self_test_glitch: false,
            rx_error: 0,
            auth_idles_on_reject: false,
        };
        chip.soft_reset();
        chip
    }

    pub fn with_card(card: SimCard) -> Self {
        let mut chip = SimChip::new();
        chip.card = Some(card);
        chip
    }

    /// Replaces the card in the field.
    pub fn insert(&mut self, card: SimCard) {
        self.card = Some(card);
    }

    pub fn card(&self) -> &SimCard {
        self.card.as_ref().expect("no card in the field")
    }

    pub fn card_mut(&mut self) -> &mut SimCard {
        self.card.as_mut().expect("no card in the field")
    }

    pub fn register(&self, reg: Register) -> u8 {
        match reg {
            Register::FIFOLevelReg => self.fifo.len() as u8,
            _ => self.regs[reg as usize],
        }
    }

    fn reg(&self, reg: Register) -> u8 {
        self.regs[reg as usize]
    }

    fn set(&mut self, reg: Register, value: u8) {
        self.regs[reg as usize] = value;
    }

    fn soft_reset(&mut self) {
        self.regs = [0; 64];
        self.fifo.clear();
        self.set(Register::CommandReg, 0x20);
        self.set(Register::ComlEnReg, 0x80);
        self.set(Register::ControlReg, 0x10);
        self.set(Register::CollReg, 0xA0);
        self.set(Register::ModeReg, 0x3F);
        self.set(Register::TxControlReg, 0x80);
        self.set(Register::ModWidthReg, 0x26);
        self.set(Register::RFCfgReg, 0x48);
        self.set(Register::VersionReg, 0x92);
    }

    fn read(&mut self, addr: u8) -> u8 {
        if addr == Register::FIFODataReg as u8 {
            return self.fifo.pop_front().unwrap_or(0);
        }
        if addr == Register::FIFOLevelReg as u8 {
            return self.fifo.len() as u8;
        }
        self.regs[addr as usize]
    }

    fn write(&mut self, addr: u8, value: u8) {
        let is = |reg: Register| reg as u8 == addr;
        if is(Register::FIFODataReg) {
            if self.fifo.len() < FIFO_SIZE {
                self.fifo.push_back(value);
            } else {
                let err = self.reg(Register::ErrorReg);
                self.set(Register::ErrorReg, err | BUFFER_OVFL);
            }
        } else if is(Register::FIFOLevelReg) {
            if value & FLUSH_BUFFER != 0 {
                self.fifo.clear();
                let err = self.reg(Register::ErrorReg);
                self.set(Register::ErrorReg, err & !BUFFER_OVFL);
            }
        } else if is(Register::ComIrqReg) || is(Register::DivIrqReg) {
            // Set1 in bit 7 selects between setting and clearing the marked bits.
            let reg = &mut self.regs[addr as usize];
            if value & IRQ_SET1 != 0 {
                *reg |= value & !IRQ_SET1;
            } else {
                *reg &= !value;
            }
        } else if is(Register::CommandReg) {
            let current = self.reg(Register::CommandReg);
            self.set(Register::CommandReg, (current & 0xF0) | (value & 0x0F));
            self.execute(value & 0x0F);
        } else if is(Register::BitFramingReg) {
            self.set(Register::BitFramingReg, value & !START_SEND);
            let transceiving = self.reg(Register::CommandReg) & 0x0F == PcdCommand::Transceive as u8;
            if value & START_SEND != 0 && transceiving {
                self.transceive();
            }
        } else if is(Register::VersionReg) {
            // Read only.
        } else {
            self.regs[addr as usize] = value;
        }
    }

    fn execute(&mut self, cmd: u8) {
        if cmd == PcdCommand::SoftReset as u8 {
            self.soft_reset();
        } else if cmd == PcdCommand::Mem as u8 {
            // Moves 25 bytes into the internal buffer.
            let n = self.fifo.len().min(25);
            self.fifo.drain(..n);
            self.idle();
        } else if cmd == PcdCommand::CalcCRC as u8 {
            self.calc_crc();
        } else if cmd == PcdCommand::MFAuthent as u8 {
            self.mf_authent();
        }
    }

    fn idle(&mut self) {
        let current = self.reg(Register::CommandReg);
        self.set(Register::CommandReg, current & 0xF0);
    }

    fn raise(&mut self, reg: Register, bits: u8) {
        let current = self.reg(reg);
        self.set(reg, current | bits);
    }

    fn calc_crc(&mut self) {
        if self.reg(Register::AutoTestReg) == 0x09 {
            self.fifo.clear();
            self.fifo.extend(DATASHEET_SELF_TEST.iter().copied());
            if self.self_test_glitch {
                self.fifo[10] ^= 0x40;
            }
            return;
        }
        if self.crc_stuck {
            return;
        }
        let data: Vec<u8> = self.fifo.drain(..).collect();
        let [low, high] = crc_a(&data);
        self.set(Register::CRCResultRegLow, low);
        self.set(Register::CRCResultRegHigh, high);
        self.raise(Register::DivIrqReg, CRC_IRQ);
    }

    fn mf_authent(&mut self) {
        self.set(Register::ErrorReg, 0);
        let status2 = self.reg(Register::Status2Reg);
        self.set(Register::Status2Reg, status2 & !MF_CRYPTO1_ON);
        if self.stall {
            return;
        }
        let data: Vec<u8> = self.fifo.drain(..).collect();
        let accepted = self.card.as_mut().map_or(false, |card| card.authenticate(&data));
        if accepted {
            self.raise(Register::Status2Reg, MF_CRYPTO1_ON);
            self.raise(Register::ComIrqReg, IDLE_IRQ);
            self.idle();
        } else if self.auth_idles_on_reject {
            self.raise(Register::ComIrqReg, IDLE_IRQ);
            self.idle();
        } else {
            self.raise(Register::ComIrqReg, TIMER_IRQ);
        }
    }

    fn transceive(&mut self) {
        if self.stall {
            return;
        }
        let framing = self.reg(Register::BitFramingReg);
        let tx_last_bits = framing & 0x07;
        let rx_align = (framing >> 4) & 0x07;
        let frame: Vec<u8> = self.fifo.drain(..).collect();

        self.set(Register::ErrorReg, 0);
        let coll_reg = self.reg(Register::CollReg);
        self.set(Register::CollReg, (coll_reg & VALUES_AFTER_COLL) | COLL_POS_NOT_VALID);

        let reply = self.card.as_mut().and_then(|card| card.handle(&frame, tx_last_bits));
        let reply = match reply {
            Some(reply) => reply,
            None => {
                self.raise(Register::ComIrqReg, TIMER_IRQ);
                return;
            }
        };

        for (i, &b) in reply.data.iter().enumerate() {
            let b = if i == 0 { b & (0xFF << rx_align) } else { b };
            if self.fifo.len() < FIFO_SIZE {
                self.fifo.push_back(b);
            } else {
                self.raise(Register::ErrorReg, BUFFER_OVFL);
            }
        }
        let control = self.reg(Register::ControlReg);
        self.set(Register::ControlReg, (control & !RX_LAST_BITS_MASK) | reply.last_bits);
        if let Some(coll) = reply.coll {
            self.raise(Register::ErrorReg, COLL_ERR);
            self.set(Register::CollReg, (coll_reg & VALUES_AFTER_COLL) | coll);
        }
        let rx_error = self.rx_error;
        self.raise(Register::ErrorReg, rx_error);
        self.raise(Register::ComIrqReg, RX_IRQ);
    }
}

impl Com for SimChip {
    type Error = BusFault;

    fn exchange(&mut self, buf: &mut [u8]) -> Result<(), BusFault> {
        if self.fail_bus {
            return Err(BusFault);
        }
        if buf.is_empty() {
            return Ok(());
        }
        let first = buf[0];
        if first & 0x80 != 0 {
            let addrs: Vec<u8> = buf.iter().map(|b| (b >> 1) & 0x3F).collect();
            buf[0] = 0;
            for i in 0..buf.len() - 1 {
                buf[i + 1] = self.read(addrs[i]);
            }
        } else {
            let addr = (first >> 1) & 0x3F;
            for i in 1..buf.len() {
                self.write(addr, buf[i]);
            }
            buf[0] = 0;
        }
        Ok(())
    }
}

#[test]
fn reference_crc_vectors() {
    assert_eq!(crc_a(&[0x50, 0x00]), [0x57, 0xCD]);
    assert_eq!(crc_a(&[0x30, 0x00]), [0x02, 0xA8]);
}

#[test]
fn self_test_reference_matches_datasheet() {
    assert_eq!(SELF_TEST_REFERENCE, DATASHEET_SELF_TEST);
}
