use super::com::Com;
use embedded_hal::blocking::delay::DelayUs;
use embedded_hal::blocking::spi;
use embedded_hal::digital::v2::OutputPin;

/// Settling time around each chip-select edge.
const DEFAULT_SETTLE_US: u8 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComSpiError<S, P> {
    Spi(S),
    Pin(P),
}

/// SPI transport with a software driven NSS line.
pub struct ComSpi<SPI, NSS, D> {
    spi: SPI,
    nss: NSS,
    delay: D,
    settle_us: u8,
}

impl<SPI, NSS, D> ComSpi<SPI, NSS, D> {
    pub fn new(spi: SPI, nss: NSS, delay: D) -> Self {
        Self {
            spi,
            nss,
            delay,
            settle_us: DEFAULT_SETTLE_US,
        }
    }

    pub fn with_settle_us(mut self, settle_us: u8) -> Self {
        self.settle_us = settle_us;
        self
    }

    pub fn release(self) -> (SPI, NSS, D) {
        (self.spi, self.nss, self.delay)
    }
}

impl<SPI, NSS, D, SE, PE> Com for ComSpi<SPI, NSS, D>
where
    SPI: spi::Transfer<u8, Error = SE>,
    NSS: OutputPin<Error = PE>,
    D: DelayUs<u8>,
{
    type Error = ComSpiError<SE, PE>;

    fn exchange(&mut self, buf: &mut [u8]) -> Result<(), Self::Error> {
        self.delay.delay_us(self.settle_us);
        self.nss.set_low().map_err(ComSpiError::Pin)?;
        self.delay.delay_us(self.settle_us);

        let result = self.spi.transfer(buf).map(|_| ()).map_err(ComSpiError::Spi);

        // NSS goes back high even if the transfer failed.
        self.delay.delay_us(self.settle_us);
        self.nss.set_high().map_err(ComSpiError::Pin)?;
        self.delay.delay_us(self.settle_us);
        result
    }
}
