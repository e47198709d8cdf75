/// Byte transport to the reader chip.
///
/// One call is one chip-select scoped transaction: `buf` is clocked out and
/// overwritten in place with what the chip clocked back.
pub trait Com {
    type Error;

    fn exchange(&mut self, buf: &mut [u8]) -> Result<(), Self::Error>;
}

impl<T: Com + ?Sized> Com for &mut T {
    type Error = T::Error;

    fn exchange(&mut self, buf: &mut [u8]) -> Result<(), Self::Error> {
        (**self).exchange(buf)
    }
}
