/// Little-endian field decoder for Aranet4 characteristic payloads
///
/// Aranet4 payloads are sequences of fixed-width fields:
/// - CO2: u16, high bit set means "no data"
/// - Temperature: u16 in 1/20 °C, `0x4000` means "no data", values above
///   `0x8000` are reported as 0 °C
/// - Pressure: u16 in 1/10 hPa, high bit set means "no data"
/// - Humidity, battery, quality: u8
/// - Interval and "seconds ago": u16 seconds
///
/// The decoder is poisoned by its first failure: later reads return the same
/// error without consuming input, so a run of reads can be checked once with
/// [`FieldDecoder::finish`].
use time::{Duration, OffsetDateTime};

use crate::error::DecodeError;
use crate::models::{Param, Sample};

const TEMPERATURE_NO_DATA: u16 = 0x4000;
const TEMPERATURE_UNDERFLOW: u16 = 0x8000;
const HIGH_BIT: u16 = 0x8000;

pub struct FieldDecoder<'a> {
    buf: &'a [u8],
    pos: usize,
    err: Option<DecodeError>,
}

impl<'a> FieldDecoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        FieldDecoder {
            buf,
            pos: 0,
            err: None,
        }
    }

    /// Terminal state of the decoder: the first error hit, if any.
    pub fn finish(&self) -> Result<(), DecodeError> {
        match self.err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn load<const N: usize>(&mut self) -> Result<[u8; N], DecodeError> {
        if let Some(err) = self.err {
            return Err(err);
        }
        let available = self.buf.len() - self.pos;
        if available < N {
            let err = DecodeError::ShortBuffer {
                needed: N,
                available,
            };
            self.err = Some(err);
            return Err(err);
        }
        let mut raw = [0u8; N];
        raw.copy_from_slice(&self.buf[self.pos..self.pos + N]);
        self.pos += N;
        Ok(raw)
    }

    fn fail(&mut self, err: DecodeError) -> DecodeError {
        self.err = Some(err);
        err
    }

    pub fn read_u8(&mut self) -> Result<u8, DecodeError> {
        self.load::<1>().map(|[b]| b)
    }

    pub fn read_u16(&mut self) -> Result<u16, DecodeError> {
        self.load::<2>().map(u16::from_le_bytes)
    }

    pub fn read_co2(&mut self) -> Result<u16, DecodeError> {
        let raw = self.read_u16()?;
        if raw & HIGH_BIT != 0 {
            return Err(self.fail(DecodeError::NoData));
        }
        Ok(raw)
    }

    pub fn read_temperature(&mut self) -> Result<f64, DecodeError> {
        match self.read_u16()? {
            TEMPERATURE_NO_DATA => Err(self.fail(DecodeError::NoData)),
            raw if raw > TEMPERATURE_UNDERFLOW => Ok(0.0),
            raw => Ok(f64::from(raw) / 20.0),
        }
    }

    pub fn read_pressure(&mut self) -> Result<f64, DecodeError> {
        let raw = self.read_u16()?;
        if raw & HIGH_BIT != 0 {
            return Err(self.fail(DecodeError::NoData));
        }
        Ok(f64::from(raw) / 10.0)
    }

    pub fn read_humidity(&mut self) -> Result<f64, DecodeError> {
        self.read_u8().map(f64::from)
    }

    pub fn read_battery(&mut self) -> Result<u8, DecodeError> {
        self.read_u8()
    }

    /// Raw quality class code as sent by the device.
    pub fn read_quality(&mut self) -> Result<u8, DecodeError> {
        self.read_u8()
    }

    pub fn read_interval(&mut self) -> Result<Duration, DecodeError> {
        self.read_u16().map(|secs| Duration::seconds(i64::from(secs)))
    }

    /// Reads a "seconds ago" field and resolves it against `now`.
    pub fn read_time(&mut self, now: OffsetDateTime) -> Result<OffsetDateTime, DecodeError> {
        self.read_interval().map(|ago| now - ago)
    }

    /// Decodes one history value of `param` into the matching field of `sample`.
    pub fn read_field(&mut self, param: Param, sample: &mut Sample) -> Result<(), DecodeError> {
        match param {
            Param::Temperature => sample.temperature = self.read_temperature()?,
            Param::Humidity => sample.humidity = self.read_humidity()?,
            Param::Pressure => sample.pressure = self.read_pressure()?,
            Param::Co2 => sample.co2 = self.read_co2()?,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn co2_sentinel() {
        assert_eq!(FieldDecoder::new(&[0x00, 0x80]).read_co2(), Err(DecodeError::NoData));
        assert_eq!(FieldDecoder::new(&[0x2c, 0x03]).read_co2(), Ok(812));
    }

    #[test]
    fn temperature_sentinels() {
        assert_eq!(
            FieldDecoder::new(&[0x00, 0x40]).read_temperature(),
            Err(DecodeError::NoData)
        );
        assert_eq!(FieldDecoder::new(&[0x00, 0x90]).read_temperature(), Ok(0.0));
        // 0x8000 itself is not above the underflow threshold
        assert_eq!(
            FieldDecoder::new(&[0x00, 0x80]).read_temperature(),
            Ok(f64::from(0x8000u16) / 20.0)
        );
        assert_eq!(FieldDecoder::new(&[0xc1, 0x01]).read_temperature(), Ok(22.45));
    }

    #[test]
    fn pressure_sentinel() {
        assert_eq!(
            FieldDecoder::new(&[0x01, 0x80]).read_pressure(),
            Err(DecodeError::NoData)
        );
        assert_eq!(FieldDecoder::new(&[0x8e, 0x27]).read_pressure(), Ok(1012.6));
    }

    #[test]
    fn single_byte_fields() {
        let mut dec = FieldDecoder::new(&[45, 87, 1]);
        assert_eq!(dec.read_humidity(), Ok(45.0));
        assert_eq!(dec.read_battery(), Ok(87));
        assert_eq!(dec.read_quality(), Ok(1));
        assert!(dec.finish().is_ok());
    }

    #[test]
    fn interval_and_time() {
        let now = datetime!(2022-01-01 12:00:00 UTC);
        let mut dec = FieldDecoder::new(&[0x2c, 0x01, 0x3c, 0x00]);
        assert_eq!(dec.read_interval(), Ok(Duration::minutes(5)));
        assert_eq!(dec.read_time(now), Ok(datetime!(2022-01-01 11:59:00 UTC)));
    }

    #[test]
    fn short_buffer() {
        let mut dec = FieldDecoder::new(&[0x01]);
        assert_eq!(
            dec.read_co2(),
            Err(DecodeError::ShortBuffer {
                needed: 2,
                available: 1
            })
        );
    }

    #[test]
    fn first_error_poisons_later_reads() {
        // CO2 no-data, then a perfectly valid humidity byte
        let mut dec = FieldDecoder::new(&[0x00, 0x80, 42]);
        assert_eq!(dec.read_co2(), Err(DecodeError::NoData));
        assert_eq!(dec.read_humidity(), Err(DecodeError::NoData));
        assert_eq!(dec.read_u8(), Err(DecodeError::NoData));
        assert_eq!(dec.finish(), Err(DecodeError::NoData));
    }

    #[test]
    fn read_field_targets_one_field() {
        let mut sample = Sample::default();
        let mut dec = FieldDecoder::new(&[0x90, 0x01, 0x8e, 0x27]);
        dec.read_field(Param::Co2, &mut sample).unwrap();
        dec.read_field(Param::Pressure, &mut sample).unwrap();
        assert_eq!(sample.co2, 400);
        assert_eq!(sample.pressure, 1012.6);
        assert_eq!(sample.temperature, 0.0);
    }
}
