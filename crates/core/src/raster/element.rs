//! Raster element trait for generic cell values

use num_traits::{NumCast, Zero};
use std::fmt::Debug;

/// How a cell type is stored on disk: kind of sample and its width in bits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleFormat {
    Unsigned(u16),
    Signed(u16),
    Float(u16),
}

/// Trait for types that can be stored in a raster cell.
///
/// Flow-direction rasters use `u8`, watershed labels `i64` and flow
/// lengths `f64`; the remaining numeric types are accepted so that inputs
/// read from disk can be converted without loss of generality.
pub trait RasterElement:
    Copy + Clone + Debug + PartialOrd + PartialEq + NumCast + Zero + Send + Sync + 'static
{
    /// Default no-data value for this type
    fn default_nodata() -> Self;

    /// Check if this value represents no-data
    fn is_nodata(&self, nodata: Option<Self>) -> bool;

    /// Whether this type is a floating point type
    fn is_float() -> bool;

    /// On-disk sample format that holds every value of this type exactly
    fn sample_format() -> SampleFormat;

    /// Convert self to f64
    fn to_f64(self) -> Option<f64> {
        NumCast::from(self)
    }

    /// Convert from f64, falling back to the default no-data value when the
    /// value is not representable (NaN into an integer type, overflow, ...)
    fn from_f64(value: f64) -> Self {
        NumCast::from(value).unwrap_or_else(Self::default_nodata)
    }
}

macro_rules! impl_raster_element_int {
    ($t:ty, $nodata:expr, $format:expr) => {
        impl RasterElement for $t {
            fn default_nodata() -> Self {
                $nodata
            }

            fn is_nodata(&self, nodata: Option<Self>) -> bool {
                nodata.is_some_and(|nd| *self == nd)
            }

            fn is_float() -> bool {
                false
            }

            fn sample_format() -> SampleFormat {
                $format
            }
        }
    };
}

macro_rules! impl_raster_element_float {
    ($t:ty, $bits:expr) => {
        impl RasterElement for $t {
            fn default_nodata() -> Self {
                <$t>::NAN
            }

            fn is_nodata(&self, nodata: Option<Self>) -> bool {
                if self.is_nan() {
                    return true;
                }
                match nodata {
                    Some(nd) if nd.is_nan() => false,
                    Some(nd) => (self - nd).abs() < <$t>::EPSILON * 100.0,
                    None => false,
                }
            }

            fn is_float() -> bool {
                true
            }

            fn sample_format() -> SampleFormat {
                SampleFormat::Float($bits)
            }
        }
    };
}

impl_raster_element_int!(i16, i16::MIN, SampleFormat::Signed(16));
impl_raster_element_int!(i32, i32::MIN, SampleFormat::Signed(32));
impl_raster_element_int!(i64, -1, SampleFormat::Signed(64));
// 255 is not a valid D8 code in either encoding
impl_raster_element_int!(u8, u8::MAX, SampleFormat::Unsigned(8));
impl_raster_element_int!(u16, u16::MAX, SampleFormat::Unsigned(16));
impl_raster_element_int!(u32, u32::MAX, SampleFormat::Unsigned(32));
impl_raster_element_float!(f32, 32);
impl_raster_element_float!(f64, 64);
