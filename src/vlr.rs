//! LAS Variable Length Records and the Extra-Bytes descriptor.

use byteorder::{LittleEndian, ReadBytesExt};
use std::fmt;
use std::io::{Cursor, Read};

/// LAS Variable Length Record, with the null-padded strings of its
/// 54 byte header already decoded.
pub struct Vlr {
    pub user_id: String,
    pub record_id: u16,
    pub description: String,
    pub data: Vec<u8>,
}

impl Vlr {
    pub fn read_from<R: Read>(src: &mut R) -> std::io::Result<Self> {
        let _reserved = src.read_u16::<LittleEndian>()?;
        let user_id = read_fixed_string(src, 16)?;
        let record_id = src.read_u16::<LittleEndian>()?;
        let record_length = src.read_u16::<LittleEndian>()?;
        let description = read_fixed_string(src, 32)?;

        let mut data = vec![0u8; record_length as usize];
        src.read_exact(&mut data)?;

        Ok(Self {
            user_id,
            record_id,
            description,
            data,
        })
    }

    /// The payload as a null-terminated string, e.g. the WKT of a
    /// `LASF_Projection`/2112 record.
    pub fn data_as_string(&self) -> String {
        let terminated = match self.data.iter().position(|b| *b == 0) {
            Some(end) => &self.data[..end],
            None => &self.data,
        };
        String::from_utf8_lossy(terminated).to_string()
    }
}

impl fmt::Debug for Vlr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Vlr {}/{} ({} payload bytes)",
            self.user_id,
            self.record_id,
            self.data.len()
        )
    }
}

/// Size of one Extra-Bytes descriptor in the `LASF_Spec`/4 VLR payload.
pub const EXTRA_DIMENSION_RECORD_SIZE: usize = 192;

/// One custom per-point attribute, described by a 192 byte record of the
/// `LASF_Spec`/4 VLR.
///
/// The data type code packs the base type and the component count:
/// codes 1..=10 are one component of u8, i8, u16, i16, u32, i32, u64,
/// i64, f32, f64; 11..=20 two components; 21..=30 three components.
#[derive(Clone, Debug)]
pub struct ExtraDimension {
    pub data_type: u8,
    pub options: u8,
    pub name: String,
    pub no_data: [f64; 3],
    pub min: [f64; 3],
    pub max: [f64; 3],
    pub scale: [f64; 3],
    pub offset: [f64; 3],
    pub description: String,
}

impl ExtraDimension {
    pub(crate) fn read_from<R: Read>(src: &mut R) -> std::io::Result<Self> {
        let mut reserved = [0u8; 2];
        src.read_exact(&mut reserved)?;
        let data_type = src.read_u8()?;
        let options = src.read_u8()?;
        let name = read_fixed_string(src, 32)?;
        let mut unused = [0u8; 4];
        src.read_exact(&mut unused)?;
        let no_data = read_f64_triple(src)?;
        let min = read_f64_triple(src)?;
        let max = read_f64_triple(src)?;
        let scale = read_f64_triple(src)?;
        let offset = read_f64_triple(src)?;
        let description = read_fixed_string(src, 32)?;

        Ok(ExtraDimension {
            data_type,
            options,
            name,
            no_data,
            min,
            max,
            scale,
            offset,
            description,
        })
    }

    /// Parses all descriptors of a `LASF_Spec`/4 payload, skipping
    /// undocumented (type 0) and out-of-range type codes.
    pub(crate) fn read_set(payload: &[u8]) -> std::io::Result<Vec<ExtraDimension>> {
        let mut dimensions = Vec::with_capacity(payload.len() / EXTRA_DIMENSION_RECORD_SIZE);
        let mut cursor = Cursor::new(payload);
        for _ in 0..payload.len() / EXTRA_DIMENSION_RECORD_SIZE {
            let dimension = ExtraDimension::read_from(&mut cursor)?;
            if (1..=30).contains(&dimension.data_type) {
                dimensions.push(dimension);
            } else {
                log::debug!(
                    "skipping extra-bytes dimension {:?} with data type {}",
                    dimension.name,
                    dimension.data_type
                );
            }
        }
        Ok(dimensions)
    }

    /// Base type code 1..=10 (u8, i8, u16, i16, u32, i32, u64, i64, f32, f64).
    pub fn base_type(&self) -> u8 {
        (self.data_type - 1) % 10 + 1
    }

    pub fn component_count(&self) -> usize {
        (self.data_type as usize).div_ceil(10)
    }

    /// Size in bytes of one component of the base type.
    pub fn component_size(&self) -> usize {
        match self.base_type() {
            1 | 2 => 1,
            3 | 4 => 2,
            5 | 6 | 9 => 4,
            _ => 8,
        }
    }

    /// Total size this dimension occupies in a point's extra bytes.
    pub fn byte_size(&self) -> usize {
        self.component_count() * self.component_size()
    }
}

fn read_fixed_string<R: Read>(src: &mut R, len: usize) -> std::io::Result<String> {
    let mut buffer = vec![0u8; len];
    src.read_exact(&mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer)
        .trim_end_matches('\0')
        .to_string())
}

fn read_f64_triple<R: Read>(src: &mut R) -> std::io::Result<[f64; 3]> {
    Ok([
        src.read_f64::<LittleEndian>()?,
        src.read_f64::<LittleEndian>()?,
        src.read_f64::<LittleEndian>()?,
    ])
}
