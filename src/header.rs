//! LAS 1.4 public header block.

use crate::error::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Read;

/// Size of the LAS 1.4 public header block in bytes.
/// The first VLR starts right behind it.
pub const HEADER_SIZE: u64 = 375;

const COMPRESSION_MASK: u8 = 0x80;

/// LAS 1.4 header, parsed from its fixed little-endian layout.
///
/// Only LAS 1.4 sources are accepted, COPC is defined on top of it.
#[derive(Clone, Debug, Default)]
pub struct LasHeader {
    pub file_source_id: u16,
    pub global_encoding: u16,
    pub guid: [u8; 16],
    pub version_major: u8,
    pub version_minor: u8,
    pub system_identifier: String,
    pub generating_software: String,
    pub file_creation_day: u16,
    pub file_creation_year: u16,
    pub header_size: u16,
    pub offset_to_point_data: u32,
    pub number_of_variable_length_records: u32,
    /// Raw format id as stored in the file, bit 7 flags LAZ compression
    pub point_data_record_format: u8,
    pub point_data_record_length: u16,
    pub legacy_number_of_point_records: u32,
    pub legacy_number_of_points_by_return: [u32; 5],
    pub x_scale_factor: f64,
    pub y_scale_factor: f64,
    pub z_scale_factor: f64,
    pub x_offset: f64,
    pub y_offset: f64,
    pub z_offset: f64,
    pub max_x: f64,
    pub min_x: f64,
    pub max_y: f64,
    pub min_y: f64,
    pub max_z: f64,
    pub min_z: f64,
    pub start_of_waveform_data_packet_record: u64,
    pub start_of_first_evlr: u64,
    pub number_of_evlrs: u32,
    pub number_of_point_records: u64,
    pub number_of_points_by_return: [u64; 15],
}

impl LasHeader {
    /// Reads the 375 byte header block from the start of a `Read`.
    pub fn read_from<R: Read>(src: &mut R) -> Result<Self> {
        let mut signature = [0u8; 4];
        src.read_exact(&mut signature)?;
        if &signature != b"LASF" {
            return Err(Error::InvalidSignature(signature));
        }

        let mut header = LasHeader {
            file_source_id: src.read_u16::<LittleEndian>()?,
            global_encoding: src.read_u16::<LittleEndian>()?,
            ..Default::default()
        };
        src.read_exact(&mut header.guid)?;

        header.version_major = src.read_u8()?;
        header.version_minor = src.read_u8()?;
        if (header.version_major, header.version_minor) != (1, 4) {
            return Err(Error::UnsupportedVersion {
                major: header.version_major,
                minor: header.version_minor,
            });
        }

        header.system_identifier = read_padded_string(src, 32)?;
        header.generating_software = read_padded_string(src, 32)?;
        header.file_creation_day = src.read_u16::<LittleEndian>()?;
        header.file_creation_year = src.read_u16::<LittleEndian>()?;
        header.header_size = src.read_u16::<LittleEndian>()?;
        header.offset_to_point_data = src.read_u32::<LittleEndian>()?;
        header.number_of_variable_length_records = src.read_u32::<LittleEndian>()?;
        header.point_data_record_format = src.read_u8()?;
        header.point_data_record_length = src.read_u16::<LittleEndian>()?;
        header.legacy_number_of_point_records = src.read_u32::<LittleEndian>()?;
        for n in header.legacy_number_of_points_by_return.iter_mut() {
            *n = src.read_u32::<LittleEndian>()?;
        }
        header.x_scale_factor = src.read_f64::<LittleEndian>()?;
        header.y_scale_factor = src.read_f64::<LittleEndian>()?;
        header.z_scale_factor = src.read_f64::<LittleEndian>()?;
        header.x_offset = src.read_f64::<LittleEndian>()?;
        header.y_offset = src.read_f64::<LittleEndian>()?;
        header.z_offset = src.read_f64::<LittleEndian>()?;
        header.max_x = src.read_f64::<LittleEndian>()?;
        header.min_x = src.read_f64::<LittleEndian>()?;
        header.max_y = src.read_f64::<LittleEndian>()?;
        header.min_y = src.read_f64::<LittleEndian>()?;
        header.max_z = src.read_f64::<LittleEndian>()?;
        header.min_z = src.read_f64::<LittleEndian>()?;
        header.start_of_waveform_data_packet_record = src.read_u64::<LittleEndian>()?;
        header.start_of_first_evlr = src.read_u64::<LittleEndian>()?;
        header.number_of_evlrs = src.read_u32::<LittleEndian>()?;
        header.number_of_point_records = src.read_u64::<LittleEndian>()?;
        for n in header.number_of_points_by_return.iter_mut() {
            *n = src.read_u64::<LittleEndian>()?;
        }

        Ok(header)
    }

    /// Point data record format with the LAZ compression bit stripped.
    pub fn point_format(&self) -> u8 {
        self.point_data_record_format & 0x3f
    }

    /// Whether bit 7 of the format id flags compressed point data.
    pub fn is_compressed(&self) -> bool {
        self.point_data_record_format & COMPRESSION_MASK == COMPRESSION_MASK
    }

    pub fn number_of_points(&self) -> u64 {
        if self.number_of_point_records > 0 {
            self.number_of_point_records
        } else {
            self.legacy_number_of_point_records as u64
        }
    }

    /// Side length of the octree cube: the largest extent of the header bounds.
    pub fn cube_size(&self) -> f64 {
        (self.max_x - self.min_x)
            .max(self.max_y - self.min_y)
            .max(self.max_z - self.min_z)
    }
}

fn read_padded_string<R: Read>(src: &mut R, len: usize) -> Result<String> {
    let mut buffer = vec![0u8; len];
    src.read_exact(&mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer)
        .trim_end_matches('\0')
        .to_string())
}
