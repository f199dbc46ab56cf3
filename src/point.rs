//! Decoded point records and the per-format raw record layouts.

use crate::error::{Error, Result};
use crate::header::LasHeader;
use crate::vlr::ExtraDimension;
use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;

/// RGB normalized to `[0, 1]`.
#[derive(Clone, Copy, Debug, PartialEq, Default)]
pub struct PointColor {
    pub red: f32,
    pub green: f32,
    pub blue: f32,
}

/// One decoded point record.
///
/// `x`/`y`/`z` carry the header scale and offset already applied. Fields
/// that only exist in some point data record formats are `Option`s; a
/// legal zero is distinct from "not stored in this format".
#[derive(Clone, Debug, PartialEq, Default)]
pub struct CopcPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub intensity: u16,
    pub return_number: u8,
    pub number_of_returns: u8,
    pub scan_direction_flag: bool,
    pub edge_of_flight_line: bool,
    pub classification: u8,
    /// Scan angle in degrees
    pub scan_angle: f64,
    pub user_data: u8,
    pub point_source_id: u16,
    pub gps_time: Option<f64>,
    pub color: Option<PointColor>,
    pub nir: Option<u16>,
    /// Raw extra bytes beyond the standard record, undecoded
    pub extra_bytes: Option<Vec<u8>>,
}

/// Standard record size of a point data record format, without extra
/// bytes. `None` for format ids LAS does not define.
pub(crate) fn standard_record_size(format: u8) -> Option<usize> {
    match format {
        0 => Some(20),
        1 => Some(28),
        2 => Some(26),
        3 => Some(34),
        6 => Some(30),
        7 => Some(36),
        8 => Some(38),
        _ => None,
    }
}

/// Offsets of the three color channels in formats 7 and 8.
const RGB_OFFSET: usize = 30;

/// Reads the raw 16 bit color channels of a format 7/8 record, for the
/// bit depth sampling pass.
pub(crate) fn peek_rgb(raw: &[u8]) -> Result<(u16, u16, u16)> {
    let mut cursor = Cursor::new(&raw[RGB_OFFSET..]);
    Ok((
        cursor.read_u16::<LittleEndian>()?,
        cursor.read_u16::<LittleEndian>()?,
        cursor.read_u16::<LittleEndian>()?,
    ))
}

/// Decodes one raw record of the given format.
///
/// `color_divisor` is the normalization constant chosen by the sampling
/// pass (255, 4095 or 65535); it is ignored for formats without color.
pub(crate) fn decode_record(
    raw: &[u8],
    format: u8,
    standard_size: usize,
    header: &LasHeader,
    color_divisor: f32,
) -> Result<CopcPoint> {
    let mut cursor = Cursor::new(raw);
    let x = cursor.read_i32::<LittleEndian>()?;
    let y = cursor.read_i32::<LittleEndian>()?;
    let z = cursor.read_i32::<LittleEndian>()?;
    let intensity = cursor.read_u16::<LittleEndian>()?;

    let mut point = CopcPoint {
        x: x as f64 * header.x_scale_factor + header.x_offset,
        y: y as f64 * header.y_scale_factor + header.y_offset,
        z: z as f64 * header.z_scale_factor + header.z_offset,
        intensity,
        ..Default::default()
    };

    match format {
        0 => {
            let flags = cursor.read_u8()?;
            point.return_number = flags & 0x7;
            point.number_of_returns = (flags >> 3) & 0x7;
            point.scan_direction_flag = flags & 0x40 == 0x40;
            point.edge_of_flight_line = flags & 0x80 == 0x80;
            point.classification = cursor.read_u8()?;
            point.scan_angle = cursor.read_i8()? as f64;
            point.user_data = cursor.read_u8()?;
            point.point_source_id = cursor.read_u16::<LittleEndian>()?;
        }
        6 | 7 | 8 => {
            let returns = cursor.read_u8()?;
            point.return_number = returns & 0xf;
            point.number_of_returns = (returns >> 4) & 0xf;
            let flags = cursor.read_u8()?;
            point.scan_direction_flag = flags & 0x40 == 0x40;
            point.edge_of_flight_line = flags & 0x80 == 0x80;
            point.classification = cursor.read_u8()?;
            point.user_data = cursor.read_u8()?;
            // stored in 0.006 degree increments
            point.scan_angle = cursor.read_i16::<LittleEndian>()? as f64 * 0.006;
            point.point_source_id = cursor.read_u16::<LittleEndian>()?;
            point.gps_time = Some(cursor.read_f64::<LittleEndian>()?);

            if format >= 7 {
                point.color = Some(PointColor {
                    red: cursor.read_u16::<LittleEndian>()? as f32 / color_divisor,
                    green: cursor.read_u16::<LittleEndian>()? as f32 / color_divisor,
                    blue: cursor.read_u16::<LittleEndian>()? as f32 / color_divisor,
                });
            }
            if format == 8 {
                point.nir = Some(cursor.read_u16::<LittleEndian>()?);
            }
        }
        other => return Err(Error::UnsupportedPointFormat(other)),
    }

    if raw.len() > standard_size {
        point.extra_bytes = Some(raw[standard_size..].to_vec());
    }
    Ok(point)
}

/// Byte offset of the dimension at `index` inside a point's extra bytes.
pub(crate) fn dimension_offset(dimensions: &[ExtraDimension], index: usize) -> usize {
    dimensions[..index].iter().map(|d| d.byte_size()).sum()
}

/// Appends the dimension's components for one point to `out`, scaled
/// and offset per descriptor. Components the point does not carry (no
/// extra bytes, or a blob too short) come out as 0.
pub(crate) fn append_extra_components(
    point: &CopcPoint,
    dimensions: &[ExtraDimension],
    index: usize,
    out: &mut Vec<f32>,
) {
    let dimension = &dimensions[index];
    let start = dimension_offset(dimensions, index);
    let extra = point.extra_bytes.as_deref().unwrap_or(&[]);

    for component in 0..dimension.component_count() {
        let offset = start + component * dimension.component_size();
        let end = offset + dimension.component_size();
        if end > extra.len() {
            out.push(0.0);
            continue;
        }
        let raw = read_component(&extra[offset..end], dimension.base_type());
        let scale = dimension.scale[component.min(2)];
        let shift = dimension.offset[component.min(2)];
        let value = if scale != 0.0 { raw * scale + shift } else { raw };
        out.push(value as f32);
    }
}

fn read_component(bytes: &[u8], base_type: u8) -> f64 {
    let mut cursor = Cursor::new(bytes);
    // the slice was length checked by the caller, reads cannot fail
    match base_type {
        1 => cursor.read_u8().unwrap_or(0) as f64,
        2 => cursor.read_i8().unwrap_or(0) as f64,
        3 => cursor.read_u16::<LittleEndian>().unwrap_or(0) as f64,
        4 => cursor.read_i16::<LittleEndian>().unwrap_or(0) as f64,
        5 => cursor.read_u32::<LittleEndian>().unwrap_or(0) as f64,
        6 => cursor.read_i32::<LittleEndian>().unwrap_or(0) as f64,
        7 => cursor.read_u64::<LittleEndian>().unwrap_or(0) as f64,
        8 => cursor.read_i64::<LittleEndian>().unwrap_or(0) as f64,
        9 => cursor.read_f32::<LittleEndian>().unwrap_or(0.0) as f64,
        _ => cursor.read_f64::<LittleEndian>().unwrap_or(0.0),
    }
}
