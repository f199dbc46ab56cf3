//! Helpers for building synthetic LAS/COPC byte streams in tests.

use crate::copc::{CopcInfo, Entry, Node, VoxelKey, ENTRY_SIZE};
use crate::header::LasHeader;
use crate::vlr::ExtraDimension;
use byteorder::{LittleEndian, WriteBytesExt};
use laz::{LazItemRecordBuilder, LazVlr};
use laz::record::{
    LayeredPointRecordCompressor, RecordCompressor, SequentialPointRecordCompressor,
};
use nalgebra::{Isometry3, Perspective3, Point3, Vector3};
use std::io::Cursor;

pub const TEST_WKT: &str = "PROJCS[\"synthetic\"]";

/// Knobs of a synthetic LAS 1.4 header.
pub struct HeaderSpec {
    /// Raw format byte as stored, compression bit included
    pub format: u8,
    pub record_length: u16,
    pub number_of_vlrs: u32,
    pub point_count: u64,
    pub offset_to_point_data: u32,
    pub scale: (f64, f64, f64),
    pub offset: (f64, f64, f64),
    pub min: (f64, f64, f64),
    pub max: (f64, f64, f64),
}

impl Default for HeaderSpec {
    fn default() -> Self {
        HeaderSpec {
            format: 7 | 0x80,
            record_length: 36,
            number_of_vlrs: 1,
            point_count: 1234,
            offset_to_point_data: 375,
            scale: (0.001, 0.001, 0.001),
            offset: (0.0, 0.0, 0.0),
            min: (-10.0, -10.0, -10.0),
            max: (10.0, 10.0, 10.0),
        }
    }
}

/// Serializes a 375 byte LAS 1.4 header.
pub fn las_header_bytes(spec: &HeaderSpec) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(375);
    bytes.extend_from_slice(b"LASF");
    bytes.write_u16::<LittleEndian>(0).unwrap(); // file source id
    bytes.write_u16::<LittleEndian>(0).unwrap(); // global encoding
    bytes.extend_from_slice(&[0u8; 16]); // guid
    bytes.push(1); // version major
    bytes.push(4); // version minor
    bytes.extend_from_slice(&padded(b"synthetic", 32)); // system identifier
    bytes.extend_from_slice(&padded(b"copc-view tests", 32)); // generating software
    bytes.write_u16::<LittleEndian>(1).unwrap(); // day
    bytes.write_u16::<LittleEndian>(2024).unwrap(); // year
    bytes.write_u16::<LittleEndian>(375).unwrap(); // header size
    bytes
        .write_u32::<LittleEndian>(spec.offset_to_point_data)
        .unwrap();
    bytes.write_u32::<LittleEndian>(spec.number_of_vlrs).unwrap();
    bytes.push(spec.format);
    bytes.write_u16::<LittleEndian>(spec.record_length).unwrap();
    bytes.write_u32::<LittleEndian>(0).unwrap(); // legacy point count
    for _ in 0..5 {
        bytes.write_u32::<LittleEndian>(0).unwrap(); // legacy by return
    }
    bytes.write_f64::<LittleEndian>(spec.scale.0).unwrap();
    bytes.write_f64::<LittleEndian>(spec.scale.1).unwrap();
    bytes.write_f64::<LittleEndian>(spec.scale.2).unwrap();
    bytes.write_f64::<LittleEndian>(spec.offset.0).unwrap();
    bytes.write_f64::<LittleEndian>(spec.offset.1).unwrap();
    bytes.write_f64::<LittleEndian>(spec.offset.2).unwrap();
    bytes.write_f64::<LittleEndian>(spec.max.0).unwrap();
    bytes.write_f64::<LittleEndian>(spec.min.0).unwrap();
    bytes.write_f64::<LittleEndian>(spec.max.1).unwrap();
    bytes.write_f64::<LittleEndian>(spec.min.1).unwrap();
    bytes.write_f64::<LittleEndian>(spec.max.2).unwrap();
    bytes.write_f64::<LittleEndian>(spec.min.2).unwrap();
    bytes.write_u64::<LittleEndian>(0).unwrap(); // waveform start
    bytes.write_u64::<LittleEndian>(0).unwrap(); // first evlr
    bytes.write_u32::<LittleEndian>(0).unwrap(); // evlr count
    bytes.write_u64::<LittleEndian>(spec.point_count).unwrap();
    for _ in 0..15 {
        bytes.write_u64::<LittleEndian>(0).unwrap(); // by return
    }
    assert_eq!(bytes.len(), 375);
    bytes
}

/// A parsed header without going through bytes, for decoder tests.
pub fn header_for_format(format: u8, record_length: u16) -> LasHeader {
    LasHeader {
        version_major: 1,
        version_minor: 4,
        point_data_record_format: format | 0x80,
        point_data_record_length: record_length,
        x_scale_factor: 0.01,
        y_scale_factor: 0.01,
        z_scale_factor: 0.01,
        ..Default::default()
    }
}

/// Serializes one VLR (54 byte header plus payload).
pub fn vlr_bytes(user_id: &str, record_id: u16, data: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(54 + data.len());
    bytes.write_u16::<LittleEndian>(0).unwrap(); // reserved
    bytes.extend_from_slice(&padded(user_id.as_bytes(), 16));
    bytes.write_u16::<LittleEndian>(record_id).unwrap();
    bytes.write_u16::<LittleEndian>(data.len() as u16).unwrap();
    bytes.extend_from_slice(&padded(b"", 32)); // description
    bytes.extend_from_slice(data);
    bytes
}

/// Serializes one 192 byte Extra-Bytes descriptor.
pub fn extra_dimension_bytes(name: &str, data_type: u8, scale: f64, offset: f64) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(192);
    bytes.extend_from_slice(&[0u8; 2]); // reserved
    bytes.push(data_type);
    bytes.push(0); // options
    bytes.extend_from_slice(&padded(name.as_bytes(), 32));
    bytes.extend_from_slice(&[0u8; 4]); // unused
    for _ in 0..9 {
        bytes.write_f64::<LittleEndian>(0.0).unwrap(); // no_data, min, max
    }
    for _ in 0..3 {
        bytes.write_f64::<LittleEndian>(scale).unwrap();
    }
    for _ in 0..3 {
        bytes.write_f64::<LittleEndian>(offset).unwrap();
    }
    bytes.extend_from_slice(&padded(b"", 32)); // description
    assert_eq!(bytes.len(), 192);
    bytes
}

/// An [ExtraDimension] built directly, same scale/offset on every
/// component.
pub fn extra_dimension(name: &str, data_type: u8, scale: f64, offset: f64) -> ExtraDimension {
    ExtraDimension {
        data_type,
        options: 0,
        name: name.to_string(),
        no_data: [0.0; 3],
        min: [0.0; 3],
        max: [0.0; 3],
        scale: [scale; 3],
        offset: [offset; 3],
        description: String::new(),
    }
}

pub fn node_entry(key: VoxelKey, offset: u64, byte_size: i32, point_count: i32) -> Entry {
    Entry {
        key,
        offset,
        byte_size,
        point_count,
    }
}

pub fn page_entry(key: VoxelKey, offset: u64, byte_size: i32) -> Entry {
    Entry {
        key,
        offset,
        byte_size,
        point_count: -1,
    }
}

pub fn node(key: VoxelKey, offset: u64, byte_size: u64, point_count: u64) -> Node {
    Node {
        key,
        offset,
        byte_size,
        point_count,
        page_key: VoxelKey::ROOT,
    }
}

/// Serializes `entries` into `file` at `offset`.
pub fn write_page(file: &mut [u8], offset: usize, entries: &[Entry]) {
    let mut cursor = Cursor::new(&mut file[offset..offset + entries.len() * ENTRY_SIZE]);
    for entry in entries {
        entry.write_to(&mut cursor).unwrap();
    }
}

/// A raw format 0 record (20 bytes).
#[allow(clippy::too_many_arguments)]
pub fn raw_point_format0(
    x: i32,
    y: i32,
    z: i32,
    intensity: u16,
    flags: u8,
    classification: u8,
    scan_angle: i8,
    user_data: u8,
    point_source_id: u16,
) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(20);
    bytes.write_i32::<LittleEndian>(x).unwrap();
    bytes.write_i32::<LittleEndian>(y).unwrap();
    bytes.write_i32::<LittleEndian>(z).unwrap();
    bytes.write_u16::<LittleEndian>(intensity).unwrap();
    bytes.push(flags);
    bytes.push(classification);
    bytes.write_i8(scan_angle).unwrap();
    bytes.push(user_data);
    bytes.write_u16::<LittleEndian>(point_source_id).unwrap();
    bytes
}

/// Field values of a raw format 6/7/8 record.
pub struct RawPointSpec {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub intensity: u16,
    pub return_number: u8,
    pub number_of_returns: u8,
    pub scan_direction: bool,
    pub edge_of_flight_line: bool,
    pub classification: u8,
    pub user_data: u8,
    /// Raw value in 0.006 degree units
    pub scan_angle: i16,
    pub point_source_id: u16,
    pub gps_time: f64,
    pub rgb: (u16, u16, u16),
    pub nir: u16,
}

impl Default for RawPointSpec {
    fn default() -> Self {
        RawPointSpec {
            x: 0,
            y: 0,
            z: 0,
            intensity: 0,
            return_number: 1,
            number_of_returns: 1,
            scan_direction: false,
            edge_of_flight_line: false,
            classification: 0,
            user_data: 0,
            scan_angle: 0,
            point_source_id: 0,
            gps_time: 0.0,
            rgb: (0, 0, 0),
            nir: 0,
        }
    }
}

/// A raw format 6 (30 bytes), 7 (36) or 8 (38) record.
pub fn raw_point_format678(format: u8, spec: RawPointSpec) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(38);
    bytes.write_i32::<LittleEndian>(spec.x).unwrap();
    bytes.write_i32::<LittleEndian>(spec.y).unwrap();
    bytes.write_i32::<LittleEndian>(spec.z).unwrap();
    bytes.write_u16::<LittleEndian>(spec.intensity).unwrap();
    bytes.push((spec.number_of_returns << 4) | (spec.return_number & 0xf));
    let mut flags = 0u8;
    if spec.scan_direction {
        flags |= 0x40;
    }
    if spec.edge_of_flight_line {
        flags |= 0x80;
    }
    bytes.push(flags);
    bytes.push(spec.classification);
    bytes.push(spec.user_data);
    bytes.write_i16::<LittleEndian>(spec.scan_angle).unwrap();
    bytes.write_u16::<LittleEndian>(spec.point_source_id).unwrap();
    bytes.write_f64::<LittleEndian>(spec.gps_time).unwrap();
    if format >= 7 {
        bytes.write_u16::<LittleEndian>(spec.rgb.0).unwrap();
        bytes.write_u16::<LittleEndian>(spec.rgb.1).unwrap();
        bytes.write_u16::<LittleEndian>(spec.rgb.2).unwrap();
    }
    if format == 8 {
        bytes.write_u16::<LittleEndian>(spec.nir).unwrap();
    }
    bytes
}

pub fn laz_vlr_for_format(format: u8, num_extra_bytes: u16) -> LazVlr {
    LazVlr::from_laz_items(
        LazItemRecordBuilder::default_for_point_format_id(format, num_extra_bytes).unwrap(),
    )
}

/// Compresses raw records into one LAZ chunk, the way a COPC writer
/// stores one octree node.
pub fn compress_records(format: u8, num_extra_bytes: u16, records: &[Vec<u8>]) -> Vec<u8> {
    let vlr = laz_vlr_for_format(format, num_extra_bytes);
    let mut cursor = Cursor::new(Vec::new());
    if format == 0 {
        let mut compressor = SequentialPointRecordCompressor::new(&mut cursor);
        compressor.set_fields_from(vlr.items()).unwrap();
        for record in records {
            compressor.compress_next(record).unwrap();
        }
        compressor.done().unwrap();
    } else {
        let mut compressor = LayeredPointRecordCompressor::new(&mut cursor);
        compressor.set_fields_from(vlr.items()).unwrap();
        for record in records {
            compressor.compress_next(record).unwrap();
        }
        compressor.done().unwrap();
    }
    cursor.into_inner()
}

/// A complete in-memory COPC file: format 7, scale 0.01, an 8 unit
/// cube, spacing 2. Two chunks: the root node with three points near
/// the low corner and the (1,1,1,1) child with two points near the
/// high corner. VLRs: COPC info, laszip, WKT projection.
pub fn synthetic_copc_file() -> Vec<u8> {
    let root_records: Vec<Vec<u8>> = [(20, 30), (50, 50), (90, 90)]
        .iter()
        .map(|(position, channel)| {
            let mut spec = RawPointSpec {
                x: *position,
                y: *position,
                z: *position,
                gps_time: *position as f64,
                ..Default::default()
            };
            spec.rgb = (*channel, *channel / 2, 200);
            raw_point_format678(7, spec)
        })
        .collect();
    let child_records: Vec<Vec<u8>> = [700, 750]
        .iter()
        .map(|position| {
            let spec = RawPointSpec {
                x: *position,
                y: *position,
                z: *position,
                rgb: (100, 150, 250),
                ..Default::default()
            };
            raw_point_format678(7, spec)
        })
        .collect();

    let chunks = vec![
        (VoxelKey::ROOT, root_records),
        (VoxelKey::new(1, 1, 1, 1), child_records),
    ];
    build_copc_file(&chunks)
}

fn build_copc_file(chunks: &[(VoxelKey, Vec<Vec<u8>>)]) -> Vec<u8> {
    let laz_vlr = laz_vlr_for_format(7, 0);
    let mut laz_vlr_payload = Vec::new();
    laz_vlr.write_to(&mut laz_vlr_payload).unwrap();

    let compressed: Vec<Vec<u8>> = chunks
        .iter()
        .map(|(_, records)| compress_records(7, 0, records))
        .collect();

    let vlr_block_len = (54 + 160) + (54 + laz_vlr_payload.len()) + (54 + TEST_WKT.len());
    let point_data_start = 375 + vlr_block_len;
    let hierarchy_offset =
        point_data_start + compressed.iter().map(Vec::len).sum::<usize>();

    let mut entries = Vec::new();
    let mut chunk_offset = point_data_start as u64;
    for ((key, records), chunk) in chunks.iter().zip(&compressed) {
        entries.push(node_entry(
            *key,
            chunk_offset,
            chunk.len() as i32,
            records.len() as i32,
        ));
        chunk_offset += chunk.len() as u64;
    }

    let info = CopcInfo {
        center_x: 4.0,
        center_y: 4.0,
        center_z: 4.0,
        halfsize: 4.0,
        spacing: 2.0,
        root_hier_offset: hierarchy_offset as u64,
        root_hier_size: (entries.len() * ENTRY_SIZE) as u64,
        gpstime_minimum: 0.0,
        gpstime_maximum: 100.0,
    };

    let header_spec = HeaderSpec {
        format: 7 | 0x80,
        record_length: 36,
        number_of_vlrs: 3,
        point_count: chunks.iter().map(|(_, r)| r.len() as u64).sum(),
        offset_to_point_data: point_data_start as u32,
        scale: (0.01, 0.01, 0.01),
        offset: (0.0, 0.0, 0.0),
        min: (0.0, 0.0, 0.0),
        max: (8.0, 8.0, 8.0),
    };

    let mut file = las_header_bytes(&header_spec);
    file.extend(vlr_bytes("copc", 1, &info.to_bytes().unwrap()));
    file.extend(vlr_bytes("laszip encoded", 22204, &laz_vlr_payload));
    file.extend(vlr_bytes("LASF_Projection", 2112, TEST_WKT.as_bytes()));
    assert_eq!(file.len(), point_data_start);
    for chunk in &compressed {
        file.extend_from_slice(chunk);
    }
    assert_eq!(file.len(), hierarchy_offset);
    for entry in &entries {
        entry.write_to(&mut file).unwrap();
    }
    file
}

/// A file whose first VLR is a copc/1 record with a payload that is too
/// short.
pub fn synthetic_copc_file_with_truncated_info() -> Vec<u8> {
    let header_spec = HeaderSpec {
        number_of_vlrs: 1,
        ..Default::default()
    };
    let mut file = las_header_bytes(&header_spec);
    file.extend(vlr_bytes("copc", 1, &[0u8; 150]));
    file
}

/// A column-major perspective view-projection matrix looking from `eye`
/// at `target`.
pub fn look_at_matrix(eye: (f64, f64, f64), target: (f64, f64, f64)) -> [f64; 16] {
    let view = Isometry3::look_at_rh(
        &Point3::new(eye.0, eye.1, eye.2),
        &Point3::new(target.0, target.1, target.2),
        &Vector3::z(),
    );
    let projection = Perspective3::new(1.0, std::f64::consts::FRAC_PI_2, 0.1, 100.0);
    let view_projection = projection.as_matrix() * view.to_matrix();
    let mut matrix = [0.0; 16];
    matrix.copy_from_slice(view_projection.as_slice());
    matrix
}

fn padded(content: &[u8], len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    bytes[..content.len()].copy_from_slice(content);
    bytes
}
