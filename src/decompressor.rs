//! LAZ chunk decompression into typed point records.

use crate::error::{Error, Result};
use crate::header::LasHeader;
use crate::point::{decode_record, peek_rgb, standard_record_size, CopcPoint};
use crate::vlr::ExtraDimension;
use laz::laszip::LazVlr;
use laz::record::{
    LayeredPointRecordDecompressor, RecordDecompressor, SequentialPointRecordDecompressor,
};
use std::io::Cursor;

/// How many points of a chunk are peeked at to guess the color bit depth.
const COLOR_SAMPLE_SIZE: usize = 64;

/// Decompresses LAZ chunks into [CopcPoint] records.
///
/// One chunk corresponds to one octree node. The underlying record
/// decoder keeps arithmetic coder state and is not reentrant, so every
/// chunk gets a fresh decoder over its own byte blob.
///
/// LAS nominally stores 16 bit color, but many producers pack 8 or 12
/// bit data into the low bits. Before bulk decoding a chunk with color,
/// up to [COLOR_SAMPLE_SIZE] points are decompressed and their largest
/// channel value picks the normalization divisor (255, 4095 or 65535).
/// The sampled records are decoded from memory, not re-read.
#[derive(Debug)]
pub struct LazDecompressor {
    laz_vlr: LazVlr,
    format: u8,
    record_length: usize,
    standard_size: usize,
    header: LasHeader,
    extra_dimensions: Vec<ExtraDimension>,
}

impl LazDecompressor {
    /// Builds a decompressor for the point format the header announces.
    ///
    /// Only point data record formats 0, 6, 7 and 8 are supported.
    pub fn new(
        laz_vlr: LazVlr,
        header: &LasHeader,
        extra_dimensions: Vec<ExtraDimension>,
    ) -> Result<Self> {
        let format = header.point_format();
        if !matches!(format, 0 | 6 | 7 | 8) {
            return Err(Error::UnsupportedPointFormat(format));
        }
        let standard_size =
            standard_record_size(format).expect("supported formats have a standard size");
        let record_length = header.point_data_record_length as usize;
        if record_length < standard_size {
            return Err(Error::InvalidArgument(format!(
                "point record length {record_length} is below the {standard_size} bytes of format {format}"
            )));
        }
        Ok(LazDecompressor {
            laz_vlr,
            format,
            record_length,
            standard_size,
            header: header.clone(),
            extra_dimensions,
        })
    }

    pub fn extra_dimensions(&self) -> &[ExtraDimension] {
        &self.extra_dimensions
    }

    /// Decompresses one chunk into its `point_count` records.
    ///
    /// An empty chunk or a zero point count yields an empty vec without
    /// touching the decoder.
    pub fn decompress(&self, compressed: &[u8], point_count: usize) -> Result<Vec<CopcPoint>> {
        if point_count == 0 || compressed.is_empty() {
            return Ok(Vec::new());
        }

        let cursor = Cursor::new(compressed);
        let mut decoder: Box<dyn RecordDecompressor<Cursor<&[u8]>> + '_> = if self.format == 0 {
            Box::new(SequentialPointRecordDecompressor::new(cursor))
        } else {
            Box::new(LayeredPointRecordDecompressor::new(cursor))
        };
        decoder.set_fields_from(self.laz_vlr.items())?;

        let mut points = Vec::with_capacity(point_count);
        let mut raw = vec![0u8; self.record_length];

        let mut color_divisor = 65535.0;
        if matches!(self.format, 7 | 8) {
            let sample_count = point_count.min(COLOR_SAMPLE_SIZE);
            let mut sampled = Vec::with_capacity(sample_count);
            let mut max_component = 0u16;
            for _ in 0..sample_count {
                decoder.decompress_next(&mut raw)?;
                let (red, green, blue) = peek_rgb(&raw)?;
                max_component = max_component.max(red).max(green).max(blue);
                sampled.push(raw.clone());
            }
            color_divisor = match max_component {
                0..=255 => 255.0,
                256..=4095 => 4095.0,
                _ => 65535.0,
            };
            for sample in &sampled {
                points.push(self.decode(sample, color_divisor)?);
            }
        }

        while points.len() < point_count {
            decoder.decompress_next(&mut raw)?;
            points.push(self.decode(&raw, color_divisor)?);
        }
        Ok(points)
    }

    fn decode(&self, raw: &[u8], color_divisor: f32) -> Result<CopcPoint> {
        decode_record(
            raw,
            self.format,
            self.standard_size,
            &self.header,
            color_divisor,
        )
    }

    /// The values of a named extra dimension across `points`, components
    /// interleaved per point. `None` when no such dimension is declared.
    pub fn extra_dimension_values(
        &self,
        points: &[CopcPoint],
        name: &str,
    ) -> Option<Vec<f32>> {
        let index = self.extra_dimensions.iter().position(|d| d.name == name)?;
        let mut values =
            Vec::with_capacity(points.len() * self.extra_dimensions[index].component_count());
        for point in points {
            crate::point::append_extra_components(
                point,
                &self.extra_dimensions,
                index,
                &mut values,
            );
        }
        Some(values)
    }
}
