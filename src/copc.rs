//! COPC info VLR, EPT hierarchy keys and hierarchy entries.

use crate::geometry::Bounds;
use crate::header::LasHeader;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::fmt;
use std::io::{Read, Write};

/// Size of the COPC info VLR payload in bytes (72 bytes of fields
/// followed by 88 reserved bytes).
pub const COPC_INFO_SIZE: usize = 160;

/// Size of one hierarchy entry record in bytes.
pub const ENTRY_SIZE: usize = 32;

/// COPC info VLR data.
#[derive(Clone, Debug, Default)]
pub struct CopcInfo {
    /// Actual (unscaled) x coordinate of the center of the octree
    pub center_x: f64,
    /// Actual (unscaled) y coordinate of the center of the octree
    pub center_y: f64,
    /// Actual (unscaled) z coordinate of the center of the octree
    pub center_z: f64,
    /// Perpendicular distance from the center to any side of the root node.
    pub halfsize: f64,
    /// Space between points at the root node.
    /// This value is halved at each octree level
    pub spacing: f64,
    /// File offset to the first hierarchy page
    pub root_hier_offset: u64,
    /// Size of the first hierarchy page in bytes
    pub root_hier_size: u64,
    /// Minimum of GPSTime
    pub gpstime_minimum: f64,
    /// Maximum of GPSTime
    pub gpstime_maximum: f64,
    // Trailing 88 reserved bytes must be 0
}

impl CopcInfo {
    /// Reads COPC VLR data from a `Read`.
    pub(crate) fn read_from<R: Read>(mut read: R) -> crate::Result<Self> {
        Ok(CopcInfo {
            center_x: read.read_f64::<LittleEndian>()?,
            center_y: read.read_f64::<LittleEndian>()?,
            center_z: read.read_f64::<LittleEndian>()?,
            halfsize: read.read_f64::<LittleEndian>()?,
            spacing: read.read_f64::<LittleEndian>()?,
            root_hier_offset: read.read_u64::<LittleEndian>()?,
            root_hier_size: read.read_u64::<LittleEndian>()?,
            gpstime_minimum: read.read_f64::<LittleEndian>()?,
            gpstime_maximum: read.read_f64::<LittleEndian>()?,
        })
    }

    /// Serializes to the 160 byte VLR payload, reserved bytes zeroed.
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        let mut buffer = Vec::with_capacity(COPC_INFO_SIZE);
        buffer.write_f64::<LittleEndian>(self.center_x)?;
        buffer.write_f64::<LittleEndian>(self.center_y)?;
        buffer.write_f64::<LittleEndian>(self.center_z)?;
        buffer.write_f64::<LittleEndian>(self.halfsize)?;
        buffer.write_f64::<LittleEndian>(self.spacing)?;
        buffer.write_u64::<LittleEndian>(self.root_hier_offset)?;
        buffer.write_u64::<LittleEndian>(self.root_hier_size)?;
        buffer.write_f64::<LittleEndian>(self.gpstime_minimum)?;
        buffer.write_f64::<LittleEndian>(self.gpstime_maximum)?;
        buffer.resize(COPC_INFO_SIZE, 0);
        Ok(buffer)
    }

    /// The cube the root node covers.
    pub fn root_bounds(&self) -> Bounds {
        Bounds::new(
            self.center_x - self.halfsize,
            self.center_y - self.halfsize,
            self.center_z - self.halfsize,
            self.center_x + self.halfsize,
            self.center_y + self.halfsize,
            self.center_z + self.halfsize,
        )
    }
}

/// EPT hierarchy key: octree level plus the cell address within it.
///
/// A key with any negative component is invalid; [VoxelKey::ROOT] is
/// `(0, 0, 0, 0)`.
#[derive(Hash, PartialEq, Eq, Clone, Copy, Debug)]
pub struct VoxelKey {
    /// Level (octree depth)
    pub level: i32,
    /// x
    pub x: i32,
    /// y
    pub y: i32,
    /// z
    pub z: i32,
}

impl Default for VoxelKey {
    fn default() -> Self {
        VoxelKey::INVALID
    }
}

impl fmt::Display for VoxelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}-{}-{}", self.level, self.x, self.y, self.z)
    }
}

impl VoxelKey {
    pub const ROOT: VoxelKey = VoxelKey {
        level: 0,
        x: 0,
        y: 0,
        z: 0,
    };

    pub const INVALID: VoxelKey = VoxelKey {
        level: -1,
        x: -1,
        y: -1,
        z: -1,
    };

    pub fn new(level: i32, x: i32, y: i32, z: i32) -> Self {
        VoxelKey { level, x, y, z }
    }

    pub fn is_valid(&self) -> bool {
        self.level >= 0 && self.x >= 0 && self.y >= 0 && self.z >= 0
    }

    /// Reads VoxelKey from a `Read`.
    pub(crate) fn read_from<R: Read>(read: &mut R) -> crate::Result<Self> {
        Ok(VoxelKey {
            level: read.read_i32::<LittleEndian>()?,
            x: read.read_i32::<LittleEndian>()?,
            y: read.read_i32::<LittleEndian>()?,
            z: read.read_i32::<LittleEndian>()?,
        })
    }

    /// Writes VoxelKey to a `Write`.
    pub fn write_to<W: Write>(&self, write: &mut W) -> crate::Result<()> {
        write.write_i32::<LittleEndian>(self.level)?;
        write.write_i32::<LittleEndian>(self.x)?;
        write.write_i32::<LittleEndian>(self.y)?;
        write.write_i32::<LittleEndian>(self.z)?;
        Ok(())
    }

    /// The child in the given direction, one level down.
    ///
    /// The direction bits encode `(x << 2) | (y << 1) | z`; values
    /// outside `0..=7` are masked.
    pub fn bisect(&self, direction: i32) -> VoxelKey {
        VoxelKey {
            level: self.level + 1,
            x: (self.x << 1) | ((direction >> 2) & 0x1),
            y: (self.y << 1) | ((direction >> 1) & 0x1),
            z: (self.z << 1) | (direction & 0x1),
        }
    }

    /// All eight children, in direction order.
    pub fn children(&self) -> [VoxelKey; 8] {
        std::array::from_fn(|direction| self.bisect(direction as i32))
    }

    /// The key one level up, or [VoxelKey::INVALID] for the root.
    pub fn parent(&self) -> VoxelKey {
        if self.level < 1 {
            return VoxelKey::INVALID;
        }
        VoxelKey {
            level: self.level - 1,
            x: self.x / 2,
            y: self.y / 2,
            z: self.z / 2,
        }
    }

    /// The ancestor at the given level, or [VoxelKey::INVALID] when the
    /// level is not in `0..=self.level`.
    pub fn parent_at_depth(&self, level: i32) -> VoxelKey {
        if level < 0 || level > self.level {
            return VoxelKey::INVALID;
        }
        let shift = self.level - level;
        VoxelKey {
            level,
            x: self.x >> shift,
            y: self.y >> shift,
            z: self.z >> shift,
        }
    }

    /// Whether this key lies in the subtree below `ancestor`.
    pub fn child_of(&self, ancestor: &VoxelKey) -> bool {
        self.level > ancestor.level && self.parent_at_depth(ancestor.level) == *ancestor
    }

    /// The axis aligned box this voxel covers.
    ///
    /// The cube is centered on the COPC info center; the cell side is the
    /// largest header extent divided by `2^level`.
    pub fn bounds(&self, header: &LasHeader, info: &CopcInfo) -> Bounds {
        let span = header.cube_size() / (1u64 << self.level) as f64;
        let min_x = info.center_x - info.halfsize + self.x as f64 * span;
        let min_y = info.center_y - info.halfsize + self.y as f64 * span;
        let min_z = info.center_z - info.halfsize + self.z as f64 * span;
        Bounds::new(
            min_x,
            min_y,
            min_z,
            min_x + span,
            min_y + span,
            min_z + span,
        )
    }

    /// Nominal point spacing of this level: the root spacing halves at
    /// every level.
    pub fn resolution(&self, info: &CopcInfo) -> f64 {
        info.spacing / (1u64 << self.level) as f64
    }
}

/// Hierarchy entry
///
/// An entry corresponds to a single key/value pair in an EPT hierarchy,
/// but contains additional information to allow direct access and
/// decoding of the corresponding point data.
#[derive(Clone, Copy, Default, Debug, PartialEq)]
pub struct Entry {
    /// EPT key of the data to which this entry corresponds
    pub key: VoxelKey,

    /// Absolute offset to the data chunk if the point_count >= 0.
    /// Absolute offset to a child hierarchy page if the point_count is -1.
    pub offset: u64,

    /// Size of the data chunk in bytes (compressed size) if the
    /// point_count >= 0, size of the hierarchy page if it is -1.
    pub byte_size: i32,

    /// If >= 0, the number of points in the data chunk.
    /// If -1, the information for this octree node is found in another
    /// hierarchy page. Anything below -1 is a format error.
    pub point_count: i32,
}

impl Entry {
    /// Reads a hierarchy entry from a `Read`.
    pub(crate) fn read_from<R: Read>(read: &mut R) -> crate::Result<Self> {
        Ok(Entry {
            key: VoxelKey::read_from(read)?,
            offset: read.read_u64::<LittleEndian>()?,
            byte_size: read.read_i32::<LittleEndian>()?,
            point_count: read.read_i32::<LittleEndian>()?,
        })
    }

    /// Writes a hierarchy entry to a `Write`.
    pub fn write_to<W: Write>(&self, write: &mut W) -> crate::Result<()> {
        self.key.write_to(write)?;
        write.write_u64::<LittleEndian>(self.offset)?;
        write.write_i32::<LittleEndian>(self.byte_size)?;
        write.write_i32::<LittleEndian>(self.point_count)?;
        Ok(())
    }

    /// An entry with point_count -1 refers to another hierarchy page.
    pub fn is_page(&self) -> bool {
        self.point_count == -1
    }
}

/// An octree node resolved from a hierarchy entry: points at one
/// LAZ-compressed chunk.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Node {
    pub key: VoxelKey,
    /// Absolute file offset of the compressed chunk
    pub offset: u64,
    /// Compressed size of the chunk in bytes
    pub byte_size: u64,
    /// Number of points stored in the chunk
    pub point_count: u64,
    /// Key of the hierarchy page this node was read from
    pub page_key: VoxelKey,
}

impl Node {
    pub(crate) fn from_entry(entry: &Entry, page_key: VoxelKey) -> Self {
        Node {
            key: entry.key,
            offset: entry.offset,
            byte_size: entry.byte_size as u64,
            point_count: entry.point_count as u64,
            page_key,
        }
    }
}
