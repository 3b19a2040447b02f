use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use chrono::{DateTime, Datelike, NaiveDate, Timelike};
use std::io::{self, Cursor, Read, Write};

use super::error::{ErrorCode, ZipError, ZipResult};

/// ZIP compression methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
    Unknown(u16),
}

impl CompressionMethod {
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => CompressionMethod::Stored,
            8 => CompressionMethod::Deflate,
            _ => CompressionMethod::Unknown(value),
        }
    }

    pub fn as_u16(&self) -> u16 {
        match self {
            CompressionMethod::Stored => 0,
            CompressionMethod::Deflate => 8,
            CompressionMethod::Unknown(v) => *v,
        }
    }
}

fn truncated(_: io::Error) -> ZipError {
    ZipError::new(ErrorCode::NoZip)
}

/// End of Central Directory (EOCD) - 22 bytes minimum
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub disk_entries: u16,
    pub total_entries: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment_len: u16,
}

impl EndOfCentralDirectory {
    pub const SIGNATURE: &'static [u8] = b"PK\x05\x06";
    pub const SIZE: usize = 22;

    pub fn from_bytes(data: &[u8]) -> ZipResult<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::new(ErrorCode::NoZip));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_number: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
            disk_with_cd: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
            disk_entries: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
            total_entries: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
            cd_size: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
            cd_offset: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
            comment_len: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
        })
    }

    pub fn is_zip64(&self) -> bool {
        self.disk_entries == 0xFFFF
            || self.total_entries == 0xFFFF
            || self.cd_size == 0xFFFFFFFF
            || self.cd_offset == 0xFFFFFFFF
    }

    pub fn is_multi_disk(&self) -> bool {
        self.disk_number != 0 || self.disk_with_cd != 0 || self.disk_entries != self.total_entries
    }

    /// Write the record followed by the archive comment.
    pub fn write_to<W: Write>(&self, out: &mut W, comment: &[u8]) -> io::Result<()> {
        out.write_all(Self::SIGNATURE)?;
        out.write_u16::<LittleEndian>(self.disk_number)?;
        out.write_u16::<LittleEndian>(self.disk_with_cd)?;
        out.write_u16::<LittleEndian>(self.disk_entries)?;
        out.write_u16::<LittleEndian>(self.total_entries)?;
        out.write_u32::<LittleEndian>(self.cd_size)?;
        out.write_u32::<LittleEndian>(self.cd_offset)?;
        out.write_u16::<LittleEndian>(comment.len() as u16)?;
        out.write_all(comment)
    }
}

/// ZIP64 End of Central Directory Locator - 20 bytes
pub struct Zip64EOCDLocator {
    pub disk_with_eocd64: u32,
    pub eocd64_offset: u64,
    pub total_disks: u32,
}

impl Zip64EOCDLocator {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x07";
    pub const SIZE: usize = 20;

    pub fn from_bytes(data: &[u8]) -> ZipResult<Self> {
        if data.len() < Self::SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::new(ErrorCode::Incons));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            disk_with_eocd64: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
            eocd64_offset: cursor.read_u64::<LittleEndian>().map_err(truncated)?,
            total_disks: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
        })
    }
}

/// ZIP64 End of Central Directory - 56 bytes minimum
pub struct Zip64EOCD {
    pub eocd64_size: u64,
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub disk_entries: u64,
    pub total_entries: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EOCD {
    pub const SIGNATURE: &'static [u8] = b"PK\x06\x06";
    pub const MIN_SIZE: usize = 56;

    pub fn from_bytes(data: &[u8]) -> ZipResult<Self> {
        if data.len() < Self::MIN_SIZE || &data[0..4] != Self::SIGNATURE {
            return Err(ZipError::new(ErrorCode::Incons));
        }

        let mut cursor = Cursor::new(&data[4..]);

        Ok(Self {
            eocd64_size: cursor.read_u64::<LittleEndian>().map_err(truncated)?,
            version_made_by: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
            version_needed: cursor.read_u16::<LittleEndian>().map_err(truncated)?,
            disk_number: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
            disk_with_cd: cursor.read_u32::<LittleEndian>().map_err(truncated)?,
            disk_entries: cursor.read_u64::<LittleEndian>().map_err(truncated)?,
            total_entries: cursor.read_u64::<LittleEndian>().map_err(truncated)?,
            cd_size: cursor.read_u64::<LittleEndian>().map_err(truncated)?,
            cd_offset: cursor.read_u64::<LittleEndian>().map_err(truncated)?,
        })
    }
}

/// Central Directory File Header (CDFH) - 46 bytes minimum
pub const CDFH_SIGNATURE: &[u8] = b"PK\x01\x02";
pub const CDFH_MIN_SIZE: usize = 46;

/// Local File Header (LFH) - 30 bytes
pub const LFH_SIGNATURE: &[u8] = b"PK\x03\x04";
pub const LFH_SIZE: usize = 30;

/// ZIP64 extended information extra field id
pub const ZIP64_EXTRA_ID: u16 = 0x0001;

/// General purpose flag: entry is encrypted
pub const FLAG_ENCRYPTED: u16 = 0x0001;
/// General purpose flag: sizes and CRC follow the data in a descriptor
pub const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;

/// "made by" UNIX, spec version 2.0
pub const VERSION_MADE_BY: u16 = (3 << 8) | 20;
/// Minimum version needed for deflate and directories
pub const VERSION_NEEDED: u16 = 20;

/// Everything the central directory says about one entry.
#[derive(Debug, Clone)]
pub struct ZipFileEntry {
    pub file_name: String,
    pub compression_method: CompressionMethod,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub lfh_offset: u64,
    pub last_mod_time: u16,
    pub last_mod_date: u16,
    pub is_directory: bool,
    pub flags: u16,
    pub version_made_by: u16,
    pub internal_attrs: u16,
    pub external_attrs: u32,
    /// Extra fields other than the ZIP64 block, which is not carried over on write
    pub extra: Vec<u8>,
    pub comment: Vec<u8>,
}

impl ZipFileEntry {
    /// Modification time as seconds since the unix epoch (DOS times carry no zone; UTC is assumed)
    pub fn mtime(&self) -> i64 {
        dos_to_unix(self.last_mod_date, self.last_mod_time)
    }

    pub fn is_encrypted(&self) -> bool {
        self.flags & FLAG_ENCRYPTED != 0
    }

    /// Read one central directory record from `cursor`.
    pub fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> ZipResult<Self> {
        let mut sig = [0u8; 4];
        cursor.read_exact(&mut sig).map_err(truncated)?;
        if sig != CDFH_SIGNATURE {
            return Err(ZipError::new(ErrorCode::NoZip));
        }

        let version_made_by = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
        let _version_needed = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
        let flags = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
        let compression_method = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
        let last_mod_time = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
        let last_mod_date = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
        let crc32 = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        let mut compressed_size = cursor.read_u32::<LittleEndian>().map_err(truncated)? as u64;
        let mut uncompressed_size = cursor.read_u32::<LittleEndian>().map_err(truncated)? as u64;
        let file_name_length = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
        let extra_field_length = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
        let file_comment_length = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
        let disk_number_start = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
        let internal_attrs = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
        let external_attrs = cursor.read_u32::<LittleEndian>().map_err(truncated)?;
        let mut lfh_offset = cursor.read_u32::<LittleEndian>().map_err(truncated)? as u64;

        if disk_number_start != 0 {
            return Err(ZipError::new(ErrorCode::MultiDisk));
        }

        let mut file_name_bytes = vec![0u8; file_name_length as usize];
        cursor.read_exact(&mut file_name_bytes).map_err(truncated)?;
        // Use lossy conversion to handle non-UTF8 filenames gracefully
        let file_name = String::from_utf8_lossy(&file_name_bytes).to_string();
        let is_directory = file_name.ends_with('/');

        let mut extra_bytes = vec![0u8; extra_field_length as usize];
        cursor.read_exact(&mut extra_bytes).map_err(truncated)?;

        let mut extra = Vec::new();
        let mut fields = Cursor::new(extra_bytes.as_slice());
        let extra_end = extra_bytes.len() as u64;
        while fields.position() + 4 <= extra_end {
            let header_id = fields.read_u16::<LittleEndian>().map_err(truncated)?;
            let field_size = fields.read_u16::<LittleEndian>().map_err(truncated)? as u64;
            let field_start = fields.position();
            let field_end = (field_start + field_size).min(extra_end);

            if header_id == ZIP64_EXTRA_ID {
                // Fields are present only if corresponding header field is 0xFFFFFFFF
                if uncompressed_size == 0xFFFFFFFF && fields.position() + 8 <= field_end {
                    uncompressed_size = fields.read_u64::<LittleEndian>().map_err(truncated)?;
                }
                if compressed_size == 0xFFFFFFFF && fields.position() + 8 <= field_end {
                    compressed_size = fields.read_u64::<LittleEndian>().map_err(truncated)?;
                }
                if lfh_offset == 0xFFFFFFFF && fields.position() + 8 <= field_end {
                    lfh_offset = fields.read_u64::<LittleEndian>().map_err(truncated)?;
                }
            } else {
                let start = (field_start - 4) as usize;
                extra.extend_from_slice(&extra_bytes[start..field_end as usize]);
            }
            fields.set_position(field_end);
        }

        let mut comment = vec![0u8; file_comment_length as usize];
        cursor.read_exact(&mut comment).map_err(truncated)?;

        Ok(ZipFileEntry {
            file_name,
            compression_method: CompressionMethod::from_u16(compression_method),
            compressed_size,
            uncompressed_size,
            crc32,
            lfh_offset,
            last_mod_time,
            last_mod_date,
            is_directory,
            flags,
            version_made_by,
            internal_attrs,
            external_attrs,
            extra,
            comment,
        })
    }

    /// Write the local file header that precedes this entry's data.
    pub fn write_lfh<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let name = self.file_name.as_bytes();
        out.write_all(LFH_SIGNATURE)?;
        out.write_u16::<LittleEndian>(VERSION_NEEDED)?;
        out.write_u16::<LittleEndian>(self.flags & !FLAG_DATA_DESCRIPTOR)?;
        out.write_u16::<LittleEndian>(self.compression_method.as_u16())?;
        out.write_u16::<LittleEndian>(self.last_mod_time)?;
        out.write_u16::<LittleEndian>(self.last_mod_date)?;
        out.write_u32::<LittleEndian>(self.crc32)?;
        out.write_u32::<LittleEndian>(narrow(self.compressed_size)?)?;
        out.write_u32::<LittleEndian>(narrow(self.uncompressed_size)?)?;
        out.write_u16::<LittleEndian>(name.len() as u16)?;
        out.write_u16::<LittleEndian>(0)?;
        out.write_all(name)
    }

    /// Write this entry's central directory record.
    pub fn write_cdfh<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let name = self.file_name.as_bytes();
        out.write_all(CDFH_SIGNATURE)?;
        out.write_u16::<LittleEndian>(self.version_made_by)?;
        out.write_u16::<LittleEndian>(VERSION_NEEDED)?;
        out.write_u16::<LittleEndian>(self.flags & !FLAG_DATA_DESCRIPTOR)?;
        out.write_u16::<LittleEndian>(self.compression_method.as_u16())?;
        out.write_u16::<LittleEndian>(self.last_mod_time)?;
        out.write_u16::<LittleEndian>(self.last_mod_date)?;
        out.write_u32::<LittleEndian>(self.crc32)?;
        out.write_u32::<LittleEndian>(narrow(self.compressed_size)?)?;
        out.write_u32::<LittleEndian>(narrow(self.uncompressed_size)?)?;
        out.write_u16::<LittleEndian>(name.len() as u16)?;
        out.write_u16::<LittleEndian>(self.extra.len() as u16)?;
        out.write_u16::<LittleEndian>(self.comment.len() as u16)?;
        out.write_u16::<LittleEndian>(0)?;
        out.write_u16::<LittleEndian>(self.internal_attrs)?;
        out.write_u32::<LittleEndian>(self.external_attrs)?;
        out.write_u32::<LittleEndian>(narrow(self.lfh_offset)?)?;
        out.write_all(name)?;
        out.write_all(&self.extra)?;
        out.write_all(&self.comment)
    }
}

/// Classic records store 32-bit sizes; larger values need ZIP64, which is not written.
fn narrow(value: u64) -> io::Result<u32> {
    u32::try_from(value).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "entry exceeds 4 GiB; ZIP64 output is not supported",
        )
    })
}

/// Parse the fixed part of a local header, returning (name length, extra length).
pub fn parse_lfh_lengths(fixed: &[u8]) -> ZipResult<(u16, u16)> {
    if fixed.len() < LFH_SIZE || &fixed[0..4] != LFH_SIGNATURE {
        return Err(ZipError::new(ErrorCode::Incons));
    }
    let mut cursor = Cursor::new(&fixed[26..]);
    let name_len = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
    let extra_len = cursor.read_u16::<LittleEndian>().map_err(truncated)?;
    Ok((name_len, extra_len))
}

/// Convert a DOS date/time pair to unix seconds.
pub fn dos_to_unix(date: u16, time: u16) -> i64 {
    let year = ((date >> 9) & 0x7F) as i32 + 1980;
    let month = ((date >> 5) & 0x0F) as u32;
    let day = (date & 0x1F) as u32;
    let hour = ((time >> 11) & 0x1F) as u32;
    let minute = ((time >> 5) & 0x3F) as u32;
    let second = ((time & 0x1F) * 2) as u32;

    NaiveDate::from_ymd_opt(year, month.max(1), day.max(1))
        .and_then(|d| d.and_hms_opt(hour, minute, second.min(59)))
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or(0)
}

/// Convert unix seconds to a DOS (date, time) pair, clamped to the DOS range.
pub fn unix_to_dos(secs: i64) -> (u16, u16) {
    let Some(dt) = DateTime::from_timestamp(secs, 0) else {
        return (0x21, 0);
    };
    if dt.year() < 1980 {
        // 1980-01-01 00:00:00
        return (0x21, 0);
    }
    let year = (dt.year() - 1980).min(127) as u16;
    let date = (year << 9) | ((dt.month() as u16) << 5) | dt.day() as u16;
    let time = ((dt.hour() as u16) << 11) | ((dt.minute() as u16) << 5) | (dt.second() as u16 / 2);
    (date, time)
}
