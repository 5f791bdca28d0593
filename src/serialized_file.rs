//! Parser for the Unity "SerializedFile" container format.
//!
//! Only the pieces needed for read access are parsed: the object index, the
//! type table, the script-type table and the externals. Embedded typetree
//! blobs are skipped; decoding is driven by an external schema instead
//! (release builds strip the embedded trees anyway).

#![allow(non_snake_case)]

use anyhow::{Context, Result, bail, ensure};

use crate::reader::EndianReader;

pub const CLASS_ID_MONO_BEHAVIOUR: i32 = 114;

/// Reference to an object in this file (`m_FileID == 0`) or in one of its
/// externals (`m_FileID - 1` indexes `m_Externals`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PPtr {
    pub m_FileID: i32,
    pub m_PathID: i64,
}

#[derive(Debug)]
pub struct SerializedType {
    pub m_ClassID: i32,
    pub m_IsStrippedType: bool,
    pub m_ScriptTypeIndex: i16,
}

#[derive(Debug)]
pub struct ObjectInfo {
    pub m_PathID: i64,
    /// Byte offset of the object payload, relative to the data section.
    pub m_Offset: u64,
    pub m_Size: u32,
    /// Index into `m_Types`.
    pub m_TypeID: i32,
}

#[derive(Debug)]
pub struct FileIdentifier {
    pub guid: [u8; 16],
    pub r#type: i32,
    pub pathName: String,
}

#[derive(Debug)]
pub struct SerializedFile {
    pub m_Version: u32,
    pub m_UnityVersion: String,
    pub m_TargetPlatform: u32,
    pub m_DataOffset: u64,
    pub m_Types: Vec<SerializedType>,
    pub m_Objects: Vec<ObjectInfo>,
    pub m_ScriptTypes: Vec<PPtr>,
    pub m_Externals: Vec<FileIdentifier>,
    big_endian: bool,
}

impl SerializedFile {
    pub fn from_reader(data: &[u8]) -> Result<SerializedFile> {
        // The outer header is always big-endian; the endianness flag inside
        // it decides the rest of the file.
        let mut header = EndianReader::new(data, true);
        let mut metadata_size = header.u32().context("truncated header")? as u64;
        let mut file_size = header.u32().context("truncated header")? as u64;
        let version = header.u32().context("truncated header")?;
        let mut data_offset = header.u32().context("truncated header")? as u64;

        ensure!(
            (17..=22).contains(&version),
            "unsupported serialized file version {version} (supported: 17 through 22)"
        );

        let big_endian = header.bool()?;
        header.bytes(3)?;
        if version >= 22 {
            metadata_size = header.u32()? as u64;
            file_size = header.u64()?;
            data_offset = header.u64()?;
            header.i64()?;
        }
        ensure!(
            file_size <= data.len() as u64 && data_offset <= data.len() as u64,
            "serialized file header inconsistent with buffer of {} bytes",
            data.len()
        );
        let _ = metadata_size;

        let mut r = EndianReader::new(data, big_endian);
        r.seek(header.position())?;

        let m_UnityVersion = r.cstr().context("failed to read unity version")?;
        let m_TargetPlatform = r.u32()?;
        let enable_type_tree = r.bool()?;

        let type_count = r.u32()? as usize;
        ensure!(type_count <= r.remaining(), "implausible type count {type_count}");
        let mut m_Types = Vec::with_capacity(type_count);
        for i in 0..type_count {
            let ty = read_serialized_type(&mut r, version, enable_type_tree)
                .with_context(|| format!("failed to read serialized type {i}"))?;
            m_Types.push(ty);
        }

        let object_count = r.u32()? as usize;
        ensure!(object_count <= r.remaining(), "implausible object count {object_count}");
        let mut m_Objects = Vec::with_capacity(object_count);
        for i in 0..object_count {
            r.align4();
            let m_PathID = r.i64()?;
            let m_Offset = match version >= 22 {
                true => r.i64()? as u64,
                false => r.u32()? as u64,
            };
            let m_Size = r.u32()?;
            let m_TypeID = r.i32()?;
            ensure!(
                (m_TypeID as usize) < m_Types.len(),
                "object {i} references type {m_TypeID} out of {}",
                m_Types.len()
            );
            m_Objects.push(ObjectInfo {
                m_PathID,
                m_Offset,
                m_Size,
                m_TypeID,
            });
        }

        let script_count = r.u32()? as usize;
        ensure!(script_count <= r.remaining(), "implausible script count {script_count}");
        let mut m_ScriptTypes = Vec::with_capacity(script_count);
        for _ in 0..script_count {
            let m_FileID = r.i32()?;
            r.align4();
            let m_PathID = r.i64()?;
            m_ScriptTypes.push(PPtr { m_FileID, m_PathID });
        }

        let external_count = r.u32()? as usize;
        ensure!(external_count <= r.remaining(), "implausible external count {external_count}");
        let mut m_Externals = Vec::with_capacity(external_count);
        for _ in 0..external_count {
            let _empty = r.cstr()?;
            let mut guid = [0u8; 16];
            guid.copy_from_slice(r.bytes(16)?);
            let r#type = r.i32()?;
            let pathName = r.cstr()?;
            m_Externals.push(FileIdentifier {
                guid,
                r#type,
                pathName,
            });
        }
        // Ref types and user information follow; nothing here needs them.

        Ok(SerializedFile {
            m_Version: version,
            m_UnityVersion,
            m_TargetPlatform,
            m_DataOffset: data_offset,
            m_Types,
            m_Objects,
            m_ScriptTypes,
            m_Externals,
            big_endian,
        })
    }

    pub fn big_endian(&self) -> bool {
        self.big_endian
    }

    pub fn objects(&self) -> impl Iterator<Item = &ObjectInfo> {
        self.m_Objects.iter()
    }

    pub fn object_at(&self, path_id: i64) -> Option<&ObjectInfo> {
        self.m_Objects.iter().find(|o| o.m_PathID == path_id)
    }

    pub fn serialized_type(&self, info: &ObjectInfo) -> &SerializedType {
        // m_TypeID was bounds-checked during parsing
        &self.m_Types[info.m_TypeID as usize]
    }

    pub fn class_id(&self, info: &ObjectInfo) -> i32 {
        self.serialized_type(info).m_ClassID
    }

    /// The object's payload slice within the whole file buffer.
    pub fn object_slice<'d>(&self, info: &ObjectInfo, data: &'d [u8]) -> Result<&'d [u8]> {
        // m_Offset comes straight out of the file; checked arithmetic keeps a
        // corrupt (e.g. negative) offset from wrapping past the bounds check.
        let span = self
            .m_DataOffset
            .checked_add(info.m_Offset)
            .and_then(|start| Some((start, start.checked_add(info.m_Size as u64)?)))
            .filter(|&(_, end)| end <= data.len() as u64);
        let Some((start, end)) = span else {
            bail!(
                "object {} extends past the end of the file (offset {}, size {}, file {})",
                info.m_PathID,
                info.m_Offset,
                info.m_Size,
                data.len()
            );
        };
        Ok(&data[start as usize..end as usize])
    }
}

fn read_serialized_type(
    r: &mut EndianReader,
    version: u32,
    enable_type_tree: bool,
) -> Result<SerializedType> {
    let m_ClassID = r.i32()?;
    let m_IsStrippedType = r.bool()?;
    let m_ScriptTypeIndex = r.i16()?;
    if m_ClassID == CLASS_ID_MONO_BEHAVIOUR {
        r.bytes(16)?; // script id hash
    }
    r.bytes(16)?; // old type hash

    if enable_type_tree {
        // Embedded typetree blob: node array plus string buffer. Skipped,
        // the external schema is authoritative.
        let node_count = r.u32()? as u64;
        let string_buffer_size = r.u32()? as u64;
        let node_size = match version >= 19 {
            true => 32,
            false => 24,
        };
        r.skip(node_count * node_size + string_buffer_size)?;
        if version >= 21 {
            let dependency_count = r.u32()? as u64;
            r.skip(dependency_count * 4)?;
        }
    }

    Ok(SerializedType {
        m_ClassID,
        m_IsStrippedType,
        m_ScriptTypeIndex,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_file(version: u32, big_endian: bool) -> Vec<u8> {
        let mut meta = Vec::new();
        meta.extend_from_slice(b"2021.3.44f1\0");
        let int = |v: u32| match big_endian {
            true => v.to_be_bytes(),
            false => v.to_le_bytes(),
        };
        meta.extend_from_slice(&int(13)); // platform
        meta.push(0); // no embedded typetrees
        for _ in 0..4 {
            // types, objects, script types, externals
            meta.extend_from_slice(&int(0));
        }

        let data_offset = (20 + meta.len() as u32).next_multiple_of(16);
        let file_size = data_offset; // no object payloads
        let mut file = Vec::new();
        file.extend_from_slice(&(meta.len() as u32).to_be_bytes());
        file.extend_from_slice(&file_size.to_be_bytes());
        file.extend_from_slice(&version.to_be_bytes());
        file.extend_from_slice(&data_offset.to_be_bytes());
        file.push(big_endian as u8);
        file.extend_from_slice(&[0; 3]);
        file.extend_from_slice(&meta);
        file.resize(data_offset as usize, 0);
        file
    }

    /// v22 file with one TextAsset-classed object at the given offset.
    fn v22_file_with_object(offset: i64, size: u32) -> Vec<u8> {
        let mut meta = Vec::new();
        meta.extend_from_slice(b"2021.3.44f1\0");
        meta.extend_from_slice(&13u32.to_le_bytes()); // platform
        meta.push(0); // no embedded typetrees

        meta.extend_from_slice(&1u32.to_le_bytes());
        meta.extend_from_slice(&49i32.to_le_bytes()); // TextAsset
        meta.push(0); // not stripped
        meta.extend_from_slice(&(-1i16).to_le_bytes());
        meta.extend_from_slice(&[0u8; 16]); // old type hash

        meta.extend_from_slice(&1u32.to_le_bytes());
        while (48 + meta.len()) % 4 != 0 {
            meta.push(0);
        }
        meta.extend_from_slice(&1i64.to_le_bytes()); // path id
        meta.extend_from_slice(&offset.to_le_bytes());
        meta.extend_from_slice(&size.to_le_bytes());
        meta.extend_from_slice(&0i32.to_le_bytes()); // type index

        meta.extend_from_slice(&0u32.to_le_bytes()); // script types
        meta.extend_from_slice(&0u32.to_le_bytes()); // externals

        let data_offset = (48 + meta.len() as u64).next_multiple_of(16);
        let file_size = data_offset + 16;
        let mut file = Vec::new();
        file.extend_from_slice(&(meta.len() as u32).to_be_bytes());
        file.extend_from_slice(&0u32.to_be_bytes());
        file.extend_from_slice(&22u32.to_be_bytes());
        file.extend_from_slice(&0u32.to_be_bytes());
        file.push(0); // little endian
        file.extend_from_slice(&[0; 3]);
        file.extend_from_slice(&(meta.len() as u32).to_be_bytes());
        file.extend_from_slice(&file_size.to_be_bytes());
        file.extend_from_slice(&data_offset.to_be_bytes());
        file.extend_from_slice(&0i64.to_be_bytes());
        file.extend_from_slice(&meta);
        file.resize(file_size as usize, 0);
        file
    }

    #[test]
    fn parses_an_empty_little_endian_file() {
        let file = SerializedFile::from_reader(&empty_file(17, false)).unwrap();
        assert_eq!(file.m_Version, 17);
        assert_eq!(file.m_UnityVersion, "2021.3.44f1");
        assert_eq!(file.m_TargetPlatform, 13);
        assert!(!file.big_endian());
        assert!(file.m_Objects.is_empty());
        assert!(file.m_Externals.is_empty());
    }

    #[test]
    fn parses_big_endian_metadata() {
        let file = SerializedFile::from_reader(&empty_file(19, true)).unwrap();
        assert!(file.big_endian());
        assert_eq!(file.m_TargetPlatform, 13);
    }

    #[test]
    fn rejects_unsupported_versions() {
        for version in [5, 16, 23] {
            let err = SerializedFile::from_reader(&empty_file(version, false)).unwrap_err();
            assert!(err.to_string().contains("unsupported serialized file version"));
        }
    }

    #[test]
    fn rejects_truncated_headers() {
        assert!(SerializedFile::from_reader(&[0, 0, 1]).is_err());
    }

    #[test]
    fn slices_an_in_bounds_object() {
        let data = v22_file_with_object(0, 16);
        let file = SerializedFile::from_reader(&data).unwrap();
        let info = file.object_at(1).unwrap();
        assert_eq!(file.object_slice(info, &data).unwrap().len(), 16);
    }

    #[test]
    fn negative_object_offset_is_an_error() {
        let data = v22_file_with_object(-16, 4);
        let file = SerializedFile::from_reader(&data).unwrap();
        let info = file.object_at(1).unwrap();
        let err = file.object_slice(info, &data).unwrap_err();
        assert!(err.to_string().contains("extends past the end"));
    }

    #[test]
    fn oversized_object_is_an_error() {
        let data = v22_file_with_object(8, u32::MAX);
        let file = SerializedFile::from_reader(&data).unwrap();
        let info = file.object_at(1).unwrap();
        assert!(file.object_slice(info, &data).is_err());
    }
}
