//! Neo4j dump import (spec §6): unpacks a Zstandard-compressed archive,
//! reads the `neostore.nodestore.db`/`neostore.relationshipstore.db`
//! record-store files it contains, and materializes live records as bare
//! nodes and relationships.
//!
//! Neo4j's record stores are fixed-width binary files where a record's
//! position *is* its id and the low bit of the first byte is the `inUse`
//! flag; this is the one part of the format stable enough across versions
//! to decode without also parsing the token store (label/type names) and
//! property store (dynamic string/array chains), which this import does
//! not attempt — imported nodes and relationships come back unlabeled and
//! propertyless. Constraints and native indexes are never in the dump in
//! the first place (§6) and are not recreated here either.

use std::io::Read;
use std::path::Path;

use grafito_model::{Error, NodeId, Result};

use crate::session::Session;

const NODE_RECORD_SIZE: usize = 9;
const RELATIONSHIP_RECORD_SIZE: usize = 33;
const PLACEHOLDER_LABEL: &str = "Neo4jImported";
const PLACEHOLDER_REL_TYPE: &str = "RELATED";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportStats {
    pub nodes_imported: usize,
    pub relationships_imported: usize,
}

/// Imports `archive_path` into `session`. The archive is decompressed
/// wholesale with `zstd`, then walked as a POSIX ustar stream (the format
/// `neo4j-admin dump` wraps its store files in) looking for the node and
/// relationship store entries.
pub fn import_dump(archive_path: &Path, session: &Session) -> Result<ImportStats> {
    let compressed = std::fs::read(archive_path)?;
    let archive = zstd::stream::decode_all(compressed.as_slice())
        .map_err(|e| Error::import(format!("failed to decompress {}: {e}", archive_path.display())))?;

    let mut stats = ImportStats::default();
    let mut node_ids: Vec<NodeId> = Vec::new();

    for entry in read_tar_entries(&archive)? {
        if entry.name.ends_with("neostore.nodestore.db") {
            node_ids = import_nodes(session, &entry.data)?;
            stats.nodes_imported = node_ids.len();
        } else if entry.name.ends_with("neostore.relationshipstore.db") {
            stats.relationships_imported = import_relationships(session, &entry.data, &node_ids)?;
        }
    }

    Ok(stats)
}

fn import_nodes(session: &Session, data: &[u8]) -> Result<Vec<NodeId>> {
    let mut ids = Vec::new();
    for record in data.chunks_exact(NODE_RECORD_SIZE) {
        if record[0] & 0x1 == 0 {
            continue;
        }
        let node = session.create_node(&[PLACEHOLDER_LABEL.to_string()], Default::default())?;
        ids.push(node.id);
    }
    Ok(ids)
}

fn import_relationships(session: &Session, data: &[u8], node_ids: &[NodeId]) -> Result<usize> {
    let mut count = 0;
    for record in data.chunks_exact(RELATIONSHIP_RECORD_SIZE) {
        if record[0] & 0x1 == 0 {
            continue;
        }
        let source_raw = u32::from_le_bytes([record[1], record[2], record[3], record[4]]);
        let target_raw = u32::from_le_bytes([record[5], record[6], record[7], record[8]]);
        let (Some(&source), Some(&target)) =
            (node_ids.get(source_raw as usize), node_ids.get(target_raw as usize))
        else {
            continue;
        };
        session.create_relationship(source, target, PLACEHOLDER_REL_TYPE, Default::default())?;
        count += 1;
    }
    Ok(count)
}

struct TarEntry {
    name: String,
    data: Vec<u8>,
}

/// Minimal POSIX ustar reader: enough to walk a flat archive of named
/// files, ignoring anything that isn't a regular file. No external tar
/// crate is part of this workspace's dependency stack, and the format
/// is simple enough (512-byte header blocks, octal-encoded size field)
/// to read directly.
fn read_tar_entries(archive: &[u8]) -> Result<Vec<TarEntry>> {
    const BLOCK: usize = 512;
    let mut entries = Vec::new();
    let mut offset = 0;

    while offset + BLOCK <= archive.len() {
        let header = &archive[offset..offset + BLOCK];
        if header.iter().all(|&b| b == 0) {
            break;
        }

        let name = read_tar_string(&header[0..100]);
        let size = read_tar_octal(&header[124..136])?;
        let typeflag = header[156];

        offset += BLOCK;
        let data_start = offset;
        let data_end = data_start + size;
        if data_end > archive.len() {
            return Err(Error::import("truncated tar entry in Neo4j dump archive"));
        }

        if typeflag == b'0' || typeflag == 0 {
            entries.push(TarEntry { name, data: archive[data_start..data_end].to_vec() });
        }

        offset += size.div_ceil(BLOCK) * BLOCK;
    }

    Ok(entries)
}

fn read_tar_string(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).to_string()
}

fn read_tar_octal(field: &[u8]) -> Result<usize> {
    let text = read_tar_string(field);
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(0);
    }
    usize::from_str_radix(trimmed, 8).map_err(|e| Error::import(format!("malformed tar size field: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn build_tar_entry(name: &str, data: &[u8]) -> Vec<u8> {
        let mut header = vec![0u8; 512];
        header[0..name.len()].copy_from_slice(name.as_bytes());
        let size_field = format!("{:011o}\0", data.len());
        header[124..124 + size_field.len()].copy_from_slice(size_field.as_bytes());
        header[156] = b'0';

        let mut out = header;
        out.extend_from_slice(data);
        let padding = data.len().div_ceil(512) * 512 - data.len();
        out.extend(std::iter::repeat_n(0u8, padding));
        out
    }

    #[test]
    fn reads_back_entries_it_wrote() {
        let mut archive = Vec::new();
        archive.extend(build_tar_entry("neostore.nodestore.db", &[0x01; 9 * 3]));
        archive.extend(vec![0u8; 1024]);

        let entries = read_tar_entries(&archive).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "neostore.nodestore.db");
        assert_eq!(entries[0].data.len(), 27);
    }

    #[test]
    fn node_record_inuse_bit_gates_import() {
        let mut data = vec![0u8; NODE_RECORD_SIZE * 2];
        data[0] = 0x01; // first record in use
        // second record's inUse bit left clear
        let mut file = Vec::new();
        file.write_all(&data).unwrap();
        assert_eq!(file.chunks_exact(NODE_RECORD_SIZE).filter(|r| r[0] & 1 != 0).count(), 1);
    }
}
