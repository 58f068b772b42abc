//! `.trmsh` mesh set.

use veles_common::flatbuffer::{FlatBufferBuilder, Table, TableBuilder};

use crate::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrinityMesh {
    pub name: String,
}

/// Decoded `.trmsh`: submeshes plus the `.trmbf` holding their buffers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrinityMeshSet {
    pub version: i32,
    pub meshes: Vec<TrinityMesh>,
    pub buffer_file_path: Option<String>,
}

impl TrinityMeshSet {
    pub fn parse(data: &[u8]) -> Result<Self> {
        decode(data).map_err(Error::decode("trmsh"))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let meshes = self
            .meshes
            .iter()
            .map(|mesh| {
                let mut t = TableBuilder::new();
                t.add_string(0, &mesh.name);
                t
            })
            .collect();

        let mut root = TableBuilder::new();
        root.add_i32(0, self.version).add_vector_tables(1, meshes);
        if let Some(path) = &self.buffer_file_path {
            root.add_string(2, path);
        }
        FlatBufferBuilder::finish(&root)
    }
}

fn decode(data: &[u8]) -> veles_common::Result<TrinityMeshSet> {
    let root = Table::root(data)?;
    let meshes = root
        .vector_tables(1)?
        .iter()
        .map(|t| {
            Ok(TrinityMesh {
                name: t.string(0)?.unwrap_or_default().to_string(),
            })
        })
        .collect::<veles_common::Result<Vec<_>>>()?;

    Ok(TrinityMeshSet {
        version: root.i32(0, 0)?,
        meshes,
        buffer_file_path: root
            .string(2)?
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string),
    })
}
