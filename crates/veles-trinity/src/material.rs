//! `.trmtr` material set.

use veles_common::flatbuffer::{FlatBufferBuilder, Table, TableBuilder};

use crate::{Error, Result};

/// A texture bound to a material slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrinityTexture {
    /// Shader parameter name (e.g. `BaseColorMap`).
    pub name: String,
    /// Path of the `.bntx` file.
    pub file: String,
    pub slot: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrinityMaterial {
    pub name: String,
    pub textures: Vec<TrinityTexture>,
}

/// Decoded `.trmtr`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrinityMaterialSet {
    pub field_00: i32,
    pub materials: Vec<TrinityMaterial>,
}

impl TrinityMaterialSet {
    pub fn parse(data: &[u8]) -> Result<Self> {
        decode(data).map_err(Error::decode("trmtr"))
    }

    /// Non-empty texture file paths, one per texture slot, in material order.
    pub fn texture_files(&self) -> impl Iterator<Item = &str> + '_ {
        self.materials
            .iter()
            .flat_map(|m| m.textures.iter())
            .map(|t| t.file.as_str())
            .filter(|f| !f.trim().is_empty())
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let materials = self
            .materials
            .iter()
            .map(|material| {
                let textures = material
                    .textures
                    .iter()
                    .map(|tex| {
                        let mut t = TableBuilder::new();
                        t.add_string(0, &tex.name)
                            .add_string(1, &tex.file)
                            .add_u32(2, tex.slot);
                        t
                    })
                    .collect();
                let mut t = TableBuilder::new();
                t.add_string(0, &material.name).add_vector_tables(2, textures);
                t
            })
            .collect();

        let mut root = TableBuilder::new();
        root.add_i32(0, self.field_00).add_vector_tables(1, materials);
        FlatBufferBuilder::finish(&root)
    }
}

fn decode(data: &[u8]) -> veles_common::Result<TrinityMaterialSet> {
    let root = Table::root(data)?;
    let mut materials = Vec::new();
    for material in root.vector_tables(1)? {
        let textures = material
            .vector_tables(2)?
            .iter()
            .map(|t| {
                Ok(TrinityTexture {
                    name: t.string(0)?.unwrap_or_default().to_string(),
                    file: t.string(1)?.unwrap_or_default().to_string(),
                    slot: t.u32(2, 0)?,
                })
            })
            .collect::<veles_common::Result<Vec<_>>>()?;
        materials.push(TrinityMaterial {
            name: material.string(0)?.unwrap_or_default().to_string(),
            textures,
        });
    }

    Ok(TrinityMaterialSet {
        field_00: root.i32(0, 0)?,
        materials,
    })
}
