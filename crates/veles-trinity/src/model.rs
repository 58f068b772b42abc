//! `.trmdl` model descriptor.

use veles_common::flatbuffer::{FlatBufferBuilder, Table, TableBuilder};

use crate::{Error, Result};

/// One level of detail: indices into the model's mesh list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModelLod {
    pub entries: Vec<i32>,
    pub lod_type: String,
}

/// Decoded `.trmdl`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrinityModel {
    pub field_00: i32,
    /// Paths of the `.trmsh` files.
    pub meshes: Vec<String>,
    /// Path of the `.trskl` file.
    pub skeleton: Option<String>,
    /// Paths of the `.trmtr` files.
    pub materials: Vec<String>,
    pub lods: Vec<ModelLod>,
}

impl TrinityModel {
    pub fn parse(data: &[u8]) -> Result<Self> {
        decode(data).map_err(Error::decode("trmdl"))
    }

    /// A model with neither meshes nor a skeleton carries nothing to extract.
    pub fn has_content(&self) -> bool {
        !self.meshes.is_empty() || self.skeleton.is_some()
    }

    /// Every path the model references: meshes, materials, then skeleton.
    pub fn references(&self) -> impl Iterator<Item = &str> + '_ {
        self.meshes
            .iter()
            .chain(&self.materials)
            .chain(&self.skeleton)
            .map(String::as_str)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let meshes = self
            .meshes
            .iter()
            .map(|path| {
                let mut t = TableBuilder::new();
                t.add_string(0, path);
                t
            })
            .collect();
        let lods = self
            .lods
            .iter()
            .map(|lod| {
                let entries = lod
                    .entries
                    .iter()
                    .map(|&index| {
                        let mut t = TableBuilder::new();
                        t.add_i32(0, index);
                        t
                    })
                    .collect();
                let mut t = TableBuilder::new();
                t.add_vector_tables(0, entries).add_string(1, &lod.lod_type);
                t
            })
            .collect();

        let mut root = TableBuilder::new();
        root.add_i32(0, self.field_00)
            .add_vector_tables(1, meshes)
            .add_vector_strings(3, &self.materials)
            .add_vector_tables(4, lods);
        if let Some(skeleton) = &self.skeleton {
            let mut t = TableBuilder::new();
            t.add_string(0, skeleton);
            root.add_table(2, t);
        }
        FlatBufferBuilder::finish(&root)
    }
}

fn decode(data: &[u8]) -> veles_common::Result<TrinityModel> {
    let root = Table::root(data)?;

    let mut meshes = Vec::new();
    for mesh in root.vector_tables(1)? {
        if let Some(path) = mesh.string(0)?.filter(|s| !s.trim().is_empty()) {
            meshes.push(path.to_string());
        }
    }

    let skeleton = match root.table(2)? {
        Some(t) => t
            .string(0)?
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string),
        None => None,
    };

    let materials = root
        .vector_strings(3)?
        .into_iter()
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
        .collect();

    let lods = root
        .vector_tables(4)?
        .iter()
        .map(|t| {
            let entries = t
                .vector_tables(0)?
                .iter()
                .map(|e| e.i32(0, 0))
                .collect::<veles_common::Result<Vec<_>>>()?;
            Ok(ModelLod {
                entries,
                lod_type: t.string(1)?.unwrap_or_default().to_string(),
            })
        })
        .collect::<veles_common::Result<Vec<_>>>()?;

    Ok(TrinityModel {
        field_00: root.i32(0, 0)?,
        meshes,
        skeleton,
        materials,
        lods,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TrinityModel {
        TrinityModel {
            field_00: 1,
            meshes: vec!["pm0025_00.trmsh".into(), "pm0025_00_lod1.trmsh".into()],
            skeleton: Some("pm0025_00.trskl".into()),
            materials: vec!["pm0025_00.trmtr".into()],
            lods: vec![ModelLod {
                entries: vec![0],
                lod_type: "Custom".into(),
            }],
        }
    }

    #[test]
    fn test_roundtrip() {
        let model = sample();
        let parsed = TrinityModel::parse(&model.to_bytes()).unwrap();

        assert_eq!(parsed, model);
        assert!(parsed.has_content());
        assert_eq!(
            parsed.references().collect::<Vec<_>>(),
            vec![
                "pm0025_00.trmsh",
                "pm0025_00_lod1.trmsh",
                "pm0025_00.trmtr",
                "pm0025_00.trskl"
            ]
        );
    }

    #[test]
    fn test_blank_references_dropped() {
        let model = TrinityModel {
            meshes: vec!["  ".into()],
            skeleton: Some(String::new()),
            materials: vec![String::new()],
            ..Default::default()
        };
        let parsed = TrinityModel::parse(&model.to_bytes()).unwrap();

        assert!(parsed.meshes.is_empty());
        assert!(parsed.skeleton.is_none());
        assert!(parsed.materials.is_empty());
        assert!(!parsed.has_content());
    }

    #[test]
    fn test_garbage_is_error() {
        let result = TrinityModel::parse(b"definitely not a flatbuffer");
        assert!(matches!(result, Err(Error::Decode { schema: "trmdl", .. })));
    }
}
