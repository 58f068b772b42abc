//! Trinity engine model schemas.
//!
//! These are the self-describing FlatBuffer files whose references form an
//! asset's dependency graph:
//!
//! - [`TrinityModel`] (`.trmdl`) - mesh files, material files, skeleton, LODs
//! - [`TrinityMeshSet`] (`.trmsh`) - submesh names and the raw buffer file
//! - [`TrinityMaterialSet`] (`.trmtr`) - materials and their texture files
//!
//! Only the fields needed to walk references and report counts are decoded.

mod error;
mod material;
mod mesh;
mod model;

pub use error::{Error, Result};
pub use material::{TrinityMaterial, TrinityMaterialSet, TrinityTexture};
pub use mesh::{TrinityMesh, TrinityMeshSet};
pub use model::{ModelLod, TrinityModel};

/// File extensions of the schemas in this crate.
pub mod ext {
    pub const MODEL: &str = ".trmdl";
    pub const MESH: &str = ".trmsh";
    pub const MATERIAL: &str = ".trmtr";
    pub const SKELETON: &str = ".trskl";
    pub const MESH_BUFFER: &str = ".trmbf";
    pub const TEXTURE: &str = ".bntx";
    pub const ANIMATION: &str = ".tranm";
}
