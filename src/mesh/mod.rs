//! Surface meshes and their vertex adjacency
//!
//! - `adjacency`: sparse adjacency matrix, template lookup and cache
//! - `icosphere`: synthetic sphere tessellations

pub mod adjacency;
mod icosphere;

pub use adjacency::{mesh_adjacency, AdjacencyCache, AdjacencyMatrix};
pub use icosphere::icosphere;

pub use crate::io::gifti::SurfaceMesh;

#[cfg(test)]
pub(crate) mod fixtures {
    use std::path::Path;

    use super::icosphere;
    use crate::assets::{AssetKey, DirectoryResolver, Hemisphere};
    use crate::io::gifti::write_surface;

    /// Write sphere and midthickness templates for `hemi` under `root`.
    pub(crate) fn write_template_dir(root: &Path, hemi: Hemisphere, subdivisions: usize) {
        let resolver = DirectoryResolver::new(root);
        let mesh = icosphere(subdivisions);
        for key in [AssetKey::sphere(hemi), AssetKey::midthickness(hemi)] {
            let path = resolver.path_for(&key);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            write_surface(&path, &mesh).unwrap();
        }
    }
}
