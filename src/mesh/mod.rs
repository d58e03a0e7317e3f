mod code;
mod grid;

pub use code::mesh_code;
pub use grid::{GridTiler, MeshCell, NATIONAL_BBOX, Tiling};

pub(crate) use code::{CELL_LAT_SEC, CELL_LON_SEC};
