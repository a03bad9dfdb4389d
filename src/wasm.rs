//! Browser exports over flat row-major buffers

use ndarray::ArrayView2;
use wasm_bindgen::prelude::*;

use crate::alff::compute_alff;
use crate::config::AlffParams;
use crate::connectivity::correlation_matrix;
use crate::error::Error;
use crate::mesh::AdjacencyMatrix;
use crate::reho::compute_reho;

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = console)]
    fn log(s: &str);
}

macro_rules! console_log {
    ($($t:tt)*) => (log(&format_args!($($t)*).to_string()))
}

fn to_js(err: Error) -> JsValue {
    JsValue::from_str(&err.to_string())
}

fn matrix<'a>(data: &'a [f64], rows: usize, cols: usize) -> Result<ArrayView2<'a, f64>, JsValue> {
    ArrayView2::from_shape((rows, cols), data).map_err(|_| {
        to_js(Error::ShapeMismatch {
            what: "flat buffer length",
            expected: vec![rows * cols],
            found: vec![data.len()],
        })
    })
}

/// Install the panic hook so panics reach the browser console
#[wasm_bindgen(start)]
pub fn init() {
    console_error_panic_hook::set_once();
}

/// ReHo over a mesh given as flat face triples
///
/// # Arguments
/// * `data` - Float64Array, (n_vertices * n_timepoints), vertex-major
/// * `faces` - Uint32Array of vertex index triples
///
/// # Returns
/// One value per vertex
#[wasm_bindgen]
pub fn reho_wasm(
    data: &[f64],
    n_vertices: usize,
    n_timepoints: usize,
    faces: &[u32],
) -> Result<Vec<f64>, JsValue> {
    console_log!("WASM ReHo: {} vertices x {} timepoints, {} faces", n_vertices, n_timepoints, faces.len() / 3);

    let data = matrix(data, n_vertices, n_timepoints)?;
    let faces: Vec<[usize; 3]> = faces
        .chunks_exact(3)
        .map(|f| [f[0] as usize, f[1] as usize, f[2] as usize])
        .collect();
    let adjacency = AdjacencyMatrix::from_faces(n_vertices, &faces).map_err(to_js)?;
    let reho = compute_reho(data, &adjacency).map_err(to_js)?;

    console_log!("WASM ReHo complete");
    Ok(reho.to_vec())
}

/// ALFF of every row; `high_pass` is the lower band edge
#[wasm_bindgen]
pub fn alff_wasm(
    data: &[f64],
    n_locations: usize,
    n_timepoints: usize,
    tr: f64,
    low_pass: f64,
    high_pass: f64,
) -> Result<Vec<f64>, JsValue> {
    console_log!("WASM ALFF: {}x{}, TR={:.3}, band=[{:.3}, {:.3}]", n_locations, n_timepoints, tr, high_pass, low_pass);

    let data = matrix(data, n_locations, n_timepoints)?;
    let params = AlffParams { tr, low_pass, high_pass };
    let alff = compute_alff(data, &params).map_err(to_js)?;

    console_log!("WASM ALFF complete");
    Ok(alff.iter().cloned().collect())
}

/// Region-by-region Pearson correlation of a (timepoints, regions) buffer
#[wasm_bindgen]
pub fn correlation_wasm(timeseries: &[f64], n_timepoints: usize, n_regions: usize) -> Result<Vec<f64>, JsValue> {
    console_log!("WASM correlation: {} timepoints x {} regions", n_timepoints, n_regions);

    let timeseries = matrix(timeseries, n_timepoints, n_regions)?;
    Ok(correlation_matrix(timeseries).iter().cloned().collect())
}
