use pyo3::exceptions::{PyRuntimeError, PyValueError};
use pyo3::prelude::*;
use tps_georef::{Gcp, NumThreads, TpsOptions, TpsTransformer};

#[pymodule]
#[pyo3(name = "tps_georef")]
fn tps_georef_py(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<PyTpsTransformer>()?;
    m.add_function(wrap_pyfunction!(basis_function, m)?)?;
    Ok(())
}

fn runtime_error(context: &str, e: tps_georef::TpsError) -> PyErr {
    PyErr::new::<PyRuntimeError, _>(format!("{}: {}", context, e))
}

fn options(num_threads: Option<&str>) -> PyResult<TpsOptions> {
    match num_threads {
        Some(value) => NumThreads::parse(value)
            .map(TpsOptions::with_num_threads)
            .map_err(|e| PyErr::new::<PyValueError, _>(e.to_string())),
        None => Ok(TpsOptions::default()),
    }
}

/// GCPs are `(pixel, line, x, y)` tuples.
#[pyclass(name = "TpsTransformer", frozen)]
pub struct PyTpsTransformer {
    inner: TpsTransformer,
}

#[pymethods]
impl PyTpsTransformer {
    #[new]
    #[pyo3(signature = (gcps, reversed=false, num_threads=None))]
    fn new(gcps: Vec<(f64, f64, f64, f64)>, reversed: bool, num_threads: Option<&str>) -> PyResult<Self> {
        let gcps: Vec<Gcp> = gcps
            .into_iter()
            .enumerate()
            .map(|(i, (pixel, line, x, y))| Gcp::new((i + 1).to_string(), pixel, line, x, y))
            .collect();

        let inner = TpsTransformer::new(&gcps, reversed, &options(num_threads)?)
            .map_err(|e| runtime_error("Failed to build TPS transformer", e))?;
        Ok(Self { inner })
    }

    #[staticmethod]
    #[pyo3(signature = (text, num_threads=None))]
    fn from_xml(text: &str, num_threads: Option<&str>) -> PyResult<Self> {
        let inner = TpsTransformer::from_xml_str(text, &options(num_threads)?)
            .map_err(|e| runtime_error("Failed to deserialize TPS transformer", e))?;
        Ok(Self { inner })
    }

    fn to_xml(&self) -> PyResult<String> {
        self.inner
            .to_xml_string()
            .map_err(|e| runtime_error("Failed to serialize TPS transformer", e))
    }

    #[pyo3(signature = (points, dst_to_src=false))]
    fn transform(&self, py: Python<'_>, points: Vec<(f64, f64)>, dst_to_src: bool) -> Vec<(f64, f64)> {
        let mut points = points;
        py.allow_threads(|| self.inner.transform_points_par(dst_to_src, &mut points));
        points
    }

    #[getter]
    fn reversed(&self) -> bool {
        self.inner.is_reversed()
    }

    #[getter]
    fn gcp_count(&self) -> usize {
        self.inner.gcps().len()
    }

    fn __repr__(&self) -> String {
        format!(
            "TpsTransformer(gcps={}, reversed={})",
            self.inner.gcps().len(),
            self.inner.is_reversed()
        )
    }
}

#[pyfunction]
pub fn basis_function(x1: f64, y1: f64, x2: f64, y2: f64) -> f64 {
    tps_georef::basis_function(x1, y1, x2, y2)
}
