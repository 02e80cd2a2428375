use pyo3::prelude::*;

#[cfg(feature = "python")]
use crate::writhe::dispatch::calc_writhe_parallel_py;
#[cfg(feature = "python")]
use crate::writhe::kernel::writhe_py;
#[cfg(feature = "python")]
use crate::writhe::memory::peak_mem_writhe_py;
#[cfg(feature = "python")]
use crate::writhe::segments::writhe_segments_py;

#[pymodule]
fn vector_writhe(m: &Bound<'_, PyModule>) -> PyResult<()> {
	// Segment-pair enumeration
	m.add_function(wrap_pyfunction!(writhe_segments_py, m)?)?;

	// Single-process writhe over every non-adjacent pair
	m.add_function(wrap_pyfunction!(writhe_py, m)?)?;

	// Memory model and chunked multi-device evaluation
	m.add_function(wrap_pyfunction!(peak_mem_writhe_py, m)?)?;
	m.add_function(wrap_pyfunction!(calc_writhe_parallel_py, m)?)?;

	m.add("cuda_available", crate::cuda::cuda_available())?;

	Ok(())
}
