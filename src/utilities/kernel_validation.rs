use crate::utilities::enums::Kernel;
use pyo3::exceptions::PyValueError;
use pyo3::prelude::*;

/// Maps the Python `kernel=` argument onto [`Kernel`].
///
/// Accepts `None`/`"auto"`, `"scalar"` and `"scalar_batch"` (case-insensitive). With
/// `batch = true` a plain `"scalar"` request is promoted to its batch form.
pub fn validate_kernel(kernel: Option<&str>, batch: bool) -> PyResult<Kernel> {
    let k = match kernel.map(|s| s.trim().to_ascii_lowercase()) {
        None => Kernel::Auto,
        Some(s) => match s.as_str() {
            "" | "auto" => Kernel::Auto,
            "scalar" => Kernel::Scalar,
            "scalar_batch" | "batch" => Kernel::ScalarBatch,
            other => {
                return Err(PyValueError::new_err(format!(
                    "unknown kernel '{}': expected 'auto', 'scalar' or 'scalar_batch'",
                    other
                )))
            }
        },
    };
    Ok(match (k, batch) {
        (Kernel::Scalar, true) => Kernel::ScalarBatch,
        (k, _) => k,
    })
}
