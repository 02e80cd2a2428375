pub mod data_loader;
pub mod enums;
pub mod helpers;
pub mod math_functions;

#[cfg(feature = "python")]
pub mod kernel_validation;
