#![allow(clippy::needless_range_loop)]

pub mod cuda;
pub mod utilities;
pub mod writhe;


pub mod bindings {
    #[cfg(feature = "python")]
    pub mod python;
}
