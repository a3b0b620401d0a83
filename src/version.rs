/// Package name as published in the dataset manifest.
pub const PACKAGE_NAME: &str = "difumo_segmentation";

/// Where the code that generated a derivative dataset lives.
pub const CODE_URL: &str = "https://github.com/SIMEXP/difumo_segmentation";

/// Version of this software, taken from the Cargo manifest at build time.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
