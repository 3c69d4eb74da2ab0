//! Document operations for pdfdock.
//!
//! Page-level operations (merge, split, rotate, watermark, images-to-PDF and
//! the compression fallback) run in process on `lopdf`, with `image`
//! decoding rasters. Compression prefers Ghostscript or qpdf, protection
//! needs qpdf and office conversion needs LibreOffice; those are found on
//! the `PATH` at execution time.
//!
//! ```ignore
//! let registry = pdfdock_ops::registry(Toolbox::from_env(settings.tool_timeout()));
//! let runtime = Runtime::init(settings, registry).await?;
//! ```

pub mod compress;
pub mod images;
pub mod merge;
pub mod office;
mod pdf;
pub mod protect;
mod raster;
pub mod rotate;
pub mod split;
pub mod tool;
pub mod watermark;

pub use compress::Compress;
pub use images::ImagesToPdf;
pub use merge::Merge;
pub use office::{PptxToPdf, WordToPdf};
pub use protect::Protect;
pub use rotate::Rotate;
pub use split::Split;
pub use tool::{ToolError, Toolbox};
pub use watermark::Watermark;

use pdfdock_jobs::Registry;

/// Registry holding every operation this crate implements.
pub fn registry(tools: Toolbox) -> Registry {
    Registry::new()
        .register(Merge)
        .register(Split)
        .register(Rotate)
        .register(Watermark)
        .register(ImagesToPdf)
        .register(Compress::new(tools.clone()))
        .register(Protect::new(tools.clone()))
        .register(WordToPdf::new(tools.clone()))
        .register(PptxToPdf::new(tools))
}
