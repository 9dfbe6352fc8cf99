/// Concrete transforms
///
/// Each adapter reads one record's file, writes its result through `Outputs`
/// and reports any problem as a `TransformError`. None of them touch records
/// or the session directly.

pub mod border;
pub mod codec;
pub mod convert;
pub mod denoise;
pub mod document;
pub mod grid;
pub mod io;
pub mod resize;
pub mod units;

pub use border::{BorderMode, EditBorder};
pub use convert::{Subsampling, ToAvif, ToJpeg};
pub use denoise::Denoise;
pub use document::{export_document, DocumentExport, DocumentFormat, DocumentParams, PdfImages};
pub use grid::GridSlice;
pub use io::{collect_sources, Export, Import};
pub use resize::Resize;
pub use units::ScaleUnit;
