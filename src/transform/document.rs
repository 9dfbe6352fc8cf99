//! Paginated documents: export a batch to one PDF or Word file, and pull the
//! embedded JPEG images out of a PDF.
//!
//! Export prepares every page in parallel (decode, flatten, JPEG-encode), so a
//! bad image only drops its own page. The document itself is assembled
//! sequentially, in batch order.

use docx_rs::{BreakType, Docx, PageMargin, Paragraph, Pic, Run};
use image::ImageFormat;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::codec::{jpeg_bytes, open_image};
use crate::color::{flatten, WHITE};
use crate::config::DEFAULT_DPI;
use crate::error::{PipelineError, SharedSource, TransformError};
use crate::pipeline::contract::{Derivation, ExecutionMode, Outputs, Transform};
use crate::pipeline::executor::Executor;
use crate::state::partition::OutcomePartition;
use crate::state::record::ImageRecord;

const PAGE_JPEG_QUALITY: u8 = 90;
const POINTS_PER_INCH: f32 = 72.0;
const EMU_PER_INCH: u64 = 914_400;
const TWIPS_PER_INCH: u64 = 1_440;
/// Longest side, in pixels, a rendered PDF page may have
const MAX_RENDER_SIDE: i32 = 20_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Pdf,
    Word,
}

impl DocumentFormat {
    pub fn extension(self) -> &'static str {
        match self {
            DocumentFormat::Pdf => "pdf",
            DocumentFormat::Word => "docx",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DocumentParams {
    pub output_dir: PathBuf,
    /// Without extension
    pub file_name: String,
    /// Page size is the image's pixel size at this resolution
    pub dpi: u32,
}

impl DocumentParams {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
            file_name: "images".to_string(),
            dpi: DEFAULT_DPI,
        }
    }

    fn path(&self, format: DocumentFormat) -> PathBuf {
        self.output_dir
            .join(format!("{}.{}", self.file_name, format.extension()))
    }
}

/// Result of a document export
#[derive(Debug)]
pub struct DocumentExport {
    /// Where the document was written; None when no page could be prepared
    pub path: Option<PathBuf>,
    /// Pages that made it in are in `succeeded_new`, unchanged
    pub partition: OutcomePartition,
}

/// One page, ready to embed
#[derive(Debug, Clone)]
struct PreparedPage {
    width: u32,
    height: u32,
    jpeg: Vec<u8>,
}

fn prepare_page(record: &ImageRecord, dpi: u32) -> Result<PreparedPage, TransformError> {
    let image = open_image(&record.current_path)?;
    let rgb = flatten(&image, WHITE);
    let jpeg = jpeg_bytes(&rgb, PAGE_JPEG_QUALITY, dpi)
        .map_err(|e| TransformError::resource(&record.current_path, "encode", e))?;
    Ok(PreparedPage {
        width: rgb.width(),
        height: rgb.height(),
        jpeg,
    })
}

/// Write `batch` into a single document, one image per page
///
/// # Arguments
/// * `executor` - Pool used to decode and encode the pages
/// * `batch` - Records to export, in page order
/// * `format` - PDF or Word
/// * `params` - Output location, file name and page resolution
///
/// # Returns
/// * The document path (None when nothing was written) and the page outcomes.
/// Records are never modified. `Err` only for a worker defect.
pub async fn export_document(
    executor: &Executor,
    batch: &[ImageRecord],
    format: DocumentFormat,
    params: &DocumentParams,
) -> Result<DocumentExport, PipelineError> {
    let dpi = params.dpi.max(1);
    let prepared = executor
        .execute(ExecutionMode::Cpu, batch.to_vec(), move |record| prepare_page(record, dpi))
        .await?;

    let mut partition = OutcomePartition::default();
    let mut pages = Vec::new();
    for (record, page) in batch.iter().zip(prepared) {
        match page {
            Ok(page) => {
                pages.push(page);
                partition.succeeded_new.push(record.clone());
            }
            Err(err) => {
                warn!(record = %record.id, error = %err, "Page skipped");
                partition.failed.push(record.clone().into_failed(err));
            }
        }
    }

    if pages.is_empty() {
        return Ok(DocumentExport {
            path: None,
            partition,
        });
    }

    let path = params.path(format);
    let written = tokio::task::spawn_blocking({
        let path = path.clone();
        move || write_document(format, &pages, dpi, &path)
    })
    .await?;

    match written {
        Ok(()) => {
            info!(path = %path.display(), pages = partition.succeeded_new.len(), "Document written");
            Ok(DocumentExport {
                path: Some(path),
                partition,
            })
        }
        Err(err) => {
            warn!(path = %path.display(), error = %err, "Document could not be written");
            // Nothing reached the output, so every page failed
            let mut failed: Vec<ImageRecord> = partition
                .succeeded_new
                .drain(..)
                .map(|record| record.into_failed(err.clone()))
                .collect();
            failed.append(&mut partition.failed);
            Ok(DocumentExport {
                path: None,
                partition: OutcomePartition {
                    failed,
                    ..Default::default()
                },
            })
        }
    }
}

fn write_document(
    format: DocumentFormat,
    pages: &[PreparedPage],
    dpi: u32,
    path: &Path,
) -> Result<(), TransformError> {
    std::fs::create_dir_all(path.parent().unwrap_or(Path::new(".")))
        .map_err(|e| TransformError::resource(path, "create directory for", e))?;

    let result = match format {
        DocumentFormat::Pdf => write_pdf(pages, dpi, path),
        DocumentFormat::Word => write_docx(pages, dpi, path),
    };
    if result.is_err() {
        let _ = std::fs::remove_file(path);
    }
    result
}

fn points(pixels: u32, dpi: u32) -> f32 {
    pixels as f32 * POINTS_PER_INCH / dpi as f32
}

fn write_pdf(pages: &[PreparedPage], dpi: u32, path: &Path) -> Result<(), TransformError> {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let mut kids: Vec<Object> = Vec::with_capacity(pages.len());

    for page in pages {
        let (w, h) = (points(page.width, dpi), points(page.height, dpi));

        let image = Stream::new(
            dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => page.width as i64,
                "Height" => page.height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            page.jpeg.clone(),
        )
        .with_compression(false);
        let image_id = doc.add_object(image);

        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new("cm", vec![w.into(), 0.into(), 0.into(), h.into(), 0.into(), 0.into()]),
                Operation::new("Do", vec!["Im0".into()]),
                Operation::new("Q", vec![]),
            ],
        };
        let encoded = content
            .encode()
            .map_err(|e| TransformError::resource(path, "encode page of", e))?;
        let content_id = doc.add_object(Stream::new(dictionary! {}, encoded));

        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "MediaBox" => vec![0.into(), 0.into(), w.into(), h.into()],
            "Contents" => content_id,
            "Resources" => dictionary! {
                "XObject" => dictionary! { "Im0" => image_id },
            },
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    doc.save(path)
        .map(|_| ())
        .map_err(|e| TransformError::resource(path, "write", e))
}

/// `pixels` at `dpi` in a unit with `per_inch` steps per inch. Word stores
/// these as 32-bit values.
fn word_units(pixels: u32, per_inch: u64, dpi: u32) -> Result<u32, TransformError> {
    u32::try_from(pixels as u64 * per_inch / dpi.max(1) as u64).map_err(|_| {
        TransformError::unsupported(
            "dpi",
            format!("{dpi} ({pixels} px is too large for a Word page)"),
        )
    })
}

fn write_docx(pages: &[PreparedPage], dpi: u32, path: &Path) -> Result<(), TransformError> {
    let emu = |px: u32| word_units(px, EMU_PER_INCH, dpi);
    let twips = |px: u32| word_units(px, TWIPS_PER_INCH, dpi);

    // Word has one page size per section; size it for the largest page
    let page_w = pages.iter().map(|p| p.width).max().unwrap_or(1);
    let page_h = pages.iter().map(|p| p.height).max().unwrap_or(1);

    let mut docx = Docx::new()
        .page_size(twips(page_w)?, twips(page_h)?)
        .page_margin(PageMargin::new().top(0).bottom(0).left(0).right(0));

    for (index, page) in pages.iter().enumerate() {
        let pic = Pic::new(&page.jpeg).size(emu(page.width)?, emu(page.height)?);
        let mut run = Run::new().add_image(pic);
        if index + 1 < pages.len() {
            run = run.add_break(BreakType::Page);
        }
        docx = docx.add_paragraph(Paragraph::new().add_run(run));
    }

    let file = File::create(path).map_err(|e| TransformError::resource(path, "create", e))?;
    docx.build()
        .pack(file)
        .map_err(|e| TransformError::resource(path, "write", e))
}

/// Import images from PDF files.
///
/// Each PDF is one input record. By default the JPEG images embedded in it
/// are extracted as they are. With `page_as_image` every page is rendered at
/// `dpi` instead, which needs the `pdf-render` feature and a pdfium library.
/// The first output keeps the record's id, further ones get fresh ids.
#[derive(Debug, Clone)]
pub struct PdfImages {
    /// Render resolution for `page_as_image`
    pub dpi: u32,
    pub page_as_image: bool,
}

impl Default for PdfImages {
    fn default() -> Self {
        Self {
            dpi: DEFAULT_DPI,
            page_as_image: false,
        }
    }
}

impl Transform for PdfImages {
    fn name(&self) -> &'static str {
        "pdf-images"
    }

    fn derivation(&self) -> Derivation {
        Derivation::Adopt
    }

    fn apply(&self, record: &ImageRecord, outputs: &mut Outputs<'_>) -> Result<(), TransformError> {
        if self.dpi == 0 {
            return Err(TransformError::unsupported("dpi", self.dpi));
        }

        let path = &record.current_path;
        if !path.is_file() {
            return Err(TransformError::not_found(path));
        }

        if self.page_as_image {
            return self.render_pages(path, outputs);
        }

        let doc = Document::load(path).map_err(|e| TransformError::invalid_content(path, e))?;

        let images = embedded_jpegs(&doc);
        if images.is_empty() {
            return Err(TransformError::InvalidContent {
                path: path.clone(),
                source: no_content_error("no embedded JPEG images"),
            });
        }

        for (n, bytes) in images.iter().enumerate() {
            let target = outputs.allocate_with_suffix(&format!("_{}", n + 1), "jpg");
            std::fs::write(&target, bytes).map_err(|e| TransformError::resource(&target, "write", e))?;
        }
        Ok(())
    }
}

impl PdfImages {
    /// Pixel size of a page `points` long at the configured resolution
    #[cfg_attr(not(feature = "pdf-render"), allow(dead_code))]
    fn render_side(&self, points: f32) -> Result<i32, TransformError> {
        let pixels = (points * self.dpi as f32 / POINTS_PER_INCH).round();
        if pixels < 1.0 || pixels > MAX_RENDER_SIDE as f32 {
            return Err(TransformError::unsupported(
                "dpi",
                format!("{} (page would be {pixels} px)", self.dpi),
            ));
        }
        Ok(pixels as i32)
    }

    #[cfg(feature = "pdf-render")]
    fn render_pages(&self, path: &Path, outputs: &mut Outputs<'_>) -> Result<(), TransformError> {
        use super::codec::write_jpeg;
        use image::{DynamicImage, RgbaImage};
        use pdfium_render::prelude::*;
        use tracing::debug;

        let bindings = Pdfium::bind_to_system_library()
            .map_err(|e| TransformError::resource(path, "load pdfium for", pdfium_error(e)))?;
        let pdfium = Pdfium::new(bindings);
        let document = pdfium
            .load_pdf_from_file(path, None)
            .map_err(|e| TransformError::invalid_content(path, pdfium_error(e)))?;

        let mut rendered = 0;
        for (index, page) in document.pages().iter().enumerate() {
            let config = PdfRenderConfig::new()
                .set_target_width(self.render_side(page.width().value)?)
                .set_target_height(self.render_side(page.height().value)?)
                .render_form_data(true)
                .render_annotations(true);
            let bitmap = page
                .render_with_config(&config)
                .map_err(|e| TransformError::resource(path, "render", pdfium_error(e)))?;

            let (width, height) = (bitmap.width() as u32, bitmap.height() as u32);
            let rgba = RgbaImage::from_raw(width, height, bitmap.as_rgba_bytes())
                .ok_or_else(|| TransformError::resource(path, "render", io::Error::other("bitmap size mismatch")))?;
            let rgb = flatten(&DynamicImage::ImageRgba8(rgba), WHITE);

            let target = outputs.allocate_with_suffix(&format!("_{}", index + 1), "jpg");
            write_jpeg(&rgb, PAGE_JPEG_QUALITY, self.dpi, &target)?;
            rendered += 1;
        }

        if rendered == 0 {
            return Err(TransformError::InvalidContent {
                path: path.to_path_buf(),
                source: no_content_error("no pages"),
            });
        }
        debug!(path = %path.display(), pages = rendered, dpi = self.dpi, "Rendered PDF pages");
        Ok(())
    }

    #[cfg(not(feature = "pdf-render"))]
    fn render_pages(&self, _path: &Path, _outputs: &mut Outputs<'_>) -> Result<(), TransformError> {
        Err(TransformError::unsupported(
            "page_as_image",
            "built without the `pdf-render` feature",
        ))
    }
}

#[cfg(feature = "pdf-render")]
fn pdfium_error(err: pdfium_render::prelude::PdfiumError) -> io::Error {
    io::Error::other(err.to_string())
}

fn no_content_error(message: &'static str) -> SharedSource {
    std::sync::Arc::new(io::Error::new(io::ErrorKind::InvalidData, message))
}

/// Raw DCT streams of every image XObject, in object order
fn embedded_jpegs(doc: &Document) -> Vec<Vec<u8>> {
    doc.objects
        .values()
        .filter_map(|object| match object {
            Object::Stream(stream) if is_jpeg_image(&stream.dict) => Some(stream.content.clone()),
            _ => None,
        })
        // Skip streams the decoder rejects (e.g. CMYK variants or truncated data)
        .filter(|bytes| image::load_from_memory_with_format(bytes, ImageFormat::Jpeg).is_ok())
        .collect()
}

fn is_jpeg_image(dict: &lopdf::Dictionary) -> bool {
    let is_image = dict
        .get(b"Subtype")
        .and_then(Object::as_name)
        .map(|name| name == b"Image")
        .unwrap_or(false);

    let is_dct = match dict.get(b"Filter") {
        Ok(Object::Name(name)) => name.as_slice() == b"DCTDecode",
        Ok(Object::Array(filters)) => {
            filters.len() == 1 && matches!(&filters[0], Object::Name(name) if name.as_slice() == b"DCTDecode")
        }
        _ => false,
    };

    is_image && is_dct
}
