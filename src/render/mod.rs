//! Certificate document rendering via Typst.
//!
//! Rendered template markup goes in, PDF or PNG bytes come out. Single pass,
//! no pagination control beyond what the template itself encodes.

use thiserror::Error;
use typst_as_lib::TypstEngine;

pub type Result<T> = std::result::Result<T, RenderError>;

#[derive(Error, Debug)]
pub enum RenderError {
    #[error("document compilation failed: {0}")]
    Compile(String),

    #[error("PDF export failed: {0}")]
    Pdf(String),

    #[error("page {index} out of range (document has {pages} pages)")]
    PageOutOfRange { index: usize, pages: usize },

    #[error("PNG encoding failed: {0}")]
    Png(String),
}

fn compile(markup: &str) -> Result<typst::layout::PagedDocument> {
    let engine = TypstEngine::builder().main_file(markup.to_string()).build();

    let compiled = engine.compile();
    compiled
        .output
        .map_err(|e| RenderError::Compile(format!("{:?}", e)))
}

/// Compile certificate markup to a PDF byte buffer.
pub fn markup_to_pdf(markup: &str) -> Result<Vec<u8>> {
    let document = compile(markup)?;

    let options = typst_pdf::PdfOptions::default();
    let bytes = typst_pdf::pdf(&document, &options)
        .map_err(|e| RenderError::Pdf(format!("{:?}", e)))?;

    Ok(bytes.into())
}

/// Rasterize exactly one page of the compiled document to PNG at `dpi`.
pub fn markup_page_to_png(markup: &str, page_index: usize, dpi: f32) -> Result<Vec<u8>> {
    let document = compile(markup)?;

    let page = document
        .pages
        .get(page_index)
        .ok_or(RenderError::PageOutOfRange {
            index: page_index,
            pages: document.pages.len(),
        })?;

    // Typst layouts in points; 72pt per inch.
    let pixmap = typst_render::render(page, dpi / 72.0);
    pixmap
        .encode_png()
        .map_err(|e| RenderError::Png(e.to_string()))
}
