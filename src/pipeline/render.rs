//! PDF rasterisation: render one page to a JPEG [`PageImage`] via pdfium.
//!
//! ## Why spawn_blocking?
//!
//! pdfium is a C++ library with thread-local state and is not safe to call
//! from async contexts. Pages are rendered in batches on tokio's blocking
//! pool: one bind and one document load per batch, and every pdfium handle is
//! dropped inside that closure whether the batch succeeds or fails.
//!
//! ## Why scale and cap?
//!
//! A fixed scale factor (1.5× by default) keeps small print legible on a
//! letter or A4 invoice; the pixel cap stops an oversized page (a plan or a
//! poster in the batch) from producing a huge image.

use crate::config::SplitConfig;
use crate::error::{DocSplitError, RenderError};
use crate::output::{PageImage, SourceDocument};
use crate::pipeline::encode;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Rasterises pages of a source document.
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// Render 1-based `page_index` of `document`.
    async fn render(
        &self,
        document: &SourceDocument,
        page_index: usize,
    ) -> Result<PageImage, RenderError>;

    /// Render several pages, one result per requested page, in order.
    ///
    /// Backends with a per-document setup cost override this to pay it once
    /// per batch.
    async fn render_pages(
        &self,
        document: &SourceDocument,
        pages: &[usize],
    ) -> Vec<Result<PageImage, RenderError>> {
        let mut rendered = Vec::with_capacity(pages.len());
        for &page in pages {
            rendered.push(self.render(document, page).await);
        }
        rendered
    }
}

/// pdfium-backed renderer.
#[derive(Debug, Clone)]
pub struct PdfiumRenderer {
    library_path: Option<PathBuf>,
    scale: f32,
    max_pixels: u32,
    jpeg_quality: u8,
    password: Option<String>,
}

impl PdfiumRenderer {
    /// Create a renderer, checking once that pdfium can be bound.
    pub fn new(config: &SplitConfig) -> Result<Self, DocSplitError> {
        let renderer = Self {
            library_path: config.pdfium_library_path.clone(),
            scale: config.render_scale,
            max_pixels: config.max_rendered_pixels,
            jpeg_quality: config.jpeg_quality,
            password: config.password.clone(),
        };
        bind_pdfium(renderer.library_path.as_deref()).map_err(DocSplitError::PdfiumBindingFailed)?;
        Ok(renderer)
    }
}

#[async_trait]
impl PageRenderer for PdfiumRenderer {
    async fn render(
        &self,
        document: &SourceDocument,
        page_index: usize,
    ) -> Result<PageImage, RenderError> {
        self.render_pages(document, &[page_index])
            .await
            .into_iter()
            .next()
            .unwrap_or(Err(RenderError::PageOutOfRange {
                page: page_index,
                total: document.page_count,
            }))
    }

    /// Binds pdfium and loads the document once for the whole batch.
    async fn render_pages(
        &self,
        document: &SourceDocument,
        pages: &[usize],
    ) -> Vec<Result<PageImage, RenderError>> {
        let total = document.page_count;
        let in_range = |page: &usize| (1..=total).contains(page);
        let wanted: Vec<usize> = pages.iter().copied().filter(in_range).collect();

        let mut rendered = if wanted.is_empty() {
            Vec::new()
        } else {
            let bytes = document.bytes.clone();
            let this = self.clone();
            let batch = wanted.clone();
            match tokio::task::spawn_blocking(move || this.render_batch_blocking(&bytes, &batch))
                .await
            {
                Ok(results) => results,
                Err(e) => wanted
                    .iter()
                    .map(|&page| {
                        Err(RenderError::Decode {
                            page,
                            detail: format!("render task panicked: {e}"),
                        })
                    })
                    .collect(),
            }
        }
        .into_iter();

        pages
            .iter()
            .map(|&page| {
                if !in_range(&page) {
                    return Err(RenderError::PageOutOfRange { page, total });
                }
                rendered.next().unwrap_or(Err(RenderError::Decode {
                    page,
                    detail: "no result from render batch".to_string(),
                }))
            })
            .collect()
    }
}

impl PdfiumRenderer {
    fn render_batch_blocking(
        &self,
        bytes: &[u8],
        pages: &[usize],
    ) -> Vec<Result<PageImage, RenderError>> {
        let fail_all = |detail: String| -> Vec<Result<PageImage, RenderError>> {
            pages
                .iter()
                .map(|&page| {
                    Err(RenderError::Decode {
                        page,
                        detail: detail.clone(),
                    })
                })
                .collect()
        };

        let pdfium = match bind_pdfium(self.library_path.as_deref()) {
            Ok(pdfium) => pdfium,
            Err(e) => return fail_all(e),
        };
        let document = match pdfium.load_pdf_from_byte_slice(bytes, self.password.as_deref()) {
            Ok(document) => document,
            Err(e) => return fail_all(format!("{:?}", e)),
        };
        debug!("Loaded PDF once for {} pages", pages.len());

        pages
            .iter()
            .map(|&page| self.render_page(&document, page))
            .collect()
    }

    fn render_page(
        &self,
        document: &PdfDocument<'_>,
        page_index: usize,
    ) -> Result<PageImage, RenderError> {
        let decode_err = |detail: String| RenderError::Decode {
            page: page_index,
            detail,
        };

        let pages = document.pages();
        let total = pages.len() as usize;
        if page_index > total {
            return Err(RenderError::PageOutOfRange {
                page: page_index,
                total,
            });
        }

        let page = pages
            .get((page_index - 1) as u16)
            .map_err(|e| decode_err(format!("{:?}", e)))?;

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(self.scale)
            .set_maximum_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);

        let bitmap = page
            .render_with_config(&render_config)
            .map_err(|e| decode_err(format!("{:?}", e)))?;
        let image = bitmap.as_image();
        debug!(
            "Rendered page {} → {}x{} px",
            page_index,
            image.width(),
            image.height()
        );

        encode::encode_page(page_index, &image, self.jpeg_quality).map_err(|e| {
            RenderError::Encode {
                page: page_index,
                detail: e.to_string(),
            }
        })
    }
}

/// Bind to pdfium: explicit path (file or directory), else `./`, else the system library.
pub fn bind_pdfium(library_path: Option<&Path>) -> Result<Pdfium, String> {
    let bindings = match library_path {
        Some(path) if path.is_dir() => {
            Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(path))
        }
        Some(path) => Pdfium::bind_to_library(path),
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library()),
    }
    .map_err(|e| format!("{:?}", e))?;

    Ok(Pdfium::new(bindings))
}
