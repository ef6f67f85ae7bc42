//! Defines routes for conversion and download operations.
//!
//! ## Structure
//! - **Conversion endpoints**
//!   - `POST /convert/{conversion}` — `conversion` is `<source>-to-<target>`,
//!     e.g. `png-to-pdf`, `jpeg-to-pdf`, `pdf-to-png`
//!   - `POST /png2pdf`, `POST /pdf2png` — fixed-pair aliases, also accepted
//!     with a trailing slash
//!
//! - **Artifact endpoints**
//!   - `GET /download/{file_id}` — one-time download
//!   - `GET /cleanup` — immediate expiry sweep (diagnostic)
//!
//! - **Service endpoints**: `GET /`, `GET /health`, `GET /readyz`

use crate::{
    handlers::{
        convert_handlers::{convert, pdf_to_png, png_to_pdf},
        download_handlers::{download_artifact, manual_cleanup},
        health_handlers::{health, readyz, root},
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post},
};

/// Build and return the router for all service routes.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/readyz", get(readyz))
        .route("/convert/{conversion}", post(convert))
        .route("/png2pdf", post(png_to_pdf))
        .route("/png2pdf/", post(png_to_pdf))
        .route("/pdf2png", post(pdf_to_png))
        .route("/pdf2png/", post(pdf_to_png))
        .route("/download/{file_id}", get(download_artifact))
        .route("/cleanup", get(manual_cleanup))
}
