//! # pixelworks
//!
//! Interchangeable image-processing engines behind one capability-typed
//! interface. A caller decodes bytes into a [`PixelBuffer`](types::PixelBuffer),
//! hands it to any backend implementing
//! [`ImageProcessor`](imaging::ImageProcessor), and gets a new buffer (or a
//! failure value) back, without knowing which engine did the work.
//!
//! # Architecture
//!
//! ```text
//! bytes ──load_image──▶ PixelBuffer ──resize/crop/rotate/filter/...──▶ PixelBuffer ──save_image──▶ bytes
//!                           │
//!                           └──analyze / detect_*──▶ AnalysisResult / DetectionResult
//! ```
//!
//! Every backend converts the buffer into its own native representation,
//! performs the operation, converts back, and releases every native object
//! before returning. Native objects are registered with a
//! [`HandleLedger`](imaging::HandleLedger), so tests can check that nothing
//! leaks, including when acquisition fails halfway through an operation.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`types`] | `PixelBuffer`, `PixelFormat`, `Dimensions`, `ImageSource` |
//! | [`imaging`] | The `ImageProcessor` contract, the four backends, codecs and the fallback registry |
//! | [`config`] | `pixelworks.toml` loading, validation and merging over stock defaults |
//!
//! # Design Decisions
//!
//! ## Two Error Channels
//!
//! Pixel operations never return `Err`: their outcome is a
//! [`ProcessingResult`](imaging::ProcessingResult) carrying either data or a
//! message, and detection degrades to an empty list. A failed transform is
//! something another backend may be able to do, so the caller can just move
//! on (see [`BackendSet::apply_with_fallback`](imaging::BackendSet::apply_with_fallback)).
//! Loading, saving and metadata return `Result<_, BackendError>`, because a
//! broken file stays broken whichever engine reads it.
//!
//! ## Capabilities Are Declared, Not Enforced
//!
//! Each backend publishes a fixed [`Capabilities`](imaging::Capabilities)
//! map. The contract does not check it; callers read it to decide whom to
//! ask, and an operation outside it still answers with a failure value.
//!
//! ## Pure-Rust Codecs
//!
//! Decoding and encoding use the `image` crate, with AVIF decoded by
//! `avif-parse` + `rav1d` and encoded by `rav1e`. No system libraries are
//! needed.

pub mod config;
pub mod imaging;
pub mod types;

#[cfg(test)]
pub(crate) mod test_helpers;
