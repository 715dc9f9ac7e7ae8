//! Barcode Decode Adapter
//!
//! Pluggable single-frame decoders plus a paced, cancellable loop that runs
//! them against a live camera until one succeeds.

mod adapter;
mod decoder;
#[cfg(test)]
mod tests;

pub use adapter::BarcodeAdapter;
pub use decoder::{BarcodeDecoder, DecodedCode, MultiFormatDecoder, QrDecoder, Symbology};
