//! Per-source decode chains.

pub mod chain;
pub mod decoder;

pub use chain::SourceChain;
pub use decoder::{DecoderFactory, SourceDecoder, SymphoniaDecoder, SymphoniaDecoderFactory};
