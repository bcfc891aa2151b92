//! Model runtimes, embedders and token counters for Ragline.
//!
//! All runtimes implement `ragline_core::ModelRuntime`; embedders implement
//! `ragline_core::Embedder`. The candle-backed implementations sit behind the
//! `local` feature.

#[cfg(feature = "local")]
pub mod bert;
pub mod builder;
pub mod hashing;
pub mod llama_server;
#[cfg(feature = "local")]
pub mod local;
#[cfg(feature = "local")]
pub mod tokenizer;

#[cfg(feature = "local")]
pub use bert::BertEmbedder;
pub use builder::{build_embedder, build_runtime, build_token_counter};
pub use hashing::HashingEmbedder;
pub use llama_server::LlamaServerRuntime;
#[cfg(feature = "local")]
pub use local::LocalRuntime;
#[cfg(feature = "local")]
pub use tokenizer::TokenizerCounter;
