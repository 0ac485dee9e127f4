//! External image-processing backends.
//!
//! Each backend implements [`ProviderAdapter`]; slots select one through
//! the [`ProviderRegistry`] by [`ProviderId`].

pub mod adapter;
pub mod gemini;
pub mod gpt_image;
pub mod http;
mod pending;
pub mod registry;
pub mod turbotext;

#[cfg(any(test, feature = "test-support"))]
pub mod mock;

pub use adapter::{
    IngestPayload, JobContext, PayloadBody, PayloadFile, PollStatus, ProviderAdapter, ProviderError,
    ProviderPayload, ProviderResult, TemplateImage,
};
pub use registry::{ProviderId, ProviderRegistry, ProvidersConfig, RegistryError};
