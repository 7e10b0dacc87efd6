//! Media resolution: turns references found in outgoing commands into URLs or
//! backend-local paths by pushing their bytes to the upload service.
//!
//! - **[`upload`]**: the [`UploadClient`], a multipart POST to the configured
//!   endpoint.
//! - **[`resolver`]**: the [`MediaResolver`], which classifies a reference,
//!   loads its bytes and drives the upload client. It is the production
//!   implementation of [`cqrelay_core::Resolve`].

pub mod resolver;
pub mod upload;

pub use resolver::MediaResolver;
pub use upload::UploadClient;
