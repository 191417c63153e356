//! Pagespace engine: page rendering, resource fetching and the export pipeline.
mod client;
mod css;
mod decode;
mod exporter;
mod sink;
mod transform;
mod types;

pub use client::{
    ApiError, ByteStream, ClientSettings, ContentClient, ReqwestContentClient, ResourceFetch,
};
pub use css::rewrite_css_urls;
pub use decode::{decode_html, DecodedHtml};
pub use exporter::{export, ExportError, Exporter, PageError, ResourceError};
pub use sink::{clean_output_dir, CleanOutcome, FileSink, WriteError};
pub use transform::{LocatableTag, PageTransformer, GENERATOR};
pub use types::{FailureKind, FetchError, FetchedPage, PageDescriptor, TransformResult};
