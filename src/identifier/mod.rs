mod codec;
mod link;
mod paths;
#[cfg(test)]
mod tests;

pub use codec::{SessionIdentifier, ValidityWindow};
pub use link::extract_from_link;
pub use paths::{derive_chunk_path, derive_chunk_prefix, derive_storage_path, extension_for_mime};
