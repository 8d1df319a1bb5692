//! Request/response body and header transformation (spec §4.G). New
//! module — the teacher only ever forwards bytes untouched
//! (`proxy/forwarding.rs::forward`); everything here is built fresh in its
//! idiom (plain functions operating on `http` types, bounded buffering).

pub mod body;
pub mod compression;
pub mod headers;
pub mod url_rewrite;

pub use body::{replace_body, PayloadTooLarge};
pub use headers::apply_header_mutations;
pub use url_rewrite::rewrite_path;
