pub mod naming;

pub use naming::{generate_slug, slugify};
