pub mod error;
pub mod movie;

pub use movie::MovieService;
