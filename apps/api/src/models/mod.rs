pub mod analysis;
pub mod request;
