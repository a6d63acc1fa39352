pub mod daily;
pub mod historic;
