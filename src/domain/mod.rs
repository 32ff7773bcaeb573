pub mod lifecycle;
pub mod models;
pub mod normalize;
pub mod report;
