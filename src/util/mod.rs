pub mod keywords;
pub mod logging;
