pub mod classification;
pub mod lenient;
pub mod results;
pub mod rows;
