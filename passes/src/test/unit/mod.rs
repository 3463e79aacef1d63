pub mod linearize;
pub mod relayout;
