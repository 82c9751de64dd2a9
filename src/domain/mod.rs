pub mod asset;
pub mod attributes;
pub mod resource;
pub mod series;

pub use asset::*;
pub use attributes::*;
pub use resource::*;
pub use series::*;
