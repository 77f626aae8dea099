mod alert;
mod analysis;
mod forecast;
mod usage;

pub use alert::*;
pub use analysis::*;
pub use forecast::*;
pub use usage::*;
