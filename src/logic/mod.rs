pub mod containers;
pub mod forms;
pub mod formset;
pub mod registry;

pub use containers::*;
pub use forms::*;
pub use formset::*;
pub use registry::*;
