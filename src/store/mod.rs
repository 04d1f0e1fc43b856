pub mod blob;
pub mod memory;
pub mod traits;

pub use blob::*;
pub use memory::*;
pub use traits::*;
