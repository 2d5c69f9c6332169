//! Testing utilities and harness for the snapshot runtime

pub mod assertions;
pub mod testing;

pub use assertions::*;
pub use testing::*;

pub mod prelude {
    pub use crate::assertions::*;
    pub use crate::testing::*;
}
