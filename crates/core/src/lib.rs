//! Core data types for the nICP discount tracker.

pub mod alert;
pub mod clock;
pub mod history;
pub mod pair;
pub mod rate;
pub mod snapshot;
pub mod source;
pub mod token;
pub mod user;

pub use alert::*;
pub use clock::*;
pub use history::*;
pub use pair::*;
pub use rate::*;
pub use snapshot::*;
pub use source::*;
pub use token::*;
pub use user::*;
