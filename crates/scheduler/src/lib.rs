pub mod auto_return;

pub use auto_return::{AutoReturnScheduler, SWITCHED_AT_KEY};
