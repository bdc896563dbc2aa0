pub mod cdp;
pub mod driver;
mod inject;

pub use driver::HeadlessDriver;
