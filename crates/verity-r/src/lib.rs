pub mod server;

pub use server::{PresentationServer, ServerHandle};
