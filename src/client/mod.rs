pub(crate) mod blocking;

pub(crate) mod core;

pub use blocking::{Client, ClientBuilder};
