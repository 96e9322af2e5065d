pub mod alert;
pub mod clients;
pub mod config;
pub mod exec;
pub mod header;
pub mod host;

pub use alert::*;
pub use clients::*;
pub use config::*;
pub use exec::*;
pub use header::*;
pub use host::*;
