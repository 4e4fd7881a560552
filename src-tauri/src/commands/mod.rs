pub mod account;
pub mod bridge;
pub mod settings;
pub mod vpn;

pub use account::*;
pub use bridge::*;
pub use settings::*;
pub use vpn::*;
