pub mod addr;
pub mod cmds;
pub mod config;
pub mod crypto;
pub mod error;
pub mod filekey;
pub mod matcher;
pub mod nodestr;
pub mod text;
pub mod wire;

pub use addr::{NodeAddr, NodeInfo};
pub use cmds::{CloseKind, Command, ConnType, QueryCmd};
pub use error::{CodecError, CryptoError};
pub use filekey::FileKey;
