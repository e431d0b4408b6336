pub mod address;
pub mod crypto;
pub mod error;
pub mod hash;
pub mod types;

pub use address::{AddressKind, ChainAddress};
pub use crypto::{KeyPair, PrivateKey, PublicKey, Signature};
pub use error::PrimitivesError;
pub use hash::{Hash160, Hash256};

pub type Result<T> = std::result::Result<T, PrimitivesError>;
