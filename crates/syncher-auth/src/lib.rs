//! # Syncher Auth
//!
//! The authorization gate in front of every mutation.
//!
//! ## Model
//!
//! - **Secret**: a capability token chosen at record creation. Presenting it
//!   authorizes mutate and destroy.
//! - **Private mode**: an in-process caller may present [`Credential::Private`]
//!   instead. The wire server never forwards such credentials from remote
//!   peers, and the [`Gate`] refuses them when tagged [`Origin::Remote`].
//!
//! Secrets are compared as BLAKE3 digests.

pub mod credential;
pub mod error;
pub mod gate;

pub use credential::{Credential, Origin, SecretDigest};
pub use error::{AuthError, Result};
pub use gate::Gate;
