//! # Micropayment channel primitives
//! Library for generating channel secrets, building and inspecting the
//! deposit and commit scripts of a hash-locked, time-locked micropayment
//! channel, and producing the payee signatures that spend them.
//!

#![crate_name = "mpc"]
// Coding conventions
#![forbid(unsafe_code)]
#![deny(non_upper_case_globals)]
#![deny(non_camel_case_types)]
#![deny(non_snake_case)]
#![deny(unused_mut)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(missing_docs)]

extern crate bitcoin;
extern crate secp256k1_zkp;
#[cfg(feature = "use-serde")]
extern crate serde;
extern crate zeroize;

use std::fmt;

pub mod scripts;
pub mod secret;
pub mod sign;

pub use scripts::{CommitScript, DepositScript};
pub use secret::{Secret, SecretHash};

/// An error code.
#[derive(Copy, PartialEq, Eq, Clone, Debug)]
pub enum Error {
    /// Secp256k1 error
    Secp256k1(secp256k1_zkp::Error),
    /// An invalid argument was provided
    InvalidArgument,
    /// A script did not match the expected channel script template.
    InvalidScript(&'static str),
}

impl From<secp256k1_zkp::Error> for Error {
    fn from(error: secp256k1_zkp::Error) -> Error {
        Error::Secp256k1(error)
    }
}

impl From<secp256k1_zkp::UpstreamError> for Error {
    fn from(error: secp256k1_zkp::UpstreamError) -> Error {
        Error::Secp256k1(secp256k1_zkp::Error::Upstream(error))
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::Secp256k1(ref e) => write!(f, "Secp256k1 error {}", e),
            Error::InvalidArgument => write!(f, "Invalid argument"),
            Error::InvalidScript(s) => write!(f, "Invalid script: {}", s),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Secp256k1(e) => Some(e),
            Error::InvalidArgument => None,
            Error::InvalidScript(_) => None,
        }
    }
}
