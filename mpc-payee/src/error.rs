//! #Error
use std::fmt;

use mpc::SecretHash;

/// An error code.
#[derive(Debug)]
pub enum Error {
    /// The spend secret hash embedded in a script is not the one of the
    /// channel.
    IncorrectSpendSecretHash {
        /// Hash found in the script.
        given: SecretHash,
        /// Hash of the channel spend secret.
        expected: SecretHash,
    },
    /// The payee public key embedded in a script is not the one of the
    /// channel.
    IncorrectPayeePubkey {
        /// Key found in the script.
        given: bitcoin::PublicKey,
        /// Public key of the payee.
        expected: bitcoin::PublicKey,
    },
    /// A deposit or commit transaction is malformed or does not have the
    /// expected signature shape.
    InvalidTransaction(String),
    /// A script does not match the transaction it was provided with, or the
    /// rest of the channel.
    ScriptMismatch(String),
    /// The requested quantity is below the amount already transferred.
    QuantityBelowTransferred {
        /// Requested quantity.
        given: u64,
        /// Amount already transferred.
        transferred: u64,
    },
    /// A commit transfers a quantity other than the one requested for its
    /// revoke secret.
    QuantityMismatch {
        /// Quantity transferred by the commit.
        given: u64,
        /// Quantity requested.
        expected: u64,
    },
    /// The requested quantity exceeds the channel deposit.
    QuantityAboveDeposit {
        /// Requested quantity.
        given: u64,
        /// Deposit quantity.
        deposit: u64,
    },
    /// An invalid state was encounter, likely to indicate a bug.
    InvalidState(String),
    /// An error occurred in the blockchain component.
    BlockchainError(String),
    /// An error occurred while signing a transaction.
    SignerError(String),
    /// An error occurred in the channel primitives library.
    Mpc(mpc::Error),
    /// An error occurred in the Secp library.
    SecpError(secp256k1_zkp::Error),
}

impl Error {
    /// Returns whether the error was caused by invalid input provided by the
    /// counterparty, in which case the channel state was left untouched and
    /// the channel can keep being used.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::IncorrectSpendSecretHash { .. }
                | Error::IncorrectPayeePubkey { .. }
                | Error::InvalidTransaction(_)
                | Error::ScriptMismatch(_)
                | Error::QuantityBelowTransferred { .. }
                | Error::QuantityMismatch { .. }
                | Error::QuantityAboveDeposit { .. }
        )
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            Error::IncorrectSpendSecretHash {
                ref given,
                ref expected,
            } => write!(
                f,
                "Incorrect spend secret hash: given {}, expected {}",
                given, expected
            ),
            Error::IncorrectPayeePubkey {
                ref given,
                ref expected,
            } => write!(
                f,
                "Incorrect payee public key: given {}, expected {}",
                given, expected
            ),
            Error::InvalidTransaction(ref s) => write!(f, "Invalid transaction: {}", s),
            Error::ScriptMismatch(ref s) => write!(f, "Script mismatch: {}", s),
            Error::QuantityBelowTransferred {
                given,
                transferred,
            } => write!(
                f,
                "Quantity {} is below the transferred amount {}",
                given, transferred
            ),
            Error::QuantityMismatch { given, expected } => write!(
                f,
                "Commit quantity {} differs from the requested quantity {}",
                given, expected
            ),
            Error::QuantityAboveDeposit { given, deposit } => write!(
                f,
                "Quantity {} exceeds the deposit quantity {}",
                given, deposit
            ),
            Error::InvalidState(ref s) => write!(f, "Invalid state: {}", s),
            Error::BlockchainError(ref s) => write!(f, "Blockchain error {}", s),
            Error::SignerError(ref s) => write!(f, "Signer error {}", s),
            Error::Mpc(ref e) => write!(f, "Mpc error {}", e),
            Error::SecpError(_) => write!(f, "Secp error"),
        }
    }
}

impl From<mpc::Error> for Error {
    fn from(e: mpc::Error) -> Error {
        Error::Mpc(e)
    }
}

impl From<secp256k1_zkp::Error> for Error {
    fn from(e: secp256k1_zkp::Error) -> Error {
        Error::SecpError(e)
    }
}

impl From<secp256k1_zkp::UpstreamError> for Error {
    fn from(e: secp256k1_zkp::UpstreamError) -> Error {
        Error::SecpError(secp256k1_zkp::Error::Upstream(e))
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Mpc(e) => Some(e),
            Error::SecpError(e) => Some(e),
            _ => None,
        }
    }
}
