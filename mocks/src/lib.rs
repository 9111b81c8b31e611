pub mod mock_blockchain;
pub mod mock_inspector;
pub mod mock_signer;

pub use mpc;
pub use mpc_payee;
