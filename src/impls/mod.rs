pub mod centralized;
pub mod dummy;
pub mod eas;
pub mod evm;
pub mod groth16;
pub mod hash;
pub mod http;
pub mod roles;
