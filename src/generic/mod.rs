pub mod abi;
pub mod bulletin;
pub mod interaction;
pub mod object;
pub mod publish;
pub mod revocation;
pub mod scan;
pub mod service;
pub mod user;
