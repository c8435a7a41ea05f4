//! Self-contained collaborators for tests and local deployments: an in-memory ledger that
//! simulates EAS and the anonymous attester, a fixed role table and an in-process role signer.

pub mod ledger;
pub mod roles;
pub mod signer;

pub use ledger::{MemoryLedger, RELAYER};
pub use roles::RoleTable;
pub use signer::RoleSigner;
