use ark_ff::PrimeField;
use ark_r1cs_std::fields::fp::FpVar;
use ark_r1cs_std::prelude::AllocVar;
use ark_relations::r1cs::SynthesisError;
use thiserror::Error;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum HashError {
    #[error("no hash parameters for {0} inputs")]
    UnsupportedArity(usize),
    #[error("hash evaluation failed: {0}")]
    Evaluation(String),
}

/// A hash with a native evaluation and a matching R1CS gadget.
///
/// Both sides must agree on every input, since commitments computed natively are later enforced
/// inside the attestation circuit.
pub trait HasherZK<F: PrimeField> {
    type M;
    type C;
    type MV: AllocVar<Self::M, F>;
    type CV: AllocVar<Self::C, F>;

    fn hash(data: &[Self::M]) -> Result<Self::C, HashError>;

    fn hash_in_zk(data: &[Self::MV]) -> Result<Self::CV, SynthesisError>;
}

/// Field-to-field hash, the only kind used for commitments and signature challenges.
pub trait FieldHash<F: PrimeField>:
    HasherZK<F, M = F, C = F, MV = FpVar<F>, CV = FpVar<F>> + Clone + Send + Sync + 'static
{
    fn hash2(left: F, right: F) -> Result<F, HashError> {
        Self::hash(&[left, right])
    }
}
