use crate::crypto::hash::{FieldHash, HashError, HasherZK};
use ark_bn254::Fr;
use ark_r1cs_std::fields::fp::FpVar;
use ark_r1cs_std::fields::FieldVar;
use ark_relations::r1cs::SynthesisError;
use light_poseidon::parameters::bn254_x5::get_poseidon_parameters;
use light_poseidon::{Poseidon, PoseidonHasher, PoseidonParameters};
use once_cell::sync::Lazy;

/// Largest input count the circom parameter set covers (state width 13).
pub const MAX_INPUTS: usize = 12;

static PARAMETERS: Lazy<Vec<PoseidonParameters<Fr>>> = Lazy::new(|| {
    (1..=MAX_INPUTS)
        .map_while(|n| {
            u8::try_from(n + 1)
                .ok()
                .and_then(|width| get_poseidon_parameters::<Fr>(width).ok())
        })
        .collect()
});

fn parameters(arity: usize) -> Result<&'static PoseidonParameters<Fr>, HashError> {
    arity
        .checked_sub(1)
        .and_then(|i| PARAMETERS.get(i))
        .ok_or(HashError::UnsupportedArity(arity))
}

/// circomlib's Poseidon over the BN254 scalar field, so that commitments match the deployed
/// attester contract and circuit.
///
/// Each input count is its own instance: `n` inputs run a width `n + 1` permutation over
/// `[0, inputs..]` and output the first state element.
#[derive(Clone, Debug, Default)]
pub struct CircomPoseidon;

impl HasherZK<Fr> for CircomPoseidon {
    type M = Fr;
    type C = Fr;
    type MV = FpVar<Fr>;
    type CV = FpVar<Fr>;

    fn hash(data: &[Fr]) -> Result<Fr, HashError> {
        parameters(data.len())?;
        let mut poseidon =
            Poseidon::<Fr>::new_circom(data.len()).map_err(|e| HashError::Evaluation(e.to_string()))?;
        poseidon.hash(data).map_err(|e| HashError::Evaluation(e.to_string()))
    }

    fn hash_in_zk(data: &[FpVar<Fr>]) -> Result<FpVar<Fr>, SynthesisError> {
        let params = parameters(data.len()).map_err(|_| SynthesisError::Unsatisfiable)?;
        let half_full = params.full_rounds / 2;
        let partial_end = half_full + params.partial_rounds;

        let mut state = Vec::with_capacity(params.width);
        state.push(FpVar::zero());
        state.extend_from_slice(data);

        for round in 0..params.full_rounds + params.partial_rounds {
            for (i, x) in state.iter_mut().enumerate() {
                *x += params.ark[round * params.width + i];
            }

            if round < half_full || round >= partial_end {
                for x in state.iter_mut() {
                    *x = x.pow_by_constant([params.alpha])?;
                }
            } else {
                state[0] = state[0].pow_by_constant([params.alpha])?;
            }

            state = params
                .mds
                .iter()
                .map(|row| {
                    row.iter()
                        .zip(&state)
                        .fold(FpVar::zero(), |acc, (m, x)| acc + x * *m)
                })
                .collect();
        }

        Ok(state.swap_remove(0))
    }
}

impl FieldHash<Fr> for CircomPoseidon {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::reduce_bytes;
    use ark_r1cs_std::prelude::{AllocVar, R1CSVar};
    use ark_relations::r1cs::ConstraintSystem;

    fn from_hex(s: &str) -> Fr {
        reduce_bytes(&hex::decode(s).unwrap())
    }

    #[test]
    fn matches_circomlib_vectors() {
        assert_eq!(
            CircomPoseidon::hash(&[Fr::from(1u64)]).unwrap(),
            from_hex("29176100eaa962bdc1fe6c654d6a3c130e96a4d1168b33848b897dc502820133")
        );
        assert_eq!(
            CircomPoseidon::hash2(Fr::from(1u64), Fr::from(2u64)).unwrap(),
            from_hex("115cc0f5e7d690413df64c6b9662e9cf2a3617f2743245519e19607a4417189a")
        );
    }

    #[test]
    fn gadget_matches_native() {
        for arity in [1usize, 2, 4, 5] {
            let cs = ConstraintSystem::<Fr>::new_ref();
            let data = (1..=arity as u64).map(Fr::from).collect::<Vec<_>>();
            let vars = data
                .iter()
                .map(|x| FpVar::new_witness(cs.clone(), || Ok(*x)))
                .collect::<Result<Vec<_>, _>>()
                .unwrap();

            let out = CircomPoseidon::hash_in_zk(&vars).unwrap();
            assert_eq!(out.value().unwrap(), CircomPoseidon::hash(&data).unwrap(), "arity {arity}");
            assert!(cs.is_satisfied().unwrap());
        }
    }

    #[test]
    fn unsupported_arity_is_an_error() {
        assert_eq!(CircomPoseidon::hash(&[]), Err(HashError::UnsupportedArity(0)));
        let too_many = vec![Fr::from(1u64); MAX_INPUTS + 1];
        assert_eq!(
            CircomPoseidon::hash(&too_many),
            Err(HashError::UnsupportedArity(MAX_INPUTS + 1))
        );

        let cs = ConstraintSystem::<Fr>::new_ref();
        let vars = vec![FpVar::new_witness(cs, || Ok(Fr::from(1u64))).unwrap(); MAX_INPUTS + 1];
        assert!(CircomPoseidon::hash_in_zk(&vars).is_err());
    }

    #[test]
    fn order_matters() {
        let a = Fr::from(1u64);
        let b = Fr::from(2u64);
        assert_ne!(CircomPoseidon::hash2(a, b).unwrap(), CircomPoseidon::hash2(b, a).unwrap());
    }
}
