//! Calldata for the attester contracts and the attestation payload codec.

use crate::error::{AttestError, Result};
use crate::generic::interaction::AttestationProof;
use crate::generic::object::{AttestationId, AttestationPayload, Role};
use ethers::abi::{decode, encode, ParamType, Token};
use ethers::types::{Address, Bytes, H256, U256};
use ethers::utils::id;

const ANON_ATTEST: &str = "attest(bytes32,address,(uint256,string,string,bytes),(bytes,bytes32,bytes32,bytes32))";
const ANON_REVOKE: &str = "revoke(bytes32,bytes32,bytes32)";
const EAS_ATTEST: &str = "attest((bytes32,(address,uint64,bool,bytes32,bytes,uint256)))";
const EAS_REVOKE: &str = "revoke((bytes32,(bytes32,uint256)))";
const EAS_GET_ATTESTATION: &str = "getAttestation(bytes32)";
const TOKEN_GET_VOTES: &str = "getVotes(address)";
const TOKEN_BALANCE_OF: &str = "balanceOf(address)";
const TOKEN_DELEGATES: &str = "delegates(address)";

fn payload_params() -> Vec<ParamType> {
    vec![ParamType::Uint(256), ParamType::String, ParamType::String, ParamType::Bytes]
}

fn payload_tokens(payload: &AttestationPayload) -> Vec<Token> {
    vec![
        Token::Uint(U256::from(payload.role.index())),
        Token::String(payload.title.clone()),
        Token::String(payload.message.clone()),
        Token::Bytes(payload.reference.to_vec()),
    ]
}

fn payload_from_tokens(tokens: Vec<Token>) -> Result<AttestationPayload> {
    match <[Token; 4]>::try_from(tokens) {
        Ok([Token::Uint(role), Token::String(title), Token::String(message), Token::Bytes(reference)]) => {
            let role = (role <= U256::from(u8::MAX))
                .then(|| Role::from_index(role.as_u64()))
                .flatten()
                .ok_or_else(|| AttestError::validation("payload", format!("unknown role {role}")))?;
            Ok(AttestationPayload {
                role,
                title,
                message,
                reference: Bytes::from(reference),
            })
        }
        _ => Err(AttestError::validation("payload", "unexpected payload shape")),
    }
}

/// `abi.encode(uint256 role, string title, string message, bytes ref)`.
pub fn encode_payload(payload: &AttestationPayload) -> Bytes {
    Bytes::from(encode(&payload_tokens(payload)))
}

pub fn decode_payload(data: &[u8]) -> Result<AttestationPayload> {
    let tokens = decode(&payload_params(), data)
        .map_err(|e| AttestError::validation("payload", e.to_string()))?;
    payload_from_tokens(tokens)
}

fn with_selector(signature: &str, tokens: &[Token]) -> Bytes {
    let mut data = id(signature).to_vec();
    data.extend(encode(tokens));
    Bytes::from(data)
}

fn word(token: Token) -> Result<H256> {
    match token {
        Token::FixedBytes(b) if b.len() == 32 => Ok(H256::from_slice(&b)),
        _ => Err(AttestError::validation("calldata", "expected bytes32")),
    }
}

/// Calls understood by the anonymous attester and EAS.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AttesterCall {
    /// Anonymous attester: checks the proof, then attests on EAS as itself.
    AnonymousAttest {
        schema: H256,
        recipient: Address,
        payload: AttestationPayload,
        proof: AttestationProof,
    },
    /// Anonymous attester: checks `H(revoker, revoker)` against the stored revoker hash.
    AnonymousRevoke {
        schema: H256,
        uid: AttestationId,
        revoker: H256,
    },
    EasAttest {
        schema: H256,
        recipient: Address,
        payload: AttestationPayload,
    },
    EasRevoke {
        schema: H256,
        uid: AttestationId,
    },
}

impl AttesterCall {
    pub fn encode(&self) -> Bytes {
        match self {
            AttesterCall::AnonymousAttest {
                schema,
                recipient,
                payload,
                proof,
            } => with_selector(
                ANON_ATTEST,
                &[
                    Token::FixedBytes(schema.as_bytes().to_vec()),
                    Token::Address(*recipient),
                    Token::Tuple(payload_tokens(payload)),
                    Token::Tuple(vec![
                        Token::Bytes(proof.proof.to_vec()),
                        Token::FixedBytes(proof.revoker_hash.as_bytes().to_vec()),
                        Token::FixedBytes(proof.nonce.as_bytes().to_vec()),
                        Token::FixedBytes(proof.timestamp.as_bytes().to_vec()),
                    ]),
                ],
            ),
            AttesterCall::AnonymousRevoke {
                schema,
                uid,
                revoker,
            } => with_selector(
                ANON_REVOKE,
                &[
                    Token::FixedBytes(schema.as_bytes().to_vec()),
                    Token::FixedBytes(uid.as_bytes().to_vec()),
                    Token::FixedBytes(revoker.as_bytes().to_vec()),
                ],
            ),
            AttesterCall::EasAttest {
                schema,
                recipient,
                payload,
            } => with_selector(
                EAS_ATTEST,
                &[Token::Tuple(vec![
                    Token::FixedBytes(schema.as_bytes().to_vec()),
                    Token::Tuple(vec![
                        Token::Address(*recipient),
                        Token::Uint(U256::zero()),
                        Token::Bool(true),
                        Token::FixedBytes(H256::zero().as_bytes().to_vec()),
                        Token::Bytes(encode_payload(payload).to_vec()),
                        Token::Uint(U256::zero()),
                    ]),
                ])],
            ),
            AttesterCall::EasRevoke { schema, uid } => with_selector(
                EAS_REVOKE,
                &[Token::Tuple(vec![
                    Token::FixedBytes(schema.as_bytes().to_vec()),
                    Token::Tuple(vec![
                        Token::FixedBytes(uid.as_bytes().to_vec()),
                        Token::Uint(U256::zero()),
                    ]),
                ])],
            ),
        }
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 4 {
            return Err(AttestError::validation("calldata", "missing selector"));
        }
        let (selector, args) = data.split_at(4);
        let malformed = |e: ethers::abi::Error| AttestError::validation("calldata", e.to_string());
        let bytes32 = || ParamType::FixedBytes(32);

        if selector == id(ANON_ATTEST) {
            let params = [
                bytes32(),
                ParamType::Address,
                ParamType::Tuple(payload_params()),
                ParamType::Tuple(vec![ParamType::Bytes, bytes32(), bytes32(), bytes32()]),
            ];
            let mut tokens = decode(&params, args).map_err(malformed)?.into_iter();
            let (schema, recipient, payload, proof) =
                match (tokens.next(), tokens.next(), tokens.next(), tokens.next()) {
                    (Some(s), Some(Token::Address(r)), Some(Token::Tuple(p)), Some(Token::Tuple(q))) => {
                        (word(s)?, r, payload_from_tokens(p)?, q)
                    }
                    _ => return Err(AttestError::validation("calldata", "bad attest arguments")),
                };
            let mut proof = proof.into_iter();
            let proof = match (proof.next(), proof.next(), proof.next(), proof.next()) {
                (Some(Token::Bytes(p)), Some(h), Some(n), Some(t)) => AttestationProof {
                    proof: Bytes::from(p),
                    revoker_hash: word(h)?,
                    nonce: word(n)?,
                    timestamp: word(t)?,
                },
                _ => return Err(AttestError::validation("calldata", "bad proof tuple")),
            };
            return Ok(AttesterCall::AnonymousAttest {
                schema,
                recipient,
                payload,
                proof,
            });
        }

        if selector == id(ANON_REVOKE) {
            let mut tokens = decode(&[bytes32(), bytes32(), bytes32()], args)
                .map_err(malformed)?
                .into_iter();
            return match (tokens.next(), tokens.next(), tokens.next()) {
                (Some(s), Some(u), Some(r)) => Ok(AttesterCall::AnonymousRevoke {
                    schema: word(s)?,
                    uid: word(u)?,
                    revoker: word(r)?,
                }),
                _ => Err(AttestError::validation("calldata", "bad revoke arguments")),
            };
        }

        if selector == id(EAS_ATTEST) {
            let params = [ParamType::Tuple(vec![
                bytes32(),
                ParamType::Tuple(vec![
                    ParamType::Address,
                    ParamType::Uint(64),
                    ParamType::Bool,
                    bytes32(),
                    ParamType::Bytes,
                    ParamType::Uint(256),
                ]),
            ])];
            let request = decode(&params, args).map_err(malformed)?;
            if let [Token::Tuple(request)] = request.as_slice() {
                if let [schema, Token::Tuple(data)] = request.as_slice() {
                    if let [Token::Address(recipient), _, _, _, Token::Bytes(body), _] = data.as_slice() {
                        return Ok(AttesterCall::EasAttest {
                            schema: word(schema.clone())?,
                            recipient: *recipient,
                            payload: decode_payload(body)?,
                        });
                    }
                }
            }
            return Err(AttestError::validation("calldata", "bad attestation request"));
        }

        if selector == id(EAS_REVOKE) {
            let params = [ParamType::Tuple(vec![
                bytes32(),
                ParamType::Tuple(vec![bytes32(), ParamType::Uint(256)]),
            ])];
            let request = decode(&params, args).map_err(malformed)?;
            if let [Token::Tuple(request)] = request.as_slice() {
                if let [schema, Token::Tuple(data)] = request.as_slice() {
                    if let [uid, _] = data.as_slice() {
                        return Ok(AttesterCall::EasRevoke {
                            schema: word(schema.clone())?,
                            uid: word(uid.clone())?,
                        });
                    }
                }
            }
            return Err(AttestError::validation("calldata", "bad revocation request"));
        }

        Err(AttestError::validation("calldata", "unknown selector"))
    }
}

/// `EAS.getAttestation(uid)`.
pub fn get_attestation_call(uid: &AttestationId) -> Bytes {
    with_selector(EAS_GET_ATTESTATION, &[Token::FixedBytes(uid.as_bytes().to_vec())])
}

/// The fields of EAS's `Attestation` struct this crate uses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EasAttestation {
    pub uid: H256,
    pub schema: H256,
    pub time: u64,
    pub revocation_time: u64,
    pub recipient: Address,
    pub attester: Address,
    pub data: Bytes,
}

/// Decodes the return value of `getAttestation`.
pub fn decode_attestation(data: &[u8]) -> Result<EasAttestation> {
    let params = [ParamType::Tuple(vec![
        ParamType::FixedBytes(32),
        ParamType::FixedBytes(32),
        ParamType::Uint(64),
        ParamType::Uint(64),
        ParamType::Uint(64),
        ParamType::FixedBytes(32),
        ParamType::Address,
        ParamType::Address,
        ParamType::Bool,
        ParamType::Bytes,
    ])];
    let tokens = decode(&params, data).map_err(|e| AttestError::Ledger(e.to_string()))?;
    if let [Token::Tuple(fields)] = tokens.as_slice() {
        if let [uid, schema, Token::Uint(time), _, Token::Uint(revocation_time), _, Token::Address(recipient), Token::Address(attester), _, Token::Bytes(body)] =
            fields.as_slice()
        {
            return Ok(EasAttestation {
                uid: word(uid.clone())?,
                schema: word(schema.clone())?,
                time: time.low_u64(),
                revocation_time: revocation_time.low_u64(),
                recipient: *recipient,
                attester: *attester,
                data: Bytes::from(body.clone()),
            });
        }
    }
    Err(AttestError::Ledger("malformed attestation".to_string()))
}

/// View calls on the governance token that decide delegation roles.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TokenQuery {
    Votes,
    Balance,
    Delegate,
}

impl TokenQuery {
    pub fn encode(self, account: Address) -> Bytes {
        let signature = match self {
            TokenQuery::Votes => TOKEN_GET_VOTES,
            TokenQuery::Balance => TOKEN_BALANCE_OF,
            TokenQuery::Delegate => TOKEN_DELEGATES,
        };
        with_selector(signature, &[Token::Address(account)])
    }
}

pub fn decode_uint(data: &[u8]) -> Result<U256> {
    match decode(&[ParamType::Uint(256)], data)
        .map_err(|e| AttestError::Ledger(e.to_string()))?
        .as_slice()
    {
        [Token::Uint(value)] => Ok(*value),
        _ => Err(AttestError::Ledger("expected uint256".to_string())),
    }
}

pub fn decode_address(data: &[u8]) -> Result<Address> {
    match decode(&[ParamType::Address], data)
        .map_err(|e| AttestError::Ledger(e.to_string()))?
        .as_slice()
    {
        [Token::Address(address)] => Ok(*address),
        _ => Err(AttestError::Ledger("expected address".to_string())),
    }
}

/// The round of a badgeholder attestation body `(string rpgfRound, address referredBy, string
/// referredMethod)`.
pub fn decode_badgeholder_round(data: &[u8]) -> Result<u64> {
    let params = [ParamType::String, ParamType::Address, ParamType::String];
    let tokens = decode(&params, data).map_err(|e| AttestError::Indexer(e.to_string()))?;
    match tokens.as_slice() {
        [Token::String(round), _, _] => round
            .trim()
            .parse()
            .map_err(|_| AttestError::Indexer(format!("badgeholder round {round:?} is not a number"))),
        _ => Err(AttestError::Indexer("unexpected badgeholder attestation shape".to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> AttestationPayload {
        AttestationPayload {
            role: Role::Badgeholder,
            title: "Endorsement".to_string(),
            message: "Consistently shipped public goods.".to_string(),
            reference: Bytes::from(vec![0u8; 32]),
        }
    }

    #[test]
    fn payload_layout_matches_abi_encoding() {
        let data = encode_payload(&payload());
        // head: role, three offsets
        assert_eq!(data[31], 1);
        assert_eq!(U256::from_big_endian(&data[32..64]), U256::from(128));
        assert_eq!(decode_payload(&data).unwrap(), payload());
    }

    #[test]
    fn foreign_payloads_fail_to_decode() {
        let foreign = encode(&[
            Token::String("round 3".into()),
            Token::Address(Address::repeat_byte(1)),
            Token::String("direct".into()),
        ]);
        assert!(decode_payload(&foreign).is_err());

        let mut bad_role = payload_tokens(&payload());
        bad_role[0] = Token::Uint(U256::from(9));
        assert!(decode_payload(&encode(&bad_role)).is_err());
    }

    #[test]
    fn revoke_selector_is_the_contract_one() {
        let call = AttesterCall::AnonymousRevoke {
            schema: H256::zero(),
            uid: H256::zero(),
            revoker: H256::zero(),
        };
        let data = call.encode();
        assert_eq!(&data[..4], &id("revoke(bytes32,bytes32,bytes32)"));
        assert_eq!(data.len(), 4 + 3 * 32);
        assert!(AttesterCall::decode(&[0xde, 0xad, 0xbe, 0xef]).is_err());
    }

    #[test]
    fn token_queries_use_erc20_votes_selectors() {
        let account = Address::repeat_byte(0x11);
        let votes = TokenQuery::Votes.encode(account);
        assert_eq!(&votes[..4], &[0x9a, 0xb2, 0x4e, 0xb0]);
        assert_eq!(&votes[16..36], account.as_bytes());
        assert_eq!(&TokenQuery::Balance.encode(account)[..4], &[0x70, 0xa0, 0x82, 0x31]);
        assert_eq!(&TokenQuery::Delegate.encode(account)[..4], &[0x58, 0x7c, 0xde, 0x1e]);

        assert_eq!(decode_uint(&encode(&[Token::Uint(U256::from(5))])).unwrap(), U256::from(5));
        assert_eq!(decode_address(&encode(&[Token::Address(account)])).unwrap(), account);
        assert!(matches!(decode_uint(&[1, 2, 3]), Err(AttestError::Ledger(_))));
    }

    #[test]
    fn badgeholder_round_is_read_from_the_body() {
        let body = encode(&[
            Token::String("5".into()),
            Token::Address(Address::repeat_byte(1)),
            Token::String("direct".into()),
        ]);
        assert_eq!(decode_badgeholder_round(&body).unwrap(), 5);

        let named = encode(&[
            Token::String("round five".into()),
            Token::Address(Address::repeat_byte(1)),
            Token::String("direct".into()),
        ]);
        assert!(matches!(decode_badgeholder_round(&named), Err(AttestError::Indexer(_))));
    }
}
