//! TPM 2.0 Key File adapter (`tpm2.0` and `systemd` targets share this
//! container, §6).
//!
//! ASN.1 `TSSPRIVKEY`, DER-encoded via `picky-asn1`/`picky-asn1-der` —
//! the same crate family the pack's WebAuthn/FIDO2-style ASN.1 users
//! reach for (see `SPEC_FULL.md` §6). `policy` carries the direct
//! `PolicyPCR` alternative (a marshalled `TPML_PCR_SELECTION`, no
//! embedded digest: an empty digest tells the TPM to compute the PCR
//! composite itself from live register contents); `authPolicy` carries
//! zero or more named `PolicyAuthorize` alternatives, each a marshalled
//! `(TPM2B_PUBLIC, TPM2B_DIGEST policyRef, TPMT_SIGNATURE)` triple.

use picky_asn1::wrapper::{
    Asn1SequenceOf, ExplicitContextTag0, ExplicitContextTag1, ExplicitContextTag2,
    ExplicitContextTag3, IntegerAsn1, ObjectIdentifierAsn1, OctetStringAsn1, Utf8StringAsn1,
};
use serde::{Deserialize, Serialize};

use crate::error::{PredictError, Result};
use crate::policy::{PolicyCommand, SealedObject};

/// `2.23.133.10.1.3` — the `TSSPRIVKEY` object identifier used by every
/// implementation of this container (tpm2-tss's OpenSSL engine, tpm2-pytss,
/// `systemd-cryptenroll`).
pub const TSS_KEY_TYPE_OID: &str = "2.23.133.10.1.3";

/// `TPM_RH_OWNER`.
pub const TPM2_RH_OWNER: u32 = 0x4000_0001;

/// TCG TPM2 command codes this adapter embeds in `policy`/`authPolicy`.
pub const TPM2_CC_POLICY_AUTHORIZE: u32 = 0x0000_016a;
pub const TPM2_CC_POLICY_PCR: u32 = 0x0000_017f;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Asn1CommandPolicy {
    command_code: ExplicitContextTag0<IntegerAsn1>,
    command_policy: ExplicitContextTag1<OctetStringAsn1>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Asn1AuthPolicy {
    name: Option<ExplicitContextTag0<Utf8StringAsn1>>,
    policy: ExplicitContextTag1<Asn1SequenceOf<Asn1CommandPolicy>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Asn1TssPrivKey {
    key_type: ObjectIdentifierAsn1,
    empty_auth: Option<ExplicitContextTag0<bool>>,
    policy: Option<ExplicitContextTag1<Asn1SequenceOf<Asn1CommandPolicy>>>,
    secret: Option<ExplicitContextTag2<OctetStringAsn1>>,
    auth_policy: Option<ExplicitContextTag3<Asn1SequenceOf<Asn1AuthPolicy>>>,
    parent: IntegerAsn1,
    pubkey: OctetStringAsn1,
    privkey: OctetStringAsn1,
}

/// One named `authPolicy` alternative: a human-readable label (the
/// `--policy-name` the signer chose) plus the ordered commands
/// `unseal_policy_seq` replays.
#[derive(Debug, Clone)]
pub struct NamedAlternative {
    pub name: Option<String>,
    pub commands: Vec<PolicyCommand>,
}

fn encode_command(command: &PolicyCommand) -> Asn1CommandPolicy {
    let (code, payload) = match command {
        PolicyCommand::Pcr { pcr_mask, .. } => {
            // The embedded alternative carries only the selection: the
            // live TPM computes pcrDigest itself when PolicyPCR is
            // called with an empty digest (see policy::unseal_secret).
            (TPM2_CC_POLICY_PCR, pcr_mask.to_le_bytes().to_vec())
        }
        PolicyCommand::Authorize {
            public_key,
            policy_ref,
            signature,
        } => {
            let mut payload = Vec::new();
            payload.extend_from_slice(&(public_key.len() as u32).to_be_bytes());
            payload.extend_from_slice(public_key);
            payload.extend_from_slice(&(policy_ref.len() as u32).to_be_bytes());
            payload.extend_from_slice(policy_ref);
            payload.extend_from_slice(signature);
            (TPM2_CC_POLICY_AUTHORIZE, payload)
        }
    };
    Asn1CommandPolicy {
        command_code: ExplicitContextTag0::from(IntegerAsn1::from(code.to_be_bytes().to_vec())),
        command_policy: ExplicitContextTag1::from(OctetStringAsn1::from(payload)),
    }
}

fn decode_command(entry: &Asn1CommandPolicy) -> Result<PolicyCommand> {
    let code = integer_to_u32(&entry.command_code.0)?;
    let payload: &[u8] = entry.command_policy.0.as_ref();
    match code {
        TPM2_CC_POLICY_PCR => {
            if payload.len() != 4 {
                return Err(PredictError::BadFormat(
                    "PolicyPCR command policy payload must be 4 bytes".to_string(),
                ));
            }
            let pcr_mask = u32::from_le_bytes(payload.try_into().unwrap());
            Ok(PolicyCommand::Pcr {
                digest: crate::digest::Digest::new(crate::digest::ALG_SHA256, Vec::new()),
                pcr_mask,
            })
        }
        TPM2_CC_POLICY_AUTHORIZE => {
            let mut offset = 0usize;
            let public_key = read_length_prefixed(payload, &mut offset)?;
            let policy_ref = read_length_prefixed(payload, &mut offset)?;
            let signature = payload
                .get(offset..)
                .ok_or_else(|| PredictError::Truncated("authPolicy signature missing".to_string()))?
                .to_vec();
            Ok(PolicyCommand::Authorize {
                public_key,
                policy_ref,
                signature,
            })
        }
        other => Err(PredictError::UnknownVariant(format!(
            "unsupported TSSOPTPOLICY command code {other:#x}"
        ))),
    }
}

fn read_length_prefixed(data: &[u8], offset: &mut usize) -> Result<Vec<u8>> {
    let len_bytes = data
        .get(*offset..*offset + 4)
        .ok_or_else(|| PredictError::Truncated("length-prefixed field missing".to_string()))?;
    let len = u32::from_be_bytes(len_bytes.try_into().unwrap()) as usize;
    *offset += 4;
    let value = data
        .get(*offset..*offset + len)
        .ok_or_else(|| PredictError::Truncated("length-prefixed field truncated".to_string()))?
        .to_vec();
    *offset += len;
    Ok(value)
}

fn integer_to_u32(integer: &IntegerAsn1) -> Result<u32> {
    let bytes: &[u8] = integer.as_unsigned_bytes_be();
    if bytes.len() > 4 {
        return Err(PredictError::BadFormat(
            "command code does not fit in u32".to_string(),
        ));
    }
    let mut buf = [0u8; 4];
    buf[4 - bytes.len()..].copy_from_slice(bytes);
    Ok(u32::from_be_bytes(buf))
}

/// Encodes a TPM 2.0 Key File: `sealed`'s public/private halves, an
/// optional direct `PolicyPCR` selection, and zero or more named
/// authorized-policy alternatives.
pub fn encode(
    sealed: &SealedObject,
    direct_pcr_selection: Option<u32>,
    authorized: &[NamedAlternative],
) -> Result<Vec<u8>> {
    let key = Asn1TssPrivKey {
        key_type: ObjectIdentifierAsn1::from(
            picky_asn1::oid::ObjectIdentifier::try_from(TSS_KEY_TYPE_OID)
                .map_err(|_| PredictError::BadFormat("invalid TSSPRIVKEY OID".to_string()))?,
        ),
        empty_auth: Some(ExplicitContextTag0::from(true)),
        policy: direct_pcr_selection.map(|mask| {
            ExplicitContextTag1::from(Asn1SequenceOf::from(vec![encode_command(
                &PolicyCommand::Pcr {
                    digest: crate::digest::Digest::new(crate::digest::ALG_SHA256, Vec::new()),
                    pcr_mask: mask,
                },
            )]))
        }),
        secret: None,
        auth_policy: if authorized.is_empty() {
            None
        } else {
            Some(ExplicitContextTag3::from(Asn1SequenceOf::from(
                authorized
                    .iter()
                    .map(|alt| Asn1AuthPolicy {
                        name: alt
                            .name
                            .as_ref()
                            .map(|n| ExplicitContextTag0::from(Utf8StringAsn1::from(n.clone()))),
                        policy: ExplicitContextTag1::from(Asn1SequenceOf::from(
                            alt.commands.iter().map(encode_command).collect::<Vec<_>>(),
                        )),
                    })
                    .collect::<Vec<_>>(),
            )))
        },
        parent: IntegerAsn1::from(TPM2_RH_OWNER.to_be_bytes().to_vec()),
        pubkey: OctetStringAsn1::from(sealed.public.clone()),
        privkey: OctetStringAsn1::from(sealed.private.clone()),
    };

    picky_asn1_der::to_vec(&key).map_err(PredictError::from)
}

/// Decoded form of a TPM 2.0 Key File: the sealed object plus every
/// policy alternative `unseal_policy_seq` (component H) should try in
/// order — the direct `PolicyPCR` selection first (if present), then
/// each named `authPolicy` alternative.
pub struct Decoded {
    pub sealed: SealedObject,
    pub alternatives: Vec<Vec<PolicyCommand>>,
}

pub fn decode(data: &[u8]) -> Result<Decoded> {
    let key: Asn1TssPrivKey = picky_asn1_der::from_bytes(data).map_err(PredictError::from)?;

    let mut alternatives = Vec::new();
    if let Some(policy) = &key.policy {
        let commands: Result<Vec<PolicyCommand>> =
            policy.0 .0.iter().map(decode_command).collect();
        alternatives.push(commands?);
    }
    if let Some(auth_policy) = &key.auth_policy {
        for alt in auth_policy.0 .0.iter() {
            let commands: Result<Vec<PolicyCommand>> =
                alt.policy.0 .0.iter().map(decode_command).collect();
            alternatives.push(commands?);
        }
    }

    Ok(Decoded {
        sealed: SealedObject {
            public: key.pubkey.0.clone(),
            private: key.privkey.0.clone(),
        },
        alternatives,
    })
}

pub fn write(path: &std::path::Path, bytes: &[u8]) -> Result<()> {
    std::fs::write(path, bytes)?;
    Ok(())
}

pub fn read(path: &std::path::Path) -> Result<Vec<u8>> {
    Ok(std::fs::read(path)?)
}
