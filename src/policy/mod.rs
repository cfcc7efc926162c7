//! TPM policy builder and sealing engine (component H).
//!
//! Builds trial-session `PolicyPCR` / `PolicyAuthorize` digests against
//! *predicted* PCR values (never against a live read — `bank` is always the
//! rehashed/predicted set), signs them off-TPM with an RSA key, and
//! seals/unseals secrets under the resulting policy. Every ESYS session and
//! object handle this module opens is flushed before the call returns,
//! including on the error path — see [`SessionGuard`]/[`ObjectGuard`].
//!
//! The TPM is only ever touched from here; callers (platform adapters, the
//! CLI) deal exclusively in already-marshalled bytes and our own
//! [`crate::digest::Digest`] type, never in `tss_esapi` structures.

pub mod srk;

use std::convert::TryFrom;

use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;

use tss_esapi::constants::SessionType;
use tss_esapi::handles::ObjectHandle;
use tss_esapi::interface_types::algorithm::HashingAlgorithm;
use tss_esapi::interface_types::resource_handles::Hierarchy;
use tss_esapi::interface_types::session_handles::AuthSession;
use tss_esapi::structures::{
    Digest as TpmDigest, MaxBuffer, PcrSelectionListBuilder, PcrSlot, Private as TpmPrivate,
    Public as TpmPublic, PublicKeyRsa, SensitiveData, Signature as TpmSignature, SignatureRsassa,
    SymmetricDefinitionObject,
};
use tss_esapi::traits::{Marshall, UnMarshall};
use tss_esapi::tcti_ldr::TctiNameConf;
use tss_esapi::Context;

use crate::bank::PcrBank;
use crate::digest::Digest;
use crate::error::{PredictError, Result};

/// Maximum plaintext size accepted by [`TpmPolicyEngine::seal`] — the
/// `TPM2B_SENSITIVE_DATA` buffer is 128 bytes on every TPM 2.0
/// implementation we target.
pub const MAX_SECRET_SIZE: usize = 128;

/// A sealed object, already marshalled to the TPM's wire format. Platform
/// adapters consume these bytes directly (`oldgrub`) or re-parse them into
/// a richer container (`tpm2.0`, `systemd`) — this module never hands out
/// `tss_esapi` structures across its boundary.
pub struct SealedObject {
    pub public: Vec<u8>,
    pub private: Vec<u8>,
}

/// A signed PCR policy: the plain policy digest, and an RSASSA-SHA256
/// signature over it.
pub struct SignedPolicy {
    pub policy_digest: Digest,
    pub signature: Vec<u8>,
}

/// One `PolicyPCR` or `PolicyAuthorize` step out of a TPM 2.0 Key File's
/// `authPolicy` sequence (see `adapters::tpm2_0`). `unseal_policy_seq`
/// replays these against a policy session in order.
pub enum PolicyCommand {
    Pcr {
        digest: Digest,
        pcr_mask: u32,
    },
    Authorize {
        public_key: Vec<u8>,
        policy_ref: Vec<u8>,
        signature: Vec<u8>,
    },
}

/// Which PCRs and hash algorithm a policy/seal operation is defined over —
/// the direct analog of the original's `tpm_pcr_selection_t`.
#[derive(Debug, Clone, Copy)]
pub struct PcrSelection {
    pub pcr_mask: u32,
    pub algo: crate::digest::AlgoInfo,
}

/// RAII guard flushing an ESYS session handle on drop, so every exit path —
/// including `?` early-returns — releases the TPM resource.
struct SessionGuard<'a> {
    context: &'a mut Context,
    session: Option<AuthSession>,
}

impl<'a> SessionGuard<'a> {
    fn start(context: &'a mut Context, session_type: SessionType) -> Result<Self> {
        let session = context
            .start_auth_session(
                None,
                None,
                None,
                session_type,
                SymmetricDefinitionObject::AES_128_CFB,
                HashingAlgorithm::Sha256,
            )
            .map_err(PredictError::from)?;
        Ok(SessionGuard { context, session })
    }

    fn handle(&self) -> AuthSession {
        self.session.expect("TPM always returns a session handle for Trial/Policy")
    }
}

impl<'a> Drop for SessionGuard<'a> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = self.context.flush_context(session.handle().into());
        }
    }
}

/// RAII guard flushing a loaded/created ESYS object handle on drop.
struct ObjectGuard<'a> {
    context: &'a mut Context,
    handle: Option<ObjectHandle>,
}

impl<'a> ObjectGuard<'a> {
    fn new(context: &'a mut Context, handle: ObjectHandle) -> Self {
        ObjectGuard {
            context,
            handle: Some(handle),
        }
    }
}

impl<'a> Drop for ObjectGuard<'a> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.context.flush_context(handle);
        }
    }
}

fn pcr_selection_list(
    mask: u32,
    algo: &crate::digest::AlgoInfo,
) -> Result<tss_esapi::structures::PcrSelectionList> {
    let mut slots = Vec::new();
    for i in 0..crate::bank::PCR_BANK_REGISTER_MAX {
        if mask & (1 << i) != 0 {
            slots.push(pcr_slot_for_index(i)?);
        }
    }
    let hash_alg = hashing_algorithm_for(algo.id)?;
    let mut builder = PcrSelectionListBuilder::new();
    if !slots.is_empty() {
        builder = builder.with_selection(hash_alg, &slots);
    }
    builder.build().map_err(PredictError::from)
}

fn pcr_slot_for_index(index: usize) -> Result<PcrSlot> {
    PcrSlot::try_from(1u32 << index).map_err(|_| {
        PredictError::BadFormat(format!("PCR index {index} has no PcrSlot representation"))
    })
}

fn hashing_algorithm_for(algo_id: crate::digest::AlgoId) -> Result<HashingAlgorithm> {
    match algo_id {
        crate::digest::ALG_SHA1 => Ok(HashingAlgorithm::Sha1),
        crate::digest::ALG_SHA256 => Ok(HashingAlgorithm::Sha256),
        crate::digest::ALG_SHA384 => Ok(HashingAlgorithm::Sha384),
        crate::digest::ALG_SHA512 => Ok(HashingAlgorithm::Sha512),
        crate::digest::ALG_SM3_256 => Ok(HashingAlgorithm::Sm3_256),
        other => Err(PredictError::UnsupportedAlgo(format!("{other:#06x}"))),
    }
}

/// Thin wrapper around an ESYS context. Construction talks to the TPM
/// (or its simulator, via `TCTI`); every other method is a single
/// logical TPM operation with guaranteed cleanup.
pub struct TpmPolicyEngine {
    context: Context,
}

impl TpmPolicyEngine {
    /// Opens the TPM via the `tcti` locator (e.g. `device:/dev/tpmrm0`,
    /// or the value of the `TPM2TOOLS_TCTI`/`TCTI` environment variable
    /// when `tcti` is `None`).
    pub fn new(tcti: Option<&str>) -> Result<Self> {
        let tcti_conf = match tcti {
            Some(s) => TctiNameConf::from_str(s).map_err(PredictError::from)?,
            None => TctiNameConf::from_environment_variable().map_err(PredictError::from)?,
        };
        let context = Context::new(tcti_conf).map_err(PredictError::from)?;
        Ok(TpmPolicyEngine { context })
    }

    fn create_primary(&mut self) -> Result<ObjectHandle> {
        let public = srk::srk_template()?;
        let created = self
            .context
            .execute_with_nullauth_session(|ctx| {
                ctx.create_primary(
                    Hierarchy::Owner,
                    public,
                    None,
                    None,
                    None,
                    None,
                )
            })
            .map_err(PredictError::from)?;
        Ok(created.key_handle.into())
    }

    /// Trial-session `PolicyPCR` digest over `bank`'s *valid* registers —
    /// the plain (unauthorized) PCR policy.
    pub fn pcr_policy_digest(&mut self, bank: &PcrBank) -> Result<Digest> {
        let pcr_values = pcr_composite_buffer(bank);
        let pcr_digest = TpmDigest::try_from(pcr_values).map_err(PredictError::from)?;
        let selection = pcr_selection_list(bank.valid_mask, &bank.algo)?;

        let guard = SessionGuard::start(&mut self.context, SessionType::Trial)?;
        let session = guard.handle();
        guard
            .context
            .execute_with_session(Some(session), |ctx| {
                ctx.policy_pcr(session, pcr_digest, selection)
            })
            .map_err(PredictError::from)?;
        let digest = guard
            .context
            .policy_get_digest(session)
            .map_err(PredictError::from)?;
        Ok(Digest::new(crate::digest::ALG_SHA256, digest.to_vec()))
    }

    /// Loads `public_key` (a marshalled `TPM2B_PUBLIC` RSA signing key) and
    /// wraps `pcr_policy` in a trial `PolicyAuthorize`, yielding the
    /// authorized-policy digest that gets baked into the sealed object
    /// instead of the raw PCR policy.
    pub fn authorized_policy_digest(
        &mut self,
        pcr_policy: &Digest,
        public_key: &TpmPublic,
    ) -> Result<Digest> {
        let loaded = self
            .context
            .execute_with_nullauth_session(|ctx| {
                ctx.load_external_public(public_key.clone(), Hierarchy::Owner)
            })
            .map_err(PredictError::from)?;
        let _object_guard = ObjectGuard::new(&mut self.context, loaded.into());
        let public_key_name = self
            .context
            .tr_get_name(loaded.into())
            .map_err(PredictError::from)?;

        let guard = SessionGuard::start(&mut self.context, SessionType::Trial)?;
        let session = guard.handle();
        let pcr_policy_digest =
            TpmDigest::try_from(pcr_policy.bytes.clone()).map_err(PredictError::from)?;

        let check_ticket = tss_esapi::structures::Ticket::Verified(
            tss_esapi::tss2_esys::TPMT_TK_VERIFIED {
                tag: tss_esapi::constants::tss::TPM2_ST_VERIFIED,
                hierarchy: tss_esapi::constants::tss::TPM2_RH_OWNER,
                digest: Default::default(),
            },
        );

        guard
            .context
            .execute_with_session(Some(session), |ctx| {
                ctx.policy_authorize(
                    session,
                    pcr_policy_digest,
                    Default::default(),
                    &public_key_name,
                    check_ticket.clone(),
                )
            })
            .map_err(PredictError::from)?;

        let digest = guard
            .context
            .policy_get_digest(session)
            .map_err(PredictError::from)?;
        Ok(Digest::new(crate::digest::ALG_SHA256, digest.to_vec()))
    }

    /// Seals `plaintext` under `policy_digest` using a fresh SRK as parent.
    pub fn seal(&mut self, policy_digest: &Digest, plaintext: &[u8]) -> Result<SealedObject> {
        if plaintext.len() > MAX_SECRET_SIZE {
            return Err(PredictError::BadFormat(format!(
                "secret is {} bytes, maximum is {MAX_SECRET_SIZE}",
                plaintext.len()
            )));
        }

        let srk_handle = self.create_primary()?;
        let _srk_guard = ObjectGuard::new(&mut self.context, srk_handle);

        let auth_policy =
            TpmDigest::try_from(policy_digest.bytes.clone()).map_err(PredictError::from)?;
        let public = srk::seal_template(auth_policy)?;
        let sensitive_data =
            SensitiveData::try_from(plaintext.to_vec()).map_err(PredictError::from)?;

        let created = self
            .context
            .execute_with_nullauth_session(|ctx| {
                ctx.create(srk_handle.into(), public, None, Some(sensitive_data.clone()), None, None)
            })
            .map_err(PredictError::from)?;

        Ok(SealedObject {
            public: created.out_public.marshall().map_err(PredictError::from)?,
            private: created.out_private.marshall().map_err(PredictError::from)?,
        })
    }

    /// Load+unseal a sealed object whose policy is a direct (unauthorized)
    /// `PolicyPCR` against `bank`'s currently-predicted values.
    pub fn unseal_secret(&mut self, bank: &PcrBank, sealed: &SealedObject) -> Result<Vec<u8>> {
        let public = TpmPublic::unmarshall(&sealed.public).map_err(PredictError::from)?;
        let private = TpmPrivate::unmarshall(&sealed.private).map_err(PredictError::from)?;

        let srk_handle = self.create_primary()?;
        let _srk_guard = ObjectGuard::new(&mut self.context, srk_handle);

        let loaded = self
            .context
            .execute_with_nullauth_session(|ctx| ctx.load(srk_handle.into(), private, public))
            .map_err(PredictError::from)?;
        let _object_guard = ObjectGuard::new(&mut self.context, loaded.into());

        let selection = pcr_selection_list(bank.pcr_mask, &bank.algo)?;
        let guard = SessionGuard::start(&mut self.context, SessionType::Policy)?;
        let session = guard.handle();
        guard
            .context
            .execute_with_session(Some(session), |ctx| {
                ctx.policy_pcr(session, TpmDigest::default(), selection)
            })
            .map_err(PredictError::from)?;

        let unsealed = guard
            .context
            .execute_with_session(Some(session), |ctx| ctx.unseal(loaded.into()))
            .map_err(PredictError::from)?;
        Ok(unsealed.to_vec())
    }

    /// Unseal a sealed object whose policy is an authorized PCR policy:
    /// verify `signature` over the live `PolicyPCR` digest with
    /// `public_key`, then `PolicyAuthorize` before unsealing.
    pub fn unseal_authorized(
        &mut self,
        bank: &PcrBank,
        public_key: &TpmPublic,
        signature: &TpmSignature,
        sealed: &SealedObject,
    ) -> Result<Vec<u8>> {
        let public = TpmPublic::unmarshall(&sealed.public).map_err(PredictError::from)?;
        let private = TpmPrivate::unmarshall(&sealed.private).map_err(PredictError::from)?;

        let pub_key_handle = self
            .context
            .execute_with_nullauth_session(|ctx| {
                ctx.load_external_public(public_key.clone(), Hierarchy::Owner)
            })
            .map_err(PredictError::from)?;
        let _pub_guard = ObjectGuard::new(&mut self.context, pub_key_handle.into());
        let public_key_name = self
            .context
            .tr_get_name(pub_key_handle.into())
            .map_err(PredictError::from)?;

        let srk_handle = self.create_primary()?;
        let _srk_guard = ObjectGuard::new(&mut self.context, srk_handle);
        let loaded = self
            .context
            .execute_with_nullauth_session(|ctx| ctx.load(srk_handle.into(), private, public))
            .map_err(PredictError::from)?;
        let _object_guard = ObjectGuard::new(&mut self.context, loaded.into());

        let selection = pcr_selection_list(bank.pcr_mask, &bank.algo)?;
        let guard = SessionGuard::start(&mut self.context, SessionType::Policy)?;
        let session = guard.handle();
        guard
            .context
            .execute_with_session(Some(session), |ctx| {
                ctx.policy_pcr(session, TpmDigest::default(), selection)
            })
            .map_err(PredictError::from)?;

        let pcr_policy = guard
            .context
            .policy_get_digest(session)
            .map_err(PredictError::from)?;
        let pcr_policy_hash = guard
            .context
            .hash(
                MaxBuffer::try_from(pcr_policy.to_vec()).map_err(PredictError::from)?,
                HashingAlgorithm::Sha256,
                Hierarchy::Null,
            )
            .map_err(PredictError::from)?
            .0;

        let verification_ticket = guard
            .context
            .verify_signature(pub_key_handle.into(), pcr_policy_hash, signature.clone())
            .map_err(PredictError::from)?;

        guard
            .context
            .execute_with_session(Some(session), |ctx| {
                ctx.policy_authorize(
                    session,
                    pcr_policy.clone(),
                    Default::default(),
                    &public_key_name,
                    verification_ticket,
                )
            })
            .map_err(PredictError::from)?;

        let unsealed = guard
            .context
            .execute_with_session(Some(session), |ctx| ctx.unseal(loaded.into()))
            .map_err(PredictError::from)?;
        Ok(unsealed.to_vec())
    }

    /// Replays an embedded TPM 2.0 Key File policy sequence against a
    /// fresh policy session, trying each `authPolicy` alternative in turn —
    /// the first one whose commands all succeed wins (mirrors the TSS
    /// multi-alternative `authPolicy` semantics). Returns the plaintext on
    /// the first success, or the last error if every alternative failed.
    pub fn unseal_policy_seq(
        &mut self,
        sealed: &SealedObject,
        alternatives: &[Vec<PolicyCommand>],
    ) -> Result<Vec<u8>> {
        let public = TpmPublic::unmarshall(&sealed.public).map_err(PredictError::from)?;
        let private = TpmPrivate::unmarshall(&sealed.private).map_err(PredictError::from)?;

        let srk_handle = self.create_primary()?;
        let _srk_guard = ObjectGuard::new(&mut self.context, srk_handle);
        let loaded = self
            .context
            .execute_with_nullauth_session(|ctx| ctx.load(srk_handle.into(), private, public))
            .map_err(PredictError::from)?;
        let _object_guard = ObjectGuard::new(&mut self.context, loaded.into());

        let mut last_err = PredictError::PolicyMismatch;
        for commands in alternatives {
            match self.try_policy_sequence(loaded.into(), commands) {
                Ok(plaintext) => return Ok(plaintext),
                Err(e) => last_err = e,
            }
        }
        Err(last_err)
    }

    fn try_policy_sequence(
        &mut self,
        sealed_object: ObjectHandle,
        commands: &[PolicyCommand],
    ) -> Result<Vec<u8>> {
        let guard = SessionGuard::start(&mut self.context, SessionType::Policy)?;
        let session = guard.handle();

        for command in commands {
            match command {
                PolicyCommand::Pcr { digest, pcr_mask } => {
                    let selection = pcr_selection_list(*pcr_mask, &digest_algo(digest)?)?;
                    let pcr_digest =
                        TpmDigest::try_from(digest.bytes.clone()).map_err(PredictError::from)?;
                    guard
                        .context
                        .execute_with_session(Some(session), |ctx| {
                            ctx.policy_pcr(session, pcr_digest.clone(), selection.clone())
                        })
                        .map_err(PredictError::from)?;
                }
                PolicyCommand::Authorize {
                    public_key,
                    policy_ref,
                    signature,
                } => {
                    let public_key = TpmPublic::unmarshall(public_key).map_err(PredictError::from)?;
                    let signature = TpmSignature::unmarshall(signature).map_err(PredictError::from)?;

                    let pub_key_handle = guard
                        .context
                        .execute_with_nullauth_session(|ctx| {
                            ctx.load_external_public(public_key.clone(), Hierarchy::Owner)
                        })
                        .map_err(PredictError::from)?;
                    let _pub_guard = ObjectGuard::new(guard.context, pub_key_handle.into());
                    let public_key_name = guard
                        .context
                        .tr_get_name(pub_key_handle.into())
                        .map_err(PredictError::from)?;

                    let pcr_policy = guard
                        .context
                        .policy_get_digest(session)
                        .map_err(PredictError::from)?;
                    let hash_alg = signature_hash_algorithm(&signature);
                    let pcr_policy_hash = guard
                        .context
                        .hash(
                            MaxBuffer::try_from(pcr_policy.to_vec()).map_err(PredictError::from)?,
                            hash_alg,
                            Hierarchy::Null,
                        )
                        .map_err(PredictError::from)?
                        .0;

                    let verification_ticket = guard
                        .context
                        .verify_signature(pub_key_handle.into(), pcr_policy_hash, signature)
                        .map_err(PredictError::from)?;

                    let policy_ref =
                        TpmDigest::try_from(policy_ref.clone()).map_err(PredictError::from)?;
                    guard
                        .context
                        .execute_with_session(Some(session), |ctx| {
                            ctx.policy_authorize(
                                session,
                                pcr_policy.clone(),
                                policy_ref.clone(),
                                &public_key_name,
                                verification_ticket.clone(),
                            )
                        })
                        .map_err(PredictError::from)?;
                }
            }
        }

        let unsealed = guard
            .context
            .execute_with_session(Some(session), |ctx| ctx.unseal(sealed_object))
            .map_err(PredictError::from)?;
        Ok(unsealed.to_vec())
    }
}

fn digest_algo(digest: &Digest) -> Result<crate::digest::AlgoInfo> {
    crate::digest::AlgoRegistry::default()
        .lookup(digest.algo_id)
        .cloned()
        .ok_or_else(|| PredictError::UnsupportedAlgo(format!("{:#06x}", digest.algo_id)))
}

fn signature_hash_algorithm(signature: &TpmSignature) -> HashingAlgorithm {
    match signature {
        TpmSignature::RsaSsa(s) => s.hashing_algorithm(),
        TpmSignature::RsaPss(s) => s.hashing_algorithm(),
        TpmSignature::EcDsa(s) => s.hashing_algorithm(),
        _ => HashingAlgorithm::Sha256,
    }
}

fn pcr_composite_buffer(bank: &PcrBank) -> Vec<u8> {
    let mut buf = Vec::new();
    for i in 0..crate::bank::PCR_BANK_REGISTER_MAX {
        if bank.is_valid(i) {
            buf.extend_from_slice(&bank.get(i).bytes);
        }
    }
    buf
}

/// Loads an RSA private key from a PEM file (PKCS#8 or PKCS#1).
pub fn load_rsa_private_key(path: &std::path::Path) -> Result<RsaPrivateKey> {
    let pem = std::fs::read_to_string(path)?;
    RsaPrivateKey::from_pkcs8_pem(&pem)
        .or_else(|_| {
            use rsa::pkcs1::DecodeRsaPrivateKey;
            RsaPrivateKey::from_pkcs1_pem(&pem)
        })
        .map_err(|e| PredictError::Crypto(format!("failed to load RSA private key: {e}")))
}

/// Loads an RSA public key from a PEM file (SubjectPublicKeyInfo or
/// PKCS#1), or derives it from a private key file if `path` holds one.
pub fn load_rsa_public_key(path: &std::path::Path) -> Result<RsaPublicKey> {
    let pem = std::fs::read_to_string(path)?;
    if let Ok(key) = RsaPublicKey::from_public_key_pem(&pem) {
        return Ok(key);
    }
    if let Ok(key) = load_rsa_private_key(path) {
        return Ok(key.to_public_key());
    }
    Err(PredictError::Crypto(format!(
        "{} does not contain a recognizable RSA public or private key",
        path.display()
    )))
}

/// Builds the native TSS2 `TPM2B_PUBLIC` form of an RSA signing key so it
/// can be `LoadExternal`ed into the TPM for `PolicyAuthorize`/
/// `VerifySignature`, or written out via `store_public_key`.
pub fn rsa_public_to_tpm_public(key: &RsaPublicKey) -> Result<TpmPublic> {
    use rsa::traits::PublicKeyParts;

    let modulus = key.n().to_bytes_be();
    let key_bits = match modulus.len() * 8 {
        1024 => tss_esapi::interface_types::key_bits::RsaKeyBits::Rsa1024,
        3072 => tss_esapi::interface_types::key_bits::RsaKeyBits::Rsa3072,
        4096 => tss_esapi::interface_types::key_bits::RsaKeyBits::Rsa4096,
        _ => tss_esapi::interface_types::key_bits::RsaKeyBits::Rsa2048,
    };
    let rsa_modulus = PublicKeyRsa::try_from(modulus).map_err(PredictError::from)?;
    srk::rsa_signing_public_template(rsa_modulus, key_bits)
}

/// Signs `digest` with `rsa_key` using RSASSA-PKCS1-v1.5 with SHA-256 —
/// this happens entirely off-TPM, over a plain RSA private key file, just
/// as in the original's `tpm_rsa_sign`.
pub fn sign_policy(rsa_key: &RsaPrivateKey, digest: &Digest) -> Result<Vec<u8>> {
    let signing_key = SigningKey::<Sha256>::new(rsa_key.clone());
    let mut rng = rand::thread_rng();
    let signature = signing_key.sign_with_rng(&mut rng, &digest.bytes);
    Ok(signature.to_bytes().to_vec())
}

/// Marshalls a raw RSASSA-PKCS1v1.5-SHA256 signature (as produced by
/// [`sign_policy`]) into a TSS `TPMT_SIGNATURE`, the wire form every
/// platform adapter's signed-policy container stores.
pub fn marshall_rsassa_signature(signature_bytes: Vec<u8>) -> Result<Vec<u8>> {
    let signature = PublicKeyRsa::try_from(signature_bytes).map_err(PredictError::from)?;
    let rsassa = SignatureRsassa::create(HashingAlgorithm::Sha256, signature)
        .map_err(PredictError::from)?;
    TpmSignature::RsaSsa(rsassa).marshall().map_err(PredictError::from)
}

/// Writes the public half of `private_key_file` to `public_key_file` in
/// native TSS2 `TPM2B_PUBLIC` form — so a boot loader can load it without
/// ever having to parse PEM/DER/ASN.1.
pub fn store_public_key(private_key_file: &std::path::Path) -> Result<Vec<u8>> {
    let rsa_key = load_rsa_private_key(private_key_file)?;
    let public = rsa_public_to_tpm_public(&rsa_key.to_public_key())?;
    public.marshall().map_err(PredictError::from)
}

/// Builds an authorized-policy digest against an all-zero `PcrBank` (the
/// selected PCRs carry no particular values — only the *selection* and
/// the signing key matter, see the authorized-policy-invariance property)
/// and `PolicyAuthorize`s it with `public_key`.
pub fn authorized_policy_create(
    engine: &mut TpmPolicyEngine,
    selection: PcrSelection,
    public_key: &RsaPublicKey,
) -> Result<Digest> {
    let registry = crate::digest::AlgoRegistry::default();
    let zero_bank = PcrBank::initialize(selection.pcr_mask, selection.algo, None).init_from_zero();
    let _ = registry;
    let pcr_policy = engine.pcr_policy_digest(&zero_bank)?;
    let tpm_public = rsa_public_to_tpm_public(public_key)?;
    engine.authorized_policy_digest(&pcr_policy, &tpm_public)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rsa::pkcs1v15::VerifyingKey;
    use rsa::signature::Verifier;
    use rsa::traits::PublicKeyParts;

    fn test_key(bits: usize) -> RsaPrivateKey {
        let mut rng = rand::thread_rng();
        RsaPrivateKey::new(&mut rng, bits).unwrap()
    }

    #[test]
    fn sign_policy_produces_a_verifiable_signature() {
        let rsa_key = test_key(1024);
        let digest = Digest::new(crate::digest::ALG_SHA256, vec![7u8; 32]);
        let signature_bytes = sign_policy(&rsa_key, &digest).unwrap();

        let verifying_key: VerifyingKey<Sha256> = VerifyingKey::new(rsa_key.to_public_key());
        let signature = rsa::pkcs1v15::Signature::try_from(signature_bytes.as_slice()).unwrap();
        assert!(verifying_key.verify(&digest.bytes, &signature).is_ok());
    }

    #[test]
    fn sign_policy_rejects_a_tampered_digest() {
        let rsa_key = test_key(1024);
        let digest = Digest::new(crate::digest::ALG_SHA256, vec![7u8; 32]);
        let signature_bytes = sign_policy(&rsa_key, &digest).unwrap();

        let verifying_key: VerifyingKey<Sha256> = VerifyingKey::new(rsa_key.to_public_key());
        let signature = rsa::pkcs1v15::Signature::try_from(signature_bytes.as_slice()).unwrap();
        let tampered = vec![8u8; 32];
        assert!(verifying_key.verify(&tampered, &signature).is_err());
    }

    #[test]
    fn rsa_public_to_tpm_public_round_trips_modulus_size() {
        let rsa_key = test_key(1024);
        let public = rsa_key.to_public_key();
        let tpm_public = rsa_public_to_tpm_public(&public).unwrap();
        let marshalled = tpm_public.marshall().unwrap();
        assert!(!marshalled.is_empty());
        assert_eq!(public.n().to_bytes_be().len() * 8, 1024);
    }

    #[test]
    fn marshall_rsassa_signature_produces_non_empty_wire_bytes() {
        let rsa_key = test_key(1024);
        let digest = Digest::new(crate::digest::ALG_SHA256, vec![3u8; 32]);
        let signature_bytes = sign_policy(&rsa_key, &digest).unwrap();
        let marshalled = marshall_rsassa_signature(signature_bytes).unwrap();
        assert!(!marshalled.is_empty());
    }

    #[test]
    fn load_rsa_private_key_rejects_a_non_key_file() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "not a key").unwrap();
        assert!(load_rsa_private_key(file.path()).is_err());
    }

    #[test]
    fn load_rsa_public_key_derives_from_a_private_key_pem() {
        use rsa::pkcs8::EncodePrivateKey;

        let rsa_key = test_key(1024);
        let pem = rsa_key
            .to_pkcs8_pem(rsa::pkcs8::LineEnding::LF)
            .unwrap()
            .to_string();
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), pem).unwrap();

        let loaded_private = load_rsa_private_key(file.path()).unwrap();
        assert_eq!(loaded_private.to_public_key(), rsa_key.to_public_key());

        let loaded_public = load_rsa_public_key(file.path()).unwrap();
        assert_eq!(loaded_public, rsa_key.to_public_key());
    }
}
