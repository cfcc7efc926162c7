//! Storage Root Key and sealed-object templates.
//!
//! Mirrors the fixed `SRK_template`/`seal_public_template` pair from the
//! original pcr-oracle: grub2 derives the SRK with the `NODA` attribute, so
//! dictionary-attack protections never come into play, and the sealed blob
//! is a plain `TPM2_ALG_KEYEDHASH` object whose `authPolicy` is the PCR (or
//! authorized) policy digest.

use std::sync::atomic::{AtomicU32, Ordering};

use tss_esapi::attributes::ObjectAttributesBuilder;
use tss_esapi::interface_types::algorithm::{HashingAlgorithm, PublicAlgorithm};
use tss_esapi::interface_types::key_bits::RsaKeyBits;
use tss_esapi::interface_types::resource_handles::Hierarchy;
use tss_esapi::structures::{
    Digest as TpmDigest, PublicBuilder, PublicKeyedHashParameters, PublicRsaParametersBuilder,
    RsaExponent, SymmetricCipherParameters, SymmetricDefinitionObject,
};
use tss_esapi::Error as TssError;

/// Default SRK RSA key size; overridden via [`set_srk_rsa_bits`] for
/// `--srk-rsa-bits` on the command line.
static SRK_RSA_BITS: AtomicU32 = AtomicU32::new(2048);

pub fn set_srk_rsa_bits(bits: u32) {
    SRK_RSA_BITS.store(bits, Ordering::Relaxed);
}

fn srk_rsa_bits() -> RsaKeyBits {
    match SRK_RSA_BITS.load(Ordering::Relaxed) {
        1024 => RsaKeyBits::Rsa1024,
        3072 => RsaKeyBits::Rsa3072,
        4096 => RsaKeyBits::Rsa4096,
        _ => RsaKeyBits::Rsa2048,
    }
}

/// Storage primary key template: restricted, decrypt-only RSA key fixed to
/// this TPM and this parent, with `NODA` so SRK derivation never trips
/// dictionary-attack lockout.
pub fn srk_template() -> Result<tss_esapi::structures::Public, TssError> {
    let object_attributes = ObjectAttributesBuilder::new()
        .with_restricted(true)
        .with_decrypt(true)
        .with_fixed_tpm(true)
        .with_fixed_parent(true)
        .with_sensitive_data_origin(true)
        .with_user_with_auth(true)
        .with_no_da(true)
        .build()?;

    let rsa_params = PublicRsaParametersBuilder::new()
        .with_scheme(tss_esapi::structures::RsaScheme::Null)
        .with_key_bits(srk_rsa_bits())
        .with_exponent(RsaExponent::default())
        .with_is_decryption_key(true)
        .with_restricted(true)
        .with_symmetric(SymmetricCipherParameters::new(
            SymmetricDefinitionObject::AES_128_CFB,
        ))
        .build()?;

    PublicBuilder::new()
        .with_public_algorithm(PublicAlgorithm::Rsa)
        .with_name_hashing_algorithm(HashingAlgorithm::Sha256)
        .with_object_attributes(object_attributes)
        .with_rsa_parameters(rsa_params)
        .with_rsa_unique_identifier(tss_esapi::structures::PublicKeyRsa::default())
        .build()
}

/// Sealed-object template: a `KEYEDHASH` object carrying no scheme of its
/// own, whose `authPolicy` is set to the policy digest at `Create` time.
pub fn seal_template(
    auth_policy: TpmDigest,
) -> Result<tss_esapi::structures::Public, TssError> {
    let object_attributes = ObjectAttributesBuilder::new()
        .with_fixed_tpm(true)
        .with_fixed_parent(true)
        .build()?;

    PublicBuilder::new()
        .with_public_algorithm(PublicAlgorithm::KeyedHash)
        .with_name_hashing_algorithm(HashingAlgorithm::Sha256)
        .with_object_attributes(object_attributes)
        .with_keyed_hash_parameters(PublicKeyedHashParameters::new(
            tss_esapi::structures::HashScheme::Null,
        ))
        .with_keyed_hash_unique_identifier(TpmDigest::default())
        .with_auth_policy(auth_policy)
        .build()
}

/// Signing-key template used to `LoadExternal` a standalone RSA public key
/// for `PolicyAuthorize`/`VerifySignature` — this is the user's signing
/// key, distinct from the SRK.
pub fn rsa_signing_public_template(
    modulus: tss_esapi::structures::PublicKeyRsa,
    key_bits: RsaKeyBits,
) -> Result<tss_esapi::structures::Public, TssError> {
    let object_attributes = ObjectAttributesBuilder::new()
        .with_sign_encrypt(true)
        .with_user_with_auth(true)
        .build()?;

    let rsa_params = PublicRsaParametersBuilder::new()
        .with_scheme(tss_esapi::structures::RsaScheme::RsaSsa(
            tss_esapi::structures::HashScheme::new(HashingAlgorithm::Sha256),
        ))
        .with_key_bits(key_bits)
        .with_exponent(RsaExponent::default())
        .with_is_signing_key(true)
        .build()?;

    PublicBuilder::new()
        .with_public_algorithm(PublicAlgorithm::Rsa)
        .with_name_hashing_algorithm(HashingAlgorithm::Sha256)
        .with_object_attributes(object_attributes)
        .with_rsa_parameters(rsa_params)
        .with_rsa_unique_identifier(modulus)
        .build()
}

pub const OWNER_HIERARCHY: Hierarchy = Hierarchy::Owner;
