//! API key generation and storage
//!
//! Keys are 32 random bytes from the OS CSPRNG, base64url encoded without
//! padding and prefixed so they are recognisable in logs and scanners. The
//! plaintext only ever lives in the Opaque secret and in the one response
//! that created it.

use std::collections::BTreeMap;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta as K8sObjectMeta;
use k8s_openapi::ByteString;
use rand::rngs::OsRng;
use rand::RngCore;

use meridian_common::ANNOTATION_KEY_GENERATION;

/// Prefix of every generated key
pub const API_KEY_PREFIX: &str = "mk_";

/// Secret data key holding the API key
pub const API_KEY_DATA_KEY: &str = "api-key";

const API_KEY_BYTES: usize = 32;

/// Generate a fresh API key
pub fn generate_api_key() -> String {
    let mut bytes = [0u8; API_KEY_BYTES];
    OsRng.fill_bytes(&mut bytes);
    format!("{}{}", API_KEY_PREFIX, URL_SAFE_NO_PAD.encode(bytes))
}

/// Build the Opaque secret holding `api_key`
pub fn build_secret(
    name: &str,
    namespace: &str,
    labels: BTreeMap<String, String>,
    api_key: &str,
    generation: u64,
) -> Secret {
    let mut secret = Secret {
        metadata: K8sObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        type_: Some("Opaque".to_string()),
        ..Default::default()
    };
    set_api_key(&mut secret, api_key, generation);
    secret
}

/// Replace the key stored in `secret` and record its generation
pub fn set_api_key(secret: &mut Secret, api_key: &str, generation: u64) {
    secret
        .data
        .get_or_insert_with(BTreeMap::new)
        .insert(
            API_KEY_DATA_KEY.to_string(),
            ByteString(api_key.as_bytes().to_vec()),
        );
    secret.string_data = None;
    secret
        .metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(ANNOTATION_KEY_GENERATION.to_string(), generation.to_string());
}

/// Generation recorded on the secret; secrets without one count as 1
pub fn key_generation(secret: &Secret) -> u64 {
    secret
        .metadata
        .annotations
        .as_ref()
        .and_then(|a| a.get(ANNOTATION_KEY_GENERATION))
        .and_then(|g| g.parse().ok())
        .unwrap_or(1)
}

/// Key currently stored in the secret
pub fn stored_api_key(secret: &Secret) -> Option<String> {
    secret
        .data
        .as_ref()?
        .get(API_KEY_DATA_KEY)
        .and_then(|b| String::from_utf8(b.0.clone()).ok())
}
