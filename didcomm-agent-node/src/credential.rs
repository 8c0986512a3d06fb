//! Minimal W3C verifiable credentials and presentations.
//!
//! Credentials are plain JSON documents. A proof is added by signing the
//! document without its `proof` member through the injected [`Signer`]; the
//! signing key travels in `proof.verificationMethod`.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{SecondsFormat, Utc};
use didcomm_agent_core::{Did, Signer};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::error::{Error, Result};

/// Attachment format of credentials and presentations.
pub const VC_FORMAT: &str = "https://www.w3.org/TR/vc-data-model/";

const CREDENTIALS_CONTEXT: &str = "https://www.w3.org/2018/credentials/v1";
const CREDENTIAL_TYPE: &str = "VerifiableCredential";
const PRESENTATION_TYPE: &str = "VerifiablePresentation";
const PROOF_TYPE: &str = "Ed25519Signature2018";

/// Builds an unsigned credential of `template` type about `subject`.
///
/// `claims` must be a JSON object; its members become the subject claims.
///
/// # Errors
///
/// Returns [`Error::Credential`] if `claims` is not an object.
pub fn unsigned_credential(
    template: &str,
    issuer: &str,
    subject: &str,
    claims: &Value,
) -> Result<Value> {
    let Value::Object(claims) = claims else {
        return Err(Error::Credential("Subject claims must be an object".into()));
    };
    let mut subject_map = Map::new();
    subject_map.insert("id".into(), Value::String(subject.to_string()));
    subject_map.extend(claims.iter().map(|(k, v)| (k.clone(), v.clone())));

    Ok(json!({
        "@context": [CREDENTIALS_CONTEXT],
        "id": format!("urn:uuid:{}", Uuid::new_v4()),
        "type": [CREDENTIAL_TYPE, template],
        "issuer": issuer,
        "credentialSubject": subject_map,
    }))
}

/// Builds an unsigned presentation of `credentials` held by `holder`.
#[must_use]
pub fn unsigned_presentation(holder: &Did, credentials: Vec<Value>) -> Value {
    json!({
        "@context": [CREDENTIALS_CONTEXT],
        "id": format!("urn:uuid:{}", Uuid::new_v4()),
        "type": [PRESENTATION_TYPE],
        "holder": holder.uri(),
        "verifiableCredential": credentials,
    })
}

fn signing_payload(doc: &Value) -> Result<Vec<u8>> {
    let mut unsigned = doc.clone();
    if let Some(map) = unsigned.as_object_mut() {
        map.remove("proof");
    }
    Ok(serde_json::to_vec(&unsigned)?)
}

/// Signs a credential or presentation with `verkey`.
///
/// Sets `issuanceDate` on credentials that do not carry one.
///
/// # Errors
///
/// Fails if the document is not an object or signing fails.
pub async fn sign(doc: Value, signer: &dyn Signer, verkey: &str) -> Result<Value> {
    let mut doc = doc;
    let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
    let map = doc
        .as_object_mut()
        .ok_or_else(|| Error::Credential("Document must be an object".into()))?;
    if has_type_in(map, CREDENTIAL_TYPE) && !map.contains_key("issuanceDate") {
        map.insert("issuanceDate".into(), Value::String(now.clone()));
    }

    let payload = signing_payload(&doc)?;
    let signature = signer.sign(&payload, verkey).await?;
    doc["proof"] = json!({
        "type": PROOF_TYPE,
        "created": now,
        "proofPurpose": "assertionMethod",
        "verificationMethod": verkey,
        "jws": URL_SAFE_NO_PAD.encode(signature),
    });
    Ok(doc)
}

/// The key a document was signed with.
#[must_use]
pub fn signing_key(doc: &Value) -> Option<&str> {
    doc.pointer("/proof/verificationMethod").and_then(Value::as_str)
}

/// Verifies a document's proof against the key it names.
///
/// # Errors
///
/// Returns [`Error::Credential`] if the proof is missing or does not verify.
pub async fn verify(doc: &Value, signer: &dyn Signer) -> Result<()> {
    let verkey = signing_key(doc).ok_or_else(|| Error::Credential("Missing proof".into()))?;
    let jws = doc
        .pointer("/proof/jws")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::Credential("Missing proof signature".into()))?;
    let signature = URL_SAFE_NO_PAD
        .decode(jws)
        .map_err(|e| Error::Credential(format!("Invalid proof encoding: {e}")))?;

    let payload = signing_payload(doc)?;
    if signer.verify(&payload, &signature, verkey).await? {
        Ok(())
    } else {
        Err(Error::Credential(format!("Proof does not verify with {verkey}")))
    }
}

/// The credential subject's id.
#[must_use]
pub fn subject_id(vc: &Value) -> Option<&str> {
    vc.pointer("/credentialSubject/id").and_then(Value::as_str)
}

/// The type list of a credential or presentation.
#[must_use]
pub fn types(doc: &Value) -> Vec<&str> {
    doc.get("type")
        .and_then(Value::as_array)
        .map(|types| types.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default()
}

/// Whether `doc` carries `typ` in its type list.
#[must_use]
pub fn has_type(doc: &Value, typ: &str) -> bool {
    types(doc).contains(&typ)
}

fn has_type_in(map: &Map<String, Value>, typ: &str) -> bool {
    map.get("type")
        .and_then(Value::as_array)
        .is_some_and(|types| types.iter().any(|t| t == typ))
}

/// The credentials embedded in a presentation.
#[must_use]
pub fn presented_credentials(vp: &Value) -> Vec<&Value> {
    vp.get("verifiableCredential")
        .and_then(Value::as_array)
        .map(|vcs| vcs.iter().collect())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockPlugin;
    use didcomm_agent_core::{DIDCommPlugin, DidMethod};
    use pretty_assertions::assert_eq;

    fn transcript(holder: &Did, issuer: &Did) -> Value {
        unsigned_credential(
            "UniversityTranscript",
            &issuer.uri(),
            &holder.uri(),
            &json!({ "givenName": "Alice", "degree": "Bachelor of Science, Marketing" }),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_sign_and_verify_credential() {
        let plugin = MockPlugin::new();
        let issuer = Did::generate(DidMethod::Sov);
        let holder = Did::generate(DidMethod::Sov);

        let vc = sign(transcript(&holder, &issuer), plugin.signer(), &issuer.verkey)
            .await
            .unwrap();
        assert_eq!(subject_id(&vc), Some(holder.uri().as_str()));
        assert_eq!(signing_key(&vc), Some(issuer.verkey.as_str()));
        assert!(vc["issuanceDate"].is_string());
        assert!(has_type(&vc, "UniversityTranscript"));
        verify(&vc, plugin.signer()).await.unwrap();

        let mut tampered = vc.clone();
        tampered["credentialSubject"]["givenName"] = json!("Mallory");
        assert!(matches!(
            verify(&tampered, plugin.signer()).await,
            Err(Error::Credential(_))
        ));
    }

    #[tokio::test]
    async fn test_presentation() {
        let plugin = MockPlugin::new();
        let issuer = Did::generate(DidMethod::Sov);
        let holder = Did::generate(DidMethod::Sov);
        let vc = sign(transcript(&holder, &issuer), plugin.signer(), &issuer.verkey)
            .await
            .unwrap();

        let vp = sign(
            unsigned_presentation(&holder, vec![vc.clone()]),
            plugin.signer(),
            &holder.verkey,
        )
        .await
        .unwrap();
        verify(&vp, plugin.signer()).await.unwrap();
        assert!(vp.get("issuanceDate").is_none());
        assert_eq!(presented_credentials(&vp), vec![&vc]);
    }

    #[test]
    fn test_claims_must_be_object() {
        let did = Did::generate(DidMethod::Key);
        let result = unsigned_credential("Transcript", &did.uri(), &did.uri(), &json!("nope"));
        assert!(matches!(result, Err(Error::Credential(_))));
    }
}
