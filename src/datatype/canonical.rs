use olpc_cjson::CanonicalFormatter;
use serde::Serialize;
use serde_json::Serializer;

use datatype::Error;

/// Serialize `value` into the canonical JSON form used for both key-id
/// derivation and role-body signing: object keys sorted, no insignificant
/// whitespace, integers without a leading `+`.
pub fn canonicalize<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    let mut ser = Serializer::with_formatter(&mut buf, CanonicalFormatter::new());
    value.serialize(&mut ser).map_err(|err| Error::VerifyMalformedDocument(err.to_string()))?;
    Ok(buf)
}
