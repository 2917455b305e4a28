use std::fmt;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bytes::Bytes;
use hv_core::{HvError, HvResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use url::form_urlencoded;

/// Hash algorithm negotiated for a blob upload.
///
/// Unrecognized names from the service degrade to `Unknown` instead of failing
/// the parse; a stream refuses to hash with an unknown algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum BlobHashAlgorithm {
    Sha256Block,
    Unknown,
}

impl BlobHashAlgorithm {
    pub const SHA256_BLOCK: &'static str = "SHA256Block";

    pub fn from_wire(name: &str) -> Self {
        if name.trim().eq_ignore_ascii_case(Self::SHA256_BLOCK) {
            Self::Sha256Block
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256Block => Self::SHA256_BLOCK,
            Self::Unknown => "Unknown",
        }
    }
}

impl From<String> for BlobHashAlgorithm {
    fn from(name: String) -> Self {
        Self::from_wire(&name)
    }
}

impl From<BlobHashAlgorithm> for String {
    fn from(alg: BlobHashAlgorithm) -> Self {
        alg.as_str().to_string()
    }
}

impl fmt::Display for BlobHashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whole-blob digest: a hash over the ordered block hashes.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct BlobDigest(pub Vec<u8>);

impl BlobDigest {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.0)
    }

    pub fn from_base64(encoded: &str) -> HvResult<Self> {
        BASE64
            .decode(encoded.trim())
            .map(Self)
            .map_err(|e| HvError::protocol(format!("invalid base64 digest: {e}")))
    }
}

impl fmt::Debug for BlobDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "BlobDigest({})", self.to_base64())
    }
}

impl Serialize for BlobDigest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for BlobDigest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Self::from_base64(&encoded).map_err(serde::de::Error::custom)
    }
}

/// Hash information recorded on a blob once its upload completes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BlobHashInfo {
    pub algorithm: BlobHashAlgorithm,
    pub block_size: u64,
    pub digest: BlobDigest,
}

/// A single binary object attached to a health record item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BlobHandle {
    name: String,
    content_type: String,
    content_length: Option<u64>,
    upload_url: Option<String>,
    reference_url: Option<String>,
    hash_info: Option<BlobHashInfo>,
    #[serde(skip)]
    inline_data: Option<Bytes>,
    #[serde(skip)]
    sealed: bool,
}

impl BlobHandle {
    /// A new, empty blob slot.
    pub fn new(name: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            content_length: None,
            upload_url: None,
            reference_url: None,
            hash_info: None,
            inline_data: None,
            sealed: false,
        }
    }

    /// An existing blob whose content the service returned inline.
    pub fn with_inline_data(mut self, data: impl Into<Bytes>) -> Self {
        let data = data.into();
        self.content_length = Some(data.len() as u64);
        self.inline_data = Some(data);
        self
    }

    /// An existing blob readable from `url`.
    pub fn with_reference_url(mut self, url: impl Into<String>, length: Option<u64>) -> Self {
        self.reference_url = Some(url.into());
        self.content_length = length;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    pub fn upload_url(&self) -> Option<&str> {
        self.upload_url.as_deref()
    }

    pub fn reference_url(&self) -> Option<&str> {
        self.reference_url.as_deref()
    }

    pub fn inline_data(&self) -> Option<&Bytes> {
        self.inline_data.as_ref()
    }

    pub fn hash_info(&self) -> Option<&BlobHashInfo> {
        self.hash_info.as_ref()
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// Record the content length. Once set it cannot change.
    pub fn set_content_length(&mut self, length: u64) -> HvResult<()> {
        self.ensure_mutable()?;
        match self.content_length {
            Some(existing) if existing != length => Err(HvError::invalid_operation(format!(
                "content length of blob `{}` is already {existing}",
                self.name
            ))),
            _ => {
                self.content_length = Some(length);
                Ok(())
            }
        }
    }

    /// Freeze the handle before its owning item is submitted.
    ///
    /// A handle with an upload in flight (upload URL assigned, no hash yet) is
    /// not a valid blob and cannot be sealed.
    pub fn seal(&mut self) -> HvResult<()> {
        if self.upload_url.is_some() && self.hash_info.is_none() {
            return Err(HvError::invalid_operation(format!(
                "blob `{}` has an unfinished upload",
                self.name
            )));
        }
        self.sealed = true;
        Ok(())
    }

    pub(crate) fn set_upload_url(&mut self, url: String) -> HvResult<()> {
        self.ensure_mutable()?;
        self.upload_url = Some(url);
        Ok(())
    }

    pub(crate) fn set_hash_info(&mut self, info: BlobHashInfo) -> HvResult<()> {
        self.ensure_mutable()?;
        self.hash_info = Some(info);
        Ok(())
    }

    fn ensure_mutable(&self) -> HvResult<()> {
        if self.sealed {
            return Err(HvError::invalid_operation(format!(
                "blob `{}` is sealed",
                self.name
            )));
        }
        Ok(())
    }
}

/// What a blob upload is negotiated against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum BlobContext {
    /// A health record owned by a person
    Record { person_id: String, record_id: String },
    /// A connect package awaiting pickup; chunks may be encrypted
    ConnectPackage { package_id: String },
}

impl BlobContext {
    pub fn record(person_id: impl Into<String>, record_id: impl Into<String>) -> Self {
        Self::Record {
            person_id: person_id.into(),
            record_id: record_id.into(),
        }
    }

    pub fn connect_package(package_id: impl Into<String>) -> Self {
        Self::ConnectPackage {
            package_id: package_id.into(),
        }
    }

    pub fn is_package(&self) -> bool {
        matches!(self, Self::ConnectPackage { .. })
    }

    /// Query string identifying this context on the negotiation call.
    pub fn query(&self) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        match self {
            Self::Record {
                person_id,
                record_id,
            } => query
                .append_pair("person-id", person_id)
                .append_pair("record-id", record_id),
            Self::ConnectPackage { package_id } => query.append_pair("package-id", package_id),
        };
        query.finish()
    }
}

/// Half-open byte range `[start, end)` for ranged reads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn new(start: u64, end: u64) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> u64 {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `Range` header value (inclusive end).
    pub fn header_value(&self) -> String {
        format!("bytes={}-{}", self.start, self.end.saturating_sub(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_hash_algorithm_degrades_instead_of_failing() {
        let alg: BlobHashAlgorithm = serde_json::from_str(r#""SHA512Tree""#).unwrap();
        assert_eq!(alg, BlobHashAlgorithm::Unknown);

        let alg: BlobHashAlgorithm = serde_json::from_str(r#""sha256block""#).unwrap();
        assert_eq!(alg, BlobHashAlgorithm::Sha256Block);
    }

    #[test]
    fn content_length_is_immutable_once_set() {
        let mut blob = BlobHandle::new("scan", "image/png");
        blob.set_content_length(10).unwrap();
        blob.set_content_length(10).unwrap();
        assert!(matches!(
            blob.set_content_length(11),
            Err(HvError::InvalidOperation(_))
        ));
    }

    #[test]
    fn unfinished_upload_cannot_be_sealed() {
        let mut blob = BlobHandle::new("scan", "image/png");
        blob.set_upload_url("https://blobs/1".to_string()).unwrap();
        assert!(blob.seal().is_err());

        blob.set_hash_info(BlobHashInfo {
            algorithm: BlobHashAlgorithm::Sha256Block,
            block_size: 4,
            digest: BlobDigest(vec![1, 2, 3]),
        })
        .unwrap();
        blob.seal().unwrap();
        assert!(blob.set_content_length(3).is_err());
    }

    #[test]
    fn hash_info_serializes_digest_as_base64() {
        let info = BlobHashInfo {
            algorithm: BlobHashAlgorithm::Sha256Block,
            block_size: 2_097_152,
            digest: BlobDigest(vec![0xde, 0xad, 0xbe, 0xef]),
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["algorithm"], "SHA256Block");
        assert_eq!(json["block-size"], 2_097_152);
        assert_eq!(json["digest"], "3q2+7w==");
    }

    #[test]
    fn query_escapes_identifiers() {
        let query = BlobContext::record("a&record-id=evil", "r 1").query();
        assert_eq!(query, "person-id=a%26record-id%3Devil&record-id=r+1");

        let pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("person-id".to_string(), "a&record-id=evil".to_string()),
                ("record-id".to_string(), "r 1".to_string()),
            ]
        );
        assert_eq!(BlobContext::connect_package("pkg-1").query(), "package-id=pkg-1");
    }

    #[test]
    fn byte_range_header_is_inclusive() {
        let range = ByteRange::new(80, 130);
        assert_eq!(range.len(), 50);
        assert_eq!(range.header_value(), "bytes=80-129");
    }
}
