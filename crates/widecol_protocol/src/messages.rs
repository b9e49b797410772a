//! MutateRows request and response messages.

use crate::codec::{decode_cbor, encode_cbor};
use crate::error::ProtocolResult;
use crate::mutation::Entry;
use crate::status::Status;
use serde::{Deserialize, Serialize};

/// A MutateRows request as sent by the client.
///
/// The entries are borrowed: the bulk engine keeps ownership of them across
/// attempts and only lends them to the transport while sending.
#[derive(Debug, Clone, Serialize)]
pub struct MutateRowsRequest<'a> {
    /// Fully qualified table name.
    pub table_name: &'a str,
    /// Optional application profile used for routing.
    pub app_profile_id: Option<&'a str>,
    /// Entries of this attempt; positions in this slice are what the
    /// response refers to.
    pub entries: Vec<&'a Entry>,
}

impl<'a> MutateRowsRequest<'a> {
    /// Creates a request without an application profile.
    pub fn new(table_name: &'a str, entries: impl IntoIterator<Item = &'a Entry>) -> Self {
        Self {
            table_name,
            app_profile_id: None,
            entries: entries.into_iter().collect(),
        }
    }

    /// Sets the application profile.
    pub fn with_app_profile(mut self, app_profile_id: Option<&'a str>) -> Self {
        self.app_profile_id = app_profile_id;
        self
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode_cbor(self)
    }
}

/// A MutateRows request as received by a server.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OwnedMutateRowsRequest {
    /// Fully qualified table name.
    pub table_name: String,
    /// Optional application profile used for routing.
    #[serde(default)]
    pub app_profile_id: Option<String>,
    /// Entries of the attempt.
    pub entries: Vec<Entry>,
}

impl OwnedMutateRowsRequest {
    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode_cbor(bytes)
    }
}

/// Outcome for one entry, addressed by its position in the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseEntry {
    /// Position of the entry in the request that produced this response.
    /// Signed so that a misbehaving server's negative index survives
    /// decoding and can be rejected by the client.
    pub index: i64,
    /// Outcome of the entry.
    pub status: Status,
}

impl ResponseEntry {
    /// Creates a response entry.
    pub fn new(index: i64, status: impl Into<Status>) -> Self {
        Self {
            index,
            status: status.into(),
        }
    }
}

/// One message of the MutateRows response stream.
///
/// A stream may carry any number of messages; each reports the outcome of
/// zero or more entries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutateRowsResponse {
    /// Per-entry outcomes.
    pub entries: Vec<ResponseEntry>,
}

impl MutateRowsResponse {
    /// Creates a response message.
    pub fn new(entries: Vec<ResponseEntry>) -> Self {
        Self { entries }
    }

    /// Encodes to CBOR.
    pub fn encode(&self) -> ProtocolResult<Vec<u8>> {
        encode_cbor(self)
    }

    /// Decodes from CBOR.
    pub fn decode(bytes: &[u8]) -> ProtocolResult<Self> {
        decode_cbor(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutation::Mutation;
    use crate::status::StatusCode;

    #[test]
    fn request_decodes_as_owned() {
        let entries = vec![
            Entry::single("r0", Mutation::set_cell("cf", "c", 5, "v")),
            Entry::single("r1", Mutation::increment("cf", "n", 3)),
        ];
        let request = MutateRowsRequest::new("projects/p/instances/i/tables/t", &entries)
            .with_app_profile(Some("batch"));

        let bytes = request.encode().unwrap();
        let decoded = OwnedMutateRowsRequest::decode(&bytes).unwrap();

        assert_eq!(decoded.table_name, "projects/p/instances/i/tables/t");
        assert_eq!(decoded.app_profile_id.as_deref(), Some("batch"));
        assert_eq!(decoded.entries, entries);
    }

    #[test]
    fn response_keeps_negative_index() {
        let response = MutateRowsResponse::new(vec![
            ResponseEntry::new(0, StatusCode::Ok),
            ResponseEntry::new(-3, Status::new(StatusCode::Internal, "bad")),
        ]);

        let decoded = MutateRowsResponse::decode(&response.encode().unwrap()).unwrap();
        assert_eq!(decoded, response);
        assert_eq!(decoded.entries[1].index, -3);
    }

    #[test]
    fn empty_entry_rejected_on_decode() {
        #[derive(Serialize)]
        struct RawEntry {
            row_key: &'static str,
            mutations: Vec<Mutation>,
        }
        #[derive(Serialize)]
        struct RawRequest {
            table_name: &'static str,
            entries: Vec<RawEntry>,
        }

        let bytes = encode_cbor(&RawRequest {
            table_name: "t",
            entries: vec![RawEntry {
                row_key: "r",
                mutations: vec![],
            }],
        })
        .unwrap();

        assert!(OwnedMutateRowsRequest::decode(&bytes).is_err());
    }
}
