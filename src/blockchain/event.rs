use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Domain events recorded on the ledger.
///
/// Each variant is stored as a JSON object whose `type` field names the
/// event, followed by its camelCase fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", deny_unknown_fields)]
pub enum LedgerEvent {
    #[serde(rename_all = "camelCase")]
    StudentRegistration {
        student_id: String,
        institution_id: String,
        #[serde(default)]
        details: Map<String, Value>,
    },

    #[serde(rename_all = "camelCase")]
    StudentUpdate {
        student_id: String,
        previous_state: Value,
        current_state: Value,
    },

    #[serde(rename_all = "camelCase")]
    InstitutionRegistration { institution_id: String, name: String },

    #[serde(rename_all = "camelCase")]
    InstitutionUpdate {
        institution_id: String,
        previous: Value,
        current: Value,
    },

    #[serde(rename = "MINT_NFT", rename_all = "camelCase")]
    MintNft {
        token_id: String,
        owner: String,
        #[serde(default)]
        attributes: Map<String, Value>,
    },

    #[serde(rename = "TRANSFER_NFT", rename_all = "camelCase")]
    TransferNft {
        token_id: String,
        from: String,
        to: String,
    },

    #[serde(rename = "INSTITUTION_NFT_MINT", rename_all = "camelCase")]
    InstitutionNftMint {
        institution_id: String,
        token_id: String,
    },

    #[serde(rename_all = "camelCase")]
    ApplicationSubmitted {
        application_id: String,
        student_id: String,
        institution_id: String,
    },

    #[serde(rename_all = "camelCase")]
    ApplicationVerified {
        application_id: String,
        verified_by: String,
        approved: bool,
    },
}

impl LedgerEvent {
    /// The `type` name the event is stored under
    pub fn kind(&self) -> &'static str {
        match self {
            LedgerEvent::StudentRegistration { .. } => "STUDENT_REGISTRATION",
            LedgerEvent::StudentUpdate { .. } => "STUDENT_UPDATE",
            LedgerEvent::InstitutionRegistration { .. } => "INSTITUTION_REGISTRATION",
            LedgerEvent::InstitutionUpdate { .. } => "INSTITUTION_UPDATE",
            LedgerEvent::MintNft { .. } => "MINT_NFT",
            LedgerEvent::TransferNft { .. } => "TRANSFER_NFT",
            LedgerEvent::InstitutionNftMint { .. } => "INSTITUTION_NFT_MINT",
            LedgerEvent::ApplicationSubmitted { .. } => "APPLICATION_SUBMITTED",
            LedgerEvent::ApplicationVerified { .. } => "APPLICATION_VERIFIED",
        }
    }
}

/// The payload carried by a transaction.
///
/// Documents that match a known event exactly decode as [`Metadata::Event`];
/// anything else, including unknown event types and known types with extra
/// fields, is kept verbatim as [`Metadata::Other`] so it hashes the same
/// after a reload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Metadata {
    Event(LedgerEvent),
    Other(Map<String, Value>),
}

impl Metadata {
    pub fn empty() -> Self {
        Metadata::Other(Map::new())
    }

    /// Name of the recorded event, from the `type` field or, failing that,
    /// an `action` field
    pub fn kind(&self) -> Option<&str> {
        match self {
            Metadata::Event(event) => Some(event.kind()),
            Metadata::Other(map) => map
                .get("type")
                .or_else(|| map.get("action"))
                .and_then(Value::as_str),
        }
    }

    /// Looks up a top-level field of the payload
    pub fn field(&self, name: &str) -> Option<Value> {
        match self {
            Metadata::Other(map) => map.get(name).cloned(),
            Metadata::Event(event) => match serde_json::to_value(event) {
                Ok(Value::Object(mut map)) => map.remove(name),
                _ => None,
            },
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Metadata::Other(map) if map.is_empty())
    }
}

impl Default for Metadata {
    fn default() -> Self {
        Metadata::empty()
    }
}

impl From<LedgerEvent> for Metadata {
    fn from(event: LedgerEvent) -> Self {
        Metadata::Event(event)
    }
}

impl From<Map<String, Value>> for Metadata {
    fn from(map: Map<String, Value>) -> Self {
        Metadata::Other(map)
    }
}
