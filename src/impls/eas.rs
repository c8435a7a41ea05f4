use crate::config::RolesConfig;
use crate::error::{AttestError, Result};
use crate::generic::object::AttestationId;
use crate::generic::scan::{AttestationIndex, PageQuery, RawAttestation};
use async_trait::async_trait;
use ethers::types::{Address, Bytes};
use ethers::utils::to_checksum;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

const BADGEHOLDERS_QUERY: &str = r#"
query Badgeholders($where: SchemaWhereUniqueInput!, $take: Int, $attestationsWhere: AttestationWhereInput, $orderBy: [AttestationOrderByWithRelationInput!]) {
  schema(where: $where) {
    attestations(take: $take, where: $attestationsWhere, orderBy: $orderBy) {
      id
      recipient
      data
    }
  }
}
"#;

#[derive(Debug, Deserialize)]
#[serde(bound = "T: DeserializeOwned")]
struct GraphQLResponse<T> {
    data: Option<QueryData<T>>,
    #[serde(default)]
    errors: Vec<GraphQLError>,
}

#[derive(Debug, Deserialize)]
struct GraphQLError {
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(bound = "T: DeserializeOwned")]
struct QueryData<T> {
    schema: Option<SchemaAttestations<T>>,
}

#[derive(Debug, Deserialize)]
#[serde(bound = "T: DeserializeOwned")]
struct SchemaAttestations<T> {
    attestations: Vec<T>,
}

/// A live badgeholder attestation, body still ABI-encoded.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct BadgeholderAttestation {
    pub id: AttestationId,
    pub recipient: Address,
    pub data: Bytes,
}

/// Reads attestations from an EAS GraphQL indexer.
#[derive(Clone, Debug)]
pub struct EasIndexer {
    client: reqwest::Client,
    endpoint: String,
}

impl EasIndexer {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn post<T: DeserializeOwned>(&self, body: &Value) -> Result<Vec<T>> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(body)
            .send()
            .await
            .map_err(|e| AttestError::Indexer(e.to_string()))?
            .error_for_status()
            .map_err(|e| AttestError::Indexer(e.to_string()))?;

        let body: GraphQLResponse<T> = response
            .json()
            .await
            .map_err(|e| AttestError::Indexer(format!("failed to parse response: {e}")))?;
        attestations(body)
    }

    /// Unrevoked badgeholder attestations from the configured attesters, newest first.
    pub async fn badgeholder_attestations(&self, roles: &RolesConfig) -> Result<Vec<BadgeholderAttestation>> {
        debug!(endpoint = %self.endpoint, take = roles.badgeholder_scan, "querying badgeholders");
        self.post(&badgeholders_request(roles)).await
    }
}

fn badgeholders_request(roles: &RolesConfig) -> Value {
    let attesters: Vec<String> = roles
        .badgeholder_attesters
        .iter()
        .map(|a| to_checksum(a, None))
        .collect();
    json!({
        "query": BADGEHOLDERS_QUERY,
        "variables": {
            "where": { "id": format!("{:?}", roles.badgeholder_schema) },
            "take": roles.badgeholder_scan,
            "attestationsWhere": {
                "attester": { "in": attesters },
                "revoked": { "equals": false },
            },
            "orderBy": [{ "timeCreated": "desc" }],
        }
    })
}

fn attestations<T>(response: GraphQLResponse<T>) -> Result<Vec<T>> {
    if let Some(error) = response.errors.first() {
        return Err(AttestError::Indexer(error.message.clone()));
    }
    // An unknown schema id yields `schema: null`; that is an empty listing, not an error.
    Ok(response
        .data
        .and_then(|d| d.schema)
        .map(|s| s.attestations)
        .unwrap_or_default())
}

#[async_trait]
impl AttestationIndex for EasIndexer {
    async fn fetch(&self, query: &PageQuery) -> Result<Vec<RawAttestation>> {
        debug!(endpoint = %self.endpoint, page = query.page, size = query.page_size, "querying attestations");
        self.post(&query.to_graphql()?).await
    }
}
