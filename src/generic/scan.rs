use crate::error::{AttestError, Result};
use crate::generic::abi::decode_payload;
use crate::generic::object::{AttestationId, AttestationRecord, Time};
use async_trait::async_trait;
use ethers::types::{Address, H256};
use ethers::utils::to_checksum;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::str::FromStr;
use tracing::{debug, warn};

const ATTESTATIONS_QUERY: &str = r#"
query Query($where: SchemaWhereUniqueInput!, $take: Int, $skip: Int, $attestationsWhere: AttestationWhereInput, $orderBy: [AttestationOrderByWithRelationInput!]) {
  schema(where: $where) {
    attestations(take: $take, skip: $skip, where: $attestationsWhere, orderBy: $orderBy) {
      id
      data
      revocationTime
      attester
      recipient
      time
      txid
    }
  }
}
"#;

/// An attestation as the indexer returns it, payload still ABI-encoded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawAttestation {
    pub id: AttestationId,
    pub data: String,
    pub revocation_time: Time,
    pub attester: Address,
    pub recipient: Address,
    pub time: Time,
    #[serde(default)]
    pub txid: String,
}

/// One offset-based page of a schema's attestations, newest first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageQuery {
    pub schema: H256,
    pub page: u64,
    pub page_size: u64,
    pub recipient: Option<Address>,
    pub attester: Option<Address>,
}

impl PageQuery {
    pub fn new(schema: H256, page: u64, page_size: u64) -> Self {
        Self {
            schema,
            page,
            page_size,
            recipient: None,
            attester: None,
        }
    }

    pub fn with_recipient(mut self, recipient: Address) -> Self {
        self.recipient = Some(recipient);
        self
    }

    pub fn with_attester(mut self, attester: Address) -> Self {
        self.attester = Some(attester);
        self
    }

    /// Records before this page. Fails when the offset does not fit a `u64`.
    pub fn skip(&self) -> Result<u64> {
        self.page
            .checked_mul(self.page_size)
            .ok_or_else(|| AttestError::validation("page", "offset out of range"))
    }

    pub fn next(&self) -> Result<Self> {
        let page = self
            .page
            .checked_add(1)
            .ok_or_else(|| AttestError::validation("page", "no page after the last one"))?;
        Ok(Self { page, ..self.clone() })
    }

    /// Whether `raw` passes the recipient and attester filters.
    pub fn matches(&self, raw: &RawAttestation) -> bool {
        self.recipient.map_or(true, |r| r == raw.recipient)
            && self.attester.map_or(true, |a| a == raw.attester)
    }

    /// The GraphQL request body for the EAS indexer.
    pub fn to_graphql(&self) -> Result<Value> {
        let mut filter = serde_json::Map::new();
        if let Some(recipient) = &self.recipient {
            filter.insert("recipient".into(), json!({ "equals": to_checksum(recipient, None) }));
        }
        if let Some(attester) = &self.attester {
            filter.insert("attester".into(), json!({ "equals": to_checksum(attester, None) }));
        }
        Ok(json!({
            "query": ATTESTATIONS_QUERY,
            "variables": {
                "where": { "id": format!("{:?}", self.schema) },
                "take": self.page_size,
                "skip": self.skip()?,
                "attestationsWhere": filter,
                "orderBy": [{ "timeCreated": "desc" }],
            }
        }))
    }
}

/// A source of raw attestation records.
#[async_trait]
pub trait AttestationIndex: Send + Sync {
    async fn fetch(&self, query: &PageQuery) -> Result<Vec<RawAttestation>>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Page {
    pub items: Vec<AttestationRecord>,
    /// Raw records the indexer returned, before undecodable ones were dropped.
    pub fetched: usize,
    pub page_size: u64,
    pub dropped: usize,
}

impl Page {
    /// A short page means there is nothing after it.
    pub fn is_last(&self) -> bool {
        (self.fetched as u64) < self.page_size
    }
}

pub fn decode_record(raw: &RawAttestation, schema: H256) -> Result<AttestationRecord> {
    let data = hex::decode(raw.data.trim_start_matches("0x"))
        .map_err(|e| AttestError::validation("payload", e.to_string()))?;
    let payload = decode_payload(&data)?;
    let txid = match raw.txid.as_str() {
        "" => None,
        txid => Some(H256::from_str(txid).map_err(|e| AttestError::validation("txid", e.to_string()))?),
    };

    Ok(AttestationRecord {
        id: raw.id,
        schema,
        attester: raw.attester,
        recipient: raw.recipient,
        payload,
        time: raw.time,
        revocation_time: raw.revocation_time,
        txid,
    })
}

/// Fetches and decodes one page.
///
/// Records whose payload does not decode are logged and dropped; they never fail the page.
pub async fn query<I: AttestationIndex + ?Sized>(index: &I, query: &PageQuery) -> Result<Page> {
    if query.page_size == 0 {
        return Err(AttestError::validation("page_size", "must be positive"));
    }
    query.skip()?;

    let raw = index.fetch(query).await?;
    let fetched = raw.len();
    let mut items = Vec::with_capacity(fetched);
    for record in &raw {
        match decode_record(record, query.schema) {
            Ok(decoded) => items.push(decoded),
            Err(e) => warn!(id = ?record.id, error = %e, "dropping undecodable attestation"),
        }
    }
    items.sort_by(|a, b| b.time.cmp(&a.time));

    let dropped = fetched - items.len();
    debug!(page = query.page, fetched, dropped, "attestation page");
    Ok(Page {
        items,
        fetched,
        page_size: query.page_size,
        dropped,
    })
}

/// Walks pages from `start` until a short page or `max_pages` pages have been read.
pub async fn collect_all<I: AttestationIndex + ?Sized>(
    index: &I,
    start: PageQuery,
    max_pages: usize,
) -> Result<Vec<AttestationRecord>> {
    let mut records = Vec::new();
    let mut current = start;
    for _ in 0..max_pages {
        let page = query(index, &current).await?;
        let last = page.is_last();
        records.extend(page.items);
        if last {
            break;
        }
        current = current.next()?;
    }
    Ok(records)
}
