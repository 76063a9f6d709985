//! Several logical queries in one request, answered by a stream of
//! concatenated JSON documents keyed `q0`, `q1`, ...

use serde_json::{json, Map, Value};
use shared::error::ServiceError;
use tracing::{debug, warn};

use crate::{
    error::SessionError,
    service::{GRAPHQL_BATCH_PATH, THREAD_LIST_DOC_ID},
    session::Session,
};

#[derive(Debug, Clone, PartialEq)]
pub enum BatchedQuery {
    Query { text: String, params: Value },
    QueryId { id: String, params: Value },
    Doc { doc: String, params: Value },
    DocId { id: String, params: Value },
}

impl BatchedQuery {
    pub fn doc_id(id: impl Into<String>, params: Value) -> Self {
        Self::DocId {
            id: id.into(),
            params,
        }
    }

    fn to_json(&self) -> Value {
        match self {
            Self::Query { text, params } => {
                json!({"priority": 0, "q": text, "query_params": params})
            }
            Self::QueryId { id, params } => json!({"query_id": id, "query_params": params}),
            Self::Doc { doc, params } => json!({"doc": doc, "query_params": params}),
            Self::DocId { id, params } => json!({"doc_id": id, "query_params": params}),
        }
    }
}

/// `{"q0": .., "q1": ..}` as compact JSON.
pub fn encode(queries: &[BatchedQuery]) -> String {
    let body: Map<String, Value> = queries
        .iter()
        .enumerate()
        .map(|(index, query)| (format!("q{index}"), query.to_json()))
        .collect();
    Value::Object(body).to_string()
}

/// Demultiplexes a batch response into payloads ordered by query index.
///
/// Documents and `q{n}` entries carrying `error_results` (the trailing
/// summary object among them) are dropped. Placement runs in ascending index order: an index inside the
/// current list overwrites, anything past the end is appended.
pub fn decode(raw: &str) -> Result<Vec<Value>, SessionError> {
    let mut placed = Vec::new();
    for document in split_documents(raw)? {
        if document.get("error_results").is_some() {
            debug!(summary = %document, "skipping batch summary entry");
            continue;
        }
        if let Some(err) = ServiceError::from_body(&document) {
            return Err(SessionError::from_service(err));
        }
        let Value::Object(entries) = document else {
            return Err(SessionError::parse(
                "batch entry is not an object",
                &document.to_string(),
            ));
        };
        for (key, value) in entries {
            let index = key
                .strip_prefix('q')
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| SessionError::parse("unexpected batch key", &key))?;
            if value.get("error_results").is_some() {
                debug!(index, entry = %value, "skipping batch entry with error_results");
                continue;
            }
            raise_query_errors(&value)?;
            let payload = value
                .get("response")
                .or_else(|| value.get("data"))
                .cloned()
                .unwrap_or(Value::Null);
            placed.push((index, payload));
        }
    }

    placed.sort_by_key(|(index, _)| *index);
    let mut results: Vec<Value> = Vec::with_capacity(placed.len());
    for (index, payload) in placed {
        match results.get_mut(index) {
            Some(slot) => {
                warn!(index, "batch index repeated; keeping the later payload");
                *slot = payload;
            }
            None => results.push(payload),
        }
    }
    Ok(results)
}

fn raise_query_errors(entry: &Value) -> Result<(), SessionError> {
    let first = match (entry.get("errors"), entry.get("error")) {
        (Some(Value::Array(errors)), _) => errors.first(),
        (Some(error), _) if !error.is_null() => Some(error),
        (_, Some(error)) if !error.is_null() && error != &Value::Bool(false) => Some(error),
        _ => None,
    };
    let Some(error) = first else {
        return Ok(());
    };
    let message = error
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    let code = error.get("code").map(Value::to_string).unwrap_or_default();
    Err(SessionError::Query(format!("{message} ({code})")))
}

/// Splits concatenated JSON documents, skipping whitespace and `//` or
/// `/* */` comments between them.
fn split_documents(raw: &str) -> Result<Vec<Value>, SessionError> {
    let Some(start) = raw.find('{') else {
        return Err(SessionError::parse("batch response holds no JSON", raw));
    };
    let mut rest = &raw[start..];
    let mut documents = Vec::new();

    loop {
        rest = skip_trivia(rest)?;
        if rest.is_empty() {
            break;
        }
        let mut stream = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
        match stream.next() {
            Some(Ok(document)) => documents.push(document),
            Some(Err(err)) => return Err(SessionError::parse(err.to_string(), rest)),
            None => break,
        }
        rest = &rest[stream.byte_offset()..];
    }
    Ok(documents)
}

fn skip_trivia(mut rest: &str) -> Result<&str, SessionError> {
    loop {
        rest = rest.trim_start();
        if let Some(comment) = rest.strip_prefix("//") {
            rest = comment.find('\n').map_or("", |end| &comment[end..]);
        } else if let Some(comment) = rest.strip_prefix("/*") {
            let end = comment
                .find("*/")
                .ok_or_else(|| SessionError::parse("unterminated comment", rest))?;
            rest = &comment[end + 2..];
        } else {
            return Ok(rest);
        }
    }
}

pub struct QueryBatcher<'s> {
    session: &'s Session,
}

impl<'s> QueryBatcher<'s> {
    pub fn new(session: &'s Session) -> Self {
        Self { session }
    }

    /// Posts the batch and returns one payload per answered query.
    pub async fn execute(&self, queries: &[BatchedQuery]) -> Result<Vec<Value>, SessionError> {
        let fields = vec![
            ("method".to_string(), "GET".to_string()),
            ("response_format".to_string(), "json".to_string()),
            ("queries".to_string(), encode(queries)),
        ];
        let session = self.session;
        let fields = &fields;
        session
            .with_refresh(|| async move {
                let raw = session.post_text(GRAPHQL_BATCH_PATH, fields).await?;
                decode(&raw)
            })
            .await
    }

    /// Current sync sequence id of the inbox, used to open a realtime queue.
    pub async fn fetch_sequence_id(&self) -> Result<u64, SessionError> {
        let query = BatchedQuery::doc_id(
            THREAD_LIST_DOC_ID,
            json!({
                "limit": 0,
                "tags": ["INBOX"],
                "before": null,
                "includeDeliveryReceipts": false,
                "includeSeqID": true,
            }),
        );
        let results = self.execute(&[query]).await?;
        let sequence_id = results
            .first()
            .and_then(|payload| payload.pointer("/viewer/message_threads/sync_sequence_id"))
            .and_then(|value| match value {
                Value::Number(n) => n.as_u64(),
                Value::String(s) => s.parse().ok(),
                _ => None,
            })
            .filter(|id| *id > 0);
        sequence_id.ok_or_else(|| SessionError::NotLoggedIn("failed fetching sequence id".into()))
    }
}

#[cfg(test)]
#[path = "tests/batch_tests.rs"]
mod tests;
