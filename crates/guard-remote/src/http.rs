//! HTTP client for a REST record API (`/v0/{baseId}/{table}` plus a metadata endpoint for schemas).

use guard_types::{Fields, Record, RecordApi, RecordUpdate, RemoteError, TableSchema};
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
struct RecordList {
    #[serde(default)]
    records: Vec<Record>,
}

#[derive(Debug, Deserialize)]
struct Deleted {
    id: String,
}

#[derive(Debug, Deserialize)]
struct DeletedList {
    #[serde(default)]
    records: Vec<Deleted>,
}

#[derive(Debug, Deserialize)]
struct TableList {
    #[serde(default)]
    tables: Vec<TableSchema>,
}

/// Record API client over HTTPS with bearer auth.
pub struct HttpRecordApi {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    base_id: String,
}

impl HttpRecordApi {
    pub fn new(base_url: String, api_key: Option<String>, base_id: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            base_id,
        }
    }

    pub fn from_env() -> Self {
        let base_url = std::env::var("RECORD_API_URL")
            .unwrap_or_else(|_| "https://api.airtable.com".to_string());
        let api_key = std::env::var("RECORD_API_KEY").ok();
        let base_id = std::env::var("RECORD_API_BASE_ID").unwrap_or_default();
        if base_id.trim().is_empty() {
            tracing::warn!(
                base_url = %base_url,
                "RECORD_API_BASE_ID is not set; record requests will be refused"
            );
        }
        Self::new(base_url, api_key, base_id)
    }

    fn url(&self, segments: &[&str]) -> Result<Url, RemoteError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| RemoteError::Other(format!("invalid base url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| RemoteError::Other("base url cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn base_id(&self) -> Result<&str, RemoteError> {
        let base_id = self.base_id.trim();
        if base_id.is_empty() {
            return Err(RemoteError::Other(
                "record API base id is not configured (RECORD_API_BASE_ID)".to_string(),
            ));
        }
        Ok(base_id)
    }

    fn table_url(&self, table_id: &str, record_id: Option<&str>) -> Result<Url, RemoteError> {
        let base_id = self.base_id()?;
        match record_id {
            Some(id) => self.url(&["v0", base_id, table_id, id]),
            None => self.url(&["v0", base_id, table_id]),
        }
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        let req = self.client.request(method, url);
        match self.api_key {
            Some(ref key) => req.bearer_auth(key),
            None => req,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
        what: &str,
    ) -> Result<T, RemoteError> {
        let res = req
            .send()
            .await
            .map_err(|e| RemoteError::Other(e.to_string()))?;
        let status = res.status();
        let body = res
            .text()
            .await
            .map_err(|e| RemoteError::Other(e.to_string()))?;
        if status == StatusCode::NOT_FOUND {
            return Err(RemoteError::NotFound(what.to_string()));
        }
        if !status.is_success() {
            tracing::debug!(status = status.as_u16(), what, "record API call failed");
            return Err(RemoteError::Status {
                status: status.as_u16(),
                body,
            });
        }
        serde_json::from_str(&body)
            .map_err(|e| RemoteError::Other(format!("unexpected response for {}: {}", what, e)))
    }
}

#[async_trait::async_trait]
impl RecordApi for HttpRecordApi {
    async fn create_record(&self, table_id: &str, fields: &Fields) -> Result<Record, RemoteError> {
        let req = self
            .request(Method::POST, self.table_url(table_id, None)?)
            .json(&json!({ "fields": fields }));
        self.send(req, table_id).await
    }

    async fn create_records(
        &self,
        table_id: &str,
        records: &[Fields],
    ) -> Result<Vec<Record>, RemoteError> {
        let body: Vec<_> = records.iter().map(|f| json!({ "fields": f })).collect();
        let req = self
            .request(Method::POST, self.table_url(table_id, None)?)
            .json(&json!({ "records": body }));
        let list: RecordList = self.send(req, table_id).await?;
        Ok(list.records)
    }

    async fn update_record(
        &self,
        table_id: &str,
        record_id: &str,
        fields: &Fields,
    ) -> Result<Record, RemoteError> {
        let req = self
            .request(Method::PATCH, self.table_url(table_id, Some(record_id))?)
            .json(&json!({ "fields": fields }));
        self.send(req, &format!("{}/{}", table_id, record_id)).await
    }

    async fn update_records(
        &self,
        table_id: &str,
        records: &[RecordUpdate],
    ) -> Result<Vec<Record>, RemoteError> {
        let req = self
            .request(Method::PATCH, self.table_url(table_id, None)?)
            .json(&json!({ "records": records }));
        let list: RecordList = self.send(req, table_id).await?;
        Ok(list.records)
    }

    async fn delete_record(&self, table_id: &str, record_id: &str) -> Result<String, RemoteError> {
        let req = self.request(Method::DELETE, self.table_url(table_id, Some(record_id))?);
        let deleted: Deleted = self.send(req, &format!("{}/{}", table_id, record_id)).await?;
        Ok(deleted.id)
    }

    async fn delete_records(
        &self,
        table_id: &str,
        record_ids: &[String],
    ) -> Result<Vec<String>, RemoteError> {
        let query: Vec<(&str, &str)> = record_ids
            .iter()
            .map(|id| ("records[]", id.as_str()))
            .collect();
        let req = self
            .request(Method::DELETE, self.table_url(table_id, None)?)
            .query(&query);
        let list: DeletedList = self.send(req, table_id).await?;
        Ok(list.records.into_iter().map(|d| d.id).collect())
    }

    async fn get_record(&self, table_id: &str, record_id: &str) -> Result<Record, RemoteError> {
        let req = self.request(Method::GET, self.table_url(table_id, Some(record_id))?);
        self.send(req, &format!("{}/{}", table_id, record_id)).await
    }

    async fn list_records(
        &self,
        table_id: &str,
        max_records: usize,
    ) -> Result<Vec<Record>, RemoteError> {
        let req = self
            .request(Method::GET, self.table_url(table_id, None)?)
            .query(&[("maxRecords", max_records.to_string())]);
        let list: RecordList = self.send(req, table_id).await?;
        Ok(list.records)
    }

    async fn get_schema(&self, table_id: &str) -> Result<TableSchema, RemoteError> {
        let url = self.url(&["v0", "meta", "bases", self.base_id()?, "tables"])?;
        let list: TableList = self.send(self.request(Method::GET, url), "tables").await?;
        list.tables
            .into_iter()
            .find(|t| t.id == table_id || t.name == table_id)
            .ok_or_else(|| RemoteError::NotFound(format!("schema for table {}", table_id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_escape_table_names() {
        let api = HttpRecordApi::new(
            "https://records.example.com/".to_string(),
            None,
            "app123".to_string(),
        );
        let url = api.table_url("Sales Leads", Some("rec1")).unwrap();
        assert_eq!(
            url.as_str(),
            "https://records.example.com/v0/app123/Sales%20Leads/rec1"
        );
    }

    #[tokio::test]
    async fn missing_base_id_is_refused_before_any_request() {
        let api = HttpRecordApi::new("https://records.example.com".to_string(), None, " ".to_string());
        assert!(matches!(
            api.table_url("users", None),
            Err(RemoteError::Other(msg)) if msg.contains("RECORD_API_BASE_ID")
        ));
        assert!(matches!(api.get_schema("users").await, Err(RemoteError::Other(_))));
        assert!(matches!(api.list_records("users", 1).await, Err(RemoteError::Other(_))));
    }

    #[test]
    fn table_list_parses_schema_fields() {
        let raw = r#"{"tables":[{"id":"tbl1","name":"Users","fields":[
            {"id":"fld1","name":"Name","type":"singleLineText"},
            {"id":"fld2","name":"Seq","type":"autoNumber"}]}]}"#;
        let list: TableList = serde_json::from_str(raw).unwrap();
        let schema = &list.tables[0];
        assert_eq!(schema.fields.len(), 2);
        assert!(schema.field("Seq").unwrap().field_type.is_computed());
    }
}
