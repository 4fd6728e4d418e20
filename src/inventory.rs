//! This module provides a client for the Grocy REST API, and the records it exchanges

use std::error::Error;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Method;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::HTTP_TIMEOUT_SECS;
use crate::error::SyncError;
use crate::settings::Settings;
use crate::traits::InventoryApi;


/// A Grocy task
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GrocyTask {
    #[serde(deserialize_with = "lenient_i64")]
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub done: bool,
}

impl GrocyTask {
    pub fn description_or_empty(&self) -> &str {
        self.description.as_deref().unwrap_or("")
    }

    pub fn due_or_empty(&self) -> &str {
        self.due_date.as_deref().unwrap_or("")
    }
}

/// A Grocy chore, as returned by the `/chores` endpoint.
///
/// Chores have no "done" state: completing one is an action ("execute") that moves its next execution time.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GrocyChore {
    #[serde(alias = "id", deserialize_with = "lenient_i64")]
    pub chore_id: i64,
    #[serde(alias = "name", default)]
    pub chore_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub next_estimated_execution_time: Option<String>,
}

impl GrocyChore {
    pub fn next_execution_or_empty(&self) -> &str {
        self.next_estimated_execution_time.as_deref().unwrap_or("")
    }
}

/// The fields of a task that is about to be created
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct NewTask {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
}

/// A partial update of a task. Only the fields that are `Some` are sent
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct TaskUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
}

impl TaskUpdate {
    pub fn name(name: impl Into<String>) -> Self {
        Self { name: Some(name.into()), ..Self::default() }
    }
    pub fn description(description: impl Into<String>) -> Self {
        Self { description: Some(description.into()), ..Self::default() }
    }
    pub fn due_date(due_date: impl Into<String>) -> Self {
        Self { due_date: Some(due_date.into()), ..Self::default() }
    }
}


/// A product as embedded into stock entries
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Product {
    #[serde(default, deserialize_with = "lenient_opt_i64")]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: Option<String>,
}

/// An entry of the volatile stock (due, overdue, expired or missing product)
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct StockEntry {
    #[serde(default, deserialize_with = "lenient_opt_i64")]
    pub product_id: Option<i64>,
    #[serde(default)]
    pub product: Option<Product>,
    /// Missing products carry their name at the top level
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub best_before_date: Option<String>,
    #[serde(default)]
    pub amount: Option<Value>,
    #[serde(default)]
    pub amount_missing: Option<Value>,
}

impl StockEntry {
    pub fn resolved_product_id(&self) -> Option<i64> {
        self.product_id.or_else(|| self.product.as_ref().and_then(|p| p.id))
    }

    pub fn product_name(&self) -> Option<&str> {
        self.product.as_ref()
            .and_then(|p| p.name.as_deref())
            .or_else(|| self.name.as_deref())
    }
}

/// The answer of `/stock/volatile`
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct VolatileStock {
    #[serde(default)]
    pub due_products: Vec<StockEntry>,
    #[serde(default)]
    pub overdue_products: Vec<StockEntry>,
    #[serde(default)]
    pub expired_products: Vec<StockEntry>,
    #[serde(default)]
    pub missing_products: Vec<StockEntry>,
}


/// A client for the Grocy API
pub struct GrocyClient {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
}

impl GrocyClient {
    /// Create a client. This does not start a connection
    pub fn new<S: AsRef<str>, T: ToString>(url: S, api_key: T, verify_ssl: bool) -> Result<Self, SyncError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .danger_accept_invalid_certs(!verify_ssl)
            .build()?;

        Ok(Self {
            base_url: url.as_ref().trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            http,
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self, SyncError> {
        Self::new(&settings.grocy_url, &settings.grocy_api_key, settings.grocy_verify_ssl)
    }

    fn ensure_configured(&self) -> Result<(), SyncError> {
        if self.base_url.is_empty() || self.api_key.is_empty() {
            return Err(SyncError::configuration("Grocy URL or API key is not configured"));
        }
        Ok(())
    }

    async fn request(&self, method: Method, endpoint: &str, query: &[(&str, String)], body: Option<Value>) -> Result<Value, SyncError> {
        self.ensure_configured()?;
        let url = format!("{}/api{}", self.base_url, endpoint);

        let mut request = self.http
            .request(method, &url)
            .header("GROCY-API-KEY", &self.api_key)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(query);
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() == false {
            let text = response.text().await.unwrap_or_default();
            return Err(SyncError::connection(format!("Grocy answered {} for {}: {}", status, endpoint, text)));
        }

        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(&text)
            .map_err(|err| SyncError::parse(format!("invalid JSON from Grocy ({}): {}", endpoint, err)))
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, endpoint: &str, query: &[(&str, String)]) -> Result<T, SyncError> {
        let value = self.request(Method::GET, endpoint, query, None).await?;
        serde_json::from_value(value)
            .map_err(|err| SyncError::parse(format!("unexpected answer from Grocy ({}): {}", endpoint, err)))
    }

    /// Returns a human-readable connection status, e.g. `Connected to Grocy 4.0.3`
    pub async fn test_connection(&self) -> (bool, String) {
        match self.request(Method::GET, "/system/info", &[], None).await {
            Err(err) => (false, err.to_string()),
            Ok(info) => {
                let version = info.pointer("/grocy_version/Version")
                    .and_then(|v| v.as_str())
                    .unwrap_or("?");
                (true, format!("Connected to Grocy {}", version))
            }
        }
    }

    pub async fn volatile_stock(&self, due_soon_days: u32) -> Result<VolatileStock, SyncError> {
        self.get("/stock/volatile", &[("due_soon_days", due_soon_days.to_string())]).await
    }

    pub async fn all_stock(&self) -> Result<Vec<StockEntry>, SyncError> {
        self.get("/stock", &[]).await
    }
}

#[async_trait]
impl InventoryApi for GrocyClient {
    async fn get_all_tasks(&self) -> Result<Vec<GrocyTask>, Box<dyn Error>> {
        // `/tasks` omits done tasks, `/objects/tasks` does not
        Ok(self.get("/objects/tasks", &[]).await?)
    }

    async fn get_chores(&self) -> Result<Vec<GrocyChore>, Box<dyn Error>> {
        Ok(self.get("/chores", &[]).await?)
    }

    async fn complete_task(&self, task_id: i64) -> Result<(), Box<dyn Error>> {
        let body = serde_json::json!({ "done_time": "" });
        self.request(Method::POST, &format!("/tasks/{}/complete", task_id), &[], Some(body)).await?;
        Ok(())
    }

    async fn undo_task(&self, task_id: i64) -> Result<(), Box<dyn Error>> {
        self.request(Method::POST, &format!("/tasks/{}/undo", task_id), &[], Some(serde_json::json!({}))).await?;
        Ok(())
    }

    async fn update_task(&self, task_id: i64, update: &TaskUpdate) -> Result<(), Box<dyn Error>> {
        let body = serde_json::to_value(update)?;
        self.request(Method::PUT, &format!("/objects/tasks/{}", task_id), &[], Some(body)).await?;
        Ok(())
    }

    async fn create_task(&self, task: &NewTask) -> Result<i64, Box<dyn Error>> {
        let body = serde_json::to_value(task)?;
        let answer = self.request(Method::POST, "/objects/tasks", &[], Some(body)).await?;
        match answer.get("created_object_id").and_then(value_as_i64) {
            Some(id) => Ok(id),
            None => Err(format!("Grocy did not return the id of the created task: {}", answer).into()),
        }
    }

    async fn execute_chore(&self, chore_id: i64) -> Result<(), Box<dyn Error>> {
        let body = serde_json::json!({ "tracked_time": "", "done_by": 0 });
        self.request(Method::POST, &format!("/chores/{}/execute", chore_id), &[], Some(body)).await?;
        Ok(())
    }
}


// Depending on its version (and database backend), Grocy serializes numbers and booleans as strings

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    value_as_i64(&value).ok_or_else(|| de::Error::custom(format!("expected an integer id, got {}", value)))
}

fn lenient_opt_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_as_i64))
}

fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => b,
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        Some(Value::String(s)) => s.trim() == "1" || s.trim().eq_ignore_ascii_case("true"),
        Some(_) => false,
    })
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tasks_with_string_fields() {
        let json = r#"[
            {"id": "3", "name": "Descale the kettle", "description": null, "due_date": "2024-05-01", "done": "1"},
            {"id": 4, "name": "Water plants", "done": 0}
        ]"#;
        let tasks: Vec<GrocyTask> = serde_json::from_str(json).unwrap();
        assert_eq!(tasks[0].id, 3);
        assert!(tasks[0].done);
        assert_eq!(tasks[0].due_or_empty(), "2024-05-01");
        assert_eq!(tasks[1].id, 4);
        assert!(tasks[1].done == false);
        assert_eq!(tasks[1].description_or_empty(), "");
    }

    #[test]
    fn chores_accept_both_naming_schemes() {
        let json = r#"[
            {"chore_id": "7", "chore_name": "Vacuum", "next_estimated_execution_time": "2999-12-31 23:59:59"},
            {"id": 8, "name": "Mop"}
        ]"#;
        let chores: Vec<GrocyChore> = serde_json::from_str(json).unwrap();
        assert_eq!(chores[0].chore_id, 7);
        assert_eq!(chores[0].chore_name, "Vacuum");
        assert_eq!(chores[1].chore_id, 8);
        assert_eq!(chores[1].next_execution_or_empty(), "");
    }

    #[test]
    fn task_update_only_sends_given_fields() {
        let update = TaskUpdate::name("Water plants twice");
        assert_eq!(serde_json::to_string(&update).unwrap(), r#"{"name":"Water plants twice"}"#);
    }

    #[test]
    fn volatile_stock_names() {
        let json = r#"{
            "due_products": [{"product_id": "12", "product": {"id": 12, "name": "Milk"}, "best_before_date": "2024-05-03"}],
            "missing_products": [{"id": 5, "name": "Flour", "amount_missing": "2"}]
        }"#;
        let stock: VolatileStock = serde_json::from_str(json).unwrap();
        assert_eq!(stock.due_products[0].resolved_product_id(), Some(12));
        assert_eq!(stock.due_products[0].product_name(), Some("Milk"));
        assert_eq!(stock.missing_products[0].product_name(), Some("Flour"));
        assert!(stock.expired_products.is_empty());
    }

    #[tokio::test]
    async fn unconfigured_client_fails_fast() {
        let client = GrocyClient::new("", "", true).unwrap();
        let err = client.get_all_tasks().await.unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }
}
