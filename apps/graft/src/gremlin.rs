//! # Gremlin HTTP Client
//!
//! `GraphClient` over the Gremlin Server HTTP endpoint.
//!
//! Every write is one parameterised script: labels, property keys and values
//! travel as bindings, never spliced into the script text. Responses are
//! accepted in both untyped JSON and GraphSON 2/3 (`{"@type", "@value"}`)
//! shapes.

use graft_core::{EngineId, GraftError, GraphClient, PropertyMap, PropertyValue, RemoteError};
use serde::Serialize;
use serde_json::{Map, Value};
use std::time::Duration;

// =============================================================================
// SCRIPTS
// =============================================================================

/// A Gremlin script with its bindings, as POSTed to the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Script {
    pub gremlin: String,
    pub bindings: Map<String, Value>,
}

impl Script {
    fn new(source: &str) -> Self {
        Self {
            gremlin: source.to_string(),
            bindings: Map::new(),
        }
    }

    fn bind(&mut self, name: String, value: Value) -> String {
        self.bindings.insert(name.clone(), value);
        name
    }

    fn push_properties(&mut self, properties: &PropertyMap, cardinality: Option<&str>) {
        for (i, (name, value)) in properties.iter().enumerate() {
            let k = self.bind(format!("k{i}"), Value::String(name.clone()));
            let v = self.bind(format!("v{i}"), json_value(value));
            match cardinality {
                Some(card) => self.gremlin.push_str(&format!(".property({card}, {k}, {v})")),
                None => self.gremlin.push_str(&format!(".property({k}, {v})")),
            }
        }
    }

    /// `g.addV(label).property(k, v)... .id()`
    pub fn add_vertex(source: &str, label: &str, properties: &PropertyMap) -> Self {
        let mut script = Self::new(source);
        let lbl = script.bind("lbl".to_string(), Value::String(label.to_string()));
        script.gremlin.push_str(&format!(".addV({lbl})"));
        script.push_properties(properties, None);
        script.gremlin.push_str(".id()");
        script
    }

    /// `g.V(from).addE(label).to(__.V(to)).property(k, v)... .id()`
    pub fn add_edge(
        source: &str,
        from: &EngineId,
        to: &EngineId,
        label: &str,
        properties: &PropertyMap,
    ) -> Self {
        let mut script = Self::new(source);
        let from = script.bind("from".to_string(), engine_id_value(from));
        let to = script.bind("to".to_string(), engine_id_value(to));
        let lbl = script.bind("lbl".to_string(), Value::String(label.to_string()));
        script
            .gremlin
            .push_str(&format!(".V({from}).addE({lbl}).to(__.V({to}))"));
        script.push_properties(properties, None);
        script.gremlin.push_str(".id()");
        script
    }

    /// `g.V(id).property(single, k, v)... .id()`
    pub fn update_vertex(source: &str, id: &EngineId, properties: &PropertyMap) -> Self {
        let mut script = Self::new(source);
        let vid = script.bind("vid".to_string(), engine_id_value(id));
        script.gremlin.push_str(&format!(".V({vid})"));
        script.push_properties(properties, Some("single"));
        script.gremlin.push_str(".id()");
        script
    }
}

fn json_value(value: &PropertyValue) -> Value {
    match value {
        PropertyValue::Text(s) => Value::String(s.clone()),
        PropertyValue::Int(i) => Value::from(*i),
        PropertyValue::Float(f) => Value::from(*f),
        PropertyValue::Bool(b) => Value::Bool(*b),
        PropertyValue::Timestamp(t) => Value::String(t.to_rfc3339()),
    }
}

fn engine_id_value(id: &EngineId) -> Value {
    match id {
        EngineId::Long(id) => Value::from(*id),
        EngineId::Text(id) => Value::String(id.clone()),
    }
}

// =============================================================================
// RESPONSES
// =============================================================================

/// Strip GraphSON type wrappers, recursively.
fn untyped(value: &Value) -> Value {
    match value {
        Value::Object(map) if map.contains_key("@type") && map.contains_key("@value") => {
            map.get("@value").map(untyped).unwrap_or(Value::Null)
        }
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), untyped(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(untyped).collect()),
        other => other.clone(),
    }
}

/// The `result.data` list of a Gremlin Server response.
pub fn result_data(body: &Value) -> Result<Vec<Value>, RemoteError> {
    let body = untyped(body);

    let code = body
        .pointer("/status/code")
        .and_then(Value::as_u64)
        .unwrap_or(200);
    if code == 204 {
        return Ok(Vec::new());
    }
    if code >= 300 {
        let message = body
            .pointer("/status/message")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let status = u16::try_from(code).map_err(|_| {
            RemoteError::Protocol(format!("status code {code} out of range: {message}"))
        })?;
        return Err(status_error(status, message));
    }

    match body.pointer("/result/data") {
        Some(Value::Array(items)) => Ok(items.clone()),
        Some(Value::Null) | None => Ok(Vec::new()),
        Some(other) => Ok(vec![other.clone()]),
    }
}

/// The engine id a write script returned.
pub fn returned_id(data: &[Value], what: &str) -> Result<EngineId, RemoteError> {
    match data.first() {
        Some(Value::Number(n)) => n
            .as_i64()
            .map(EngineId::Long)
            .ok_or_else(|| RemoteError::Protocol(format!("{what} id {n} is not an integer"))),
        Some(Value::String(s)) => Ok(EngineId::Text(s.clone())),
        Some(other) => Err(RemoteError::Protocol(format!(
            "{what} id has unsupported shape: {other}"
        ))),
        None => Err(RemoteError::Rejected(format!("{what} write returned nothing"))),
    }
}

fn status_error(status: u16, message: String) -> RemoteError {
    if status >= 500 {
        RemoteError::Engine { status, message }
    } else {
        RemoteError::Rejected(format!("status {status}: {message}"))
    }
}

// =============================================================================
// CLIENT
// =============================================================================

/// Blocking client for one Gremlin Server endpoint.
#[derive(Debug, Clone)]
pub struct GremlinHttpClient {
    http: reqwest::blocking::Client,
    endpoint: String,
    source: String,
}

impl GremlinHttpClient {
    /// Create a client posting to `endpoint` with traversal source `source`.
    pub fn new(endpoint: &str, source: &str, timeout: Duration) -> Result<Self, GraftError> {
        let http = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GraftError::IoError(format!("Build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            source: source.to_string(),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// POST one script and return its `result.data`.
    fn submit(&self, script: &Script) -> Result<Vec<Value>, RemoteError> {
        tracing::trace!(gremlin = %script.gremlin, "submitting script");
        let resp = self.send(self.http.post(&self.endpoint).json(script))?;
        let body = self.handle_response(resp)?;
        result_data(&body)
    }

    /// Send a request and map transport failures.
    fn send(
        &self,
        req: reqwest::blocking::RequestBuilder,
    ) -> Result<reqwest::blocking::Response, RemoteError> {
        req.send().map_err(|e| {
            if e.is_timeout() {
                RemoteError::Timeout
            } else {
                RemoteError::Connection(format!("{}: {e}", self.endpoint))
            }
        })
    }

    /// Check the HTTP status and parse the JSON body.
    fn handle_response(&self, resp: reqwest::blocking::Response) -> Result<Value, RemoteError> {
        let status = resp.status();
        if status.is_client_error() || status.is_server_error() {
            let body = resp.text().unwrap_or_default();
            let message = serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|v| {
                    v.get("message")
                        .or_else(|| v.pointer("/status/message"))
                        .and_then(Value::as_str)
                        .map(str::to_string)
                })
                .unwrap_or(body);
            return Err(status_error(status.as_u16(), message));
        }
        resp.json::<Value>().map_err(|e| {
            if e.is_timeout() {
                RemoteError::Timeout
            } else {
                RemoteError::Protocol(e.to_string())
            }
        })
    }
}

impl GraphClient for GremlinHttpClient {
    fn create_vertex(
        &mut self,
        label: &str,
        properties: &PropertyMap,
    ) -> Result<EngineId, RemoteError> {
        let data = self.submit(&Script::add_vertex(&self.source, label, properties))?;
        returned_id(&data, "vertex")
    }

    fn create_edge(
        &mut self,
        from: &EngineId,
        to: &EngineId,
        label: &str,
        properties: &PropertyMap,
    ) -> Result<(), RemoteError> {
        let data = self.submit(&Script::add_edge(&self.source, from, to, label, properties))?;
        if data.is_empty() {
            return Err(RemoteError::Rejected(format!(
                "no edge created from {from} to {to}; endpoint missing"
            )));
        }
        Ok(())
    }

    fn update_vertex(&mut self, id: &EngineId, properties: &PropertyMap) -> Result<(), RemoteError> {
        let data = self.submit(&Script::update_vertex(&self.source, id, properties))?;
        if data.is_empty() {
            return Err(RemoteError::Rejected(format!("vertex {id} not found")));
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
