//! Trivy Operator webhook payloads carrying an `SBOMReport`.

use crate::error::Error;
use serde::Deserialize;
use serde_json::{Value, json};

const SBOM_REPORT_KIND: &str = "SBOMReport";
const VERB_UPDATE: &str = "update";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct Payload {
    #[serde(default)]
    verb: String,
    operator_object: Option<Value>,
}

/// A normalized SBOM report. Nothing in it changes after parsing.
#[derive(Debug, Clone)]
pub struct SbomReport {
    verb: String,
    object: Value,
    update_timestamp: Option<String>,
    bom: Vec<u8>,
}

impl SbomReport {
    /// Fails with [`Error::NotSbomReport`] for any other kind of operator
    /// object, which callers skip rather than treat as a failure.
    pub fn parse(input: &[u8]) -> Result<Self, Error> {
        let payload: Payload = serde_json::from_slice(input)
            .map_err(|e| Error::InvalidReport(format!("payload is not valid JSON: {}", e)))?;
        let object = payload
            .operator_object
            .ok_or_else(|| Error::NotSbomReport("payload has no operatorObject".to_string()))?;

        let kind = object
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if kind != SBOM_REPORT_KIND {
            return Err(Error::NotSbomReport(format!(
                "operatorObject kind is {:?}",
                kind
            )));
        }

        let report = object
            .get("report")
            .ok_or_else(|| Error::InvalidReport("SBOMReport has no report".to_string()))?;
        let components = report
            .get("components")
            .filter(|components| !components.is_null())
            .ok_or_else(|| Error::InvalidReport("SBOMReport has no components".to_string()))?;
        let bom = serde_json::to_vec(components)
            .map_err(|e| Error::InvalidReport(format!("BOM cannot be serialized: {}", e)))?;
        let update_timestamp = match report.get("updateTimestamp") {
            Some(Value::String(timestamp)) => Some(timestamp.clone()),
            Some(Value::Number(timestamp)) => Some(timestamp.to_string()),
            _ => None,
        };

        Ok(SbomReport {
            verb: payload.verb,
            object,
            update_timestamp,
            bom,
        })
    }

    pub fn verb(&self) -> &str {
        &self.verb
    }

    pub fn is_verb_update(&self) -> bool {
        self.verb == VERB_UPDATE
    }

    /// The data field templates are rendered against, with the operator object
    /// under `sbomReport`.
    pub fn to_mapping(&self) -> Value {
        json!({ "sbomReport": self.object })
    }

    /// The embedded CycloneDX document as JSON bytes.
    pub fn bom(&self) -> &[u8] {
        &self.bom
    }

    pub fn update_timestamp(&self) -> Option<&str> {
        self.update_timestamp.as_deref()
    }

    /// The update timestamp as epoch milliseconds, `None` when it is missing or
    /// not an integer.
    pub fn update_timestamp_millis(&self) -> Option<i64> {
        self.update_timestamp()?.trim().parse().ok()
    }
}
