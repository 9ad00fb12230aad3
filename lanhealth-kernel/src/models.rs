use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Number, Value};
use validator::Validate;

use crate::error::ApiError;

/// Champs d'un rapport gardés dans le store ; toute autre clé est ignorée.
pub const REPORT_FIELDS: [&str; 7] = [
    "device_id",
    "cpu",
    "ram",
    "temperature",
    "status",
    "health_score",
    "extra",
];

pub const STATUS_UNKNOWN: &str = "UNKNOWN";

/// Enregistrement stocké : uniquement les clés fournies par l'appareil.
pub type ReportRecord = Map<String, Value>;

/// Vue typée du rapport, utilisée pour la validation seulement.
///
/// Les champs numériques acceptent aussi les nombres envoyés en chaîne
/// (`"42.5"`), `health_score` accepte un flottant entier (`90.0`).
#[derive(Debug, Deserialize, Validate)]
pub struct DeviceReport {
    #[validate(length(min = 1, message = "device_id must not be empty"))]
    pub device_id: String,
    #[serde(default, deserialize_with = "lenient_f64")]
    #[validate(range(min = 0.0, max = 100.0, message = "cpu must be within [0, 100]"))]
    pub cpu: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    #[validate(range(min = 0.0, max = 100.0, message = "ram must be within [0, 100]"))]
    pub ram: Option<f64>,
    #[serde(default, deserialize_with = "lenient_f64")]
    pub temperature: Option<f64>,
    pub status: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    #[validate(range(min = 0, max = 100, message = "health_score must be within [0, 100]"))]
    pub health_score: Option<i64>,
    pub extra: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LooseNumber {
    Int(i64),
    Float(f64),
    Text(String),
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

fn lenient_f64<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<LooseNumber>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let value = match raw {
        LooseNumber::Int(n) => Some(n as f64),
        LooseNumber::Float(f) => finite(f),
        LooseNumber::Text(s) => s.trim().parse::<f64>().ok().and_then(finite),
    };
    value
        .map(Some)
        .ok_or_else(|| serde::de::Error::custom("expected a number or a numeric string"))
}

fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    fn integral(f: f64) -> Option<i64> {
        (f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64).then_some(f as i64)
    }

    let Some(raw) = Option::<LooseNumber>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let value = match raw {
        LooseNumber::Int(n) => Some(n),
        LooseNumber::Float(f) => integral(f),
        LooseNumber::Text(s) => {
            let s = s.trim();
            s.parse::<i64>().ok().or_else(|| s.parse::<f64>().ok().and_then(integral))
        }
    };
    value
        .map(Some)
        .ok_or_else(|| serde::de::Error::custom("expected an integer or an integer string"))
}

#[derive(Debug, Serialize)]
pub struct ReportAck {
    pub ok: bool,
    pub stored_for: String,
}

#[derive(Debug, Serialize)]
pub struct ApiStatus {
    pub status: &'static str,
}

/// Valide le corps brut d'un POST et construit l'enregistrement à stocker.
///
/// Les valeurs sont recopiées telles quelles depuis le JSON reçu (`60` reste `60`),
/// sauf les nombres convertis (`"42"` devient `42.0`, `90.0` devient `90` pour
/// `health_score`). Les clés à `null` sont retirées, puis `status` vaut
/// `"UNKNOWN"` s'il manque.
pub fn parse_report(body: &[u8]) -> Result<(String, ReportRecord), ApiError> {
    let raw: Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::Validation(format!("invalid JSON body: {e}")))?;
    if !raw.is_object() {
        return Err(ApiError::Validation("report body must be a JSON object".into()));
    }

    let report = DeviceReport::deserialize(&raw)
        .map_err(|e| ApiError::Validation(format!("invalid report: {e}")))?;
    report
        .validate()
        .map_err(|e| ApiError::Validation(format!("invalid report: {e}")))?;

    match raw {
        Value::Object(fields) => {
            let mut record = build_record(fields);
            store_coerced_numbers(&mut record, &report);
            Ok((report.device_id, record))
        }
        _ => Err(ApiError::Validation("report body must be a JSON object".into())),
    }
}

fn build_record(fields: Map<String, Value>) -> ReportRecord {
    let mut record: ReportRecord = fields
        .into_iter()
        .filter(|(key, value)| REPORT_FIELDS.contains(&key.as_str()) && !value.is_null())
        .collect();
    record
        .entry("status")
        .or_insert_with(|| Value::String(STATUS_UNKNOWN.into()));
    record
}

// Remplace dans l'enregistrement les valeurs qui n'étaient pas déjà du bon type JSON.
fn store_coerced_numbers(record: &mut ReportRecord, report: &DeviceReport) {
    for (key, value) in [
        ("cpu", report.cpu),
        ("ram", report.ram),
        ("temperature", report.temperature),
    ] {
        let Some(value) = value else { continue };
        if record.get(key).is_some_and(|raw| !raw.is_number()) {
            if let Some(n) = Number::from_f64(value) {
                record.insert(key.into(), Value::Number(n));
            }
        }
    }

    if let Some(score) = report.health_score {
        if record
            .get("health_score")
            .is_some_and(|raw| !raw.is_i64() && !raw.is_u64())
        {
            record.insert("health_score".into(), Value::from(score));
        }
    }
}
