// MTA service status feed.
//
// Status endpoint: http://web.mta.info/status/serviceStatus.txt
//
// A small XML document listing per-line service states, separate from
// the station aggregation pipeline. The document timestamp is agency
// local time (America/New_York) and is normalized to UTC.

use crate::sst_models::{Result, SSTError};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use chrono_tz::America::New_York;
use roxmltree::Document;
use serde::Serialize;

const SERVICE_STATUS_URL: &str = "http://web.mta.info/status/serviceStatus.txt";
const STATUS_TIME_FORMAT: &str = "%m/%d/%Y %I:%M:%S %p";

#[derive(Debug, Clone, Serialize)]
pub struct LineStatus {
    pub line: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceStatus {
    pub updated: DateTime<Utc>,
    pub lines: Vec<LineStatus>,
}

pub async fn fetch_service_status(http: &reqwest::Client) -> Result<ServiceStatus> {
    let response = http
        .get(SERVICE_STATUS_URL)
        .send()
        .await
        .map_err(|e| SSTError::NetworkError(format!("Failed to fetch service status: {}", e)))?;
    if !response.status().is_success() {
        return Err(SSTError::NetworkError(format!(
            "API returned error: {}",
            response.status()
        )));
    }
    let body = response
        .text()
        .await
        .map_err(|e| SSTError::NetworkError(format!("Failed to read response: {}", e)))?;
    parse_service_status(&body)
}

pub fn parse_service_status(xml: &str) -> Result<ServiceStatus> {
    let doc = Document::parse(xml)
        .map_err(|e| SSTError::ParseError(format!("Invalid status XML: {}", e)))?;
    let root = doc.root_element();

    let timestamp = root
        .children()
        .find(|n| n.has_tag_name("timestamp"))
        .and_then(|n| n.text())
        .ok_or_else(|| SSTError::ParseError("Missing timestamp in status XML".to_string()))?;
    let updated = parse_updated(timestamp)?;

    let subway = root
        .children()
        .find(|n| n.has_tag_name("subway"))
        .ok_or_else(|| SSTError::ParseError("Missing subway section in status XML".to_string()))?;

    let mut lines = Vec::new();
    for line in subway.children().filter(|n| n.has_tag_name("line")) {
        let name = line
            .children()
            .find(|n| n.has_tag_name("name"))
            .and_then(|n| n.text());
        let status = line
            .children()
            .find(|n| n.has_tag_name("status"))
            .and_then(|n| n.text());
        if let (Some(name), Some(status)) = (name, status) {
            lines.push(LineStatus {
                line: name.trim().to_string(),
                status: title_case(status.trim()),
            });
        }
    }

    Ok(ServiceStatus { updated, lines })
}

fn parse_updated(raw: &str) -> Result<DateTime<Utc>> {
    let naive = NaiveDateTime::parse_from_str(raw.trim(), STATUS_TIME_FORMAT)
        .map_err(|e| SSTError::ParseError(format!("Invalid status timestamp {:?}: {}", raw, e)))?;
    let local = New_York
        .from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| {
            SSTError::ParseError(format!("Nonexistent local time in status feed: {:?}", raw))
        })?;
    Ok(local.with_timezone(&Utc))
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
