//! Placeholder responses served when both network and cache come up empty.
//!
//! Both are labelled as offline so the app never presents them as fresh data.

use chrono::{DateTime, SecondsFormat, Utc};
use color_eyre::{eyre::eyre, Result};
use serde::Serialize;

use crate::net::Response;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineArrival {
  pub time: &'static str,
  pub status: &'static str,
  pub vehicle_id: &'static str,
  pub capacity: &'static str,
}

/// Same shape as the live arrivals payload, flagged `offline`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OfflineArrivals {
  pub arrivals: Vec<OfflineArrival>,
  pub last_updated: String,
  pub offline: bool,
}

impl OfflineArrivals {
  pub fn at(now: DateTime<Utc>) -> Self {
    Self {
      arrivals: vec![OfflineArrival {
        time: "?",
        status: "Offline",
        vehicle_id: "N/A",
        capacity: "unknown",
      }],
      last_updated: now.to_rfc3339_opts(SecondsFormat::Millis, true),
      offline: true,
    }
  }
}

#[derive(Debug, Clone)]
pub struct OfflineFallbacks {
  app_name: String,
}

impl OfflineFallbacks {
  pub fn new(app_name: &str) -> Self {
    Self {
      app_name: app_name.to_string(),
    }
  }

  /// Self-contained page for failed navigations. Served as 200.
  pub fn document(&self) -> Response {
    let body = OFFLINE_PAGE.replace("{app_name}", &escape_html(&self.app_name));
    Response::new(200, "text/html; charset=utf-8", body)
  }

  /// Any other failed static request.
  pub fn unavailable(&self) -> Response {
    Response::new(503, "text/plain; charset=utf-8", "Offline")
  }

  /// Arrivals placeholder for a feed request with nothing cached.
  pub fn api_payload(&self, now: DateTime<Utc>) -> Result<Response> {
    let body = serde_json::to_vec(&OfflineArrivals::at(now))
      .map_err(|e| eyre!("Failed to serialize offline arrivals: {}", e))?;
    Ok(Response::new(200, "application/json", body))
  }
}

fn escape_html(s: &str) -> String {
  s.replace('&', "&amp;")
    .replace('<', "&lt;")
    .replace('>', "&gt;")
    .replace('"', "&quot;")
}

const OFFLINE_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head>
  <title>{app_name} - Offline</title>
  <meta charset="utf-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <style>
    body { font-family: Arial, sans-serif; text-align: center; padding: 50px; background: #fef2f2; }
    .offline-icon { font-size: 64px; margin-bottom: 20px; }
    h1 { color: #dc2626; }
    p { color: #6b7280; margin-bottom: 20px; }
    .retry-btn { background: #dc2626; color: white; padding: 10px 20px; border: none; border-radius: 5px; cursor: pointer; }
  </style>
</head>
<body>
  <div class="offline-icon">&#128652;</div>
  <h1>{app_name} - Offline</h1>
  <p>You're currently offline. The app will work with cached data when available.</p>
  <p>Check your internet connection and try again.</p>
  <button class="retry-btn" onclick="window.location.reload()">Try Again</button>
</body>
</html>
"#;
