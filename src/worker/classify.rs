//! URL classification into static assets, feed requests and everything else.

use color_eyre::Result;
use std::collections::BTreeSet;
use url::Url;

use crate::config::Config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
  StaticAsset,
  ApiRequest,
  Other,
}

/// Pure URL classifier. Static rules are checked before api rules, so a URL
/// matching both is a static asset.
#[derive(Debug, Clone)]
pub struct Classifier {
  static_extensions: BTreeSet<String>,
  manifest_filename: String,
  api_hosts: BTreeSet<String>,
  api_path_markers: Vec<String>,
  sync_targets: Vec<Url>,
}

impl Classifier {
  pub fn new(config: &Config) -> Result<Self> {
    let classifier = &config.classifier;
    Ok(Self {
      static_extensions: classifier.static_extensions.clone(),
      manifest_filename: classifier.manifest_filename.clone(),
      api_hosts: classifier.api_hosts.clone(),
      api_path_markers: classifier.api_path_markers.clone(),
      sync_targets: config.sync.target_urls()?,
    })
  }

  pub fn classify(&self, url: &Url) -> Classification {
    if self.is_static(url) {
      Classification::StaticAsset
    } else if self.is_api(url) {
      Classification::ApiRequest
    } else {
      Classification::Other
    }
  }

  fn is_static(&self, url: &Url) -> bool {
    let path = url.path();
    if path == "/" {
      return true;
    }

    let file_name = path.rsplit('/').next().unwrap_or_default();
    if file_name == self.manifest_filename {
      return true;
    }

    match file_name.rsplit_once('.') {
      Some((stem, ext)) if !stem.is_empty() => self
        .static_extensions
        .contains(&ext.to_ascii_lowercase()),
      _ => false,
    }
  }

  fn is_api(&self, url: &Url) -> bool {
    if let Some(host) = url.host_str() {
      if self.api_hosts.contains(&host.to_ascii_lowercase()) {
        return true;
      }
    }

    let path = url.path();
    if self
      .api_path_markers
      .iter()
      .any(|marker| path.contains(marker.as_str()))
    {
      return true;
    }

    let mut bare = url.clone();
    bare.set_fragment(None);
    self.sync_targets.contains(&bare)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn classifier() -> Classifier {
    Classifier::new(&Config::default()).unwrap()
  }

  fn classify(url: &str) -> Classification {
    classifier().classify(&Url::parse(url).unwrap())
  }

  #[test]
  fn test_static_extensions() {
    for url in [
      "http://localhost:8080/index.html",
      "http://localhost:8080/css/style.css",
      "http://localhost:8080/script.js",
      "http://localhost:8080/icons/icon-192.png",
      "http://localhost:8080/photo.JPG",
      "http://localhost:8080/map.svg?v=3",
    ] {
      assert_eq!(classify(url), Classification::StaticAsset, "{}", url);
    }
  }

  #[test]
  fn test_root_and_manifest_are_static() {
    assert_eq!(classify("http://localhost:8080/"), Classification::StaticAsset);
    assert_eq!(
      classify("http://localhost:8080/manifest.json"),
      Classification::StaticAsset
    );
  }

  #[test]
  fn test_json_is_not_mistaken_for_js() {
    assert_eq!(classify("http://localhost:8080/data.json"), Classification::Other);
  }

  #[test]
  fn test_extension_must_end_the_path() {
    assert_eq!(classify("http://localhost:8080/index.html/edit"), Classification::Other);
    assert_eq!(classify("http://localhost:8080/.html"), Classification::Other);
  }

  #[test]
  fn test_api_requests() {
    for url in [
      "https://metromap.cityofmadison.com/gtfsrt/vehicles",
      "https://METROMAP.cityofmadison.com/other",
      "https://mirror.example.com/gtfsrt/alerts",
      "https://metromap.cityofmadison.com/gtfsrt/trips#latest",
    ] {
      assert_eq!(classify(url), Classification::ApiRequest, "{}", url);
    }
  }

  #[test]
  fn test_exact_sync_target_is_api() {
    let mut config = Config::default();
    config.classifier.api_hosts.clear();
    config.classifier.api_path_markers.clear();
    config.sync.targets = vec!["https://feeds.example.com/rt/vehicles".to_string()];
    let classifier = Classifier::new(&config).unwrap();

    let target = Url::parse("https://feeds.example.com/rt/vehicles").unwrap();
    let near = Url::parse("https://feeds.example.com/rt/vehicles?x=1").unwrap();
    assert_eq!(classifier.classify(&target), Classification::ApiRequest);
    assert_eq!(classifier.classify(&near), Classification::Other);
  }

  #[test]
  fn test_static_wins_over_api() {
    assert_eq!(
      classify("https://metromap.cityofmadison.com/gtfsrt/logo.png"),
      Classification::StaticAsset
    );
  }

  #[test]
  fn test_other() {
    assert_eq!(classify("https://tile.openstreetmap.org/12/1/2"), Classification::Other);
    assert_eq!(classify("http://localhost:8080/api/stops"), Classification::Other);
  }

  #[test]
  fn test_classification_is_deterministic() {
    let classifier = classifier();
    let url = Url::parse("https://metromap.cityofmadison.com/gtfsrt/vehicles").unwrap();
    let first = classifier.classify(&url);
    for _ in 0..10 {
      assert_eq!(classifier.classify(&url), first);
    }
  }
}
