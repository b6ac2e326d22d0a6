//! Fetching volumes and peak lookups.
//!
//! Requests go through the [`Fetcher`] seam and complete by sending a
//! [`FetchReply`] on the session's reply channel. Replies carry the
//! generation they were issued under; the session drops any that a newer
//! request has superseded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Deserialize;
use tokio::sync::mpsc;

use crate::config::MapParams;
use crate::error::NetworkError;
use crate::events::MmCoord;

/// What a request is for. Each kind is its own "last request wins" lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resource {
    Background,
    Overlay,
    Peak,
}

/// Advisory cancellation flag shared with an in-flight request.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub resource: Resource,
    pub generation: u64,
    pub url: String,
    pub cancel: CancelToken,
}

#[derive(Debug)]
pub struct FetchReply {
    pub resource: Resource,
    pub generation: u64,
    pub result: Result<Vec<u8>, NetworkError>,
}

impl FetchReply {
    pub fn for_request(request: &FetchRequest, result: Result<Vec<u8>, NetworkError>) -> Self {
        Self {
            resource: request.resource,
            generation: request.generation,
            result,
        }
    }
}

pub type ReplySender = mpsc::UnboundedSender<FetchReply>;
pub type ReplyReceiver = mpsc::UnboundedReceiver<FetchReply>;

/// Starts a GET for `request.url` without blocking and eventually sends
/// exactly one reply, unless the request was cancelled first.
pub trait Fetcher {
    fn fetch(&self, request: FetchRequest, reply: ReplySender);
}

/// Overlay map URL for `query` under `api_base`.
pub fn overlay_url(api_base: &str, query: &str, params: &MapParams) -> String {
    format!(
        "{}/query/{}/nii?voxel={}&fwhm={}&kernel={}&r={}",
        api_base.trim_end_matches('/'),
        urlencoding::encode(query),
        params.voxel,
        params.fwhm,
        params.kernel.as_str(),
        params.r,
    )
}

/// Single-result locations lookup for `query`.
pub fn peak_url(api_base: &str, query: &str) -> String {
    format!(
        "{}/query/{}/locations?limit=1",
        api_base.trim_end_matches('/'),
        urlencoding::encode(query),
    )
}

#[derive(Debug, Deserialize)]
struct LocationsResponse {
    #[serde(default)]
    results: Vec<MmCoord>,
}

/// First location of a locations response, if any.
pub fn parse_peak(body: &[u8]) -> Option<MmCoord> {
    let response: LocationsResponse = serde_json::from_slice(body).ok()?;
    response.results.into_iter().next()
}

fn is_remote(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// HTTP fetcher backed by `reqwest`.
///
/// Native builds run each request on its own worker thread with the
/// blocking client and also accept plain file paths. wasm builds use the
/// browser fetch through `spawn_local` and resolve relative paths against
/// the page location.
#[derive(Clone)]
pub struct HttpFetcher {
    #[cfg(not(target_arch = "wasm32"))]
    client: reqwest::blocking::Client,
    #[cfg(target_arch = "wasm32")]
    client: reqwest::Client,
    wake: Option<Arc<dyn Fn() + Send + Sync>>,
}

impl HttpFetcher {
    #[cfg(not(target_arch = "wasm32"))]
    pub fn new() -> Result<Self, NetworkError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .map_err(|e| NetworkError::Client(e.to_string()))?;
        Ok(Self { client, wake: None })
    }

    #[cfg(target_arch = "wasm32")]
    pub fn new() -> Result<Self, NetworkError> {
        Ok(Self {
            client: reqwest::Client::new(),
            wake: None,
        })
    }

    /// Callback run after each reply is sent, e.g. to request a repaint.
    pub fn with_wake(mut self, wake: impl Fn() + Send + Sync + 'static) -> Self {
        self.wake = Some(Arc::new(wake));
        self
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl HttpFetcher {
    fn get(&self, url: &str) -> Result<Vec<u8>, NetworkError> {
        if !is_remote(url) {
            return std::fs::read(url).map_err(|e| NetworkError::File {
                path: url.to_string(),
                message: e.to_string(),
            });
        }
        let request_err = |e: reqwest::Error| NetworkError::Request {
            url: url.to_string(),
            message: e.to_string(),
        };
        let response = self.client.get(url).send().map_err(request_err)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(NetworkError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.bytes().map_err(request_err)?.to_vec())
    }
}

#[cfg(not(target_arch = "wasm32"))]
impl Fetcher for HttpFetcher {
    fn fetch(&self, request: FetchRequest, reply: ReplySender) {
        let fetcher = self.clone();
        std::thread::spawn(move || {
            log::debug!("GET {}", request.url);
            let result = fetcher.get(&request.url);
            if request.cancel.is_cancelled() {
                log::debug!("dropping cancelled {:?} reply", request.resource);
                return;
            }
            if reply.send(FetchReply::for_request(&request, result)).is_ok() {
                if let Some(wake) = &fetcher.wake {
                    wake();
                }
            }
        });
    }
}

#[cfg(target_arch = "wasm32")]
impl HttpFetcher {
    fn resolve(url: &str) -> Result<reqwest::Url, NetworkError> {
        let invalid = |message: String| NetworkError::Request {
            url: url.to_string(),
            message,
        };
        if is_remote(url) {
            return reqwest::Url::parse(url).map_err(|e| invalid(e.to_string()));
        }
        let href = web_sys::window()
            .and_then(|w| w.location().href().ok())
            .ok_or_else(|| invalid("no page location to resolve against".to_string()))?;
        let base = reqwest::Url::parse(&href).map_err(|e| invalid(e.to_string()))?;
        base.join(url).map_err(|e| invalid(e.to_string()))
    }

    async fn get(client: reqwest::Client, url: String) -> Result<Vec<u8>, NetworkError> {
        let resolved = Self::resolve(&url)?;
        let request_err = |e: reqwest::Error| NetworkError::Request {
            url: url.clone(),
            message: e.to_string(),
        };
        let response = client.get(resolved).send().await.map_err(request_err)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NetworkError::Status {
                url: url.clone(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(response.bytes().await.map_err(request_err)?.to_vec())
    }
}

#[cfg(target_arch = "wasm32")]
impl Fetcher for HttpFetcher {
    fn fetch(&self, request: FetchRequest, reply: ReplySender) {
        let client = self.client.clone();
        let wake = self.wake.clone();
        wasm_bindgen_futures::spawn_local(async move {
            let result = Self::get(client, request.url.clone()).await;
            if request.cancel.is_cancelled() {
                return;
            }
            if reply.send(FetchReply::for_request(&request, result)).is_ok() {
                if let Some(wake) = &wake {
                    wake();
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Kernel;

    #[test]
    fn overlay_url_escapes_query() {
        let params = MapParams {
            voxel: 2.0,
            fwhm: 10.0,
            kernel: Kernel::Gauss,
            r: 6.5,
        };
        assert_eq!(
            overlay_url("http://api.test/", "working memory", &params),
            "http://api.test/query/working%20memory/nii?voxel=2&fwhm=10&kernel=gauss&r=6.5"
        );
        assert_eq!(
            overlay_url("http://api.test", "[-22,-4,18]", &MapParams::default()),
            "http://api.test/query/%5B-22%2C-4%2C18%5D/nii?voxel=2&fwhm=10&kernel=gauss&r=6"
        );
    }

    #[test]
    fn peak_url_limits_to_one() {
        assert_eq!(
            peak_url("http://api.test", "pain"),
            "http://api.test/query/pain/locations?limit=1"
        );
    }

    #[test]
    fn parses_first_location() {
        let body = br#"{"results":[{"x":-22,"y":-4,"z":18,"study_id":"s1"},{"x":1,"y":2,"z":3}]}"#;
        assert_eq!(parse_peak(body), Some(MmCoord::new(-22.0, -4.0, 18.0)));
        assert_eq!(parse_peak(br#"{"results":[]}"#), None);
        assert_eq!(parse_peak(br#"{"error":"boom"}"#), None);
        assert_eq!(parse_peak(b"<html>"), None);
    }

    #[test]
    fn cancel_is_shared() {
        let token = CancelToken::new();
        let held = token.clone();
        token.cancel();
        assert!(held.is_cancelled());
    }

    #[test]
    fn only_http_urls_are_remote() {
        assert!(is_remote("https://x/y.nii.gz"));
        assert!(!is_remote("static/mni_2mm.nii.gz"));
    }
}
