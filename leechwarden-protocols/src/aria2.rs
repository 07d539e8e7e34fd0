//! ## leechwarden-protocols::aria2
//! JSON-RPC 2.0 client for the aria2 download manager.
//!
//! aria2 encodes every number as a decimal string and most booleans as
//! `"true"`/`"false"`; the deserializers below accept both the string and the
//! bare JSON form.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::de::{self, DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use leechwarden_core::TrafficSample;

const REQUEST_ID: &str = "leechwarden";

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("RPC error: {message} (code: {code})")]
    Remote { code: i64, message: String },

    #[error("RPC response carried neither result nor error")]
    EmptyResponse,

    #[error("Failed to decode RPC result: {0}")]
    Decode(#[from] serde_json::Error),
}

#[derive(Debug, Serialize)]
struct RpcRequest<'a> {
    jsonrpc: &'static str,
    id: &'static str,
    method: &'a str,
    params: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RemoteError>,
}

#[derive(Debug, Deserialize)]
struct RemoteError {
    code: i64,
    message: String,
}

/// One entry of `aria2.tellActive`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadStatus {
    pub gid: String,
    pub status: String,
    #[serde(default, deserialize_with = "string_u64")]
    pub total_length: u64,
    #[serde(default, deserialize_with = "string_u64")]
    pub completed_length: u64,
    #[serde(default, deserialize_with = "string_u64")]
    pub upload_length: u64,
    #[serde(default, deserialize_with = "string_u64")]
    pub download_speed: u64,
    #[serde(default, deserialize_with = "string_u64")]
    pub upload_speed: u64,
    #[serde(default)]
    pub info_hash: String,
    #[serde(default)]
    pub dir: String,
}

impl DownloadStatus {
    /// Active BitTorrent download; only these have peers worth asking for.
    pub fn is_active_torrent(&self) -> bool {
        self.status == "active" && !self.info_hash.is_empty()
    }
}

/// One entry of `aria2.getPeers`. Speeds are from our side of the connection.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Peer {
    /// Percent-encoded 20-byte peer ID.
    #[serde(default)]
    pub peer_id: String,
    pub ip: String,
    #[serde(default, deserialize_with = "string_u16")]
    pub port: u16,
    #[serde(default)]
    pub bitfield: String,
    #[serde(default, deserialize_with = "string_bool")]
    pub am_choking: bool,
    #[serde(default, deserialize_with = "string_bool")]
    pub peer_choking: bool,
    /// What we receive from the peer.
    #[serde(default, deserialize_with = "string_u64")]
    pub download_speed: u64,
    /// What we send to the peer.
    #[serde(default, deserialize_with = "string_u64")]
    pub upload_speed: u64,
    #[serde(default, deserialize_with = "string_bool")]
    pub seeder: bool,
}

impl Peer {
    pub fn traffic_sample(&self) -> TrafficSample {
        TrafficSample::from_client_rates(self.ip.clone(), self.download_speed, self.upload_speed)
    }
}

#[derive(Debug, Clone)]
pub struct Aria2Client {
    http: reqwest::Client,
    endpoint: String,
    secret: Option<String>,
}

impl Aria2Client {
    /// `endpoint` is the full RPC URL, e.g. `http://127.0.0.1:6800/jsonrpc`.
    /// An empty `secret` disables the `token:` parameter.
    pub fn new(endpoint: impl Into<String>, secret: &str, timeout: Duration) -> Result<Self, RpcError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            secret: (!secret.is_empty()).then(|| secret.to_string()),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, mut params: Vec<Value>) -> Result<T, RpcError> {
        if let Some(secret) = &self.secret {
            params.insert(0, Value::String(format!("token:{secret}")));
        }
        let request = RpcRequest {
            jsonrpc: "2.0",
            id: REQUEST_ID,
            method,
            params,
        };

        // aria2 answers errors with a non-2xx status and a JSON-RPC error body,
        // so the body is decoded regardless of the status code.
        let response: RpcResponse = self
            .http
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(RpcError::Remote {
                code: error.code,
                message: error.message,
            });
        }
        let result = response.result.ok_or(RpcError::EmptyResponse)?;
        Ok(serde_json::from_value(result)?)
    }

    pub async fn tell_active(&self) -> Result<Vec<DownloadStatus>, RpcError> {
        self.call("aria2.tellActive", Vec::new()).await
    }

    pub async fn get_peers(&self, gid: &str) -> Result<Vec<Peer>, RpcError> {
        self.call("aria2.getPeers", vec![Value::String(gid.to_string())])
            .await
    }

    /// Peers of every active torrent, keyed by GID. A download whose peer
    /// lookup fails is logged and left out.
    #[instrument(skip(self), fields(endpoint = %self.endpoint))]
    pub async fn all_peers(&self) -> Result<BTreeMap<String, Vec<Peer>>, RpcError> {
        let downloads = self.tell_active().await?;
        let mut peers = BTreeMap::new();
        for download in downloads.iter().filter(|d| d.is_active_torrent()) {
            match self.get_peers(&download.gid).await {
                Ok(found) => {
                    debug!("Download {} has {} peers", download.gid, found.len());
                    peers.insert(download.gid.clone(), found);
                }
                Err(e) => warn!("Failed to get peers for download {}: {}", download.gid, e),
            }
        }
        Ok(peers)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOr<T> {
    Str(String),
    Bare(T),
}

fn string_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    match StringOr::<u64>::deserialize(deserializer)? {
        StringOr::Str(s) => s.trim().parse().map_err(de::Error::custom),
        StringOr::Bare(n) => Ok(n),
    }
}

fn string_u16<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u16, D::Error> {
    match StringOr::<u16>::deserialize(deserializer)? {
        StringOr::Str(s) => s.trim().parse().map_err(de::Error::custom),
        StringOr::Bare(n) => Ok(n),
    }
}

fn string_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    match StringOr::<bool>::deserialize(deserializer)? {
        StringOr::Str(s) => match s.trim() {
            "true" => Ok(true),
            "false" => Ok(false),
            other => Err(de::Error::custom(format!("invalid boolean string {other:?}"))),
        },
        StringOr::Bare(b) => Ok(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use axum::{extract::State, routing::post, Json, Router};
    use serde_json::json;
    use tokio::sync::Mutex;

    #[test]
    fn decodes_string_encoded_peer() {
        let peer: Peer = serde_json::from_value(json!({
            "peerId": "%2DqB5120%2DME_GpvJS-s49",
            "ip": "192.0.2.5",
            "port": "51413",
            "bitfield": "ffff",
            "amChoking": "true",
            "peerChoking": false,
            "downloadSpeed": "0",
            "uploadSpeed": "131072",
            "seeder": "false"
        }))
        .unwrap();

        assert_eq!(peer.port, 51413);
        assert!(peer.am_choking);
        assert!(!peer.peer_choking);
        assert_eq!(peer.upload_speed, 131_072);

        let sample = peer.traffic_sample();
        assert_eq!(sample.inbound_rate, 0);
        assert_eq!(sample.outbound_rate, 131_072);
    }

    #[test]
    fn rejects_garbage_numbers() {
        let result: Result<Peer, _> = serde_json::from_value(json!({
            "ip": "192.0.2.5",
            "downloadSpeed": "fast"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn only_active_torrents_are_polled() {
        let status: DownloadStatus = serde_json::from_value(json!({
            "gid": "2089b05ecca3d829",
            "status": "active",
            "totalLength": "34896138",
            "completedLength": "34896138",
            "uploadLength": "0",
            "downloadSpeed": "0",
            "uploadSpeed": "0",
            "dir": "/downloads"
        }))
        .unwrap();
        assert_eq!(status.total_length, 34_896_138);
        assert!(!status.is_active_torrent());
    }

    type Seen = Arc<Mutex<Vec<Value>>>;

    async fn rpc(State(seen): State<Seen>, Json(request): Json<Value>) -> Json<Value> {
        seen.lock().await.push(request.clone());
        let method = request["method"].as_str().unwrap_or_default();
        let params = request["params"].as_array().cloned().unwrap_or_default();
        let gid = params.last().and_then(Value::as_str).unwrap_or_default();
        let body = match method {
            "aria2.tellActive" => json!({"jsonrpc": "2.0", "id": "leechwarden", "result": [
                {"gid": "a1", "status": "active", "infoHash": "abcd"},
                {"gid": "b2", "status": "active", "infoHash": "ef01"},
                {"gid": "c3", "status": "active", "infoHash": ""},
                {"gid": "d4", "status": "paused", "infoHash": "2345"}
            ]}),
            "aria2.getPeers" if gid == "a1" => json!({"jsonrpc": "2.0", "id": "leechwarden", "result": [
                {"peerId": "-TR2940-xxxxxxxxxxxx", "ip": "198.51.100.7", "port": "6881",
                 "downloadSpeed": "10", "uploadSpeed": "2000", "seeder": "false"}
            ]}),
            _ => json!({"jsonrpc": "2.0", "id": "leechwarden",
                        "error": {"code": 1, "message": format!("GID {gid} is not found")}}),
        };
        Json(body)
    }

    async fn mock_aria2() -> (String, Seen) {
        let seen: Seen = Arc::default();
        let app = Router::new().route("/jsonrpc", post(rpc)).with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/jsonrpc"), seen)
    }

    #[tokio::test]
    async fn all_peers_skips_failing_downloads() {
        let (endpoint, seen) = mock_aria2().await;
        let client = Aria2Client::new(endpoint, "s3cret", Duration::from_secs(5)).unwrap();

        let peers = client.all_peers().await.unwrap();
        assert_eq!(peers.len(), 1);
        assert_eq!(peers["a1"][0].ip, "198.51.100.7");

        let requests = seen.lock().await;
        // tellActive plus getPeers for a1 and b2 only.
        assert_eq!(requests.len(), 3);
        assert_eq!(requests[0]["id"], "leechwarden");
        assert_eq!(requests[0]["params"], json!(["token:s3cret"]));
        assert_eq!(requests[1]["params"], json!(["token:s3cret", "a1"]));
    }

    #[tokio::test]
    async fn remote_errors_surface() {
        let (endpoint, seen) = mock_aria2().await;
        let client = Aria2Client::new(endpoint, "", Duration::from_secs(5)).unwrap();

        let err = client.get_peers("zz").await.unwrap_err();
        assert!(matches!(err, RpcError::Remote { code: 1, .. }));
        assert_eq!(seen.lock().await[0]["params"], json!(["zz"]));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_http_error() {
        let client =
            Aria2Client::new("http://127.0.0.1:1/jsonrpc", "", Duration::from_secs(2)).unwrap();
        assert!(matches!(client.tell_active().await, Err(RpcError::Http(_))));
    }
}
