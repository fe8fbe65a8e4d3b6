use std::io::{BufRead, BufReader};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::{
    AisleDoc, ProductDoc, RemoteAisle, RemoteDirectory, RemoteError, RemoteProduct, SnapshotFeed,
    StoreDoc, WatchCanceller,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const WATCH_READ_TIMEOUT: Duration = Duration::from_secs(30);
const WATCH_RETRY_DELAY: Duration = Duration::from_secs(2);

/// REST-backed directory. Collections live under
/// `/v1/stores/{id}/aisles|products`; the watch endpoints stream NDJSON
/// where every line is a full snapshot of the collection.
pub struct HttpDirectory {
    agent: ureq::Agent,
    watch_agent: ureq::Agent,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CreatedResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct LookupResponse {
    #[serde(default)]
    id: Option<String>,
}

impl HttpDirectory {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build();
        // Watch reads block for long stretches; bound them separately so a
        // cancelled watcher still wakes up to exit.
        let watch_agent = ureq::AgentBuilder::new()
            .timeout_connect(REQUEST_TIMEOUT)
            .timeout_read(WATCH_READ_TIMEOUT)
            .build();
        Self {
            agent,
            watch_agent,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn apply_headers(&self, request: ureq::Request, actor: Option<&str>) -> ureq::Request {
        let request = match &self.api_key {
            Some(key) => request.set("authorization", &format!("Bearer {}", key)),
            None => request,
        };
        match actor {
            Some(actor) => request.set("x-actor-id", actor),
            None => request,
        }
    }

    fn send_json<T: DeserializeOwned>(
        &self,
        request: ureq::Request,
        body: &impl serde::Serialize,
    ) -> Result<T, RemoteError> {
        let response = request.send_json(body).map_err(map_ureq_error)?;
        response
            .into_json()
            .map_err(|err| RemoteError::Malformed(err.to_string()))
    }

    fn get_json<T: DeserializeOwned>(&self, request: ureq::Request) -> Result<T, RemoteError> {
        let response = request.call().map_err(map_ureq_error)?;
        response
            .into_json()
            .map_err(|err| RemoteError::Malformed(err.to_string()))
    }

    fn spawn_watch<T>(&self, path: String) -> SnapshotFeed<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let (sender, receiver) = mpsc::channel::<T>();
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let agent = self.watch_agent.clone();
        let url = self.url(&path);
        let api_key = self.api_key.clone();

        thread::spawn(move || {
            while !flag.load(Ordering::SeqCst) {
                let request = match &api_key {
                    Some(key) => agent.get(&url).set("authorization", &format!("Bearer {}", key)),
                    None => agent.get(&url),
                };
                let response = match request.call() {
                    Ok(response) => response,
                    Err(err) => {
                        if flag.load(Ordering::SeqCst) {
                            break;
                        }
                        log::warn!("watch connect to {} failed: {}", url, err);
                        thread::sleep(WATCH_RETRY_DELAY);
                        continue;
                    }
                };

                let reader = BufReader::new(response.into_reader());
                for line in reader.lines() {
                    if flag.load(Ordering::SeqCst) {
                        return;
                    }
                    let line = match line {
                        Ok(line) => line,
                        Err(err) => {
                            log::warn!("watch stream {} read failed: {}", url, err);
                            break;
                        }
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    let snapshot: T = match serde_json::from_str(&line) {
                        Ok(snapshot) => snapshot,
                        Err(err) => {
                            log::warn!("watch stream {} sent malformed snapshot: {}", url, err);
                            continue;
                        }
                    };
                    if sender.send(snapshot).is_err() {
                        return;
                    }
                }
                // Stream ended or errored; the server re-sends full state on
                // reconnect, so the feed self-heals.
                thread::sleep(WATCH_RETRY_DELAY);
            }
        });

        SnapshotFeed {
            receiver,
            canceller: WatchCanceller::new(move || {
                cancelled.store(true, Ordering::SeqCst);
            }),
        }
    }
}

impl RemoteDirectory for HttpDirectory {
    fn find_store(
        &self,
        normalized_name: &str,
        geo_cell: Option<&str>,
    ) -> Result<Option<String>, RemoteError> {
        let mut request = self
            .apply_headers(self.agent.get(&self.url("/v1/stores/lookup")), None)
            .query("normalizedName", normalized_name);
        if let Some(cell) = geo_cell {
            request = request.query("geoCell", cell);
        }
        match request.call() {
            Ok(response) => {
                let lookup: LookupResponse = response
                    .into_json()
                    .map_err(|err| RemoteError::Malformed(err.to_string()))?;
                Ok(lookup.id)
            }
            Err(ureq::Error::Status(404, _)) => Ok(None),
            Err(err) => Err(map_ureq_error(err)),
        }
    }

    fn create_store(&self, actor: &str, doc: &StoreDoc) -> Result<String, RemoteError> {
        let request = self.apply_headers(self.agent.post(&self.url("/v1/stores")), Some(actor));
        let created: CreatedResponse = self.send_json(request, doc)?;
        Ok(created.id)
    }

    fn update_store(
        &self,
        actor: &str,
        remote_id: &str,
        doc: &StoreDoc,
    ) -> Result<(), RemoteError> {
        let path = format!("/v1/stores/{}", remote_id);
        let request = self.apply_headers(self.agent.request("PATCH", &self.url(&path)), Some(actor));
        request.send_json(doc).map_err(map_ureq_error)?;
        Ok(())
    }

    fn delete_store(&self, actor: &str, remote_id: &str) -> Result<(), RemoteError> {
        let path = format!("/v1/stores/{}", remote_id);
        let request = self.apply_headers(self.agent.delete(&self.url(&path)), Some(actor));
        request.call().map_err(map_ureq_error)?;
        Ok(())
    }

    fn create_aisle(&self, actor: &str, doc: &AisleDoc) -> Result<String, RemoteError> {
        let path = format!("/v1/stores/{}/aisles", doc.store_remote_id);
        let request = self.apply_headers(self.agent.post(&self.url(&path)), Some(actor));
        let created: CreatedResponse = self.send_json(request, doc)?;
        Ok(created.id)
    }

    fn update_aisle(
        &self,
        actor: &str,
        remote_id: &str,
        doc: &AisleDoc,
    ) -> Result<(), RemoteError> {
        let path = format!("/v1/stores/{}/aisles/{}", doc.store_remote_id, remote_id);
        let request = self.apply_headers(self.agent.request("PATCH", &self.url(&path)), Some(actor));
        request.send_json(doc).map_err(map_ureq_error)?;
        Ok(())
    }

    fn delete_aisle(
        &self,
        actor: &str,
        store_remote_id: &str,
        remote_id: &str,
    ) -> Result<(), RemoteError> {
        let path = format!("/v1/stores/{}/aisles/{}", store_remote_id, remote_id);
        let request = self.apply_headers(self.agent.delete(&self.url(&path)), Some(actor));
        request.call().map_err(map_ureq_error)?;
        Ok(())
    }

    fn fetch_aisles(&self, store_remote_id: &str) -> Result<Vec<RemoteAisle>, RemoteError> {
        let path = format!("/v1/stores/{}/aisles", store_remote_id);
        let request = self.apply_headers(self.agent.get(&self.url(&path)), None);
        self.get_json(request)
    }

    fn watch_aisles(
        &self,
        store_remote_id: &str,
    ) -> Result<SnapshotFeed<Vec<RemoteAisle>>, RemoteError> {
        Ok(self.spawn_watch(format!("/v1/stores/{}/aisles/watch", store_remote_id)))
    }

    fn upsert_product(
        &self,
        actor: &str,
        doc_id: &str,
        doc: &ProductDoc,
    ) -> Result<(), RemoteError> {
        // PUT with merge semantics: repeated pushes of the same normalized
        // name land on the same content-derived document id.
        let path = format!("/v1/stores/{}/products/{}", doc.store_remote_id, doc_id);
        let request = self.apply_headers(self.agent.put(&self.url(&path)), Some(actor));
        request.send_json(doc).map_err(map_ureq_error)?;
        Ok(())
    }

    fn delete_product(
        &self,
        actor: &str,
        store_remote_id: &str,
        doc_id: &str,
    ) -> Result<(), RemoteError> {
        let path = format!("/v1/stores/{}/products/{}", store_remote_id, doc_id);
        let request = self.apply_headers(self.agent.delete(&self.url(&path)), Some(actor));
        request.call().map_err(map_ureq_error)?;
        Ok(())
    }

    fn fetch_products(&self, store_remote_id: &str) -> Result<Vec<RemoteProduct>, RemoteError> {
        let path = format!("/v1/stores/{}/products", store_remote_id);
        let request = self.apply_headers(self.agent.get(&self.url(&path)), None);
        self.get_json(request)
    }

    fn watch_products(
        &self,
        store_remote_id: &str,
    ) -> Result<SnapshotFeed<Vec<RemoteProduct>>, RemoteError> {
        Ok(self.spawn_watch(format!("/v1/stores/{}/products/watch", store_remote_id)))
    }
}

fn map_ureq_error(err: ureq::Error) -> RemoteError {
    match err {
        ureq::Error::Status(status, response) => {
            let message = response
                .into_string()
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            RemoteError::Status { status, message }
        }
        ureq::Error::Transport(transport) => RemoteError::Transport(transport.to_string()),
    }
}
