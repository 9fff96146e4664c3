use crate::engine::EngineStats;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use warden_core::{Alert, AlertSink, CurateError, Embedding, IdentityDetails, MonitorSession, StoreError};
use zbus::fdo;
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const BUS_NAME: &str = "org.warden.Monitor1";
pub const OBJECT_PATH: &str = "/org/warden/Monitor1";

/// D-Bus interface of the monitoring daemon.
///
/// Bus name: org.warden.Monitor1
/// Object path: /org/warden/Monitor1
///
/// Listings and records are returned as JSON strings. Store access is
/// synchronous, so every call runs on the blocking pool.
pub struct MonitorService {
    session: Arc<MonitorSession>,
    engine: Arc<EngineStats>,
}

impl MonitorService {
    pub fn new(session: Arc<MonitorSession>, engine: Arc<EngineStats>) -> Self {
        Self { session, engine }
    }

    async fn blocking<T, F>(&self, f: F) -> fdo::Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&MonitorSession) -> fdo::Result<T> + Send + 'static,
    {
        let session = Arc::clone(&self.session);
        tokio::task::spawn_blocking(move || f(&session))
            .await
            .map_err(|e| fdo::Error::Failed(format!("worker task failed: {e}")))?
    }
}

#[interface(name = "org.warden.Monitor1")]
impl MonitorService {
    /// Session, gallery and engine counters.
    async fn status(&self) -> fdo::Result<String> {
        let engine = self.engine.snapshot();
        self.blocking(move |session| {
            to_json(&serde_json::json!({
                "version": env!("CARGO_PKG_VERSION"),
                "session": session.status(),
                "engine": engine,
            }))
        })
        .await
    }

    /// Known identities whose name contains `query` (case-insensitive); empty lists all.
    async fn list_known(&self, query: String) -> fdo::Result<String> {
        tracing::debug!(query = %query, "list_known requested");
        self.blocking(move |session| {
            let identities = session.search_identities(&query).map_err(store_error)?;
            to_json(&identities)
        })
        .await
    }

    /// Unknown clusters, newest first.
    async fn list_unknown(&self) -> fdo::Result<String> {
        self.blocking(|session| {
            let clusters = session.list_clusters().map_err(store_error)?;
            to_json(&clusters)
        })
        .await
    }

    /// Promote an unknown cluster to a known identity.
    async fn promote(
        &self,
        cluster_id: i64,
        name: String,
        details: HashMap<String, String>,
    ) -> fdo::Result<String> {
        tracing::info!(cluster = cluster_id, name = %name, "promote requested");
        let details = parse_details(name, details)?;
        self.blocking(move |session| {
            let identity = session.promote(cluster_id, details).map_err(curate_error)?;
            to_json(&identity)
        })
        .await
    }

    /// Enroll an identity from an image file and a precomputed embedding.
    async fn enroll(
        &self,
        name: String,
        details: HashMap<String, String>,
        image_path: String,
        embedding: Vec<f64>,
    ) -> fdo::Result<String> {
        tracing::info!(name = %name, image = %image_path, "enroll requested");
        let details = parse_details(name, details)?;
        let embedding = Embedding::new(embedding.into_iter().map(|v| v as f32).collect());
        let image = PathBuf::from(image_path);
        self.blocking(move |session| {
            let identity = session
                .enroll(details, &image, embedding)
                .map_err(curate_error)?;
            to_json(&identity)
        })
        .await
    }

    async fn edit_known(&self, id: i64, name: String, details: HashMap<String, String>) -> fdo::Result<bool> {
        tracing::info!(identity = id, "edit_known requested");
        let details = parse_details(name, details)?;
        self.blocking(move |session| {
            session.edit_identity(id, details).map_err(curate_error)?;
            Ok(true)
        })
        .await
    }

    async fn remove_known(&self, id: i64) -> fdo::Result<bool> {
        tracing::info!(identity = id, "remove_known requested");
        self.blocking(move |session| {
            session.remove_identity(id).map_err(curate_error)?;
            Ok(true)
        })
        .await
    }

    async fn discard_unknown(&self, id: i64) -> fdo::Result<bool> {
        tracing::info!(cluster = id, "discard_unknown requested");
        self.blocking(move |session| {
            session.discard_cluster(id).map_err(curate_error)?;
            Ok(true)
        })
        .await
    }

    /// Emitted for every alert about an unknown face.
    #[zbus(signal)]
    pub async fn alert_raised(emitter: &SignalEmitter<'_>, label: &str, image_path: &str) -> zbus::Result<()>;
}

/// Forwards alerts from the engine thread to the signal task.
pub struct BusSink {
    tx: mpsc::UnboundedSender<Alert>,
}

impl BusSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Alert>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl AlertSink for BusSink {
    fn send(&self, alert: &Alert) {
        if self.tx.send(alert.clone()).is_err() {
            tracing::debug!(cluster = alert.cluster_id, "alert signal task gone; not broadcasting");
        }
    }
}

/// Emit `AlertRaised` for every alert received until the sink is dropped.
pub async fn broadcast_alerts(conn: zbus::Connection, mut alerts: mpsc::UnboundedReceiver<Alert>) {
    let emitter = match SignalEmitter::new(&conn, OBJECT_PATH) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!(error = %e, "cannot create signal emitter; alerts are log-only");
            return;
        }
    };

    while let Some(alert) = alerts.recv().await {
        let image = alert.image_path.to_string_lossy();
        if let Err(e) = MonitorService::alert_raised(&emitter, &alert.label, &image).await {
            tracing::warn!(error = %e, cluster = alert.cluster_id, "failed to emit AlertRaised");
        }
    }
}

const DETAIL_KEYS: [&str; 5] = ["contact", "age", "gender", "address", "occupation"];

/// Build identity metadata from a name and a `{field: value}` map.
fn parse_details(name: String, mut fields: HashMap<String, String>) -> fdo::Result<IdentityDetails> {
    if let Some(key) = fields.keys().find(|k| !DETAIL_KEYS.contains(&k.as_str())) {
        return Err(fdo::Error::InvalidArgs(format!(
            "unknown detail field {key:?}; expected one of {}",
            DETAIL_KEYS.join(", ")
        )));
    }
    Ok(IdentityDetails {
        name,
        contact: fields.remove("contact"),
        age: fields.remove("age"),
        gender: fields.remove("gender"),
        address: fields.remove("address"),
        occupation: fields.remove("occupation"),
    })
}

fn curate_error(e: CurateError) -> fdo::Error {
    match e {
        CurateError::Validation(msg) => fdo::Error::InvalidArgs(msg),
        e @ CurateError::NotFound { .. } => fdo::Error::UnknownObject(e.to_string()),
        e => {
            tracing::error!(error = %e, "curation failed");
            fdo::Error::Failed(e.to_string())
        }
    }
}

fn store_error(e: StoreError) -> fdo::Error {
    tracing::error!(error = %e, "store read failed");
    match e {
        StoreError::NotFound { .. } => fdo::Error::UnknownObject(e.to_string()),
        other => fdo::Error::Failed(other.to_string()),
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| fdo::Error::Failed(format!("serialization failed: {e}")))
}
