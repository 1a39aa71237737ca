use super::error::ApiError;
use super::transport::{ApiRequest, Transport};
use super::types::Verb;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tokio::sync::OnceCell;

/// What a session has learned about one verb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Supported,
    Unsupported,
}

/// Session-scoped cache of verb support for one resource type.
///
/// Cloning yields another handle to the same record. Nothing is persisted:
/// a new session starts from [`CapabilityRecord::default`], and tests can
/// start from [`CapabilityRecord::seeded`].
///
/// `Supported` is sticky: once any request with a verb succeeded, a later
/// rejection elsewhere does not downgrade it.
#[derive(Debug, Clone, Default)]
pub struct CapabilityRecord {
    inner: Arc<Mutex<RecordState>>,
    /// Set once discovery has finished; concurrent callers wait on it.
    discovery: Arc<OnceCell<()>>,
}

#[derive(Debug, Default)]
struct RecordState {
    verbs: HashMap<Verb, Capability>,
}

impl CapabilityRecord {
    pub fn seeded(entries: impl IntoIterator<Item = (Verb, Capability)>) -> Self {
        let record = Self::default();
        record.lock().verbs.extend(entries);
        record
    }

    fn lock(&self) -> MutexGuard<'_, RecordState> {
        // Every critical section is a plain map operation; recover from poisoning
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, verb: Verb) -> Option<Capability> {
        self.lock().verbs.get(&verb).copied()
    }

    pub fn is_known_unsupported(&self, verb: Verb) -> bool {
        self.get(verb) == Some(Capability::Unsupported)
    }

    pub fn mark_supported(&self, verb: Verb) {
        self.lock().verbs.insert(verb, Capability::Supported);
    }

    /// Records `verb` as unsupported unless it is already known to work.
    pub fn mark_unsupported(&self, verb: Verb) {
        self.lock()
            .verbs
            .entry(verb)
            .or_insert(Capability::Unsupported);
    }

    /// Verbs currently recorded as unsupported.
    pub fn unsupported(&self) -> BTreeSet<Verb> {
        self.lock()
            .verbs
            .iter()
            .filter(|(_, c)| **c == Capability::Unsupported)
            .map(|(v, _)| *v)
            .collect()
    }

    pub fn entries(&self) -> Vec<(Verb, Capability)> {
        let mut entries: Vec<_> = self.lock().verbs.iter().map(|(v, c)| (*v, *c)).collect();
        entries.sort_by_key(|(v, _)| *v);
        entries
    }
}

#[derive(Debug, Error)]
enum ProbeError {
    #[error("no capability information obtainable")]
    Inconclusive,
}

/// Candidate paths exercised by [`CapabilityProber::scan`]; `{id}` is
/// replaced by the probe id.
const SCAN_PATHS: &[&str] = &[
    "",
    "{id}",
    "Edit/{id}",
    "Update",
    "Update/{id}",
    "Edit",
    "UpdateName",
    "UpdateImage",
];

const SCAN_VERBS: &[Verb] = &[Verb::Options, Verb::Get];

/// Outcome of one exploratory request made by [`CapabilityProber::scan`].
#[derive(Debug, Clone)]
pub struct EndpointReport {
    pub verb: Verb,
    pub path: String,
    pub status: Result<u16, String>,
    pub allow: Option<String>,
}

/// Learns which verbs the backend accepts on the category resource.
///
/// Discovery is advisory: it never fails and never issues unsafe verbs.
#[derive(Debug, Clone)]
pub struct CapabilityProber {
    transport: Transport,
    resource: String,
    probe_id: i64,
}

impl CapabilityProber {
    pub fn new(transport: Transport, resource: impl Into<String>, probe_id: i64) -> Self {
        Self {
            transport,
            resource: resource.into(),
            probe_id,
        }
    }

    fn item_segments(&self) -> Vec<String> {
        vec![self.resource.clone(), self.probe_id.to_string()]
    }

    /// Determine the verbs accepted on a representative item path.
    ///
    /// Sends `OPTIONS` and parses the `Allow` header. Without a usable
    /// header it falls back to a `GET`, where success or 404 both count as
    /// GET support. Verbs found are marked supported in `record`; absent
    /// verbs are left unknown.
    ///
    /// Returns an empty set when nothing could be learned.
    pub async fn discover(&self, record: &CapabilityRecord) -> BTreeSet<Verb> {
        let verbs = match self.try_discover().await {
            Ok(verbs) => verbs,
            Err(e) => {
                tracing::warn!(
                    resource = %self.resource,
                    error = %e,
                    "Capability discovery inconclusive, all strategies stay eligible"
                );
                BTreeSet::new()
            }
        };

        for verb in &verbs {
            record.mark_supported(*verb);
        }
        verbs
    }

    /// Runs [`discover`](Self::discover) only the first time it is called for `record`.
    ///
    /// Callers arriving while discovery is in flight wait for it to finish,
    /// so every caller returns with the discovered verbs already recorded.
    pub async fn ensure_discovered(&self, record: &CapabilityRecord) {
        record
            .discovery
            .get_or_init(|| async {
                let verbs = self.discover(record).await;
                tracing::info!(
                    resource = %self.resource,
                    verbs = ?verbs,
                    "Capability discovery complete"
                );
            })
            .await;
    }

    async fn try_discover(&self) -> Result<BTreeSet<Verb>, ProbeError> {
        let options = ApiRequest::new(Verb::Options, self.item_segments());
        match self.transport.execute(&options).await {
            Ok(response) => {
                if let Some(allow) = response.allow.as_deref() {
                    let verbs = parse_allow_header(allow);
                    tracing::debug!(allow = %allow, verbs = ?verbs, "Allow header received");
                    if !verbs.is_empty() {
                        return Ok(verbs);
                    }
                } else {
                    tracing::debug!(
                        status = response.status,
                        "OPTIONS response carried no Allow header, probing GET"
                    );
                }
            }
            Err(e) => log_absorbed(&options, &e),
        }

        let get = ApiRequest::new(Verb::Get, self.item_segments());
        match self.transport.execute(&get).await {
            // 404 still proves the route answers GET
            Ok(response) if response.is_success() || response.status == 404 => {
                Ok(BTreeSet::from([Verb::Get]))
            }
            Ok(response) => {
                tracing::debug!(status = response.status, "GET probe rejected");
                Err(ProbeError::Inconclusive)
            }
            Err(e) => {
                log_absorbed(&get, &e);
                Err(ProbeError::Inconclusive)
            }
        }
    }

    /// Exploratory scan of the known candidate paths with safe verbs only.
    ///
    /// Diagnostic output for operators; the record is not touched.
    pub async fn scan(&self) -> Vec<EndpointReport> {
        let mut reports = Vec::with_capacity(SCAN_PATHS.len() * SCAN_VERBS.len());

        for template in SCAN_PATHS {
            let mut segments = vec![self.resource.clone()];
            segments.extend(
                template
                    .split('/')
                    .filter(|s| !s.is_empty())
                    .map(|s| s.replace("{id}", &self.probe_id.to_string())),
            );

            for verb in SCAN_VERBS {
                let request = ApiRequest::new(*verb, segments.clone());
                let (status, allow) = match self.transport.execute(&request).await {
                    Ok(response) => (Ok(response.status), response.allow),
                    Err(e) => (Err(e.to_string()), None),
                };
                reports.push(EndpointReport {
                    verb: *verb,
                    path: format!("/{}", segments.join("/")),
                    status,
                    allow,
                });
            }
        }

        tracing::info!(probes = reports.len(), "Endpoint scan complete");
        reports
    }
}

fn log_absorbed(request: &ApiRequest, error: &ApiError) {
    tracing::debug!(
        request = %request.describe(),
        transport = error.is_transport(),
        error = %error,
        "Discovery request failed"
    );
}

/// Parse an `Allow` header value into verbs, ignoring unknown tokens.
pub fn parse_allow_header(value: &str) -> BTreeSet<Verb> {
    value
        .split(',')
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .filter_map(|token| match token.parse::<Verb>() {
            Ok(verb) => Some(verb),
            Err(e) => {
                tracing::debug!(token = %token, error = %e, "Ignoring Allow header token");
                None
            }
        })
        .collect()
}
