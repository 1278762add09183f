//! Connection pool and streaming query client for the OLAP warehouse (C2).
//!
//! The warehouse is addressed over its HTTP interface rather than a raw
//! wire protocol: queries are POSTed as plain SQL with
//! `SETTINGS max_execution_time=N` appended and `FORMAT JSONEachRow`,
//! which turns the response body into a newline-delimited JSON stream we
//! can consume without buffering the whole result set.
//!
//! [`WarehousePool`] hands out [`WarehouseClient`] handles round-robin
//! across a fixed set of upstream URLs, mirroring the round-robin
//! `acquire`/`release` shape of a conventional connection pool even though
//! each "connection" here is just a `reqwest::Client` pointed at one
//! upstream — HTTP/1.1 keep-alive and connection reuse are handled by
//! `reqwest` itself underneath.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use futures::{Stream, StreamExt};
use gateway_error::{GatewayError, Result};
use tracing::{debug, warn};

/// Configuration for a [`WarehousePool`].
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Base URLs of the warehouse's HTTP interface, one per pooled client.
    pub urls: Vec<String>,
    /// Minimum number of pooled clients to keep warm.
    pub min_connections: usize,
    /// Maximum number of pooled clients.
    pub max_connections: usize,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Idle connection timeout before `reqwest` closes the underlying socket.
    pub idle_timeout: Duration,
    /// Whether to request gzip-compressed responses.
    pub compression: bool,
    /// Optional basic-auth username.
    pub username: Option<String>,
    /// Optional basic-auth password.
    pub password: Option<String>,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            urls: vec!["http://localhost:8123".to_owned()],
            min_connections: 20,
            max_connections: 200,
            connect_timeout: Duration::from_secs(5),
            idle_timeout: Duration::from_secs(60),
            compression: true,
            username: None,
            password: None,
        }
    }
}

/// Execution-time tier chosen from a query's complexity score.
///
/// Three timeout tiers: cheap queries get a tight deadline so a runaway
/// scan fails fast, expensive-but-admitted queries get up to 90s.
#[must_use]
pub fn timeout_for_score(score: f64) -> Duration {
    if score < 100.0 {
        Duration::from_secs(10)
    } else if score < 500.0 {
        Duration::from_secs(30)
    } else {
        Duration::from_secs(90)
    }
}

/// A single HTTP handle to one warehouse node.
pub struct WarehouseClient {
    http: reqwest::Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
}

impl WarehouseClient {
    fn new(base_url: String, config: &WarehouseConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(config.idle_timeout);
        if config.compression {
            builder = builder.gzip(true);
        }
        let http = builder.build().map_err(|e| GatewayError::Internal {
            message: format!("failed to build warehouse HTTP client: {e}"),
        })?;
        Ok(Self { http, base_url, username: config.username.clone(), password: config.password.clone() })
    }

    fn request(&self, sql_with_settings: String) -> reqwest::RequestBuilder {
        let req = self.http.post(&self.base_url).body(sql_with_settings);
        match (&self.username, &self.password) {
            (Some(u), p) => req.basic_auth(u, p.clone()),
            _ => req,
        }
    }

    fn request_with_params(&self, sql_with_settings: String, params: &[(String, serde_json::Value)]) -> reqwest::RequestBuilder {
        let pairs: Vec<(String, String)> =
            params.iter().map(|(name, value)| (format!("param_{name}"), render_named_param(value))).collect();
        self.request(sql_with_settings).query(&pairs)
    }

    /// Execute `sql` and buffer the entire response, parsing it as
    /// newline-delimited JSON rows.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::QueryExecutionError`] on a non-success HTTP
    /// status, a transport failure, or malformed JSON in any row. Timeouts
    /// are reported with `timed_out: true`.
    pub async fn query(&self, sql: &str, score: f64) -> Result<Vec<serde_json::Value>> {
        self.query_with_timeout(sql, timeout_for_score(score)).await
    }

    /// Execute `sql` under an explicit `timeout` rather than one derived
    /// from a complexity score.
    ///
    /// Used by the complexity estimator's 1s count probe (spec §4.6 step
    /// 2) and the export engine's 600s chunk queries (spec §5), neither of
    /// which maps onto the three score-derived timeout tiers.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::QueryExecutionError`] on a non-success HTTP
    /// status, a transport failure, or malformed JSON in any row. Timeouts
    /// are reported with `timed_out: true`.
    pub async fn query_with_timeout(&self, sql: &str, timeout: Duration) -> Result<Vec<serde_json::Value>> {
        let statement = with_execution_settings(sql, timeout);
        debug!(timeout_secs = timeout.as_secs(), "submitting warehouse query");

        let response = self
            .request(statement)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| execution_error_from_reqwest(&e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::QueryExecutionError {
                message: format!("warehouse returned {status}: {body}"),
                timed_out: false,
            });
        }

        let body = response.text().await.map_err(|e| execution_error_from_reqwest(&e))?;
        body.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| GatewayError::QueryExecutionError {
                    message: format!("malformed row from warehouse: {e}"),
                    timed_out: false,
                })
            })
            .collect()
    }

    /// Execute `sql` with its named parameters bound via ClickHouse's HTTP
    /// query-string convention (`param_<name>=<value>`), under the timeout
    /// tier derived from `score`.
    ///
    /// This is the path the query compiler's output actually takes to the
    /// warehouse: [`gateway_error`]-facing callers never inline a bound
    /// value into `sql` themselves (spec §6: "Inlining user data into SQL
    /// text is forbidden") — they hand the compiled `{name:Type}`
    /// placeholders and their values here, and the warehouse binds them.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`WarehouseClient::query`].
    pub async fn query_with_params(
        &self,
        sql: &str,
        params: &[(String, serde_json::Value)],
        score: f64,
    ) -> Result<Vec<serde_json::Value>> {
        self.query_with_params_and_timeout(sql, params, timeout_for_score(score)).await
    }

    /// Execute `sql` with bound named parameters under an explicit
    /// `timeout` rather than one derived from a complexity score.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`WarehouseClient::query_with_timeout`].
    pub async fn query_with_params_and_timeout(
        &self,
        sql: &str,
        params: &[(String, serde_json::Value)],
        timeout: Duration,
    ) -> Result<Vec<serde_json::Value>> {
        let statement = with_execution_settings(sql, timeout);
        debug!(timeout_secs = timeout.as_secs(), param_count = params.len(), "submitting parameterized warehouse query");

        let response = self
            .request_with_params(statement, params)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| execution_error_from_reqwest(&e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::QueryExecutionError {
                message: format!("warehouse returned {status}: {body}"),
                timed_out: false,
            });
        }

        let body = response.text().await.map_err(|e| execution_error_from_reqwest(&e))?;
        body.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| GatewayError::QueryExecutionError {
                    message: format!("malformed row from warehouse: {e}"),
                    timed_out: false,
                })
            })
            .collect()
    }

    /// Stream `sql` with bound named parameters under an explicit
    /// `timeout`, one newline-delimited JSON row at a time. Used by the
    /// export engine's chunked streaming, where the compiled query always
    /// carries bound parameters.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`WarehouseClient::query_stream_with_timeout`].
    pub async fn query_stream_with_params_and_timeout(
        &self,
        sql: &str,
        params: &[(String, serde_json::Value)],
        timeout: Duration,
    ) -> Result<impl Stream<Item = Result<serde_json::Value>> + Send> {
        let statement = with_execution_settings(sql, timeout);
        debug!(timeout_secs = timeout.as_secs(), param_count = params.len(), "submitting parameterized streaming warehouse query");

        let response = self
            .request_with_params(statement, params)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| execution_error_from_reqwest(&e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::QueryExecutionError {
                message: format!("warehouse returned {status}: {body}"),
                timed_out: false,
            });
        }

        let byte_stream = response.bytes_stream();
        let state = (byte_stream.boxed(), BytesMut::new(), false);

        Ok(futures::stream::unfold(state, |(mut stream, mut buf, mut done)| async move {
            loop {
                if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    let line = buf.split_to(pos);
                    buf.advance(1);
                    if line.is_empty() {
                        continue;
                    }
                    let parsed = std::str::from_utf8(&line)
                        .map_err(|e| GatewayError::QueryExecutionError {
                            message: format!("non-UTF8 row from warehouse: {e}"),
                            timed_out: false,
                        })
                        .and_then(|text| {
                            serde_json::from_str(text).map_err(|e| GatewayError::QueryExecutionError {
                                message: format!("malformed row from warehouse: {e}"),
                                timed_out: false,
                            })
                        });
                    return Some((parsed, (stream, buf, done)));
                }

                if done {
                    if buf.is_empty() {
                        return None;
                    }
                    let line = std::mem::take(&mut buf);
                    let parsed = serde_json::from_slice(&line).map_err(|e| GatewayError::QueryExecutionError {
                        message: format!("malformed trailing row from warehouse: {e}"),
                        timed_out: false,
                    });
                    return Some((parsed, (stream, buf, done)));
                }

                match stream.next().await {
                    Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        return Some((
                            Err(GatewayError::QueryExecutionError {
                                message: format!("stream read error: {e}"),
                                timed_out: e.is_timeout(),
                            }),
                            (stream, buf, done),
                        ))
                    }
                    None => done = true,
                }
            }
        }))
    }

    /// Execute `sql` and return a stream of rows, parsed one
    /// newline-delimited JSON object at a time without buffering the full
    /// result set in memory. Used for export chunking, where result sets
    /// can run into the millions of rows.
    ///
    /// # Errors
    ///
    /// The outer `Result` fails the same way as [`WarehouseClient::query`].
    /// Once streaming begins, a malformed row surfaces as an `Err` item in
    /// the stream rather than terminating the whole call early.
    pub async fn query_stream(
        &self,
        sql: &str,
        score: f64,
    ) -> Result<impl Stream<Item = Result<serde_json::Value>> + Send> {
        self.query_stream_with_timeout(sql, timeout_for_score(score)).await
    }

    /// Stream `sql` under an explicit `timeout` rather than one derived
    /// from a complexity score. Used by the export engine's 600s-per-chunk
    /// deadline (spec §5).
    ///
    /// # Errors
    ///
    /// Same as [`WarehouseClient::query_stream`].
    pub async fn query_stream_with_timeout(
        &self,
        sql: &str,
        timeout: Duration,
    ) -> Result<impl Stream<Item = Result<serde_json::Value>> + Send> {
        let statement = with_execution_settings(sql, timeout);
        debug!(timeout_secs = timeout.as_secs(), "submitting streaming warehouse query");

        let response = self
            .request(statement)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| execution_error_from_reqwest(&e))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::QueryExecutionError {
                message: format!("warehouse returned {status}: {body}"),
                timed_out: false,
            });
        }

        // ClickHouse's JSONEachRow format emits one JSON object per line; we
        // buffer only up to the next newline rather than the whole body, so
        // a multi-million-row export never holds the full result in memory.
        let byte_stream = response.bytes_stream();
        let state = (byte_stream.boxed(), BytesMut::new(), false);

        Ok(futures::stream::unfold(state, |(mut stream, mut buf, mut done)| async move {
            loop {
                if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
                    let line = buf.split_to(pos);
                    buf.advance(1);
                    if line.is_empty() {
                        continue;
                    }
                    let parsed = std::str::from_utf8(&line)
                        .map_err(|e| GatewayError::QueryExecutionError {
                            message: format!("non-UTF8 row from warehouse: {e}"),
                            timed_out: false,
                        })
                        .and_then(|text| {
                            serde_json::from_str(text).map_err(|e| GatewayError::QueryExecutionError {
                                message: format!("malformed row from warehouse: {e}"),
                                timed_out: false,
                            })
                        });
                    return Some((parsed, (stream, buf, done)));
                }

                if done {
                    if buf.is_empty() {
                        return None;
                    }
                    let line = std::mem::take(&mut buf);
                    let parsed = serde_json::from_slice(&line).map_err(|e| GatewayError::QueryExecutionError {
                        message: format!("malformed trailing row from warehouse: {e}"),
                        timed_out: false,
                    });
                    return Some((parsed, (stream, buf, done)));
                }

                match stream.next().await {
                    Some(Ok(chunk)) => buf.extend_from_slice(&chunk),
                    Some(Err(e)) => {
                        return Some((
                            Err(GatewayError::QueryExecutionError {
                                message: format!("stream read error: {e}"),
                                timed_out: e.is_timeout(),
                            }),
                            (stream, buf, done),
                        ))
                    }
                    None => done = true,
                }
            }
        }))
    }

    /// A cheap `SELECT 1` used by pool and gateway health checks.
    ///
    /// # Errors
    ///
    /// Returns an error if the warehouse does not respond successfully.
    pub async fn ping(&self) -> Result<()> {
        self.query("SELECT 1", 0.0).await.map(|_| ())
    }
}

/// Render a single named-parameter value into the string ClickHouse's
/// HTTP interface expects as a `param_<name>` query-string value: scalars
/// pass through as their plain textual form, arrays use ClickHouse's
/// literal array syntax (`['a','b']`) since that's what `Array(T)`-typed
/// parameters require on the wire.
fn render_named_param(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Array(items) => {
            let rendered: Vec<String> = items
                .iter()
                .map(|v| match v {
                    serde_json::Value::String(s) => format!("'{}'", s.replace('\'', "''")),
                    other => other.to_string(),
                })
                .collect();
            format!("[{}]", rendered.join(","))
        }
        other => other.to_string(),
    }
}

fn with_execution_settings(sql: &str, timeout: Duration) -> String {
    let trimmed = sql.trim().trim_end_matches(';');
    format!(
        "{trimmed} SETTINGS max_execution_time={} FORMAT JSONEachRow",
        timeout.as_secs()
    )
}

fn execution_error_from_reqwest(err: &reqwest::Error) -> GatewayError {
    GatewayError::QueryExecutionError { message: err.to_string(), timed_out: err.is_timeout() }
}

/// Round-robin pool of [`WarehouseClient`] handles.
///
/// `min_connections`/`max_connections` in [`WarehouseConfig`] bound the
/// number of upstream URLs a deployment is expected to configure; the pool
/// itself holds exactly one client per configured URL and cycles through
/// them with an atomic index rather than maintaining a checkout/return
/// protocol, since an HTTP client handle is cheap to share concurrently.
pub struct WarehousePool {
    clients: Vec<Arc<WarehouseClient>>,
    next: AtomicUsize,
}

impl WarehousePool {
    /// Build a pool from `config`, creating one [`WarehouseClient`] per URL.
    ///
    /// # Errors
    ///
    /// Returns an error if `config.urls` is empty or if any client fails
    /// to build.
    pub fn new(config: &WarehouseConfig) -> Result<Self> {
        if config.urls.is_empty() {
            return Err(GatewayError::Internal { message: "warehouse pool requires at least one URL".into() });
        }
        let clients = config
            .urls
            .iter()
            .map(|url| WarehouseClient::new(url.clone(), config).map(Arc::new))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { clients, next: AtomicUsize::new(0) })
    }

    /// Acquire the next client in round-robin order.
    #[must_use]
    pub fn acquire(&self) -> Arc<WarehouseClient> {
        let index = self.next.fetch_add(1, Ordering::Relaxed) % self.clients.len();
        Arc::clone(&self.clients[index])
    }

    /// Execute `sql` against the next client in rotation.
    ///
    /// # Errors
    ///
    /// Propagates [`WarehouseClient::query`] errors.
    pub async fn query(&self, sql: &str, score: f64) -> Result<Vec<serde_json::Value>> {
        self.acquire().query(sql, score).await
    }

    /// Execute `sql` against the next client in rotation under an explicit
    /// `timeout` (see [`WarehouseClient::query_with_timeout`]).
    ///
    /// # Errors
    ///
    /// Propagates [`WarehouseClient::query_with_timeout`] errors.
    pub async fn query_with_timeout(&self, sql: &str, timeout: Duration) -> Result<Vec<serde_json::Value>> {
        self.acquire().query_with_timeout(sql, timeout).await
    }

    /// Execute `sql` with bound named parameters against the next client
    /// in rotation (see [`WarehouseClient::query_with_params`]).
    ///
    /// # Errors
    ///
    /// Propagates [`WarehouseClient::query_with_params`] errors.
    pub async fn query_with_params(
        &self,
        sql: &str,
        params: &[(String, serde_json::Value)],
        score: f64,
    ) -> Result<Vec<serde_json::Value>> {
        self.acquire().query_with_params(sql, params, score).await
    }

    /// Execute `sql` with bound named parameters against the next client
    /// in rotation under an explicit `timeout` (see
    /// [`WarehouseClient::query_with_params_and_timeout`]).
    ///
    /// # Errors
    ///
    /// Propagates [`WarehouseClient::query_with_params_and_timeout`] errors.
    pub async fn query_with_params_and_timeout(
        &self,
        sql: &str,
        params: &[(String, serde_json::Value)],
        timeout: Duration,
    ) -> Result<Vec<serde_json::Value>> {
        self.acquire().query_with_params_and_timeout(sql, params, timeout).await
    }

    /// Stream `sql` with bound named parameters against the next client in
    /// rotation under an explicit `timeout` (see
    /// [`WarehouseClient::query_stream_with_params_and_timeout`]).
    ///
    /// # Errors
    ///
    /// Propagates [`WarehouseClient::query_stream_with_params_and_timeout`] errors.
    pub async fn query_stream_with_params_and_timeout(
        &self,
        sql: &str,
        params: &[(String, serde_json::Value)],
        timeout: Duration,
    ) -> Result<impl Stream<Item = Result<serde_json::Value>> + Send> {
        self.acquire().query_stream_with_params_and_timeout(sql, params, timeout).await
    }

    /// Stream `sql` against the next client in rotation.
    ///
    /// # Errors
    ///
    /// Propagates [`WarehouseClient::query_stream`] errors.
    pub async fn query_stream(
        &self,
        sql: &str,
        score: f64,
    ) -> Result<impl Stream<Item = Result<serde_json::Value>> + Send> {
        self.acquire().query_stream(sql, score).await
    }

    /// Stream `sql` against the next client in rotation under an explicit
    /// `timeout` (see [`WarehouseClient::query_stream_with_timeout`]).
    ///
    /// # Errors
    ///
    /// Propagates [`WarehouseClient::query_stream_with_timeout`] errors.
    pub async fn query_stream_with_timeout(
        &self,
        sql: &str,
        timeout: Duration,
    ) -> Result<impl Stream<Item = Result<serde_json::Value>> + Send> {
        self.acquire().query_stream_with_timeout(sql, timeout).await
    }

    /// Ping every client in the pool, returning the first failure.
    ///
    /// Used by the gateway's readiness probe: the gateway is only ready
    /// once every configured warehouse node answers.
    ///
    /// # Errors
    ///
    /// Returns the first [`WarehouseClient::ping`] failure encountered.
    pub async fn health(&self) -> Result<()> {
        for client in &self.clients {
            if let Err(e) = client.ping().await {
                warn!(error = %e, "warehouse node failed health check");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Number of clients currently pooled.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Whether the pool holds no clients (always false once constructed
    /// via [`WarehousePool::new`]).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_tiers_match_score_boundaries() {
        assert_eq!(timeout_for_score(0.0), Duration::from_secs(10));
        assert_eq!(timeout_for_score(99.9), Duration::from_secs(10));
        assert_eq!(timeout_for_score(100.0), Duration::from_secs(30));
        assert_eq!(timeout_for_score(499.9), Duration::from_secs(30));
        assert_eq!(timeout_for_score(500.0), Duration::from_secs(90));
        assert_eq!(timeout_for_score(10_000.0), Duration::from_secs(90));
    }

    #[test]
    fn render_named_param_passes_scalars_through_unquoted() {
        assert_eq!(render_named_param(&serde_json::json!("pump_fun")), "pump_fun");
        assert_eq!(render_named_param(&serde_json::json!(42)), "42");
    }

    #[test]
    fn render_named_param_renders_arrays_as_clickhouse_literals() {
        let rendered = render_named_param(&serde_json::json!(["pump_fun", "raydium"]));
        assert_eq!(rendered, "['pump_fun','raydium']");
    }

    #[test]
    fn with_execution_settings_strips_trailing_semicolon_and_appends_clauses() {
        let statement = with_execution_settings("SELECT 1;", Duration::from_secs(10));
        assert_eq!(statement, "SELECT 1 SETTINGS max_execution_time=10 FORMAT JSONEachRow");
    }

    #[test]
    fn round_robin_cycles_through_all_clients() {
        let config = WarehouseConfig {
            urls: vec!["http://node-a:8123".into(), "http://node-b:8123".into(), "http://node-c:8123".into()],
            ..WarehouseConfig::default()
        };
        let pool = WarehousePool::new(&config).expect("pool builds");
        assert_eq!(pool.len(), 3);

        let first = pool.acquire();
        let second = pool.acquire();
        let third = pool.acquire();
        let fourth = pool.acquire();
        assert!(!Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&second, &third));
        assert!(Arc::ptr_eq(&first, &fourth));
    }

    #[test]
    fn pool_construction_rejects_empty_url_list() {
        let config = WarehouseConfig { urls: vec![], ..WarehouseConfig::default() };
        assert!(WarehousePool::new(&config).is_err());
    }
}
