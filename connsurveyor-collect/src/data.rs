//! Data collection: drive every cached connection through its connector
//! and write the dumped content into the environment's data tree.
//!
//! Each environment's `data/<env>` directory is deleted and rebuilt on
//! every run, so a connection revoked since the previous run leaves no
//! stale records behind. Connections are independent and write into
//! disjoint directories, so they are processed through a bounded worker
//! pool; the cap stays low because HTTP 429 is the only backpressure
//! signal the backends give.

use std::path::PathBuf;

use connsurveyor_core::cache;
use connsurveyor_core::connectors;
use connsurveyor_core::error::{ConnSurveyorError, Result};
use connsurveyor_core::models::Connection;
use connsurveyor_core::paths;
use connsurveyor_core::transport::ApiClient;
use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

/// Default connection-level parallelism.
pub const DEFAULT_PARALLELISM: usize = 4;

/// Drives connector dumps across every cached connection.
pub struct DataCollector {
    cache_path: PathBuf,
    client: ApiClient,
    parallelism: usize,
}

impl DataCollector {
    pub fn new(cache_path: impl Into<PathBuf>, client: ApiClient, parallelism: usize) -> Self {
        Self {
            cache_path: cache_path.into(),
            client,
            parallelism: parallelism.max(1),
        }
    }

    /// Collects data for every environment with cached connections.
    ///
    /// Returns `false` when the cache holds no connections at all, leaving
    /// the "run recon first" suggestion to the caller.
    ///
    /// # Errors
    /// Cache I/O failures. Backend failures are contained: a failed record
    /// is skipped, a failed connection is logged and the rest proceed.
    pub async fn collect(&self) -> Result<bool> {
        let environment_ids = cache::environment_ids(&self.cache_path).await?;
        if environment_ids.is_empty() {
            return Ok(false);
        }

        let mut any_connections = false;
        for environment_id in &environment_ids {
            let connections =
                cache::load_connections(&self.cache_path, Some(environment_id), true).await?;
            if connections.is_empty() {
                continue;
            }
            any_connections = true;
            self.collect_environment(environment_id, connections).await?;
        }

        Ok(any_connections)
    }

    async fn collect_environment(
        &self,
        environment_id: &str,
        connections: Vec<Connection>,
    ) -> Result<()> {
        let env_data = paths::env_data_path(&self.cache_path, environment_id);

        // Full refresh: the previous run's tree goes away wholesale.
        if env_data.is_dir() {
            tokio::fs::remove_dir_all(&env_data)
                .await
                .map_err(|e| ConnSurveyorError::io(env_data.display().to_string(), e))?;
        }
        tokio::fs::create_dir_all(&env_data)
            .await
            .map_err(|e| ConnSurveyorError::io(env_data.display().to_string(), e))?;

        info!(
            "Collecting data for {} connections in environment {}",
            connections.len(),
            environment_id
        );

        let results: Vec<(String, Result<usize>)> = stream::iter(connections)
            .map(|connection| {
                let environment_id = environment_id.to_string();
                async move {
                    let connection_id = connection.connection_id.clone();
                    let outcome = self.collect_connection(&environment_id, connection).await;
                    (connection_id, outcome)
                }
            })
            .buffer_unordered(self.parallelism)
            .collect()
            .await;

        for (connection_id, outcome) in results {
            match outcome {
                Ok(files) if files > 0 => {
                    info!("Dumped {} records from connection {}", files, connection_id);
                }
                Ok(_) => {}
                // An incompatible cache must stop the run.
                Err(e @ ConnSurveyorError::SchemaVersion { .. }) => return Err(e),
                // One broken connection must not lose the rest of the
                // tenant's data.
                Err(e) => error!("Connection {} failed: {}", connection_id, e),
            }
        }

        Ok(())
    }

    async fn collect_connection(
        &self,
        environment_id: &str,
        connection: Connection,
    ) -> Result<usize> {
        let api_name = connection.api_name().to_string();

        if connectors::BackendKind::from_api_name(&api_name).is_none() {
            // Most tenants reference connectors the tool has no backend
            // for; that is not an error.
            debug!(
                "No backend registered for {}, skipping connection {}",
                api_name, connection.connection_id
            );
            return Ok(0);
        }

        let spec = match cache::get_connector(&self.cache_path, environment_id, &api_name).await {
            Ok(spec) => spec,
            Err(ConnSurveyorError::Io { .. }) => {
                warn!(
                    "No cached specification for {}, skipping connection {}",
                    api_name, connection.connection_id
                );
                return Ok(0);
            }
            Err(e) => return Err(e),
        };

        let Some(connector) =
            connectors::bind(self.client.clone(), &spec, &connection.connection_id)
        else {
            return Ok(0);
        };

        let connection_root = paths::env_connections_data_path(&self.cache_path, environment_id)
            .join(&api_name)
            .join(paths::sanitize_file_name(&connection.connection_id));

        let mut files_written = 0usize;
        let stores = connector.ping(&connection.connection_parameters).await?;
        for store in &stores {
            let records = connector.enum_records(store).await?;
            for record in &records {
                let type_dir = connection_root.join(record.record.record_type.as_str());
                match connector.dump(record).await {
                    Ok(dump) => {
                        crate::output::write_dump(&type_dir, &dump).await?;
                        files_written += 1;
                    }
                    Err(e) if e.is_record_scoped() => {
                        // Skip the record, keep the connection.
                        warn!("{}", e);
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(files_written)
    }
}
