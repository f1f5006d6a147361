//! Serves the backup item actions over HTTP, so an orchestrator shim can invoke them once per item.
use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use clap::Parser;
use config::Config;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, Level};
use velero_plugins::action::{Backup, BackupItemAction};
use warp::{http::StatusCode, reply, Filter};

mod config;

#[derive(Debug, Deserialize)]
struct ExecuteRequest {
    item: Value,
    backup: Backup,
}

/// Turn the action result into a JSON reply. Errors are reported in the body with a 500.
fn reply_result<T: Serialize>(result: anyhow::Result<T>) -> reply::WithStatus<reply::Json> {
    match result {
        Ok(value) => reply::with_status(reply::json(&value), StatusCode::OK),
        Err(err) => {
            tracing::error!("Error: {:?}", err);
            reply::with_status(
                reply::json(&json!({ "error": format!("{:#}", err) })),
                StatusCode::INTERNAL_SERVER_ERROR,
            )
        }
    }
}

fn routes(
    action: Arc<dyn BackupItemAction>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let applies_to_action = action.clone();
    let applies_to = warp::path!("applies-to")
        .and(warp::get())
        .map(move || reply_result(applies_to_action.applies_to()));

    let execute = warp::path!("execute")
        .and(warp::post())
        .and(warp::body::json())
        .map(move |body: ExecuteRequest| {
            tracing::trace!("Execute request {:?}", body);
            reply_result(action.execute(body.item, &body.backup))
        });

    applies_to.or(execute).with(warp::trace::request())
}

#[derive(Parser, Debug, Clone)]
#[command(name = "velero-plugins-server")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Args {
    #[arg(short, long)]
    /// Path to the configuration file.
    config_file: Option<PathBuf>,
    /// The path to the TLS certificate.
    #[arg(long, requires = "tls_key")]
    tls_cert: Option<PathBuf>,
    /// The path to the TLS key.
    #[arg(long, requires = "tls_cert")]
    tls_key: Option<PathBuf>,
    /// The port to listen on.
    /// Default is 8085.
    #[arg(short, long, default_value = "8085")]
    port: u16,
    /// The maximum level of log events written to stdout.
    #[arg(long, default_value = "info")]
    log_level: Level,
}

async fn serve(args: Args, action: Arc<dyn BackupItemAction>) {
    let routes = routes(action);
    let addr = ([0, 0, 0, 0], args.port);
    let shutdown = async move {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install CTRL+C signal handler");
    };

    info!("Starting plugin server on port {}", args.port);
    if let (Some(tls_cert), Some(tls_key)) = (&args.tls_cert, &args.tls_key) {
        let (_addr, fut) = warp::serve(routes)
            .tls()
            .cert_path(tls_cert)
            .key_path(tls_key)
            .bind_with_graceful_shutdown(addr, shutdown);
        fut.await
    } else {
        let (_addr, fut) = warp::serve(routes).bind_with_graceful_shutdown(addr, shutdown);
        fut.await
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse the CLI arguments
    let args = Args::try_parse()?;

    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Parsed CLI arguments: {:?}", args);

    let config = match &args.config_file {
        Some(config_file) => {
            Config::from_file(config_file).context("Failed to load configuration file")?
        }
        None => Config::default(),
    };

    let action: Arc<dyn BackupItemAction> = Arc::new(config.build_pod_action());

    serve(args, action).await;

    info!("Exiting plugin server");

    Ok(())
}

#[cfg(test)]
mod tests {
    use velero_plugins::consts::ANNOTATION_VOLUMES_TO_EXCLUDE;

    use super::*;

    fn action() -> Arc<dyn BackupItemAction> {
        let config = Config {
            included_namespaces: vec!["builds".to_string()],
            excluded_namespaces: vec![],
        };
        Arc::new(config.build_pod_action())
    }

    fn execute_body(pod: Value) -> Value {
        json!({
            "item": pod,
            "backup": {
                "apiVersion": "velero.io/v1",
                "kind": "Backup",
                "metadata": { "name": "nightly", "namespace": "velero" },
                "spec": {}
            }
        })
    }

    fn pod(labels: Value) -> Value {
        json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": { "name": "app-1-build", "namespace": "builds", "labels": labels },
            "spec": {
                "containers": [{ "name": "sti-build", "image": "builder:latest" }],
                "volumes": [
                    { "name": "buildworkdir", "emptyDir": {} },
                    { "name": "docker-socket", "hostPath": { "path": "/var/run/docker.sock" } },
                    { "name": "container-storage-root", "emptyDir": {} }
                ]
            }
        })
    }

    #[tokio::test]
    async fn test_applies_to() {
        let res = warp::test::request()
            .method("GET")
            .path("/applies-to")
            .reply(&routes(action()))
            .await;

        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["includedResources"], json!(["pods"]));
        assert_eq!(body["includedNamespaces"], json!(["builds"]));
    }

    #[tokio::test]
    async fn test_execute_build_pod() {
        let res = warp::test::request()
            .method("POST")
            .path("/execute")
            .json(&execute_body(pod(json!({ "openshift.io/build.name": "app-1" }))))
            .reply(&routes(action()))
            .await;

        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(
            body["item"]["metadata"]["annotations"][ANNOTATION_VOLUMES_TO_EXCLUDE],
            "buildworkdir,container-storage-root"
        );
        assert_eq!(body["additionalItems"], json!([]));
    }

    #[tokio::test]
    async fn test_execute_regular_pod() {
        let mut input = pod(json!({ "app": "nginx" }));
        input["metadata"]["creationTimestamp"] = json!("2024-01-01T00:00:00.123456Z");
        input["metadata"]["futureMeta"] = json!({ "k": 1 });

        let res = warp::test::request()
            .method("POST")
            .path("/execute")
            .json(&execute_body(input.clone()))
            .reply(&routes(action()))
            .await;

        assert_eq!(res.status(), StatusCode::OK);
        let body: Value = serde_json::from_slice(res.body()).unwrap();
        assert_eq!(body["item"], input);
    }

    #[tokio::test]
    async fn test_execute_malformed_request() {
        let res = warp::test::request()
            .method("POST")
            .path("/execute")
            .json(&json!({ "item": {} }))
            .reply(&routes(action()))
            .await;

        assert!(res.status().is_client_error());
    }
}
