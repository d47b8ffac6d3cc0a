//! Everything related to building in-cluster configuration.

use std::path::Path;

use serde_json::{Map, Value};
use snafu::{ResultExt, Snafu};

const TOKEN_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/token";
const ROOT_CA_FILE: &str = "/var/run/secrets/kubernetes.io/serviceaccount/ca.crt";

/// Prepares a kubeconfig document suitable for use when the plugin itself
/// runs in a k8s cluster.
pub fn kubeconfig() -> Result<Value, Error> {
    let host = std::env::var("KUBERNETES_SERVICE_HOST").context(NotInClusterSnafu {
        missing: "KUBERNETES_SERVICE_HOST",
    })?;
    let port = std::env::var("KUBERNETES_SERVICE_PORT").context(NotInClusterSnafu {
        missing: "KUBERNETES_SERVICE_PORT",
    })?;

    kubeconfig_from(&host, &port, Path::new(TOKEN_FILE), Path::new(ROOT_CA_FILE))
}

fn kubeconfig_from(
    host: &str,
    port: &str,
    token_file: &Path,
    root_ca_file: &Path,
) -> Result<Value, Error> {
    let token = std::fs::read_to_string(token_file).context(TokenSnafu)?;

    let mut cluster = Map::new();
    cluster.insert(
        "server".into(),
        format!("https://{}", join_host_port(host, port)).into(),
    );
    cluster.insert(
        "certificate-authority".into(),
        root_ca_file.to_string_lossy().into_owned().into(),
    );

    let mut user = Map::new();
    user.insert("token".into(), token.trim().into());

    Ok(super::single_context_kubeconfig(cluster, user))
}

/// An error returned when building an in-cluster configuration.
#[derive(Debug, Snafu)]
pub enum Error {
    /// The in-cluster configuration requested while executing not in a cluster
    /// environment.
    #[snafu(display(
        "unable to load in-cluster configuration, KUBERNETES_SERVICE_HOST and KUBERNETES_SERVICE_PORT must be defined"
    ))]
    NotInCluster {
        /// The underlying error.
        source: std::env::VarError,

        /// The field that's missing.
        missing: &'static str,
    },

    /// The token file could not be read successfully.
    #[snafu(display("unable to read the token file"))]
    Token {
        /// The underlying error.
        source: std::io::Error,
    },
}

/// Go's `net.JoinHostPort`, which the reference client uses to build the
/// in-cluster server address.
fn join_host_port(host: &str, port: &str) -> String {
    if host.contains(':') {
        // If IPv6 address is used, use a special notation.
        return format!("[{host}]:{port}");
    }
    // Use traditional notation for domain names and IPv4 addresses.
    format!("{host}:{port}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_host_port() {
        // IPv4
        assert_eq!(join_host_port("0.0.0.0", "1234"), "0.0.0.0:1234");
        assert_eq!(join_host_port("127.0.0.1", "443"), "127.0.0.1:443");
        // IPv6
        assert_eq!(join_host_port("::", "1234"), "[::]:1234");
        assert_eq!(
            join_host_port("2001:db8::8a2e:370:7334", "1234"),
            "[2001:db8::8a2e:370:7334]:1234"
        );
        // DNS
        assert_eq!(join_host_port("example.com", "1234"), "example.com:1234");
    }

    #[test]
    fn kubeconfig_from_service_account() {
        let dir = tempfile::tempdir().unwrap();
        let token_file = dir.path().join("token");
        std::fs::write(&token_file, "sa-token\n").unwrap();
        let ca_file = dir.path().join("ca.crt");

        let document = kubeconfig_from("10.0.0.1", "443", &token_file, &ca_file).unwrap();
        assert_eq!(
            document["clusters"][0]["cluster"]["server"],
            "https://10.0.0.1:443"
        );
        assert_eq!(
            document["clusters"][0]["cluster"]["certificate-authority"],
            ca_file.to_string_lossy().as_ref()
        );
        assert_eq!(document["users"][0]["user"]["token"], "sa-token");
    }

    #[test]
    fn kubeconfig_without_token() {
        let dir = tempfile::tempdir().unwrap();
        let error = kubeconfig_from(
            "10.0.0.1",
            "443",
            &dir.path().join("missing"),
            &dir.path().join("ca.crt"),
        )
        .unwrap_err();
        assert!(matches!(error, Error::Token { .. }));
    }
}
