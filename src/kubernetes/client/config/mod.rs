//! Client configuration: turns the master's `configuration` and
//! `authentication` properties into a [`kube::Config`].
//!
//! Every variant is first normalized to a kubeconfig document so that
//! credentials can be overlaid the same way no matter where the cluster
//! details came from.

mod in_cluster;

use std::{fmt, path::PathBuf};

use kube::config::{KubeConfigOptions, Kubeconfig, KubeconfigError};
use serde::Deserialize;
use serde_json::{Map, Value};
use snafu::{OptionExt, ResultExt, Snafu};

use crate::{
    context::{NODE_PROPERTY_AUTHENTICATION, NODE_PROPERTY_CONFIGURATION, Properties},
    resources::{self, ResourceStore},
};

const CLUSTER_NAME: &str = "kubernetes";
const USER_NAME: &str = "kubernetes-plugin";
const CONTEXT_NAME: &str = "kubernetes-plugin";

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("invalid {property} property: {source}"))]
    InvalidProperty {
        property: &'static str,
        source: serde_json::Error,
    },

    #[snafu(display(
        "no client configuration found, expected one of blueprint_file_name, manager_file_path, file_content, api_options or in_cluster"
    ))]
    NoConfiguration,

    #[snafu(display("{present} given without {missing}"))]
    IncompleteCredentials {
        present: &'static str,
        missing: &'static str,
    },

    #[snafu(display("unable to fetch kubeconfig from the blueprint: {source}"))]
    BlueprintFile { source: resources::Error },

    #[snafu(display("unable to read kubeconfig {}: {source}", path.display()))]
    ManagerFile {
        path: PathBuf,
        source: std::io::Error,
    },

    #[snafu(display("kubeconfig is not valid YAML: {source}"))]
    ParseKubeconfig { source: serde_yaml::Error },

    #[snafu(display("kubeconfig must be a mapping"))]
    NotAMapping,

    #[snafu(display("{source}"))]
    InCluster { source: in_cluster::Error },

    #[snafu(display("kubeconfig has no user bound to its current context"))]
    NoCurrentUser,

    #[snafu(display("malformed kubeconfig: {source}"))]
    InvalidKubeconfig { source: serde_json::Error },

    #[snafu(display("unable to load kubeconfig: {source}"))]
    LoadKubeconfig { source: KubeconfigError },

    #[snafu(display("unable to create Kubernetes client: {source}"))]
    CreateClient { source: kube::Error },
}

/// Settings for a client talking to the API server directly.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiOptions {
    pub host: String,
    #[serde(default = "default_verify_ssl")]
    pub verify_ssl: bool,
    #[serde(default)]
    pub ssl_ca_cert: Option<PathBuf>,
    #[serde(default)]
    pub cert_file: Option<PathBuf>,
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    #[serde(default)]
    pub api_key: Option<String>,
}

const fn default_verify_ssl() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
struct ConfigurationProperties {
    #[serde(default)]
    blueprint_file_name: Option<String>,
    #[serde(default)]
    manager_file_path: Option<PathBuf>,
    #[serde(default)]
    file_content: Option<Value>,
    #[serde(default)]
    api_options: Option<Value>,
    #[serde(default)]
    in_cluster: bool,
}

/// Where the cluster details come from. When several are given the first
/// one in declaration order wins.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientConfiguration {
    BlueprintFile(String),
    ManagerFile(PathBuf),
    FileContent(Value),
    ApiOptions(ApiOptions),
    InCluster,
}

impl ClientConfiguration {
    pub fn from_properties(properties: &Properties) -> Result<Self, Error> {
        let props: ConfigurationProperties =
            serde_json::from_value(Value::Object(properties.clone())).context(
                InvalidPropertySnafu {
                    property: NODE_PROPERTY_CONFIGURATION,
                },
            )?;

        if let Some(name) = props.blueprint_file_name.filter(|name| !name.is_empty()) {
            return Ok(Self::BlueprintFile(name));
        }
        if let Some(path) = props
            .manager_file_path
            .filter(|path| !path.as_os_str().is_empty())
        {
            return Ok(Self::ManagerFile(path));
        }
        if let Some(content) = props.file_content.filter(is_present) {
            return Ok(Self::FileContent(content));
        }
        if let Some(options) = props.api_options.filter(is_present) {
            let options = serde_json::from_value(options).context(InvalidPropertySnafu {
                property: "configuration.api_options",
            })?;
            return Ok(Self::ApiOptions(options));
        }
        if props.in_cluster {
            return Ok(Self::InCluster);
        }
        NoConfigurationSnafu.fail()
    }

    /// Produces the kubeconfig document this configuration describes.
    pub fn kubeconfig(&self, store: &dyn ResourceStore) -> Result<Value, Error> {
        match self {
            Self::BlueprintFile(name) => {
                let content = store.read(name).context(BlueprintFileSnafu)?;
                parse_kubeconfig(&content)
            }
            Self::ManagerFile(path) => {
                let content =
                    std::fs::read_to_string(path).context(ManagerFileSnafu { path: path.clone() })?;
                parse_kubeconfig(&content)
            }
            Self::FileContent(Value::String(content)) => parse_kubeconfig(content),
            Self::FileContent(content @ Value::Object(_)) => Ok(content.clone()),
            Self::FileContent(_) => NotAMappingSnafu.fail(),
            Self::ApiOptions(options) => Ok(api_options_kubeconfig(options)),
            Self::InCluster => in_cluster::kubeconfig().context(InClusterSnafu),
        }
    }
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}

fn parse_kubeconfig(content: &str) -> Result<Value, Error> {
    let document: Value = serde_yaml::from_str(content).context(ParseKubeconfigSnafu)?;
    match document {
        Value::Object(_) => Ok(document),
        _ => NotAMappingSnafu.fail(),
    }
}

fn api_options_kubeconfig(options: &ApiOptions) -> Value {
    let mut cluster = Map::new();
    cluster.insert("server".into(), options.host.clone().into());
    if !options.verify_ssl {
        cluster.insert("insecure-skip-tls-verify".into(), true.into());
    }
    if let Some(ca) = &options.ssl_ca_cert {
        cluster.insert(
            "certificate-authority".into(),
            ca.to_string_lossy().into_owned().into(),
        );
    }

    let mut user = Map::new();
    if let Some(cert) = &options.cert_file {
        user.insert(
            "client-certificate".into(),
            cert.to_string_lossy().into_owned().into(),
        );
    }
    if let Some(key) = &options.key_file {
        user.insert(
            "client-key".into(),
            key.to_string_lossy().into_owned().into(),
        );
    }
    if let Some(api_key) = &options.api_key {
        let token = api_key.strip_prefix("Bearer ").unwrap_or(api_key);
        user.insert("token".into(), token.into());
    }

    single_context_kubeconfig(cluster, user)
}

/// A kubeconfig document with exactly one cluster, user and context.
fn single_context_kubeconfig(cluster: Map<String, Value>, user: Map<String, Value>) -> Value {
    serde_json::json!({
        "apiVersion": "v1",
        "kind": "Config",
        "clusters": [{"name": CLUSTER_NAME, "cluster": cluster}],
        "users": [{"name": USER_NAME, "user": user}],
        "contexts": [{
            "name": CONTEXT_NAME,
            "context": {"cluster": CLUSTER_NAME, "user": USER_NAME},
        }],
        "current-context": CONTEXT_NAME,
    })
}

#[derive(Debug, Default, Deserialize)]
struct AuthenticationProperties {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    client_certificate_data: Option<String>,
    #[serde(default)]
    client_key_data: Option<String>,
}

/// Credentials overlaid on the user of the kubeconfig's current context.
#[derive(Clone, Default, PartialEq, Eq)]
pub enum Authentication {
    /// Use whatever the kubeconfig carries.
    #[default]
    Kubeconfig,
    Token(String),
    Basic {
        username: String,
        password: String,
    },
    ClientCertificate {
        certificate_data: String,
        key_data: String,
    },
}

impl fmt::Debug for Authentication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Kubeconfig => f.write_str("Kubeconfig"),
            Self::Token(_) => f.write_str("Token(**REDACTED**)"),
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .finish_non_exhaustive(),
            Self::ClientCertificate { .. } => f.write_str("ClientCertificate(**REDACTED**)"),
        }
    }
}

impl Authentication {
    pub fn from_properties(properties: &Properties) -> Result<Self, Error> {
        let props: AuthenticationProperties =
            serde_json::from_value(Value::Object(properties.clone())).context(
                InvalidPropertySnafu {
                    property: NODE_PROPERTY_AUTHENTICATION,
                },
            )?;
        let non_empty = |value: Option<String>| value.filter(|value| !value.is_empty());

        if let Some(token) = non_empty(props.token) {
            return Ok(Self::Token(token));
        }
        match (non_empty(props.username), non_empty(props.password)) {
            (Some(username), Some(password)) => return Ok(Self::Basic { username, password }),
            (Some(_), None) => {
                return IncompleteCredentialsSnafu {
                    present: "username",
                    missing: "password",
                }
                .fail();
            }
            (None, Some(_)) => {
                return IncompleteCredentialsSnafu {
                    present: "password",
                    missing: "username",
                }
                .fail();
            }
            (None, None) => {}
        }
        match (
            non_empty(props.client_certificate_data),
            non_empty(props.client_key_data),
        ) {
            (Some(certificate_data), Some(key_data)) => Ok(Self::ClientCertificate {
                certificate_data,
                key_data,
            }),
            (Some(_), None) => IncompleteCredentialsSnafu {
                present: "client_certificate_data",
                missing: "client_key_data",
            }
            .fail(),
            (None, Some(_)) => IncompleteCredentialsSnafu {
                present: "client_key_data",
                missing: "client_certificate_data",
            }
            .fail(),
            (None, None) => Ok(Self::Kubeconfig),
        }
    }

    /// Writes the credentials into `document`, creating the user entry when
    /// the current context names a user the document does not define.
    pub fn apply(&self, document: &mut Value) -> Result<(), Error> {
        if matches!(self, Self::Kubeconfig) {
            return Ok(());
        }

        let user = current_user(document)?;
        match self {
            Self::Kubeconfig => {}
            Self::Token(token) => {
                user.insert("token".into(), token.clone().into());
            }
            Self::Basic { username, password } => {
                user.insert("username".into(), username.clone().into());
                user.insert("password".into(), password.clone().into());
            }
            Self::ClientCertificate {
                certificate_data,
                key_data,
            } => {
                user.insert(
                    "client-certificate-data".into(),
                    certificate_data.clone().into(),
                );
                user.insert("client-key-data".into(), key_data.clone().into());
            }
        }
        Ok(())
    }
}

/// The user named by the current context, or by the only context when
/// `current-context` is unset.
fn current_user_name(document: &Value) -> Option<String> {
    let contexts = document.get("contexts")?.as_array()?;
    let context = match document.get("current-context").and_then(Value::as_str) {
        Some(current) if !current.is_empty() => contexts
            .iter()
            .find(|context| context.get("name").and_then(Value::as_str) == Some(current))?,
        _ if contexts.len() == 1 => &contexts[0],
        _ => return None,
    };
    context
        .get("context")?
        .get("user")?
        .as_str()
        .map(str::to_owned)
}

fn current_user(document: &mut Value) -> Result<&mut Properties, Error> {
    let user_name = current_user_name(document).context(NoCurrentUserSnafu)?;

    let users = document
        .as_object_mut()
        .context(NotAMappingSnafu)?
        .entry("users")
        .or_insert_with(|| Value::Array(Vec::new()));
    if !users.is_array() {
        *users = Value::Array(Vec::new());
    }
    let users = users.as_array_mut().context(NoCurrentUserSnafu)?;

    let position = match users
        .iter()
        .position(|user| user.get("name").and_then(Value::as_str) == Some(user_name.as_str()))
    {
        Some(position) => position,
        None => {
            users.push(serde_json::json!({"name": user_name, "user": {}}));
            users.len() - 1
        }
    };

    let entry = users[position]
        .as_object_mut()
        .context(NoCurrentUserSnafu)?
        .entry("user")
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    entry.as_object_mut().context(NoCurrentUserSnafu)
}

/// Everything needed to reach the cluster a resource is managed by.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientSettings {
    pub configuration: ClientConfiguration,
    pub authentication: Authentication,
}

impl ClientSettings {
    pub fn from_properties(
        configuration: &Properties,
        authentication: &Properties,
    ) -> Result<Self, Error> {
        Ok(Self {
            configuration: ClientConfiguration::from_properties(configuration)?,
            authentication: Authentication::from_properties(authentication)?,
        })
    }

    /// The kubeconfig document with credentials applied.
    pub fn kubeconfig(&self, store: &dyn ResourceStore) -> Result<Value, Error> {
        let mut document = self.configuration.kubeconfig(store)?;
        self.authentication.apply(&mut document)?;
        Ok(document)
    }

    pub async fn kube_config(&self, store: &dyn ResourceStore) -> Result<kube::Config, Error> {
        let kubeconfig: Kubeconfig =
            serde_json::from_value(self.kubeconfig(store)?).context(InvalidKubeconfigSnafu)?;
        kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .context(LoadKubeconfigSnafu)
    }

    pub async fn client(&self, store: &dyn ResourceStore) -> Result<kube::Client, Error> {
        let config = self.kube_config(store).await?;
        kube::Client::try_from(config).context(CreateClientSnafu)
    }
}
