use super::InternalEvent;

#[derive(Debug)]
pub struct KubernetesRequest<'a> {
    pub route: &'a str,
    pub kind: &'a str,
    pub name: Option<&'a str>,
    pub namespace: Option<&'a str>,
}

impl InternalEvent for KubernetesRequest<'_> {
    fn emit_logs(&self) {
        debug!(
            message = "Calling Kubernetes API.",
            route = %self.route,
            kind = %self.kind,
            name = ?self.name,
            namespace = ?self.namespace,
        );
    }
}

#[derive(Debug)]
pub struct KubernetesResourceCreated<'a> {
    pub kind: &'a str,
    pub name: Option<&'a str>,
    pub namespace: Option<&'a str>,
}

impl InternalEvent for KubernetesResourceCreated<'_> {
    fn emit_logs(&self) {
        info!(
            message = "Resource created.",
            kind = %self.kind,
            name = ?self.name,
            namespace = ?self.namespace,
        );
    }
}

#[derive(Debug)]
pub struct KubernetesResourceDeleted<'a> {
    pub kind: &'a str,
    pub name: &'a str,
    pub namespace: Option<&'a str>,
}

impl InternalEvent for KubernetesResourceDeleted<'_> {
    fn emit_logs(&self) {
        info!(
            message = "Resource deleted.",
            kind = %self.kind,
            name = %self.name,
            namespace = ?self.namespace,
        );
    }
}

#[derive(Debug)]
pub struct KubernetesRequestError<'a> {
    pub route: &'a str,
    pub error: &'a dyn std::error::Error,
}

impl InternalEvent for KubernetesRequestError<'_> {
    fn emit_logs(&self) {
        error!(
            message = "Kubernetes API call failed.",
            route = %self.route,
            error = %self.error,
            error_type = "request_failed",
        );
    }
}

#[derive(Debug)]
pub struct KubernetesClientInitialized<'a> {
    pub configuration: &'a str,
}

impl InternalEvent for KubernetesClientInitialized<'_> {
    fn emit_logs(&self) {
        debug!(
            message = "Kubernetes client initialized.",
            configuration = %self.configuration,
        );
    }
}

#[derive(Debug)]
pub struct CallOptionsIgnored<'a> {
    pub keys: &'a [&'a str],
}

impl InternalEvent for CallOptionsIgnored<'_> {
    fn emit_logs(&self) {
        warn!(
            message = "Ignoring options no Kubernetes call accepts.",
            keys = ?self.keys,
        );
    }
}
