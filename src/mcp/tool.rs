//! Tool descriptors and the typed handler adapter.
//!
//! A handler is an async function from a typed argument struct to a [`ToolOutput`].
//! [`TypedHandler`] erases the argument type so the registry can hold every tool behind
//! one trait object, while the dispatch core still reads namespace, context, confirmation
//! and per-call access requirements from the decoded value.

use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures::future::BoxFuture;
use rmcp::model::{CallToolResult, Content, JsonObject, Tool, ToolAnnotations};
use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::error::ToolError;
use crate::authz::CallerIdentity;
use crate::capability::CapabilityCatalog;
use crate::kube::{ClientBundle, ClusterApi, Gvk, Gvr, NameRule, ResourceAttributes};

// ============================================================
// Access rules and gates
// ============================================================

/// The permission a tool needs: `verb` on `resource` in `group`. Namespaced rules are
/// checked in the call's namespace (or the context default).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessRule {
    pub verb: String,
    pub group: String,
    pub resource: String,
    pub subresource: Option<String>,
    pub namespaced: bool,
}

impl AccessRule {
    pub fn new(verb: &str, group: &str, resource: &str) -> Self {
        Self {
            verb: verb.to_string(),
            group: group.to_string(),
            resource: resource.to_string(),
            subresource: None,
            namespaced: true,
        }
    }

    /// Checks `resource/subresource`, e.g. `pods/log`.
    pub fn subresource(mut self, subresource: &str) -> Self {
        self.subresource = Some(subresource.to_string());
        self
    }

    pub fn cluster_scoped(mut self) -> Self {
        self.namespaced = false;
        self
    }

    pub fn attributes(&self, namespace: Option<String>) -> ResourceAttributes {
        ResourceAttributes {
            verb: self.verb.clone(),
            group: self.group.clone(),
            resource: self.resource.clone(),
            subresource: self.subresource.clone(),
            namespace,
        }
    }
}

/// Extension kinds a tool depends on. The gate passes when any of them is served.
#[derive(Debug, Clone)]
pub struct FeatureGate {
    pub feature: String,
    pub any_of: Vec<Gvk>,
}

impl FeatureGate {
    pub fn satisfied_by(&self, catalog: &CapabilityCatalog) -> bool {
        self.any_of.iter().any(|gvk| catalog.contains(gvk))
    }

    pub fn missing(&self) -> String {
        self.any_of
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" or ")
    }
}

// ============================================================
// Arguments
// ============================================================

/// Implemented by every tool argument struct. The defaults describe a cluster-scoped
/// call on the default context with no confirmation flag.
pub trait ToolArgs: DeserializeOwned + JsonSchema + Send + 'static {
    fn namespace(&self) -> Option<&str> {
        None
    }

    fn context(&self) -> &str {
        ""
    }

    fn confirm(&self) -> bool {
        false
    }

    /// Access requirement computed from the arguments, replacing the descriptor's rule.
    fn access(&self) -> Option<AccessRule> {
        None
    }

    /// Set when the requested variant of the operation is intentionally unsupported.
    fn unsupported(&self) -> Option<String> {
        None
    }

    /// Caller-supplied names that become REST path segments, with the rule each must
    /// satisfy. The namespace is always checked.
    fn path_names(&self) -> Vec<(&'static str, NameRule, &str)> {
        Vec::new()
    }
}

/// Rejects namespaces and names that could escape their path segment, before anything
/// reaches the cluster.
fn check_names<A: ToolArgs>(args: &A) -> Result<(), ToolError> {
    let namespace = args
        .namespace()
        .filter(|ns| !ns.is_empty())
        .map(|ns| ("namespace", NameRule::Label, ns));
    for (field, rule, value) in namespace.into_iter().chain(args.path_names()) {
        rule.check(value)
            .map_err(|why| ToolError::bad_argument(format!("invalid {} {:?}: {}", field, value, why)))?;
    }
    Ok(())
}

/// What dispatch needs to know about a decoded argument value.
#[derive(Debug, Clone, Default)]
pub struct ArgScope {
    pub namespace: Option<String>,
    pub context: String,
    pub confirm: bool,
    pub access: Option<AccessRule>,
    pub unsupported: Option<String>,
}

pub struct DecodedArgs {
    pub scope: ArgScope,
    value: Box<dyn Any + Send>,
}

impl std::fmt::Debug for DecodedArgs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedArgs")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

// ============================================================
// Handler context and output
// ============================================================

/// Everything a handler may use: the context's clients and catalog, the caller and the
/// request's cancellation signal.
#[derive(Clone)]
pub struct ToolContext {
    pub bundle: Arc<ClientBundle>,
    pub identity: CallerIdentity,
    pub cancel: CancellationToken,
    /// The tool's own default namespace, ahead of the context's.
    pub default_namespace: Option<String>,
}

impl ToolContext {
    pub fn api(&self) -> &dyn ClusterApi {
        self.bundle.api.as_ref()
    }

    pub fn catalog(&self) -> &CapabilityCatalog {
        &self.bundle.catalog
    }

    pub fn cluster(&self) -> &str {
        &self.bundle.context
    }

    pub fn namespace(&self, requested: Option<&str>) -> String {
        let requested = requested
            .filter(|ns| !ns.is_empty())
            .or(self.default_namespace.as_deref());
        self.bundle.namespace_or_default(requested)
    }

    /// Resource serving `gvk`, or `FeatureNotInstalled` naming `feature`.
    pub fn resolve(&self, feature: &str, gvk: &Gvk) -> Result<Gvr, ToolError> {
        self.catalog()
            .lookup(gvk)
            .ok_or_else(|| ToolError::FeatureNotInstalled {
                feature: feature.to_string(),
                missing: gvk.to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    Json(Value),
    Text(String),
}

impl ToolOutput {
    pub fn into_result(self) -> CallToolResult {
        match self {
            ToolOutput::Json(value) => {
                let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
                CallToolResult::success(vec![Content::text(text)])
            }
            ToolOutput::Text(text) => CallToolResult::success(vec![Content::text(text)]),
        }
    }
}

pub type ToolResult = Result<ToolOutput, ToolError>;

// ============================================================
// Handlers
// ============================================================

pub trait ToolHandler: Send + Sync {
    fn decode(&self, arguments: Value) -> Result<DecodedArgs, ToolError>;

    fn call(&self, context: ToolContext, args: DecodedArgs) -> BoxFuture<'static, ToolResult>;
}

/// Adapts `async fn(ToolContext, A) -> ToolResult` to [`ToolHandler`].
pub struct TypedHandler<A, F> {
    handler: F,
    _args: PhantomData<fn() -> A>,
}

impl<A, F, Fut> TypedHandler<A, F>
where
    A: ToolArgs,
    F: Fn(ToolContext, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ToolResult> + Send + 'static,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _args: PhantomData,
        }
    }
}

impl<A, F, Fut> ToolHandler for TypedHandler<A, F>
where
    A: ToolArgs,
    F: Fn(ToolContext, A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ToolResult> + Send + 'static,
{
    fn decode(&self, arguments: Value) -> Result<DecodedArgs, ToolError> {
        let arguments = if arguments.is_null() {
            Value::Object(Default::default())
        } else {
            arguments
        };
        let args: A =
            serde_json::from_value(arguments).map_err(|e| ToolError::bad_argument(e.to_string()))?;
        check_names(&args)?;
        let scope = ArgScope {
            namespace: args.namespace().filter(|ns| !ns.is_empty()).map(str::to_string),
            context: args.context().to_string(),
            confirm: args.confirm(),
            access: args.access(),
            unsupported: args.unsupported(),
        };
        Ok(DecodedArgs {
            scope,
            value: Box::new(args),
        })
    }

    fn call(&self, context: ToolContext, args: DecodedArgs) -> BoxFuture<'static, ToolResult> {
        match args.value.downcast::<A>() {
            Ok(args) => Box::pin((self.handler)(context, *args)),
            Err(_) => Box::pin(async { Err(ToolError::internal("decoded arguments have the wrong type")) }),
        }
    }
}

// ============================================================
// Descriptors
// ============================================================

/// A tool as registered: canonical name, schema, hints, policy and handler.
#[derive(Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Arc<JsonObject>,
    pub read_only: bool,
    pub destructive: bool,
    pub access: Option<AccessRule>,
    pub gate: Option<FeatureGate>,
    pub default_namespace: Option<String>,
    pub handler: Arc<dyn ToolHandler>,
}

impl std::fmt::Debug for ToolDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolDescriptor")
            .field("name", &self.name)
            .field("read_only", &self.read_only)
            .field("destructive", &self.destructive)
            .field("access", &self.access)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

impl ToolDescriptor {
    /// A read-only tool. Use the builder methods to mark writes and attach policy.
    pub fn new<A, F, Fut>(name: &str, description: &str, handler: F) -> Self
    where
        A: ToolArgs,
        F: Fn(ToolContext, A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ToolResult> + Send + 'static,
    {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema: Arc::new(input_schema::<A>()),
            read_only: true,
            destructive: false,
            access: None,
            gate: None,
            default_namespace: None,
            handler: Arc::new(TypedHandler::new(handler)),
        }
    }

    /// Mutates cluster state without deleting anything.
    pub fn write(mut self) -> Self {
        self.read_only = false;
        self
    }

    pub fn destructive(mut self) -> Self {
        self.read_only = false;
        self.destructive = true;
        self
    }

    pub fn requires(mut self, verb: &str, group: &str, resource: &str) -> Self {
        self.access = Some(AccessRule::new(verb, group, resource));
        self
    }

    /// Like [`requires`](Self::requires) for a subresource such as `pods/log`.
    pub fn requires_subresource(
        mut self,
        verb: &str,
        group: &str,
        resource: &str,
        subresource: &str,
    ) -> Self {
        self.access = Some(AccessRule::new(verb, group, resource).subresource(subresource));
        self
    }

    /// Like [`requires`](Self::requires) for cluster-scoped resources, or namespaced
    /// resources listed across all namespaces.
    pub fn requires_cluster(mut self, verb: &str, group: &str, resource: &str) -> Self {
        self.access = Some(AccessRule::new(verb, group, resource).cluster_scoped());
        self
    }

    pub fn gated_on(mut self, feature: &str, any_of: Vec<Gvk>) -> Self {
        self.gate = Some(FeatureGate {
            feature: feature.to_string(),
            any_of,
        });
        self
    }

    /// Namespace used when the caller names none, instead of the context default.
    pub fn default_namespace(mut self, namespace: &str) -> Self {
        self.default_namespace = Some(namespace.to_string());
        self
    }

    /// Whether the argument schema declares a `confirm` flag.
    pub fn has_confirm(&self) -> bool {
        self.input_schema
            .get("properties")
            .and_then(Value::as_object)
            .is_some_and(|props| props.contains_key("confirm"))
    }

    /// The MCP tool advertised under `external_name`.
    pub fn to_tool(&self, external_name: &str) -> Tool {
        let mut tool = Tool::new(
            external_name.to_string(),
            self.description.clone(),
            Arc::clone(&self.input_schema),
        );
        tool.annotations = Some(ToolAnnotations {
            title: None,
            read_only_hint: Some(self.read_only),
            destructive_hint: Some(self.destructive),
            idempotent_hint: None,
            open_world_hint: None,
        });
        tool
    }
}

/// JSON Schema of `A` as an object, without the `$schema` marker.
pub fn input_schema<A: JsonSchema>() -> JsonObject {
    let schema = schemars::schema_for!(A);
    let mut object = match serde_json::to_value(schema) {
        Ok(Value::Object(object)) => object,
        _ => JsonObject::new(),
    };
    object.remove("$schema");
    object
        .entry("type")
        .or_insert_with(|| Value::String("object".into()));
    object
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, JsonSchema)]
    struct DeleteArgs {
        namespace: String,
        name: String,
        #[serde(default)]
        confirm: bool,
    }

    impl ToolArgs for DeleteArgs {
        fn namespace(&self) -> Option<&str> {
            Some(&self.namespace)
        }

        fn confirm(&self) -> bool {
            self.confirm
        }
    }

    #[derive(Debug, Deserialize, JsonSchema)]
    struct EmptyArgs {}

    impl ToolArgs for EmptyArgs {}

    fn delete_tool() -> ToolDescriptor {
        ToolDescriptor::new("demo.delete", "Delete a thing", |_ctx, args: DeleteArgs| async move {
            Ok(ToolOutput::Text(args.name))
        })
        .destructive()
        .requires("delete", "", "configmaps")
    }

    #[test]
    fn schema_declares_confirm_flag() {
        let tool = delete_tool();
        assert!(tool.has_confirm());
        assert_eq!(tool.input_schema["type"], "object");
        assert!(tool.input_schema.get("$schema").is_none());

        let plain = ToolDescriptor::new("demo.list", "List", |_ctx, _args: EmptyArgs| async {
            Ok(ToolOutput::Json(json!([])))
        });
        assert!(!plain.has_confirm());
    }

    #[test]
    fn decode_extracts_scope() {
        let tool = delete_tool();
        let decoded = tool
            .handler
            .decode(json!({"namespace": "web", "name": "cfg", "confirm": true}))
            .unwrap();
        assert_eq!(decoded.scope.namespace.as_deref(), Some("web"));
        assert!(decoded.scope.confirm);
    }

    #[test]
    fn decode_rejects_type_mismatch() {
        let tool = delete_tool();
        let err = tool
            .handler
            .decode(json!({"namespace": "web", "name": 7}))
            .unwrap_err();
        assert_eq!(err.kind(), "BadArgument");
    }

    #[test]
    fn null_arguments_decode_as_empty_object() {
        let tool = ToolDescriptor::new("demo.list", "List", |_ctx, _args: EmptyArgs| async {
            Ok(ToolOutput::Json(json!([])))
        });
        assert!(tool.handler.decode(Value::Null).is_ok());
    }

    #[test]
    fn advertised_tool_carries_hints() {
        let tool = delete_tool().to_tool("demo_delete");
        assert_eq!(tool.name, "demo_delete");
        let annotations = tool.annotations.unwrap();
        assert_eq!(annotations.destructive_hint, Some(true));
        assert_eq!(annotations.read_only_hint, Some(false));
    }
}
