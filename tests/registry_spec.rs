use kubemcp::config::SecurityConfig;
use kubemcp::mcp::{ToolArgs, ToolContext, ToolDescriptor, ToolOutput, ToolResult};
use kubemcp::registry::{normalize_name, RegistryError, ToolRegistry, Toolset};
use kubemcp::toolsets::build_registry;
use schemars::JsonSchema;
use serde::Deserialize;
use speculate2::speculate;

#[derive(Debug, Deserialize, JsonSchema)]
struct NoArgs {}

impl ToolArgs for NoArgs {}

#[derive(Debug, Deserialize, JsonSchema)]
struct ConfirmArgs {
    #[serde(default)]
    confirm: bool,
}

impl ToolArgs for ConfirmArgs {
    fn confirm(&self) -> bool {
        self.confirm
    }
}

async fn noop(_ctx: ToolContext, _args: NoArgs) -> ToolResult {
    Ok(ToolOutput::Text("ok".to_string()))
}

async fn wipe(_ctx: ToolContext, _args: ConfirmArgs) -> ToolResult {
    Ok(ToolOutput::Text("wiped".to_string()))
}

struct FixedToolset {
    name: &'static str,
    enabled: bool,
    tools: Vec<&'static str>,
}

impl FixedToolset {
    fn new(name: &'static str, tools: Vec<&'static str>) -> Self {
        Self {
            name,
            enabled: true,
            tools,
        }
    }

    fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl Toolset for FixedToolset {
    fn name(&self) -> &str {
        self.name
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn descriptors(&self) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .map(|name| ToolDescriptor::new(name, "test tool", noop))
            .collect()
    }
}

struct MixedToolset;

impl Toolset for MixedToolset {
    fn name(&self) -> &str {
        "mixed"
    }

    fn enabled(&self) -> bool {
        true
    }

    fn descriptors(&self) -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor::new("mixed.read", "reads", noop),
            ToolDescriptor::new("mixed.patch", "writes", noop).write(),
            ToolDescriptor::new("mixed.wipe", "deletes", wipe).destructive(),
        ]
    }
}

fn registered_names(registry: &ToolRegistry) -> Vec<String> {
    registry.list().iter().map(|t| t.external.clone()).collect()
}

speculate! {
    before {
        let core = FixedToolset::new("core", vec!["core.pods_list", "core.pod_logs"]);
        let autoscaling = FixedToolset::new("autoscaling", vec!["autoscaling.hpa_explain"]);
    }

    describe "lookup" {
        it "maps every external name back to its canonical name" {
            for normalize in [false, true] {
                let mut registry = ToolRegistry::new(normalize);
                registry.register(&core).expect("register core");
                registry.register(&autoscaling).expect("register autoscaling");

                for tool in registry.list() {
                    let found = registry.lookup(&tool.external).expect("registered tool resolves");
                    assert_eq!(found.canonical, tool.canonical);
                    assert_eq!(registry.external_name(&tool.canonical), Some(tool.external.as_str()));
                }
            }
        }

        it "returns None for names that were never registered" {
            let mut registry = ToolRegistry::new(false);
            registry.register(&core).expect("register core");
            assert!(registry.lookup("does_not_exist").is_none());
            assert!(registry.lookup("core_pods_list").is_none());
        }

        it "records the owning toolset" {
            let mut registry = ToolRegistry::new(false);
            registry.register(&autoscaling).expect("register autoscaling");
            assert_eq!(registry.lookup("autoscaling.hpa_explain").unwrap().toolset, "autoscaling");
        }
    }

    describe "normalization" {
        it "advertises underscore names when enabled" {
            let mut registry = ToolRegistry::new(true);
            registry.register(&autoscaling).expect("register autoscaling");
            assert_eq!(registered_names(&registry), vec!["autoscaling_hpa_explain"]);
            assert_eq!(registry.canonical_name("autoscaling_hpa_explain"), Some("autoscaling.hpa_explain"));
            assert!(registry.lookup("autoscaling.hpa_explain").is_none());
        }

        it "keeps canonical names when disabled" {
            let mut registry = ToolRegistry::new(false);
            registry.register(&autoscaling).expect("register autoscaling");
            assert_eq!(registered_names(&registry), vec!["autoscaling.hpa_explain"]);
        }

        it "rejects canonical names that collide after normalization" {
            let colliding = FixedToolset::new("x", vec!["a.b_c", "a_b.c"]);
            let mut registry = ToolRegistry::new(true);
            let err = registry.register(&colliding).unwrap_err();
            assert_eq!(err, RegistryError::DuplicateTool {
                name: "a_b.c".to_string(),
                conflicts_with: "a.b_c".to_string(),
            });
            assert!(registry.is_empty());
        }

        it "accepts the same pair when normalization is off" {
            let colliding = FixedToolset::new("x", vec!["a.b_c", "a_b.c"]);
            let mut registry = ToolRegistry::new(false);
            assert_eq!(registry.register(&colliding), Ok(2));
        }

        it "is a bijection over the registered set" {
            let mut registry = ToolRegistry::new(true);
            registry.register(&core).expect("register core");
            registry.register(&autoscaling).expect("register autoscaling");

            let mut externals = registered_names(&registry);
            externals.sort();
            externals.dedup();
            assert_eq!(externals.len(), registry.len());
            for tool in registry.list() {
                assert_eq!(tool.external, normalize_name(&tool.canonical));
            }
        }
    }

    describe "duplicates" {
        it "rejects a canonical name registered twice and keeps the first batch" {
            let mut registry = ToolRegistry::new(false);
            registry.register(&core).expect("register core");

            let again = FixedToolset::new("again", vec!["other.tool", "core.pods_list"]);
            let err = registry.register(&again).unwrap_err();
            assert!(matches!(err, RegistryError::DuplicateTool { ref name, .. } if name == "core.pods_list"));
            assert_eq!(registry.len(), 2);
            assert!(registry.lookup("other.tool").is_none());
        }

        it "rejects invalid names" {
            let bad = FixedToolset::new("bad", vec!["has space"]);
            let mut registry = ToolRegistry::new(false);
            assert_eq!(
                registry.register(&bad),
                Err(RegistryError::InvalidName("has space".to_string()))
            );
        }
    }

    describe "disabled toolsets" {
        it "contribute no tools" {
            let off = FixedToolset::new("core", vec!["core.pods_list"]).disabled();
            assert!(off.tools().is_empty());

            let mut registry = ToolRegistry::new(false);
            assert_eq!(registry.register(&off), Ok(0));
            assert!(registry.is_empty());
        }
    }

    describe "security filters" {
        it "keeps every tool by default" {
            let toolsets: Vec<Box<dyn Toolset>> = vec![Box::new(MixedToolset)];
            let registry = build_registry(&toolsets, &SecurityConfig::default(), false).expect("build");
            assert_eq!(registry.len(), 3);
        }

        it "drops writes and deletions in read-only mode" {
            let toolsets: Vec<Box<dyn Toolset>> = vec![Box::new(MixedToolset)];
            let security = SecurityConfig { read_only: true, ..SecurityConfig::default() };
            let registry = build_registry(&toolsets, &security, false).expect("build");
            assert_eq!(registered_names(&registry), vec!["mixed.read"]);
        }

        it "drops only destructive tools in non-destructive mode" {
            let toolsets: Vec<Box<dyn Toolset>> = vec![Box::new(MixedToolset)];
            let security = SecurityConfig { non_destructive: true, ..SecurityConfig::default() };
            let registry = build_registry(&toolsets, &security, false).expect("build");
            assert_eq!(registered_names(&registry), vec!["mixed.read", "mixed.patch"]);
        }
    }
}
