//! Named memory operations for tool-calling agents.
//!
//! Every operation is registered explicitly with a JSON Schema for its
//! input and an async handler bound to a [`MemoryManager`]:
//!
//! - **memory_add**: Store content (classified unless a tier is given)
//! - **memory_search**: Ranked search across tiers
//! - **memory_forget**: Forget one id, or bulk-forget by policy
//! - **memory_consolidate**: Promote important working items
//! - **memory_update**: Change importance or metadata
//! - **memory_stats**: Per-tier counts and importance
//! - **memory_summary**: Human-readable overview
//! - **memory_relate**: Record or traverse knowledge-graph relations

use chrono::Duration;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::memory::{
    AddRequest, ForgetPolicy, MemoryId, MemoryManager, RetrieveRequest, Tier, TimeRange,
};

/// A tool definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryTool {
    /// Tool name (must be unique)
    pub name: String,
    /// Human-readable description
    pub description: String,
    /// JSON Schema for input parameters
    pub input_schema: Value,
    /// Whether the tool deletes data
    pub destructive: bool,
    /// Category for organization
    pub category: Option<String>,
}

impl MemoryTool {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema: json!({"type": "object", "properties": {}}),
            destructive: false,
            category: None,
        }
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    pub fn destructive(mut self) -> Self {
        self.destructive = true;
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

/// Async tool handler.
pub type ToolHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync>;

/// Wrap a typed operation as a JSON-in/JSON-out handler.
fn typed_handler<I, F, Fut>(manager: Arc<MemoryManager>, op: F) -> ToolHandler
where
    I: DeserializeOwned + Send + 'static,
    F: Fn(Arc<MemoryManager>, I) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |input: Value| -> BoxFuture<'static, Result<Value>> {
        let call = serde_json::from_value::<I>(input)
            .map_err(Error::from)
            .map(|parsed| op(manager.clone(), parsed));
        Box::pin(async move { call?.await })
    })
}

fn parse_id(raw: &str) -> Result<MemoryId> {
    MemoryId::parse(raw).map_err(|e| Error::invalid_item(format!("invalid memory id {}: {}", raw, e)))
}

/// Registry of memory tools.
pub struct MemoryToolRegistry {
    tools: HashMap<String, (MemoryTool, ToolHandler)>,
}

impl Default for MemoryToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Create a registry with every memory tool bound to `manager`.
    pub fn for_manager(manager: Arc<MemoryManager>) -> Self {
        let mut registry = Self::new();

        registry.register_memory_add(manager.clone());
        registry.register_memory_search(manager.clone());
        registry.register_memory_forget(manager.clone());
        registry.register_memory_consolidate(manager.clone());
        registry.register_memory_update(manager.clone());
        registry.register_memory_stats(manager.clone());
        registry.register_memory_summary(manager.clone());
        registry.register_memory_relate(manager);

        registry
    }

    /// Register a tool with its handler, replacing any tool of the same name.
    pub fn register(&mut self, tool: MemoryTool, handler: ToolHandler) {
        self.tools.insert(tool.name.clone(), (tool, handler));
    }

    pub fn get_tool(&self, name: &str) -> Option<&MemoryTool> {
        self.tools.get(name).map(|(tool, _)| tool)
    }

    /// All tool definitions, sorted by name.
    pub fn tools(&self) -> Vec<&MemoryTool> {
        let mut tools: Vec<&MemoryTool> = self.tools.values().map(|(tool, _)| tool).collect();
        tools.sort_by(|a, b| a.name.cmp(&b.name));
        tools
    }

    /// Execute a tool by name.
    pub async fn execute(&self, name: &str, input: Value) -> Result<Value> {
        let (_, handler) = self
            .tools
            .get(name)
            .ok_or_else(|| Error::Config(format!("Unknown tool: {}", name)))?;

        handler(input).await
    }

    pub fn count(&self) -> usize {
        self.tools.len()
    }

    pub fn tools_by_category(&self, category: &str) -> Vec<&MemoryTool> {
        self.tools()
            .into_iter()
            .filter(|tool| tool.category.as_deref() == Some(category))
            .collect()
    }

    /// Export tool definitions for a tool-calling layer.
    pub fn export_schema(&self) -> Value {
        let tools: Vec<Value> = self
            .tools()
            .iter()
            .map(|tool| {
                json!({
                    "name": tool.name,
                    "description": tool.description,
                    "inputSchema": tool.input_schema,
                })
            })
            .collect();

        json!({ "tools": tools })
    }

    // =========================================================================
    // Tool registrations
    // =========================================================================

    fn register_memory_add(&mut self, manager: Arc<MemoryManager>) {
        let tool = MemoryTool::new(
            "memory_add",
            "Store content in memory. The tier is chosen from the content unless given.",
        )
        .with_schema(json!({
            "type": "object",
            "properties": {
                "content": { "type": "string", "description": "Text to remember" },
                "tier": {
                    "type": "string",
                    "enum": ["working", "episodic", "semantic", "perceptual"]
                },
                "importance": { "type": "number", "minimum": 0, "maximum": 1 },
                "metadata": { "type": "object" },
                "file_path": {
                    "type": "string",
                    "description": "Media file described by content (perceptual memory)"
                }
            },
            "required": ["content"]
        }))
        .with_category("write");

        #[derive(Deserialize)]
        struct Input {
            content: String,
            tier: Option<Tier>,
            importance: Option<f64>,
            #[serde(default)]
            metadata: HashMap<String, Value>,
            file_path: Option<String>,
        }

        let handler = typed_handler(manager, |manager, input: Input| async move {
            let mut request = AddRequest::new(input.content).with_metadata_map(input.metadata);
            if let Some(path) = input.file_path {
                request = request.with_metadata(crate::memory::META_SOURCE_REF, path);
            }
            if let Some(tier) = input.tier {
                request = request.with_tier(tier);
            }
            if let Some(importance) = input.importance {
                request = request.with_importance(importance);
            }

            let id = manager.add_with(request).await?;
            let tier = manager.get(&id).await?.map(|item| item.tier);
            Ok(json!({ "id": id.to_string(), "tier": tier }))
        });

        self.register(tool, handler);
    }

    fn register_memory_search(&mut self, manager: Arc<MemoryManager>) {
        let tool = MemoryTool::new(
            "memory_search",
            "Search memory across tiers and return the best matches, most relevant first.",
        )
        .with_schema(json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "tiers": { "type": "array", "items": { "type": "string" } },
                "limit": { "type": "integer", "minimum": 1 },
                "min_importance": { "type": "number", "minimum": 0, "maximum": 1 },
                "modality": { "type": "string" },
                "within_hours": {
                    "type": "number",
                    "description": "Only episodes from the last N hours"
                }
            },
            "required": ["query"]
        }))
        .with_category("read");

        #[derive(Deserialize)]
        struct Input {
            query: String,
            tiers: Option<Vec<Tier>>,
            limit: Option<usize>,
            min_importance: Option<f64>,
            modality: Option<String>,
            within_hours: Option<f64>,
        }

        let handler = typed_handler(manager, |manager, input: Input| async move {
            let limit = input
                .limit
                .unwrap_or(manager.config().manager.default_limit);
            let mut request = RetrieveRequest::new(input.query).with_limit(limit);
            if let Some(tiers) = input.tiers {
                request = request.with_tiers(tiers);
            }
            if let Some(min_importance) = input.min_importance {
                request = request.with_min_importance(min_importance);
            }
            if let Some(modality) = input.modality {
                request = request.with_modality(modality);
            }
            if let Some(hours) = input.within_hours {
                let minutes = (hours * 60.0).max(0.0) as i64;
                request = request.with_time_range(TimeRange::last(Duration::minutes(minutes)));
            }

            let results: Vec<Value> = manager
                .retrieve_with(request)
                .await?
                .into_iter()
                .map(|scored| {
                    json!({
                        "id": scored.item.id.to_string(),
                        "tier": scored.item.tier,
                        "content": scored.item.content,
                        "score": scored.score,
                        "importance": scored.item.importance,
                        "created_at": scored.item.created_at,
                    })
                })
                .collect();
            Ok(json!({ "count": results.len(), "results": results }))
        });

        self.register(tool, handler);
    }

    fn register_memory_forget(&mut self, manager: Arc<MemoryManager>) {
        let tool = MemoryTool::new(
            "memory_forget",
            "Forget a memory by id, or bulk-forget with a strategy \
             (importance threshold, maximum age, or per-tier capacity).",
        )
        .with_schema(json!({
            "type": "object",
            "properties": {
                "id": { "type": "string" },
                "strategy": { "type": "string", "enum": ["importance", "time", "capacity"] },
                "threshold": { "type": "number" },
                "max_age_days": { "type": "number" },
                "keep": { "type": "integer", "minimum": 0 }
            }
        }))
        .destructive()
        .with_category("maintenance");

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Input {
            One { id: String },
            Policy(ForgetPolicy),
        }

        let handler = typed_handler(manager, |manager, input: Input| async move {
            match input {
                Input::One { id } => {
                    let forgotten = manager.forget(&parse_id(&id)?).await?;
                    Ok(json!({ "forgotten": forgotten }))
                }
                Input::Policy(policy) => {
                    let ids: Vec<String> = manager
                        .forget_where(&policy)
                        .await?
                        .into_iter()
                        .map(|id| id.to_string())
                        .collect();
                    Ok(json!({ "count": ids.len(), "forgotten": ids }))
                }
            }
        });

        self.register(tool, handler);
    }

    fn register_memory_consolidate(&mut self, manager: Arc<MemoryManager>) {
        let tool = MemoryTool::new(
            "memory_consolidate",
            "Promote important working memories into episodic or semantic memory.",
        )
        .with_category("maintenance");

        let handler = typed_handler(manager, |manager, _input: Value| async move {
            let report = manager.consolidate().await?;
            Ok(serde_json::to_value(report)?)
        });

        self.register(tool, handler);
    }

    fn register_memory_update(&mut self, manager: Arc<MemoryManager>) {
        let tool = MemoryTool::new(
            "memory_update",
            "Change the importance or merge metadata of an existing memory. Content is immutable.",
        )
        .with_schema(json!({
            "type": "object",
            "properties": {
                "id": { "type": "string" },
                "importance": { "type": "number", "minimum": 0, "maximum": 1 },
                "metadata": { "type": "object" }
            },
            "required": ["id"]
        }))
        .with_category("write");

        #[derive(Deserialize)]
        struct Input {
            id: String,
            importance: Option<f64>,
            metadata: Option<HashMap<String, Value>>,
        }

        let handler = typed_handler(manager, |manager, input: Input| async move {
            let id = parse_id(&input.id)?;
            let updated = manager.update(&id, input.importance, input.metadata).await?;
            Ok(json!({ "updated": updated }))
        });

        self.register(tool, handler);
    }

    fn register_memory_stats(&mut self, manager: Arc<MemoryManager>) {
        let tool = MemoryTool::new("memory_stats", "Item counts and importance per memory tier.")
            .with_category("read");

        let handler = typed_handler(manager, |manager, _input: Value| async move {
            Ok(serde_json::to_value(manager.stats().await?)?)
        });

        self.register(tool, handler);
    }

    fn register_memory_summary(&mut self, manager: Arc<MemoryManager>) {
        let tool = MemoryTool::new(
            "memory_summary",
            "Overview of memory with the most important items of each tier.",
        )
        .with_schema(json!({
            "type": "object",
            "properties": {
                "limit": { "type": "integer", "minimum": 0, "default": 5 }
            }
        }))
        .with_category("read");

        #[derive(Deserialize)]
        struct Input {
            limit: Option<usize>,
        }

        let handler = typed_handler(manager, |manager, input: Input| async move {
            let summary = manager.summary(input.limit.unwrap_or(5)).await?;
            Ok(json!({ "summary": summary }))
        });

        self.register(tool, handler);
    }

    fn register_memory_relate(&mut self, manager: Arc<MemoryManager>) {
        let tool = MemoryTool::new(
            "memory_relate",
            "Record a (subject, predicate, object) relation, or list concepts \
             related to `concept` within `max_depth` hops.",
        )
        .with_schema(json!({
            "type": "object",
            "properties": {
                "subject": { "type": "string" },
                "predicate": { "type": "string" },
                "object": { "type": "string" },
                "concept": { "type": "string" },
                "max_depth": { "type": "integer", "minimum": 1, "default": 2 }
            }
        }))
        .with_category("knowledge");

        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Input {
            Store {
                subject: String,
                predicate: String,
                object: String,
            },
            Traverse {
                concept: String,
                max_depth: Option<usize>,
            },
        }

        let handler = typed_handler(manager, |manager, input: Input| async move {
            match input {
                Input::Store {
                    subject,
                    predicate,
                    object,
                } => {
                    let inserted = manager.store_triple(&subject, &predicate, &object).await?;
                    Ok(json!({ "inserted": inserted }))
                }
                Input::Traverse { concept, max_depth } => {
                    let related = manager
                        .find_related(&concept, max_depth.unwrap_or(2))
                        .await?;
                    Ok(json!({ "concept": concept, "related": related }))
                }
            }
        });

        self.register(tool, handler);
    }
}
