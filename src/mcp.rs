//! MCP (Model Context Protocol) server exposing the memory store and task
//! scheduler (C10, spec §6) over stdio.
//!
//! One tool per operation rather than the unified action-dispatch pattern
//! this module used before: the spec's tool surface is wide (14 tools) but
//! each one has its own validated input shape, and `rmcp`'s `#[tool]` macro
//! already gives each a distinct JSON schema for free.

use std::sync::Arc;

use rmcp::{
    handler::server::{router::tool::ToolRouter, tool::ToolCallContext, wrapper::Parameters, ServerHandler},
    model::*,
    service::{RequestContext, RoleServer, ServiceExt},
    tool, tool_router,
    transport::io::stdio,
};
use tracing::error;

use crate::tools::{
    self, BulkDeleteInput, CleanupInput, DeleteInput, ExportInput, FeedbackInput, GetInput, ImportInput, ListInput,
    SearchInput, StoreInput, TaskAddInput, TaskCancelInput, TaskListInput, TaskResultsInput, UpdateInput,
};

type McpError = rmcp::model::ErrorData;

/// Envelope every tool response is wrapped in (spec §7 "tool dispatch
/// layer"): a successful call serializes its output directly; a core
/// error is funneled into `{error, is_error: true}` instead of a
/// protocol-level failure, so a client sees a normal tool result either way.
fn respond<T: serde::Serialize>(result: crate::Result<T>) -> Result<CallToolResult, McpError> {
    let text = match result {
        Ok(value) => serde_json::to_string(&value).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}")),
        Err(e) => {
            error!(error = %e, "tool call failed");
            serde_json::json!({ "error": e.to_string(), "is_error": true }).to_string()
        }
    };
    Ok(CallToolResult::success(vec![Content::text(text)]))
}

/// MCP server wrapping the shared `Core` (config, embedding provider, scheduler).
#[derive(Clone)]
pub struct CodeMemServer {
    core: Arc<tools::Core>,
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl CodeMemServer {
    pub fn new(core: Arc<tools::Core>) -> Self {
        Self {
            core,
            tool_router: Self::tool_router(),
        }
    }

    #[tool(
        name = "store",
        description = "Store a new memory: chunks, embeds, and deduplicates against existing memories before writing."
    )]
    async fn store(&self, params: Parameters<StoreInput>) -> Result<CallToolResult, McpError> {
        let core = self.core.clone();
        let input = params.0;
        let result = tokio::task::spawn_blocking(move || tools::store(&core, input))
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        respond(result)
    }

    #[tool(
        name = "search",
        description = "Hybrid vector + keyword search over stored memories.",
        annotations(read_only_hint = true)
    )]
    async fn search(&self, params: Parameters<SearchInput>) -> Result<CallToolResult, McpError> {
        let core = self.core.clone();
        let input = params.0;
        let result = tokio::task::spawn_blocking(move || tools::search(&core, input))
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        respond(result)
    }

    #[tool(name = "get", description = "Fetch a single memory by id.", annotations(read_only_hint = true))]
    async fn get(&self, params: Parameters<GetInput>) -> Result<CallToolResult, McpError> {
        let core = self.core.clone();
        let input = params.0;
        let result = tokio::task::spawn_blocking(move || tools::get(&core, &input.id, input.project.as_deref()))
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        respond(result)
    }

    #[tool(name = "list", description = "List memories with optional project/tag/source/since filters.", annotations(read_only_hint = true))]
    async fn list(&self, params: Parameters<ListInput>) -> Result<CallToolResult, McpError> {
        let core = self.core.clone();
        let input = params.0;
        let result = tokio::task::spawn_blocking(move || tools::list(&core, input))
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        respond(result)
    }

    #[tool(name = "update", description = "Update a memory's content, tags, metadata, type, importance, or rule flag.")]
    async fn update(&self, params: Parameters<UpdateInput>) -> Result<CallToolResult, McpError> {
        let core = self.core.clone();
        let input = params.0;
        let result = tokio::task::spawn_blocking(move || tools::update(&core, input))
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        respond(result)
    }

    #[tool(name = "delete", description = "Delete a single memory by id.")]
    async fn delete(&self, params: Parameters<DeleteInput>) -> Result<CallToolResult, McpError> {
        let core = self.core.clone();
        let input = params.0;
        let result = tokio::task::spawn_blocking(move || tools::delete(&core, &input.id, input.project.as_deref()))
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        respond(result)
    }

    #[tool(name = "cleanup", description = "Delete memories older than a cutoff; dry-run unless `dry_run=false` and `older_than` is set.")]
    async fn cleanup(&self, params: Parameters<CleanupInput>) -> Result<CallToolResult, McpError> {
        let core = self.core.clone();
        let input = params.0;
        let result = tokio::task::spawn_blocking(move || tools::cleanup(&core, input))
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        respond(result)
    }

    #[tool(name = "feedback", description = "Record feedback on a memory (useful, outdated, wrong, duplicate), adjusting its importance.")]
    async fn feedback(&self, params: Parameters<FeedbackInput>) -> Result<CallToolResult, McpError> {
        let core = self.core.clone();
        let input = params.0;
        let result = tokio::task::spawn_blocking(move || tools::feedback(&core, input))
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        respond(result)
    }

    #[tool(name = "bulk_delete", description = "Delete all memories matching a tag, project, and/or age filter. Requires confirm=true.")]
    async fn bulk_delete(&self, params: Parameters<BulkDeleteInput>) -> Result<CallToolResult, McpError> {
        let core = self.core.clone();
        let input = params.0;
        let result = tokio::task::spawn_blocking(move || tools::bulk_delete(&core, input))
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        respond(result)
    }

    #[tool(name = "export", description = "Export memories as JSON or Markdown.", annotations(read_only_hint = true))]
    async fn export(&self, params: Parameters<ExportInput>) -> Result<CallToolResult, McpError> {
        let core = self.core.clone();
        let input = params.0;
        let result = tokio::task::spawn_blocking(move || tools::export(&core, input))
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        respond(result)
    }

    #[tool(name = "import", description = "Import memories previously produced by `export`. Malformed input reports errors rather than failing.")]
    async fn import(&self, params: Parameters<ImportInput>) -> Result<CallToolResult, McpError> {
        let core = self.core.clone();
        let input = params.0;
        let result = tokio::task::spawn_blocking(move || tools::import(&core, input))
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        respond(result)
    }

    #[tool(name = "task_add", description = "Enqueue a background task for the scheduler to claim and run.")]
    async fn task_add(&self, params: Parameters<TaskAddInput>) -> Result<CallToolResult, McpError> {
        let core = self.core.clone();
        let input = params.0;
        let result = tokio::task::spawn_blocking(move || tools::task_add(&core, input))
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        respond(result)
    }

    #[tool(name = "task_list", description = "List tasks, optionally filtered by status/project/since.", annotations(read_only_hint = true))]
    async fn task_list(&self, params: Parameters<TaskListInput>) -> Result<CallToolResult, McpError> {
        let core = self.core.clone();
        let input = params.0;
        let result = tokio::task::spawn_blocking(move || tools::task_list(&core, input))
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        respond(result)
    }

    #[tool(name = "task_results", description = "Fetch recorded results for completed or failed tasks.", annotations(read_only_hint = true))]
    async fn task_results(&self, params: Parameters<TaskResultsInput>) -> Result<CallToolResult, McpError> {
        let core = self.core.clone();
        let input = params.0;
        let result = tokio::task::spawn_blocking(move || tools::task_results(&core, input))
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        respond(result)
    }

    #[tool(name = "task_cancel", description = "Cancel a pending task by id.")]
    async fn task_cancel(&self, params: Parameters<TaskCancelInput>) -> Result<CallToolResult, McpError> {
        let core = self.core.clone();
        let input = params.0;
        let result = tokio::task::spawn_blocking(move || tools::task_cancel(&core, &input.id))
            .await
            .map_err(|e| McpError::internal_error(e.to_string(), None))?;
        respond(result)
    }
}

impl ServerHandler for CodeMemServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities {
                tools: Some(ToolsCapability { list_changed: None }),
                ..Default::default()
            },
            server_info: Implementation {
                name: "codemem".to_string(),
                title: Some("codemem MCP Server".to_string()),
                version: env!("CARGO_PKG_VERSION").to_string(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Persistent memory store and task scheduler for a coding assistant. Use `store` to \
                 record a memory, `search` for hybrid vector+keyword retrieval, `get`/`list`/`update`/`delete` \
                 for direct access, `feedback` to adjust importance from usage signal, `cleanup`/`bulk_delete` \
                 to prune, `export`/`import` to move memories between stores, and `task_add`/`task_list`/\
                 `task_results`/`task_cancel` to drive the background scheduler."
                    .to_string(),
            ),
        }
    }

    fn call_tool(
        &self,
        request: CallToolRequestParams,
        context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<CallToolResult, McpError>> + Send + '_ {
        let tool_context = ToolCallContext::new(self, request, context);
        async move { self.tool_router.call(tool_context).await }
    }

    fn list_tools(
        &self,
        _request: Option<PaginatedRequestParams>,
        _context: RequestContext<RoleServer>,
    ) -> impl std::future::Future<Output = Result<ListToolsResult, McpError>> + Send + '_ {
        let tools = self.tool_router.list_all();
        std::future::ready(Ok(ListToolsResult {
            tools,
            ..Default::default()
        }))
    }
}

/// Run the MCP server on stdio transport until the client disconnects.
pub async fn run_server(core: Arc<tools::Core>) -> anyhow::Result<()> {
    let server = CodeMemServer::new(core);

    let (stdin, stdout) = stdio();
    let service = server
        .serve((stdin, stdout))
        .await
        .map_err(|e| anyhow::anyhow!("MCP server failed to start: {:?}", e))?;

    service
        .waiting()
        .await
        .map_err(|e| anyhow::anyhow!("MCP server error: {:?}", e))?;

    Ok(())
}
